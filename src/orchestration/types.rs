//! Orchestration Core Types
//!
//! Transaction intents, quotes, eligibility hints and the opaque tokens that
//! bind a quote to its single confirm call.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::OrchestrationError;

/// Maximum length of the free-text remarks/purpose field
pub const MAX_REMARKS_LEN: usize = 140;

/// Run ID type - ULID-based identifier of one orchestration run
///
/// Only used for correlating log lines and transition history; it is never
/// sent to the payment processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(ulid::Ulid);

impl RunId {
    /// Generate a new unique RunId
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

// ============================================================================
// Payment Rails
// ============================================================================

/// Payment rail identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentRail {
    /// Transfer addressed by a proxy id (phone, email, national id)
    AccountProxy,
    /// Payment to a registered biller
    BillPayment,
    /// Cross-border wire transfer
    CrossBorderWire,
    /// One-off or recurring standing instruction
    StandingInstruction,
}

impl PaymentRail {
    pub const ALL: [PaymentRail; 4] = [
        PaymentRail::AccountProxy,
        PaymentRail::BillPayment,
        PaymentRail::CrossBorderWire,
        PaymentRail::StandingInstruction,
    ];

    /// Wire code used by the remote processor
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentRail::AccountProxy => "account_proxy",
            PaymentRail::BillPayment => "bill_payment",
            PaymentRail::CrossBorderWire => "cross_border_wire",
            PaymentRail::StandingInstruction => "standing_instruction",
        }
    }

    /// Subtypes accepted on this rail
    pub fn subtypes(&self) -> &'static [PaymentSubtype] {
        use PaymentSubtype::*;
        match self {
            PaymentRail::AccountProxy => &[Mobile, Email, NationalId, BusinessId],
            PaymentRail::BillPayment => &[Utility, CreditCard, Telecom, Tax],
            PaymentRail::CrossBorderWire => &[ChargeOur, ChargeShared, ChargeBeneficiary],
            PaymentRail::StandingInstruction => &[OneOff, Recurring],
        }
    }

    /// Check whether `subtype` belongs to this rail's enumeration
    #[inline]
    pub fn accepts(&self, subtype: PaymentSubtype) -> bool {
        subtype.rail() == *self
    }

    /// Proxy destinations are typed in by the payer rather than picked from
    /// the eligibility list, so only the processor can vet them.
    #[inline]
    pub fn destination_is_free_form(&self) -> bool {
        matches!(self, PaymentRail::AccountProxy)
    }
}

impl fmt::Display for PaymentRail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentRail {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentRail::ALL
            .into_iter()
            .find(|rail| rail.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| OrchestrationError::Validation(format!("Unknown payment rail: {}", s)))
    }
}

/// Payment subtype, scoped to exactly one rail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSubtype {
    // Account proxy: proxy-id type
    Mobile,
    Email,
    NationalId,
    BusinessId,
    // Bill payment: biller category
    Utility,
    CreditCard,
    Telecom,
    Tax,
    // Cross-border wire: charge bearer
    ChargeOur,
    ChargeShared,
    ChargeBeneficiary,
    // Standing instruction: schedule
    OneOff,
    Recurring,
}

impl PaymentSubtype {
    const ALL: [PaymentSubtype; 13] = [
        PaymentSubtype::Mobile,
        PaymentSubtype::Email,
        PaymentSubtype::NationalId,
        PaymentSubtype::BusinessId,
        PaymentSubtype::Utility,
        PaymentSubtype::CreditCard,
        PaymentSubtype::Telecom,
        PaymentSubtype::Tax,
        PaymentSubtype::ChargeOur,
        PaymentSubtype::ChargeShared,
        PaymentSubtype::ChargeBeneficiary,
        PaymentSubtype::OneOff,
        PaymentSubtype::Recurring,
    ];

    /// The rail this subtype belongs to
    pub fn rail(&self) -> PaymentRail {
        use PaymentSubtype::*;
        match self {
            Mobile | Email | NationalId | BusinessId => PaymentRail::AccountProxy,
            Utility | CreditCard | Telecom | Tax => PaymentRail::BillPayment,
            ChargeOur | ChargeShared | ChargeBeneficiary => PaymentRail::CrossBorderWire,
            OneOff | Recurring => PaymentRail::StandingInstruction,
        }
    }

    pub fn as_str(&self) -> &'static str {
        use PaymentSubtype::*;
        match self {
            Mobile => "mobile",
            Email => "email",
            NationalId => "national_id",
            BusinessId => "business_id",
            Utility => "utility",
            CreditCard => "credit_card",
            Telecom => "telecom",
            Tax => "tax",
            ChargeOur => "charge_our",
            ChargeShared => "charge_shared",
            ChargeBeneficiary => "charge_beneficiary",
            OneOff => "one_off",
            Recurring => "recurring",
        }
    }
}

impl fmt::Display for PaymentSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentSubtype {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentSubtype::ALL
            .into_iter()
            .find(|subtype| subtype.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                OrchestrationError::Validation(format!("Unknown payment subtype: {}", s))
            })
    }
}

// ============================================================================
// Money
// ============================================================================

/// ISO-4217 style currency code (three uppercase ASCII letters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn new(code: &str) -> Result<Self, OrchestrationError> {
        if code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase()) {
            Ok(Self(code.to_string()))
        } else {
            Err(OrchestrationError::Validation(format!(
                "Invalid currency code: {:?}",
                code
            )))
        }
    }

    /// For literal codes known to be well-formed
    pub(crate) fn from_static(code: &'static str) -> Self {
        debug_assert!(code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase()));
        Self(code.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = OrchestrationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CurrencyCode::new(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Amount in integer minor currency units (e.g. cents)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount_minor: i64,
    pub currency: CurrencyCode,
}

impl Money {
    pub fn new(amount_minor: i64, currency: CurrencyCode) -> Self {
        Self {
            amount_minor,
            currency,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount_minor, self.currency)
    }
}

// ============================================================================
// Transaction Intent
// ============================================================================

/// A fully specified transaction the caller wants quoted and executed
///
/// Immutable once handed to the preprocess stage: editing means building a
/// new intent and re-quoting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionIntent {
    pub rail: PaymentRail,
    pub subtype: PaymentSubtype,
    pub source_account: String,
    /// Payee, proxy id or counterparty, depending on the rail
    pub destination: String,
    pub amount: Money,
    pub remarks: String,
}

impl TransactionIntent {
    pub fn new(
        rail: PaymentRail,
        subtype: PaymentSubtype,
        source_account: impl Into<String>,
        destination: impl Into<String>,
        amount: Money,
    ) -> Self {
        Self {
            rail,
            subtype,
            source_account: source_account.into(),
            destination: destination.into(),
            amount,
            remarks: String::new(),
        }
    }

    pub fn with_remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = remarks.into();
        self
    }

    /// Local shape validation; the processor re-validates server-side.
    pub fn validate(&self) -> Result<(), OrchestrationError> {
        if !self.rail.accepts(self.subtype) {
            return Err(OrchestrationError::Validation(format!(
                "Subtype {} is not accepted on rail {}",
                self.subtype, self.rail
            )));
        }
        if self.amount.amount_minor <= 0 {
            return Err(OrchestrationError::Validation(
                "Amount must be greater than zero".to_string(),
            ));
        }
        if self.source_account.trim().is_empty() {
            return Err(OrchestrationError::Validation(
                "Source account is required".to_string(),
            ));
        }
        if self.destination.trim().is_empty() {
            return Err(OrchestrationError::Validation(
                "Destination is required".to_string(),
            ));
        }
        if self.remarks.chars().count() > MAX_REMARKS_LEN {
            return Err(OrchestrationError::Validation(format!(
                "Remarks exceed {} characters",
                MAX_REMARKS_LEN
            )));
        }
        Ok(())
    }
}

impl fmt::Display for TransactionIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Intent[{}/{}] {} -> {} amount={}",
            self.rail, self.subtype, self.source_account, self.destination, self.amount
        )
    }
}

// ============================================================================
// Eligibility
// ============================================================================

/// Source account usable for a rail/subtype
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAccount {
    pub id: String,
    pub label: String,
    pub currency: CurrencyCode,
    /// Display-only balance; not a reservation
    #[serde(default)]
    pub available_balance: Option<Money>,
}

/// Destination (payee/proxy/counterparty) usable for a rail/subtype
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub currency: Option<CurrencyCode>,
}

/// Eligibility hints; neither list reserves funds or locks counterparties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityResult {
    pub rail: PaymentRail,
    pub subtype: PaymentSubtype,
    pub source_accounts: Vec<SourceAccount>,
    pub destinations: Vec<Destination>,
}

impl EligibilityResult {
    pub fn has_source(&self, id: &str) -> bool {
        self.source_accounts.iter().any(|a| a.id == id)
    }

    pub fn has_destination(&self, id: &str) -> bool {
        self.destinations.iter().any(|d| d.id == id)
    }

    /// At least one source account is required to proceed to preprocessing
    pub fn is_usable(&self) -> bool {
        !self.source_accounts.is_empty()
    }
}

// ============================================================================
// Quote / Control-flow token
// ============================================================================

/// Opaque correlation token issued by the preprocess stage
///
/// Binds one computed quote to at most one successful confirm. Callers never
/// mint these; only stage adapters build them from processor responses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControlFlowToken(String);

impl ControlFlowToken {
    /// Wrap a token exactly as the processor returned it
    pub fn from_processor(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ControlFlowToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Computed, time-bounded terms of a not-yet-executed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub debit: Money,
    pub credit: Money,
    #[serde(default)]
    pub fee: Option<Money>,
    #[serde(default)]
    pub fx_rate: Option<Decimal>,
    /// Server-side expiry hint; the orchestrator applies the earlier of this
    /// and its own quote window.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Result of a successful preprocess call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteResponse {
    pub token: ControlFlowToken,
    pub quote: Quote,
}

// ============================================================================
// Confirmation
// ============================================================================

/// Processor-assigned reference of an executed transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionReference(String);

impl TransactionReference {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal artifact of a successful transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationResult {
    pub reference: TransactionReference,
    #[serde(default)]
    pub balance_after: Option<Money>,
    pub completed_at: DateTime<Utc>,
}

/// Answer of a reconciliation query for a confirm with unknown outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// The confirm executed; money moved
    Completed(ConfirmationResult),
    /// The processor has no execution for this token/attempt
    NotExecuted { reason: String },
    /// The processor has not settled the outcome yet
    Pending,
}
