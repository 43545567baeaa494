//! Simulated Payment Processor
//!
//! In-memory processor used by the demo binary and the tests. It enforces the
//! token rules a real processor does (single use, supersession, expiry,
//! idempotent confirm replay) and supports fault injection.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{ConfirmStage, EligibilityGate, PreprocessStage, StatusQuery};
use crate::orchestration::normalizer::RemoteFailure;
use crate::orchestration::token::IdempotencyToken;
use crate::orchestration::types::{
    ConfirmationResult, ControlFlowToken, CurrencyCode, Destination, EligibilityResult, Money,
    PaymentRail, PaymentSubtype, Quote, QuoteResponse, SourceAccount, TransactionIntent,
    TransactionReference, TransactionStatus,
};

/// Remote operation, for fault injection and call inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Eligibility,
    Preprocess,
    Confirm,
    Status,
}

/// Processor-side view of a control-flow token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Open,
    Consumed,
    Superseded,
}

struct SimAccount {
    label: String,
    balance: Money,
}

struct SimPayee {
    label: String,
    currency: Option<CurrencyCode>,
}

struct SimQuote {
    intent: TransactionIntent,
    quote: Quote,
    status: TokenStatus,
    expires_at: Instant,
}

#[derive(Default)]
struct Book {
    accounts: BTreeMap<String, SimAccount>,
    payees: BTreeMap<(PaymentRail, String), SimPayee>,
    fees: HashMap<PaymentRail, i64>,
    fx_rates: HashMap<(CurrencyCode, CurrencyCode), Decimal>,
    quotes: HashMap<ControlFlowToken, SimQuote>,
    /// Confirm results keyed by the idempotency token they were sent with
    confirmations: HashMap<IdempotencyToken, ConfirmationResult>,
    executed: HashMap<ControlFlowToken, ConfirmationResult>,
    seen: HashMap<Operation, Vec<IdempotencyToken>>,
    next_quote: u64,
    next_reference: u64,
}

#[derive(Default)]
struct Faults {
    unavailable: HashMap<Operation, u32>,
    delays: HashMap<Operation, Duration>,
    lose_confirm_responses: u32,
    pending_status: u32,
    session_expired: bool,
}

/// In-memory payment processor
pub struct SimulatedProcessor {
    book: Mutex<Book>,
    faults: Mutex<Faults>,
    quote_ttl: Duration,
}

impl Default for SimulatedProcessor {
    fn default() -> Self {
        Self::new()
    }
}

fn rejected(status: u16, code: &str, message: impl Into<String>) -> RemoteFailure {
    RemoteFailure::Rejected {
        status: Some(status),
        code: Some(code.to_string()),
        message: message.into(),
    }
}

impl SimulatedProcessor {
    pub fn new() -> Self {
        Self {
            book: Mutex::new(Book::default()),
            faults: Mutex::new(Faults::default()),
            quote_ttl: Duration::from_secs(15 * 60),
        }
    }

    /// Seeded processor used by the demo binary
    pub fn demo() -> Self {
        let usd = CurrencyCode::from_static("USD");
        let eur = CurrencyCode::from_static("EUR");

        Self::new()
            .with_account("A1", "Everyday Checking", Money::new(100_000, usd.clone()))
            .with_account("A2", "Savings", Money::new(2_500_000, usd.clone()))
            .with_payee(
                PaymentRail::AccountProxy,
                "D1",
                "Mobile +1 555 0100",
                Some(usd.clone()),
            )
            .with_payee(
                PaymentRail::BillPayment,
                "B1",
                "City Power & Water",
                Some(usd.clone()),
            )
            .with_payee(
                PaymentRail::CrossBorderWire,
                "W1",
                "Supplier GmbH",
                Some(eur.clone()),
            )
            .with_payee(
                PaymentRail::StandingInstruction,
                "S1",
                "Landlord",
                Some(usd.clone()),
            )
            .with_fee(PaymentRail::AccountProxy, 150)
            .with_fee(PaymentRail::CrossBorderWire, 2_500)
            .with_fx_rate(usd, eur, Decimal::new(92, 2))
    }

    fn book_mut(&mut self) -> &mut Book {
        self.book.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    fn book(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // === Builder ===

    pub fn with_account(mut self, id: &str, label: &str, balance: Money) -> Self {
        self.book_mut().accounts.insert(
            id.to_string(),
            SimAccount {
                label: label.to_string(),
                balance,
            },
        );
        self
    }

    pub fn with_payee(
        mut self,
        rail: PaymentRail,
        id: &str,
        label: &str,
        currency: Option<CurrencyCode>,
    ) -> Self {
        self.book_mut().payees.insert(
            (rail, id.to_string()),
            SimPayee {
                label: label.to_string(),
                currency,
            },
        );
        self
    }

    pub fn with_fee(mut self, rail: PaymentRail, fee_minor: i64) -> Self {
        self.book_mut().fees.insert(rail, fee_minor);
        self
    }

    pub fn with_fx_rate(mut self, from: CurrencyCode, to: CurrencyCode, rate: Decimal) -> Self {
        self.book_mut().fx_rates.insert((from, to), rate);
        self
    }

    pub fn with_quote_ttl(mut self, ttl: Duration) -> Self {
        self.quote_ttl = ttl;
        self
    }

    // === Fault injection ===

    /// Fail the next `count` calls of `op` with a transport error
    pub fn fail_next(&self, op: Operation, count: u32) {
        self.faults().unavailable.insert(op, count);
    }

    /// Delay every call of `op` before it is processed
    pub fn set_delay(&self, op: Operation, delay: Option<Duration>) {
        let mut faults = self.faults();
        match delay {
            Some(d) => faults.delays.insert(op, d),
            None => faults.delays.remove(&op),
        };
    }

    /// Execute the next confirm but report a timeout to the caller
    pub fn lose_next_confirm_response(&self) {
        self.faults().lose_confirm_responses += 1;
    }

    /// Answer the next `count` status queries with `Pending`
    pub fn return_pending_status(&self, count: u32) {
        self.faults().pending_status = count;
    }

    pub fn set_session_expired(&self, expired: bool) {
        self.faults().session_expired = expired;
    }

    // === Inspection ===

    /// Idempotency tokens received for `op`, in arrival order
    pub fn tokens_seen(&self, op: Operation) -> Vec<IdempotencyToken> {
        self.book().seen.get(&op).cloned().unwrap_or_default()
    }

    pub fn call_count(&self, op: Operation) -> usize {
        self.book().seen.get(&op).map_or(0, Vec::len)
    }

    pub fn balance(&self, account: &str) -> Option<Money> {
        self.book().accounts.get(account).map(|a| a.balance.clone())
    }

    pub fn token_status(&self, token: &ControlFlowToken) -> Option<TokenStatus> {
        self.book().quotes.get(token).map(|q| q.status)
    }

    /// Record the call and apply injected faults; returns the delay to apply
    fn enter(
        &self,
        op: Operation,
        idempotency: &IdempotencyToken,
    ) -> Result<Option<Duration>, RemoteFailure> {
        self.book()
            .seen
            .entry(op)
            .or_default()
            .push(idempotency.clone());

        let mut faults = self.faults();
        if let Some(remaining) = faults.unavailable.get_mut(&op)
            && *remaining > 0
        {
            *remaining -= 1;
            debug!(?op, "Simulated outage");
            return Err(RemoteFailure::Transport(
                "simulated processor outage".to_string(),
            ));
        }
        if faults.session_expired {
            return Err(rejected(401, "SESSION_EXPIRED", "session expired"));
        }
        Ok(faults.delays.get(&op).copied())
    }

    fn take_lost_response(&self) -> bool {
        let mut faults = self.faults();
        if faults.lose_confirm_responses > 0 {
            faults.lose_confirm_responses -= 1;
            true
        } else {
            false
        }
    }

    fn take_pending_status(&self) -> bool {
        let mut faults = self.faults();
        if faults.pending_status > 0 {
            faults.pending_status -= 1;
            true
        } else {
            false
        }
    }
}

async fn apply_delay(delay: Option<Duration>) {
    if let Some(d) = delay {
        tokio::time::sleep(d).await;
    }
}

#[async_trait]
impl EligibilityGate for SimulatedProcessor {
    async fn check_eligibility(
        &self,
        rail: PaymentRail,
        subtype: PaymentSubtype,
        idempotency: &IdempotencyToken,
    ) -> Result<EligibilityResult, RemoteFailure> {
        let delay = self.enter(Operation::Eligibility, idempotency)?;
        apply_delay(delay).await;

        if !rail.accepts(subtype) {
            return Err(rejected(
                400,
                "INVALID_SUBTYPE",
                format!("{} is not a {} subtype", subtype, rail),
            ));
        }

        let book = self.book();
        let source_accounts = book
            .accounts
            .iter()
            .map(|(id, account)| SourceAccount {
                id: id.clone(),
                label: account.label.clone(),
                currency: account.balance.currency.clone(),
                available_balance: Some(account.balance.clone()),
            })
            .collect();
        let destinations = book
            .payees
            .iter()
            .filter(|(key, _)| key.0 == rail)
            .map(|(key, payee)| Destination {
                id: key.1.clone(),
                label: payee.label.clone(),
                currency: payee.currency.clone(),
            })
            .collect();

        Ok(EligibilityResult {
            rail,
            subtype,
            source_accounts,
            destinations,
        })
    }
}

#[async_trait]
impl PreprocessStage for SimulatedProcessor {
    async fn preprocess(
        &self,
        intent: &TransactionIntent,
        supersedes: Option<&ControlFlowToken>,
        idempotency: &IdempotencyToken,
    ) -> Result<QuoteResponse, RemoteFailure> {
        let delay = self.enter(Operation::Preprocess, idempotency)?;
        apply_delay(delay).await;

        if !intent.rail.accepts(intent.subtype) {
            return Err(rejected(400, "INVALID_SUBTYPE", "subtype/rail mismatch"));
        }
        let amount = intent.amount.amount_minor;
        if amount <= 0 {
            return Err(rejected(400, "INVALID_AMOUNT", "amount must be positive"));
        }

        let mut book = self.book();

        let (balance, account_currency) = match book.accounts.get(&intent.source_account) {
            Some(a) => (a.balance.amount_minor, a.balance.currency.clone()),
            None => {
                return Err(rejected(
                    422,
                    "ACCOUNT_NOT_ELIGIBLE",
                    format!("unknown source account {}", intent.source_account),
                ));
            }
        };
        if account_currency != intent.amount.currency {
            return Err(rejected(
                400,
                "CURRENCY_MISMATCH",
                format!(
                    "account {} is held in {}",
                    intent.source_account, account_currency
                ),
            ));
        }
        let payee_currency = match book
            .payees
            .get(&(intent.rail, intent.destination.clone()))
        {
            Some(p) => p.currency.clone(),
            None => {
                return Err(rejected(
                    422,
                    "INELIGIBLE_PARTY",
                    format!("destination {} rejected", intent.destination),
                ));
            }
        };

        let fee = book.fees.get(&intent.rail).copied().filter(|f| *f > 0);
        let total = amount
            .checked_add(fee.unwrap_or(0))
            .ok_or_else(|| rejected(400, "AMOUNT_OVERFLOW", "amount plus fee overflows"))?;
        if total > balance {
            return Err(rejected(
                422,
                "INSUFFICIENT_FUNDS",
                format!("available {} {}", balance, account_currency),
            ));
        }

        let (credit, fx_rate) = match payee_currency {
            Some(target) if target != intent.amount.currency => {
                let rate = book
                    .fx_rates
                    .get(&(intent.amount.currency.clone(), target.clone()))
                    .copied()
                    .ok_or_else(|| {
                        rejected(
                            400,
                            "UNSUPPORTED_CURRENCY_PAIR",
                            format!("{} -> {}", intent.amount.currency, target),
                        )
                    })?;
                let credited = (Decimal::from(amount) * rate)
                    .round()
                    .to_i64()
                    .ok_or_else(|| rejected(400, "AMOUNT_OVERFLOW", "credit overflow"))?;
                (Money::new(credited, target), Some(rate))
            }
            _ => (intent.amount.clone(), None),
        };

        if let Some(previous) = supersedes
            && let Some(entry) = book.quotes.get_mut(previous)
            && entry.status == TokenStatus::Open
        {
            entry.status = TokenStatus::Superseded;
            debug!(token = %previous, "Provisional quote released (superseded)");
        }

        book.next_quote += 1;
        let token = ControlFlowToken::from_processor(format!("T{}", book.next_quote));
        let quote = Quote {
            debit: intent.amount.clone(),
            credit,
            fee: fee.map(|f| Money::new(f, intent.amount.currency.clone())),
            fx_rate,
            expires_at: chrono::TimeDelta::from_std(self.quote_ttl)
                .ok()
                .map(|ttl| Utc::now() + ttl),
        };
        book.quotes.insert(
            token.clone(),
            SimQuote {
                intent: intent.clone(),
                quote: quote.clone(),
                status: TokenStatus::Open,
                expires_at: Instant::now() + self.quote_ttl,
            },
        );

        debug!(token = %token, %intent, "Quote issued");
        Ok(QuoteResponse { token, quote })
    }
}

#[async_trait]
impl ConfirmStage for SimulatedProcessor {
    async fn confirm(
        &self,
        token: &ControlFlowToken,
        idempotency: &IdempotencyToken,
    ) -> Result<ConfirmationResult, RemoteFailure> {
        let delay = self.enter(Operation::Confirm, idempotency)?;
        apply_delay(delay).await;

        let result = {
            let mut book = self.book();

            // Exactly-once replay: same attempt, same answer
            if let Some(done) = book.confirmations.get(idempotency) {
                return Ok(done.clone());
            }

            let (source_account, total) = match book.quotes.get(token) {
                None => {
                    return Err(rejected(404, "UNKNOWN_TOKEN", format!("no quote {}", token)));
                }
                Some(entry) => match entry.status {
                    TokenStatus::Consumed => {
                        return Err(rejected(
                            409,
                            "TOKEN_ALREADY_USED",
                            format!("{} already confirmed", token),
                        ));
                    }
                    TokenStatus::Superseded => {
                        return Err(rejected(
                            409,
                            "TOKEN_SUPERSEDED",
                            format!("{} replaced by a newer quote", token),
                        ));
                    }
                    TokenStatus::Open if Instant::now() >= entry.expires_at => {
                        return Err(rejected(410, "TOKEN_EXPIRED", format!("{} expired", token)));
                    }
                    TokenStatus::Open => (
                        entry.intent.source_account.clone(),
                        entry
                            .quote
                            .debit
                            .amount_minor
                            .checked_add(entry.quote.fee.as_ref().map_or(0, |f| f.amount_minor))
                            .ok_or_else(|| {
                                rejected(400, "AMOUNT_OVERFLOW", "debit plus fee overflows")
                            })?,
                    ),
                },
            };

            let account = book.accounts.get_mut(&source_account).ok_or_else(|| {
                rejected(422, "ACCOUNT_NOT_ELIGIBLE", "source account closed")
            })?;
            if account.balance.amount_minor < total {
                return Err(rejected(
                    422,
                    "INSUFFICIENT_FUNDS",
                    "balance changed since quote",
                ));
            }
            account.balance.amount_minor -= total;
            let balance_after = account.balance.clone();

            book.next_reference += 1;
            let result = ConfirmationResult {
                reference: TransactionReference::new(format!("REF-{:03}", book.next_reference)),
                balance_after: Some(balance_after),
                completed_at: Utc::now(),
            };
            if let Some(entry) = book.quotes.get_mut(token) {
                entry.status = TokenStatus::Consumed;
            }
            book.confirmations
                .insert(idempotency.clone(), result.clone());
            book.executed.insert(token.clone(), result.clone());
            result
        };

        info!(token = %token, reference = %result.reference, "Transaction executed");

        if self.take_lost_response() {
            debug!(token = %token, "Dropping confirm response");
            return Err(RemoteFailure::Timeout);
        }
        Ok(result)
    }
}

#[async_trait]
impl StatusQuery for SimulatedProcessor {
    async fn query_status(
        &self,
        token: &ControlFlowToken,
        confirm_idempotency: &IdempotencyToken,
        idempotency: &IdempotencyToken,
    ) -> Result<TransactionStatus, RemoteFailure> {
        let delay = self.enter(Operation::Status, idempotency)?;
        apply_delay(delay).await;

        if self.take_pending_status() {
            return Ok(TransactionStatus::Pending);
        }

        let book = self.book();
        if let Some(done) = book
            .confirmations
            .get(confirm_idempotency)
            .or_else(|| book.executed.get(token))
        {
            return Ok(TransactionStatus::Completed(done.clone()));
        }
        Ok(TransactionStatus::NotExecuted {
            reason: format!("no execution recorded for {}", token),
        })
    }
}
