//! Stage Adapters
//!
//! Transport-agnostic contracts for the remote payment processor. Each stage
//! is a stateless request/response operation; the orchestrator owns all
//! state. Every request carries the idempotency token it was given, distinct
//! from any session token.

pub mod http;
#[cfg(any(test, feature = "mock-api"))]
pub mod simulated;

pub use http::{HttpProcessor, HttpProcessorConfig};
#[cfg(any(test, feature = "mock-api"))]
pub use simulated::{Operation, SimulatedProcessor};

use std::sync::Arc;

use async_trait::async_trait;

use super::normalizer::RemoteFailure;
use super::token::IdempotencyToken;
use super::types::{
    ConfirmationResult, ControlFlowToken, EligibilityResult, PaymentRail, PaymentSubtype,
    QuoteResponse, TransactionIntent, TransactionStatus,
};

/// Which source accounts and destinations are valid for a rail/subtype
#[async_trait]
pub trait EligibilityGate: Send + Sync {
    /// Both lists are populated (possibly empty) or an error is returned.
    async fn check_eligibility(
        &self,
        rail: PaymentRail,
        subtype: PaymentSubtype,
        idempotency: &IdempotencyToken,
    ) -> Result<EligibilityResult, RemoteFailure>;
}

/// Quote (and possibly reserve) a fully specified intent
#[async_trait]
pub trait PreprocessStage: Send + Sync {
    /// `supersedes` names the previous token of the same run, so the
    /// processor can release whatever it provisionally held for it.
    async fn preprocess(
        &self,
        intent: &TransactionIntent,
        supersedes: Option<&ControlFlowToken>,
        idempotency: &IdempotencyToken,
    ) -> Result<QuoteResponse, RemoteFailure>;
}

/// Execute a previously quoted transaction. Irreversible.
#[async_trait]
pub trait ConfirmStage: Send + Sync {
    async fn confirm(
        &self,
        token: &ControlFlowToken,
        idempotency: &IdempotencyToken,
    ) -> Result<ConfirmationResult, RemoteFailure>;
}

/// Resolve a confirm whose outcome is unknown
#[async_trait]
pub trait StatusQuery: Send + Sync {
    /// `confirm_idempotency` is the token the ambiguous confirm was sent
    /// with; `idempotency` is the fresh token of this query.
    async fn query_status(
        &self,
        token: &ControlFlowToken,
        confirm_idempotency: &IdempotencyToken,
        idempotency: &IdempotencyToken,
    ) -> Result<TransactionStatus, RemoteFailure>;
}

/// A processor implementing every stage
pub trait PaymentProcessor: EligibilityGate + PreprocessStage + ConfirmStage + StatusQuery {}

impl<T> PaymentProcessor for T where T: EligibilityGate + PreprocessStage + ConfirmStage + StatusQuery {}

/// Stage handles injected into one orchestrator instance
#[derive(Clone)]
pub struct Stages {
    pub gate: Arc<dyn EligibilityGate>,
    pub preprocess: Arc<dyn PreprocessStage>,
    pub confirm: Arc<dyn ConfirmStage>,
    pub status: Arc<dyn StatusQuery>,
}

impl Stages {
    /// Use one processor for all stages
    pub fn from_processor<P: PaymentProcessor + 'static>(processor: Arc<P>) -> Self {
        Self {
            gate: processor.clone(),
            preprocess: processor.clone(),
            confirm: processor.clone(),
            status: processor,
        }
    }
}
