//! Transaction Orchestration
//!
//! Drives a payment from intent to confirmed execution against a remote
//! processor in three ordered stages: eligibility, preprocess (quote) and
//! confirm.
//!
//! # State Machine
//!
//! ```text
//! IDLE → CHECKING_ELIGIBILITY → ELIGIBLE → PREPROCESSING → QUOTED → CONFIRMING → CONFIRMED
//!              ↓                   ↑  ↑          ↓            ↓  ↑       ↓
//!           FAILED                 │  └─────────(re-quote)────┘  │   AMBIGUOUS_OUTCOME
//!                                  └──(expired / correctable)────┘       ↓ reconcile
//!                                                              CONFIRMED | FAILED
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Single Use**: a control-flow token is confirmed at most once
//! 2. **Supersession**: a new quote makes every earlier token unconfirmable
//! 3. **Fresh Idempotency**: every remote call carries a newly issued key
//! 4. **Never Guess**: an unknown confirm outcome stays `AMBIGUOUS_OUTCOME`
//!    until reconciled; confirm is never retried

pub mod adapters;
pub mod error;
pub mod normalizer;
pub mod orchestrator;
pub mod state;
pub mod token;
pub mod types;

#[cfg(test)]
mod integration_tests;

// Re-exports for convenience
pub use adapters::{
    ConfirmStage, EligibilityGate, HttpProcessor, HttpProcessorConfig, PaymentProcessor,
    PreprocessStage, Stages, StatusQuery,
};
#[cfg(any(test, feature = "mock-api"))]
pub use adapters::{Operation, SimulatedProcessor};
pub use error::{ErrorKind, OrchestrationError, RetryHint};
pub use normalizer::{ErrorNormalizer, RemoteFailure};
pub use orchestrator::{OrchestratorConfig, ReconciliationOutcome, TransactionOrchestrator};
pub use state::{OrchestrationState, Stage, TransitionRecord};
pub use token::{IdempotencyToken, IdempotencyTokenProvider, RandomTokenProvider};
pub use types::{
    ConfirmationResult, ControlFlowToken, CurrencyCode, Destination, EligibilityResult, Money,
    PaymentRail, PaymentSubtype, Quote, QuoteResponse, RunId, SourceAccount, TransactionIntent,
    TransactionReference, TransactionStatus,
};
