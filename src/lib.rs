//! Rail Orchestrator - Multi-Stage Payment Orchestration
//!
//! Drives a payment intent through eligibility, preprocess (quote) and
//! confirm against a remote processor, with single-use control-flow tokens,
//! per-call idempotency tokens and explicit handling of unknown outcomes.
//!
//! # Modules
//!
//! - [`orchestration`] - State machine, stage adapters, tokens, error normalizer
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod logging;
pub mod orchestration;

// Convenient re-exports at crate root
pub use orchestration::{
    ErrorKind, OrchestrationError, OrchestrationState, OrchestratorConfig, PaymentRail,
    PaymentSubtype, ReconciliationOutcome, Stages, TransactionIntent, TransactionOrchestrator,
};
