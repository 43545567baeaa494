//! Orchestration Error Types
//!
//! One small taxonomy consumed uniformly by callers, whatever the remote
//! processor actually returned (see [`super::normalizer`]).

use std::fmt;

use thiserror::Error;

use super::state::{OrchestrationState, Stage};

/// Error kinds exposed to presentation code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AuthenticationRequired,
    ValidationError,
    IneligibleParty,
    InsufficientFunds,
    TokenExpired,
    TokenAlreadyUsed,
    TokenSuperseded,
    RemoteUnavailable,
    AmbiguousOutcome,
    ConcurrentOperationInProgress,
    InvalidState,
}

impl ErrorKind {
    /// Stable code for API responses and logs
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::IneligibleParty => "INELIGIBLE_PARTY",
            ErrorKind::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorKind::TokenExpired => "TOKEN_EXPIRED",
            ErrorKind::TokenAlreadyUsed => "TOKEN_ALREADY_USED",
            ErrorKind::TokenSuperseded => "TOKEN_SUPERSEDED",
            ErrorKind::RemoteUnavailable => "REMOTE_UNAVAILABLE",
            ErrorKind::AmbiguousOutcome => "AMBIGUOUS_OUTCOME",
            ErrorKind::ConcurrentOperationInProgress => "CONCURRENT_OPERATION_IN_PROGRESS",
            ErrorKind::InvalidState => "INVALID_STATE",
        }
    }

    /// Which affordance the presentation layer should offer
    pub fn retry_hint(&self) -> RetryHint {
        match self {
            ErrorKind::ValidationError
            | ErrorKind::IneligibleParty
            | ErrorKind::InsufficientFunds
            | ErrorKind::TokenExpired
            | ErrorKind::TokenSuperseded => RetryHint::Resubmit,
            ErrorKind::RemoteUnavailable => RetryHint::Restart,
            ErrorKind::AmbiguousOutcome => RetryHint::Reconcile,
            ErrorKind::AuthenticationRequired
            | ErrorKind::TokenAlreadyUsed
            | ErrorKind::ConcurrentOperationInProgress
            | ErrorKind::InvalidState => RetryHint::None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Suggested next step after an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryHint {
    /// No retry affordance: programming error, double confirm, or re-login needed
    None,
    /// Correct the intent (or re-quote) and preprocess again
    Resubmit,
    /// Reset the run and start again from eligibility
    Restart,
    /// Query the transaction status before doing anything else
    Reconcile,
}

/// Orchestration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestrationError {
    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Ineligible party: {0}")]
    IneligibleParty(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Quote expired, preprocess again: {0}")]
    TokenExpired(String),

    #[error("Control-flow token already used: {0}")]
    TokenAlreadyUsed(String),

    #[error("Control-flow token superseded by a newer quote: {0}")]
    TokenSuperseded(String),

    #[error("Remote processor unavailable during {stage}: {message}")]
    RemoteUnavailable { stage: Stage, message: String },

    #[error("Confirm outcome unknown, reconcile before any further action: {0}")]
    AmbiguousOutcome(String),

    #[error("Another operation is already in flight (state {0})")]
    ConcurrentOperationInProgress(OrchestrationState),

    #[error("Operation '{operation}' not allowed in state {state}")]
    InvalidState {
        state: OrchestrationState,
        operation: &'static str,
    },
}

impl OrchestrationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestrationError::AuthenticationRequired(_) => ErrorKind::AuthenticationRequired,
            OrchestrationError::Validation(_) => ErrorKind::ValidationError,
            OrchestrationError::IneligibleParty(_) => ErrorKind::IneligibleParty,
            OrchestrationError::InsufficientFunds(_) => ErrorKind::InsufficientFunds,
            OrchestrationError::TokenExpired(_) => ErrorKind::TokenExpired,
            OrchestrationError::TokenAlreadyUsed(_) => ErrorKind::TokenAlreadyUsed,
            OrchestrationError::TokenSuperseded(_) => ErrorKind::TokenSuperseded,
            OrchestrationError::RemoteUnavailable { .. } => ErrorKind::RemoteUnavailable,
            OrchestrationError::AmbiguousOutcome(_) => ErrorKind::AmbiguousOutcome,
            OrchestrationError::ConcurrentOperationInProgress(_) => {
                ErrorKind::ConcurrentOperationInProgress
            }
            OrchestrationError::InvalidState { .. } => ErrorKind::InvalidState,
        }
    }

    #[inline]
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Stage the error was raised in, when it carries one
    pub fn stage(&self) -> Option<Stage> {
        match self {
            OrchestrationError::RemoteUnavailable { stage, .. } => Some(*stage),
            OrchestrationError::AmbiguousOutcome(_) => Some(Stage::Confirm),
            _ => None,
        }
    }

    #[inline]
    pub fn retry_hint(&self) -> RetryHint {
        self.kind().retry_hint()
    }

    /// Build an error of the given kind with a human message
    pub fn from_kind(kind: ErrorKind, stage: Stage, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::AuthenticationRequired => OrchestrationError::AuthenticationRequired(message),
            ErrorKind::ValidationError => OrchestrationError::Validation(message),
            ErrorKind::IneligibleParty => OrchestrationError::IneligibleParty(message),
            ErrorKind::InsufficientFunds => OrchestrationError::InsufficientFunds(message),
            ErrorKind::TokenExpired => OrchestrationError::TokenExpired(message),
            ErrorKind::TokenAlreadyUsed => OrchestrationError::TokenAlreadyUsed(message),
            ErrorKind::TokenSuperseded => OrchestrationError::TokenSuperseded(message),
            ErrorKind::RemoteUnavailable => OrchestrationError::RemoteUnavailable { stage, message },
            ErrorKind::AmbiguousOutcome => OrchestrationError::AmbiguousOutcome(message),
            // Local-only kinds never come from a remote; keep the message visible
            ErrorKind::ConcurrentOperationInProgress | ErrorKind::InvalidState => {
                OrchestrationError::Validation(message)
            }
        }
    }
}
