//! Error Normalizer
//!
//! Maps heterogeneous remote failures (transport errors, timeouts, HTTP
//! statuses, processor error codes) onto [`ErrorKind`].

use std::fmt;

use super::error::{ErrorKind, OrchestrationError};
use super::state::Stage;

/// Failure as reported by a stage adapter, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteFailure {
    /// Connection refused, reset, DNS failure...
    Transport(String),
    /// No response within the call timeout
    Timeout,
    /// The processor answered with an error
    Rejected {
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },
    /// A success response that could not be decoded
    Malformed(String),
}

impl RemoteFailure {
    /// Convenience for adapters that only have a processor error code
    pub fn rejected(code: &str, message: impl Into<String>) -> Self {
        RemoteFailure::Rejected {
            status: None,
            code: Some(code.to_string()),
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteFailure::Transport(e) => write!(f, "transport error: {}", e),
            RemoteFailure::Timeout => write!(f, "request timed out"),
            RemoteFailure::Rejected {
                status,
                code,
                message,
            } => write!(
                f,
                "rejected (status={}, code={}): {}",
                status.map_or_else(|| "-".to_string(), |s| s.to_string()),
                code.as_deref().unwrap_or("-"),
                message
            ),
            RemoteFailure::Malformed(e) => write!(f, "malformed response: {}", e),
        }
    }
}

/// Stateless classifier
pub struct ErrorNormalizer;

impl ErrorNormalizer {
    /// Classify a failure by processor code first, then HTTP status
    pub fn classify(failure: &RemoteFailure) -> ErrorKind {
        match failure {
            RemoteFailure::Transport(_) | RemoteFailure::Timeout | RemoteFailure::Malformed(_) => {
                ErrorKind::RemoteUnavailable
            }
            RemoteFailure::Rejected { status, code, .. } => code
                .as_deref()
                .and_then(Self::classify_code)
                .or_else(|| status.map(Self::classify_status))
                .unwrap_or(ErrorKind::ValidationError),
        }
    }

    fn classify_code(code: &str) -> Option<ErrorKind> {
        let kind = match code.to_ascii_uppercase().as_str() {
            "UNAUTHORIZED" | "SESSION_EXPIRED" | "AUTHENTICATION_REQUIRED" => {
                ErrorKind::AuthenticationRequired
            }
            "INSUFFICIENT_FUNDS" | "INSUFFICIENT_BALANCE" => ErrorKind::InsufficientFunds,
            "INELIGIBLE_PARTY" | "PAYEE_REJECTED" | "ACCOUNT_NOT_ELIGIBLE" => {
                ErrorKind::IneligibleParty
            }
            "TOKEN_EXPIRED" | "QUOTE_EXPIRED" => ErrorKind::TokenExpired,
            "TOKEN_ALREADY_USED" => ErrorKind::TokenAlreadyUsed,
            "TOKEN_SUPERSEDED" => ErrorKind::TokenSuperseded,
            "SERVICE_UNAVAILABLE" | "TIMEOUT" | "RATE_LIMITED" => ErrorKind::RemoteUnavailable,
            _ => return None,
        };
        Some(kind)
    }

    fn classify_status(status: u16) -> ErrorKind {
        match status {
            401 | 403 => ErrorKind::AuthenticationRequired,
            409 => ErrorKind::TokenAlreadyUsed,
            410 => ErrorKind::TokenExpired,
            429 | 500..=599 => ErrorKind::RemoteUnavailable,
            _ => ErrorKind::ValidationError,
        }
    }

    /// Turn a stage failure into the caller-facing error
    ///
    /// An unavailable processor during confirm means the outcome is unknown,
    /// so it surfaces as `AmbiguousOutcome`, never as a plain retryable error.
    pub fn normalize(stage: Stage, failure: RemoteFailure) -> OrchestrationError {
        let kind = match (stage, Self::classify(&failure)) {
            (Stage::Confirm, ErrorKind::RemoteUnavailable) => ErrorKind::AmbiguousOutcome,
            (_, kind) => kind,
        };
        let message = match &failure {
            RemoteFailure::Rejected { message, .. } => message.clone(),
            other => other.to_string(),
        };
        OrchestrationError::from_kind(kind, stage, message)
    }
}
