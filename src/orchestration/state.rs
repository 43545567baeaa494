//! Orchestration State Definitions

use std::fmt;

use chrono::{DateTime, Utc};

use super::error::ErrorKind;

/// Remote stage an error or failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Eligibility,
    Preprocess,
    Confirm,
    /// Status query resolving an ambiguous confirm
    Reconcile,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Eligibility => "ELIGIBILITY",
            Stage::Preprocess => "PREPROCESS",
            Stage::Confirm => "CONFIRM",
            Stage::Reconcile => "RECONCILE",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Orchestration run states
///
/// Terminal states: CONFIRMED, FAILED. `AmbiguousOutcome` is deliberately not
/// terminal and not a failure: the transaction may have executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrchestrationState {
    Idle,
    /// Eligibility request in flight
    CheckingEligibility,
    Eligible,
    /// Preprocess request in flight
    Preprocessing,
    /// A fresh control-flow token and quote are held
    Quoted,
    /// Confirm request in flight
    Confirming,
    Confirmed,
    /// Confirm outcome unknown; only reconciliation may leave this state
    AmbiguousOutcome,
    Failed { stage: Stage, kind: ErrorKind },
}

impl OrchestrationState {
    /// Check if this is a terminal state
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestrationState::Confirmed | OrchestrationState::Failed { .. }
        )
    }

    /// Check if a remote call is outstanding
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            OrchestrationState::CheckingEligibility
                | OrchestrationState::Preprocessing
                | OrchestrationState::Confirming
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestrationState::Idle => "IDLE",
            OrchestrationState::CheckingEligibility => "CHECKING_ELIGIBILITY",
            OrchestrationState::Eligible => "ELIGIBLE",
            OrchestrationState::Preprocessing => "PREPROCESSING",
            OrchestrationState::Quoted => "QUOTED",
            OrchestrationState::Confirming => "CONFIRMING",
            OrchestrationState::Confirmed => "CONFIRMED",
            OrchestrationState::AmbiguousOutcome => "AMBIGUOUS_OUTCOME",
            OrchestrationState::Failed { .. } => "FAILED",
        }
    }
}

impl fmt::Display for OrchestrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestrationState::Failed { stage, kind } => {
                write!(f, "FAILED({}, {})", stage, kind.code())
            }
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// One recorded state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRecord {
    pub from: OrchestrationState,
    pub to: OrchestrationState,
    pub at: DateTime<Utc>,
}
