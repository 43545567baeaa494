//! Idempotency Tokens
//!
//! Every remote call (eligibility, preprocess, confirm, status query) is
//! preceded by exactly one `next()` whose token is attached to that single
//! request. Retries of a logically new attempt get a fresh token.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Single-use identifier attached to one remote request
///
/// Distinct from any session/auth token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyToken(Uuid);

impl IdempotencyToken {
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Issues a fresh idempotency token per remote call
///
/// Implementations keep no history; uniqueness comes from the generator.
pub trait IdempotencyTokenProvider: Send + Sync {
    fn next(&self) -> IdempotencyToken;
}

/// 128-bit random tokens (UUID v4)
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTokenProvider;

impl IdempotencyTokenProvider for RandomTokenProvider {
    fn next(&self) -> IdempotencyToken {
        IdempotencyToken(Uuid::new_v4())
    }
}
