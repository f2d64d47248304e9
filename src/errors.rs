//! Transition Error Types
//!
//! Every failure surfaced to a caller carries a stable tag (`code()`) so the
//! caller can decide whether to retry.
//!
//! Failures never roll a transition back. Once the flag has been marked as
//! transitioning, the only way out is forward: re-issue the identical request
//! until every step (local and remote) has converged.

use thiserror::Error;
use uuid::Uuid;

use crate::flag::FlagState;

/// Result type for transition operations
pub type TransitionResult<T> = Result<T, TransitionError>;

/// Transition errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// Malformed or unsupported target. Rejected before any state change.
    #[error("invalid transition request: {0}")]
    Validation(String),

    /// The opposite direction's transition is still in progress.
    #[error("cannot start a new transition while the flag is {current}; finish that transition first")]
    ConflictingTransition { current: FlagState },

    /// One or more participants did not acknowledge the instruction.
    #[error("participants did not acknowledge the transition: {}", failed.join(", "))]
    PartialFailure { failed: Vec<String> },

    /// A fail point fired or a local action failed.
    #[error("transition halted: {reason}")]
    Fatal { reason: String, retryable: bool },

    /// The flag was asked to take an edge outside the legal cycle.
    #[error("illegal flag transition: {from} -> {to}")]
    InvalidTransition { from: FlagState, to: FlagState },

    /// The calling task tried to take the transition lock while holding it,
    /// or while holding a wide-operation guard the transition would wait on.
    #[error("attempt {attempt_id} cannot take the transition lock while holding {held}")]
    LockReentry { attempt_id: Uuid, held: &'static str },

    /// The flag document could not be loaded or durably written.
    #[error("flag persistence failed: {0}")]
    Persistence(String),
}

impl TransitionError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a fatal error.
    pub fn fatal(reason: impl Into<String>, retryable: bool) -> Self {
        Self::Fatal {
            reason: reason.into(),
            retryable,
        }
    }

    /// Create a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// Stable tag reported to callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "FCV_VALIDATION_ERROR",
            Self::ConflictingTransition { .. } => "FCV_CONFLICTING_TRANSITION",
            Self::PartialFailure { .. } => "FCV_PARTIAL_FAILURE",
            Self::Fatal { .. } => "FCV_FATAL_FAILURE",
            Self::InvalidTransition { .. } => "FCV_INVALID_TRANSITION",
            Self::LockReentry { .. } => "FCV_LOCK_REENTRY",
            Self::Persistence(_) => "FCV_PERSISTENCE_FAILED",
        }
    }

    /// Whether the way forward is to re-issue the same request.
    ///
    /// Partial and fatal failures leave the flag transitioning. A persistence
    /// failure may leave it either way: a failed begin write leaves it
    /// settled, a failed commit write leaves it transitioning. Re-issuing the
    /// request finishes the transition in every case, so callers must not
    /// read this as "the flag is mid-transition"; check `current_level()`.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Self::PartialFailure { .. } | Self::Fatal { .. } | Self::Persistence(_)
        )
    }

    /// Whether retrying (possibly after waiting) can succeed without changing
    /// the request.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConflictingTransition { .. } | Self::PartialFailure { .. } => true,
            Self::Persistence(_) => true,
            Self::Fatal { retryable, .. } => *retryable,
            Self::Validation(_) | Self::InvalidTransition { .. } | Self::LockReentry { .. } => {
                false
            }
        }
    }
}
