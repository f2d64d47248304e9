//! Configured feature levels
//!
//! Requests name a level by its version string ("7.0", "8.0", ...). Only the
//! two configured versions are accepted.

use serde::{Deserialize, Serialize};

use super::state::{FlagState, TargetLevel};
use crate::errors::{TransitionError, TransitionResult};

/// The old and new version strings a node transitions between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureLevels {
    /// Version string of the old level.
    pub old: String,
    /// Version string of the new level.
    pub new: String,
}

impl FeatureLevels {
    /// Create a level pair.
    pub fn new(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
        }
    }

    /// Validate the pair itself.
    pub fn validate(&self) -> TransitionResult<()> {
        if self.old.trim().is_empty() || self.new.trim().is_empty() {
            return Err(TransitionError::validation("feature versions must not be empty"));
        }
        if self.old == self.new {
            return Err(TransitionError::validation(format!(
                "old and new feature versions must differ (both are '{}')",
                self.old
            )));
        }
        Ok(())
    }

    /// Resolve a requested version string to a target level.
    pub fn parse(&self, requested: &str) -> TransitionResult<TargetLevel> {
        let requested = requested.trim();
        if requested == self.new {
            Ok(TargetLevel::New)
        } else if requested == self.old {
            Ok(TargetLevel::Old)
        } else if requested.is_empty() {
            Err(TransitionError::validation("requested version is empty"))
        } else {
            Err(TransitionError::validation(format!(
                "unsupported version '{}': expected '{}' or '{}'",
                requested, self.old, self.new
            )))
        }
    }

    /// Version string of a level.
    pub fn version_of(&self, level: TargetLevel) -> &str {
        match level {
            TargetLevel::Old => &self.old,
            TargetLevel::New => &self.new,
        }
    }

    /// The version a node is guaranteed to honor in this state.
    ///
    /// While transitioning, that is the level being left.
    pub fn effective_version(&self, state: FlagState) -> &str {
        match state {
            FlagState::FullyAtOld | FlagState::TransitioningToNew => &self.old,
            FlagState::FullyAtNew | FlagState::TransitioningToOld => &self.new,
        }
    }

    /// The version being moved to, if a transition is in progress.
    pub fn target_version(&self, state: FlagState) -> Option<&str> {
        state
            .is_transitioning()
            .then(|| self.version_of(state.target()))
    }
}
