//! Feature Level State Machine
//!
//! The flag takes exactly one of four values and only ever moves along one
//! cycle:
//!
//! ```text
//! FullyAtOld → TransitioningToNew → FullyAtNew → TransitioningToOld → FullyAtOld → …
//! ```
//!
//! No edge is skipped and no edge is reversed. A transition that has been
//! marked can only be completed, never abandoned.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{TransitionError, TransitionResult};

/// Direction of a requested transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetLevel {
    /// The old feature level (downgrade target).
    Old,
    /// The new feature level (upgrade target).
    New,
}

impl TargetLevel {
    /// The other level.
    pub fn opposite(self) -> Self {
        match self {
            Self::Old => Self::New,
            Self::New => Self::Old,
        }
    }

    /// Flag value once the cluster is fully at this level.
    pub fn settled(self) -> FlagState {
        match self {
            Self::Old => FlagState::FullyAtOld,
            Self::New => FlagState::FullyAtNew,
        }
    }

    /// Flag value while the cluster is moving to this level.
    pub fn transitioning(self) -> FlagState {
        match self {
            Self::Old => FlagState::TransitioningToOld,
            Self::New => FlagState::TransitioningToNew,
        }
    }

    /// "upgrade" or "downgrade", for logs.
    pub fn direction_name(self) -> &'static str {
        match self {
            Self::Old => "downgrade",
            Self::New => "upgrade",
        }
    }
}

/// The persisted compatibility flag value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlagState {
    /// Every node runs with old-level behavior.
    FullyAtOld,
    /// An upgrade has been marked and is not yet committed.
    TransitioningToNew,
    /// Every node runs with new-level behavior.
    FullyAtNew,
    /// A downgrade has been marked and is not yet committed.
    TransitioningToOld,
}

impl Default for FlagState {
    fn default() -> Self {
        Self::FullyAtOld
    }
}

impl fmt::Display for FlagState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_name())
    }
}

impl FlagState {
    /// Get the state name for observability.
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::FullyAtOld => "FullyAtOld",
            Self::TransitioningToNew => "TransitioningToNew",
            Self::FullyAtNew => "FullyAtNew",
            Self::TransitioningToOld => "TransitioningToOld",
        }
    }

    /// Whether no transition is in progress.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::FullyAtOld | Self::FullyAtNew)
    }

    /// Whether a transition is in progress.
    pub fn is_transitioning(&self) -> bool {
        !self.is_settled()
    }

    /// The level this state is at, or is heading to.
    pub fn target(&self) -> TargetLevel {
        match self {
            Self::FullyAtOld | Self::TransitioningToOld => TargetLevel::Old,
            Self::FullyAtNew | Self::TransitioningToNew => TargetLevel::New,
        }
    }

    /// The single legal next value.
    pub fn successor(&self) -> Self {
        match self {
            Self::FullyAtOld => Self::TransitioningToNew,
            Self::TransitioningToNew => Self::FullyAtNew,
            Self::FullyAtNew => Self::TransitioningToOld,
            Self::TransitioningToOld => Self::FullyAtOld,
        }
    }

    /// Whether `next` is a legal edge from this state.
    pub fn can_move_to(&self, next: Self) -> bool {
        self.successor() == next
    }

    // =========================================================================
    // ALLOWED TRANSITIONS
    // =========================================================================

    /// FullyAt<opposite> → TransitioningTo<target>
    pub fn begin_transition(self, target: TargetLevel) -> TransitionResult<Self> {
        self.step(target.transitioning())
    }

    /// TransitioningTo<target> → FullyAt<target>
    pub fn commit_transition(self, target: TargetLevel) -> TransitionResult<Self> {
        self.step(target.settled())
    }

    fn step(self, next: Self) -> TransitionResult<Self> {
        if self.can_move_to(next) {
            Ok(next)
        } else {
            Err(TransitionError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    pub(crate) fn to_bits(self) -> u64 {
        match self {
            Self::FullyAtOld => 0,
            Self::TransitioningToNew => 1,
            Self::FullyAtNew => 2,
            Self::TransitioningToOld => 3,
        }
    }

    pub(crate) fn from_bits(bits: u64) -> Self {
        match bits & 0b11 {
            0 => Self::FullyAtOld,
            1 => Self::TransitioningToNew,
            2 => Self::FullyAtNew,
            _ => Self::TransitioningToOld,
        }
    }

    /// All four values, in cycle order.
    pub fn all() -> [Self; 4] {
        [
            Self::FullyAtOld,
            Self::TransitioningToNew,
            Self::FullyAtNew,
            Self::TransitioningToOld,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_fully_at_old() {
        assert_eq!(FlagState::default(), FlagState::FullyAtOld);
    }

    #[test]
    fn test_full_cycle() {
        let state = FlagState::FullyAtOld;
        let state = state.begin_transition(TargetLevel::New).unwrap();
        assert_eq!(state, FlagState::TransitioningToNew);
        let state = state.commit_transition(TargetLevel::New).unwrap();
        assert_eq!(state, FlagState::FullyAtNew);
        let state = state.begin_transition(TargetLevel::Old).unwrap();
        assert_eq!(state, FlagState::TransitioningToOld);
        let state = state.commit_transition(TargetLevel::Old).unwrap();
        assert_eq!(state, FlagState::FullyAtOld);
    }

    #[test]
    fn test_only_successor_edges_are_legal() {
        for from in FlagState::all() {
            for to in FlagState::all() {
                assert_eq!(from.can_move_to(to), from.successor() == to, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_cannot_commit_without_begin() {
        let result = FlagState::FullyAtOld.commit_transition(TargetLevel::New);
        assert_eq!(
            result,
            Err(TransitionError::InvalidTransition {
                from: FlagState::FullyAtOld,
                to: FlagState::FullyAtNew,
            })
        );
    }

    #[test]
    fn test_cannot_reverse_in_progress_upgrade() {
        let result = FlagState::TransitioningToNew.begin_transition(TargetLevel::Old);
        assert!(matches!(
            result,
            Err(TransitionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_bits_roundtrip() {
        for state in FlagState::all() {
            assert_eq!(FlagState::from_bits(state.to_bits()), state);
        }
    }

    #[test]
    fn test_target_helpers() {
        assert_eq!(TargetLevel::New.opposite(), TargetLevel::Old);
        assert_eq!(TargetLevel::Old.transitioning(), FlagState::TransitioningToOld);
        assert_eq!(FlagState::TransitioningToNew.target(), TargetLevel::New);
        assert!(FlagState::FullyAtNew.is_settled());
        assert!(FlagState::TransitioningToOld.is_transitioning());
    }
}
