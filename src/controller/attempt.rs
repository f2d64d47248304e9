//! Transition attempt state machine
//!
//! ```text
//! Idle -> ValidatingRequest -> BarrierRaised -> CleanupRunning -> Committed
//!                  |                                |    ^
//!                  |                                v    |
//!                  |                         ParticipantsNotified -> Committed
//!                  +--> Committed (already at target)
//!
//! any non-terminal state -> Failed
//! ```
//!
//! The attempt records every state it passed through so a caller can see
//! how far a failed attempt got.

use uuid::Uuid;

use crate::config::NodeRole;
use crate::errors::{TransitionError, TransitionResult};
use crate::flag::TargetLevel;

/// Controller states of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerState {
    Idle,
    ValidatingRequest,
    BarrierRaised,
    ParticipantsNotified,
    CleanupRunning,
    Committed,
    Failed,
}

impl ControllerState {
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::ValidatingRequest => "ValidatingRequest",
            Self::BarrierRaised => "BarrierRaised",
            Self::ParticipantsNotified => "ParticipantsNotified",
            Self::CleanupRunning => "CleanupRunning",
            Self::Committed => "Committed",
            Self::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Failed)
    }

    fn can_advance_to(&self, next: ControllerState) -> bool {
        use ControllerState::*;
        match (self, next) {
            (Idle, ValidatingRequest) => true,
            (ValidatingRequest, BarrierRaised | Committed) => true,
            (BarrierRaised, CleanupRunning) => true,
            (CleanupRunning, ParticipantsNotified | Committed) => true,
            (ParticipantsNotified, CleanupRunning | Committed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// One invocation of `request_transition`.
#[derive(Debug, Clone)]
pub struct TransitionAttempt {
    id: Uuid,
    role: NodeRole,
    requested_version: String,
    target: Option<TargetLevel>,
    state: ControllerState,
    history: Vec<ControllerState>,
}

impl TransitionAttempt {
    pub fn new(role: NodeRole, requested_version: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            requested_version: requested_version.into(),
            target: None,
            state: ControllerState::Idle,
            history: vec![ControllerState::Idle],
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn requested_version(&self) -> &str {
        &self.requested_version
    }

    /// Target level, once the request has been validated.
    pub fn target(&self) -> Option<TargetLevel> {
        self.target
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Every state visited, starting with `Idle`.
    pub fn history(&self) -> &[ControllerState] {
        &self.history
    }

    pub(crate) fn set_target(&mut self, target: TargetLevel) {
        self.target = Some(target);
    }

    /// Move to `next`. Illegal edges are a programming error surfaced as `Fatal`.
    pub fn advance(&mut self, next: ControllerState) -> TransitionResult<()> {
        if !self.state.can_advance_to(next) {
            return Err(TransitionError::fatal(
                format!(
                    "controller cannot move from {} to {}",
                    self.state.state_name(),
                    next.state_name()
                ),
                false,
            ));
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Mark the attempt failed. A terminal attempt is left as it is.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = ControllerState::Failed;
            self.history.push(ControllerState::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ControllerState::*;

    #[test]
    fn test_coordinator_upgrade_path() {
        let mut attempt = TransitionAttempt::new(NodeRole::Coordinator, "8.0");
        for next in [
            ValidatingRequest,
            BarrierRaised,
            CleanupRunning,
            ParticipantsNotified,
            CleanupRunning,
            Committed,
        ] {
            attempt.advance(next).unwrap();
        }
        assert_eq!(attempt.state(), Committed);
        assert_eq!(attempt.history().len(), 7);
    }

    #[test]
    fn test_already_at_target_path() {
        let mut attempt = TransitionAttempt::new(NodeRole::Standalone, "7.0");
        attempt.advance(ValidatingRequest).unwrap();
        attempt.advance(Committed).unwrap();
        assert!(attempt.state().is_terminal());
    }

    #[test]
    fn test_illegal_edges_rejected() {
        let mut attempt = TransitionAttempt::new(NodeRole::Participant, "8.0");
        let err = attempt.advance(BarrierRaised).unwrap_err();
        assert_eq!(err.code(), "FCV_FATAL_FAILURE");
        assert_eq!(attempt.state(), Idle);

        attempt.advance(ValidatingRequest).unwrap();
        assert!(attempt.advance(ParticipantsNotified).is_err());
    }

    #[test]
    fn test_fail_from_any_live_state() {
        let mut attempt = TransitionAttempt::new(NodeRole::ReplicaSet, "8.0");
        attempt.advance(ValidatingRequest).unwrap();
        attempt.advance(BarrierRaised).unwrap();
        attempt.fail();
        assert_eq!(attempt.state(), Failed);

        attempt.fail();
        assert_eq!(attempt.history().iter().filter(|s| **s == Failed).count(), 1);
        assert!(attempt.advance(Committed).is_err());
    }
}
