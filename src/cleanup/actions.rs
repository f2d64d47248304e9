//! Node-side actions a transition triggers
//!
//! The internals of each action belong to other subsystems (range deletion,
//! collection creation, policy storage, routing metadata). A transition only
//! needs them to be idempotent and to report one of three outcomes.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use crate::failpoint::Checkpoint;
use crate::observability::Logger;

/// Result of one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Success,
    /// Transient; re-running the transition may succeed.
    Retryable(String),
    /// Needs operator attention before a retry can succeed.
    Fatal(String),
}

/// Future returned by every `NodeActions` method.
pub type ActionFuture<'a> = Pin<Box<dyn Future<Output = ActionOutcome> + Send + 'a>>;

/// Role-specific side effects of a transition.
///
/// Implementations must be idempotent: a retried transition re-runs every
/// action of its plan, including ones that already succeeded.
pub trait NodeActions: Send + Sync {
    /// Hand queued range cleanup work to the new-format processor.
    fn submit_range_cleanup(&self) -> ActionFuture<'_>;

    /// Remove range-deletion task records that only exist under the new format.
    fn drop_range_deletion_tasks(&self) -> ActionFuture<'_>;

    /// Wait until collection creations that started earlier have finished.
    fn drain_collection_creations(&self) -> ActionFuture<'_>;

    /// Remove the persisted default-policy document.
    fn delete_default_policy_document(&self) -> ActionFuture<'_>;

    /// Rewrite shared chunk and tag metadata in the new format.
    fn upgrade_coordinator_metadata(&self) -> ActionFuture<'_>;

    /// Rewrite shared chunk and tag metadata in the old format.
    fn downgrade_coordinator_metadata(&self) -> ActionFuture<'_>;
}

/// The actions a transition can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CleanupAction {
    SubmitRangeCleanup,
    DropRangeDeletionTasks,
    DrainCollectionCreations,
    DeleteDefaultPolicyDocument,
    UpgradeCoordinatorMetadata,
    DowngradeCoordinatorMetadata,
}

impl CleanupAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SubmitRangeCleanup => "submit_range_cleanup",
            Self::DropRangeDeletionTasks => "drop_range_deletion_tasks",
            Self::DrainCollectionCreations => "drain_collection_creations",
            Self::DeleteDefaultPolicyDocument => "delete_default_policy_document",
            Self::UpgradeCoordinatorMetadata => "upgrade_coordinator_metadata",
            Self::DowngradeCoordinatorMetadata => "downgrade_coordinator_metadata",
        }
    }

    /// Fail checkpoint that short-circuits this action.
    pub fn checkpoint(&self) -> Checkpoint {
        match self {
            Self::SubmitRangeCleanup => Checkpoint::FailSubmitRangeCleanup,
            Self::DropRangeDeletionTasks => Checkpoint::FailDropRangeDeletions,
            Self::DrainCollectionCreations => Checkpoint::FailDrainCollectionCreations,
            Self::DeleteDefaultPolicyDocument => Checkpoint::FailDeleteDefaultPolicy,
            Self::UpgradeCoordinatorMetadata | Self::DowngradeCoordinatorMetadata => {
                Checkpoint::FailCoordinatorMetadata
            }
        }
    }

    /// Dispatch to the matching `NodeActions` method.
    pub fn invoke<'a>(&self, actions: &'a dyn NodeActions) -> ActionFuture<'a> {
        match self {
            Self::SubmitRangeCleanup => actions.submit_range_cleanup(),
            Self::DropRangeDeletionTasks => actions.drop_range_deletion_tasks(),
            Self::DrainCollectionCreations => actions.drain_collection_creations(),
            Self::DeleteDefaultPolicyDocument => actions.delete_default_policy_document(),
            Self::UpgradeCoordinatorMetadata => actions.upgrade_coordinator_metadata(),
            Self::DowngradeCoordinatorMetadata => actions.downgrade_coordinator_metadata(),
        }
    }
}

impl fmt::Display for CleanupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Actions for a node with nothing to clean up. Every action succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopActions;

impl NoopActions {
    fn done(action: CleanupAction) -> ActionFuture<'static> {
        Box::pin(async move {
            Logger::trace("fcv.cleanup.noop", &[("action", action.name())]);
            ActionOutcome::Success
        })
    }
}

impl NodeActions for NoopActions {
    fn submit_range_cleanup(&self) -> ActionFuture<'_> {
        Self::done(CleanupAction::SubmitRangeCleanup)
    }

    fn drop_range_deletion_tasks(&self) -> ActionFuture<'_> {
        Self::done(CleanupAction::DropRangeDeletionTasks)
    }

    fn drain_collection_creations(&self) -> ActionFuture<'_> {
        Self::done(CleanupAction::DrainCollectionCreations)
    }

    fn delete_default_policy_document(&self) -> ActionFuture<'_> {
        Self::done(CleanupAction::DeleteDefaultPolicyDocument)
    }

    fn upgrade_coordinator_metadata(&self) -> ActionFuture<'_> {
        Self::done(CleanupAction::UpgradeCoordinatorMetadata)
    }

    fn downgrade_coordinator_metadata(&self) -> ActionFuture<'_> {
        Self::done(CleanupAction::DowngradeCoordinatorMetadata)
    }
}

/// Actions that record every call and return scripted outcomes.
///
/// Used by tests and by embedders that want to see what a transition did.
#[derive(Default)]
pub struct RecordingActions {
    calls: Mutex<Vec<CleanupAction>>,
    outcomes: Mutex<HashMap<CleanupAction, ActionOutcome>>,
}

impl RecordingActions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `action` return `outcome` until changed. Unscripted actions succeed.
    pub fn set_outcome(&self, action: CleanupAction, outcome: ActionOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(action, outcome);
    }

    /// Calls made so far, in order.
    pub fn calls(&self) -> Vec<CleanupAction> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn record(&self, action: CleanupAction) -> ActionFuture<'_> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action);
        let outcome = self
            .outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&action)
            .cloned()
            .unwrap_or(ActionOutcome::Success);
        Box::pin(async move { outcome })
    }
}

impl NodeActions for RecordingActions {
    fn submit_range_cleanup(&self) -> ActionFuture<'_> {
        self.record(CleanupAction::SubmitRangeCleanup)
    }

    fn drop_range_deletion_tasks(&self) -> ActionFuture<'_> {
        self.record(CleanupAction::DropRangeDeletionTasks)
    }

    fn drain_collection_creations(&self) -> ActionFuture<'_> {
        self.record(CleanupAction::DrainCollectionCreations)
    }

    fn delete_default_policy_document(&self) -> ActionFuture<'_> {
        self.record(CleanupAction::DeleteDefaultPolicyDocument)
    }

    fn upgrade_coordinator_metadata(&self) -> ActionFuture<'_> {
        self.record(CleanupAction::UpgradeCoordinatorMetadata)
    }

    fn downgrade_coordinator_metadata(&self) -> ActionFuture<'_> {
        self.record(CleanupAction::DowngradeCoordinatorMetadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_actions_scripted_outcome() {
        let actions = RecordingActions::new();
        actions.set_outcome(
            CleanupAction::DropRangeDeletionTasks,
            ActionOutcome::Retryable("busy".into()),
        );

        assert_eq!(
            CleanupAction::DrainCollectionCreations.invoke(&actions).await,
            ActionOutcome::Success
        );
        assert_eq!(
            CleanupAction::DropRangeDeletionTasks.invoke(&actions).await,
            ActionOutcome::Retryable("busy".into())
        );
        assert_eq!(
            actions.calls(),
            vec![
                CleanupAction::DrainCollectionCreations,
                CleanupAction::DropRangeDeletionTasks
            ]
        );
    }

    #[tokio::test]
    async fn test_noop_actions_succeed() {
        let actions = NoopActions;
        assert_eq!(
            CleanupAction::UpgradeCoordinatorMetadata.invoke(&actions).await,
            ActionOutcome::Success
        );
    }

    #[test]
    fn test_metadata_actions_share_checkpoint() {
        assert_eq!(
            CleanupAction::UpgradeCoordinatorMetadata.checkpoint(),
            CleanupAction::DowngradeCoordinatorMetadata.checkpoint()
        );
    }
}
