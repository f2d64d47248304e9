//! Cleanup Orchestrator
//!
//! Decides which node actions a transition runs for this node's role and
//! direction, then runs them in order. The first failing action stops the
//! plan; the flag stays transitioning and a retry re-runs the whole plan.
//!
//! | direction | participant                                  | other roles                |
//! |-----------|----------------------------------------------|----------------------------|
//! | upgrade   | submit range cleanup (sharded), drain creates | nothing                    |
//! | downgrade | drop range deletion tasks, drain creates      | delete default policy doc  |
//!
//! The coordinator's shared metadata step runs separately, at the point the
//! controller's ordering dictates.

use std::sync::Arc;

use super::actions::{ActionOutcome, CleanupAction, NodeActions};
use crate::config::NodeRole;
use crate::errors::{TransitionError, TransitionResult};
use crate::failpoint::FailPoints;
use crate::flag::TargetLevel;
use crate::observability::ObservationScope;

/// Runs role- and direction-specific actions.
pub struct CleanupOrchestrator {
    actions: Arc<dyn NodeActions>,
    fail_points: Arc<FailPoints>,
    role: NodeRole,
    sharding_enabled: bool,
}

impl CleanupOrchestrator {
    pub fn new(
        actions: Arc<dyn NodeActions>,
        fail_points: Arc<FailPoints>,
        role: NodeRole,
        sharding_enabled: bool,
    ) -> Self {
        Self {
            actions,
            fail_points,
            role,
            sharding_enabled,
        }
    }

    /// Local actions for a transition towards `target`, in run order.
    pub fn plan_local(&self, target: TargetLevel) -> Vec<CleanupAction> {
        match (target, self.role) {
            (TargetLevel::New, NodeRole::Participant) => {
                let mut plan = Vec::with_capacity(2);
                if self.sharding_enabled {
                    plan.push(CleanupAction::SubmitRangeCleanup);
                }
                plan.push(CleanupAction::DrainCollectionCreations);
                plan
            }
            (TargetLevel::Old, NodeRole::Participant) => vec![
                CleanupAction::DropRangeDeletionTasks,
                CleanupAction::DrainCollectionCreations,
            ],
            (TargetLevel::Old, _) => vec![CleanupAction::DeleteDefaultPolicyDocument],
            (TargetLevel::New, _) => Vec::new(),
        }
    }

    /// Run the local plan for `target`.
    pub async fn run_local_cleanup(&self, target: TargetLevel) -> TransitionResult<()> {
        for action in self.plan_local(target) {
            self.run(action).await?;
        }
        Ok(())
    }

    /// Run the coordinator's shared metadata step for `target`.
    pub async fn run_coordinator_metadata(&self, target: TargetLevel) -> TransitionResult<()> {
        let action = match target {
            TargetLevel::New => CleanupAction::UpgradeCoordinatorMetadata,
            TargetLevel::Old => CleanupAction::DowngradeCoordinatorMetadata,
        };
        self.run(action).await
    }

    async fn run(&self, action: CleanupAction) -> TransitionResult<()> {
        let scope = ObservationScope::new(format!("fcv.cleanup.{}", action.name()));

        if self.fail_points.should_fail(action.checkpoint()) {
            let reason = format!("fail point {} forced {} to fail", action.checkpoint(), action);
            scope.fail(&reason);
            return Err(TransitionError::fatal(reason, false));
        }

        match action.invoke(self.actions.as_ref()).await {
            ActionOutcome::Success => {
                scope.complete();
                Ok(())
            }
            ActionOutcome::Retryable(detail) => {
                let reason = format!("{action} failed: {detail}");
                scope.fail(&reason);
                Err(TransitionError::fatal(reason, true))
            }
            ActionOutcome::Fatal(detail) => {
                let reason = format!("{action} failed: {detail}");
                scope.fail(&reason);
                Err(TransitionError::fatal(reason, false))
            }
        }
    }
}
