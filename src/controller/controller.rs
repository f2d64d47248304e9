//! Transition Controller
//!
//! The entry point for moving a node (and, on a coordinator, every
//! participant) between the two feature levels.
//!
//! Per request:
//! 1. validate the requested version (no lock, no state change on failure)
//! 2. take the transition lock, then block and drain migrations; a task
//!    already holding the lock or a wide-operation guard is refused here
//! 3. return `AlreadyAtTarget` if the flag is settled at the target
//! 4. reject with `ConflictingTransition` if the opposite direction is running
//! 5. mark the flag transitioning
//! 6. raise the operation barrier
//! 7. honour the direction's fail checkpoint
//! 8. run the role-specific steps in order
//! 9. commit the flag
//!
//! A failure after step 5 leaves the flag transitioning. Nothing is rolled
//! back; re-issuing the same request resumes from step 3 and every step is
//! idempotent.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

use super::attempt::{ControllerState, TransitionAttempt};
use crate::barrier::{MigrationBlocker, OperationBarrier};
use crate::cleanup::{CleanupOrchestrator, NodeActions};
use crate::config::NodeRole;
use crate::errors::{TransitionError, TransitionResult};
use crate::failpoint::{Checkpoint, FailPoints};
use crate::flag::{BeginOutcome, FeatureLevels, FlagState, TargetLevel, VersionFlag};
use crate::lock::{holding, TransitionLock};
use crate::observability::{Logger, TransitionEvent, TransitionObserver};
use crate::participants::{MembershipDirectory, ParticipantClient, ParticipantCoordinator};

/// Successful result of `request_transition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The flag moved to the target and settled there.
    Completed {
        state: FlagState,
        timestamp: u64,
        /// The flag was already transitioning to the target when the attempt began.
        resumed: bool,
    },
    /// The flag was already settled at the target; nothing was done.
    AlreadyAtTarget { state: FlagState },
}

impl TransitionOutcome {
    pub fn state(&self) -> FlagState {
        match self {
            Self::Completed { state, .. } | Self::AlreadyAtTarget { state } => *state,
        }
    }
}

/// Point-in-time view of the node's level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelStatus {
    pub role: NodeRole,
    pub state: FlagState,
    /// The version whose rules currently apply.
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,
    pub timestamp: u64,
}

struct Propagation {
    coordinator: ParticipantCoordinator,
    directory: Arc<dyn MembershipDirectory>,
}

/// Drives transitions for one node.
pub struct TransitionController {
    role: NodeRole,
    flag: Arc<VersionFlag>,
    lock: TransitionLock,
    barrier: Arc<OperationBarrier>,
    migrations: Arc<MigrationBlocker>,
    actions: Arc<dyn NodeActions>,
    sharding_enabled: bool,
    propagation: Option<Propagation>,
    fail_points: Arc<FailPoints>,
    observer: TransitionObserver,
    last_attempt: Mutex<Option<TransitionAttempt>>,
}

impl TransitionController {
    /// Controller with no participants, no fail points and sharding enabled.
    pub fn new(role: NodeRole, flag: Arc<VersionFlag>, actions: Arc<dyn NodeActions>) -> Self {
        let barrier = Arc::new(OperationBarrier::new(Arc::clone(&flag)));
        Self {
            role,
            lock: TransitionLock::new().competing_with(barrier.resource_id()),
            barrier,
            flag,
            migrations: Arc::new(MigrationBlocker::new()),
            actions,
            sharding_enabled: true,
            propagation: None,
            fail_points: Arc::new(FailPoints::new()),
            observer: TransitionObserver::new(),
            last_attempt: Mutex::new(None),
        }
    }

    /// Propagate transitions to the directory's participants. Only used by
    /// the coordinator role.
    pub fn with_participants(
        mut self,
        client: Arc<dyn ParticipantClient>,
        directory: Arc<dyn MembershipDirectory>,
        timeout: Duration,
    ) -> Self {
        let coordinator = ParticipantCoordinator::new(client, timeout, self.flag.levels().clone());
        self.propagation = Some(Propagation {
            coordinator,
            directory,
        });
        self
    }

    pub fn with_fail_points(mut self, fail_points: Arc<FailPoints>) -> Self {
        self.fail_points = fail_points;
        self
    }

    /// Keep at most `capacity` lifecycle events in memory.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.observer = TransitionObserver::with_capacity(capacity);
        self
    }

    pub fn with_sharding_enabled(mut self, sharding_enabled: bool) -> Self {
        self.sharding_enabled = sharding_enabled;
        self
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn levels(&self) -> &FeatureLevels {
        self.flag.levels()
    }

    /// Current flag value. Never blocks.
    pub fn current_level(&self) -> FlagState {
        self.flag.read()
    }

    pub fn status(&self) -> LevelStatus {
        let snapshot = self.flag.snapshot();
        let levels = self.flag.levels();
        LevelStatus {
            role: self.role,
            state: snapshot.state,
            version: levels.effective_version(snapshot.state).to_string(),
            target_version: levels.target_version(snapshot.state).map(str::to_string),
            timestamp: snapshot.timestamp,
        }
    }

    pub fn flag(&self) -> &Arc<VersionFlag> {
        &self.flag
    }

    /// Barrier wide operations enter.
    pub fn barrier(&self) -> &Arc<OperationBarrier> {
        &self.barrier
    }

    /// Gate chunk migrations pass through.
    pub fn migrations(&self) -> &Arc<MigrationBlocker> {
        &self.migrations
    }

    pub fn fail_points(&self) -> &Arc<FailPoints> {
        &self.fail_points
    }

    pub fn events(&self) -> &TransitionObserver {
        &self.observer
    }

    /// The most recent finished attempt.
    pub fn last_attempt(&self) -> Option<TransitionAttempt> {
        self.last_attempt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Move this node (and its participants, on a coordinator) to
    /// `requested_version`.
    pub async fn request_transition(
        &self,
        requested_version: &str,
    ) -> TransitionResult<TransitionOutcome> {
        let mut attempt = TransitionAttempt::new(self.role, requested_version);
        let result = self.run_attempt(&mut attempt).await;

        if let Err(err) = &result {
            attempt.fail();
            if !matches!(err, TransitionError::ConflictingTransition { .. }) {
                self.observer.emit(TransitionEvent::Failed {
                    attempt_id: attempt.id(),
                    code: err.code(),
                    reason: err.to_string(),
                });
            }
        }

        *self
            .last_attempt
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(attempt);
        result
    }

    async fn run_attempt(
        &self,
        attempt: &mut TransitionAttempt,
    ) -> TransitionResult<TransitionOutcome> {
        attempt.advance(ControllerState::ValidatingRequest)?;
        let target = self.flag.levels().parse(attempt.requested_version())?;
        attempt.set_target(target);
        self.observer.emit(TransitionEvent::Requested {
            attempt_id: attempt.id(),
            target_version: self.flag.levels().version_of(target).to_string(),
        });

        let _lock = self.lock.acquire(attempt.id()).await?;
        let attempt_id = attempt.id();
        holding(
            self.lock.resource_id(),
            Some(attempt_id),
            self.run_locked(attempt, target),
        )
        .await
    }

    async fn run_locked(
        &self,
        attempt: &mut TransitionAttempt,
        target: TargetLevel,
    ) -> TransitionResult<TransitionOutcome> {
        let _migrations = self.migrations.block_and_drain().await;

        let current = self.flag.read();
        if current == target.settled() {
            attempt.advance(ControllerState::Committed)?;
            self.observer.emit(TransitionEvent::AlreadyAtTarget {
                attempt_id: attempt.id(),
                state: current,
            });
            return Ok(TransitionOutcome::AlreadyAtTarget { state: current });
        }
        if current == target.opposite().transitioning() {
            self.observer.emit(TransitionEvent::Conflict {
                attempt_id: attempt.id(),
                current,
            });
            return Err(TransitionError::ConflictingTransition { current });
        }

        let begun = self.flag.begin_transition(target).await?;
        let resumed = begun == BeginOutcome::Resumed;

        self.barrier.raise().await;
        attempt.advance(ControllerState::BarrierRaised)?;
        self.observer.emit(TransitionEvent::BarrierRaised {
            attempt_id: attempt.id(),
            resumed,
        });

        let checkpoint = Checkpoint::fail_for(target);
        if self.fail_points.should_fail(checkpoint) {
            return Err(TransitionError::fatal(
                format!("fail point {checkpoint} stopped the {}", target.direction_name()),
                true,
            ));
        }

        let cleanup = CleanupOrchestrator::new(
            Arc::clone(&self.actions),
            Arc::clone(&self.fail_points),
            self.role,
            self.sharding_enabled,
        );

        attempt.advance(ControllerState::CleanupRunning)?;
        cleanup.run_local_cleanup(target).await?;

        if self.role == NodeRole::Coordinator {
            match target {
                TargetLevel::New => {
                    self.notify_participants(attempt, target).await?;
                    self.fail_points
                        .pause_while_set(Checkpoint::pause_before_metadata(target))
                        .await;
                    attempt.advance(ControllerState::CleanupRunning)?;
                    cleanup.run_coordinator_metadata(target).await?;
                }
                TargetLevel::Old => {
                    self.fail_points
                        .pause_while_set(Checkpoint::pause_before_metadata(target))
                        .await;
                    cleanup.run_coordinator_metadata(target).await?;
                    self.notify_participants(attempt, target).await?;
                }
            }
        }

        let timestamp = self.flag.commit_transition(target).await?;
        attempt.advance(ControllerState::Committed)?;
        let state = target.settled();
        self.observer.emit(TransitionEvent::Committed {
            attempt_id: attempt.id(),
            state,
            timestamp,
        });

        Ok(TransitionOutcome::Completed {
            state,
            timestamp,
            resumed,
        })
    }

    async fn notify_participants(
        &self,
        attempt: &mut TransitionAttempt,
        target: TargetLevel,
    ) -> TransitionResult<()> {
        let notified = match &self.propagation {
            Some(propagation) => {
                let participants = propagation.directory.participants();
                propagation
                    .coordinator
                    .propagate(target, &participants)
                    .await?
                    .statuses
                    .len()
            }
            None => {
                Logger::warn(
                    "fcv.participant.none_configured",
                    &[("direction", target.direction_name())],
                );
                0
            }
        };

        attempt.advance(ControllerState::ParticipantsNotified)?;
        self.observer.emit(TransitionEvent::ParticipantsNotified {
            attempt_id: attempt.id(),
            participants: notified,
        });
        Ok(())
    }
}
