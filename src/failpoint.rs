//! Fail point injection for transition testing
//!
//! Named checkpoints placed at the points of a transition where an
//! interruption must leave the flag in a resumable state. Each controller
//! owns its own `FailPoints`; nothing is global.
//!
//! Two kinds of checkpoint exist:
//! - fail checkpoints make the step report `Fatal` without running it
//! - pause checkpoints hold the attempt (and its lock) until cleared
//!
//! # Usage
//!
//! ```ignore
//! let fail_points = Arc::new(FailPoints::new());
//! fail_points.enable(Checkpoint::FailUpgrading);
//! // request_transition("8.0") now stops with the flag TransitioningToNew
//! fail_points.disable(Checkpoint::FailUpgrading);
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;

use crate::flag::TargetLevel;
use crate::observability::Logger;

/// Named checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Checkpoint {
    /// Stop an upgrade right after the barrier.
    FailUpgrading,
    /// Stop a downgrade right after the barrier.
    FailDowngrading,
    /// Hold an upgrade before the coordinator metadata step.
    PauseBeforeUpgradingCoordinatorMetadata,
    /// Hold a downgrade before the coordinator metadata step.
    PauseBeforeDowngradingCoordinatorMetadata,
    FailSubmitRangeCleanup,
    FailDropRangeDeletions,
    FailDrainCollectionCreations,
    FailDeleteDefaultPolicy,
    FailCoordinatorMetadata,
}

impl Checkpoint {
    /// Stable name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FailUpgrading => "fail_upgrading",
            Self::FailDowngrading => "fail_downgrading",
            Self::PauseBeforeUpgradingCoordinatorMetadata => {
                "pause_before_upgrading_coordinator_metadata"
            }
            Self::PauseBeforeDowngradingCoordinatorMetadata => {
                "pause_before_downgrading_coordinator_metadata"
            }
            Self::FailSubmitRangeCleanup => "fail_submit_range_cleanup",
            Self::FailDropRangeDeletions => "fail_drop_range_deletions",
            Self::FailDrainCollectionCreations => "fail_drain_collection_creations",
            Self::FailDeleteDefaultPolicy => "fail_delete_default_policy",
            Self::FailCoordinatorMetadata => "fail_coordinator_metadata",
        }
    }

    /// The fail checkpoint checked right after the barrier.
    pub fn fail_for(target: TargetLevel) -> Self {
        match target {
            TargetLevel::New => Self::FailUpgrading,
            TargetLevel::Old => Self::FailDowngrading,
        }
    }

    /// The pause checkpoint before the coordinator metadata step.
    pub fn pause_before_metadata(target: TargetLevel) -> Self {
        match target {
            TargetLevel::New => Self::PauseBeforeUpgradingCoordinatorMetadata,
            TargetLevel::Old => Self::PauseBeforeDowngradingCoordinatorMetadata,
        }
    }

    /// Every checkpoint.
    pub fn all() -> [Checkpoint; 9] {
        [
            Self::FailUpgrading,
            Self::FailDowngrading,
            Self::PauseBeforeUpgradingCoordinatorMetadata,
            Self::PauseBeforeDowngradingCoordinatorMetadata,
            Self::FailSubmitRangeCleanup,
            Self::FailDropRangeDeletions,
            Self::FailDrainCollectionCreations,
            Self::FailDeleteDefaultPolicy,
            Self::FailCoordinatorMetadata,
        ]
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of enabled checkpoints plus hit counters.
#[derive(Default)]
pub struct FailPoints {
    enabled: Mutex<HashSet<Checkpoint>>,
    hits: Mutex<HashMap<Checkpoint, u64>>,
    changed: Notify,
}

impl FailPoints {
    /// No checkpoint enabled.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self, checkpoint: Checkpoint) {
        self.enabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(checkpoint);
        Logger::info("fcv.failpoint.enabled", &[("checkpoint", checkpoint.name())]);
    }

    /// Clear a checkpoint and wake anything paused on it.
    pub fn disable(&self, checkpoint: Checkpoint) {
        self.enabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&checkpoint);
        Logger::info("fcv.failpoint.disabled", &[("checkpoint", checkpoint.name())]);
        self.changed.notify_waiters();
    }

    pub fn is_enabled(&self, checkpoint: Checkpoint) -> bool {
        self.enabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&checkpoint)
    }

    /// Whether a fail checkpoint fires. Counts a hit when it does.
    pub fn should_fail(&self, checkpoint: Checkpoint) -> bool {
        if !self.is_enabled(checkpoint) {
            return false;
        }
        self.record_hit(checkpoint);
        Logger::warn("fcv.failpoint.triggered", &[("checkpoint", checkpoint.name())]);
        true
    }

    /// Wait here while a pause checkpoint is enabled.
    pub async fn pause_while_set(&self, checkpoint: Checkpoint) {
        let mut logged = false;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Registers interest before the check so a concurrent disable is not missed.
            notified.as_mut().enable();

            if !self.is_enabled(checkpoint) {
                return;
            }
            if !logged {
                self.record_hit(checkpoint);
                Logger::info("fcv.failpoint.paused", &[("checkpoint", checkpoint.name())]);
                logged = true;
            }
            notified.await;
        }
    }

    /// How often a checkpoint has fired or paused an attempt.
    pub fn hit_count(&self, checkpoint: Checkpoint) -> u64 {
        self.hits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&checkpoint)
            .copied()
            .unwrap_or(0)
    }

    fn record_hit(&self, checkpoint: Checkpoint) {
        *self
            .hits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(checkpoint)
            .or_insert(0) += 1;
    }
}
