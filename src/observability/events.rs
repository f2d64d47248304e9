//! Transition lifecycle events
//!
//! Every attempt emits a requested event and exactly one final event
//! (`committed`, `already_at_target`, `conflict` or `failed`). Events are
//! logged as they are emitted; the most recent ones are kept in memory for
//! inspection.
//!
//! Observability describes what happened; it never decides what happens.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use uuid::Uuid;

use super::logger::{Logger, Severity};
use crate::flag::FlagState;

/// Transition lifecycle events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionEvent {
    /// A request passed validation and is waiting for the lock.
    Requested {
        attempt_id: Uuid,
        target_version: String,
    },

    /// The flag already sits at the requested level.
    AlreadyAtTarget { attempt_id: Uuid, state: FlagState },

    /// The opposite transition is in progress.
    Conflict { attempt_id: Uuid, current: FlagState },

    /// The flag is marked and the barrier has been raised.
    BarrierRaised { attempt_id: Uuid, resumed: bool },

    /// Every participant acknowledged.
    ParticipantsNotified {
        attempt_id: Uuid,
        participants: usize,
    },

    /// The flag settled at the target level.
    Committed {
        attempt_id: Uuid,
        state: FlagState,
        timestamp: u64,
    },

    /// The attempt stopped early.
    Failed {
        attempt_id: Uuid,
        code: &'static str,
        reason: String,
    },
}

impl TransitionEvent {
    /// Get the event name for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Requested { .. } => "fcv.transition.requested",
            Self::AlreadyAtTarget { .. } => "fcv.transition.already_at_target",
            Self::Conflict { .. } => "fcv.transition.conflict",
            Self::BarrierRaised { .. } => "fcv.transition.barrier_raised",
            Self::ParticipantsNotified { .. } => "fcv.transition.participants_notified",
            Self::Committed { .. } => "fcv.transition.committed",
            Self::Failed { .. } => "fcv.transition.failed",
        }
    }

    /// The attempt the event belongs to.
    pub fn attempt_id(&self) -> Uuid {
        match self {
            Self::Requested { attempt_id, .. }
            | Self::AlreadyAtTarget { attempt_id, .. }
            | Self::Conflict { attempt_id, .. }
            | Self::BarrierRaised { attempt_id, .. }
            | Self::ParticipantsNotified { attempt_id, .. }
            | Self::Committed { attempt_id, .. }
            | Self::Failed { attempt_id, .. } => *attempt_id,
        }
    }

    fn severity(&self) -> Severity {
        match self {
            Self::Failed { .. } => Severity::Error,
            Self::Conflict { .. } => Severity::Warn,
            _ => Severity::Info,
        }
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("attempt_id", self.attempt_id().to_string())];
        match self {
            Self::Requested { target_version, .. } => {
                fields.push(("target_version", target_version.clone()));
            }
            Self::AlreadyAtTarget { state, .. } => {
                fields.push(("state", state.to_string()));
            }
            Self::Conflict { current, .. } => {
                fields.push(("current", current.to_string()));
            }
            Self::BarrierRaised { resumed, .. } => {
                fields.push(("resumed", resumed.to_string()));
            }
            Self::ParticipantsNotified { participants, .. } => {
                fields.push(("participants", participants.to_string()));
            }
            Self::Committed {
                state, timestamp, ..
            } => {
                fields.push(("state", state.to_string()));
                fields.push(("timestamp", timestamp.to_string()));
            }
            Self::Failed { code, reason, .. } => {
                fields.push(("code", code.to_string()));
                fields.push(("reason", reason.clone()));
            }
        }
        fields
    }
}

/// Events kept in memory by default.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Collector for transition events.
///
/// Keeps the most recent events up to its capacity; older ones are only in
/// the log. Emission failures never change transition behavior.
pub struct TransitionObserver {
    events: Mutex<VecDeque<TransitionEvent>>,
    capacity: usize,
}

impl Default for TransitionObserver {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl TransitionObserver {
    /// Create a new observer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an observer keeping at most `capacity` events (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_EVENT_CAPACITY))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Log and record an event.
    pub fn emit(&self, event: TransitionEvent) {
        let fields = event.fields();
        let field_refs: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        Logger::log(event.severity(), event.event_name(), &field_refs);

        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Retained events, oldest first.
    pub fn events(&self) -> Vec<TransitionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Events of a single attempt, in emission order.
    pub fn events_for(&self, attempt_id: Uuid) -> Vec<TransitionEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.attempt_id() == attempt_id)
            .collect()
    }

    /// Clear all events.
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
