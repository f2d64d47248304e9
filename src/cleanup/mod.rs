//! Role- and direction-specific side effects of a transition
//!
//! Actions are opaque to the transition: each is an idempotent
//! `NodeActions` call reporting `Success`, `Retryable` or `Fatal`.

mod actions;
mod orchestrator;

pub use actions::{
    ActionFuture, ActionOutcome, CleanupAction, NodeActions, NoopActions, RecordingActions,
};
pub use orchestrator::CleanupOrchestrator;
