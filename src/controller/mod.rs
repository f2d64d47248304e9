//! Transition controller
//!
//! The top-level state machine callers invoke to change the node's feature
//! compatibility level.

mod attempt;
#[allow(clippy::module_inception)]
mod controller;

pub use attempt::{ControllerState, TransitionAttempt};
pub use controller::{LevelStatus, TransitionController, TransitionOutcome};
