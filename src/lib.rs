//! featurelevel - feature compatibility level transitions
//!
//! Moves a cluster between an old and a new feature level without letting
//! nodes disagree about which level is active. A transition, once marked,
//! is never rolled back: an interrupted transition is finished by re-issuing
//! the same request.
//!
//! Entry point: `controller::TransitionController::request_transition`.

pub mod barrier;
pub mod checksum;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod controller;
pub mod errors;
pub mod failpoint;
pub mod flag;
pub mod lock;
pub mod observability;
pub mod participants;

pub use config::{NodeConfig, NodeRole};
pub use controller::{TransitionController, TransitionOutcome};
pub use errors::{TransitionError, TransitionResult};
pub use flag::{FeatureLevels, FlagState, TargetLevel, VersionFlag};
