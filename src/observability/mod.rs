//! Observability for the transition protocol
//!
//! - Structured JSON logging (`Logger`)
//! - Begin/complete scopes around side-effecting steps (`ObservationScope`)
//! - Transition lifecycle events (`TransitionObserver`)
//!
//! Observability is read-only: nothing here influences a transition.

mod events;
mod logger;
mod scope;

pub use events::{TransitionEvent, TransitionObserver};
pub use logger::{Logger, Severity};
pub use scope::ObservationScope;
