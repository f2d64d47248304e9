//! Feature Compatibility Flag
//!
//! The single piece of cluster state the transition protocol manages:
//! - Four values, one legal cycle (`state`)
//! - The configured version pair (`levels`)
//! - A durable store the flag is written through (`store`)
//! - A lock-free, linearizable in-memory cache (`version_flag`)

mod levels;
mod state;
mod store;
mod version_flag;

pub use levels::FeatureLevels;
pub use state::{FlagState, TargetLevel};
pub use store::{
    FileFlagStore, FlagDocument, FlagStore, LoadFuture, MemoryFlagStore, PersistFuture,
};
pub use version_flag::{BeginOutcome, FlagSnapshot, VersionFlag};
