//! Barriers a transition raises against concurrent work
//!
//! - `OperationBarrier`: waits out wide operations started under the old flag
//! - `MigrationBlocker`: blocks and drains chunk migrations

mod migration;
mod operation;

pub use migration::{MigrationBlockGuard, MigrationBlocker, MigrationPermit};
pub use operation::OperationBarrier;
