//! Migration blocking
//!
//! Background chunk migrations copy data in whatever format their node
//! believes is current. A transition blocks new migrations and waits for
//! running ones to drain before it touches the flag, and keeps them blocked
//! until the attempt returns.

use std::sync::Arc;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::observability::Logger;

/// Held by one running migration.
pub struct MigrationPermit {
    _guard: OwnedRwLockReadGuard<()>,
}

/// Held by a transition while migrations are blocked.
pub struct MigrationBlockGuard {
    _guard: OwnedRwLockWriteGuard<()>,
}

impl Drop for MigrationBlockGuard {
    fn drop(&mut self) {
        Logger::info("fcv.migrations.unblocked", &[]);
    }
}

/// Gate between chunk migrations and transitions.
#[derive(Default)]
pub struct MigrationBlocker {
    lock: Arc<RwLock<()>>,
}

impl MigrationBlocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a migration unless a transition has blocked them.
    pub fn try_begin_migration(&self) -> Option<MigrationPermit> {
        Arc::clone(&self.lock)
            .try_read_owned()
            .ok()
            .map(|guard| MigrationPermit { _guard: guard })
    }

    /// Block new migrations and wait for running ones to finish.
    pub async fn block_and_drain(&self) -> MigrationBlockGuard {
        let guard = Arc::clone(&self.lock).write_owned().await;
        Logger::info("fcv.migrations.blocked", &[]);
        MigrationBlockGuard { _guard: guard }
    }

    /// Whether a transition currently blocks migrations.
    pub fn is_blocked(&self) -> bool {
        self.lock.try_read().is_err()
    }
}
