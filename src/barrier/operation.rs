//! Operation Barrier
//!
//! Wide operations (anything whose behaviour depends on the compatibility
//! level and spans more than one step) hold the shared side of an async
//! read/write lock for their whole duration. The controller takes the
//! exclusive side once, right after marking the flag, and releases it
//! immediately.
//!
//! Raising the barrier therefore returns only after every wide operation
//! that started before the flag changed has finished. Every wide operation
//! that starts afterwards reads the flag after acquiring its guard and so
//! observes the transitioning value.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::flag::{FlagState, VersionFlag};
use crate::lock::{holding, ResourceId};
use crate::observability::Logger;

/// Barrier between in-flight wide operations and a flag change.
pub struct OperationBarrier {
    id: ResourceId,
    lock: RwLock<()>,
    flag: Arc<VersionFlag>,
    raised: AtomicU64,
}

impl OperationBarrier {
    /// Create a barrier over `flag`.
    pub fn new(flag: Arc<VersionFlag>) -> Self {
        Self {
            id: ResourceId::next(),
            lock: RwLock::new(()),
            flag,
            raised: AtomicU64::new(0),
        }
    }

    /// Identity of the shared guard, for locks that must not be taken while
    /// it is held.
    pub fn resource_id(&self) -> ResourceId {
        self.id
    }

    /// Run a wide operation under the shared guard.
    ///
    /// `operation` receives the flag value it must honour. The flag is read
    /// after the guard is held, so the value cannot change underneath the
    /// operation without the controller first waiting for it. The guard is
    /// released when `operation` finishes. While it runs, the task is marked
    /// as holding this barrier: a transition requested from inside it fails
    /// with `LockReentry` instead of waiting on itself.
    pub async fn wide_operation<F, Fut>(&self, operation: F) -> Fut::Output
    where
        F: FnOnce(FlagState) -> Fut,
        Fut: Future,
    {
        let _shared = self.lock.read().await;
        let observed = self.flag.read();
        holding(self.id, None, operation(observed)).await
    }

    /// Wait for every wide operation that started before now to finish.
    ///
    /// Dropping the returned future before it completes removes the pending
    /// exclusive request; later wide operations are not held back.
    pub async fn raise(&self) {
        let exclusive = self.lock.write().await;
        drop(exclusive);

        let count = self.raised.fetch_add(1, Ordering::AcqRel) + 1;
        let count = count.to_string();
        Logger::info(
            "fcv.barrier.raised",
            &[
                ("flag", self.flag.read().state_name()),
                ("times_raised", count.as_str()),
            ],
        );
    }

    /// How many times the barrier has completed.
    pub fn times_raised(&self) -> u64 {
        self.raised.load(Ordering::Acquire)
    }
}
