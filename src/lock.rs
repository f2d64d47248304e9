//! Transition Lock
//!
//! One node-local exclusive lock guards the whole multi-step transition. Only
//! one attempt drives the state machine at a time; others wait in FIFO order.
//!
//! The lock is released when the guard drops, so every exit path (success,
//! validation failure, participant failure, fail point, cancellation)
//! releases it.
//!
//! Each task carries the coarse resources it holds (the transition lock with
//! the attempt that took it, or a wide-operation guard). The set follows the
//! task through `holding` scopes and is handed to spawned helpers with
//! `with_held`. `acquire` refuses with `LockReentry` before waiting when the
//! calling task already holds this lock or a resource registered as
//! competing with it, since waiting there could never end.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use uuid::Uuid;

use crate::errors::{TransitionError, TransitionResult};
use crate::observability::Logger;

/// Identity of a coarse-grained resource a task can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    /// A process-unique id.
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy)]
struct Held {
    resource: ResourceId,
    attempt_id: Option<Uuid>,
}

/// Resources held by the current task, outermost first.
#[derive(Debug, Clone, Default)]
pub(crate) struct HeldResources {
    entries: Vec<Held>,
}

impl HeldResources {
    fn holder_of(&self, resource: ResourceId) -> Option<Option<Uuid>> {
        self.entries
            .iter()
            .find(|held| held.resource == resource)
            .map(|held| held.attempt_id)
    }

    pub(crate) fn holds_any(&self, resources: &[ResourceId]) -> bool {
        self.entries
            .iter()
            .any(|held| resources.contains(&held.resource))
    }
}

tokio::task_local! {
    static HELD: HeldResources;
}

/// Resources held by the calling task.
pub(crate) fn held_resources() -> HeldResources {
    HELD.try_with(HeldResources::clone).unwrap_or_default()
}

/// Run `future` with `resource` recorded as held by the calling task.
pub(crate) async fn holding<F: Future>(
    resource: ResourceId,
    attempt_id: Option<Uuid>,
    future: F,
) -> F::Output {
    let mut held = held_resources();
    held.entries.push(Held {
        resource,
        attempt_id,
    });
    HELD.scope(held, future).await
}

/// Run `future` (usually inside a spawned task) on behalf of a task holding
/// `held`.
pub(crate) async fn with_held<F: Future>(held: HeldResources, future: F) -> F::Output {
    HELD.scope(held, future).await
}

/// Exclusive lock serializing transition attempts.
pub struct TransitionLock {
    id: ResourceId,
    competing: Vec<ResourceId>,
    inner: AsyncMutex<()>,
    holder: Mutex<Option<Uuid>>,
}

/// Proof that an attempt holds the transition lock.
pub struct TransitionLockGuard<'a> {
    _guard: AsyncMutexGuard<'a, ()>,
    holder: &'a Mutex<Option<Uuid>>,
    attempt_id: Uuid,
}

impl Default for TransitionLock {
    fn default() -> Self {
        Self {
            id: ResourceId::next(),
            competing: Vec::new(),
            inner: AsyncMutex::new(()),
            holder: Mutex::new(None),
        }
    }
}

impl TransitionLock {
    /// Create an unlocked lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse acquisition from a task that holds `resource`.
    ///
    /// Used for resources the transition waits on while holding this lock.
    pub fn competing_with(mut self, resource: ResourceId) -> Self {
        self.competing.push(resource);
        self
    }

    pub fn resource_id(&self) -> ResourceId {
        self.id
    }

    /// Wait for the lock on behalf of `attempt_id`.
    pub async fn acquire(&self, attempt_id: Uuid) -> TransitionResult<TransitionLockGuard<'_>> {
        let held = held_resources();
        if self.holder() == Some(attempt_id) {
            return Err(self.reentry(attempt_id, "the transition lock"));
        }
        if let Some(holder) = held.holder_of(self.id) {
            return Err(self.reentry(holder.unwrap_or(attempt_id), "the transition lock"));
        }
        if held.holds_any(&self.competing) {
            return Err(self.reentry(attempt_id, "a wide-operation guard"));
        }

        let guard = self.inner.lock().await;
        *self.holder.lock().unwrap_or_else(PoisonError::into_inner) = Some(attempt_id);

        Ok(TransitionLockGuard {
            _guard: guard,
            holder: &self.holder,
            attempt_id,
        })
    }

    fn reentry(&self, attempt_id: Uuid, held: &'static str) -> TransitionError {
        let attempt = attempt_id.to_string();
        Logger::error(
            "fcv.lock.reentry",
            &[("attempt_id", attempt.as_str()), ("held", held)],
        );
        TransitionError::LockReentry { attempt_id, held }
    }

    /// The attempt currently holding the lock.
    pub fn holder(&self) -> Option<Uuid> {
        *self.holder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether any attempt holds the lock.
    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

impl TransitionLockGuard<'_> {
    /// The attempt holding this guard.
    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }
}

impl Drop for TransitionLockGuard<'_> {
    fn drop(&mut self) {
        // Cleared before the inner guard releases the lock.
        *self.holder.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    async fn acquire_within(
        lock: &TransitionLock,
        attempt: Uuid,
    ) -> TransitionResult<TransitionLockGuard<'_>> {
        match tokio::time::timeout(Duration::from_secs(1), lock.acquire(attempt)).await {
            Ok(result) => result,
            Err(_) => panic!("acquire deadlocked"),
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let lock = TransitionLock::new();
        let attempt = Uuid::new_v4();

        let guard = lock.acquire(attempt).await.unwrap();
        assert!(lock.is_held());
        assert_eq!(lock.holder(), Some(attempt));
        assert_eq!(guard.attempt_id(), attempt);

        drop(guard);
        assert!(!lock.is_held());
        assert_eq!(lock.holder(), None);
    }

    #[tokio::test]
    async fn test_reentry_fails_fast() {
        let lock = TransitionLock::new();
        let attempt = Uuid::new_v4();
        let _guard = lock.acquire(attempt).await.unwrap();

        match acquire_within(&lock, attempt).await {
            Err(TransitionError::LockReentry { attempt_id, held }) => {
                assert_eq!(attempt_id, attempt);
                assert_eq!(held, "the transition lock");
            }
            Ok(_) => panic!("re-entrant acquire succeeded"),
            Err(other) => panic!("unexpected error: {other}"),
        };
    }

    #[tokio::test]
    async fn test_holding_task_fails_fast_with_a_new_attempt_id() {
        let lock = TransitionLock::new();
        let outer = Uuid::new_v4();
        let _guard = lock.acquire(outer).await.unwrap();

        let result = holding(lock.resource_id(), Some(outer), async {
            acquire_within(&lock, Uuid::new_v4()).await.map(|_| ())
        })
        .await;
        match result {
            Err(TransitionError::LockReentry { attempt_id, .. }) => assert_eq!(attempt_id, outer),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(lock.holder(), Some(outer));
    }

    #[tokio::test]
    async fn test_held_resources_follow_spawned_helpers() {
        let lock = Arc::new(TransitionLock::new());
        let outer = Uuid::new_v4();
        let _guard = lock.acquire(outer).await.unwrap();

        let helper = holding(lock.resource_id(), Some(outer), async {
            let held = held_resources();
            let lock = Arc::clone(&lock);
            tokio::spawn(with_held(held, async move {
                acquire_within(&lock, Uuid::new_v4()).await.map(|_| ())
            }))
        })
        .await;

        let result = helper.await.unwrap();
        assert_eq!(result.unwrap_err().code(), "FCV_LOCK_REENTRY");
    }

    #[tokio::test]
    async fn test_competing_resource_fails_fast() {
        let wide = ResourceId::next();
        let lock = TransitionLock::new().competing_with(wide);
        let attempt = Uuid::new_v4();

        let result = holding(wide, None, async {
            acquire_within(&lock, attempt).await.map(|_| ())
        })
        .await;
        match result {
            Err(TransitionError::LockReentry { attempt_id, held }) => {
                assert_eq!(attempt_id, attempt);
                assert_eq!(held, "a wide-operation guard");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!lock.is_held());

        // Outside the scope the same task acquires normally.
        let guard = acquire_within(&lock, attempt).await.unwrap();
        assert_eq!(guard.attempt_id(), attempt);
    }

    #[tokio::test]
    async fn test_unrelated_resource_does_not_block_acquire() {
        let lock = TransitionLock::new().competing_with(ResourceId::next());
        let other_lock = TransitionLock::new();

        let result = holding(other_lock.resource_id(), Some(Uuid::new_v4()), async {
            acquire_within(&lock, Uuid::new_v4()).await.map(|guard| guard.attempt_id())
        })
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_second_attempt_waits_for_release() {
        let lock = Arc::new(TransitionLock::new());
        let first_id = Uuid::new_v4();
        let second_id = Uuid::new_v4();
        let first = lock.acquire(first_id).await.unwrap();

        let (acquired_tx, acquired_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let contender = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move {
                let guard = lock.acquire(second_id).await.unwrap();
                acquired_tx.send(guard.attempt_id()).unwrap();
                release_rx.await.unwrap();
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());
        assert_eq!(lock.holder(), Some(first_id));

        drop(first);
        let acquired = acquired_rx.await.unwrap();
        assert_eq!(acquired, second_id);
        assert_ne!(acquired, first_id);
        assert_eq!(lock.holder(), Some(second_id));
        assert!(lock.is_held());

        release_tx.send(()).unwrap();
        contender.await.unwrap();
        assert_eq!(lock.holder(), None);
        assert!(!lock.is_held());
    }
}
