//! In-memory flag cache backed by a durable store
//!
//! The flag value and its logical timestamp are packed into one `AtomicU64`
//! (`timestamp << 2 | state`), so a reader always sees a consistent pair
//! without taking any lock. Writers persist first and publish second: a
//! reader never observes a value that is not durable.
//!
//! Mutations are only issued by the transition controller while it holds the
//! transition lock; the compare-and-swap on publish still guards against a
//! second writer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::levels::FeatureLevels;
use super::state::{FlagState, TargetLevel};
use super::store::{FlagDocument, FlagStore};
use crate::errors::{TransitionError, TransitionResult};
use crate::observability::Logger;

const STATE_BITS: u32 = 2;

fn pack(state: FlagState, timestamp: u64) -> u64 {
    (timestamp << STATE_BITS) | state.to_bits()
}

fn unpack(word: u64) -> (FlagState, u64) {
    (FlagState::from_bits(word), word >> STATE_BITS)
}

/// A consistent view of the flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagSnapshot {
    /// Flag value.
    pub state: FlagState,
    /// Logical timestamp of the last persisted mutation.
    pub timestamp: u64,
}

/// What `begin_transition` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    /// The flag moved from the settled state to transitioning.
    Started,
    /// The flag was already transitioning to the target (retry after failure).
    Resumed,
    /// The flag was already settled at the target; nothing was written.
    AlreadySettled,
}

/// The node's compatibility flag.
pub struct VersionFlag {
    word: AtomicU64,
    store: Arc<dyn FlagStore>,
    levels: FeatureLevels,
}

impl VersionFlag {
    /// Open the flag from `store`, bootstrapping `FullyAtOld` if the store is
    /// empty.
    pub async fn open(store: Arc<dyn FlagStore>, levels: FeatureLevels) -> TransitionResult<Self> {
        levels.validate()?;

        let snapshot = match store.load().await? {
            Some(document) => {
                document.validate(&levels)?;
                let timestamp = document.timestamp.to_string();
                Logger::info(
                    "fcv.flag.loaded",
                    &[
                        ("state", document.state.state_name()),
                        ("timestamp", timestamp.as_str()),
                    ],
                );
                FlagSnapshot {
                    state: document.state,
                    timestamp: document.timestamp,
                }
            }
            None => {
                let document = FlagDocument::describe(FlagState::FullyAtOld, 0, &levels);
                store.persist_and_await_majority(&document).await?;
                Logger::info(
                    "fcv.flag.bootstrapped",
                    &[("state", FlagState::FullyAtOld.state_name()), ("version", levels.old.as_str())],
                );
                FlagSnapshot {
                    state: FlagState::FullyAtOld,
                    timestamp: 0,
                }
            }
        };

        Ok(Self {
            word: AtomicU64::new(pack(snapshot.state, snapshot.timestamp)),
            store,
            levels,
        })
    }

    /// Current value. Never blocks.
    pub fn read(&self) -> FlagState {
        self.snapshot().state
    }

    /// Current value and timestamp, read together.
    pub fn snapshot(&self) -> FlagSnapshot {
        let (state, timestamp) = unpack(self.word.load(Ordering::Acquire));
        FlagSnapshot { state, timestamp }
    }

    /// The configured level pair.
    pub fn levels(&self) -> &FeatureLevels {
        &self.levels
    }

    /// Mark a transition towards `target`.
    ///
    /// Idempotent: a flag already transitioning to `target` is `Resumed`, and
    /// a flag already at `target` is `AlreadySettled`. Neither writes.
    pub async fn begin_transition(&self, target: TargetLevel) -> TransitionResult<BeginOutcome> {
        let current = self.snapshot();
        if current.state == target.transitioning() {
            return Ok(BeginOutcome::Resumed);
        }
        if current.state == target.settled() {
            return Ok(BeginOutcome::AlreadySettled);
        }

        let next = current.state.begin_transition(target)?;
        self.persist_and_publish(current, next).await?;
        Ok(BeginOutcome::Started)
    }

    /// Settle a transition at `target`. Returns the new timestamp.
    pub async fn commit_transition(&self, target: TargetLevel) -> TransitionResult<u64> {
        let current = self.snapshot();
        let next = current.state.commit_transition(target)?;
        self.persist_and_publish(current, next).await
    }

    async fn persist_and_publish(&self, current: FlagSnapshot, next: FlagState) -> TransitionResult<u64> {
        let timestamp = current.timestamp + 1;
        let document = FlagDocument::describe(next, timestamp, &self.levels);
        self.store.persist_and_await_majority(&document).await?;

        self.word
            .compare_exchange(
                pack(current.state, current.timestamp),
                pack(next, timestamp),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|observed| {
                let (observed, _) = unpack(observed);
                TransitionError::InvalidTransition {
                    from: observed,
                    to: next,
                }
            })?;

        let timestamp_field = timestamp.to_string();
        Logger::info(
            "fcv.flag.published",
            &[
                ("from", current.state.state_name()),
                ("timestamp", timestamp_field.as_str()),
                ("to", next.state_name()),
            ],
        );
        Ok(timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flag::store::MemoryFlagStore;

    fn levels() -> FeatureLevels {
        FeatureLevels::new("7.0", "8.0")
    }

    async fn open_flag() -> (Arc<MemoryFlagStore>, VersionFlag) {
        let store = Arc::new(MemoryFlagStore::new());
        let flag = VersionFlag::open(store.clone(), levels()).await.unwrap();
        (store, flag)
    }

    #[test]
    fn test_pack_roundtrip() {
        for state in FlagState::all() {
            assert_eq!(unpack(pack(state, 41)), (state, 41));
        }
    }

    #[tokio::test]
    async fn test_bootstrap_persists_fully_at_old() {
        let (store, flag) = open_flag().await;
        assert_eq!(flag.read(), FlagState::FullyAtOld);
        assert_eq!(flag.snapshot().timestamp, 0);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_open_existing_document() {
        let doc = FlagDocument::describe(FlagState::TransitioningToNew, 7, &levels());
        let store = Arc::new(MemoryFlagStore::with_document(doc));
        let flag = VersionFlag::open(store.clone(), levels()).await.unwrap();

        assert_eq!(flag.read(), FlagState::TransitioningToNew);
        assert_eq!(flag.snapshot().timestamp, 7);
        assert_eq!(store.write_count(), 1);
    }

    /// Store whose reads take a while to come back.
    struct SlowLoadStore {
        inner: MemoryFlagStore,
        delay: std::time::Duration,
    }

    impl FlagStore for SlowLoadStore {
        fn load(&self) -> crate::flag::store::LoadFuture<'_> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                self.inner.load().await
            })
        }

        fn persist_and_await_majority<'a>(
            &'a self,
            document: &'a FlagDocument,
        ) -> crate::flag::store::PersistFuture<'a> {
            self.inner.persist_and_await_majority(document)
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_open_yields_while_the_store_loads() {
        use std::sync::atomic::AtomicUsize;

        let doc = FlagDocument::describe(FlagState::FullyAtNew, 4, &levels());
        let store = Arc::new(SlowLoadStore {
            inner: MemoryFlagStore::with_document(doc),
            delay: std::time::Duration::from_millis(50),
        });
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                }
            })
        };

        let flag = VersionFlag::open(store, levels()).await.unwrap();
        ticker.abort();

        assert_eq!(flag.read(), FlagState::FullyAtNew);
        assert_eq!(flag.snapshot().timestamp, 4);
        // The single runtime thread kept running other tasks during the load.
        assert!(ticks.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_begin_and_commit() {
        let (store, flag) = open_flag().await;

        let outcome = flag.begin_transition(TargetLevel::New).await.unwrap();
        assert_eq!(outcome, BeginOutcome::Started);
        assert_eq!(flag.read(), FlagState::TransitioningToNew);

        let ts = flag.commit_transition(TargetLevel::New).await.unwrap();
        assert_eq!(ts, 2);
        assert_eq!(flag.read(), FlagState::FullyAtNew);

        let states: Vec<FlagState> = store.writes().iter().map(|d| d.state).collect();
        assert_eq!(
            states,
            vec![
                FlagState::FullyAtOld,
                FlagState::TransitioningToNew,
                FlagState::FullyAtNew
            ]
        );
    }

    #[tokio::test]
    async fn test_begin_is_idempotent() {
        let (store, flag) = open_flag().await;
        flag.begin_transition(TargetLevel::New).await.unwrap();
        let writes = store.write_count();

        let outcome = flag.begin_transition(TargetLevel::New).await.unwrap();
        assert_eq!(outcome, BeginOutcome::Resumed);
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn test_begin_when_already_settled_is_noop() {
        let (store, flag) = open_flag().await;
        let outcome = flag.begin_transition(TargetLevel::Old).await.unwrap();
        assert_eq!(outcome, BeginOutcome::AlreadySettled);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_begin_opposite_direction_rejected() {
        let (_store, flag) = open_flag().await;
        flag.begin_transition(TargetLevel::New).await.unwrap();

        let err = flag.begin_transition(TargetLevel::Old).await.unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
        assert_eq!(flag.read(), FlagState::TransitioningToNew);
    }

    #[tokio::test]
    async fn test_commit_requires_transitioning_state() {
        let (_store, flag) = open_flag().await;
        let err = flag.commit_transition(TargetLevel::New).await.unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
        assert_eq!(flag.read(), FlagState::FullyAtOld);
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_cache_unchanged() {
        let (store, flag) = open_flag().await;
        store.set_failing(true);

        let err = flag.begin_transition(TargetLevel::New).await.unwrap_err();
        assert_eq!(err.code(), "FCV_PERSISTENCE_FAILED");
        assert_eq!(flag.read(), FlagState::FullyAtOld);
        assert_eq!(flag.snapshot().timestamp, 0);
    }

    #[tokio::test]
    async fn test_timestamp_is_monotonic() {
        let (_store, flag) = open_flag().await;
        let mut last = flag.snapshot().timestamp;
        for target in [TargetLevel::New, TargetLevel::Old, TargetLevel::New] {
            flag.begin_transition(target).await.unwrap();
            assert!(flag.snapshot().timestamp > last);
            last = flag.snapshot().timestamp;
            flag.commit_transition(target).await.unwrap();
            assert!(flag.snapshot().timestamp > last);
            last = flag.snapshot().timestamp;
        }
        assert_eq!(flag.read(), FlagState::FullyAtNew);
    }
}
