//! Durable Flag Storage
//!
//! The flag is written through `FlagStore::persist_and_await_majority`, which
//! must not return success until the write can no longer be rolled back. The
//! in-memory flag is only published after the store acknowledges.
//!
//! `FileFlagStore` is the single-node store: one document at
//! `metadata/feature_level.json`, written atomically:
//! 1. Write to temp file
//! 2. fsync temp file
//! 3. Rename temp to final (atomic on POSIX)
//! 4. fsync the directory
//!
//! The document is wrapped in an envelope carrying a CRC32 of its canonical
//! JSON encoding.

use std::fs::{self, File, OpenOptions};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::levels::FeatureLevels;
use super::state::FlagState;
use crate::checksum::{compute_checksum, verify_checksum};
use crate::errors::{TransitionError, TransitionResult};

const FLAG_FILE_NAME: &str = "feature_level.json";

/// Future returned by store writes.
pub type PersistFuture<'a> = Pin<Box<dyn Future<Output = TransitionResult<()>> + Send + 'a>>;

/// Future returned by store reads.
pub type LoadFuture<'a> =
    Pin<Box<dyn Future<Output = TransitionResult<Option<FlagDocument>>> + Send + 'a>>;

/// The persisted form of the flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagDocument {
    /// Authoritative flag value.
    pub state: FlagState,

    /// Version the node is guaranteed to honor.
    pub version: String,

    /// Version being moved to while a transition is in progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,

    /// Logical timestamp; bumped on every persisted mutation.
    pub timestamp: u64,

    /// Wall-clock time of the write (RFC3339), for operators only.
    pub updated_at: String,
}

impl FlagDocument {
    /// Describe a flag value as a document.
    pub fn describe(state: FlagState, timestamp: u64, levels: &FeatureLevels) -> Self {
        Self {
            state,
            version: levels.effective_version(state).to_string(),
            target_version: levels.target_version(state).map(str::to_string),
            timestamp,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Check that the version strings agree with `state` under `levels`.
    ///
    /// A document written for a different level pair is rejected rather than
    /// reinterpreted.
    pub fn validate(&self, levels: &FeatureLevels) -> TransitionResult<()> {
        let expected_version = levels.effective_version(self.state);
        let expected_target = levels.target_version(self.state);
        if self.version != expected_version || self.target_version.as_deref() != expected_target {
            return Err(TransitionError::persistence(format!(
                "persisted flag {} (version '{}', target {:?}) does not match configured levels {} -> {}",
                self.state, self.version, self.target_version, levels.old, levels.new
            )));
        }
        Ok(())
    }
}

/// Durable write primitive for the flag.
pub trait FlagStore: Send + Sync {
    /// Load the last persisted document, if any.
    fn load(&self) -> LoadFuture<'_>;

    /// Durably write `document` and wait until it is majority-committed.
    fn persist_and_await_majority<'a>(&'a self, document: &'a FlagDocument) -> PersistFuture<'a>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    checksum: u32,
    document: FlagDocument,
}

/// Single-node durable store: one fsynced, checksummed JSON file.
pub struct FileFlagStore {
    /// Path to flag file
    flag_path: PathBuf,

    /// Path to temp file during atomic write
    temp_path: PathBuf,
}

impl FileFlagStore {
    /// Create a store rooted at `data_dir`.
    pub fn new(data_dir: &Path) -> Self {
        let metadata_dir = data_dir.join("metadata");
        Self {
            flag_path: metadata_dir.join(FLAG_FILE_NAME),
            temp_path: metadata_dir.join(format!("{}.tmp", FLAG_FILE_NAME)),
        }
    }

    /// Path of the flag file (for diagnostics).
    pub fn flag_path(&self) -> &Path {
        &self.flag_path
    }

    /// Check if a flag document exists.
    pub fn exists(&self) -> bool {
        self.flag_path.exists()
    }

    fn read_verified(flag_path: &Path) -> TransitionResult<Option<FlagDocument>> {
        if !flag_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(flag_path).map_err(|e| {
            TransitionError::persistence(format!("failed to read flag file: {}", e))
        })?;

        let envelope: Envelope = serde_json::from_str(&content).map_err(|e| {
            TransitionError::persistence(format!("failed to parse flag file: {}", e))
        })?;

        let payload = serde_json::to_vec(&envelope.document).map_err(|e| {
            TransitionError::persistence(format!("failed to re-encode flag document: {}", e))
        })?;
        if !verify_checksum(&payload, envelope.checksum) {
            return Err(TransitionError::persistence(format!(
                "flag file {} failed checksum verification",
                flag_path.display()
            )));
        }

        Ok(Some(envelope.document))
    }

    fn write_atomic(flag_path: &Path, temp_path: &Path, document: &FlagDocument) -> TransitionResult<()> {
        if let Some(parent) = flag_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                TransitionError::persistence(format!("failed to create metadata directory: {}", e))
            })?;
        }

        let payload = serde_json::to_vec(document).map_err(|e| {
            TransitionError::persistence(format!("failed to serialize flag document: {}", e))
        })?;
        let envelope = Envelope {
            checksum: compute_checksum(&payload),
            document: document.clone(),
        };
        let content = serde_json::to_string_pretty(&envelope).map_err(|e| {
            TransitionError::persistence(format!("failed to serialize flag envelope: {}", e))
        })?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp_path)
            .map_err(|e| {
                TransitionError::persistence(format!("failed to create temp flag file: {}", e))
            })?;

        file.write_all(content.as_bytes()).map_err(|e| {
            TransitionError::persistence(format!("failed to write flag file: {}", e))
        })?;

        file.sync_all().map_err(|e| {
            TransitionError::persistence(format!("failed to fsync flag file: {}", e))
        })?;

        fs::rename(temp_path, flag_path).map_err(|e| {
            TransitionError::persistence(format!("failed to atomically commit flag file: {}", e))
        })?;

        if let Some(parent) = flag_path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(())
    }
}

impl FlagStore for FileFlagStore {
    fn load(&self) -> LoadFuture<'_> {
        let flag_path = self.flag_path.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || Self::read_verified(&flag_path))
                .await
                .map_err(|e| TransitionError::persistence(format!("flag read task failed: {}", e)))?
        })
    }

    fn persist_and_await_majority<'a>(&'a self, document: &'a FlagDocument) -> PersistFuture<'a> {
        let flag_path = self.flag_path.clone();
        let temp_path = self.temp_path.clone();
        let document = document.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                Self::write_atomic(&flag_path, &temp_path, &document)
            })
            .await
            .map_err(|e| TransitionError::persistence(format!("flag write task failed: {}", e)))?
        })
    }
}

/// In-memory store that records every write.
///
/// Used by tests and by embedders whose replication layer persists the
/// document elsewhere.
#[derive(Default)]
pub struct MemoryFlagStore {
    writes: Mutex<Vec<FlagDocument>>,
    failing: AtomicBool,
}

impl MemoryFlagStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds `document`.
    pub fn with_document(document: FlagDocument) -> Self {
        Self {
            writes: Mutex::new(vec![document]),
            failing: AtomicBool::new(false),
        }
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every document written so far, oldest first.
    pub fn writes(&self) -> Vec<FlagDocument> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of documents written.
    pub fn write_count(&self) -> usize {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl FlagStore for MemoryFlagStore {
    fn load(&self) -> LoadFuture<'_> {
        let last = self
            .writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned();
        Box::pin(async move { Ok(last) })
    }

    fn persist_and_await_majority<'a>(&'a self, document: &'a FlagDocument) -> PersistFuture<'a> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(TransitionError::persistence(
                    "majority write concern could not be satisfied",
                ));
            }
            self.writes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(document.clone());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn levels() -> FeatureLevels {
        FeatureLevels::new("7.0", "8.0")
    }

    #[test]
    fn test_describe_transitioning_document() {
        let doc = FlagDocument::describe(FlagState::TransitioningToNew, 3, &levels());
        assert_eq!(doc.version, "7.0");
        assert_eq!(doc.target_version.as_deref(), Some("8.0"));
        assert_eq!(doc.timestamp, 3);
        assert!(doc.validate(&levels()).is_ok());
    }

    #[test]
    fn test_validate_rejects_foreign_levels() {
        let doc = FlagDocument::describe(FlagState::FullyAtNew, 1, &levels());
        let other = FeatureLevels::new("8.0", "9.0");
        assert!(doc.validate(&other).is_err());
    }

    #[tokio::test]
    async fn test_file_store_write_and_load() {
        let tmp = TempDir::new().unwrap();
        let store = FileFlagStore::new(tmp.path());
        assert!(store.load().await.unwrap().is_none());

        let doc = FlagDocument::describe(FlagState::TransitioningToOld, 4, &levels());
        store.persist_and_await_majority(&doc).await.unwrap();

        assert!(store.exists());
        assert_eq!(store.load().await.unwrap(), Some(doc));
    }

    #[tokio::test]
    async fn test_file_store_overwrites() {
        let tmp = TempDir::new().unwrap();
        let store = FileFlagStore::new(tmp.path());

        let first = FlagDocument::describe(FlagState::FullyAtOld, 0, &levels());
        let second = FlagDocument::describe(FlagState::TransitioningToNew, 1, &levels());
        store.persist_and_await_majority(&first).await.unwrap();
        store.persist_and_await_majority(&second).await.unwrap();

        assert_eq!(store.load().await.unwrap().unwrap().state, FlagState::TransitioningToNew);
    }

    #[tokio::test]
    async fn test_file_store_detects_tampering() {
        let tmp = TempDir::new().unwrap();
        let store = FileFlagStore::new(tmp.path());
        let doc = FlagDocument::describe(FlagState::FullyAtOld, 0, &levels());
        store.persist_and_await_majority(&doc).await.unwrap();

        let content = fs::read_to_string(store.flag_path()).unwrap();
        let tampered = content.replace("fullyAtOld", "fullyAtNew");
        fs::write(store.flag_path(), tampered).unwrap();

        let err = store.load().await.unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[tokio::test]
    async fn test_memory_store_failure_injection() {
        let store = MemoryFlagStore::new();
        let doc = FlagDocument::describe(FlagState::FullyAtOld, 0, &levels());

        store.set_failing(true);
        assert!(store.persist_and_await_majority(&doc).await.is_err());
        assert_eq!(store.write_count(), 0);

        store.set_failing(false);
        store.persist_and_await_majority(&doc).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(doc));
    }
}
