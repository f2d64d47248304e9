//! Disk-level crash tests for the feature level flag
//!
//! These tests use real file I/O to verify:
//! - A fresh data directory bootstraps `FullyAtOld`
//! - A transition interrupted after the flag was marked is still marked
//!   after a restart, and a retry finishes it
//! - A tampered flag file is refused on load
//! - A leftover temp file from an interrupted write is ignored

use std::fs;
use std::sync::Arc;

use featurelevel::cleanup::NoopActions;
use featurelevel::failpoint::Checkpoint;
use featurelevel::flag::{FileFlagStore, FlagStore};
use featurelevel::{FeatureLevels, FlagState, NodeRole, TransitionController, VersionFlag};
use tempfile::TempDir;

fn levels() -> FeatureLevels {
    FeatureLevels::new("7.0", "8.0")
}

async fn open(data_dir: &std::path::Path) -> TransitionController {
    let store = Arc::new(FileFlagStore::new(data_dir));
    let flag = Arc::new(VersionFlag::open(store, levels()).await.unwrap());
    TransitionController::new(NodeRole::ReplicaSet, flag, Arc::new(NoopActions))
}

#[tokio::test]
async fn test_bootstrap_writes_flag_file() {
    let tmp = TempDir::new().unwrap();
    let controller = open(tmp.path()).await;

    assert_eq!(controller.current_level(), FlagState::FullyAtOld);
    let store = FileFlagStore::new(tmp.path());
    assert!(store.exists());
    let document = store.load().await.unwrap().unwrap();
    assert_eq!(document.state, FlagState::FullyAtOld);
    assert_eq!(document.version, "7.0");
    assert_eq!(document.timestamp, 0);
}

#[tokio::test]
async fn test_interrupted_upgrade_survives_restart() {
    let tmp = TempDir::new().unwrap();

    let controller = open(tmp.path()).await;
    controller
        .fail_points()
        .enable(Checkpoint::FailUpgrading);
    controller.request_transition("8.0").await.unwrap_err();
    assert_eq!(controller.current_level(), FlagState::TransitioningToNew);

    // Simulate crash: drop everything in memory.
    drop(controller);

    let restarted = open(tmp.path()).await;
    assert_eq!(restarted.current_level(), FlagState::TransitioningToNew);
    assert_eq!(restarted.status().target_version.as_deref(), Some("8.0"));

    // The opposite direction stays refused across the restart.
    let err = restarted.request_transition("7.0").await.unwrap_err();
    assert_eq!(err.code(), "FCV_CONFLICTING_TRANSITION");

    let outcome = restarted.request_transition("8.0").await.unwrap();
    assert_eq!(outcome.state(), FlagState::FullyAtNew);
    drop(restarted);

    let reopened = open(tmp.path()).await;
    assert_eq!(reopened.current_level(), FlagState::FullyAtNew);
    assert_eq!(reopened.flag().snapshot().timestamp, 2);
}

#[tokio::test]
async fn test_tampered_flag_file_is_refused() {
    let tmp = TempDir::new().unwrap();
    let controller = open(tmp.path()).await;
    controller.request_transition("8.0").await.unwrap();
    drop(controller);

    let store = FileFlagStore::new(tmp.path());
    let content = fs::read_to_string(store.flag_path()).unwrap();
    let tampered = content.replace("fullyAtNew", "fullyAtOld");
    assert_ne!(content, tampered);
    fs::write(store.flag_path(), tampered).unwrap();

    let result = VersionFlag::open(Arc::new(store), levels()).await;
    match result {
        Err(err) => assert_eq!(err.code(), "FCV_PERSISTENCE_FAILED"),
        Ok(_) => panic!("tampered flag file was accepted"),
    }
}

#[tokio::test]
async fn test_leftover_temp_file_is_ignored() {
    let tmp = TempDir::new().unwrap();
    let controller = open(tmp.path()).await;
    controller.request_transition("8.0").await.unwrap();
    drop(controller);

    let temp_path = tmp.path().join("metadata").join("feature_level.json.tmp");
    fs::write(&temp_path, b"{ half written").unwrap();

    let reopened = open(tmp.path()).await;
    assert_eq!(reopened.current_level(), FlagState::FullyAtNew);
}

#[tokio::test]
async fn test_flag_for_other_versions_is_refused() {
    let tmp = TempDir::new().unwrap();
    drop(open(tmp.path()).await);

    let store = Arc::new(FileFlagStore::new(tmp.path()));
    let result = VersionFlag::open(store, FeatureLevels::new("8.0", "9.0")).await;
    assert!(result.is_err());
}
