//! Node configuration
//!
//! One JSON file per node. Unknown keys are rejected; optional keys fall back
//! to the defaults below. A config that fails validation never produces a
//! running node.
//!
//! ```json
//! {
//!   "data_dir": "/var/lib/featurelevel",
//!   "role": "coordinator",
//!   "old_version": "7.0",
//!   "new_version": "8.0",
//!   "participants": [{ "id": "shard-a", "address": "10.0.0.5:7400" }]
//! }
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flag::FeatureLevels;
use crate::participants::Participant;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

/// Role of the node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Owns shared routing metadata and fans transitions out to participants.
    Coordinator,
    /// Holds data; receives transitions from the coordinator.
    Participant,
    /// Unsharded replicated node.
    ReplicaSet,
    /// Single unreplicated node.
    #[default]
    Standalone,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coordinator => "coordinator",
            Self::Participant => "participant",
            Self::ReplicaSet => "replica_set",
            Self::Standalone => "standalone",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Directory holding `metadata/feature_level.json` (required)
    pub data_dir: PathBuf,

    /// Node role (default: standalone)
    #[serde(default)]
    pub role: NodeRole,

    /// Version string of the old level (required)
    pub old_version: String,

    /// Version string of the new level (required)
    pub new_version: String,

    /// Per-participant acknowledgment timeout (default: 30s)
    #[serde(default = "default_participant_timeout_ms")]
    pub participant_timeout_ms: u64,

    /// Whether range cleanup is submitted on upgrade (default: true)
    #[serde(default = "default_sharding_enabled")]
    pub sharding_enabled: bool,

    /// Participants to propagate to. Coordinator only.
    #[serde(default)]
    pub participants: Vec<Participant>,

    /// Address the participant server listens on (default: 127.0.0.1:7400)
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

fn default_participant_timeout_ms() -> u64 {
    30_000
}
fn default_sharding_enabled() -> bool {
    true
}
fn default_listen_address() -> String {
    "127.0.0.1:7400".to_string()
}

impl NodeConfig {
    /// Minimal config with defaults for everything optional.
    pub fn new(
        data_dir: impl Into<PathBuf>,
        role: NodeRole,
        old_version: impl Into<String>,
        new_version: impl Into<String>,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            role,
            old_version: old_version.into(),
            new_version: new_version.into(),
            participant_timeout_ms: default_participant_timeout_ms(),
            sharding_enabled: default_sharding_enabled(),
            participants: Vec::new(),
            listen_address: default_listen_address(),
        }
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate config JSON.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("data_dir must not be empty"));
        }

        self.levels()
            .validate()
            .map_err(|e| ConfigError::invalid(e.to_string()))?;

        if self.participant_timeout_ms == 0 {
            return Err(ConfigError::invalid("participant_timeout_ms must be > 0"));
        }

        if self.role != NodeRole::Coordinator && !self.participants.is_empty() {
            return Err(ConfigError::invalid(format!(
                "participants are only allowed for the coordinator role, not '{}'",
                self.role
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for participant in &self.participants {
            if participant.id.trim().is_empty() {
                return Err(ConfigError::invalid("participant id must not be empty"));
            }
            if !seen.insert(participant.id.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "duplicate participant id '{}'",
                    participant.id
                )));
            }
        }

        Ok(())
    }

    /// The configured level pair.
    pub fn levels(&self) -> FeatureLevels {
        FeatureLevels::new(self.old_version.clone(), self.new_version.clone())
    }

    pub fn participant_timeout(&self) -> Duration {
        Duration::from_millis(self.participant_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_applied() {
        let config = NodeConfig::from_json(
            r#"{"data_dir": "/tmp/x", "old_version": "7.0", "new_version": "8.0"}"#,
        )
        .unwrap();
        assert_eq!(config.role, NodeRole::Standalone);
        assert_eq!(config.participant_timeout(), Duration::from_secs(30));
        assert!(config.sharding_enabled);
        assert!(config.participants.is_empty());
    }

    #[test]
    fn test_coordinator_with_participants() {
        let config = NodeConfig::from_json(
            r#"{
                "data_dir": "/tmp/x",
                "role": "coordinator",
                "old_version": "7.0",
                "new_version": "8.0",
                "participant_timeout_ms": 500,
                "participants": [
                    {"id": "shard-a", "address": "127.0.0.1:7401"},
                    {"id": "shard-b", "address": "127.0.0.1:7402"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.role, NodeRole::Coordinator);
        assert_eq!(config.participants.len(), 2);
        assert_eq!(config.participant_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_participants_rejected_for_other_roles() {
        let err = NodeConfig::from_json(
            r#"{
                "data_dir": "/tmp/x",
                "role": "participant",
                "old_version": "7.0",
                "new_version": "8.0",
                "participants": [{"id": "shard-a", "address": "127.0.0.1:7401"}]
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_identical_versions_rejected() {
        let err = NodeConfig::from_json(
            r#"{"data_dir": "/tmp/x", "old_version": "8.0", "new_version": "8.0"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = NodeConfig::new("/tmp/x", NodeRole::ReplicaSet, "7.0", "8.0");
        config.participant_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_participant_rejected() {
        let mut config = NodeConfig::new("/tmp/x", NodeRole::Coordinator, "7.0", "8.0");
        config.participants = vec![
            Participant::new("shard-a", "127.0.0.1:1"),
            Participant::new("shard-a", "127.0.0.1:2"),
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = NodeConfig::from_json(
            r#"{"data_dir": "/tmp/x", "old_version": "7.0", "new_version": "8.0", "bogus": 1}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"data_dir": "/tmp/x", "role": "replica_set", "old_version": "7.0", "new_version": "8.0"}}"#
        )
        .unwrap();
        let config = NodeConfig::load(file.path()).unwrap();
        assert_eq!(config.role, NodeRole::ReplicaSet);
    }

    #[test]
    fn test_missing_file() {
        let err = NodeConfig::load(Path::new("/nonexistent/featurelevel.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
