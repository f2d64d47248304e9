//! CLI argument definitions using clap
//!
//! Commands:
//! - featurelevel init --config <path>
//! - featurelevel status --config <path>
//! - featurelevel set <version> --config <path>
//! - featurelevel serve --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// featurelevel - move a cluster between feature compatibility levels
#[derive(Parser, Debug)]
#[command(name = "featurelevel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the data directory and persist the initial flag
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./featurelevel.json")]
        config: PathBuf,
    },

    /// Print the node's current level
    Status {
        /// Path to configuration file
        #[arg(long, default_value = "./featurelevel.json")]
        config: PathBuf,
    },

    /// Transition the node (and its participants, on a coordinator) to a version
    Set {
        /// Target version string
        version: String,

        /// Path to configuration file
        #[arg(long, default_value = "./featurelevel.json")]
        config: PathBuf,
    },

    /// Accept transition instructions from a coordinator
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./featurelevel.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set() {
        let cli = Cli::try_parse_from(["featurelevel", "set", "8.0", "--config", "/etc/fl.json"])
            .unwrap();
        match cli.command {
            Command::Set { version, config } => {
                assert_eq!(version, "8.0");
                assert_eq!(config, PathBuf::from("/etc/fl.json"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_default_config_path() {
        let cli = Cli::try_parse_from(["featurelevel", "status"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Status { config } if config == PathBuf::from("./featurelevel.json")
        ));
    }

    #[test]
    fn test_set_requires_version() {
        assert!(Cli::try_parse_from(["featurelevel", "set"]).is_err());
    }
}
