//! CLI module for featurelevel
//!
//! Provides command-line interface for:
//! - init: Create the data directory and the initial flag
//! - status: Print the current level
//! - set: Run a transition
//! - serve: Accept instructions from a coordinator

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{init, run, run_command, serve, set, status};
pub use errors::{CliError, CliErrorCode, CliResult};
