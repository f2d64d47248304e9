//! CLI command implementations
//!
//! Commands are thin: they load the config, open the flag from the data
//! directory, build a controller for the configured role and hand over.
//! Every async step runs on a runtime created here.

use std::fs;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use crate::cleanup::NoopActions;
use crate::config::{NodeConfig, NodeRole};
use crate::controller::{TransitionController, TransitionOutcome};
use crate::flag::{FileFlagStore, VersionFlag};
use crate::observability::Logger;
use crate::participants::{ParticipantServer, StaticDirectory, TcpParticipantClient};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::write_response;

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init { config } => init(&config),
        Command::Status { config } => status(&config),
        Command::Set { version, config } => set(&config, &version),
        Command::Serve { config } => serve(&config),
    }
}

/// Create the data directory and persist `FullyAtOld`.
pub fn init(config_path: &Path) -> CliResult<()> {
    let config = NodeConfig::load(config_path)?;
    let store = FileFlagStore::new(&config.data_dir);
    if store.exists() {
        return Err(CliError::already_initialized());
    }

    fs::create_dir_all(&config.data_dir).map_err(|e| {
        CliError::config_error(format!(
            "Failed to create directory {:?}: {}",
            config.data_dir, e
        ))
    })?;

    let flag = block_on(VersionFlag::open(Arc::new(store), config.levels()))??;
    write_response(json!({
        "initialized": true,
        "state": flag.read(),
        "version": config.old_version,
    }))
}

/// Print the node's level.
pub fn status(config_path: &Path) -> CliResult<()> {
    let config = NodeConfig::load(config_path)?;
    let controller = block_on(open_controller(&config))??;
    write_response(serde_json::to_value(controller.status())?)
}

/// Transition to `version`.
pub fn set(config_path: &Path, version: &str) -> CliResult<()> {
    let config = NodeConfig::load(config_path)?;
    block_on(async {
        let controller = open_controller(&config).await?;
        let outcome = controller.request_transition(version).await?;
        let data = match outcome {
            TransitionOutcome::Completed {
                state,
                timestamp,
                resumed,
            } => json!({
                "outcome": "completed",
                "state": state,
                "timestamp": timestamp,
                "resumed": resumed,
            }),
            TransitionOutcome::AlreadyAtTarget { state } => json!({
                "outcome": "already_at_target",
                "state": state,
            }),
        };
        write_response(data)
    })?
}

/// Serve participant instructions until the process is stopped.
pub fn serve(config_path: &Path) -> CliResult<()> {
    let config = NodeConfig::load(config_path)?;
    block_on(async {
        let controller = open_controller(&config).await?;
        let server = ParticipantServer::bind(&config.listen_address, controller).await?;
        let role = config.role.to_string();
        Logger::info(
            "fcv.server.started",
            &[
                ("listen_address", config.listen_address.as_str()),
                ("role", role.as_str()),
            ],
        );
        server.serve().await?;
        Ok::<(), CliError>(())
    })?
}

/// Controller for the configured role over the on-disk flag.
async fn open_controller(config: &NodeConfig) -> CliResult<Arc<TransitionController>> {
    let store = FileFlagStore::new(&config.data_dir);
    if !store.exists() {
        return Err(CliError::not_initialized());
    }

    let flag = Arc::new(VersionFlag::open(Arc::new(store), config.levels()).await?);
    let mut controller = TransitionController::new(config.role, flag, Arc::new(NoopActions))
        .with_sharding_enabled(config.sharding_enabled);

    if config.role == NodeRole::Coordinator {
        controller = controller.with_participants(
            Arc::new(TcpParticipantClient::new()),
            Arc::new(StaticDirectory::new(config.participants.clone())),
            config.participant_timeout(),
        );
    }

    Ok(Arc::new(controller))
}

fn block_on<F: Future>(future: F) -> CliResult<F::Output> {
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::io_error(format!("Failed to create tokio runtime: {}", e)))?;
    Ok(rt.block_on(future))
}
