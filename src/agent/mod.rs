//! Agent mode: a long-running supervisor controlled over IPC
//!
//! The agent loads settings, reconciles with whatever worker is already
//! running, arms the schedule ticker and serves control requests until it
//! receives a signal, an IPC shutdown, or hands over to a login-managed
//! instance.

pub mod ipc;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::Notify;

use crate::config::TomlSettingsStore;
use crate::constants::{AGENT_CATEGORY, APP_SUBSYSTEM};
use crate::launchd::LaunchAgent;
use crate::location::{CommandLocationResolver, Locator};
use crate::logging::AgentLogger;
use crate::supervisor::{Collaborators, Supervisor};
use crate::worker::OsLauncher;

use ipc::{IpcHandler, IpcServer};

/// Options for `nightshade run`
#[derive(Debug, Clone, Default)]
pub struct AgentOptions {
    /// Settings file; defaults to the per-user config location
    pub settings_path: Option<PathBuf>,
    /// Enable the worker right after startup reconciliation
    pub enable: bool,
    /// Stop the worker when the agent exits
    pub stop_on_exit: bool,
}

/// Why the agent stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Signal,
    IpcShutdown,
    HandOver,
}

impl ExitReason {
    fn describe(self) -> &'static str {
        match self {
            ExitReason::Signal => "Received shutdown signal",
            ExitReason::IpcShutdown => "Shutdown requested over IPC",
            ExitReason::HandOver => "Handing over to the login agent",
        }
    }
}

pub fn settings_store(path: Option<PathBuf>) -> Result<TomlSettingsStore> {
    match path {
        Some(path) => Ok(TomlSettingsStore::new(path)),
        None => TomlSettingsStore::at_default_location(),
    }
}

/// Run the agent until it is asked to stop
pub async fn run_agent(options: AgentOptions) -> Result<ExitReason> {
    let store = Arc::new(settings_store(options.settings_path)?);
    let document = store.load_document();
    document.agent.validate()?;

    let logger = AgentLogger::new(AGENT_CATEGORY);
    let server = bind_with_retry(&document.agent.resolved_socket_path()).await?;

    let resolver = CommandLocationResolver::new(
        document.agent.location_command.clone(),
        document.agent.location_args.clone(),
    );
    let collaborators = Collaborators {
        probe: document.agent.probe.build(),
        launcher: Arc::new(OsLauncher),
        store: store.clone(),
        login_items: Arc::new(LaunchAgent::new()?),
        locator: Some(Locator::new(Arc::new(resolver), document.agent.location_timeout())),
        logger: logger.clone(),
        executable: std::env::current_exe().context("Failed to get current executable path")?,
    };

    let mut supervisor = Supervisor::spawn(document.worker, collaborators);
    logger.log_startup(store.path(), std::process::id());
    log::debug!("Logging to subsystem {}", APP_SUBSYSTEM);

    // A worker left behind by an earlier session counts as running
    let _ = supervisor.handle().refresh_running_state().wait().await;
    if options.enable {
        let _ = supervisor.handle().set_enabled(true).wait().await;
    }
    supervisor.arm_schedule(document.agent.tick_interval());

    let shutdown = Arc::new(Notify::new());
    let handler = IpcHandler::new(supervisor.handle().clone(), store.clone(), shutdown.clone());
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.serve(handler).await {
            log::error!("IPC server error: {:#}", e);
        }
    });

    let mut state_rx = supervisor.handle().subscribe();
    let reason = tokio::select! {
        _ = shutdown_signal() => ExitReason::Signal,
        _ = shutdown.notified() => ExitReason::IpcShutdown,
        _ = state_rx.wait_for(|state| state.exit_requested) => ExitReason::HandOver,
    };
    logger.log_shutdown(reason.describe());

    server_task.abort();
    let _ = server_task.await;
    if let Err(e) = supervisor.shutdown(options.stop_on_exit).await {
        logger.log_error(&e.to_string(), Some("shutdown"));
    }
    Ok(reason)
}

/// The instance handing over to launchd may still hold the socket for a moment
async fn bind_with_retry(socket_path: &Path) -> Result<IpcServer> {
    const ATTEMPTS: u32 = 10;
    const BACKOFF: Duration = Duration::from_millis(300);

    let mut attempt = 1;
    loop {
        match IpcServer::bind(socket_path).await {
            Ok(server) => return Ok(server),
            Err(e) if attempt < ATTEMPTS => {
                log::debug!("Socket busy (attempt {}): {:#}", attempt, e);
                tokio::time::sleep(BACKOFF).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Resolves on SIGINT or SIGTERM (launchd stops agents with SIGTERM)
async fn shutdown_signal() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            log::warn!("Failed to install SIGTERM handler: {}", e);
            let _ = signal::ctrl_c().await;
        }
    }
}
