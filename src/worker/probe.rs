//! External process probe
//!
//! Finds and sweeps worker processes by exact name, including instances
//! this agent does not own (left over from a crash or an earlier session).

use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::process::{Command, Stdio};
use std::sync::Arc;

use crate::error::SupervisorError;

/// Query and terminate processes by exact name
///
/// Both calls block; the supervisor runs them off the caller's context.
pub trait ProcessProbe: Send + Sync {
    /// Whether any process named exactly `name` is alive
    fn is_running(&self, name: &str) -> Result<bool, SupervisorError>;

    /// Send a terminate signal to every process named exactly `name`
    ///
    /// Returns once the signals have been sent; does not wait for exit.
    fn kill_all(&self, name: &str) -> Result<(), SupervisorError>;
}

/// Which probe implementation the agent uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeBackend {
    /// `pgrep -x` / `killall`
    #[default]
    Command,
    /// In-process table via sysinfo
    Sysinfo,
}

impl ProbeBackend {
    pub fn build(self) -> Arc<dyn ProcessProbe> {
        match self {
            ProbeBackend::Command => Arc::new(CommandProbe),
            ProbeBackend::Sysinfo => Arc::new(SysinfoProbe),
        }
    }
}

/// Probe backed by the system `pgrep` and `killall` tools
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandProbe;

impl ProcessProbe for CommandProbe {
    fn is_running(&self, name: &str) -> Result<bool, SupervisorError> {
        let status = Command::new("pgrep")
            .args(["-x", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| SupervisorError::ProbeFailed(format!("pgrep: {}", e)))?;

        // pgrep: 0 = matched, 1 = no match, anything else is a tool error
        match status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            other => Err(SupervisorError::ProbeFailed(format!(
                "pgrep exited with {:?}",
                other
            ))),
        }
    }

    fn kill_all(&self, name: &str) -> Result<(), SupervisorError> {
        let status = Command::new("killall")
            .arg(name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| SupervisorError::ProbeFailed(format!("killall: {}", e)))?;

        if !status.success() {
            // killall exits non-zero when nothing matched
            log::debug!("killall {} matched no processes ({})", name, status);
        }
        Ok(())
    }
}

/// Probe backed by the sysinfo process table
#[derive(Debug, Clone, Copy, Default)]
pub struct SysinfoProbe;

impl SysinfoProbe {
    fn snapshot() -> sysinfo::System {
        use sysinfo::{ProcessesToUpdate, System};

        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        system
    }
}

impl ProcessProbe for SysinfoProbe {
    fn is_running(&self, name: &str) -> Result<bool, SupervisorError> {
        let system = Self::snapshot();
        let found = system.processes_by_exact_name(OsStr::new(name)).next().is_some();
        Ok(found)
    }

    fn kill_all(&self, name: &str) -> Result<(), SupervisorError> {
        use sysinfo::Signal;

        let system = Self::snapshot();
        let current_pid = std::process::id();

        for process in system.processes_by_exact_name(OsStr::new(name)) {
            let pid = process.pid().as_u32();
            if pid == current_pid {
                continue;
            }
            match process.kill_with(Signal::Term) {
                Some(true) => log::debug!("Sent SIGTERM to {} (pid {})", name, pid),
                Some(false) => log::warn!("Failed to signal {} (pid {})", name, pid),
                None => log::warn!("SIGTERM unsupported on this platform"),
            }
        }
        Ok(())
    }
}
