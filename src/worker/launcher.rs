//! Worker process launcher
//!
//! Every launched worker comes with a one-shot exit channel that resolves
//! exactly once, whatever ended the process.

use std::fmt;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::error::SupervisorError;

/// How a worker process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Process exited; `code` is `None` when it was killed by a signal
    Exited { code: Option<i32> },
    /// Waiting on the process failed; it is no longer tracked
    Lost(String),
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerExit::Exited { code: Some(code) } => write!(f, "exit code {}", code),
            WorkerExit::Exited { code: None } => write!(f, "terminated by signal"),
            WorkerExit::Lost(reason) => write!(f, "lost: {}", reason),
        }
    }
}

/// A running worker owned by the supervisor
pub struct WorkerHandle {
    pid: u32,
    exit: Option<oneshot::Receiver<WorkerExit>>,
    terminator: Box<dyn Fn() + Send + Sync>,
}

impl WorkerHandle {
    pub fn new(
        pid: u32,
        exit: oneshot::Receiver<WorkerExit>,
        terminator: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            pid,
            exit: Some(exit),
            terminator: Box::new(terminator),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit notification; can be taken once
    pub fn take_exit(&mut self) -> Option<oneshot::Receiver<WorkerExit>> {
        self.exit.take()
    }

    /// Request graceful shutdown; a no-op once the process has exited
    pub fn terminate(&self) {
        (self.terminator)()
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("pid", &self.pid)
            .field("exit_pending", &self.exit.is_some())
            .finish()
    }
}

/// Spawns worker processes
pub trait ProcessLauncher: Send + Sync {
    /// Start a long-running worker instance
    fn start(&self, executable: &Path, args: &[String]) -> Result<WorkerHandle, SupervisorError>;

    /// Start a one-shot invocation whose result is not awaited
    fn fire_and_forget(&self, executable: &Path, args: &[String]) -> Result<(), SupervisorError>;
}

/// Launcher backed by `tokio::process`; must be called inside a runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct OsLauncher;

impl OsLauncher {
    fn spawn(executable: &Path, args: &[String]) -> Result<tokio::process::Child, SupervisorError> {
        tokio::process::Command::new(executable)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => SupervisorError::BinaryNotFound(executable.to_path_buf()),
                _ => SupervisorError::LaunchFailed {
                    path: executable.to_path_buf(),
                    source,
                },
            })
    }
}

impl ProcessLauncher for OsLauncher {
    fn start(&self, executable: &Path, args: &[String]) -> Result<WorkerHandle, SupervisorError> {
        let mut child = Self::spawn(executable, args)?;
        let pid = child.id().ok_or_else(|| SupervisorError::LaunchFailed {
            path: executable.to_path_buf(),
            source: io::Error::new(io::ErrorKind::Other, "process exited before its pid was read"),
        })?;

        let (tx, rx) = oneshot::channel();
        let exited = Arc::new(AtomicBool::new(false));
        let exited_waiter = exited.clone();

        tokio::spawn(async move {
            let outcome = match child.wait().await {
                Ok(status) => WorkerExit::Exited {
                    code: status.code(),
                },
                Err(e) => WorkerExit::Lost(e.to_string()),
            };
            exited_waiter.store(true, Ordering::SeqCst);
            let _ = tx.send(outcome);
        });

        Ok(WorkerHandle::new(pid, rx, move || {
            if exited.load(Ordering::SeqCst) {
                return;
            }
            send_sigterm(pid);
        }))
    }

    fn fire_and_forget(&self, executable: &Path, args: &[String]) -> Result<(), SupervisorError> {
        let mut child = Self::spawn(executable, args)?;
        // Reap in the background so the one-shot never lingers as a zombie
        tokio::spawn(async move {
            if let Err(e) = child.wait().await {
                log::warn!("Failed to reap one-shot worker invocation: {}", e);
            }
        });
        Ok(())
    }
}

fn send_sigterm(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => log::warn!("Failed to send SIGTERM to pid {}: {}", pid, e),
    }
}
