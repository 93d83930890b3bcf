//! Error taxonomy for supervisor and geolocation operations

use std::path::PathBuf;
use thiserror::Error;

/// Failures of a reconciliation operation
///
/// These never escape the supervisor's operation boundary; they are
/// rendered into `status_message` and collapse the state to stopped.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Worker binary not found at {}", .0.display())]
    BinaryNotFound(PathBuf),

    #[error("Failed to launch {}: {source}", path.display())]
    LaunchFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Process probe failed: {0}")]
    ProbeFailed(String),

    #[error("Supervisor is shut down")]
    Closed,
}

/// Outcome classes of a geolocation request
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("Location access was denied")]
    PermissionDenied,

    #[error("Location unavailable: {0}")]
    Unavailable(String),

    #[error("Location lookup timed out after {0}s")]
    TimedOut(u64),

    #[error("A location lookup is already in progress")]
    Busy,
}
