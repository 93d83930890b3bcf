//! Geolocation lookup
//!
//! Resolution runs outside the supervisor queue and completes exactly once:
//! with coordinates, with a classified failure, or with a timeout.

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use crate::error::LocationError;
use crate::models::Coordinates;

/// Blocking source of the current position
pub trait LocationResolver: Send + Sync {
    fn resolve(&self) -> Result<Coordinates, LocationError>;
}

/// Resolver that runs an external helper printing `<lat> <lon>`
#[derive(Debug, Clone)]
pub struct CommandLocationResolver {
    command: String,
    args: Vec<String>,
}

impl CommandLocationResolver {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

impl LocationResolver for CommandLocationResolver {
    fn resolve(&self) -> Result<Coordinates, LocationError> {
        let output = Command::new(&self.command)
            .args(&self.args)
            .output()
            .map_err(|e| LocationError::Unavailable(format!("{}: {}", self.command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr));
        }

        parse_coordinates_output(&String::from_utf8_lossy(&output.stdout))
    }
}

fn classify_failure(stderr: &str) -> LocationError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("denied") || lowered.contains("not authorized") {
        LocationError::PermissionDenied
    } else {
        LocationError::Unavailable(stderr.trim().to_string())
    }
}

/// Parse the first two decimals of the helper's output
pub fn parse_coordinates_output(stdout: &str) -> Result<Coordinates, LocationError> {
    let mut parts = stdout
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|part| !part.is_empty());

    match (parts.next(), parts.next()) {
        (Some(lat), Some(lon)) => Coordinates::parse(lat, lon)
            .map_err(|e| LocationError::Unavailable(e.to_string())),
        _ => Err(LocationError::Unavailable(format!(
            "Unexpected location output: '{}'",
            stdout.trim()
        ))),
    }
}

/// Runs a resolver with a fixed timeout
#[derive(Clone)]
pub struct Locator {
    resolver: Arc<dyn LocationResolver>,
    timeout: Duration,
}

impl Locator {
    pub fn new(resolver: Arc<dyn LocationResolver>, timeout: Duration) -> Self {
        Self { resolver, timeout }
    }

    /// Resolve once; a timed-out lookup is abandoned, not cancelled
    pub async fn locate(&self) -> Result<Coordinates, LocationError> {
        let resolver = self.resolver.clone();
        let lookup = tokio::task::spawn_blocking(move || resolver.resolve());

        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(LocationError::Unavailable(join_error.to_string())),
            Err(_) => Err(LocationError::TimedOut(self.timeout.as_secs())),
        }
    }
}
