//! Structured logging for the agent
//!
//! Events go through the `log` facade as `message | {json}` lines. On macOS
//! the backend is the Unified Logging System; elsewhere env_logger.

use anyhow::Result;
use log::{debug, error, info, warn, LevelFilter};
use serde_json::json;
use std::path::Path;

use crate::worker::WorkerExit;

/// Install the global log backend
pub fn init_backend(subsystem: &str, level: LevelFilter) -> Result<()> {
    // Validate subsystem format (should be reverse DNS)
    if !subsystem.contains('.') {
        anyhow::bail!("Subsystem must be in reverse DNS format (e.g., 'com.example.app')");
    }

    #[cfg(target_os = "macos")]
    {
        oslog::OsLogger::new(subsystem)
            .level_filter(level)
            .init()
            .map_err(|e| anyhow::anyhow!("Failed to set logger: {}", e))?;
    }

    #[cfg(not(target_os = "macos"))]
    {
        env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to set logger: {}", e))?;
    }

    Ok(())
}

/// Parse a textual level, falling back to `Info`
pub fn parse_level(raw: &str) -> LevelFilter {
    raw.parse().unwrap_or(LevelFilter::Info)
}

/// Event logger for agent and supervisor lifecycle events
#[derive(Debug, Clone)]
pub struct AgentLogger {
    category: String,
}

impl AgentLogger {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
        }
    }

    pub fn log_startup(&self, settings_path: &Path, pid: u32) {
        let data = json!({
            "event": "agent_startup",
            "pid": pid,
            "settings_path": settings_path.display().to_string(),
        });
        self.log_structured(LevelFilter::Info, "Agent started", data);
    }

    pub fn log_shutdown(&self, reason: &str) {
        let data = json!({
            "event": "agent_shutdown",
            "reason": reason,
        });
        self.log_structured(LevelFilter::Info, "Agent shutting down", data);
    }

    pub fn log_worker_launched(&self, pid: u32, executable: &Path, args: &[String]) {
        let data = json!({
            "event": "worker_launched",
            "pid": pid,
            "executable": executable.display().to_string(),
            "args": args,
        });
        self.log_structured(LevelFilter::Info, &format!("Worker started (pid {})", pid), data);
    }

    pub fn log_worker_stopped(&self, pid: Option<u32>, reason: &str) {
        let data = json!({
            "event": "worker_stopped",
            "pid": pid,
            "reason": reason,
        });
        self.log_structured(LevelFilter::Info, "Worker stopped", data);
    }

    pub fn log_worker_exited(&self, pid: u32, exit: &WorkerExit) {
        let data = json!({
            "event": "worker_exited",
            "pid": pid,
            "outcome": exit.to_string(),
        });
        self.log_structured(
            LevelFilter::Warn,
            &format!("Worker exited unexpectedly (pid {})", pid),
            data,
        );
    }

    pub fn log_stray_sweep(&self, name: &str) {
        let data = json!({
            "event": "stray_sweep",
            "process_name": name,
        });
        self.log_structured(LevelFilter::Debug, "Sweeping stray worker processes", data);
    }

    pub fn log_settings_applied(&self, restart: bool, login_item: Option<bool>) {
        let data = json!({
            "event": "settings_applied",
            "restart": restart,
            "login_item": login_item,
        });
        self.log_structured(LevelFilter::Info, "Settings applied", data);
    }

    pub fn log_error(&self, error_message: &str, context: Option<&str>) {
        let data = json!({
            "event": "error",
            "message": error_message,
            "context": context,
        });
        self.log_structured(LevelFilter::Error, error_message, data);
    }

    fn log_structured(&self, level: LevelFilter, message: &str, mut data: serde_json::Value) {
        if let Some(map) = data.as_object_mut() {
            map.insert("category".to_string(), json!(self.category));
            map.insert("timestamp".to_string(), json!(chrono::Utc::now().to_rfc3339()));
        }
        let full_message = format!("{} | {}", message, data);

        match level {
            LevelFilter::Error => error!("{}", full_message),
            LevelFilter::Warn => warn!("{}", full_message),
            LevelFilter::Debug | LevelFilter::Trace => debug!("{}", full_message),
            _ => info!("{}", full_message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level_falls_back_to_info() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level("WARN"), LevelFilter::Warn);
        assert_eq!(parse_level("chatty"), LevelFilter::Info);
    }

    #[test]
    fn test_init_backend_rejects_non_reverse_dns() {
        assert!(init_backend("nightshade", LevelFilter::Info).is_err());
    }

    #[test]
    fn test_event_methods_do_not_panic_without_backend() {
        let logger = AgentLogger::new("test");
        logger.log_startup(Path::new("/tmp/settings.toml"), 1);
        logger.log_worker_launched(2, Path::new("/usr/local/bin/redshift"), &["-x".to_string()]);
        logger.log_worker_exited(2, &WorkerExit::Exited { code: Some(1) });
        logger.log_error("boom", Some("test"));
    }
}
