//! Settings persistence
//!
//! One TOML document holds the worker snapshot (`[worker]`) and agent
//! runtime options (`[agent]`). Loads never fail; saves are atomic.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    DEFAULT_LOCATION_ARGS, DEFAULT_LOCATION_COMMAND, DEFAULT_LOCATION_TIMEOUT_SECS,
    DEFAULT_TICK_INTERVAL_SECS, IPC_SOCKET_NAME, MAX_LOCATION_TIMEOUT_SECS,
    MAX_TICK_INTERVAL_SECS, MIN_TICK_INTERVAL_SECS, SETTINGS_DIR_NAME, SETTINGS_FILE_NAME,
};
use crate::models::ConfigurationSnapshot;
use crate::worker::ProbeBackend;

/// Whole-object persistence of the configuration snapshot
pub trait SettingsStore: Send + Sync {
    /// Stored snapshot, or defaults when absent or unreadable
    fn load(&self) -> ConfigurationSnapshot;

    fn save(&self, snapshot: &ConfigurationSnapshot) -> Result<()>;
}

/// Agent runtime options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// IPC socket location; defaults to the runtime dir
    pub socket_path: Option<PathBuf>,
    pub probe: ProbeBackend,
    /// Schedule evaluation period in seconds (1-3600)
    pub tick_interval_secs: u64,
    pub location_command: String,
    pub location_args: Vec<String>,
    /// Geolocation timeout in seconds (1-120)
    pub location_timeout_secs: u64,
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            probe: ProbeBackend::default(),
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            location_command: DEFAULT_LOCATION_COMMAND.to_string(),
            location_args: DEFAULT_LOCATION_ARGS.iter().map(|s| s.to_string()).collect(),
            location_timeout_secs: DEFAULT_LOCATION_TIMEOUT_SECS,
            log_level: "info".to_string(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if !(MIN_TICK_INTERVAL_SECS..=MAX_TICK_INTERVAL_SECS).contains(&self.tick_interval_secs) {
            anyhow::bail!(
                "Invalid tick interval: {}. Must be between {} and {} seconds",
                self.tick_interval_secs,
                MIN_TICK_INTERVAL_SECS,
                MAX_TICK_INTERVAL_SECS
            );
        }
        if !(1..=MAX_LOCATION_TIMEOUT_SECS).contains(&self.location_timeout_secs) {
            anyhow::bail!(
                "Invalid location timeout: {}. Must be between 1 and {} seconds",
                self.location_timeout_secs,
                MAX_LOCATION_TIMEOUT_SECS
            );
        }
        if self.location_command.trim().is_empty() {
            anyhow::bail!("location_command must not be empty");
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn location_timeout(&self) -> Duration {
        Duration::from_secs(self.location_timeout_secs)
    }

    pub fn resolved_socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(default_socket_path)
    }
}

/// On-disk document layout
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsDocument {
    #[serde(default)]
    pub worker: ConfigurationSnapshot,
    #[serde(default)]
    pub agent: AgentConfig,
}

/// TOML file backed settings store
#[derive(Debug, Clone)]
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default per-user location
    pub fn at_default_location() -> Result<Self> {
        Ok(Self::new(default_settings_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Strictly read the document; errors on missing or malformed files
    pub fn read_document(&self) -> Result<SettingsDocument> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings file: {}", self.path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {}", self.path.display()))
    }

    /// Lenient read used by the agent: problems yield defaults
    pub fn load_document(&self) -> SettingsDocument {
        if !self.path.exists() {
            log::info!("No settings at {}, using defaults", self.path.display());
            return SettingsDocument::default();
        }
        match self.read_document() {
            Ok(document) => document,
            Err(e) => {
                log::warn!("{:#}; using defaults", e);
                SettingsDocument::default()
            }
        }
    }

    pub fn write_document(&self, document: &SettingsDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings directory: {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(document).context("Failed to serialize settings")?;

        let tmp_path = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write settings file: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace settings file: {}", self.path.display()))?;
        Ok(())
    }
}

impl SettingsStore for TomlSettingsStore {
    fn load(&self) -> ConfigurationSnapshot {
        self.load_document().worker
    }

    fn save(&self, snapshot: &ConfigurationSnapshot) -> Result<()> {
        // Keep the [agent] table as the user wrote it
        let mut document = self.load_document();
        document.worker = snapshot.clone();
        self.write_document(&document)
    }
}

pub fn default_settings_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("Could not determine the user configuration directory")?;
    Ok(base.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
}

pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(IPC_SOCKET_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let store = TomlSettingsStore::new(dir.path().join("absent.toml"));
        assert_eq!(store.load(), ConfigurationSnapshot::default());
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[worker\nlatitude = ").unwrap();
        let store = TomlSettingsStore::new(&path);
        assert_eq!(store.load(), ConfigurationSnapshot::default());
        assert!(store.read_document().is_err());
    }

    #[test]
    fn test_save_then_load_preserves_agent_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "[agent]\ntick_interval_secs = 30\nprobe = \"sysinfo\"\n").unwrap();

        let store = TomlSettingsStore::new(&path);
        let snapshot = ConfigurationSnapshot {
            latitude: "48.85".to_string(),
            longitude: "2.35".to_string(),
            use_schedule: true,
            ..Default::default()
        };
        store.save(&snapshot).unwrap();

        let document = store.read_document().unwrap();
        assert_eq!(document.worker, snapshot);
        assert_eq!(document.agent.tick_interval_secs, 30);
        assert_eq!(document.agent.probe, ProbeBackend::Sysinfo);
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("settings.toml");
        let store = TomlSettingsStore::new(&path);
        store.save(&ConfigurationSnapshot::default()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_agent_config_validation_bounds() {
        let mut config = AgentConfig::default();
        assert!(config.validate().is_ok());

        config.tick_interval_secs = 0;
        assert!(config.validate().unwrap_err().to_string().contains("Invalid tick interval"));

        config.tick_interval_secs = 60;
        config.location_timeout_secs = 500;
        assert!(config.validate().unwrap_err().to_string().contains("Invalid location timeout"));
    }

    #[test]
    fn test_agent_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.tick_interval(), Duration::from_secs(60));
        assert_eq!(config.location_timeout(), Duration::from_secs(12));
        assert!(config.resolved_socket_path().ends_with(IPC_SOCKET_NAME));
    }
}
