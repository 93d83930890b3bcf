//! macOS LaunchAgent integration for start-at-login
//!
//! Handles plist generation, installation and launchctl registration.
//! Every step is best-effort: failures are logged, never returned.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::constants::{LAUNCHD_PLIST_NAME, LAUNCHD_SERVICE_NAME, RUN_SUBCOMMAND};

/// Installs and removes the login-launch descriptor
pub trait LoginItemManager: Send + Sync {
    /// Register `executable` to start at login; idempotent
    fn install(&self, executable: &Path);

    /// Remove the registration; idempotent
    fn uninstall(&self);
}

/// LaunchAgent plist contents
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LaunchAgentPlist {
    /// Service label (reverse DNS format)
    pub label: String,
    /// Executable path and arguments
    pub program_arguments: Vec<String>,
    /// Start at login
    pub run_at_load: bool,
    /// Restart if the agent exits; off so a deliberate quit stays quit
    pub keep_alive: bool,
    /// Only run inside a GUI login session
    pub limit_load_to_session_type: String,
}

impl LaunchAgentPlist {
    pub fn new(executable: &Path) -> Self {
        Self {
            label: LAUNCHD_SERVICE_NAME.to_string(),
            program_arguments: vec![
                executable.to_string_lossy().into_owned(),
                RUN_SUBCOMMAND.to_string(),
            ],
            run_at_load: true,
            keep_alive: false,
            limit_load_to_session_type: "Aqua".to_string(),
        }
    }

    /// Generate plist XML content
    pub fn to_xml(&self) -> Result<String> {
        let mut buffer = Vec::new();
        plist::to_writer_xml(&mut buffer, self).context("Failed to serialize LaunchAgent plist")?;
        String::from_utf8(buffer).context("LaunchAgent plist is not valid UTF-8")
    }
}

/// Per-user LaunchAgent under `~/Library/LaunchAgents`
#[derive(Debug, Clone)]
pub struct LaunchAgent {
    agents_dir: PathBuf,
    run_launchctl: bool,
}

impl LaunchAgent {
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(Self {
            agents_dir: home.join("Library").join("LaunchAgents"),
            run_launchctl: cfg!(target_os = "macos"),
        })
    }

    /// Write plists into `agents_dir` without registering them
    pub fn with_directory(agents_dir: impl Into<PathBuf>) -> Self {
        Self {
            agents_dir: agents_dir.into(),
            run_launchctl: false,
        }
    }

    pub fn plist_path(&self) -> PathBuf {
        self.agents_dir.join(LAUNCHD_PLIST_NAME)
    }

    pub fn is_installed(&self) -> bool {
        self.plist_path().exists()
    }

    fn try_install(&self, executable: &Path) -> Result<()> {
        let content = LaunchAgentPlist::new(executable).to_xml()?;
        std::fs::create_dir_all(&self.agents_dir).with_context(|| {
            format!("Failed to create LaunchAgents directory: {}", self.agents_dir.display())
        })?;

        let plist_path = self.plist_path();
        std::fs::write(&plist_path, content)
            .with_context(|| format!("Failed to write plist file: {}", plist_path.display()))?;

        if self.run_launchctl {
            launchctl(&["load", "-w"], &plist_path)?;
        }
        Ok(())
    }

    fn try_uninstall(&self) -> Result<()> {
        let plist_path = self.plist_path();
        if !plist_path.exists() {
            return Ok(());
        }
        if self.run_launchctl {
            // Unload failures are expected when the agent was never loaded
            if let Err(e) = launchctl(&["unload", "-w"], &plist_path) {
                log::debug!("{:#}", e);
            }
        }
        std::fs::remove_file(&plist_path)
            .with_context(|| format!("Failed to remove plist file: {}", plist_path.display()))
    }
}

impl LoginItemManager for LaunchAgent {
    fn install(&self, executable: &Path) {
        match self.try_install(executable) {
            Ok(()) => log::info!("Installed LaunchAgent at {}", self.plist_path().display()),
            Err(e) => log::warn!("Failed to install LaunchAgent: {:#}", e),
        }
    }

    fn uninstall(&self) {
        match self.try_uninstall() {
            Ok(()) => log::info!("Removed LaunchAgent {}", LAUNCHD_SERVICE_NAME),
            Err(e) => log::warn!("Failed to remove LaunchAgent: {:#}", e),
        }
    }
}

fn launchctl(args: &[&str], plist_path: &Path) -> Result<()> {
    let output = Command::new("launchctl")
        .args(args)
        .arg(plist_path)
        .output()
        .with_context(|| format!("Failed to execute launchctl {}", args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("launchctl {} failed: {}", args.join(" "), stderr.trim());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_plist_xml_contents() {
        let xml = LaunchAgentPlist::new(Path::new("/Applications/nightshade"))
            .to_xml()
            .unwrap();
        assert!(xml.contains("<key>Label</key>"));
        assert!(xml.contains("<string>com.nightshade.agent</string>"));
        assert!(xml.contains("<key>ProgramArguments</key>"));
        assert!(xml.contains("<string>/Applications/nightshade</string>"));
        assert!(xml.contains("<string>run</string>"));
        assert!(xml.contains("<key>RunAtLoad</key>"));
        assert!(xml.contains("<key>KeepAlive</key>"));
        assert!(xml.contains("<false/>"));
    }

    #[test]
    fn test_install_and_uninstall_are_idempotent() {
        let dir = tempdir().unwrap();
        let agent = LaunchAgent::with_directory(dir.path().join("LaunchAgents"));
        assert!(!agent.is_installed());

        agent.install(Path::new("/usr/local/bin/nightshade"));
        agent.install(Path::new("/usr/local/bin/nightshade"));
        assert!(agent.is_installed());

        let parsed = plist::Value::from_file(agent.plist_path()).unwrap();
        let dict = parsed.as_dictionary().unwrap();
        assert_eq!(
            dict.get("Label").and_then(|v| v.as_string()),
            Some(LAUNCHD_SERVICE_NAME)
        );

        agent.uninstall();
        agent.uninstall();
        assert!(!agent.is_installed());
    }
}
