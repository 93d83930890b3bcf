//! Global constants for nightshade
//!
//! Centralized location for application-wide constants

/// Application subsystem identifier for macOS Unified Logging System
/// Used for the LaunchAgent label, ULS logging, and agent identification
pub const APP_SUBSYSTEM: &str = "com.nightshade.agent";

/// Default category for ULS logging
pub const AGENT_CATEGORY: &str = "agent";

/// LaunchAgent plist file name
pub const LAUNCHD_PLIST_NAME: &str = "com.nightshade.agent.plist";

/// LaunchAgent label (same as subsystem)
pub const LAUNCHD_SERVICE_NAME: &str = APP_SUBSYSTEM;

/// Subcommand the LaunchAgent invokes to start the agent
pub const RUN_SUBCOMMAND: &str = "run";

/// Worker process name used when the configured binary path has no file name
pub const DEFAULT_WORKER_NAME: &str = "redshift";

/// Default location of the worker binary (Homebrew prefix)
pub const DEFAULT_WORKER_BINARY: &str = "/usr/local/bin/redshift";

/// Render method passed with `-m`
#[cfg(target_os = "macos")]
pub const DEFAULT_RENDER_METHOD: &str = "quartz";
/// Render method passed with `-m`
///
/// With `randr` a manual-window worker (`-O`) applies the temperature and
/// exits with code 0. That exit is reported like any other (flags off,
/// status message set), the next tick inside the window launches it again,
/// and no `-x` reset runs when the window closes because the supervisor
/// already considers it disabled.
#[cfg(not(target_os = "macos"))]
pub const DEFAULT_RENDER_METHOD: &str = "randr";

pub const DEFAULT_DAY_TEMPERATURE: u32 = 6500;
pub const DEFAULT_NIGHT_TEMPERATURE: u32 = 3500;

/// Schedule evaluation period in seconds
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;
pub const MIN_TICK_INTERVAL_SECS: u64 = 1;
pub const MAX_TICK_INTERVAL_SECS: u64 = 3600;

/// Geolocation lookup timeout in seconds
pub const DEFAULT_LOCATION_TIMEOUT_SECS: u64 = 12;
pub const MAX_LOCATION_TIMEOUT_SECS: u64 = 120;

/// External geolocation helper and its arguments
pub const DEFAULT_LOCATION_COMMAND: &str = "CoreLocationCLI";
pub const DEFAULT_LOCATION_ARGS: &[&str] = &["-format", "%latitude %longitude"];

/// Settings directory and file under the user config dir
pub const SETTINGS_DIR_NAME: &str = "nightshade";
pub const SETTINGS_FILE_NAME: &str = "settings.toml";

/// IPC socket file name
pub const IPC_SOCKET_NAME: &str = "nightshade.sock";
