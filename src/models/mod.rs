//! Data models module
//!
//! Defines core data structures:
//! - ConfigurationSnapshot: immutable description of desired worker behavior
//! - ClockTime / ScheduleWindow: manual-window timing values
//! - Coordinates: validated latitude/longitude pair
//! - SupervisorState: observable supervisor flags and status

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::constants::{
    DEFAULT_DAY_TEMPERATURE, DEFAULT_NIGHT_TEMPERATURE, DEFAULT_RENDER_METHOD,
    DEFAULT_WORKER_BINARY, DEFAULT_WORKER_NAME,
};
use crate::error::SupervisorError;


/// Wall-clock time of day with minute resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockTime {
    hour: u8,
    minute: u8,
}

impl ClockTime {
    /// Returns `None` unless hour is 0-23 and minute is 0-59
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    pub fn hour(self) -> u8 {
        self.hour
    }

    pub fn minute(self) -> u8 {
        self.minute
    }

    pub fn minutes_since_midnight(self) -> u16 {
        u16::from(self.hour) * 60 + u16::from(self.minute)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for ClockTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hour, minute) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("Invalid clock time '{}': expected HH:MM", s))?;
        let hour: u8 = hour
            .parse()
            .map_err(|_| format!("Invalid hour in clock time '{}'", s))?;
        let minute: u8 = minute
            .parse()
            .map_err(|_| format!("Invalid minute in clock time '{}'", s))?;
        ClockTime::new(hour, minute).ok_or_else(|| format!("Clock time out of range: '{}'", s))
    }
}

impl TryFrom<String> for ClockTime {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClockTime> for String {
    fn from(value: ClockTime) -> Self {
        value.to_string()
    }
}

/// Daily manual window; `start > end` spans midnight, `start == end` covers the whole day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub start: ClockTime,
    pub end: ClockTime,
}

/// The two mutually exclusive timing modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingMode {
    /// Sun position computed by the worker from coordinates
    Astronomical,
    /// Fixed daily window evaluated by the supervisor
    ManualWindow,
}

/// Latitude/longitude pair that passed range validation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Parse decimal strings, rejecting anything outside [-90,90] x [-180,180]
    pub fn parse(latitude: &str, longitude: &str) -> Result<Self, SupervisorError> {
        let lat = parse_degrees(latitude, 90.0).ok_or_else(|| {
            SupervisorError::ConfigInvalid(format!("Invalid latitude '{}'", latitude.trim()))
        })?;
        let lon = parse_degrees(longitude, 180.0).ok_or_else(|| {
            SupervisorError::ConfigInvalid(format!("Invalid longitude '{}'", longitude.trim()))
        })?;
        Ok(Self {
            latitude: lat,
            longitude: lon,
        })
    }
}

fn parse_degrees(raw: &str, limit: f64) -> Option<f64> {
    let value: f64 = raw.trim().parse().ok()?;
    (value.is_finite() && (-limit..=limit).contains(&value)).then_some(value)
}

/// Desired worker behavior, replaced wholesale on every edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigurationSnapshot {
    /// Absolute path of the worker binary
    pub worker_binary_path: PathBuf,
    /// Decimal latitude; validity is checked when enabling, not here
    pub latitude: String,
    /// Decimal longitude
    pub longitude: String,
    pub day_temperature: u32,
    pub night_temperature: u32,
    /// Raw `r:g:b` gamma string passed through verbatim
    pub gamma: Option<String>,
    /// Raw `day[:night]` brightness string
    pub brightness: Option<String>,
    /// Selects the manual window instead of astronomical timing
    pub use_schedule: bool,
    pub schedule_start: ClockTime,
    pub schedule_end: ClockTime,
    pub start_at_login: bool,
    /// Value for the worker's `-m` flag
    pub render_method: String,
}

impl Default for ConfigurationSnapshot {
    fn default() -> Self {
        Self {
            worker_binary_path: PathBuf::from(DEFAULT_WORKER_BINARY),
            latitude: String::new(),
            longitude: String::new(),
            day_temperature: DEFAULT_DAY_TEMPERATURE,
            night_temperature: DEFAULT_NIGHT_TEMPERATURE,
            gamma: None,
            brightness: None,
            use_schedule: false,
            schedule_start: ClockTime { hour: 21, minute: 0 },
            schedule_end: ClockTime { hour: 7, minute: 0 },
            start_at_login: false,
            render_method: DEFAULT_RENDER_METHOD.to_string(),
        }
    }
}

impl ConfigurationSnapshot {
    pub fn timing_mode(&self) -> TimingMode {
        if self.use_schedule {
            TimingMode::ManualWindow
        } else {
            TimingMode::Astronomical
        }
    }

    pub fn schedule(&self) -> ScheduleWindow {
        ScheduleWindow {
            start: self.schedule_start,
            end: self.schedule_end,
        }
    }

    /// Process name used to probe for and sweep worker instances
    pub fn worker_name(&self) -> String {
        worker_name_for(&self.worker_binary_path)
    }

    pub fn binary_exists(&self) -> bool {
        self.worker_binary_path.is_file()
    }

    pub fn coordinates(&self) -> Result<Coordinates, SupervisorError> {
        Coordinates::parse(&self.latitude, &self.longitude)
    }

    /// Checks the preconditions for launching the worker with this snapshot
    pub fn validate_for_launch(&self) -> Result<(), SupervisorError> {
        if !self.binary_exists() {
            return Err(SupervisorError::BinaryNotFound(
                self.worker_binary_path.clone(),
            ));
        }
        if self.timing_mode() == TimingMode::Astronomical {
            self.coordinates()?;
        }
        Ok(())
    }
}

pub fn worker_name_for(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_WORKER_NAME.to_string())
}

/// Lifecycle of the single worker slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Observable supervisor state, published after every mutation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SupervisorState {
    /// Last explicitly requested enabled value
    pub desired_enabled: bool,
    /// Best-known truth of whether a worker process is alive
    pub observed_running: bool,
    /// A geolocation resolution is in flight
    pub is_locating: bool,
    /// Last human-readable outcome; empty after a successful operation
    pub status_message: String,
    pub phase: WorkerPhase,
    /// Pid of the owned worker handle, if any
    pub worker_pid: Option<u32>,
    /// Set when the agent should exit so a launchd-managed instance can take over
    pub exit_requested: bool,
}

impl SupervisorState {
    /// Collapse to stopped after a failed operation
    pub(crate) fn fail(&mut self, error: &SupervisorError) {
        self.desired_enabled = false;
        self.observed_running = false;
        self.phase = WorkerPhase::Stopped;
        self.worker_pid = None;
        self.status_message = error.to_string();
    }
}
