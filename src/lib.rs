//! nightshade - color temperature worker supervisor
//!
//! This library exposes the supervisor core (schedule evaluation, worker
//! argument construction, process probing/launching and the serialized
//! reconciliation queue) together with its settings, login-item,
//! geolocation and agent IPC collaborators.

pub mod agent;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod launchd;
pub mod location;
pub mod logging;
pub mod models;
pub mod schedule;
pub mod supervisor;
pub mod worker;

pub use error::{LocationError, SupervisorError};
pub use models::{ConfigurationSnapshot, SupervisorState};
pub use supervisor::{Collaborators, OperationTicket, Supervisor, SupervisorHandle};
