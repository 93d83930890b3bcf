//! Everything that touches the external worker binary:
//! argument construction, process probing and process launching.

pub mod args;
pub mod launcher;
pub mod probe;

pub use args::{build_args, reset_args};
pub use launcher::{OsLauncher, ProcessLauncher, WorkerExit, WorkerHandle};
pub use probe::{CommandProbe, ProbeBackend, ProcessProbe, SysinfoProbe};
