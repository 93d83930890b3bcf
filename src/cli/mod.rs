//! CLI argument parsing module
//!
//! Handles the command-line interface using clap:
//! - `run` starts the agent
//! - `enable`, `disable`, `reset`, `apply`, `locate` talk to a running agent
//! - `status` and `config` inspect state and settings

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

use crate::constants::RUN_SUBCOMMAND;

/// Parsed top-level invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cli {
    /// Settings file override (`--config`)
    pub config: Option<PathBuf>,
    pub command: CliCommand,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Run { enable: bool, stop_on_exit: bool },
    Enable,
    Disable,
    Reset,
    Apply,
    Status { json: bool },
    Locate { save: bool },
    ConfigShow,
    ConfigPath,
}

pub fn build_command() -> Command {
    Command::new("nightshade")
        .version(env!("NIGHTSHADE_VERSION"))
        .long_version(concat!(env!("NIGHTSHADE_VERSION"), " (", env!("GIT_HASH"), ")"))
        .about("Keep a color temperature worker in sync with a toggle and a daily schedule")
        .long_about(
            "Supervises a redshift-compatible worker process: starts, stops and restarts it \
             according to the user toggle, the manual schedule window and the saved settings.",
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("Settings file (defaults to the user config directory)")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .subcommand(
            Command::new(RUN_SUBCOMMAND)
                .about("Run the supervisor agent in the foreground")
                .arg(
                    Arg::new("enable")
                        .long("enable")
                        .help("Enable the worker right after startup")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("stop-on-exit")
                        .long("stop-on-exit")
                        .help("Stop the worker when the agent exits")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("enable").about("Turn the worker on"))
        .subcommand(Command::new("disable").about("Turn the worker off and reset the color"))
        .subcommand(Command::new("reset").about("Reset the display to neutral color once"))
        .subcommand(Command::new("apply").about("Reload the settings file and apply it"))
        .subcommand(
            Command::new("status").about("Show supervisor and worker state").arg(
                Arg::new("json")
                    .short('j')
                    .long("json")
                    .help("Output in JSON format")
                    .action(ArgAction::SetTrue),
            ),
        )
        .subcommand(
            Command::new("locate").about("Look up the current coordinates").arg(
                Arg::new("save")
                    .long("save")
                    .help("Store the coordinates in the settings")
                    .action(ArgAction::SetTrue),
            ),
        )
        .subcommand(
            Command::new("config")
                .about("Inspect settings")
                .subcommand_required(true)
                .subcommand(Command::new("show").about("Print the effective settings"))
                .subcommand(Command::new("path").about("Print the settings file location")),
        )
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    from_matches(&build_command().get_matches())
}

/// Parse an explicit argument list (program name first)
pub fn try_parse_from<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    build_command().try_get_matches_from(args).map(|m| from_matches(&m))
}

fn from_matches(matches: &ArgMatches) -> Cli {
    let config = matches.get_one::<PathBuf>("config").cloned();

    let command = match matches.subcommand() {
        Some((RUN_SUBCOMMAND, sub)) => CliCommand::Run {
            enable: sub.get_flag("enable"),
            stop_on_exit: sub.get_flag("stop-on-exit"),
        },
        Some(("enable", _)) => CliCommand::Enable,
        Some(("disable", _)) => CliCommand::Disable,
        Some(("reset", _)) => CliCommand::Reset,
        Some(("apply", _)) => CliCommand::Apply,
        Some(("status", sub)) => CliCommand::Status {
            json: sub.get_flag("json"),
        },
        Some(("locate", sub)) => CliCommand::Locate {
            save: sub.get_flag("save"),
        },
        Some(("config", sub)) => match sub.subcommand() {
            Some(("path", _)) => CliCommand::ConfigPath,
            _ => CliCommand::ConfigShow,
        },
        // subcommand_required guarantees one of the above
        _ => CliCommand::Status { json: false },
    };

    Cli { config, command }
}
