#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use log::LevelFilter;
use std::sync::Arc;

use nightshade::agent::ipc::{generate_request_id, send_request, IpcMessage, IpcResponse};
use nightshade::agent::{self, AgentOptions, ExitReason};
use nightshade::cli::{self, Cli, CliCommand};
use nightshade::config::{SettingsDocument, TomlSettingsStore};
use nightshade::constants::APP_SUBSYSTEM;
use nightshade::location::{CommandLocationResolver, Locator};
use nightshade::logging;
use nightshade::models::{SupervisorState, WorkerPhase};

fn main() -> Result<()> {
    let cli = cli::parse_args();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;

    runtime.block_on(dispatch(cli))
}

async fn dispatch(cli: Cli) -> Result<()> {
    let store = agent::settings_store(cli.config.clone())?;
    let document = store.load_document();

    // Client commands only surface warnings; the agent honours the configured level
    let level = match cli.command {
        CliCommand::Run { .. } => logging::parse_level(&document.agent.log_level),
        _ => LevelFilter::Warn,
    };
    logging::init_backend(APP_SUBSYSTEM, level)?;

    match cli.command {
        CliCommand::Run {
            enable,
            stop_on_exit,
        } => {
            let reason = agent::run_agent(AgentOptions {
                settings_path: Some(store.path().to_path_buf()),
                enable,
                stop_on_exit,
            })
            .await?;
            if reason == ExitReason::HandOver {
                println!("Login agent installed; it takes over from this instance.");
            }
            Ok(())
        }
        CliCommand::Enable => request(&document, set_enabled(true)).await,
        CliCommand::Disable => request(&document, set_enabled(false)).await,
        CliCommand::Reset => {
            request(
                &document,
                IpcMessage::ResetColor {
                    request_id: generate_request_id(),
                },
            )
            .await
        }
        CliCommand::Apply => {
            // Surface parse errors here instead of as an agent-side 422
            store.read_document()?;
            request(
                &document,
                IpcMessage::ApplySettings {
                    request_id: generate_request_id(),
                },
            )
            .await
        }
        CliCommand::Status { json } => status(&document, json).await,
        CliCommand::Locate { save } => locate(&store, &document, save).await,
        CliCommand::ConfigShow => {
            let text = toml::to_string_pretty(&document).context("Failed to render settings")?;
            print!("{}", text);
            Ok(())
        }
        CliCommand::ConfigPath => {
            println!("{}", store.path().display());
            Ok(())
        }
    }
}

fn set_enabled(enabled: bool) -> IpcMessage {
    IpcMessage::SetEnabled {
        enabled,
        request_id: generate_request_id(),
    }
}

/// Send one command to the agent and print the resulting state
async fn request(document: &SettingsDocument, message: IpcMessage) -> Result<()> {
    let socket = document.agent.resolved_socket_path();
    let response = send_request(&socket, &message)
        .await
        .context("Is the agent running? Start it with `nightshade run`")?;

    match response {
        IpcResponse::Success { state, message, .. } => {
            if let Some(message) = message {
                println!("{}", message);
            }
            print_state(&state);
            Ok(())
        }
        IpcResponse::Error { code, message, .. } => {
            anyhow::bail!("Agent error {}: {}", code, message)
        }
    }
}

async fn status(document: &SettingsDocument, json: bool) -> Result<()> {
    let socket = document.agent.resolved_socket_path();
    let message = IpcMessage::GetStatus {
        request_id: generate_request_id(),
    };

    let (state, agent_running) = match send_request(&socket, &message).await {
        Ok(IpcResponse::Success { state, .. }) => (state, true),
        Ok(IpcResponse::Error { message, .. }) => anyhow::bail!("Agent error: {}", message),
        Err(_) => {
            let document = document.clone();
            let state = tokio::task::spawn_blocking(move || probe_directly(&document))
                .await
                .context("Process probe task failed")?;
            (state, false)
        }
    };

    if json {
        let body = serde_json::json!({
            "agent_running": agent_running,
            "state": state,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!("Agent: {}", if agent_running { "running" } else { "not running" });
        print_state(&state);
    }
    Ok(())
}

/// State as seen without an agent: only the process table is known
fn probe_directly(document: &SettingsDocument) -> SupervisorState {
    let name = document.worker.worker_name();
    let running = match document.agent.probe.build().is_running(&name) {
        Ok(running) => running,
        Err(e) => {
            log::warn!("Process probe failed: {}", e);
            false
        }
    };
    SupervisorState {
        observed_running: running,
        phase: if running {
            WorkerPhase::Running
        } else {
            WorkerPhase::Stopped
        },
        ..SupervisorState::default()
    }
}

async fn locate(store: &TomlSettingsStore, document: &SettingsDocument, save: bool) -> Result<()> {
    let socket = document.agent.resolved_socket_path();
    let message = IpcMessage::Locate {
        save,
        request_id: generate_request_id(),
    };

    match send_request(&socket, &message).await {
        Ok(IpcResponse::Success { message, .. }) => {
            println!("{}", message.unwrap_or_default());
            Ok(())
        }
        Ok(IpcResponse::Error { message, .. }) => anyhow::bail!("{}", message),
        Err(_) => locate_locally(store, document, save).await,
    }
}

async fn locate_locally(store: &TomlSettingsStore, document: &SettingsDocument, save: bool) -> Result<()> {
    let resolver = CommandLocationResolver::new(
        document.agent.location_command.clone(),
        document.agent.location_args.clone(),
    );
    let locator = Locator::new(Arc::new(resolver), document.agent.location_timeout());
    let coords = locator.locate().await?;
    println!("{:.4} {:.4}", coords.latitude, coords.longitude);

    if save {
        let mut next = document.clone();
        next.worker.latitude = format!("{:.4}", coords.latitude);
        next.worker.longitude = format!("{:.4}", coords.longitude);
        store.write_document(&next)?;
        println!("Saved to {}", store.path().display());
    }
    Ok(())
}

fn print_state(state: &SupervisorState) {
    println!("Enabled: {}", if state.desired_enabled { "yes" } else { "no" });
    match state.worker_pid {
        Some(pid) => println!("Worker: {:?} (PID {})", state.phase, pid),
        None => println!(
            "Worker: {:?}{}",
            state.phase,
            if state.observed_running { " (unowned instance running)" } else { "" }
        ),
    }
    if state.is_locating {
        println!("Locating...");
    }
    if !state.status_message.is_empty() {
        println!("Status: {}", state.status_message);
    }
}
