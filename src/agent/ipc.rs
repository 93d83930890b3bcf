//! Inter-process communication for agent control
//!
//! Unix domain socket carrying one newline-terminated JSON request and one
//! JSON response per connection.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::{SettingsStore, TomlSettingsStore};
use crate::error::SupervisorError;
use crate::models::SupervisorState;
use crate::supervisor::SupervisorHandle;

/// IPC message types for agent communication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcMessage {
    /// Toggle the worker on or off
    SetEnabled { enabled: bool, request_id: String },
    /// Reload the settings file and apply it
    ApplySettings { request_id: String },
    /// One-shot neutral color
    ResetColor { request_id: String },
    /// Resolve coordinates, optionally committing them to the settings
    Locate { save: bool, request_id: String },
    /// Current supervisor state
    GetStatus { request_id: String },
    /// Stop the agent, leaving the worker as it is
    Shutdown { request_id: String },
}

impl IpcMessage {
    pub fn request_id(&self) -> &str {
        match self {
            IpcMessage::SetEnabled { request_id, .. }
            | IpcMessage::ApplySettings { request_id }
            | IpcMessage::ResetColor { request_id }
            | IpcMessage::Locate { request_id, .. }
            | IpcMessage::GetStatus { request_id }
            | IpcMessage::Shutdown { request_id } => request_id,
        }
    }
}

/// IPC response types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum IpcResponse {
    /// Successful operation
    Success {
        request_id: String,
        state: SupervisorState,
        message: Option<String>,
    },
    /// Operation failed
    Error {
        request_id: String,
        code: u32,
        message: String,
        state: Option<SupervisorState>,
    },
}

/// Generate unique request ID
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// IPC server bound to the agent socket
pub struct IpcServer {
    socket_path: PathBuf,
    listener: UnixListener,
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        // Clean up socket file when server is dropped
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl IpcServer {
    /// Bind the socket, refusing if another agent is answering on it
    pub async fn bind(socket_path: &Path) -> Result<Self> {
        if socket_path.exists() {
            if UnixStream::connect(socket_path).await.is_ok() {
                anyhow::bail!(
                    "Agent already running (socket {} is live), please stop it first.",
                    socket_path.display()
                );
            }
            std::fs::remove_file(socket_path)
                .with_context(|| format!("Failed to remove stale socket: {}", socket_path.display()))?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {}", parent.display()))?;
        }

        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("Failed to bind to socket: {}", socket_path.display()))?;

        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            listener,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until the listener fails; each runs in its own task
    pub async fn serve(self, handler: IpcHandler) -> Result<()> {
        log::info!("IPC server listening on {}", self.socket_path.display());
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handler.handle_connection(stream).await {
                            log::warn!("Error handling IPC connection: {:#}", e);
                        }
                    });
                }
                Err(e) => {
                    log::error!("Error accepting IPC connection: {}", e);
                    return Err(e.into());
                }
            }
        }
    }
}

/// Handler for individual IPC connections
#[derive(Clone)]
pub struct IpcHandler {
    supervisor: SupervisorHandle,
    store: Arc<TomlSettingsStore>,
    shutdown: Arc<Notify>,
}

impl IpcHandler {
    pub fn new(supervisor: SupervisorHandle, store: Arc<TomlSettingsStore>, shutdown: Arc<Notify>) -> Self {
        Self {
            supervisor,
            store,
            shutdown,
        }
    }

    /// Read one request and write one response
    pub async fn handle_connection(&self, stream: UnixStream) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        reader
            .read_line(&mut line)
            .await
            .context("Failed to read from client")?;

        let response = match serde_json::from_str::<IpcMessage>(line.trim()) {
            Ok(message) => self.process_message(message).await,
            Err(e) => IpcResponse::Error {
                request_id: String::new(),
                code: 400,
                message: format!("Failed to parse IPC message: {}", e),
                state: None,
            },
        };

        let response_json =
            serde_json::to_string(&response).context("Failed to serialize response")?;
        writer
            .write_all(response_json.as_bytes())
            .await
            .context("Failed to write response")?;
        writer
            .write_all(b"\n")
            .await
            .context("Failed to write newline")?;

        Ok(())
    }

    /// Process an IPC message and generate the response
    pub async fn process_message(&self, message: IpcMessage) -> IpcResponse {
        let request_id = message.request_id().to_string();
        match message {
            IpcMessage::SetEnabled { enabled, .. } => {
                let result = self.supervisor.set_enabled(enabled).wait().await;
                self.operation_response(request_id, result)
            }
            IpcMessage::ApplySettings { .. } => match self.store.read_document() {
                Ok(document) => {
                    let result = self.supervisor.apply_settings(document.worker).wait().await;
                    self.operation_response(request_id, result)
                }
                Err(e) => self.error(request_id, 422, format!("{:#}", e)),
            },
            IpcMessage::ResetColor { .. } => {
                let result = self.supervisor.reset_color().wait().await;
                self.operation_response(request_id, result)
            }
            IpcMessage::Locate { save, .. } => match self.supervisor.locate().await {
                Ok(coords) => {
                    let mut message = format!("{:.4} {:.4}", coords.latitude, coords.longitude);
                    if save {
                        let mut next = self.supervisor.config();
                        next.latitude = format!("{:.4}", coords.latitude);
                        next.longitude = format!("{:.4}", coords.longitude);
                        if let Err(e) = self.supervisor.apply_settings(next).wait().await {
                            return self.error(request_id, 500, e.to_string());
                        }
                        message.push_str(" (saved)");
                    }
                    IpcResponse::Success {
                        request_id,
                        state: self.supervisor.state(),
                        message: Some(message),
                    }
                }
                Err(e) => self.error(request_id, 503, e.to_string()),
            },
            IpcMessage::GetStatus { .. } => IpcResponse::Success {
                request_id,
                state: self.supervisor.state(),
                message: None,
            },
            IpcMessage::Shutdown { .. } => {
                self.shutdown.notify_one();
                IpcResponse::Success {
                    request_id,
                    state: self.supervisor.state(),
                    message: Some("Agent shutting down".to_string()),
                }
            }
        }
    }

    fn operation_response(&self, request_id: String, result: Result<(), SupervisorError>) -> IpcResponse {
        match result {
            Ok(()) => IpcResponse::Success {
                request_id,
                state: self.supervisor.state(),
                message: None,
            },
            Err(e) => self.error(request_id, 500, e.to_string()),
        }
    }

    fn error(&self, request_id: String, code: u32, message: String) -> IpcResponse {
        IpcResponse::Error {
            request_id,
            code,
            message,
            state: Some(self.supervisor.state()),
        }
    }
}

/// Send one request to a running agent
pub async fn send_request(socket_path: &Path, message: &IpcMessage) -> Result<IpcResponse> {
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("No agent listening on {}", socket_path.display()))?;
    let (reader, mut writer) = stream.into_split();

    let mut request = serde_json::to_string(message).context("Failed to serialize request")?;
    request.push('\n');
    writer
        .write_all(request.as_bytes())
        .await
        .context("Failed to send request")?;

    let mut line = String::new();
    BufReader::new(reader)
        .read_line(&mut line)
        .await
        .context("Failed to read response")?;

    serde_json::from_str(line.trim()).context("Failed to parse agent response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_format() {
        let message = IpcMessage::SetEnabled {
            enabled: true,
            request_id: "abc".to_string(),
        };
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"type\":\"SetEnabled\""));
        assert!(json.contains("\"enabled\":true"));

        let parsed: IpcMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.request_id(), "abc");
    }

    #[test]
    fn test_response_wire_format() {
        let response = IpcResponse::Error {
            request_id: "r1".to_string(),
            code: 500,
            message: "Worker binary not found at /x".to_string(),
            state: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"Error\""));
        assert!(json.contains("\"code\":500"));
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(generate_request_id(), generate_request_id());
    }
}
