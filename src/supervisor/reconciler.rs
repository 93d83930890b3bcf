use chrono::NaiveTime;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use super::{Collaborators, Envelope, Job, Shared};
use crate::config::SettingsStore;
use crate::error::SupervisorError;
use crate::launchd::LoginItemManager;
use crate::logging::AgentLogger;
use crate::models::{ConfigurationSnapshot, SupervisorState, WorkerPhase};
use crate::schedule::is_active_now;
use crate::worker::{build_args, reset_args, ProcessLauncher, ProcessProbe, WorkerExit, WorkerHandle};

/// Polls after a stray sweep before giving up on waiting for the exit
const SWEEP_SETTLE_POLLS: u32 = 20;
const SWEEP_SETTLE_INTERVAL: Duration = Duration::from_millis(25);

/// The owned worker slot; `generation` identifies the current handle
#[derive(Default)]
struct WorkerSlot {
    handle: Option<WorkerHandle>,
    generation: u64,
}

/// Executes queued jobs one at a time
pub(super) struct Reconciler {
    shared: Arc<Shared>,
    probe: Arc<dyn ProcessProbe>,
    launcher: Arc<dyn ProcessLauncher>,
    store: Arc<dyn SettingsStore>,
    login_items: Arc<dyn LoginItemManager>,
    logger: AgentLogger,
    executable: PathBuf,
    queue: mpsc::WeakUnboundedSender<Envelope>,
    slot: WorkerSlot,
}

impl Reconciler {
    pub(super) fn new(
        shared: Arc<Shared>,
        collaborators: Collaborators,
        queue: mpsc::WeakUnboundedSender<Envelope>,
    ) -> Self {
        Self {
            shared,
            probe: collaborators.probe,
            launcher: collaborators.launcher,
            store: collaborators.store,
            login_items: collaborators.login_items,
            logger: collaborators.logger,
            executable: collaborators.executable,
            queue,
            slot: WorkerSlot::default(),
        }
    }

    pub(super) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Envelope>) {
        while let Some(Envelope { job, reply }) = rx.recv().await {
            let shutdown = matches!(job, Job::Shutdown { .. });
            let result = self.execute(job).await;
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
            if shutdown {
                break;
            }
        }
    }

    async fn execute(&mut self, job: Job) -> Result<(), SupervisorError> {
        match job {
            Job::SetEnabled { enable, config } => {
                self.begin();
                let result = self.set_enabled(enable, &config).await;
                self.settle(result)
            }
            Job::Apply {
                previous,
                next,
                was_enabled,
                now,
            } => {
                self.begin();
                let result = self.apply(&previous, &next, was_enabled, now).await;
                self.settle(result)
            }
            Job::Tick {
                config,
                desired,
                now,
            } => {
                if !config.use_schedule {
                    return Ok(());
                }
                let active = is_active_now(config.schedule(), now);
                if active == desired {
                    return Ok(());
                }
                log::info!(
                    "Schedule {}:{} turns worker {}",
                    config.schedule_start,
                    config.schedule_end,
                    if active { "on" } else { "off" }
                );
                self.begin();
                let result = self.set_enabled(active, &config).await;
                self.settle(result)
            }
            Job::Reset { config } => {
                self.begin();
                if let Err(e) = self.reset(&config) {
                    // Reset never changes the running state
                    self.logger.log_error(&e.to_string(), Some("reset_color"));
                    self.publish(|state| state.status_message = e.to_string());
                    return Err(e);
                }
                Ok(())
            }
            Job::Refresh { config } => {
                self.begin();
                let running = self.probe_running(&config.worker_name()).await;
                let owned = self.slot.handle.is_some();
                self.publish(|state| {
                    state.observed_running = running;
                    if !owned {
                        state.phase = if running {
                            WorkerPhase::Running
                        } else {
                            WorkerPhase::Stopped
                        };
                    }
                });
                Ok(())
            }
            Job::WorkerExited {
                generation,
                pid,
                exit,
            } => {
                self.worker_exited(generation, pid, &exit);
                Ok(())
            }
            Job::Shutdown {
                stop_worker,
                config,
            } => {
                if stop_worker {
                    self.set_enabled(false, &config).await?;
                } else if let Some(handle) = self.slot.handle.take() {
                    log::info!("Leaving worker pid {} running", handle.pid());
                }
                Ok(())
            }
        }
    }

    fn publish(&self, modify: impl FnOnce(&mut SupervisorState)) {
        self.shared.state.send_modify(modify);
    }

    /// Every new operation starts with a clean status
    fn begin(&self) {
        self.shared.state.send_if_modified(|state| {
            if state.status_message.is_empty() {
                return false;
            }
            state.status_message.clear();
            true
        });
    }

    /// Failures stop at the operation boundary and collapse the state
    fn settle(&mut self, result: Result<(), SupervisorError>) -> Result<(), SupervisorError> {
        if let Err(e) = &result {
            self.logger.log_error(&e.to_string(), None);
            if let Some(handle) = self.slot.handle.take() {
                handle.terminate();
            }
            self.publish(|state| state.fail(e));
        }
        result
    }

    async fn set_enabled(&mut self, enable: bool, config: &ConfigurationSnapshot) -> Result<(), SupervisorError> {
        if enable {
            self.start(config).await
        } else {
            self.stop(config).await;
            Ok(())
        }
    }

    async fn start(&mut self, config: &ConfigurationSnapshot) -> Result<(), SupervisorError> {
        self.publish(|state| {
            state.desired_enabled = true;
            state.phase = WorkerPhase::Starting;
        });
        config.validate_for_launch()?;

        let name = config.worker_name();
        if let Some(handle) = self.slot.handle.take() {
            handle.terminate();
            self.logger.log_worker_stopped(Some(handle.pid()), "superseded");
        }
        if self.probe_running(&name).await {
            self.sweep_strays(&name).await;
        }

        let args = build_args(config);
        let mut handle = self.launcher.start(&config.worker_binary_path, &args)?;
        let pid = handle.pid();

        self.slot.generation += 1;
        if let Some(exit) = handle.take_exit() {
            self.watch_exit(self.slot.generation, pid, exit);
        }
        self.slot.handle = Some(handle);
        self.logger.log_worker_launched(pid, &config.worker_binary_path, &args);

        self.publish(|state| {
            state.desired_enabled = true;
            state.observed_running = true;
            state.phase = WorkerPhase::Running;
            state.worker_pid = Some(pid);
        });
        Ok(())
    }

    async fn stop(&mut self, config: &ConfigurationSnapshot) {
        self.publish(|state| {
            state.desired_enabled = false;
            state.phase = WorkerPhase::Stopping;
        });

        let pid = self.slot.handle.take().map(|handle| {
            handle.terminate();
            handle.pid()
        });

        // The owned handle may have been lost across an agent restart
        let name = config.worker_name();
        self.logger.log_stray_sweep(&name);
        self.kill_all(&name).await;

        if config.binary_exists() {
            if let Err(e) = self.launcher.fire_and_forget(&config.worker_binary_path, &reset_args()) {
                log::warn!("Failed to reset color after stopping worker: {}", e);
            }
        }

        self.logger.log_worker_stopped(pid, "disabled");
        self.publish(|state| {
            state.desired_enabled = false;
            state.observed_running = false;
            state.phase = WorkerPhase::Stopped;
            state.worker_pid = None;
        });
    }

    async fn apply(
        &mut self,
        previous: &ConfigurationSnapshot,
        next: &ConfigurationSnapshot,
        was_enabled: bool,
        now: NaiveTime,
    ) -> Result<(), SupervisorError> {
        let save_error = {
            let store = self.store.clone();
            let snapshot = next.clone();
            match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("Failed to save settings: {:#}", e)),
                Err(e) => Some(format!("Failed to save settings: {}", e)),
            }
        };
        if let Some(message) = &save_error {
            self.logger.log_error(message, Some("apply_settings"));
        }

        let login_enabled = !previous.start_at_login && next.start_at_login;
        let login_disabled = previous.start_at_login && !next.start_at_login;

        if login_enabled {
            self.update_login_item(true).await;
            self.logger.log_settings_applied(false, Some(true));
            // Hand over to the launchd-managed instance
            self.publish(|state| {
                state.exit_requested = true;
                if let Some(message) = save_error {
                    state.status_message = message;
                }
            });
            return Ok(());
        }
        if login_disabled {
            self.update_login_item(false).await;
        }

        // The worker cannot be reconfigured live: restart with the new snapshot
        // A manual window that is closed right now only needs the stop
        if was_enabled {
            let restart = !next.use_schedule || is_active_now(next.schedule(), now);
            self.stop(previous).await;
            if restart {
                self.start(next).await?;
            }
        }

        if next.use_schedule {
            let active = is_active_now(next.schedule(), now);
            let desired = self.shared.state.borrow().desired_enabled;
            if active != desired {
                self.set_enabled(active, next).await?;
            }
        }

        self.logger
            .log_settings_applied(was_enabled, login_disabled.then_some(false));
        if let Some(message) = save_error {
            self.publish(|state| state.status_message = message);
        }
        Ok(())
    }

    fn reset(&self, config: &ConfigurationSnapshot) -> Result<(), SupervisorError> {
        if !config.binary_exists() {
            return Err(SupervisorError::BinaryNotFound(config.worker_binary_path.clone()));
        }
        self.launcher
            .fire_and_forget(&config.worker_binary_path, &reset_args())
    }

    fn worker_exited(&mut self, generation: u64, pid: u32, exit: &WorkerExit) {
        // Exits of superseded or deliberately stopped handles are expected
        if generation != self.slot.generation || self.slot.handle.is_none() {
            log::debug!("Ignoring exit of stale worker pid {} ({})", pid, exit);
            return;
        }
        self.slot.handle = None;
        self.logger.log_worker_exited(pid, exit);

        // No respawn: an unexpected exit is taken as the worker being switched off
        self.publish(|state| {
            state.desired_enabled = false;
            state.observed_running = false;
            state.phase = WorkerPhase::Stopped;
            state.worker_pid = None;
            state.status_message = format!("Worker exited unexpectedly ({})", exit);
        });
    }

    fn watch_exit(&self, generation: u64, pid: u32, exit: oneshot::Receiver<WorkerExit>) {
        let queue = self.queue.clone();
        tokio::spawn(async move {
            let exit = exit
                .await
                .unwrap_or_else(|_| WorkerExit::Lost("exit notification dropped".to_string()));
            if let Some(queue) = queue.upgrade() {
                let _ = queue.send(Envelope {
                    job: Job::WorkerExited {
                        generation,
                        pid,
                        exit,
                    },
                    reply: None,
                });
            }
        });
    }

    async fn update_login_item(&self, install: bool) {
        let login_items = self.login_items.clone();
        let executable = self.executable.clone();
        let result = tokio::task::spawn_blocking(move || {
            if install {
                login_items.install(&executable);
            } else {
                login_items.uninstall();
            }
        })
        .await;
        if let Err(e) = result {
            log::warn!("Login item update did not complete: {}", e);
        }
    }

    /// Probe failures degrade to "not running"
    async fn probe_running(&self, name: &str) -> bool {
        let probe = self.probe.clone();
        let process_name = name.to_string();
        match tokio::task::spawn_blocking(move || probe.is_running(&process_name)).await {
            Ok(Ok(running)) => running,
            Ok(Err(e)) => {
                log::warn!("{}; assuming no {} process is running", e, name);
                false
            }
            Err(e) => {
                log::warn!("Probe task failed: {}", e);
                false
            }
        }
    }

    async fn kill_all(&self, name: &str) {
        let probe = self.probe.clone();
        let process_name = name.to_string();
        match tokio::task::spawn_blocking(move || probe.kill_all(&process_name)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("{}; continuing without sweeping {}", e, name),
            Err(e) => log::warn!("Kill task failed: {}", e),
        }
    }

    /// Kill every process named `name` and give them a moment to exit
    async fn sweep_strays(&self, name: &str) {
        self.logger.log_stray_sweep(name);
        self.kill_all(name).await;

        for _ in 0..SWEEP_SETTLE_POLLS {
            if !self.probe_running(name).await {
                return;
            }
            tokio::time::sleep(SWEEP_SETTLE_INTERVAL).await;
        }
        log::warn!("{} still running after sweep; launching anyway", name);
    }
}
