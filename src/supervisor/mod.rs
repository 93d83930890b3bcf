//! Worker process supervisor
//!
//! All start/stop/restart/probe work runs as jobs on one FIFO queue drained
//! by a single task, so at most one reconciliation executes at a time.
//! Commands capture the committed configuration and the current flags when
//! they are issued and return immediately with an [`OperationTicket`].

mod reconciler;
mod ticker;

pub use ticker::ScheduleTicker;

use chrono::NaiveTime;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::SettingsStore;
use crate::error::{LocationError, SupervisorError};
use crate::launchd::LoginItemManager;
use crate::location::Locator;
use crate::logging::AgentLogger;
use crate::models::{ConfigurationSnapshot, Coordinates, SupervisorState};
use crate::worker::{ProcessLauncher, ProcessProbe, WorkerExit};

use reconciler::Reconciler;

/// External collaborators the supervisor drives
pub struct Collaborators {
    pub probe: Arc<dyn ProcessProbe>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub store: Arc<dyn SettingsStore>,
    pub login_items: Arc<dyn LoginItemManager>,
    pub locator: Option<Locator>,
    pub logger: AgentLogger,
    /// Executable registered as the login item
    pub executable: PathBuf,
}

type Reply = oneshot::Sender<Result<(), SupervisorError>>;

pub(crate) enum Job {
    SetEnabled {
        enable: bool,
        config: ConfigurationSnapshot,
    },
    Apply {
        previous: ConfigurationSnapshot,
        next: ConfigurationSnapshot,
        was_enabled: bool,
        now: NaiveTime,
    },
    Tick {
        config: ConfigurationSnapshot,
        desired: bool,
        now: NaiveTime,
    },
    Reset {
        config: ConfigurationSnapshot,
    },
    Refresh {
        config: ConfigurationSnapshot,
    },
    WorkerExited {
        generation: u64,
        pid: u32,
        exit: WorkerExit,
    },
    Shutdown {
        stop_worker: bool,
        config: ConfigurationSnapshot,
    },
}

pub(crate) struct Envelope {
    job: Job,
    reply: Option<Reply>,
}

/// Completion of one queued operation
///
/// Dropping the ticket does not cancel the operation.
#[derive(Debug)]
pub struct OperationTicket(oneshot::Receiver<Result<(), SupervisorError>>);

impl OperationTicket {
    /// Wait for the operation to finish; `Closed` if the supervisor is gone
    pub async fn wait(self) -> Result<(), SupervisorError> {
        self.0.await.unwrap_or(Err(SupervisorError::Closed))
    }
}

struct Shared {
    state: watch::Sender<SupervisorState>,
    config: watch::Sender<ConfigurationSnapshot>,
}

/// Cloneable command surface of the supervisor
#[derive(Clone)]
pub struct SupervisorHandle {
    queue: mpsc::UnboundedSender<Envelope>,
    shared: Arc<Shared>,
    locator: Option<Locator>,
}

impl SupervisorHandle {
    fn enqueue(&self, job: Job) -> OperationTicket {
        let (tx, rx) = oneshot::channel();
        // A closed queue drops the reply sender, which resolves the ticket as Closed
        let _ = self.queue.send(Envelope {
            job,
            reply: Some(tx),
        });
        OperationTicket(rx)
    }

    /// Current observable state
    pub fn state(&self) -> SupervisorState {
        self.shared.state.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.shared.state.subscribe()
    }

    /// Committed configuration snapshot
    pub fn config(&self) -> ConfigurationSnapshot {
        self.shared.config.borrow().clone()
    }

    /// User toggle
    pub fn set_enabled(&self, enable: bool) -> OperationTicket {
        self.enqueue(Job::SetEnabled {
            enable,
            config: self.config(),
        })
    }

    /// Commit `next` and reconcile the worker against it
    pub fn apply_settings(&self, next: ConfigurationSnapshot) -> OperationTicket {
        self.apply_settings_at(next, chrono::Local::now().time())
    }

    pub fn apply_settings_at(&self, next: ConfigurationSnapshot, now: NaiveTime) -> OperationTicket {
        let was_enabled = self.shared.state.borrow().desired_enabled;
        let previous = self.shared.config.send_replace(next.clone());
        self.enqueue(Job::Apply {
            previous,
            next,
            was_enabled,
            now,
        })
    }

    /// One-shot request for neutral color, regardless of running state
    pub fn reset_color(&self) -> OperationTicket {
        self.enqueue(Job::Reset {
            config: self.config(),
        })
    }

    /// Evaluate the manual window against the local clock
    pub fn schedule_tick(&self) -> OperationTicket {
        self.schedule_tick_at(chrono::Local::now().time())
    }

    pub fn schedule_tick_at(&self, now: NaiveTime) -> OperationTicket {
        self.enqueue(Job::Tick {
            config: self.config(),
            desired: self.shared.state.borrow().desired_enabled,
            now,
        })
    }

    /// Probe-only reconciliation of `observed_running`
    pub fn refresh_running_state(&self) -> OperationTicket {
        self.enqueue(Job::Refresh {
            config: self.config(),
        })
    }

    /// Resolve the current position; at most one lookup is in flight
    ///
    /// Runs outside the job queue and never touches the enabled/running flags.
    pub async fn locate(&self) -> Result<Coordinates, LocationError> {
        let locator = self
            .locator
            .clone()
            .ok_or_else(|| LocationError::Unavailable("no location resolver configured".to_string()))?;

        let acquired = self.shared.state.send_if_modified(|state| {
            if state.is_locating {
                return false;
            }
            state.is_locating = true;
            state.status_message.clear();
            true
        });
        if !acquired {
            return Err(LocationError::Busy);
        }

        let result = locator.locate().await;
        self.shared.state.send_modify(|state| {
            state.is_locating = false;
            if let Err(e) = &result {
                state.status_message = e.to_string();
            }
        });
        result
    }
}

/// Owner of the reconciliation task and the schedule ticker
pub struct Supervisor {
    handle: SupervisorHandle,
    worker: JoinHandle<()>,
    ticker: Option<ScheduleTicker>,
}

impl Supervisor {
    /// Start the job queue; must be called inside a tokio runtime
    pub fn spawn(initial: ConfigurationSnapshot, collaborators: Collaborators) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SupervisorState::default());
        let (config, _) = watch::channel(initial);
        let shared = Arc::new(Shared { state, config });

        let locator = collaborators.locator.clone();
        let reconciler = Reconciler::new(shared.clone(), collaborators, queue.downgrade());
        let worker = tokio::spawn(reconciler.run(rx));

        Self {
            handle: SupervisorHandle {
                queue,
                shared,
                locator,
            },
            worker,
            ticker: None,
        }
    }

    pub fn handle(&self) -> &SupervisorHandle {
        &self.handle
    }

    /// (Re)arm the periodic schedule evaluation; replaces any previous ticker
    pub fn arm_schedule(&mut self, period: Duration) {
        self.disarm_schedule();
        self.ticker = Some(ScheduleTicker::start(self.handle.clone(), period));
    }

    pub fn disarm_schedule(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.stop();
        }
    }

    pub fn is_schedule_armed(&self) -> bool {
        self.ticker.is_some()
    }

    /// Stop the ticker, finish queued jobs and join the reconciliation task
    ///
    /// With `stop_worker` the worker is stopped as if the user disabled it;
    /// otherwise it is left running for the next session to pick up.
    pub async fn shutdown(mut self, stop_worker: bool) -> Result<(), SupervisorError> {
        self.disarm_schedule();
        let ticket = self.handle.enqueue(Job::Shutdown {
            stop_worker,
            config: self.handle.config(),
        });
        let result = ticket.wait().await;
        let _ = self.worker.await;
        result
    }
}
