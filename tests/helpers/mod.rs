//! In-memory collaborators for driving the supervisor without real processes
#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;
use tokio::sync::oneshot;

use nightshade::config::SettingsStore;
use nightshade::error::{LocationError, SupervisorError};
use nightshade::launchd::LoginItemManager;
use nightshade::location::{LocationResolver, Locator};
use nightshade::logging::AgentLogger;
use nightshade::models::{ConfigurationSnapshot, Coordinates, SupervisorState};
use nightshade::worker::{ProcessLauncher, ProcessProbe, WorkerExit, WorkerHandle};
use nightshade::{Collaborators, Supervisor, SupervisorHandle};

/// Simulated process table shared by the fake probe and launcher
#[derive(Default)]
pub struct World {
    processes: Mutex<HashMap<String, usize>>,
    events: Mutex<Vec<String>>,
}

impl World {
    pub fn count(&self, name: &str) -> usize {
        self.processes.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    /// A process this supervisor did not launch
    pub fn add_stray(&self, name: &str) {
        *self.processes.lock().unwrap().entry(name.to_string()).or_default() += 1;
    }

    fn remove_one(&self, name: &str) {
        if let Some(count) = self.processes.lock().unwrap().get_mut(name) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

pub struct FakeProbe {
    world: Arc<World>,
    pub fail: AtomicBool,
}

impl ProcessProbe for FakeProbe {
    fn is_running(&self, name: &str) -> Result<bool, SupervisorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SupervisorError::ProbeFailed("pgrep exited with status 3".to_string()));
        }
        Ok(self.world.count(name) > 0)
    }

    fn kill_all(&self, name: &str) -> Result<(), SupervisorError> {
        self.world.record(format!("kill_all:{}", name));
        self.world.processes.lock().unwrap().remove(name);
        Ok(())
    }
}

type ExitSenders = Arc<Mutex<HashMap<u32, oneshot::Sender<WorkerExit>>>>;

pub struct FakeLauncher {
    world: Arc<World>,
    next_pid: AtomicU32,
    exits: ExitSenders,
    starts: Mutex<Vec<Vec<String>>>,
    one_shots: Mutex<Vec<Vec<String>>>,
    /// Refuse every `start` as the OS would on a spawn error
    pub fail: AtomicBool,
}

impl FakeLauncher {
    pub fn starts(&self) -> Vec<Vec<String>> {
        self.starts.lock().unwrap().clone()
    }

    pub fn one_shots(&self) -> Vec<Vec<String>> {
        self.one_shots.lock().unwrap().clone()
    }

    /// Make the worker with `pid` exit on its own
    pub fn exit(&self, pid: u32, name: &str, code: i32) {
        if let Some(tx) = self.exits.lock().unwrap().remove(&pid) {
            self.world.remove_one(name);
            let _ = tx.send(WorkerExit::Exited { code: Some(code) });
        }
    }
}

impl ProcessLauncher for FakeLauncher {
    fn start(&self, executable: &Path, args: &[String]) -> Result<WorkerHandle, SupervisorError> {
        if self.fail.load(Ordering::SeqCst) {
            self.world.record("start_failed");
            return Err(SupervisorError::LaunchFailed {
                path: executable.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "Permission denied"),
            });
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let name = nightshade::models::worker_name_for(executable);

        let (tx, rx) = oneshot::channel();
        self.exits.lock().unwrap().insert(pid, tx);
        self.world.add_stray(&name);
        self.world.record(format!("start:{}", pid));
        self.starts.lock().unwrap().push(args.to_vec());

        let world = self.world.clone();
        let exits = self.exits.clone();
        Ok(WorkerHandle::new(pid, rx, move || {
            if let Some(tx) = exits.lock().unwrap().remove(&pid) {
                world.record(format!("terminate:{}", pid));
                world.remove_one(&name);
                let _ = tx.send(WorkerExit::Exited { code: None });
            }
        }))
    }

    fn fire_and_forget(&self, _executable: &Path, args: &[String]) -> Result<(), SupervisorError> {
        self.world.record(format!("oneshot:{}", args.join(" ")));
        self.one_shots.lock().unwrap().push(args.to_vec());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    saved: Mutex<Option<ConfigurationSnapshot>>,
    pub fail: AtomicBool,
}

impl MemoryStore {
    pub fn saved(&self) -> Option<ConfigurationSnapshot> {
        self.saved.lock().unwrap().clone()
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self) -> ConfigurationSnapshot {
        self.saved().unwrap_or_default()
    }

    fn save(&self, snapshot: &ConfigurationSnapshot) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        *self.saved.lock().unwrap() = Some(snapshot.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingLoginItems {
    calls: Mutex<Vec<String>>,
}

impl RecordingLoginItems {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl LoginItemManager for RecordingLoginItems {
    fn install(&self, executable: &Path) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("install:{}", executable.display()));
    }

    fn uninstall(&self) {
        self.calls.lock().unwrap().push("uninstall".to_string());
    }
}

/// Resolver that takes a while and then answers with fixed coordinates
pub struct SlowResolver {
    pub delay: Duration,
    pub result: Result<Coordinates, LocationError>,
}

impl LocationResolver for SlowResolver {
    fn resolve(&self) -> Result<Coordinates, LocationError> {
        std::thread::sleep(self.delay);
        self.result.clone()
    }
}

/// A supervisor wired to fakes, plus a real worker binary file on disk
pub struct Harness {
    pub supervisor: Supervisor,
    pub world: Arc<World>,
    pub probe: Arc<FakeProbe>,
    pub launcher: Arc<FakeLauncher>,
    pub store: Arc<MemoryStore>,
    pub login_items: Arc<RecordingLoginItems>,
    pub binary: PathBuf,
    _dir: TempDir,
}

pub struct HarnessBuilder {
    dir: TempDir,
    binary: PathBuf,
    config: ConfigurationSnapshot,
    locator: Option<Locator>,
    strays: usize,
}

impl Harness {
    /// Starts from an astronomical snapshot whose worker binary exists on disk
    pub fn builder() -> HarnessBuilder {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("redshift");
        fs::write(&binary, "#!/bin/sh\n").unwrap();

        let config = ConfigurationSnapshot {
            worker_binary_path: binary.clone(),
            latitude: "52.52".to_string(),
            longitude: "13.40".to_string(),
            ..ConfigurationSnapshot::default()
        };
        HarnessBuilder {
            dir,
            binary,
            config,
            locator: None,
            strays: 0,
        }
    }

    pub fn handle(&self) -> &SupervisorHandle {
        self.supervisor.handle()
    }

    pub fn config(&self) -> ConfigurationSnapshot {
        self.handle().config()
    }

    pub fn worker_count(&self) -> usize {
        self.world.count("redshift")
    }
}

impl HarnessBuilder {
    pub fn config(mut self, edit: impl FnOnce(&mut ConfigurationSnapshot)) -> Self {
        edit(&mut self.config);
        self
    }

    pub fn locator(mut self, resolver: SlowResolver, timeout: Duration) -> Self {
        self.locator = Some(Locator::new(Arc::new(resolver), timeout));
        self
    }

    pub fn strays(mut self, count: usize) -> Self {
        self.strays = count;
        self
    }

    /// Must be called inside a tokio runtime
    pub fn spawn(self) -> Harness {
        let world = Arc::new(World::default());
        for _ in 0..self.strays {
            world.add_stray("redshift");
        }
        let probe = Arc::new(FakeProbe {
            world: world.clone(),
            fail: AtomicBool::new(false),
        });
        let launcher = Arc::new(FakeLauncher {
            world: world.clone(),
            next_pid: AtomicU32::new(1000),
            exits: Arc::new(Mutex::new(HashMap::new())),
            starts: Mutex::new(Vec::new()),
            one_shots: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        });
        let store = Arc::new(MemoryStore::default());
        let login_items = Arc::new(RecordingLoginItems::default());

        let supervisor = Supervisor::spawn(
            self.config,
            Collaborators {
                probe: probe.clone(),
                launcher: launcher.clone(),
                store: store.clone(),
                login_items: login_items.clone(),
                locator: self.locator,
                logger: AgentLogger::new("test"),
                executable: PathBuf::from("/Applications/Nightshade.app/Contents/MacOS/nightshade"),
            },
        );

        Harness {
            supervisor,
            world,
            probe,
            launcher,
            store,
            login_items,
            binary: self.binary,
            _dir: self.dir,
        }
    }
}

/// Wait (bounded) until the published state satisfies `predicate`
pub async fn wait_for_state(
    handle: &SupervisorHandle,
    predicate: impl FnMut(&SupervisorState) -> bool,
) -> SupervisorState {
    let mut rx = handle.subscribe();
    let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for supervisor state")
        .expect("supervisor state channel closed");
    state.clone()
}
