//! Service supervisor.
//!
//! Loads unit files, starts the bus broker, runs services stage by stage
//! with dependency waits, monitors daemons, and answers list/status
//! queries over the bus.

pub mod rpc;
pub mod unit;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::task::{JoinHandle, JoinSet};

use crate::bus::frame::SYSTEM_BUS_PATH;
use unit::{Kind, ServiceUnit, Stage, UnitState};

/// Supervisor log, rotated on every boot.
pub const JOURNAL_PATH: &str = "/cache/log/journal";
/// Unit file directory.
pub const SERVICES_PATH: &str = "/config/services.d";
/// Name of the service that provides the bus broker.
const BUS_SERVICE: &str = "connect";

const SOCKET_RETRY: u32 = 10;
const SOCKET_DELAY: Duration = Duration::from_millis(10);
const RESTART_DELAY: Duration = Duration::from_secs(1);
const DEPENDENCY_TIMEOUT: Duration = Duration::from_secs(10);
const DEPENDENCY_POLL: Duration = Duration::from_millis(500);

/// A loaded service and its runtime state.
pub struct ServiceEntry {
    pub unit: ServiceUnit,
    state: Mutex<UnitState>,
}

impl ServiceEntry {
    fn new(unit: ServiceUnit) -> Self {
        Self {
            unit,
            state: Mutex::new(UnitState::NotStarted),
        }
    }

    pub fn state(&self) -> UnitState {
        *lock(&self.state)
    }

    fn set_state(&self, next: UnitState) {
        *lock(&self.state) = next;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    #[error("missing required dependency {0}")]
    Missing(String),

    #[error("timeout waiting for dependencies: {0}")]
    Timeout(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("service {0} has no command")]
    NoCommand(String),

    #[error("failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct Supervisor {
    /// Append-only during load, read-only afterwards.
    services: Vec<Arc<ServiceEntry>>,
    shutting_down: AtomicBool,
    journal: Option<File>,
    monitors: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(journal: Option<File>) -> Self {
        Self {
            services: Vec::new(),
            shutting_down: AtomicBool::new(false),
            journal,
            monitors: Mutex::new(Vec::new()),
        }
    }

    /// Rotate the previous journal to `.old` and open a fresh one.
    /// Returns None when it cannot be opened; logging then stays on
    /// stdout.
    pub fn open_journal(path: &Path) -> Option<File> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if path.exists() {
            if let Err(e) = std::fs::rename(path, path.with_extension("old")) {
                eprintln!("initd: failed to rotate journal: {}", e);
            }
        }
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("initd: failed to open journal {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Load every `*.service` unit from a directory, sorted by file name.
    /// Templates are skipped; bad files are logged and skipped.
    pub async fn load_units(&mut self, dir: &Path) -> std::io::Result<usize> {
        let mut paths: Vec<PathBuf> = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "service") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            match unit::load_unit(&path).await {
                Ok(unit) if unit.template => {
                    log::debug!("skipping template unit {}", unit.name);
                }
                Ok(unit) => {
                    self.services.push(Arc::new(ServiceEntry::new(unit)));
                    loaded += 1;
                }
                Err(e) => {
                    log::warn!("failed to load service {}: {}", path.display(), e);
                }
            }
        }
        Ok(loaded)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ServiceEntry>> {
        self.services.iter().find(|entry| entry.unit.name == name)
    }

    pub fn services(&self) -> &[Arc<ServiceEntry>] {
        &self.services
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services
            .iter()
            .map(|entry| entry.unit.name.clone())
            .collect()
    }

    /// State string for a service; `"unknown"` when no such service.
    pub fn status_of(&self, name: &str) -> &'static str {
        match self.get(name) {
            Some(entry) => entry.state().as_str(),
            None => "unknown",
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Monitors stop restarting daemons at their next exit.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Full bring-up: start the bus broker, keep the RPC endpoint alive,
    /// run the stages in order, then wait for daemon monitors to drain.
    pub async fn startup(self: Arc<Self>) {
        if let Some(bus) = self.get(BUS_SERVICE) {
            let bus = Arc::clone(bus);
            Arc::clone(&self).run_service(bus).await;
        }
        self.wait_for_bus_socket().await;

        let su = Arc::clone(&self);
        tokio::spawn(async move {
            loop {
                match rpc::serve(&su).await {
                    Ok(()) => break,
                    Err(e) => {
                        if su.is_shutting_down() {
                            break;
                        }
                        log::warn!("init endpoint lost: {}; reconnecting", e);
                        tokio::time::sleep(SOCKET_DELAY).await;
                    }
                }
            }
        });

        for stage in Stage::ALL {
            Arc::clone(&self).run_stage(stage).await;
        }

        let monitors = std::mem::take(&mut *lock(&self.monitors));
        for handle in monitors {
            let _ = handle.await;
        }
    }

    async fn wait_for_bus_socket(&self) {
        for _ in 0..SOCKET_RETRY {
            if tokio::net::UnixStream::connect(SYSTEM_BUS_PATH).await.is_ok() {
                log::info!("bus socket is ready");
                return;
            }
            tokio::time::sleep(SOCKET_DELAY).await;
        }
        log::warn!("bus socket did not appear; continuing without it");
    }

    /// Run every service of one stage concurrently and wait for the stage
    /// to settle: oneshots terminal, daemons running with their monitors
    /// handed off.
    pub async fn run_stage(self: Arc<Self>, stage: Stage) {
        let mut tasks = JoinSet::new();
        // Services already started out of band (the bus broker) are not
        // started twice.
        for entry in self
            .services
            .iter()
            .filter(|e| e.unit.stage == stage && e.state() == UnitState::NotStarted)
        {
            let su = Arc::clone(&self);
            let entry = Arc::clone(entry);
            tasks.spawn(async move {
                if let Err(e) = su.wait_for_depends(&entry).await {
                    log::error!("dependencies not met for {}: {}", entry.unit.name, e);
                    entry.set_state(UnitState::Failed);
                    return;
                }
                su.run_service(entry).await;
            });
        }
        while tasks.join_next().await.is_some() {}
        log::info!("stage {} complete", stage.as_str());
    }

    /// Poll until every dependency is Running or Finished. A dependency
    /// that is not a known service fails immediately.
    async fn wait_for_depends(&self, entry: &ServiceEntry) -> Result<(), DependencyError> {
        if entry.unit.depends.is_empty() {
            return Ok(());
        }

        let mut pending = Vec::new();
        for name in &entry.unit.depends {
            match self.get(name) {
                Some(dep) => pending.push(Arc::clone(dep)),
                None => return Err(DependencyError::Missing(name.clone())),
            }
        }

        let deadline = tokio::time::Instant::now() + DEPENDENCY_TIMEOUT;
        loop {
            tokio::time::sleep(DEPENDENCY_POLL).await;
            pending.retain(|dep| !dep.state().satisfies_dependency());
            if pending.is_empty() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                let names: Vec<&str> = pending.iter().map(|dep| dep.unit.name.as_str()).collect();
                return Err(DependencyError::Timeout(names.join(", ")));
            }
        }
    }

    /// Start one service. Oneshots are waited for here; daemons are handed
    /// to a monitor task. Spawn failures with Restart=yes retry forever at
    /// one-second intervals.
    async fn run_service(self: Arc<Self>, entry: Arc<ServiceEntry>) {
        loop {
            log::info!("starting service {}", entry.unit.name);
            entry.set_state(UnitState::Started);

            let child = match self.spawn(&entry.unit) {
                Ok(child) => child,
                Err(e) => {
                    log::error!("failed to start {}: {}", entry.unit.name, e);
                    entry.set_state(UnitState::Failed);
                    if !entry.unit.restart {
                        return;
                    }
                    tokio::time::sleep(RESTART_DELAY).await;
                    continue;
                }
            };
            entry.set_state(UnitState::Running);

            match entry.unit.kind {
                Kind::Oneshot => {
                    wait_oneshot(&entry, child).await;
                    return;
                }
                Kind::Daemon => {
                    let su = Arc::clone(&self);
                    let daemon = Arc::clone(&entry);
                    let handle = tokio::spawn(async move { su.monitor(daemon, child).await });
                    lock(&self.monitors).push(handle);
                    return;
                }
            }
        }
    }

    /// Watch a daemon: record its exits and restart it with backoff until
    /// Restart says no or the supervisor is shutting down. A failed
    /// respawn is terminal.
    async fn monitor(&self, entry: Arc<ServiceEntry>, mut child: Child) {
        loop {
            match child.wait().await {
                Ok(status) if status.success() => {
                    log::info!("daemon {} exited cleanly", entry.unit.name);
                    entry.set_state(UnitState::Finished);
                }
                Ok(status) => {
                    log::error!("daemon {} exited with {}", entry.unit.name, status);
                    entry.set_state(UnitState::Failed);
                }
                Err(e) => {
                    log::error!("daemon {}: wait failed: {}", entry.unit.name, e);
                    entry.set_state(UnitState::Failed);
                }
            }

            if self.is_shutting_down() || !entry.unit.restart {
                return;
            }

            log::info!("restarting daemon {}", entry.unit.name);
            tokio::time::sleep(RESTART_DELAY).await;
            match self.spawn(&entry.unit) {
                Ok(next) => {
                    child = next;
                    entry.set_state(UnitState::Running);
                }
                Err(e) => {
                    log::error!("failed to restart {}: {}", entry.unit.name, e);
                    entry.set_state(UnitState::Failed);
                    return;
                }
            }
        }
    }

    /// Spawn a service command with stdout/stderr on the journal.
    fn spawn(&self, unit: &ServiceUnit) -> Result<Child, SpawnError> {
        let (program, args) = unit
            .command
            .split_first()
            .ok_or_else(|| SpawnError::NoCommand(unit.name.clone()))?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdin(Stdio::null());

        match self.journal.as_ref() {
            Some(journal) => match (journal.try_clone(), journal.try_clone()) {
                (Ok(out), Ok(err)) => {
                    cmd.stdout(Stdio::from(out));
                    cmd.stderr(Stdio::from(err));
                }
                _ => {
                    cmd.stdout(Stdio::inherit());
                    cmd.stderr(Stdio::inherit());
                }
            },
            None => {
                cmd.stdout(Stdio::inherit());
                cmd.stderr(Stdio::inherit());
            }
        }

        cmd.spawn().map_err(|e| SpawnError::Spawn {
            name: unit.name.clone(),
            source: e,
        })
    }
}

async fn wait_oneshot(entry: &ServiceEntry, mut child: Child) {
    match child.wait().await {
        Ok(status) if status.success() => entry.set_state(UnitState::Finished),
        Ok(status) => {
            log::error!("oneshot {} exited with {}", entry.unit.name, status);
            entry.set_state(UnitState::Failed);
        }
        Err(e) => {
            log::error!("oneshot {}: wait failed: {}", entry.unit.name, e);
            entry.set_state(UnitState::Failed);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
