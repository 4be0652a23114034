//! Fakes shared by the unit tests.
use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tar::Builder;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::errors::RestoreError;
use crate::presentation::{EventSink, RestoreEvent};
use crate::remote::{BackupLocation, CloudContainer, RemoteFile, RemoteFileProbe};
use crate::restore::db_restore::DatabaseHandle;
use crate::restore::flags::{FlagStore, RestoreFlags};
use crate::restore::logic::Outcome;
use crate::restore::waiter::Clock;
use crate::telemetry::TelemetrySink;

#[derive(Debug, Default)]
struct ScriptedEntry {
    polls_until_ready: usize,
    polls: usize,
    requested: bool,
    materialized: bool,
}

/// Remote store driven by a script: each object materializes after a fixed
/// number of polls following its materialization request.
pub struct ScriptedProbe {
    root: PathBuf,
    entries: Mutex<HashMap<RemoteFile, ScriptedEntry>>,
    requests: Mutex<Vec<RemoteFile>>,
}

impl ScriptedProbe {
    pub const NEVER: usize = usize::MAX;

    pub fn new(root: &Path) -> Self {
        ScriptedProbe {
            root: root.to_path_buf(),
            entries: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn remote_path(&self, file: &RemoteFile) -> PathBuf {
        self.root.join("remote").join(file.relative())
    }

    pub fn add_remote(&self, file: &RemoteFile, bytes: &[u8], polls_until_ready: usize) -> io::Result<()> {
        let path = self.remote_path(file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        self.entries.lock().unwrap().insert(
            file.clone(),
            ScriptedEntry {
                polls_until_ready,
                ..ScriptedEntry::default()
            },
        );
        Ok(())
    }

    pub fn materialize_now(&self, file: &RemoteFile) -> io::Result<()> {
        self.copy_to_local(file)?;
        if let Some(entry) = self.entries.lock().unwrap().get_mut(file) {
            entry.materialized = true;
        }
        Ok(())
    }

    pub fn set_polls_until_ready(&self, file: &RemoteFile, polls: usize) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(file) {
            entry.polls_until_ready = polls;
            entry.polls = 0;
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request_order(&self) -> Vec<RemoteFile> {
        self.requests.lock().unwrap().clone()
    }

    fn copy_to_local(&self, file: &RemoteFile) -> io::Result<()> {
        let local = self.local_path(file);
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(self.remote_path(file), local).map(|_| ())
    }
}

impl RemoteFileProbe for ScriptedProbe {
    fn exists(&self, file: &RemoteFile) -> bool {
        self.remote_path(file).is_file()
    }

    fn is_materialized(&self, file: &RemoteFile) -> io::Result<bool> {
        let ready = {
            let mut entries = self.entries.lock().unwrap();
            let Some(entry) = entries.get_mut(file) else {
                return Ok(false);
            };
            if entry.materialized {
                return Ok(true);
            }
            if !entry.requested {
                return Ok(false);
            }
            entry.polls += 1;
            entry.polls >= entry.polls_until_ready
        };
        if ready {
            self.materialize_now(file)?;
        }
        Ok(ready)
    }

    fn request_materialization(&self, file: &RemoteFile) -> io::Result<()> {
        self.requests.lock().unwrap().push(file.clone());
        if let Some(entry) = self.entries.lock().unwrap().get_mut(file) {
            entry.requested = true;
        }
        Ok(())
    }

    fn local_path(&self, file: &RemoteFile) -> PathBuf {
        self.root.join("local").join(file.relative())
    }
}

type TickHook = Box<dyn FnMut() + Send>;

struct ClockState {
    ticks: AtomicUsize,
    slept: Mutex<Duration>,
    cancel_after: Option<(usize, CancellationToken)>,
    hooks: Mutex<Vec<(usize, TickHook)>>,
}

/// Clock that never sleeps; it counts pauses and can cancel a token or run
/// a hook on a given tick.
#[derive(Clone)]
pub struct FakeClock {
    state: Arc<ClockState>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn cancelling_after(ticks: usize, token: CancellationToken) -> Self {
        Self::build(Some((ticks, token)))
    }

    fn build(cancel_after: Option<(usize, CancellationToken)>) -> Self {
        FakeClock {
            state: Arc::new(ClockState {
                ticks: AtomicUsize::new(0),
                slept: Mutex::new(Duration::ZERO),
                cancel_after,
                hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn on_tick(&self, tick: usize, hook: impl FnMut() + Send + 'static) {
        self.state.hooks.lock().unwrap().push((tick, Box::new(hook)));
    }

    pub fn ticks(&self) -> usize {
        self.state.ticks.load(Ordering::SeqCst)
    }

    pub fn slept(&self) -> Duration {
        *self.state.slept.lock().unwrap()
    }
}

impl Clock for FakeClock {
    fn sleep(&self, interval: Duration) {
        let tick = self.state.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        *self.state.slept.lock().unwrap() += interval;
        for (at, hook) in self.state.hooks.lock().unwrap().iter_mut() {
            if *at == tick {
                hook();
            }
        }
        if let Some((after, token)) = &self.state.cancel_after {
            if tick >= *after {
                token.cancel();
            }
        }
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RestoreEvent>>,
}

impl RecordingSink {
    pub fn progress_values(&self) -> Vec<f64> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                RestoreEvent::Progress(v) => Some(*v),
                RestoreEvent::Finished(_) => None,
            })
            .collect()
    }

    pub fn finished(&self) -> Vec<Outcome> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                RestoreEvent::Finished(outcome) => Some(outcome.clone()),
                RestoreEvent::Progress(_) => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn send(&self, event: RestoreEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct RecordingTelemetry {
    reports: Mutex<Vec<String>>,
}

impl RecordingTelemetry {
    pub fn count(&self) -> usize {
        self.reports.lock().unwrap().len()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn report(&self, error: &RestoreError) {
        self.reports.lock().unwrap().push(error.to_string());
    }
}

#[derive(Debug, Default)]
struct DatabaseState {
    open: bool,
    closes: usize,
    reopened: Vec<PathBuf>,
    fail_reopen: bool,
}

#[derive(Clone, Default)]
pub struct FakeDatabase {
    state: Arc<Mutex<DatabaseState>>,
}

impl FakeDatabase {
    pub fn open() -> Self {
        let db = FakeDatabase::default();
        db.state.lock().unwrap().open = true;
        db
    }

    pub fn closed() -> Self {
        FakeDatabase::default()
    }

    pub fn failing_reopen() -> Self {
        let db = FakeDatabase::default();
        db.state.lock().unwrap().fail_reopen = true;
        db
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn reopened_paths(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().reopened.clone()
    }
}

impl DatabaseHandle for FakeDatabase {
    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    fn close(&mut self) -> Result<(), RestoreError> {
        let mut state = self.state.lock().unwrap();
        if state.open {
            state.open = false;
            state.closes += 1;
        }
        Ok(())
    }

    fn reopen(&mut self, path: &Path) -> Result<(), RestoreError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_reopen {
            return Err(RestoreError::Io {
                context: format!("Failed to open {}", path.display()),
                source: io::Error::other("database is locked"),
            });
        }
        state.open = true;
        state.reopened.push(path.to_path_buf());
        Ok(())
    }
}

pub struct FakeContainer {
    account_id: String,
    signed_in: bool,
    has_location: bool,
}

impl FakeContainer {
    pub fn signed_in(account_id: &str) -> Self {
        FakeContainer {
            account_id: account_id.to_string(),
            signed_in: true,
            has_location: true,
        }
    }

    pub fn signed_out() -> Self {
        FakeContainer {
            account_id: String::new(),
            signed_in: false,
            has_location: true,
        }
    }

    pub fn without_location() -> Self {
        FakeContainer {
            account_id: String::new(),
            signed_in: true,
            has_location: false,
        }
    }
}

impl CloudContainer for FakeContainer {
    fn identity_token(&self) -> Option<String> {
        self.signed_in.then(|| "token".to_string())
    }

    fn backup_location(&self, account_id: &str) -> Option<BackupLocation> {
        if !self.has_location {
            return None;
        }
        let account = if self.account_id.is_empty() {
            account_id
        } else {
            &self.account_id
        };
        Some(BackupLocation::for_account(account))
    }
}

#[derive(Clone)]
pub struct MemoryFlagStore {
    flags: Arc<Mutex<RestoreFlags>>,
}

impl MemoryFlagStore {
    pub fn pending() -> Self {
        MemoryFlagStore {
            flags: Arc::new(Mutex::new(RestoreFlags::default())),
        }
    }

    pub fn current(&self) -> RestoreFlags {
        *self.flags.lock().unwrap()
    }
}

impl FlagStore for MemoryFlagStore {
    fn load(&self) -> Result<RestoreFlags, RestoreError> {
        Ok(self.current())
    }

    fn clear(&mut self) -> Result<(), RestoreError> {
        *self.flags.lock().unwrap() = RestoreFlags::CLEARED;
        Ok(())
    }
}

/// Builds a tar.gz from `entries` (relative path, contents).
pub fn tar_gz_bytes(entries: &[(&str, &[u8])]) -> anyhow::Result<Vec<u8>> {
    let source = tempfile::tempdir()?;
    for (name, contents) in entries {
        let path = source.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
    }

    let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for entry in WalkDir::new(source.path()).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        let name = path.strip_prefix(source.path())?;
        if name.as_os_str().is_empty() || !entry.file_type().is_file() {
            continue;
        }
        builder.append_path_with_name(path, name)?;
    }
    Ok(builder.into_inner()?.finish()?)
}

pub fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) -> anyhow::Result<()> {
    fs::write(path, tar_gz_bytes(entries)?)?;
    Ok(())
}
