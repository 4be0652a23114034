pub(crate) mod archive;
pub(crate) mod database;
pub(crate) mod db_restore;
pub(crate) mod flags;
pub(crate) mod logic;
pub(crate) mod media;
pub(crate) mod progress;
pub(crate) mod waiter;

use anyhow::{Context, Result};
use std::fs;
use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::presentation::{self, ConsoleRouter, ConsoleView};
use crate::remote::synced_folder::SyncedFolderStore;
use crate::telemetry::TracingTelemetry;
use archive::TarGzExtractor;
use database::SqliteDatabase;
use flags::{FlagStore, JsonFlagStore};
use logic::{Outcome, RestoreInputs, RestoreOrchestrator, SessionReport};
use waiter::SystemClock;

/// Deletes `path`; a file that is already gone is not an error.
pub(crate) fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Wires the concrete collaborators into an orchestrator for one session.
async fn build_orchestrator(
    app_config: &AppConfig,
    events: Arc<dyn presentation::EventSink>,
) -> Result<RestoreOrchestrator> {
    let config = app_config.restore.clone();
    let session_id = Uuid::new_v4();

    let flag_store = JsonFlagStore::new(config.layout.flags_path());
    let flags = flag_store
        .load()
        .context("Failed to read restore flags")?;

    let store = Arc::new(SyncedFolderStore::new(
        config.container_root.clone(),
        config.cache_root.clone(),
        config.identity_token.clone(),
    ));

    let database = SqliteDatabase::open_existing(Handle::current(), config.layout.database_path())
        .await
        .context("Failed to open local database")?;

    let telemetry_log = config
        .telemetry_log
        .then(|| config.layout.telemetry_log_path());

    Ok(RestoreOrchestrator::new(RestoreInputs {
        session_id,
        flags,
        flag_store: Box::new(flag_store),
        container: store.clone(),
        probe: store,
        clock: Arc::new(SystemClock),
        extractor: Box::new(TarGzExtractor),
        database: Box::new(database),
        telemetry: Arc::new(TracingTelemetry::new(session_id, telemetry_log)),
        events,
        config,
    }))
}

/// Runs a restore session on a blocking worker while this task renders
/// progress. Ctrl-C cancels the session.
pub async fn run_restore_flow(app_config: &AppConfig) -> Result<SessionReport> {
    let (sender, mut receiver) = presentation::event_channel();
    let orchestrator = build_orchestrator(app_config, Arc::new(sender)).await?;
    info!(session = %orchestrator.session().id, "Starting restore");

    let token = CancellationToken::new();
    let worker = presentation::spawn_session(orchestrator, token.clone());

    let mut view = ConsoleView::new();
    let mut router = ConsoleRouter;
    let drive = presentation::drive(&mut receiver, &mut view, &mut router);
    supervise(drive, &token, tokio::signal::ctrl_c).await;

    worker.await.context("Restore worker panicked")
}

/// Waits for `drive` to finish, cancelling `token` the first time
/// `interrupt` fires. If the interrupt source fails, it is not polled again.
async fn supervise<D, F, S>(drive: D, token: &CancellationToken, mut interrupt: F) -> Option<Outcome>
where
    D: Future<Output = Option<Outcome>>,
    F: FnMut() -> S,
    S: Future<Output = io::Result<()>>,
{
    tokio::pin!(drive);
    let mut listening = true;

    loop {
        tokio::select! {
            outcome = &mut drive => return outcome,
            signal = interrupt(), if listening && !token.is_cancelled() => {
                match signal {
                    Ok(()) => {
                        warn!("Cancellation requested, stopping at the next poll");
                        token.cancel();
                    }
                    Err(e) => {
                        warn!("Failed to listen for Ctrl-C, cancellation disabled: {}", e);
                        listening = false;
                    }
                }
            }
        }
    }
}

/// Skips the restore and clears the pending flags.
pub async fn run_skip_flow(app_config: &AppConfig) -> Result<SessionReport> {
    let (sender, mut receiver) = presentation::event_channel();
    let orchestrator = build_orchestrator(app_config, Arc::new(sender)).await?;
    let report = orchestrator.skip();

    let mut view = ConsoleView::new();
    presentation::drive(&mut receiver, &mut view, &mut ConsoleRouter).await;
    Ok(report)
}
