// cloudrestore/src/restore/logic.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::archive::ArchiveExtractor;
use super::db_restore::{DatabaseHandle, DatabaseRestorer, DatabaseStatus};
use super::flags::{FlagStore, RestoreFlags};
use super::media::{ArchiveRestorer, CategoryReport, RESTORE_ORDER};
use super::progress::{ProgressAggregator, StageId};
use super::waiter::{Clock, MaterializationWaiter};
use crate::config::RestoreConfig;
use crate::errors::{FailureReason, RestoreError};
use crate::presentation::{EventSink, RestoreEvent};
use crate::remote::{BackupLocation, CloudContainer, RemoteFileProbe};
use crate::telemetry::TelemetrySink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    CheckingPreconditions,
    RestoringDatabase,
    RestoringMedia,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Skipped,
    Failed { reason: FailureReason },
}

impl Outcome {
    fn phase(&self) -> Phase {
        match self {
            Outcome::Completed => Phase::Completed,
            Outcome::Skipped => Phase::Skipped,
            Outcome::Failed { .. } => Phase::Failed,
        }
    }
}

/// Run-state of one restore attempt.
#[derive(Debug)]
pub struct RestoreSession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    phase: Phase,
    outcome: Option<Outcome>,
}

impl RestoreSession {
    pub fn new(id: Uuid) -> Self {
        RestoreSession {
            id,
            started_at: Utc::now(),
            phase: Phase::Idle,
            outcome: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn advance(&mut self, phase: Phase) {
        info!(session = %self.id, from = ?self.phase, to = ?phase, "restore phase");
        self.phase = phase;
    }

    /// Records the outcome. Only the first call has any effect.
    fn finish(&mut self, outcome: Outcome) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.advance(outcome.phase());
        self.outcome = Some(outcome);
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub database: Option<DatabaseStatus>,
    pub categories: Vec<CategoryReport>,
    pub progress: f64,
}

/// Everything a session needs, supplied up front.
pub struct RestoreInputs {
    pub session_id: Uuid,
    pub config: RestoreConfig,
    pub flags: RestoreFlags,
    pub flag_store: Box<dyn FlagStore>,
    pub container: Arc<dyn CloudContainer>,
    pub probe: Arc<dyn RemoteFileProbe>,
    pub clock: Arc<dyn Clock>,
    pub extractor: Box<dyn ArchiveExtractor>,
    pub database: Box<dyn DatabaseHandle>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub events: Arc<dyn EventSink>,
}

pub struct RestoreOrchestrator {
    session: RestoreSession,
    config: RestoreConfig,
    flags: RestoreFlags,
    flag_store: Box<dyn FlagStore>,
    container: Arc<dyn CloudContainer>,
    waiter: MaterializationWaiter,
    extractor: Box<dyn ArchiveExtractor>,
    database: Box<dyn DatabaseHandle>,
    telemetry: Arc<dyn TelemetrySink>,
    events: Arc<dyn EventSink>,
    progress: ProgressAggregator,
    database_status: Option<DatabaseStatus>,
    categories: Vec<CategoryReport>,
}

impl RestoreOrchestrator {
    pub fn new(inputs: RestoreInputs) -> Self {
        let waiter = MaterializationWaiter::new(
            inputs.probe,
            inputs.clock,
            inputs.config.poll_interval,
        );
        RestoreOrchestrator {
            session: RestoreSession::new(inputs.session_id),
            progress: ProgressAggregator::new(Arc::clone(&inputs.events)),
            config: inputs.config,
            flags: inputs.flags,
            flag_store: inputs.flag_store,
            container: inputs.container,
            waiter,
            extractor: inputs.extractor,
            database: inputs.database,
            telemetry: inputs.telemetry,
            events: inputs.events,
            database_status: None,
            categories: Vec::new(),
        }
    }

    pub fn session(&self) -> &RestoreSession {
        &self.session
    }

    /// Runs the whole pipeline. Blocking; call it from a worker thread.
    pub fn run(mut self, token: &CancellationToken) -> SessionReport {
        self.session.advance(Phase::CheckingPreconditions);

        if !self.flags.any_pending() {
            info!("No restore pending for account {}", self.config.account_id);
            return self.conclude(Outcome::Skipped);
        }

        let location = match self.check_preconditions() {
            Ok(location) => location,
            Err(e) => return self.fail(e),
        };

        self.session.advance(Phase::RestoringDatabase);
        self.progress.report(StageId::DatabaseDownload, 1.0);
        let database_path = self.config.layout.database_path();
        let restorer = DatabaseRestorer::new(&self.waiter, &database_path);
        match restorer.restore(&location, self.database.as_mut(), token) {
            Ok(status) => self.database_status = Some(status),
            Err(e) => return self.fail(e),
        }
        self.progress.report(StageId::DatabaseRestore, 1.0);

        self.session.advance(Phase::RestoringMedia);
        let restorer = ArchiveRestorer::new(
            &self.waiter,
            self.extractor.as_ref(),
            &self.config.layout,
            self.telemetry.as_ref(),
        );
        for category in RESTORE_ORDER {
            let report = restorer.restore_category(category, &location, token, &mut self.progress);
            self.categories.push(report);
        }

        // First-time setup without a backup leaves no database to open.
        if database_path.exists() {
            if let Err(e) = self.database.reopen(&database_path) {
                return self.fail(e);
            }
        } else {
            info!("No local database at {}; handle stays closed", database_path.display());
        }
        if let Err(e) = self.flag_store.clear() {
            warn!("Restore finished but flags were not cleared: {}", e);
            self.telemetry.report(&e);
        }
        self.conclude(Outcome::Completed)
    }

    /// Bypasses the pipeline at the user's request.
    pub fn skip(mut self) -> SessionReport {
        info!("Restore skipped for account {}", self.config.account_id);
        if let Err(e) = self.flag_store.clear() {
            self.telemetry.report(&e);
        }
        self.conclude(Outcome::Skipped)
    }

    fn check_preconditions(&self) -> Result<BackupLocation, RestoreError> {
        if self.container.identity_token().is_none() {
            return Err(RestoreError::PreconditionUnmet(
                "no cloud identity is signed in".to_string(),
            ));
        }
        self.container
            .backup_location(&self.config.account_id)
            .ok_or_else(|| {
                RestoreError::PreconditionUnmet(format!(
                    "backup location for account {} is not available",
                    self.config.account_id
                ))
            })
    }

    fn fail(self, err: RestoreError) -> SessionReport {
        warn!("Restore failed: {}", err);
        self.telemetry.report(&err);
        let reason = FailureReason::from(&err);
        self.conclude(Outcome::Failed { reason })
    }

    fn conclude(mut self, outcome: Outcome) -> SessionReport {
        if self.session.finish(outcome.clone()) {
            self.events.send(RestoreEvent::Finished(outcome.clone()));
        }
        SessionReport {
            session_id: self.session.id,
            started_at: self.session.started_at,
            finished_at: Utc::now(),
            outcome,
            database: self.database_status,
            categories: self.categories,
            progress: self.progress.current(),
        }
    }
}
