// cloudrestore/src/telemetry.rs
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::error;
use uuid::Uuid;

use crate::errors::RestoreError;

/// Error reporting sink. Reporting never fails and never blocks the caller
/// on anything but local I/O.
pub trait TelemetrySink: Send + Sync {
    fn report(&self, error: &RestoreError);
}

#[derive(Serialize)]
struct ErrorRecord<'a> {
    timestamp: String,
    session_id: Uuid,
    kind: &'a str,
    message: String,
}

pub struct TracingTelemetry {
    session_id: Uuid,
    log_path: Option<PathBuf>,
}

impl TracingTelemetry {
    pub fn new(session_id: Uuid, log_path: Option<PathBuf>) -> Self {
        TracingTelemetry {
            session_id,
            log_path,
        }
    }

    fn append(&self, path: &Path, err: &RestoreError) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let record = ErrorRecord {
            timestamp: Utc::now().to_rfc3339(),
            session_id: self.session_id,
            kind: err.kind(),
            message: err.to_string(),
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(&line)
    }
}

impl TelemetrySink for TracingTelemetry {
    fn report(&self, err: &RestoreError) {
        error!(session = %self.session_id, kind = err.kind(), "{}", err);
        if let Some(path) = &self.log_path {
            // Telemetry must not affect the restore; a failed write is dropped.
            let _ = self.append(path, err);
        }
    }
}
