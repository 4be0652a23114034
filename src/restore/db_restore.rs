// cloudrestore/src/restore/db_restore.rs
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::remove_if_present;
use super::waiter::{Materialization, MaterializationWaiter};
use crate::config::BACKUP_DATABASE_NAME;
use crate::errors::{IoContext, RestoreError};
use crate::remote::BackupLocation;

/// The open connection to the primary database, if any.
pub trait DatabaseHandle: Send {
    fn is_open(&self) -> bool;

    /// Releases the file. Closing an already closed handle does nothing.
    fn close(&mut self) -> Result<(), RestoreError>;

    /// Opens the database at `path` again, after it has been replaced.
    fn reopen(&mut self, path: &Path) -> Result<(), RestoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DatabaseStatus {
    Restored { bytes: u64 },
    /// No database in the backup location; first-time setup.
    NoBackup,
    /// The local database already matches the materialized backup.
    AlreadyCurrent,
}

enum Step {
    ReleaseHandle,
    DeleteLocal,
    AwaitRemote,
    Copy(PathBuf),
    Done(DatabaseStatus),
}

/// Replaces the local primary database with the backup copy.
pub struct DatabaseRestorer<'a> {
    waiter: &'a MaterializationWaiter,
    local_path: &'a Path,
}

impl<'a> DatabaseRestorer<'a> {
    pub fn new(waiter: &'a MaterializationWaiter, local_path: &'a Path) -> Self {
        DatabaseRestorer { waiter, local_path }
    }

    pub fn restore(
        &self,
        location: &BackupLocation,
        handle: &mut dyn DatabaseHandle,
        token: &CancellationToken,
    ) -> Result<DatabaseStatus, RestoreError> {
        let mut step = if self.local_path.exists() {
            if self.matches_materialized_backup(location)? {
                Step::Done(DatabaseStatus::AlreadyCurrent)
            } else {
                Step::ReleaseHandle
            }
        } else {
            Step::AwaitRemote
        };

        loop {
            step = match step {
                Step::ReleaseHandle => {
                    if handle.is_open() {
                        debug!("Closing database handle before replacing {}", self.local_path.display());
                        handle.close()?;
                    }
                    Step::DeleteLocal
                }
                Step::DeleteLocal => {
                    remove_if_present(self.local_path).io_context(|| {
                        format!("Failed to delete local database {}", self.local_path.display())
                    })?;
                    Step::AwaitRemote
                }
                Step::AwaitRemote => {
                    let remote = location.file(BACKUP_DATABASE_NAME);
                    match self.waiter.wait(&remote, token)? {
                        Materialization::Absent => {
                            info!("No database backup found, nothing to restore");
                            Step::Done(DatabaseStatus::NoBackup)
                        }
                        Materialization::Ready(path) => Step::Copy(path),
                    }
                }
                Step::Copy(source) => {
                    let bytes = self.copy_into_place(&source)?;
                    Step::Done(DatabaseStatus::Restored { bytes })
                }
                Step::Done(status) => return Ok(status),
            };
        }
    }

    /// Fast path for re-runs: only looks at a backup that is already
    /// materialized, never requests one.
    fn matches_materialized_backup(&self, location: &BackupLocation) -> Result<bool, RestoreError> {
        let probe = self.waiter.probe();
        let remote = location.file(BACKUP_DATABASE_NAME);
        if !probe.exists(&remote) {
            return Ok(false);
        }
        let materialized = probe
            .is_materialized(&remote)
            .io_context(|| format!("Failed to check materialization of {}", remote.name()))?;
        if !materialized {
            return Ok(false);
        }
        let source = probe.local_path(&remote);
        files_identical(&source, self.local_path)
            .io_context(|| format!("Failed to compare {} with local database", source.display()))
    }

    /// Copies into a temp file beside the canonical path and persists it, so
    /// the canonical path never holds a partial copy.
    fn copy_into_place(&self, source: &Path) -> Result<u64, RestoreError> {
        let parent = self.local_path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .io_context(|| format!("Failed to create {}", parent.display()))?;

        let mut reader = File::open(source)
            .io_context(|| format!("Failed to open database backup {}", source.display()))?;
        let mut staged = NamedTempFile::new_in(parent)
            .io_context(|| format!("Failed to create temp file in {}", parent.display()))?;
        let bytes = io::copy(&mut reader, staged.as_file_mut()).io_context(|| {
            format!(
                "Failed to copy {} to {}",
                source.display(),
                self.local_path.display()
            )
        })?;
        staged
            .as_file()
            .sync_all()
            .io_context(|| format!("Failed to flush {}", staged.path().display()))?;

        remove_if_present(self.local_path).io_context(|| {
            format!("Failed to delete stale database {}", self.local_path.display())
        })?;
        staged
            .persist(self.local_path)
            .map_err(|e| e.error)
            .io_context(|| format!("Failed to move database into {}", self.local_path.display()))?;

        info!(
            "✓ Restored database ({} bytes) to {}",
            bytes,
            self.local_path.display()
        );
        Ok(bytes)
    }
}

fn files_identical(a: &Path, b: &Path) -> io::Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }
    let mut left = BufReader::new(File::open(a)?);
    let mut right = BufReader::new(File::open(b)?);
    let mut left_buf = [0u8; 8192];
    let mut right_buf = [0u8; 8192];
    loop {
        let n = left.read(&mut left_buf)?;
        if n == 0 {
            return Ok(true);
        }
        right.read_exact(&mut right_buf[..n])?;
        if left_buf[..n] != right_buf[..n] {
            return Ok(false);
        }
    }
}
