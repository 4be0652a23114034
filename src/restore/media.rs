// cloudrestore/src/restore/media.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::archive::ArchiveExtractor;
use super::progress::{ProgressAggregator, StageId};
use super::remove_if_present;
use super::waiter::{Materialization, MaterializationWaiter};
use crate::config::LocalLayout;
use crate::errors::{FailureReason, IoContext, RestoreError};
use crate::remote::{BackupLocation, RemoteFile};
use crate::telemetry::TelemetrySink;

/// Media categories that are restored, in restore order. Files and videos
/// are not part of the cloud backup.
pub const RESTORE_ORDER: [MediaCategory; 2] = [MediaCategory::Photos, MediaCategory::Audios];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MediaCategory {
    Photos,
    Audios,
}

impl MediaCategory {
    pub fn dir_name(self) -> &'static str {
        match self {
            MediaCategory::Photos => "Photos",
            MediaCategory::Audios => "Audios",
        }
    }

    /// Name of the category archive inside the backup location.
    pub fn archive_name(self) -> String {
        format!("chat.{}.tar.gz", self.dir_name().to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CategoryOutcome {
    Restored { entries: usize, files: usize },
    NoBackup,
    /// The media directory was already extracted from this exact archive.
    AlreadyCurrent,
    Failed { reason: FailureReason },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryReport {
    pub category: MediaCategory,
    #[serde(flatten)]
    pub outcome: CategoryOutcome,
}

/// Identifies the materialized archive a media directory was extracted from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ArchiveFingerprint {
    len: u64,
    modified: DateTime<Utc>,
}

impl ArchiveFingerprint {
    fn of(path: &Path) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        Ok(ArchiveFingerprint {
            len: meta.len(),
            modified: DateTime::<Utc>::from(meta.modified()?),
        })
    }

    /// A missing or unreadable marker never matches.
    fn read_marker(path: &Path) -> Option<Self> {
        let content = fs::read(path).ok()?;
        serde_json::from_slice(&content).ok()
    }

    fn write_marker(&self, path: &Path) -> io::Result<()> {
        let content = serde_json::to_vec(self).map_err(io::Error::other)?;
        fs::write(path, content)
    }
}

/// Local copy of a category archive. Removed when dropped, on every path out
/// of the category stage.
struct StagingArchive {
    path: PathBuf,
}

impl StagingArchive {
    fn copy_from(source: &Path, path: PathBuf) -> Result<Self, RestoreError> {
        remove_if_present(&path)
            .io_context(|| format!("Failed to remove stale staging archive {}", path.display()))?;
        // Own the path before copying, so a failed copy is cleaned up too.
        let staging = StagingArchive { path };
        fs::copy(source, &staging.path).io_context(|| {
            format!(
                "Failed to copy {} to {}",
                source.display(),
                staging.path.display()
            )
        })?;
        Ok(staging)
    }
}

impl Drop for StagingArchive {
    fn drop(&mut self) {
        if let Err(e) = remove_if_present(&self.path) {
            warn!("Failed to remove staging archive {}: {}", self.path.display(), e);
        }
    }
}

/// Restores one media category at a time. Never fails the session: errors
/// are reported to telemetry and recorded in the category's report.
pub struct ArchiveRestorer<'a> {
    waiter: &'a MaterializationWaiter,
    extractor: &'a dyn ArchiveExtractor,
    layout: &'a LocalLayout,
    telemetry: &'a dyn TelemetrySink,
}

impl<'a> ArchiveRestorer<'a> {
    pub fn new(
        waiter: &'a MaterializationWaiter,
        extractor: &'a dyn ArchiveExtractor,
        layout: &'a LocalLayout,
        telemetry: &'a dyn TelemetrySink,
    ) -> Self {
        ArchiveRestorer {
            waiter,
            extractor,
            layout,
            telemetry,
        }
    }

    pub fn restore_category(
        &self,
        category: MediaCategory,
        location: &BackupLocation,
        token: &CancellationToken,
        progress: &mut ProgressAggregator,
    ) -> CategoryReport {
        let outcome = match self.try_restore(category, location, token, progress) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Skipping {} restore: {}", category.dir_name(), e);
                self.telemetry.report(&e);
                CategoryOutcome::Failed {
                    reason: FailureReason::from(&e),
                }
            }
        };
        progress.report(StageId::Media(category), 1.0);
        CategoryReport { category, outcome }
    }

    fn try_restore(
        &self,
        category: MediaCategory,
        location: &BackupLocation,
        token: &CancellationToken,
        progress: &mut ProgressAggregator,
    ) -> Result<CategoryOutcome, RestoreError> {
        let remote = location.file(&category.archive_name());
        if self.matches_restored_archive(category, &remote)? {
            info!("{} already restored from this backup, skipping", category.dir_name());
            return Ok(CategoryOutcome::AlreadyCurrent);
        }

        let materialized = match self.waiter.wait(&remote, token)? {
            Materialization::Absent => {
                info!("No {} backup found, skipping", category.dir_name());
                return Ok(CategoryOutcome::NoBackup);
            }
            Materialization::Ready(path) => path,
        };

        let fingerprint = ArchiveFingerprint::of(&materialized)
            .io_context(|| format!("Failed to read {}", materialized.display()))?;

        let chat_dir = self.layout.chat_dir();
        fs::create_dir_all(&chat_dir)
            .io_context(|| format!("Failed to create {}", chat_dir.display()))?;

        // A partial extraction must not look restored on the next run.
        let marker = self.layout.restore_marker_path(category);
        remove_if_present(&marker)
            .io_context(|| format!("Failed to remove {}", marker.display()))?;

        let staging = StagingArchive::copy_from(&materialized, self.layout.staging_path(category))?;
        let media_dir = self.layout.media_dir(category);
        let entries = self.extractor.extract(&staging.path, &media_dir, true, &mut |fraction| {
            progress.report(StageId::Media(category), fraction);
        })?;
        drop(staging);

        if let Err(e) = fingerprint.write_marker(&marker) {
            warn!("Failed to record {} restore marker: {}", category.dir_name(), e);
        }

        let files = WalkDir::new(&media_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .count();
        info!(
            "✓ Restored {} ({} entries, {} files on disk)",
            category.dir_name(),
            entries,
            files
        );
        Ok(CategoryOutcome::Restored { entries, files })
    }

    /// Fast path for re-runs: only looks at an archive that is already
    /// materialized, never requests one.
    fn matches_restored_archive(
        &self,
        category: MediaCategory,
        remote: &RemoteFile,
    ) -> Result<bool, RestoreError> {
        let Some(recorded) = ArchiveFingerprint::read_marker(&self.layout.restore_marker_path(category))
        else {
            return Ok(false);
        };
        if !self.layout.media_dir(category).is_dir() {
            return Ok(false);
        }
        let probe = self.waiter.probe();
        if !probe.exists(remote) {
            return Ok(false);
        }
        let materialized = probe
            .is_materialized(remote)
            .io_context(|| format!("Failed to check materialization of {}", remote.name()))?;
        if !materialized {
            return Ok(false);
        }
        let source = probe.local_path(remote);
        let current = ArchiveFingerprint::of(&source)
            .io_context(|| format!("Failed to read {}", source.display()))?;
        debug!(category = category.dir_name(), ?recorded, ?current, "restore marker");
        Ok(current == recorded)
    }
}
