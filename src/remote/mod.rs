pub(crate) mod synced_folder;

use std::io;
use std::path::{Path, PathBuf};

/// Per-account backup directory inside the cloud container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupLocation {
    relative: PathBuf,
}

impl BackupLocation {
    pub fn for_account(account_id: &str) -> Self {
        BackupLocation {
            relative: Path::new(account_id).join("Backup"),
        }
    }

    pub fn relative(&self) -> &Path {
        &self.relative
    }

    pub fn file(&self, name: &str) -> RemoteFile {
        RemoteFile {
            relative: self.relative.join(name),
        }
    }
}

/// One object in a backup location, addressed relative to the container root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteFile {
    relative: PathBuf,
}

impl RemoteFile {
    pub fn relative(&self) -> &Path {
        &self.relative
    }

    pub fn name(&self) -> String {
        self.relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Probe over a remote object whose bytes may not be present locally yet.
pub trait RemoteFileProbe: Send + Sync {
    fn exists(&self, file: &RemoteFile) -> bool;

    fn is_materialized(&self, file: &RemoteFile) -> io::Result<bool>;

    fn request_materialization(&self, file: &RemoteFile) -> io::Result<()>;

    /// Where the materialized bytes can be read from.
    fn local_path(&self, file: &RemoteFile) -> PathBuf;
}

/// Account-level view of the cloud container.
pub trait CloudContainer: Send + Sync {
    /// `None` when no cloud identity is signed in.
    fn identity_token(&self) -> Option<String>;

    fn backup_location(&self, account_id: &str) -> Option<BackupLocation>;
}
