// cloudrestore/src/remote/synced_folder.rs
use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::{BackupLocation, CloudContainer, RemoteFile, RemoteFileProbe};

/// Cloud container mounted as a folder. Files are materialized by copying
/// them into a local cache on a background thread.
#[derive(Clone)]
pub struct SyncedFolderStore {
    inner: Arc<Inner>,
}

struct Inner {
    container_root: PathBuf,
    cache_root: PathBuf,
    identity_token: Option<String>,
    in_flight: Mutex<HashSet<PathBuf>>,
}

impl SyncedFolderStore {
    pub fn new(container_root: PathBuf, cache_root: PathBuf, identity_token: Option<String>) -> Self {
        SyncedFolderStore {
            inner: Arc::new(Inner {
                container_root,
                cache_root,
                identity_token,
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    fn remote_path(&self, file: &RemoteFile) -> PathBuf {
        self.inner.container_root.join(file.relative())
    }
}

impl Inner {
    fn in_flight(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        // A panicked copy thread leaves nothing half-updated in the set.
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RemoteFileProbe for SyncedFolderStore {
    fn exists(&self, file: &RemoteFile) -> bool {
        self.remote_path(file).is_file()
    }

    fn is_materialized(&self, file: &RemoteFile) -> io::Result<bool> {
        if self.inner.in_flight().contains(file.relative()) {
            return Ok(false);
        }
        let local = self.local_path(file);
        let local_meta = match fs::metadata(&local) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        let remote_meta = fs::metadata(self.remote_path(file))?;
        // A cached copy older than the remote belongs to an earlier backup,
        // even when the sizes agree.
        Ok(local_meta.len() == remote_meta.len() && local_meta.modified()? >= remote_meta.modified()?)
    }

    fn request_materialization(&self, file: &RemoteFile) -> io::Result<()> {
        {
            let mut in_flight = self.inner.in_flight();
            if !in_flight.insert(file.relative().to_path_buf()) {
                debug!(file = %file.relative().display(), "materialization already in flight");
                return Ok(());
            }
        }

        let source = self.remote_path(file);
        let destination = self.local_path(file);
        let key = file.relative().to_path_buf();
        let inner = Arc::clone(&self.inner);

        info!(
            "Materializing {} into {}",
            source.display(),
            destination.display()
        );

        let spawned = thread::Builder::new()
            .name("materialize".to_string())
            .spawn(move || {
                if let Err(e) = copy_atomically(&source, &destination) {
                    warn!(
                        "Failed to materialize {}: {}",
                        source.display(),
                        e
                    );
                }
                inner.in_flight().remove(&key);
            });

        if let Err(e) = spawned {
            self.inner.in_flight().remove(file.relative());
            return Err(e);
        }
        Ok(())
    }

    fn local_path(&self, file: &RemoteFile) -> PathBuf {
        self.inner.cache_root.join(file.relative())
    }
}

impl CloudContainer for SyncedFolderStore {
    fn identity_token(&self) -> Option<String> {
        self.inner.identity_token.clone()
    }

    fn backup_location(&self, account_id: &str) -> Option<BackupLocation> {
        let location = BackupLocation::for_account(account_id);
        if self.inner.container_root.join(location.relative()).is_dir() {
            Some(location)
        } else {
            None
        }
    }
}

/// Copies through a temp file in the destination directory, so readers only
/// ever see a complete file at `destination`.
fn copy_atomically(source: &Path, destination: &Path) -> io::Result<u64> {
    let parent = destination.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no parent directory", destination.display()),
        )
    })?;
    fs::create_dir_all(parent)?;

    let mut reader = File::open(source)?;
    let mut staged = NamedTempFile::new_in(parent)?;
    let bytes = io::copy(&mut reader, staged.as_file_mut())?;
    staged.as_file().sync_all()?;
    staged.persist(destination).map_err(|e| e.error)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant, SystemTime};

    fn store_with_backup(dir: &Path) -> anyhow::Result<(SyncedFolderStore, BackupLocation)> {
        let container = dir.join("container");
        fs::create_dir_all(container.join("42").join("Backup"))?;
        let store = SyncedFolderStore::new(container, dir.join("cache"), Some("token".into()));
        let location = store
            .backup_location("42")
            .ok_or_else(|| anyhow::anyhow!("backup location should resolve"))?;
        Ok((store, location))
    }

    #[test]
    fn test_backup_location_requires_directory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = SyncedFolderStore::new(dir.path().join("container"), dir.path().join("cache"), None);
        assert!(store.backup_location("42").is_none());
        assert!(store.identity_token().is_none());

        let (store, location) = store_with_backup(dir.path())?;
        assert_eq!(location.relative(), Path::new("42/Backup"));
        assert_eq!(store.identity_token().as_deref(), Some("token"));
        Ok(())
    }

    #[test]
    fn test_materialization_copies_into_cache() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (store, location) = store_with_backup(dir.path())?;
        let file = location.file("chat.backup.db");
        fs::write(dir.path().join("container/42/Backup/chat.backup.db"), b"sqlite bytes")?;

        assert!(store.exists(&file));
        assert!(!store.is_materialized(&file)?);

        store.request_materialization(&file)?;
        // Asking twice while in flight must not start a second copy.
        store.request_materialization(&file)?;

        let deadline = Instant::now() + Duration::from_secs(5);
        while !store.is_materialized(&file)? {
            assert!(Instant::now() < deadline, "materialization did not converge");
            thread::sleep(Duration::from_millis(5));
        }

        let local = store.local_path(&file);
        assert_eq!(local, dir.path().join("cache/42/Backup/chat.backup.db"));
        assert_eq!(fs::read(&local)?, b"sqlite bytes");
        Ok(())
    }

    #[test]
    fn test_newer_remote_of_same_size_is_not_materialized() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (store, location) = store_with_backup(dir.path())?;
        let file = location.file("chat.backup.db");
        let remote = dir.path().join("container/42/Backup/chat.backup.db");
        fs::write(&remote, b"backup v1")?;
        fs::create_dir_all(dir.path().join("cache/42/Backup"))?;
        fs::write(store.local_path(&file), b"backup v1")?;
        assert!(store.is_materialized(&file)?);

        fs::write(&remote, b"backup v2")?;
        File::options()
            .write(true)
            .open(&remote)?
            .set_modified(SystemTime::now() + Duration::from_secs(60))?;

        assert!(!store.is_materialized(&file)?);
        Ok(())
    }

    #[test]
    fn test_missing_remote_file_does_not_exist() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (store, location) = store_with_backup(dir.path())?;
        let file = location.file("chat.photos.tar.gz");
        assert!(!store.exists(&file));
        assert!(!store.is_materialized(&file)?);
        Ok(())
    }
}
