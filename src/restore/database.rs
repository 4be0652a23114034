// cloudrestore/src/restore/database.rs
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use tokio::runtime::Handle;
use tracing::{info, warn};

use super::db_restore::DatabaseHandle;
use crate::errors::{IoContext, RestoreError};

/// Primary database handle backed by an SQLite pool.
///
/// Calls block on the runtime handle, so they must run on a blocking worker
/// thread, never on an async task.
pub struct SqliteDatabase {
    runtime: Handle,
    path: PathBuf,
    pool: Option<SqlitePool>,
}

impl SqliteDatabase {
    /// Opens `path` when it exists; otherwise starts closed.
    pub async fn open_existing(runtime: Handle, path: PathBuf) -> Result<Self, RestoreError> {
        let pool = if path.exists() {
            Some(connect(&path).await?)
        } else {
            None
        };
        Ok(SqliteDatabase { runtime, path, pool })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn connect(path: &Path) -> Result<SqlitePool, RestoreError> {
    // SQLite creates the file but not its directory.
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .io_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Basic post-restore check: the file opens and its schema is readable.
async fn count_tables(pool: &SqlitePool) -> Result<i64, RestoreError> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'")
            .fetch_one(pool)
            .await?;
    Ok(count)
}

impl DatabaseHandle for SqliteDatabase {
    fn is_open(&self) -> bool {
        self.pool.is_some()
    }

    fn close(&mut self) -> Result<(), RestoreError> {
        if let Some(pool) = self.pool.take() {
            self.runtime.block_on(pool.close());
            info!("Closed database {}", self.path.display());
        }
        Ok(())
    }

    fn reopen(&mut self, path: &Path) -> Result<(), RestoreError> {
        self.close()?;
        let pool = self.runtime.block_on(connect(path))?;
        let tables = self.runtime.block_on(count_tables(&pool))?;
        if tables == 0 {
            warn!(
                "Database {} has no tables; starting from an empty store.",
                path.display()
            );
        } else {
            info!("Reopened database {} ({} tables)", path.display(), tables);
        }
        self.path = path.to_path_buf();
        self.pool = Some(pool);
        Ok(())
    }
}
