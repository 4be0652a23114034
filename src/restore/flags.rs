// cloudrestore/src/restore/flags.rs
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::debug;

use crate::errors::{IoContext, RestoreError};

/// Restore-pending markers, read once when a session is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreFlags {
    pub database_restore_pending: bool,
    pub media_restore_pending: bool,
}

impl RestoreFlags {
    pub const CLEARED: RestoreFlags = RestoreFlags {
        database_restore_pending: false,
        media_restore_pending: false,
    };

    pub fn any_pending(&self) -> bool {
        self.database_restore_pending || self.media_restore_pending
    }
}

impl Default for RestoreFlags {
    /// A freshly signed-in account has not been offered a restore yet.
    fn default() -> Self {
        RestoreFlags {
            database_restore_pending: true,
            media_restore_pending: true,
        }
    }
}

pub trait FlagStore: Send {
    fn load(&self) -> Result<RestoreFlags, RestoreError>;

    fn clear(&mut self) -> Result<(), RestoreError>;
}

/// Flags kept as a small JSON document beside the account's data.
pub struct JsonFlagStore {
    path: PathBuf,
}

impl JsonFlagStore {
    pub fn new(path: PathBuf) -> Self {
        JsonFlagStore { path }
    }

    fn save(&self, flags: &RestoreFlags) -> Result<(), RestoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .io_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let body = serde_json::to_vec_pretty(flags)
            .map_err(io::Error::from)
            .io_context(|| "Failed to serialize restore flags".to_string())?;
        fs::write(&self.path, body)
            .io_context(|| format!("Failed to write {}", self.path.display()))
    }
}

impl FlagStore for JsonFlagStore {
    fn load(&self) -> Result<RestoreFlags, RestoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No flags at {}, assuming restore pending", self.path.display());
                return Ok(RestoreFlags::default());
            }
            Err(e) => {
                return Err(RestoreError::Io {
                    context: format!("Failed to read {}", self.path.display()),
                    source: e,
                });
            }
        };
        serde_json::from_str(&content)
            .map_err(io::Error::from)
            .io_context(|| format!("Failed to parse {}", self.path.display()))
    }

    fn clear(&mut self) -> Result<(), RestoreError> {
        self.save(&RestoreFlags::CLEARED)
    }
}
