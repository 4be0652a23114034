use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Precondition unmet: {0}")]
    PreconditionUnmet(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Restore cancelled")]
    Cancelled,

    #[error("Extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Archive is corrupt: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RestoreError {
    /// Short machine-readable name, used by telemetry records.
    pub fn kind(&self) -> &'static str {
        match self {
            RestoreError::PreconditionUnmet(_) => "precondition_unmet",
            RestoreError::Io { .. } => "io",
            RestoreError::Cancelled => "cancelled",
            RestoreError::Extract(ExtractError::Corrupt(_)) => "corrupt_archive",
            RestoreError::Extract(ExtractError::Io(_)) => "extract_io",
            RestoreError::Database(_) => "database",
        }
    }
}

/// Attaches a description to an `io::Error`, in the spirit of `anyhow::Context`.
pub trait IoContext<T> {
    fn io_context<F>(self, f: F) -> Result<T, RestoreError>
    where
        F: FnOnce() -> String;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F>(self, f: F) -> Result<T, RestoreError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| RestoreError::Io {
            context: f(),
            source,
        })
    }
}

/// Serializable reason carried by a failed outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    PreconditionUnmet(String),
    Cancelled,
    Io(String),
}

impl From<&RestoreError> for FailureReason {
    fn from(err: &RestoreError) -> Self {
        match err {
            RestoreError::PreconditionUnmet(msg) => FailureReason::PreconditionUnmet(msg.clone()),
            RestoreError::Cancelled => FailureReason::Cancelled,
            other => FailureReason::Io(other.to_string()),
        }
    }
}
