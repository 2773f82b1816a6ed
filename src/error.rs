// error.rs
// Error taxonomy for the dump engine.

use thiserror::Error;

/// Errors surfaced by a backup run.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("invalid connection descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("unsupported database kind: {0}")]
    UnsupportedDatabaseKind(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("table '{0}' was listed but has no columns")]
    TableVanished(String),

    #[error("page fetch failed for {table} at offset {offset}: {reason}")]
    PageFetch {
        table: String,
        offset: u64,
        reason: String,
    },

    #[error("write failure on {path}: {source}")]
    WriteFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("backup cancelled")]
    Cancelled,
}

impl BackupError {
    pub fn write_failure(path: impl Into<String>, source: std::io::Error) -> Self {
        BackupError::WriteFailure {
            path: path.into(),
            source,
        }
    }

    /// Whether the orchestrator may skip past this error under the `skip` table policy.
    /// Artifact and cancellation failures always end the run.
    pub fn is_table_scoped(&self) -> bool {
        matches!(
            self,
            BackupError::TableVanished(_)
                | BackupError::PageFetch { .. }
                | BackupError::CatalogUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
