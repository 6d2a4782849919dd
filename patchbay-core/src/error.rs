//! Error types for patchbay-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{BatchId, RecordId, RecordStatus};

/// All errors that can arise from diff record store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure, with the path that was being accessed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error (save path).
    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The store document exists but could not be parsed.
    #[error("failed to parse diff store at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The store document parsed but violates the table invariants.
    #[error("diff store at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("batch {0} not found")]
    BatchNotFound(BatchId),

    #[error("batch {0} already exists")]
    DuplicateBatch(BatchId),

    /// A record rejected at the store boundary before it was written.
    #[error("invalid diff record: {0}")]
    InvalidRecord(String),

    #[error("diff record {0} not found")]
    RecordNotFound(RecordId),

    /// A record already carries a terminal status and cannot move again.
    #[error("diff record {id} is already {current}; refusing to set {requested}")]
    TerminalStatus {
        id: RecordId,
        current: RecordStatus,
        requested: RecordStatus,
    },

    /// `dirs::home_dir()` returned `None` — cannot locate `~/.patchbay/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Errors raised while loading `config.yaml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load — includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
