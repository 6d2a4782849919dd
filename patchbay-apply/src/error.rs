//! Error types for patchbay-apply.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use patchbay_core::{RecordId, StoreError, SubResourceId, TargetId};

/// Failures of the resource repository collaborator.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("object {0} not found")]
    NotFound(TargetId),

    #[error("object {target} has no sub-resource {sub_resource}")]
    SubResourceNotFound {
        target: TargetId,
        sub_resource: SubResourceId,
    },

    /// Identifier that cannot be mapped onto the repository layout.
    #[error("invalid identifier {0:?}")]
    InvalidId(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The repository refused the write for a reason of its own.
    #[error("repository rejected the write: {0}")]
    Rejected(String),
}

/// Failures of the advisory lock manager. Never fatal.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("invalid lock identifier {0:?}")]
    InvalidId(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reasons a unified diff cannot be applied.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("patch contains no hunks")]
    Empty,

    #[error("malformed patch at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("hunk {hunk} does not apply: content line {line} differs from the patch base")]
    Mismatch { hunk: usize, line: usize },

    #[error("hunk {hunk} starts past the end of the content ({lines} lines)")]
    OutOfRange { hunk: usize, lines: usize },

    #[error("content is not valid UTF-8")]
    NotUtf8,
}

/// Why a single record failed; carried in the applicator outcome.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Patch(#[from] PatchError),
}

/// The operation a failed run stopped in, with its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedOperation {
    pub name: String,
    pub arguments: Vec<String>,
}

impl FailedOperation {
    pub fn new<I, S>(name: impl Into<String>, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Self {
            name: name.into(),
            arguments: arguments.into_iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl fmt::Display for FailedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.arguments.join(", "))
    }
}

/// Errors that abort a batch step.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// A diff store call failed; store failures are never retried locally.
    #[error("{operation} failed: {source}")]
    Store {
        operation: FailedOperation,
        #[source]
        source: StoreError,
    },

    /// A record failure whose policy is to stop the run.
    #[error("{operation} failed for record {record}: {source}")]
    Escalated {
        record: RecordId,
        operation: FailedOperation,
        #[source]
        source: RecordError,
    },

    /// I/O on the persisted step sandbox.
    #[error("sandbox I/O error at {path}: {source}")]
    Sandbox {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sandbox JSON error: {0}")]
    SandboxJson(#[from] serde_json::Error),
}

impl ApplyError {
    pub(crate) fn store<I, S>(name: &str, arguments: I, source: StoreError) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        ApplyError::Store {
            operation: FailedOperation::new(name, arguments),
            source,
        }
    }

    /// The operation to report to the user for this failure.
    pub fn failed_operation(&self) -> FailedOperation {
        match self {
            ApplyError::Store { operation, .. } | ApplyError::Escalated { operation, .. } => {
                operation.clone()
            }
            ApplyError::Sandbox { path, .. } => {
                FailedOperation::new("save_sandbox", [path.display()])
            }
            ApplyError::SandboxJson(_) => FailedOperation::new("save_sandbox", Vec::<String>::new()),
        }
    }
}

pub(crate) fn repo_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RepositoryError {
    RepositoryError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn lock_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> LockError {
    LockError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_operation_renders_name_and_arguments() {
        let op = FailedOperation::new("save_content", ["demo:1", "DC"]);
        assert_eq!(op.to_string(), "save_content(demo:1, DC)");
    }

    #[test]
    fn store_error_reports_its_operation() {
        let err = ApplyError::store(
            "count_pending",
            [7],
            StoreError::BatchNotFound(patchbay_core::BatchId(7)),
        );
        assert_eq!(
            err.failed_operation(),
            FailedOperation::new("count_pending", ["7"])
        );
        assert!(err.to_string().starts_with("count_pending(7) failed"));
    }
}
