//! Domain types for queued diff applications.
//!
//! Records are validated at the store boundary; everything past the store
//! works with these typed structs, never with loosely-typed rows.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of a batch of diffs computed together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for BatchId {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

/// Identifier of a single queued diff record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for RecordId {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

/// Identifier of the target resource (the object being patched).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId(pub String);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TargetId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TargetId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a named content stream attached to a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubResourceId(pub String);

impl fmt::Display for SubResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SubResourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SubResourceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a [`DiffRecord`].
///
/// A record starts `Pending` and moves to exactly one terminal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    #[default]
    Pending,
    Applied,
    /// Skipped because the target was locked by another actor or changed
    /// after the batch was computed.
    Ignored,
    ObjectLoadFail,
    SubresourceLoadFail,
    PatchFail,
    UpdateFail,
}

/// What the batch does after a record reaches a given status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Record the status and move on to the next record.
    Continue,
    /// Record the status, then abort the step and fail the run.
    Escalate,
}

impl RecordStatus {
    pub const ALL: [RecordStatus; 7] = [
        RecordStatus::Pending,
        RecordStatus::Applied,
        RecordStatus::Ignored,
        RecordStatus::ObjectLoadFail,
        RecordStatus::SubresourceLoadFail,
        RecordStatus::PatchFail,
        RecordStatus::UpdateFail,
    ];

    pub fn is_terminal(self) -> bool {
        self != RecordStatus::Pending
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            RecordStatus::ObjectLoadFail
                | RecordStatus::SubresourceLoadFail
                | RecordStatus::PatchFail
                | RecordStatus::UpdateFail
        )
    }

    /// Policy table for every status.
    ///
    /// A failed persist may point at a repository-wide problem, so it stops the
    /// run; every other outcome is data-specific and the batch carries on.
    pub fn failure_policy(self) -> FailurePolicy {
        match self {
            RecordStatus::UpdateFail => FailurePolicy::Escalate,
            RecordStatus::Pending
            | RecordStatus::Applied
            | RecordStatus::Ignored
            | RecordStatus::ObjectLoadFail
            | RecordStatus::SubresourceLoadFail
            | RecordStatus::PatchFail => FailurePolicy::Continue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Pending => "PENDING",
            RecordStatus::Applied => "APPLIED",
            RecordStatus::Ignored => "IGNORED",
            RecordStatus::ObjectLoadFail => "OBJECT_LOAD_FAIL",
            RecordStatus::SubresourceLoadFail => "SUBRESOURCE_LOAD_FAIL",
            RecordStatus::PatchFail => "PATCH_FAIL",
            RecordStatus::UpdateFail => "UPDATE_FAIL",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// A named unit of work. `created_at` marks when its diffs were computed and
/// is the staleness reference for every record in the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: BatchId,
    pub created_at: DateTime<Utc>,
}

/// One queued change: a unified diff against one sub-resource of one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffRecord {
    pub id: RecordId,
    pub batch_id: BatchId,
    pub target_id: TargetId,
    pub sub_resource_id: SubResourceId,
    pub diff: String,
    #[serde(default)]
    pub status: RecordStatus,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
