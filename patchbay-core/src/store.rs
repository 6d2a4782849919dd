//! Diff record store — the persisted queue of pending diff applications.
//!
//! # Storage layout
//!
//! ```text
//! ~/.patchbay/
//!   diffs.json      (batch table + record table + id sequence)
//! ```
//!
//! Every call on [`FileDiffStore`] is individually atomic: load the document,
//! mutate it, write `diffs.json.tmp`, rename over `diffs.json`. Nothing is
//! transactional across calls.
//!
//! Records keep their insertion order; [`DiffStore::fetch_pending`] pages in
//! that order.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, StoreError};
use crate::types::{Batch, BatchId, DiffRecord, RecordId, RecordStatus, SubResourceId, TargetId};

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Upper bound on records handed out by a single `fetch_pending` call.
pub const MAX_PAGE_SIZE: usize = 100;

// ---------------------------------------------------------------------------
// 1. Contract
// ---------------------------------------------------------------------------

/// Persisted queue of diff records, keyed by batch.
///
/// Failures are returned to the caller untouched; the store never retries.
pub trait DiffStore {
    /// Look up a batch row.
    fn batch(&self, batch_id: BatchId) -> Result<Batch, StoreError>;

    /// Up to `limit` pending records of `batch_id` in insertion order, skipping
    /// the first `offset`. `limit` is capped at [`MAX_PAGE_SIZE`].
    fn fetch_pending(
        &self,
        batch_id: BatchId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DiffRecord>, StoreError>;

    fn count_pending(&self, batch_id: BatchId) -> Result<usize, StoreError>;

    /// Single-row status update. Idempotent; a terminal status is final.
    fn update_status(&self, record_id: RecordId, status: RecordStatus) -> Result<(), StoreError>;

    /// Remove every record of the batch, whatever its status. Returns the
    /// number of removed records.
    fn delete_all(&self, batch_id: BatchId) -> Result<usize, StoreError>;

    /// Every record of the batch, in insertion order.
    fn records(&self, batch_id: BatchId) -> Result<Vec<DiffRecord>, StoreError>;
}

// ---------------------------------------------------------------------------
// 2. On-disk document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default = "first_record_id")]
    next_record_id: u64,
    #[serde(default)]
    batches: Vec<Batch>,
    #[serde(default)]
    records: Vec<DiffRecord>,
}

fn first_record_id() -> u64 {
    1
}

impl StoreDocument {
    fn empty() -> Self {
        Self {
            next_record_id: first_record_id(),
            batches: Vec::new(),
            records: Vec::new(),
        }
    }

    /// Check the table invariants. Returns the reason for the first violation.
    fn validate(&self) -> Result<(), String> {
        let mut batch_ids = HashSet::new();
        for batch in &self.batches {
            if !batch_ids.insert(batch.batch_id) {
                return Err(format!("duplicate batch {}", batch.batch_id));
            }
        }

        let mut record_ids = HashSet::new();
        for record in &self.records {
            if !record_ids.insert(record.id) {
                return Err(format!("duplicate record {}", record.id));
            }
            if record.id.0 >= self.next_record_id {
                return Err(format!(
                    "record {} is not below the id sequence {}",
                    record.id, self.next_record_id
                ));
            }
            if !batch_ids.contains(&record.batch_id) {
                return Err(format!(
                    "record {} references unknown batch {}",
                    record.id, record.batch_id
                ));
            }
            if record.target_id.0.trim().is_empty() {
                return Err(format!("record {} has an empty target id", record.id));
            }
            if record.sub_resource_id.0.trim().is_empty() {
                return Err(format!("record {} has an empty sub-resource id", record.id));
            }
        }
        Ok(())
    }

    fn find_batch(&self, batch_id: BatchId) -> Result<&Batch, StoreError> {
        self.batches
            .iter()
            .find(|b| b.batch_id == batch_id)
            .ok_or(StoreError::BatchNotFound(batch_id))
    }

    fn pending(&self, batch_id: BatchId) -> impl Iterator<Item = &DiffRecord> {
        self.records
            .iter()
            .filter(move |r| r.batch_id == batch_id && r.status == RecordStatus::Pending)
    }
}

// ---------------------------------------------------------------------------
// 3. File-backed store
// ---------------------------------------------------------------------------

/// [`DiffStore`] persisted as a single JSON document under `<home>/.patchbay/`.
#[derive(Debug, Clone)]
pub struct FileDiffStore {
    path: PathBuf,
}

/// `<home>/.patchbay/diffs.json` — pure, no I/O.
pub fn store_path_at(home: &Path) -> PathBuf {
    home.join(".patchbay").join("diffs.json")
}

impl FileDiffStore {
    /// Store rooted at an explicit home; used in tests with `TempDir`.
    pub fn at(home: &Path) -> Self {
        Self {
            path: store_path_at(home),
        }
    }

    /// Store under the current user's home directory.
    pub fn open() -> Result<Self, StoreError> {
        let home = dirs::home_dir().ok_or(StoreError::HomeNotFound)?;
        Ok(Self::at(&home))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register a batch computed at `batch.created_at`.
    pub fn insert_batch(&self, batch: Batch) -> Result<(), StoreError> {
        let mut doc = self.load()?;
        if doc.batches.iter().any(|b| b.batch_id == batch.batch_id) {
            return Err(StoreError::DuplicateBatch(batch.batch_id));
        }
        doc.batches.push(batch);
        self.save(&doc)
    }

    /// Queue a pending diff for `target`/`sub_resource` in an existing batch.
    pub fn enqueue(
        &self,
        batch_id: BatchId,
        target_id: TargetId,
        sub_resource_id: SubResourceId,
        diff: impl Into<String>,
    ) -> Result<DiffRecord, StoreError> {
        let mut doc = self.load()?;
        doc.find_batch(batch_id)?;

        let record = DiffRecord {
            id: RecordId(doc.next_record_id),
            batch_id,
            target_id,
            sub_resource_id,
            diff: diff.into(),
            status: RecordStatus::Pending,
        };
        if record.target_id.0.trim().is_empty() || record.sub_resource_id.0.trim().is_empty() {
            return Err(StoreError::InvalidRecord(
                "target and sub-resource ids must not be empty".to_string(),
            ));
        }
        doc.next_record_id += 1;
        doc.records.push(record.clone());
        self.save(&doc)?;
        Ok(record)
    }

    /// Every batch row, sorted by id.
    pub fn batches(&self) -> Result<Vec<Batch>, StoreError> {
        let mut batches = self.load()?.batches;
        batches.sort_by_key(|b| b.batch_id);
        Ok(batches)
    }

    fn load(&self) -> Result<StoreDocument, StoreError> {
        if !self.path.exists() {
            return Ok(StoreDocument::empty());
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|e| io_err(&self.path, e))?;
        let doc: StoreDocument =
            serde_json::from_str(&contents).map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                source,
            })?;
        doc.validate().map_err(|reason| self.corrupt(reason))?;
        Ok(doc)
    }

    /// Atomic save: `diffs.json.tmp` sibling, then rename.
    fn save(&self, doc: &StoreDocument) -> Result<(), StoreError> {
        let Some(dir) = self.path.parent() else {
            return Err(io_err(
                &self.path,
                std::io::Error::other("invalid diff store path"),
            ));
        };
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

        let json = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&self.path, e));
        }
        Ok(())
    }

    fn corrupt(&self, reason: String) -> StoreError {
        StoreError::Corrupt {
            path: self.path.clone(),
            reason,
        }
    }
}

impl DiffStore for FileDiffStore {
    fn batch(&self, batch_id: BatchId) -> Result<Batch, StoreError> {
        self.load()?.find_batch(batch_id).cloned()
    }

    fn fetch_pending(
        &self,
        batch_id: BatchId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DiffRecord>, StoreError> {
        let doc = self.load()?;
        Ok(doc
            .pending(batch_id)
            .skip(offset)
            .take(limit.min(MAX_PAGE_SIZE))
            .cloned()
            .collect())
    }

    fn count_pending(&self, batch_id: BatchId) -> Result<usize, StoreError> {
        Ok(self.load()?.pending(batch_id).count())
    }

    fn update_status(&self, record_id: RecordId, status: RecordStatus) -> Result<(), StoreError> {
        let mut doc = self.load()?;
        let record = doc
            .records
            .iter_mut()
            .find(|r| r.id == record_id)
            .ok_or(StoreError::RecordNotFound(record_id))?;

        if record.status == status {
            return Ok(());
        }
        if record.status.is_terminal() {
            return Err(StoreError::TerminalStatus {
                id: record_id,
                current: record.status,
                requested: status,
            });
        }
        record.status = status;
        self.save(&doc)
    }

    fn delete_all(&self, batch_id: BatchId) -> Result<usize, StoreError> {
        let mut doc = self.load()?;
        let before = doc.records.len();
        doc.records.retain(|r| r.batch_id != batch_id);
        let removed = before - doc.records.len();
        if removed > 0 {
            self.save(&doc)?;
        }
        Ok(removed)
    }

    fn records(&self, batch_id: BatchId) -> Result<Vec<DiffRecord>, StoreError> {
        Ok(self
            .load()?
            .records
            .into_iter()
            .filter(|r| r.batch_id == batch_id)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
