//! Shared fixtures: an in-memory repository, in-memory locks, and a store
//! wrapper that counts reads and can be told to fail.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Duration, TimeZone, Utc};
use similar::TextDiff;

use patchbay_apply::{
    LockError, LockManager, Repository, RepositoryError, Resource, SubResource,
};
use patchbay_core::{
    Batch, BatchId, DiffRecord, DiffStore, FileDiffStore, RecordId, RecordStatus, StoreError,
    SubResourceId, TargetId,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Batch reference time.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn before_t0() -> DateTime<Utc> {
    t0() - Duration::hours(1)
}

pub fn after_t0() -> DateTime<Utc> {
    t0() + Duration::hours(1)
}

pub fn unified(old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .header("a", "b")
        .to_string()
}

pub fn store_with_batch(home: &Path, batch_id: u64) -> FileDiffStore {
    let store = FileDiffStore::at(home);
    store
        .insert_batch(Batch {
            batch_id: BatchId(batch_id),
            created_at: t0(),
        })
        .expect("insert batch");
    store
}

pub fn enqueue(store: &FileDiffStore, batch_id: u64, target: &str, diff: &str) -> DiffRecord {
    store
        .enqueue(BatchId(batch_id), target.into(), "DC".into(), diff)
        .expect("enqueue")
}

pub fn status_of(store: &dyn DiffStore, batch_id: u64, id: RecordId) -> RecordStatus {
    store
        .records(BatchId(batch_id))
        .expect("records")
        .into_iter()
        .find(|r| r.id == id)
        .expect("record present")
        .status
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryRepository {
    objects: RefCell<BTreeMap<TargetId, Resource>>,
    pub fail_saves: Cell<bool>,
    pub saves: Cell<usize>,
}

impl MemoryRepository {
    pub fn insert(
        &self,
        target: &str,
        sub: &str,
        content: &str,
        created_at: DateTime<Utc>,
        modified_at: DateTime<Utc>,
    ) {
        let target = TargetId::from(target);
        let mut objects = self.objects.borrow_mut();
        let resource = objects
            .remove(&target)
            .unwrap_or_else(|| Resource::new(target.clone()));
        objects.insert(
            target,
            resource.with_sub_resource(SubResource {
                id: SubResourceId::from(sub),
                content: content.as_bytes().to_vec(),
                created_at,
                modified_at,
            }),
        );
    }

    /// An unmodified `DC` stream created and last touched before `t0`.
    pub fn insert_fresh(&self, target: &str, content: &str) {
        self.insert(target, "DC", content, before_t0(), before_t0());
    }

    pub fn content(&self, target: &str, sub: &str) -> Option<String> {
        self.objects
            .borrow()
            .get(&TargetId::from(target))
            .and_then(|r| r.sub_resource(&SubResourceId::from(sub)))
            .map(|s| String::from_utf8_lossy(&s.content).into_owned())
    }
}

impl Repository for MemoryRepository {
    fn load(&self, target: &TargetId) -> Result<Resource, RepositoryError> {
        self.objects
            .borrow()
            .get(target)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(target.clone()))
    }

    fn save_content(
        &self,
        target: &TargetId,
        sub_resource: &SubResourceId,
        content: &[u8],
    ) -> Result<(), RepositoryError> {
        if self.fail_saves.get() {
            return Err(RepositoryError::Rejected("disk full".to_string()));
        }
        let mut objects = self.objects.borrow_mut();
        let resource = objects
            .remove(target)
            .ok_or_else(|| RepositoryError::NotFound(target.clone()))?;
        let mut sub = resource
            .sub_resource(sub_resource)
            .cloned()
            .ok_or_else(|| RepositoryError::SubResourceNotFound {
                target: target.clone(),
                sub_resource: sub_resource.clone(),
            })?;
        sub.content = content.to_vec();
        sub.modified_at = Utc::now();
        objects.insert(target.clone(), resource.with_sub_resource(sub));
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Locks
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryLocks {
    pub foreign: RefCell<BTreeSet<TargetId>>,
    pub ours: RefCell<BTreeSet<TargetId>>,
    pub acquired: RefCell<Vec<TargetId>>,
    pub released: RefCell<Vec<TargetId>>,
}

impl MemoryLocks {
    pub fn held_by_other(&self, target: &str) {
        self.foreign.borrow_mut().insert(TargetId::from(target));
    }
}

impl LockManager for MemoryLocks {
    fn is_locked(&self, target: &TargetId) -> Result<bool, LockError> {
        Ok(self.foreign.borrow().contains(target))
    }

    fn acquire(&self, target: &TargetId) -> Result<bool, LockError> {
        self.acquired.borrow_mut().push(target.clone());
        if self.foreign.borrow().contains(target) {
            return Ok(false);
        }
        self.ours.borrow_mut().insert(target.clone());
        Ok(true)
    }

    fn release(&self, target: &TargetId) -> Result<(), LockError> {
        self.released.borrow_mut().push(target.clone());
        self.ours.borrow_mut().remove(target);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store wrapper
// ---------------------------------------------------------------------------

pub struct CountingStore {
    pub inner: FileDiffStore,
    pub fetches: Cell<usize>,
    pub largest_page: Cell<usize>,
    pub fail_updates: Cell<bool>,
    /// Number of upcoming `delete_all` calls that fail.
    pub fail_deletes: Cell<usize>,
    pub fail_records: Cell<bool>,
}

impl CountingStore {
    pub fn new(inner: FileDiffStore) -> Self {
        Self {
            inner,
            fetches: Cell::new(0),
            largest_page: Cell::new(0),
            fail_updates: Cell::new(false),
            fail_deletes: Cell::new(0),
            fail_records: Cell::new(false),
        }
    }

    fn unavailable(&self) -> StoreError {
        StoreError::Io {
            path: self.inner.path().to_path_buf(),
            source: std::io::Error::other("store unavailable"),
        }
    }
}

impl DiffStore for CountingStore {
    fn batch(&self, batch_id: BatchId) -> Result<Batch, StoreError> {
        self.inner.batch(batch_id)
    }

    fn fetch_pending(
        &self,
        batch_id: BatchId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DiffRecord>, StoreError> {
        let page = self.inner.fetch_pending(batch_id, limit, offset)?;
        self.fetches.set(self.fetches.get() + 1);
        self.largest_page
            .set(self.largest_page.get().max(page.len()));
        Ok(page)
    }

    fn count_pending(&self, batch_id: BatchId) -> Result<usize, StoreError> {
        self.inner.count_pending(batch_id)
    }

    fn update_status(&self, record_id: RecordId, status: RecordStatus) -> Result<(), StoreError> {
        if self.fail_updates.get() {
            return Err(self.unavailable());
        }
        self.inner.update_status(record_id, status)
    }

    fn delete_all(&self, batch_id: BatchId) -> Result<usize, StoreError> {
        if self.fail_deletes.get() > 0 {
            self.fail_deletes.set(self.fail_deletes.get() - 1);
            return Err(self.unavailable());
        }
        self.inner.delete_all(batch_id)
    }

    fn records(&self, batch_id: BatchId) -> Result<Vec<DiffRecord>, StoreError> {
        if self.fail_records.get() {
            return Err(self.unavailable());
        }
        self.inner.records(batch_id)
    }
}
