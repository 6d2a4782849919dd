//! Per-record state machine: load target → load sub-resource → staleness and
//! lock check → patch → persist → release lock.
//!
//! Every record ends with exactly one terminal status written to the store and
//! exactly one progress increment. Record-level failures are values in the
//! returned [`Outcome`]; only store failures come back as `Err`.

use chrono::{DateTime, Utc};

use patchbay_core::{
    Batch, DiffRecord, DiffStore, FailurePolicy, LockPolicy, RecordStatus, StalenessReference,
    StoreError, TargetId,
};

use crate::error::{RecordError, RepositoryError};
use crate::lock::LockManager;
use crate::patch;
use crate::progress::ProgressState;
use crate::repository::Repository;

/// Why a record was skipped rather than patched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Another actor holds the advisory lock on the target.
    Locked,
    /// The sub-resource changed after the batch was computed.
    Stale {
        changed_at: DateTime<Utc>,
        reference: DateTime<Utc>,
    },
}

/// Result of applying one record.
#[derive(Debug)]
pub struct Outcome {
    /// Terminal status written to the store.
    pub status: RecordStatus,
    /// Whether the step must abort after this record.
    pub propagate: bool,
    pub ignored: Option<IgnoreReason>,
    pub error: Option<RecordError>,
    /// This actor still holds the target's lock after the record ended.
    pub holds_lock: bool,
}

impl Outcome {
    fn applied() -> Self {
        Self::with_status(RecordStatus::Applied)
    }

    fn ignored(reason: IgnoreReason) -> Self {
        Self {
            ignored: Some(reason),
            ..Self::with_status(RecordStatus::Ignored)
        }
    }

    fn failed(status: RecordStatus, error: impl Into<RecordError>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::with_status(status)
        }
    }

    fn with_status(status: RecordStatus) -> Self {
        Self {
            status,
            propagate: status.failure_policy() == FailurePolicy::Escalate,
            ignored: None,
            error: None,
            holds_lock: false,
        }
    }

    fn holding_lock(self, holds_lock: bool) -> Self {
        Self { holds_lock, ..self }
    }
}

/// Knobs of the applicator taken from the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplyOptions {
    pub staleness_reference: StalenessReference,
    pub lock_policy: LockPolicy,
}

/// Applies diff records against a repository, consulting an optional lock
/// manager.
pub struct Applicator<'a> {
    repository: &'a dyn Repository,
    locks: Option<&'a dyn LockManager>,
    options: ApplyOptions,
}

impl<'a> Applicator<'a> {
    pub fn new(
        repository: &'a dyn Repository,
        locks: Option<&'a dyn LockManager>,
        options: ApplyOptions,
    ) -> Self {
        Self {
            repository,
            locks,
            options,
        }
    }

    /// Apply `record`, persist its terminal status, and count it in `progress`.
    pub fn apply(
        &self,
        store: &dyn DiffStore,
        batch: &Batch,
        record: &DiffRecord,
        progress: &mut ProgressState,
    ) -> Result<Outcome, StoreError> {
        let outcome = self.evaluate(batch, record);
        if let Err(err) = store.update_status(record.id, outcome.status) {
            // The caller never sees this outcome, so it cannot track the lock.
            if outcome.holds_lock {
                self.release(&record.target_id);
            }
            return Err(err);
        }
        progress.increment();
        Ok(outcome)
    }

    /// Run the state machine without touching the store.
    pub fn evaluate(&self, batch: &Batch, record: &DiffRecord) -> Outcome {
        let target = &record.target_id;

        let resource = match self.repository.load(target) {
            Ok(resource) => resource,
            Err(err) => {
                tracing::warn!("record {}: cannot load {target}: {err}", record.id);
                return Outcome::failed(RecordStatus::ObjectLoadFail, err);
            }
        };

        let Some(sub) = resource.sub_resource(&record.sub_resource_id) else {
            tracing::warn!(
                "record {}: {target} has no sub-resource {}",
                record.id,
                record.sub_resource_id
            );
            return Outcome::failed(
                RecordStatus::SubresourceLoadFail,
                RepositoryError::SubResourceNotFound {
                    target: target.clone(),
                    sub_resource: record.sub_resource_id.clone(),
                },
            );
        };

        let changed_at = sub.timestamp(self.options.staleness_reference);
        let skip = if self.is_locked(target) {
            Some(IgnoreReason::Locked)
        } else if changed_at > batch.created_at {
            Some(IgnoreReason::Stale {
                changed_at,
                reference: batch.created_at,
            })
        } else {
            None
        };

        if let Some(reason) = skip {
            let held = self.options.lock_policy == LockPolicy::LockThenSkip
                && self.acquire(target);
            tracing::debug!("record {}: skipping {target}: {reason:?}", record.id);
            return Outcome::ignored(reason).holding_lock(held);
        }

        // The lock may have been taken since the check above.
        if !self.acquire(target) {
            tracing::debug!("record {}: lost the lock race for {target}", record.id);
            return Outcome::ignored(IgnoreReason::Locked);
        }

        let patched = match patch::apply(&sub.content, &record.diff) {
            Ok(patched) => patched,
            Err(err) => {
                tracing::warn!("record {}: patch for {target} failed: {err}", record.id);
                return Outcome::failed(RecordStatus::PatchFail, err).holding_lock(true);
            }
        };

        if let Err(err) = self
            .repository
            .save_content(target, &record.sub_resource_id, &patched)
        {
            tracing::error!(
                "record {}: saving {target}/{} failed: {err}",
                record.id,
                record.sub_resource_id
            );
            return Outcome::failed(RecordStatus::UpdateFail, err).holding_lock(true);
        }

        self.release(target);
        tracing::info!(
            "record {}: applied diff to {target}/{}",
            record.id,
            record.sub_resource_id
        );
        Outcome::applied()
    }

    fn is_locked(&self, target: &TargetId) -> bool {
        let Some(locks) = self.locks else {
            return false;
        };
        locks.is_locked(target).unwrap_or_else(|err| {
            tracing::warn!("lock check for {target} failed, assuming unlocked: {err}");
            false
        })
    }

    /// Best-effort acquire. `false` when another actor holds the lock, and
    /// trivially `true` without a lock manager.
    fn acquire(&self, target: &TargetId) -> bool {
        let Some(locks) = self.locks else {
            return true;
        };
        locks.acquire(target).unwrap_or_else(|err| {
            tracing::warn!("acquiring lock for {target} failed: {err}");
            true
        })
    }

    fn release(&self, target: &TargetId) {
        if let Some(locks) = self.locks {
            if let Err(err) = locks.release(target) {
                tracing::warn!("releasing lock for {target} failed: {err}");
            }
        }
    }
}
