//! Batch step driver.
//!
//! One call to [`step`] is one bounded unit of work: at most one page of
//! pending records. Everything that has to survive until the next call lives
//! in the [`StepContext`] sandbox (owned by the scheduler) or in the store's
//! status column. The driver keeps nothing in memory between calls.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use patchbay_core::{
    BatchId, DiffStore, RecordStatus, TargetId, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};

use crate::applicator::{Applicator, ApplyOptions};
use crate::error::{ApplyError, FailedOperation, RepositoryError};
use crate::lock::LockManager;
use crate::progress::ProgressState;
use crate::repository::Repository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriverState {
    #[default]
    Running,
    Finished,
}

/// Targets skipped during a run, handed to the finalizer once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub batch_id: BatchId,
    pub ignored_targets: BTreeSet<TargetId>,
    /// Targets this run locked and has not released yet. The finalizer
    /// releases them.
    #[serde(default)]
    pub held_locks: BTreeSet<TargetId>,
}

impl ResultSummary {
    pub fn new(batch_id: BatchId) -> Self {
        Self {
            batch_id,
            ignored_targets: BTreeSet::new(),
            held_locks: BTreeSet::new(),
        }
    }
}

/// Serializable sandbox threaded through every step of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepContext {
    /// `None` until the first step counts the pending records.
    pub progress: Option<ProgressState>,
    pub summary: ResultSummary,
    #[serde(default)]
    pub state: DriverState,
    /// Set once a step failed; the run then only awaits finalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<FailedOperation>,
}

impl StepContext {
    pub fn new(batch_id: BatchId) -> Self {
        Self {
            progress: None,
            summary: ResultSummary::new(batch_id),
            state: DriverState::Running,
            failed: None,
        }
    }

    /// Completion fraction reported to the scheduler.
    pub fn fraction(&self) -> f64 {
        match (self.state, self.progress) {
            (DriverState::Finished, _) => 1.0,
            (DriverState::Running, Some(progress)) => progress.fraction(),
            (DriverState::Running, None) => 0.0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == DriverState::Finished
    }
}

/// What one step did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub fraction: f64,
    pub state: DriverState,
    /// Records given a terminal status by this step.
    pub processed: usize,
}

/// Collaborators and knobs of a run.
pub struct ApplyContext<'a> {
    pub store: &'a dyn DiffStore,
    pub repository: &'a dyn Repository,
    pub locks: Option<&'a dyn LockManager>,
    pub options: ApplyOptions,
    /// Records per step; clamped to `1..=MAX_PAGE_SIZE`.
    pub page_size: usize,
}

impl<'a> ApplyContext<'a> {
    pub fn new(store: &'a dyn DiffStore, repository: &'a dyn Repository) -> Self {
        Self {
            store,
            repository,
            locks: None,
            options: ApplyOptions::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_locks(mut self, locks: &'a dyn LockManager) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn with_options(mut self, options: ApplyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    fn limit(&self) -> usize {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }
}

/// Run one bounded unit of work for `batch_id`, updating `sandbox`.
///
/// The first call counts the pending records; an empty batch finishes right
/// there without reading a single record. Later calls fetch one page (always
/// from offset 0, since processed records are no longer pending) and apply it.
/// A step that escalates a record failure returns `Err` after the record's
/// status and the progress counter have been updated.
pub fn step(
    ctx: &ApplyContext<'_>,
    batch_id: BatchId,
    sandbox: &mut StepContext,
) -> Result<StepReport, ApplyError> {
    if sandbox.is_finished() {
        return Ok(report(sandbox, 0));
    }

    let batch = ctx
        .store
        .batch(batch_id)
        .map_err(|e| ApplyError::store("batch", [batch_id], e))?;

    let mut progress = match sandbox.progress {
        Some(progress) => progress,
        None => {
            let total = ctx
                .store
                .count_pending(batch_id)
                .map_err(|e| ApplyError::store("count_pending", [batch_id], e))?;
            tracing::info!("batch {batch_id}: {total} pending diff(s)");
            let progress = ProgressState::start(total);
            sandbox.progress = Some(progress);
            sandbox.summary = ResultSummary::new(batch_id);
            if total == 0 {
                sandbox.state = DriverState::Finished;
                return Ok(report(sandbox, 0));
            }
            progress
        }
    };

    let limit = ctx.limit();
    let page = ctx
        .store
        .fetch_pending(batch_id, limit, 0)
        .map_err(|e| ApplyError::store("fetch_pending", [batch_id.0, limit as u64, 0], e))?;

    if page.is_empty() {
        // Pending records vanished under us (removed by another actor).
        tracing::warn!(
            "batch {batch_id}: no pending records left at {}/{}",
            progress.processed,
            progress.total
        );
        sandbox.state = DriverState::Finished;
        return Ok(report(sandbox, 0));
    }

    let applicator = Applicator::new(ctx.repository, ctx.locks, ctx.options);
    let mut processed = 0;
    for record in &page {
        let result = applicator.apply(ctx.store, &batch, record, &mut progress);
        sandbox.progress = Some(progress);
        let outcome = result.map_err(|e| {
            ApplyError::store(
                "update_status",
                [record.id.to_string(), record.target_id.to_string()],
                e,
            )
        })?;
        processed += 1;

        if outcome.ignored.is_some() {
            sandbox
                .summary
                .ignored_targets
                .insert(record.target_id.clone());
        }
        if ctx.locks.is_some() {
            if outcome.holds_lock {
                sandbox.summary.held_locks.insert(record.target_id.clone());
            } else if outcome.status == RecordStatus::Applied {
                sandbox.summary.held_locks.remove(&record.target_id);
            }
        }

        if outcome.propagate {
            let source = outcome.error.unwrap_or_else(|| {
                RepositoryError::Rejected(format!("record ended {}", outcome.status)).into()
            });
            return Err(ApplyError::Escalated {
                record: record.id,
                operation: FailedOperation::new(
                    "save_content",
                    [record.target_id.to_string(), record.sub_resource_id.to_string()],
                ),
                source,
            });
        }
    }

    if progress.is_complete() {
        sandbox.state = DriverState::Finished;
    }
    tracing::debug!(
        "batch {batch_id}: step done, {}/{}",
        progress.processed,
        progress.total
    );
    Ok(report(sandbox, processed))
}

fn report(sandbox: &StepContext, processed: usize) -> StepReport {
    StepReport {
        fraction: sandbox.fraction(),
        state: sandbox.state,
        processed,
    }
}
