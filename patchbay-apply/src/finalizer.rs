//! Result reporting and cleanup, run exactly once per batch run.

use std::collections::BTreeSet;

use patchbay_core::{BatchId, DiffStore, RecordStatus, TargetId};

use crate::driver::ResultSummary;
use crate::error::{ApplyError, FailedOperation};
use crate::lock::LockManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

/// A human-readable notice for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub level: MessageLevel,
    pub text: String,
}

impl Message {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Info,
            text: text.into(),
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Warning,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Error,
            text: text.into(),
        }
    }
}

/// Where status and ignored-object notices go.
pub trait MessageSink {
    fn emit(&mut self, message: Message);
}

impl MessageSink for Vec<Message> {
    fn emit(&mut self, message: Message) {
        self.push(message);
    }
}

/// Rendering options for the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOptions {
    /// `{target}` is replaced by the target id.
    pub link_template: String,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            link_template: "{target}".to_string(),
        }
    }
}

impl ReportOptions {
    pub fn link(&self, target: &TargetId) -> String {
        self.link_template.replace("{target}", &target.0)
    }
}

/// What the finalizer reported and removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalReport {
    pub batch_id: BatchId,
    pub success: bool,
    pub failing_operation: Option<FailedOperation>,
    /// Ignored targets, rendered as links, sorted by target id.
    pub ignored: Vec<String>,
    /// Record counts per status, taken just before cleanup.
    pub counts: Vec<(RecordStatus, usize)>,
    pub deleted: usize,
    /// Successful release calls for the run's leftover locks.
    pub released_locks: usize,
}

/// Report the run to `sink`, release the run's leftover locks, then delete
/// every record of the batch.
///
/// Cleanup happens whether the run succeeded or not, so a later run never
/// reprocesses these diffs and no lock outlives the run. Lock errors are
/// logged; store errors name the failing store call.
pub fn finished(
    store: &dyn DiffStore,
    locks: Option<&dyn LockManager>,
    sink: &mut dyn MessageSink,
    options: &ReportOptions,
    success: bool,
    results: &ResultSummary,
    failing_operation: Option<&FailedOperation>,
) -> Result<FinalReport, ApplyError> {
    let batch_id = results.batch_id;

    if !success {
        let text = match failing_operation {
            Some(op) => format!("Error applying results of batch {batch_id}: {op} failed."),
            None => format!("Error applying results of batch {batch_id}."),
        };
        sink.emit(Message::error(text));
    }

    let ignored: Vec<String> = results
        .ignored_targets
        .iter()
        .map(|t| options.link(t))
        .collect();
    if !ignored.is_empty() {
        sink.emit(Message::info(format!(
            "The following objects were modified after the diffs were computed or are locked, \
             and were not updated: {}",
            ignored.join(", ")
        )));
    }

    let released_locks = release_all(locks, &results.held_locks);

    let records = store
        .records(batch_id)
        .map_err(|e| ApplyError::store("records", [batch_id], e))?;
    let counts: Vec<(RecordStatus, usize)> = RecordStatus::ALL
        .iter()
        .map(|status| (*status, records.iter().filter(|r| r.status == *status).count()))
        .filter(|(_, n)| *n > 0)
        .collect();

    let deleted = store
        .delete_all(batch_id)
        .map_err(|e| ApplyError::store("delete_all", [batch_id], e))?;
    tracing::info!("batch {batch_id}: removed {deleted} diff record(s)");

    if success {
        let failed: usize = counts
            .iter()
            .filter(|(status, _)| status.is_failure())
            .map(|(_, n)| n)
            .sum();
        if failed > 0 {
            sink.emit(Message::warning(format!(
                "{failed} diff(s) of batch {batch_id} could not be applied."
            )));
        }

        let breakdown = counts
            .iter()
            .map(|(status, n)| format!("{n} {status}"))
            .collect::<Vec<_>>()
            .join(", ");
        sink.emit(Message::info(if breakdown.is_empty() {
            format!("Batch {batch_id}: nothing to apply.")
        } else {
            format!("Batch {batch_id} applied: {breakdown}.")
        }));
    }

    Ok(FinalReport {
        batch_id,
        success,
        failing_operation: failing_operation.cloned(),
        ignored,
        counts,
        deleted,
        released_locks,
    })
}

fn release_all(locks: Option<&dyn LockManager>, held: &BTreeSet<TargetId>) -> usize {
    let Some(locks) = locks else {
        return 0;
    };
    held.iter()
        .filter(|target| match locks.release(target) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("releasing lock for {target} failed: {err}");
                false
            }
        })
        .count()
}
