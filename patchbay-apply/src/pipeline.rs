//! Shared apply pipeline used by the CLI: an in-process scheduler that drives
//! [`step`] to completion, and a resumable single-step entrypoint that keeps
//! the sandbox on disk between process invocations.
//!
//! ```text
//! ~/.patchbay/
//!   runs/<batch_id>.json   (StepContext of an unfinished run)
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use patchbay_core::{BatchId, Config, FileDiffStore};

use crate::applicator::ApplyOptions;
use crate::driver::{step, ApplyContext, StepContext, StepReport};
use crate::error::ApplyError;
use crate::finalizer::{finished, FinalReport, MessageSink, ReportOptions};
use crate::lock::{FsLockManager, LockManager};
use crate::repository::FsRepository;

/// Concrete collaborators built from `config.yaml`.
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub store: FileDiffStore,
    pub repository: FsRepository,
    pub locks: Option<FsLockManager>,
    pub page_size: usize,
    pub options: ApplyOptions,
    pub report: ReportOptions,
}

impl Collaborators {
    /// Wire the file store, filesystem repository and lock directory under
    /// `home` for the run of `batch_id`, which locks as its own owner.
    pub fn from_config_at(home: &Path, config: &Config, batch_id: BatchId) -> Self {
        Self {
            store: FileDiffStore::at(home),
            repository: FsRepository::new(config.repository_root_at(home)),
            locks: config
                .lock_dir_at(home)
                .map(|dir| FsLockManager::new(dir, config.lock_owner_for(batch_id))),
            page_size: config.effective_page_size(),
            options: ApplyOptions {
                staleness_reference: config.staleness_reference,
                lock_policy: config.lock_policy,
            },
            report: ReportOptions {
                link_template: config.link_template.clone(),
            },
        }
    }

    pub fn context(&self) -> ApplyContext<'_> {
        let ctx = ApplyContext::new(&self.store, &self.repository)
            .with_options(self.options)
            .with_page_size(self.page_size);
        match &self.locks {
            Some(locks) => ctx.with_locks(locks as &dyn LockManager),
            None => ctx,
        }
    }
}

/// Apply every pending diff of `batch_id`, then finalize once.
///
/// Steps run until the driver reports FINISHED or a step fails. A failed step
/// marks the run failed; the finalizer still runs and still cleans up. Only a
/// failure of the finalizer itself is returned as `Err`.
pub fn apply_results(
    ctx: &ApplyContext<'_>,
    batch_id: BatchId,
    sink: &mut dyn MessageSink,
    report: &ReportOptions,
) -> Result<FinalReport, ApplyError> {
    let mut sandbox = StepContext::new(batch_id);
    let mut steps = 0usize;
    let failing = loop {
        match step(ctx, batch_id, &mut sandbox) {
            Ok(StepReport { fraction, .. }) if sandbox.is_finished() => {
                tracing::debug!("batch {batch_id}: finished after {steps} step(s) at {fraction}");
                break None;
            }
            Ok(StepReport { fraction, .. }) => {
                steps += 1;
                tracing::debug!("batch {batch_id}: step {steps} at {fraction:.3}");
            }
            Err(err) => {
                tracing::error!("batch {batch_id}: {err}");
                break Some(err.failed_operation());
            }
        }
    };
    sandbox.failed = failing;

    finalize(ctx, &sandbox, sink, report)
}

/// Outcome of one resumable step.
#[derive(Debug, Clone, PartialEq)]
pub enum Resumed {
    /// More work remains; the sandbox was saved.
    Running(StepReport),
    /// The run ended and was finalized; the sandbox was removed.
    Finished(FinalReport),
}

/// `<home>/.patchbay/runs/<batch_id>.json` — pure, no I/O.
pub fn sandbox_path_at(home: &Path, batch_id: BatchId) -> PathBuf {
    home.join(".patchbay")
        .join("runs")
        .join(format!("{batch_id}.json"))
}

/// Load the saved sandbox of `batch_id`, or a fresh one.
pub fn load_sandbox_at(home: &Path, batch_id: BatchId) -> Result<StepContext, ApplyError> {
    let path = sandbox_path_at(home, batch_id);
    match std::fs::read_to_string(&path) {
        Ok(json) => Ok(serde_json::from_str(&json)?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(StepContext::new(batch_id)),
        Err(source) => Err(ApplyError::Sandbox { path, source }),
    }
}

/// Save the sandbox atomically (`.tmp` sibling + rename).
pub fn save_sandbox_at(home: &Path, sandbox: &StepContext) -> Result<(), ApplyError> {
    let path = sandbox_path_at(home, sandbox.summary.batch_id);
    let sandbox_err = |path: &Path, source| ApplyError::Sandbox {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| sandbox_err(dir, e))?;
    }
    let json = serde_json::to_string_pretty(sandbox)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| sandbox_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| sandbox_err(&path, e))
}

fn remove_sandbox_at(home: &Path, batch_id: BatchId) -> Result<(), ApplyError> {
    let path = sandbox_path_at(home, batch_id);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ApplyError::Sandbox { path, source }),
    }
}

/// Run exactly one step of `batch_id`, resuming from the sandbox on disk.
///
/// When the run finishes or fails, the sandbox is saved in its final state,
/// the finalizer runs and the sandbox file is removed. If finalizing fails,
/// the next invocation finalizes again without stepping, so a failed run is
/// never resumed into a successful one. Otherwise the updated sandbox is
/// saved for the next invocation.
pub fn resume_step_at(
    home: &Path,
    ctx: &ApplyContext<'_>,
    batch_id: BatchId,
    sink: &mut dyn MessageSink,
    report: &ReportOptions,
) -> Result<Resumed, ApplyError> {
    let mut sandbox = load_sandbox_at(home, batch_id)?;

    if sandbox.failed.is_none() {
        match step(ctx, batch_id, &mut sandbox) {
            Ok(step_report) if !sandbox.is_finished() => {
                save_sandbox_at(home, &sandbox)?;
                return Ok(Resumed::Running(step_report));
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!("batch {batch_id}: {err}");
                sandbox.failed = Some(err.failed_operation());
            }
        }
        save_sandbox_at(home, &sandbox)?;
    }

    let final_report = finalize(ctx, &sandbox, sink, report)?;
    remove_sandbox_at(home, batch_id)?;
    Ok(Resumed::Finished(final_report))
}

fn finalize(
    ctx: &ApplyContext<'_>,
    sandbox: &StepContext,
    sink: &mut dyn MessageSink,
    report: &ReportOptions,
) -> Result<FinalReport, ApplyError> {
    finished(
        ctx.store,
        ctx.locks,
        sink,
        report,
        sandbox.failed.is_none(),
        &sandbox.summary,
        sandbox.failed.as_ref(),
    )
}
