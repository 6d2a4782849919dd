//! `patchbay step` — one bounded unit of work per invocation.
//!
//! The run's sandbox is kept in `~/.patchbay/runs/<batch>.json` between
//! invocations, so a batch can be driven by an external scheduler (cron, a
//! queue worker) one step at a time.

use anyhow::{Context, Result};
use clap::Args;

use patchbay_apply::{pipeline::resume_step_at, Resumed};
use patchbay_core::BatchId;

use super::{check_report, collaborators, home, ConsoleSink};

/// Arguments for `patchbay step`.
#[derive(Args, Debug)]
pub struct StepArgs {
    /// Identifier of the batch to advance.
    pub batch: u64,
}

impl StepArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let batch_id = BatchId(self.batch);
        let collaborators = collaborators(&home, batch_id)?;

        let resumed = resume_step_at(
            &home,
            &collaborators.context(),
            batch_id,
            &mut ConsoleSink,
            &collaborators.report,
        )
        .with_context(|| format!("step of batch {batch_id} failed"))?;

        match resumed {
            Resumed::Running(report) => {
                println!(
                    "Batch {batch_id}: {:.0}% done ({} record(s) this step).",
                    report.fraction * 100.0,
                    report.processed
                );
                Ok(())
            }
            Resumed::Finished(report) => check_report(&report),
        }
    }
}
