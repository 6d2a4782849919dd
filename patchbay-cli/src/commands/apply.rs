//! `patchbay apply` — run a whole batch in this process.

use anyhow::{Context, Result};
use clap::Args;

use patchbay_apply::apply_results;
use patchbay_core::BatchId;

use super::{check_report, collaborators, home, ConsoleSink};

/// Arguments for `patchbay apply`.
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Identifier of the batch to apply.
    pub batch: u64,
}

impl ApplyArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let batch_id = BatchId(self.batch);
        let collaborators = collaborators(&home, batch_id)?;

        let report = apply_results(
            &collaborators.context(),
            batch_id,
            &mut ConsoleSink,
            &collaborators.report,
        )
        .with_context(|| format!("finalizing batch {batch_id} failed"))?;

        check_report(&report)
    }
}
