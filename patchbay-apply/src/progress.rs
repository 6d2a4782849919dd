//! Processed/total counters carried across step invocations.

use serde::{Deserialize, Serialize};

/// Progress of one batch run. Lives in the step sandbox, never in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    pub processed: usize,
    pub total: usize,
}

impl ProgressState {
    /// Start a run over `total` pending records.
    pub fn start(total: usize) -> Self {
        Self {
            processed: 0,
            total,
        }
    }

    /// Count one record, whatever its outcome.
    pub fn increment(&mut self) {
        self.processed += 1;
    }

    /// Completion fraction in `0.0..=1.0`; an empty run is complete.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.processed.min(self.total) as f64 / self.total as f64
    }

    pub fn is_complete(&self) -> bool {
        self.processed >= self.total
    }
}
