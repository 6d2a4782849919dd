//! # patchbay-apply
//!
//! Batched, resumable application of stored unified diffs to repository
//! content, guarded by a staleness check and advisory locks.
//!
//! Call [`pipeline::apply_results`] to run a whole batch in-process, or drive
//! [`step`] yourself with a [`StepContext`] sandbox and finish with
//! [`finished`].

pub mod applicator;
pub mod driver;
pub mod error;
pub mod finalizer;
pub mod lock;
pub mod patch;
pub mod pipeline;
pub mod progress;
pub mod repository;

pub use applicator::{Applicator, ApplyOptions, IgnoreReason, Outcome};
pub use driver::{step, ApplyContext, DriverState, ResultSummary, StepContext, StepReport};
pub use error::{
    ApplyError, FailedOperation, LockError, PatchError, RecordError, RepositoryError,
};
pub use finalizer::{finished, FinalReport, Message, MessageLevel, MessageSink, ReportOptions};
pub use lock::{FsLockManager, LockManager};
pub use pipeline::{apply_results, Collaborators, Resumed};
pub use progress::ProgressState;
pub use repository::{FsRepository, Repository, Resource, SubResource};
