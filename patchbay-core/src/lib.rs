//! Patchbay core library — typed diff records, the diff record store, and
//! configuration.
//!
//! - [`types`] — identifier newtypes, [`DiffRecord`], [`Batch`], [`RecordStatus`]
//! - [`store`] — the [`DiffStore`] contract and its JSON file implementation
//! - [`config`] — `~/.patchbay/config.yaml`
//! - [`error`] — [`StoreError`], [`ConfigError`]

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::{Config, LockPolicy, StalenessReference};
pub use error::{ConfigError, StoreError};
pub use store::{DiffStore, FileDiffStore, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use types::{
    Batch, BatchId, DiffRecord, FailurePolicy, RecordId, RecordStatus, SubResourceId, TargetId,
};
