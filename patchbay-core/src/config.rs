//! `~/.patchbay/config.yaml` — knobs for the apply run.
//!
//! A missing file means defaults. Unknown keys are rejected so a typo does not
//! silently fall back to a default policy.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::store::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::types::BatchId;

/// Which sub-resource timestamp is compared against the batch `created_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StalenessReference {
    #[default]
    Modified,
    Created,
}

/// How the applicator treats the advisory lock of a record it skips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LockPolicy {
    /// Check lock and staleness first; a skipped record never touches the lock.
    #[default]
    SkipUnlocked,
    /// Acquire the lock even for records that end up skipped, blocking the
    /// target for the rest of the batch.
    LockThenSkip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub staleness_reference: StalenessReference,
    #[serde(default)]
    pub lock_policy: LockPolicy,
    /// Root of the filesystem repository. Relative paths resolve against home.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_root: Option<PathBuf>,
    /// Whether runs consult advisory locks at all.
    #[serde(default = "default_locks_enabled")]
    pub locks: bool,
    /// Directory for advisory lock files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_dir: Option<PathBuf>,
    /// Actor name; each batch run locks as `<lock_owner>:<batch_id>`.
    #[serde(default = "default_lock_owner")]
    pub lock_owner: String,
    /// Rendering of an ignored target; `{target}` is replaced by its id.
    #[serde(default = "default_link_template")]
    pub link_template: String,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_locks_enabled() -> bool {
    true
}

fn default_lock_owner() -> String {
    "patchbay".to_string()
}

fn default_link_template() -> String {
    "{target}".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            staleness_reference: StalenessReference::default(),
            lock_policy: LockPolicy::default(),
            repository_root: None,
            locks: default_locks_enabled(),
            lock_dir: None,
            lock_owner: default_lock_owner(),
            link_template: default_link_template(),
        }
    }
}

impl Config {
    /// Page size clamped to `1..=MAX_PAGE_SIZE`.
    pub fn effective_page_size(&self) -> usize {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    /// `repository_root`, or `<home>/.patchbay/objects`.
    pub fn repository_root_at(&self, home: &Path) -> PathBuf {
        resolve(home, self.repository_root.as_deref(), "objects")
    }

    /// Owner written into lock files by the run of `batch_id`.
    ///
    /// Distinct batches are distinct actors; steps of the same batch share
    /// the owner so a resumed run still recognizes its own locks.
    pub fn lock_owner_for(&self, batch_id: BatchId) -> String {
        format!("{}:{batch_id}", self.lock_owner)
    }

    /// Lock directory, or `None` when locking is disabled.
    pub fn lock_dir_at(&self, home: &Path) -> Option<PathBuf> {
        self.locks
            .then(|| resolve(home, self.lock_dir.as_deref(), "locks"))
    }
}

fn resolve(home: &Path, configured: Option<&Path>, default_leaf: &str) -> PathBuf {
    match configured {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => home.join(path),
        None => home.join(".patchbay").join(default_leaf),
    }
}

/// `<home>/.patchbay/config.yaml` — pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".patchbay").join("config.yaml")
}

/// Load the config under `home`, falling back to defaults when absent.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    load_at(&home)
}
