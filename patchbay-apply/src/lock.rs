//! Advisory per-target locks.
//!
//! Locks are best-effort markers shared between actors. Nothing enforces them;
//! the applicator consults them before patching and treats every lock error as
//! a warning.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use patchbay_core::TargetId;

use crate::error::{lock_io_err, LockError};
use crate::repository::path_segment;

pub trait LockManager {
    /// Whether `target` is held by an actor other than this one.
    fn is_locked(&self, target: &TargetId) -> Result<bool, LockError>;

    /// Take the lock for this actor. `Ok(false)` when another actor holds it.
    fn acquire(&self, target: &TargetId) -> Result<bool, LockError>;

    /// Drop this actor's lock. Locks held by other actors are left alone.
    fn release(&self, target: &TargetId) -> Result<(), LockError>;
}

/// One `<target>.lock` file per locked target, containing the owner name.
#[derive(Debug, Clone)]
pub struct FsLockManager {
    dir: PathBuf,
    owner: String,
}

impl FsLockManager {
    pub fn new(dir: impl Into<PathBuf>, owner: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            owner: owner.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn lock_path(&self, target: &TargetId) -> Result<PathBuf, LockError> {
        let segment =
            path_segment(&target.0).map_err(|_| LockError::InvalidId(target.0.clone()))?;
        Ok(self.dir.join(format!("{segment}.lock")))
    }

    fn holder(&self, path: &Path) -> Result<Option<String>, LockError> {
        match std::fs::read_to_string(path) {
            Ok(owner) => Ok(Some(owner.trim().to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(lock_io_err(path, err)),
        }
    }
}

impl LockManager for FsLockManager {
    fn is_locked(&self, target: &TargetId) -> Result<bool, LockError> {
        let path = self.lock_path(target)?;
        Ok(self
            .holder(&path)?
            .is_some_and(|owner| owner != self.owner))
    }

    /// The owner is written to a private `.tmp` file which is then hard-linked
    /// into place, so the lock file never exists without its owner.
    fn acquire(&self, target: &TargetId) -> Result<bool, LockError> {
        let path = self.lock_path(target)?;
        std::fs::create_dir_all(&self.dir).map_err(|e| lock_io_err(&self.dir, e))?;

        let tmp = PathBuf::from(format!("{}.{}.tmp", path.display(), std::process::id()));
        std::fs::write(&tmp, self.owner.as_bytes()).map_err(|e| lock_io_err(&tmp, e))?;
        let linked = std::fs::hard_link(&tmp, &path);
        let _ = std::fs::remove_file(&tmp);

        match linked {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Ok(self.holder(&path)?.as_deref() == Some(self.owner.as_str()))
            }
            Err(err) => Err(lock_io_err(&path, err)),
        }
    }

    fn release(&self, target: &TargetId) -> Result<(), LockError> {
        let path = self.lock_path(target)?;
        match self.holder(&path)? {
            Some(owner) if owner == self.owner => match std::fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(lock_io_err(&path, err)),
            },
            _ => Ok(()),
        }
    }
}
