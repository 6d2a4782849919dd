//! Resource repository port and its filesystem adapter.
//!
//! A target resource is a directory; each sub-resource is a file inside it:
//!
//! ```text
//! <root>/
//!   <target_id>/
//!     <sub_resource_id>
//! ```

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use patchbay_core::{StalenessReference, SubResourceId, TargetId};

use crate::error::{repo_io_err, RepositoryError};

/// A named content stream attached to a target resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubResource {
    pub id: SubResourceId,
    pub content: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl SubResource {
    /// The timestamp compared against a batch's `created_at`.
    pub fn timestamp(&self, reference: StalenessReference) -> DateTime<Utc> {
        match reference {
            StalenessReference::Modified => self.modified_at,
            StalenessReference::Created => self.created_at,
        }
    }
}

/// A loaded target resource and its sub-resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub id: TargetId,
    sub_resources: BTreeMap<SubResourceId, SubResource>,
}

impl Resource {
    pub fn new(id: TargetId) -> Self {
        Self {
            id,
            sub_resources: BTreeMap::new(),
        }
    }

    pub fn with_sub_resource(mut self, sub: SubResource) -> Self {
        self.sub_resources.insert(sub.id.clone(), sub);
        self
    }

    pub fn sub_resource(&self, id: &SubResourceId) -> Option<&SubResource> {
        self.sub_resources.get(id)
    }

    pub fn sub_resource_ids(&self) -> impl Iterator<Item = &SubResourceId> {
        self.sub_resources.keys()
    }
}

/// The object store the diffs are applied to. Calls are synchronous.
pub trait Repository {
    fn load(&self, target: &TargetId) -> Result<Resource, RepositoryError>;

    fn save_content(
        &self,
        target: &TargetId,
        sub_resource: &SubResourceId,
        content: &[u8],
    ) -> Result<(), RepositoryError>;
}

// ---------------------------------------------------------------------------
// Filesystem adapter
// ---------------------------------------------------------------------------

/// [`Repository`] over a directory tree.
#[derive(Debug, Clone)]
pub struct FsRepository {
    root: PathBuf,
}

impl FsRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<target>` — validates the id, no I/O.
    pub fn target_dir(&self, target: &TargetId) -> Result<PathBuf, RepositoryError> {
        Ok(self.root.join(path_segment(&target.0)?))
    }

    /// `<root>/<target>/<sub_resource>` — validates both ids, no I/O.
    pub fn sub_resource_path(
        &self,
        target: &TargetId,
        sub_resource: &SubResourceId,
    ) -> Result<PathBuf, RepositoryError> {
        Ok(self
            .target_dir(target)?
            .join(path_segment(&sub_resource.0)?))
    }
}

impl Repository for FsRepository {
    fn load(&self, target: &TargetId) -> Result<Resource, RepositoryError> {
        let dir = self.target_dir(target)?;
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(RepositoryError::NotFound(target.clone()));
            }
            Err(err) => return Err(repo_io_err(&dir, err)),
        };

        let mut resource = Resource::new(target.clone());
        for entry in entries {
            let entry = entry.map_err(|e| repo_io_err(&dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || name.ends_with(".tmp") {
                continue;
            }
            let path = entry.path();
            let meta = entry.metadata().map_err(|e| repo_io_err(&path, e))?;
            if !meta.is_file() {
                continue;
            }

            let modified_at: DateTime<Utc> = meta
                .modified()
                .map_err(|e| repo_io_err(&path, e))?
                .into();
            // Not every filesystem records a birth time.
            let created_at: DateTime<Utc> = meta.created().map(Into::into).unwrap_or(modified_at);
            let content = std::fs::read(&path).map_err(|e| repo_io_err(&path, e))?;

            resource = resource.with_sub_resource(SubResource {
                id: SubResourceId::from(name),
                content,
                created_at,
                modified_at,
            });
        }
        Ok(resource)
    }

    /// Atomic write: `<file>.tmp` sibling, then rename.
    fn save_content(
        &self,
        target: &TargetId,
        sub_resource: &SubResourceId,
        content: &[u8],
    ) -> Result<(), RepositoryError> {
        let path = self.sub_resource_path(target, sub_resource)?;
        let dir = self.target_dir(target)?;
        if !dir.is_dir() {
            return Err(RepositoryError::NotFound(target.clone()));
        }

        let tmp = PathBuf::from(format!("{}.tmp", path.display()));
        std::fs::write(&tmp, content).map_err(|e| repo_io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(repo_io_err(&path, e));
        }
        Ok(())
    }
}

/// Reject ids that would escape their directory.
pub(crate) fn path_segment(id: &str) -> Result<&str, RepositoryError> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.starts_with('.')
        || id.contains(['/', '\\', '\0']);
    if bad {
        Err(RepositoryError::InvalidId(id.to_string()))
    } else {
        Ok(id)
    }
}
