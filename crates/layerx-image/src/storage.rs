//! Scratch workspace for staging image exports.
//!
//! An export is unpacked into a private temporary directory whose layout
//! mirrors the export itself (`<layer id>/layer.tar`). The directory is
//! removed when the [`ScratchDir`] is closed or dropped; removal failures
//! are logged and otherwise ignored.

use std::path::{Component, Path, PathBuf};

use layerx_common::constants::LAYER_TAR_NAME;
use layerx_common::error::{LayerxError, Result};
use layerx_common::types::LayerId;

const SCRATCH_PREFIX: &str = "layerx-";

/// Private temporary directory owned by one flatten run.
#[derive(Debug)]
pub struct ScratchDir {
    dir: tempfile::TempDir,
    /// Canonical form of `dir`, symlinks resolved.
    root: PathBuf,
}

impl ScratchDir {
    /// Creates a scratch directory under the system temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or resolved.
    pub fn new() -> Result<Self> {
        Self::in_dir(std::env::temp_dir())
    }

    /// Creates a scratch directory under `parent`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or resolved.
    pub fn in_dir(parent: impl AsRef<Path>) -> Result<Self> {
        let parent = parent.as_ref();
        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(parent)
            .map_err(|e| LayerxError::io(parent, e))?;
        let root = dir
            .path()
            .canonicalize()
            .map_err(|e| LayerxError::io(dir.path(), e))?;
        tracing::debug!(path = %root.display(), "created scratch directory");
        Ok(Self { dir, root })
    }

    /// Returns the canonical scratch root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns where a staged export keeps a layer's payload.
    #[must_use]
    pub fn layer_tar_path(&self, id: &LayerId) -> PathBuf {
        self.root.join(id.as_str()).join(LAYER_TAR_NAME)
    }

    /// Resolves an archive entry name to its destination inside the root.
    ///
    /// The name is normalized lexically against the root, and the deepest
    /// already-existing ancestor of the result is canonicalized so that
    /// symlinks unpacked by earlier entries cannot redirect it. Returns
    /// `Ok(None)` when the name refers to the root itself.
    ///
    /// # Errors
    ///
    /// Returns `LayerxError::UnsafeTarPath` if the destination is absolute
    /// or falls outside the root.
    pub fn resolve_entry(&self, name: &str) -> Result<Option<PathBuf>> {
        let unsafe_path = || LayerxError::UnsafeTarPath {
            path: name.to_string(),
        };

        let mut relative = PathBuf::new();
        for component in Path::new(name).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !relative.pop() {
                        return Err(unsafe_path());
                    }
                }
                Component::RootDir | Component::Prefix(_) => return Err(unsafe_path()),
            }
        }
        if relative.as_os_str().is_empty() {
            return Ok(None);
        }

        let dest = self.root.join(&relative);
        let mut existing = dest.parent();
        while let Some(candidate) = existing {
            if candidate.symlink_metadata().is_ok() {
                let resolved = candidate
                    .canonicalize()
                    .map_err(|e| LayerxError::io(candidate, e))?;
                if !resolved.starts_with(&self.root) {
                    return Err(unsafe_path());
                }
                break;
            }
            existing = candidate.parent();
        }

        Ok(Some(dest))
    }

    /// Removes the directory now, logging instead of failing.
    pub fn close(self) {
        let path = self.root.clone();
        if let Err(e) = self.dir.close() {
            tracing::debug!(path = %path.display(), error = %e, "failed to remove scratch directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> (tempfile::TempDir, ScratchDir) {
        let parent = tempfile::tempdir().expect("tempdir");
        let scratch = ScratchDir::in_dir(parent.path()).expect("scratch");
        (parent, scratch)
    }

    #[test]
    fn resolve_entry_keeps_relative_paths_inside() {
        let (_parent, scratch) = scratch();
        let dest = scratch.resolve_entry("./abc/layer.tar").expect("safe");
        assert_eq!(dest, Some(scratch.root().join("abc/layer.tar")));
    }

    #[test]
    fn resolve_entry_allows_inner_parent_components() {
        let (_parent, scratch) = scratch();
        let dest = scratch.resolve_entry("a/../b").expect("safe");
        assert_eq!(dest, Some(scratch.root().join("b")));
    }

    #[test]
    fn resolve_entry_root_itself_is_none() {
        let (_parent, scratch) = scratch();
        assert_eq!(scratch.resolve_entry("./").expect("safe"), None);
    }

    #[test]
    fn resolve_entry_rejects_escape() {
        let (_parent, scratch) = scratch();
        let err = scratch.resolve_entry("a/../../etc/passwd").unwrap_err();
        assert!(matches!(err, LayerxError::UnsafeTarPath { .. }));
    }

    #[test]
    fn resolve_entry_rejects_absolute() {
        let (_parent, scratch) = scratch();
        assert!(scratch.resolve_entry("/etc/passwd").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn resolve_entry_rejects_symlinked_parent() {
        let (parent, scratch) = scratch();
        std::os::unix::fs::symlink(parent.path(), scratch.root().join("link")).expect("symlink");
        let err = scratch.resolve_entry("link/owned").unwrap_err();
        assert!(matches!(err, LayerxError::UnsafeTarPath { .. }));
    }

    #[test]
    fn layer_tar_path_nests_under_id() {
        let (_parent, scratch) = scratch();
        let id = LayerId::from_hex("ab".repeat(32)).expect("id");
        let path = scratch.layer_tar_path(&id);
        assert!(path.ends_with(format!("{}/layer.tar", "ab".repeat(32))));
    }

    #[test]
    fn close_removes_directory() {
        let (_parent, scratch) = scratch();
        let root = scratch.root().to_path_buf();
        assert!(root.exists());
        scratch.close();
        assert!(!root.exists());
    }

    #[test]
    fn drop_removes_directory() {
        let (_parent, scratch) = scratch();
        let root = scratch.root().to_path_buf();
        drop(scratch);
        assert!(!root.exists());
    }
}
