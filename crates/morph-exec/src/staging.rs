//! Scoped staging areas (spec §4.5, component C5 half).
//!
//! A [`StagingArea`] owns a temporary root directory, removed recursively
//! (best-effort) on drop regardless of which exit path got there — success,
//! a failed build step, or a panic unwinding through the builder.
//! Builder-specific cleanup that must run on every exit path (e.g.
//! `SystemBuilder`'s unmount/detach) is the builder's own responsibility,
//! since only it knows what it acquired and in what order to release it.

use std::io;
use std::path::{Path, PathBuf};

use fs_err as fs;
use tracing::warn;

pub struct StagingArea {
    root: tempfile::TempDir,
}

impl StagingArea {
    pub fn new() -> io::Result<Self> {
        Ok(Self { root: tempfile::tempdir()? })
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn builddir(&self, artifact_name: &str) -> PathBuf {
        self.root.path().join(format!("{artifact_name}.build"))
    }

    pub fn destdir(&self, artifact_name: &str) -> PathBuf {
        self.root.path().join(format!("{artifact_name}.inst"))
    }

    /// Create (if absent) and return this artifact's destdir. Unlike
    /// `builddir`, which a [`Treeish::copy_to`](morph_types::Treeish::copy_to)
    /// populates into a path that must not yet exist, the destdir is always
    /// safe to pre-create.
    pub fn ensure_destdir(&self, artifact_name: &str) -> io::Result<PathBuf> {
        let destdir = self.destdir(artifact_name);
        fs::create_dir_all(&destdir)?;
        Ok(destdir)
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_dir_all(self.root.path()) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!("staging area cleanup left residue at {}: {err}", self.root.path().display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builddir_and_destdir_are_distinct_siblings() {
        let area = StagingArea::new().unwrap();
        let b = area.builddir("hello");
        let d = area.ensure_destdir("hello").unwrap();
        assert_ne!(b, d);
        assert!(b.starts_with(area.root()));
        assert!(d.starts_with(area.root()));
        assert!(d.is_dir());
    }

    #[test]
    fn dropping_the_staging_area_removes_its_root() {
        let area = StagingArea::new().unwrap();
        let root = area.root().to_path_buf();
        area.ensure_destdir("hello").unwrap();
        drop(area);
        assert!(!root.exists());
    }
}
