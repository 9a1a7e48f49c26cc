//! In-memory test doubles for [`crate::treeish::SourceManager`] and
//! [`crate::treeish::MorphLoader`], gated behind the `test-util` feature so
//! `morph-graph` and `morph-build` can exercise the graph/scheduler without
//! a real repository fetcher or morphology parser.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::MorphError;
use crate::morphology::Morphology;
use crate::treeish::{MorphLoader, SourceManager, Submodule, Treeish};

/// A [`Treeish`] that just records what it was asked to do, for assertions
/// in tests. `copy_to`/`checkout` write a single marker file so callers that
/// check "did extraction happen" have something to look for.
#[derive(Debug)]
pub struct FakeTreeish {
    pub repo: String,
    pub git_ref: String,
    pub sha1: String,
    pub submodules: Vec<Submodule>,
}

impl FakeTreeish {
    pub fn new(repo: impl Into<String>, git_ref: impl Into<String>, sha1: impl Into<String>) -> Arc<dyn Treeish> {
        Arc::new(Self {
            repo: repo.into(),
            git_ref: git_ref.into(),
            sha1: sha1.into(),
            submodules: Vec::new(),
        })
    }
}

impl Treeish for FakeTreeish {
    fn repo(&self) -> &str {
        &self.repo
    }

    fn git_ref(&self) -> &str {
        &self.git_ref
    }

    fn sha1(&self) -> &str {
        &self.sha1
    }

    fn submodules(&self) -> &[Submodule] {
        &self.submodules
    }

    fn copy_to(&self, dst: &Path) -> Result<(), MorphError> {
        std::fs::create_dir_all(dst)?;
        std::fs::write(dst.join(".fake-treeish"), &self.sha1)?;
        Ok(())
    }

    fn checkout(&self, dst: &Path, git_ref: &str) -> Result<(), MorphError> {
        std::fs::write(dst.join(".fake-checkout"), git_ref)?;
        Ok(())
    }

    fn set_submodule_url(&self, _dst: &Path, _name: &str, _url: &str) -> Result<(), MorphError> {
        Ok(())
    }
}

/// A [`SourceManager`] backed by a fixed in-memory map of `(repo, ref) ->
/// Treeish`.
#[derive(Default)]
pub struct StaticSourceManager {
    treeishes: Mutex<HashMap<(String, String), Arc<dyn Treeish>>>,
}

impl StaticSourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, repo: impl Into<String>, git_ref: impl Into<String>, treeish: Arc<dyn Treeish>) {
        self.treeishes
            .lock()
            .unwrap()
            .insert((repo.into(), git_ref.into()), treeish);
    }
}

impl SourceManager for StaticSourceManager {
    fn get_treeish(&self, repo: &str, git_ref: &str) -> Result<Arc<dyn Treeish>, MorphError> {
        self.treeishes
            .lock()
            .unwrap()
            .get(&(repo.to_string(), git_ref.to_string()))
            .cloned()
            .ok_or_else(|| MorphError::source(repo, git_ref, "no such treeish registered"))
    }
}

/// A [`MorphLoader`] backed by a fixed in-memory map of filename ->
/// morphology.
#[derive(Default)]
pub struct StaticMorphLoader {
    morphologies: Mutex<HashMap<String, Morphology>>,
}

impl StaticMorphLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, filename: impl Into<String>, morphology: Morphology) {
        self.morphologies
            .lock()
            .unwrap()
            .insert(filename.into(), morphology);
    }
}

impl MorphLoader for StaticMorphLoader {
    fn load(&self, _treeish: &Arc<dyn Treeish>, filename: &str) -> Result<Morphology, MorphError> {
        self.morphologies
            .lock()
            .unwrap()
            .get(filename)
            .cloned()
            .ok_or_else(|| MorphError::configuration(format!("no morphology registered for {filename}")))
    }
}
