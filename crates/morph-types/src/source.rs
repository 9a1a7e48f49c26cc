use std::sync::Arc;

use crate::morphology::Morphology;
use crate::treeish::Treeish;

/// A record naming one build input: a repository, a resolved ref, its parsed
/// morphology, and the install prefix its chunk output should use.
#[derive(Clone)]
pub struct Source {
    pub repo: String,
    pub git_ref: String,
    pub morphology: Morphology,
    pub treeish: Arc<dyn Treeish>,
    pub prefix: String,
}

impl Source {
    pub const DEFAULT_PREFIX: &'static str = "/usr";

    pub fn new(repo: impl Into<String>, git_ref: impl Into<String>, morphology: Morphology, treeish: Arc<dyn Treeish>) -> Self {
        Self {
            repo: repo.into(),
            git_ref: git_ref.into(),
            morphology,
            treeish,
            prefix: Self::DEFAULT_PREFIX.to_string(),
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("repo", &self.repo)
            .field("git_ref", &self.git_ref)
            .field("morphology", &self.morphology)
            .field("prefix", &self.prefix)
            .finish()
    }
}
