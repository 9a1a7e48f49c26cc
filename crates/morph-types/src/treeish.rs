use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::MorphError;

/// A resolved handle to a repository state: a commit `sha1` plus zero or more
/// submodule treeishes. Produced by a [`SourceManager`] and consumed by the
/// chunk builder to extract source trees — the engine never talks to a VCS
/// directly, it only calls through this trait.
pub trait Treeish: Send + Sync {
    fn repo(&self) -> &str;
    fn git_ref(&self) -> &str;
    fn sha1(&self) -> &str;
    fn submodules(&self) -> &[Submodule];

    /// Copy the full repository checkout (working tree, not just the
    /// object store) into `dst`, which must not yet exist.
    fn copy_to(&self, dst: &Path) -> Result<(), MorphError>;

    /// Check out `git_ref` inside an already-copied repository at `dst`.
    fn checkout(&self, dst: &Path, git_ref: &str) -> Result<(), MorphError>;

    /// Rewrite a submodule's configured URL to `url` inside the repository
    /// at `dst`, so that later `git submodule` invocations never touch the
    /// network.
    fn set_submodule_url(&self, dst: &Path, name: &str, url: &str) -> Result<(), MorphError>;
}

impl fmt::Debug for dyn Treeish {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Treeish")
            .field("repo", &self.repo())
            .field("git_ref", &self.git_ref())
            .field("sha1", &self.sha1())
            .field("submodules", &self.submodules())
            .finish()
    }
}

/// One entry of a treeish's `submodules` list: a path-qualified name and the
/// resolved treeish for the submodule's own repository state.
#[derive(Clone)]
pub struct Submodule {
    pub name: String,
    pub path: String,
    pub treeish: Arc<dyn Treeish>,
}

impl fmt::Debug for Submodule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submodule")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("treeish", &*self.treeish)
            .finish()
    }
}

/// Resolves `(repo, ref)` pairs to a [`Treeish`]. Repository fetching and
/// local caching of clones are entirely this trait's business — the engine
/// only ever asks for a resolved handle.
pub trait SourceManager: Send + Sync {
    fn get_treeish(&self, repo: &str, git_ref: &str) -> Result<Arc<dyn Treeish>, MorphError>;
}

/// Parses a morphology file out of a treeish. Morphology parsing (YAML/JSON
/// syntax, schema validation) is this trait's business; the engine only
/// consumes the typed [`crate::morphology::Morphology`] it returns.
pub trait MorphLoader: Send + Sync {
    fn load(&self, treeish: &Arc<dyn Treeish>, filename: &str) -> Result<crate::morphology::Morphology, MorphError>;
}
