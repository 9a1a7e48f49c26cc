//! The artifact dependency DAG (spec §4.4, component C4; Design Note 9.1).
//!
//! Represented as an arena of nodes indexed by [`ArtifactId`] rather than
//! `Rc`/`RefCell` back-pointers, so `dependencies`/`dependents` edges can be
//! genuinely bidirectional without a reference cycle.

use std::collections::HashMap;
use std::sync::Arc;

use morph_cache::CacheId;
use morph_types::{ChunkMorphology, MorphError, Treeish};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

/// Index into an [`ArtifactGraph`]'s arena. Stable for the lifetime of the
/// graph; never reused after an artifact is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactId(u32);

/// The kind-specific inputs a builder needs that aren't shared across all
/// three kinds — the spec's "back-reference to source", specialized per
/// kind since a chunk's source is a treeish to check out and commands to
/// run, while a stratum's and a system's are really just their ordered
/// dependency list (already on [`Artifact::dependencies`]) plus one scalar.
#[derive(Debug, Clone)]
pub enum ArtifactDetail {
    Chunk {
        treeish: Arc<dyn Treeish>,
        morphology: Arc<ChunkMorphology>,
        /// Resolved patterns for this specific split name (a chunk
        /// morphology's `chunks` mapping may produce several artifacts).
        patterns: Vec<String>,
        prefix: String,
    },
    Stratum,
    System {
        disk_size: String,
    },
}

#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub kind: &'static str,
    pub repo: String,
    pub git_ref: String,
    pub cache_id: CacheId,
    pub cache_key: String,
    pub metadata_version: u32,
    pub detail: ArtifactDetail,
    dependencies: Vec<ArtifactId>,
    dependents: Vec<ArtifactId>,
}

impl Artifact {
    pub fn dependencies(&self) -> &[ArtifactId] {
        &self.dependencies
    }

    pub fn dependents(&self) -> &[ArtifactId] {
        &self.dependents
    }
}

/// The arena. `add_dependency(a, b)` records that `a` depends on `b` — `b`
/// must be built before `a` — and maintains the reverse `dependents` edge on
/// `b` symmetrically.
#[derive(Debug, Default)]
pub struct ArtifactGraph {
    nodes: Vec<Artifact>,
}

impl ArtifactGraph {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn add_artifact(&mut self, artifact: Artifact) -> ArtifactId {
        let id = ArtifactId(self.nodes.len() as u32);
        self.nodes.push(artifact);
        id
    }

    pub fn get(&self, id: ArtifactId) -> &Artifact {
        &self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ArtifactId> + '_ {
        (0..self.nodes.len()).map(|i| ArtifactId(i as u32))
    }

    /// Idempotent: calling it again with the same pair is a no-op.
    pub fn add_dependency(&mut self, dependent: ArtifactId, dependency: ArtifactId) {
        if !self.nodes[dependent.0 as usize].dependencies.contains(&dependency) {
            self.nodes[dependent.0 as usize].dependencies.push(dependency);
        }
        if !self.nodes[dependency.0 as usize].dependents.contains(&dependent) {
            self.nodes[dependency.0 as usize].dependents.push(dependent);
        }
    }

    /// Depth-first post-order traversal from `root`: every dependency is
    /// yielded before the artifact that depends on it, and each artifact
    /// exactly once even if reachable via multiple paths (shared chunks).
    pub fn walk(&self, root: ArtifactId) -> Vec<ArtifactId> {
        let mut visited = vec![false; self.nodes.len()];
        let mut order = Vec::new();
        self.walk_inner(root, &mut visited, &mut order);
        order
    }

    fn walk_inner(&self, id: ArtifactId, visited: &mut [bool], order: &mut Vec<ArtifactId>) {
        if visited[id.0 as usize] {
            return;
        }
        visited[id.0 as usize] = true;
        for &dep in &self.nodes[id.0 as usize].dependencies {
            self.walk_inner(dep, visited, order);
        }
        order.push(id);
    }

    /// Groups artifacts so that group *i* contains every artifact all of
    /// whose dependencies are in strictly earlier groups. Only artifacts
    /// reachable from `roots` are included. Ties within a group are broken
    /// by arena insertion order (the "stable input order" the spec calls
    /// for).
    ///
    /// A cyclic dependency is a fatal configuration error (spec §3: "The
    /// dependency graph is a DAG. Cycles are a fatal configuration error."),
    /// reported as `MorphError::Configuration` rather than panicking.
    pub fn build_order(&self, roots: &[ArtifactId]) -> Result<Vec<Vec<ArtifactId>>, MorphError> {
        let reachable = self.reachable_from(roots);

        let mut petgraph_index = HashMap::new();
        let mut pg = DiGraph::<ArtifactId, ()>::new();
        for &id in &reachable {
            let idx = pg.add_node(id);
            petgraph_index.insert(id, idx);
        }
        for &id in &reachable {
            for &dep in self.nodes[id.0 as usize].dependencies() {
                if let (Some(&from), Some(&to)) = (petgraph_index.get(&dep), petgraph_index.get(&id)) {
                    pg.add_edge(from, to, ());
                }
            }
        }

        let order = toposort(&pg, None).map_err(|cycle| {
            let id = pg[cycle.node_id()];
            MorphError::configuration(format!("dependency cycle detected at artifact {}", self.nodes[id.0 as usize].name))
        })?;

        let mut level: HashMap<ArtifactId, usize> = HashMap::new();
        for node_idx in &order {
            let id = pg[*node_idx];
            let deps = self.nodes[id.0 as usize].dependencies();
            let lvl = deps
                .iter()
                .filter(|d| reachable.contains(d))
                .map(|d| level.get(d).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            level.insert(id, lvl);
        }

        let max_level = level.values().copied().max().unwrap_or(0);
        let mut groups = vec![Vec::new(); max_level + 1];
        // Iterate in arena order, not toposort order, so ties within a
        // group land in stable insertion order.
        for &id in &reachable {
            groups[level[&id]].push(id);
        }
        Ok(groups)
    }

    fn reachable_from(&self, roots: &[ArtifactId]) -> Vec<ArtifactId> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack: Vec<ArtifactId> = roots.to_vec();
        let mut out = Vec::new();
        while let Some(id) = stack.pop() {
            if seen[id.0 as usize] {
                continue;
            }
            seen[id.0 as usize] = true;
            out.push(id);
            stack.extend(self.nodes[id.0 as usize].dependencies().iter().copied());
        }
        out.sort();
        out
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn new_artifact(
    name: String,
    kind: &'static str,
    repo: String,
    git_ref: String,
    cache_id: CacheId,
    cache_key: String,
    metadata_version: u32,
    detail: ArtifactDetail,
) -> Artifact {
    Artifact {
        name,
        kind,
        repo,
        git_ref,
        cache_id,
        cache_key,
        metadata_version,
        detail,
        dependencies: Vec::new(),
        dependents: Vec::new(),
    }
}
