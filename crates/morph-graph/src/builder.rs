//! Builds an [`ArtifactGraph`] from a set of root morphologies (spec §4.3
//! CacheKeyComputer, §4.4 ArtifactGraph "artifacts are created by the graph
//! builder after morphology loading").
//!
//! `cache_id` assembly happens bottom-up as each artifact is created: a
//! chunk's `kids` is empty, a stratum's is the concatenation of its chunks'
//! `cache_key`s in source order, a system's is the concatenation of its
//! strata's `cache_key`s in declared order.
//!
//! A builder owns a single [`ArtifactGraph`] across every morphology it
//! resolves, so that two strata sharing a chunk (or a system pulling in
//! several strata) end up as dependency edges into the *same* arena rather
//! than duplicated artifacts in disconnected graphs.

use std::sync::Arc;

use morph_cache::{CacheDir, CacheId};
use morph_types::{ChunkMorphology, Morphology, MorphError, MorphLoader, Source, SourceManager, StratumMorphology, SystemMorphology, Treeish};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::graph::{new_artifact, ArtifactDetail, ArtifactGraph, ArtifactId};

/// Bumping this invalidates every cached artifact (spec §9 "cache metadata
/// compatibility") since it's concatenated into every `cache_id`.
pub const METADATA_VERSION: u32 = 1;

type MorphKey = (String, String, String);

pub struct GraphBuilder {
    sources: Arc<dyn SourceManager>,
    loader: Arc<dyn MorphLoader>,
    arch: String,
    graph: ArtifactGraph,
    morphology_cache: FxHashMap<MorphKey, (Arc<dyn Treeish>, Morphology)>,
    chunk_artifacts: FxHashMap<MorphKey, Vec<(String, ArtifactId)>>,
    stratum_artifacts: FxHashMap<MorphKey, ArtifactId>,
}

impl GraphBuilder {
    pub fn new(sources: Arc<dyn SourceManager>, loader: Arc<dyn MorphLoader>, arch: impl Into<String>) -> Self {
        Self {
            sources,
            loader,
            arch: arch.into(),
            graph: ArtifactGraph::new(),
            morphology_cache: FxHashMap::default(),
            chunk_artifacts: FxHashMap::default(),
            stratum_artifacts: FxHashMap::default(),
        }
    }

    pub fn graph(&self) -> &ArtifactGraph {
        &self.graph
    }

    /// Consume the builder, returning the accumulated graph.
    pub fn into_graph(self) -> ArtifactGraph {
        self.graph
    }

    /// Resolve and parse a morphology, memoized by `(repo, ref,
    /// morph-filename)` per spec §4.3.
    fn resolve(&mut self, repo: &str, git_ref: &str, morph_filename: &str) -> Result<(Arc<dyn Treeish>, Morphology), MorphError> {
        let key = (repo.to_string(), git_ref.to_string(), morph_filename.to_string());
        if let Some(cached) = self.morphology_cache.get(&key) {
            return Ok(cached.clone());
        }
        let treeish = self.sources.get_treeish(repo, git_ref)?;
        let morphology = self.loader.load(&treeish, morph_filename)?;
        self.morphology_cache.insert(key, (treeish.clone(), morphology.clone()));
        Ok((treeish, morphology))
    }

    /// Build (or return cached) the artifacts for a chunk morphology: one
    /// per entry of its resolved `chunks` mapping, in declaration order.
    fn build_chunk(&mut self, cache: &CacheDir, repo: &str, git_ref: &str, morph_filename: &str) -> Result<Vec<(String, ArtifactId)>, MorphError> {
        let key = (repo.to_string(), git_ref.to_string(), morph_filename.to_string());
        if let Some(cached) = self.chunk_artifacts.get(&key) {
            return Ok(cached.clone());
        }

        let (treeish, morphology) = self.resolve(repo, git_ref, morph_filename)?;
        let chunk: &ChunkMorphology = match &morphology {
            Morphology::Chunk(c) => c,
            other => {
                return Err(MorphError::configuration(format!(
                    "{repo}@{git_ref}/{morph_filename}: expected a chunk morphology, found a {} one",
                    other.kind()
                )))
            }
        };

        let sha1 = treeish.sha1().to_string();
        let morphology_arc = Arc::new(chunk.clone());
        let mut result = Vec::new();
        for (name, patterns) in chunk.resolved_chunks() {
            let cache_id = CacheId {
                name: name.clone(),
                arch: self.arch.clone(),
                git_ref: sha1.clone(),
                kids: String::new(),
                metadata_version: METADATA_VERSION,
            };
            let cache_key = cache.key(&cache_id);
            debug!("chunk artifact {name} ({repo}@{git_ref}) -> {cache_key}");
            let detail = ArtifactDetail::Chunk {
                treeish: treeish.clone(),
                morphology: morphology_arc.clone(),
                patterns,
                prefix: Source::DEFAULT_PREFIX.to_string(),
            };
            let artifact = new_artifact(
                name.clone(),
                "chunk",
                repo.to_string(),
                git_ref.to_string(),
                cache_id,
                cache_key,
                METADATA_VERSION,
                detail,
            );
            let id = self.graph.add_artifact(artifact);
            result.push((name, id));
        }

        self.chunk_artifacts.insert(key, result.clone());
        Ok(result)
    }

    /// Build (or return cached) the artifact for a stratum morphology.
    fn build_stratum(&mut self, cache: &CacheDir, repo: &str, git_ref: &str, morph_filename: &str) -> Result<ArtifactId, MorphError> {
        let key = (repo.to_string(), git_ref.to_string(), morph_filename.to_string());
        if let Some(&cached) = self.stratum_artifacts.get(&key) {
            return Ok(cached);
        }

        let (treeish, morphology) = self.resolve(repo, git_ref, morph_filename)?;
        let stratum: StratumMorphology = match morphology {
            Morphology::Stratum(s) => s,
            other => {
                return Err(MorphError::configuration(format!(
                    "{repo}@{git_ref}/{morph_filename}: expected a stratum morphology, found a {} one",
                    other.kind()
                )))
            }
        };
        let sha1 = treeish.sha1().to_string();

        let mut kids = String::new();
        let mut dependency_ids = Vec::new();

        for source in &stratum.sources {
            let source_repo = source.repo.clone();
            let source_ref = source.git_ref.clone();
            let source_morph_filename = source.morph_filename();
            let chunks = self.build_chunk(cache, &source_repo, &source_ref, &source_morph_filename)?;
            let (_, chunk_id) = chunks.iter().find(|(name, _)| name == &source.name).ok_or_else(|| {
                MorphError::configuration(format!(
                    "stratum {}: source {} does not name any chunk produced by {source_repo}@{source_ref}/{source_morph_filename}",
                    stratum.name, source.name
                ))
            })?;
            kids.push_str(&self.graph.get(*chunk_id).cache_key);
            dependency_ids.push(*chunk_id);
        }

        let mut build_depends_ids = Vec::new();
        if let Some(build_depends) = &stratum.build_depends {
            for dep_name in build_depends {
                let dep_morph_filename = format!("{dep_name}.morph");
                let dep_id = self.build_stratum(cache, repo, git_ref, &dep_morph_filename)?;
                build_depends_ids.push(dep_id);
            }
        }

        let cache_id = CacheId {
            name: stratum.name.clone(),
            arch: self.arch.clone(),
            git_ref: sha1,
            kids,
            metadata_version: METADATA_VERSION,
        };
        let cache_key = cache.key(&cache_id);
        debug!("stratum artifact {} ({repo}@{git_ref}) -> {cache_key}", stratum.name);
        let artifact = new_artifact(
            stratum.name.clone(),
            "stratum",
            repo.to_string(),
            git_ref.to_string(),
            cache_id,
            cache_key,
            METADATA_VERSION,
            ArtifactDetail::Stratum,
        );
        let id = self.graph.add_artifact(artifact);

        for dep in dependency_ids.into_iter().chain(build_depends_ids) {
            self.graph.add_dependency(id, dep);
        }

        self.stratum_artifacts.insert(key, id);
        Ok(id)
    }

    /// Build the artifact for a system morphology. Each of its `strata`
    /// names is resolved as a sibling stratum in the same `(repo, ref)` as
    /// the system morphology itself — the system, its strata, and their
    /// chunks are conventionally defined together in one "definitions" repo.
    fn build_system(&mut self, cache: &CacheDir, repo: &str, git_ref: &str, morph_filename: &str) -> Result<ArtifactId, MorphError> {
        let (treeish, morphology) = self.resolve(repo, git_ref, morph_filename)?;
        let system: SystemMorphology = match morphology {
            Morphology::System(s) => s,
            other => {
                return Err(MorphError::configuration(format!(
                    "{repo}@{git_ref}/{morph_filename}: expected a system morphology, found a {} one",
                    other.kind()
                )))
            }
        };
        let sha1 = treeish.sha1().to_string();

        let mut kids = String::new();
        let mut dependency_ids = Vec::new();
        for stratum_name in &system.strata {
            let stratum_morph_filename = format!("{stratum_name}.morph");
            let stratum_id = self.build_stratum(cache, repo, git_ref, &stratum_morph_filename)?;
            kids.push_str(&self.graph.get(stratum_id).cache_key);
            dependency_ids.push(stratum_id);
        }

        let cache_id = CacheId {
            name: system.name.clone(),
            arch: self.arch.clone(),
            git_ref: sha1,
            kids,
            metadata_version: METADATA_VERSION,
        };
        let cache_key = cache.key(&cache_id);
        debug!("system artifact {} ({repo}@{git_ref}) -> {cache_key}", system.name);
        let artifact = new_artifact(
            system.name.clone(),
            "system",
            repo.to_string(),
            git_ref.to_string(),
            cache_id,
            cache_key,
            METADATA_VERSION,
            ArtifactDetail::System { disk_size: system.disk_size.clone() },
        );
        let id = self.graph.add_artifact(artifact);

        for dep in dependency_ids {
            self.graph.add_dependency(id, dep);
        }

        Ok(id)
    }

    /// Resolve `(repo, ref, morph_filename)`, appending the result into this
    /// builder's accumulated graph, and return the root artifact id(s) it
    /// produced — a chunk morphology yields one root per entry in its
    /// `chunks` mapping; a stratum or system yields exactly one. Call this
    /// more than once (e.g. once per stratum of a system you're assembling
    /// by hand) to populate one shared graph.
    pub fn build(&mut self, cache: &CacheDir, repo: &str, git_ref: &str, morph_filename: &str) -> Result<Vec<ArtifactId>, MorphError> {
        let (_, morphology) = self.resolve(repo, git_ref, morph_filename)?;
        let roots = match morphology {
            Morphology::Chunk(_) => self
                .build_chunk(cache, repo, git_ref, morph_filename)?
                .into_iter()
                .map(|(_, id)| id)
                .collect(),
            Morphology::Stratum(_) => vec![self.build_stratum(cache, repo, git_ref, morph_filename)?],
            Morphology::System(_) => vec![self.build_system(cache, repo, git_ref, morph_filename)?],
        };
        Ok(roots)
    }
}
