//! The build scheduler (spec §4.10, component C10; §5 concurrency model).
//!
//! Drives a [`ArtifactGraph::build_order`] group by group: artifacts within
//! a group build concurrently (one `tokio::task` each), but the scheduler
//! only mutates its own bookkeeping (`produced`) between groups, after every
//! task in the current one has joined — so that bookkeeping never needs a
//! lock (spec §5, "this avoids locking stage_items").
//!
//! Rather than pushing `(name, archive_path)` pairs onto each dependent's
//! `stage_items` as dependencies complete (the literal algorithm in spec
//! §4.10), this computes a dependent's `stage_items` lazily, right before
//! building it, by reading its own `dependencies()` list (which is already
//! in declared source order — see `morph-graph`'s builder) against the
//! `produced` map. Every dependency is guaranteed present in `produced` by
//! then, because `build_order` never schedules a dependent before all of its
//! dependencies' groups have completed. This is equivalent to the
//! push-as-you-go algorithm but immune to cross-group completion-order
//! accidents, since it reads the declared order directly instead of
//! reconstructing it from arrival order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use morph_cache::CacheDir;
use morph_exec::StagingArea;
use morph_graph::{Artifact, ArtifactDetail, ArtifactGraph, ArtifactId};
use morph_types::MorphError;
use tracing::{info, warn};

use crate::chunk::ChunkBuilder;
use crate::stratum::StratumBuilder;
use crate::system::SystemBuilder;

pub struct Scheduler {
    cache: Arc<CacheDir>,
    chunk_builder: Arc<ChunkBuilder>,
    stratum_builder: Arc<StratumBuilder>,
    system_builder: Arc<SystemBuilder>,
    cancel: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(cache: Arc<CacheDir>, chunk_builder: ChunkBuilder, stratum_builder: StratumBuilder, system_builder: SystemBuilder) -> Self {
        Self {
            cache,
            chunk_builder: Arc::new(chunk_builder),
            stratum_builder: Arc::new(stratum_builder),
            system_builder: Arc::new(system_builder),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle the caller can flip to request cancellation. Checked at
    /// group boundaries: a build already in flight within a group still runs
    /// to completion (no child process is preempted mid-command by this
    /// flag alone), but no new group starts once it is set.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn output_path(&self, graph: &ArtifactGraph, id: ArtifactId) -> PathBuf {
        let artifact = graph.get(id);
        match artifact.kind {
            "chunk" => self.chunk_builder.plan(artifact),
            "stratum" => self.stratum_builder.plan(artifact),
            "system" => self.system_builder.plan(artifact),
            other => unreachable!("unknown artifact kind {other}"),
        }
    }

    fn dependency_prefixes(&self, graph: &ArtifactGraph, id: ArtifactId) -> Vec<String> {
        graph
            .get(id)
            .dependencies()
            .iter()
            .filter_map(|&dep| match &graph.get(dep).detail {
                ArtifactDetail::Chunk { prefix, .. } => Some(prefix.clone()),
                _ => None,
            })
            .collect()
    }

    fn stage_items_for(&self, graph: &ArtifactGraph, id: ArtifactId, produced: &HashMap<ArtifactId, PathBuf>) -> Vec<(String, PathBuf)> {
        graph
            .get(id)
            .dependencies()
            .iter()
            .map(|&dep| {
                let path = produced
                    .get(&dep)
                    .cloned()
                    .expect("build_order guarantees dependencies are produced before their dependents");
                (graph.get(dep).name.clone(), path)
            })
            .collect()
    }

    /// Build (or skip, if already cached) a single artifact and return the
    /// path of its output archive/image.
    fn build_one(&self, graph: &ArtifactGraph, id: ArtifactId, stage_items: &[(String, PathBuf)], dependency_prefixes: &[String]) -> Result<PathBuf, MorphError> {
        let artifact = graph.get(id);
        let output = self.output_path(graph, id);

        if self.cache.all_present([&output]) {
            info!("{} {}: cache hit, skipping build", artifact.kind, artifact.name);
            return Ok(output);
        }

        info!("{} {}: building", artifact.kind, artifact.name);
        let staging = StagingArea::new().map_err(MorphError::Io)?;
        match artifact.kind {
            "chunk" => self.chunk_builder.build(artifact, &staging, dependency_prefixes),
            "stratum" => self.stratum_builder.build(artifact, &staging, stage_items),
            "system" => self.system_builder.build(artifact, &staging, stage_items),
            other => unreachable!("unknown artifact kind {other}"),
        }
    }

    /// Build every artifact reachable from `roots`, group by group.
    pub async fn build(&self, graph: Arc<ArtifactGraph>, roots: &[ArtifactId]) -> Result<HashMap<ArtifactId, PathBuf>, MorphError> {
        let order = graph.build_order(roots)?;
        let mut produced: HashMap<ArtifactId, PathBuf> = HashMap::new();

        for group in order {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(MorphError::configuration("build cancelled before group start"));
            }

            let tasks = group.iter().map(|&id| {
                let graph = Arc::clone(&graph);
                let scheduler = self.clone_for_task();
                let stage_items = self.stage_items_for(&graph, id, &produced);
                let dependency_prefixes = self.dependency_prefixes(&graph, id);
                tokio::task::spawn_blocking(move || scheduler.build_one(&graph, id, &stage_items, &dependency_prefixes))
            });

            let results = futures::future::try_join_all(tasks)
                .await
                .map_err(|e| MorphError::configuration(format!("build task panicked: {e}")))?;

            for (&id, result) in group.iter().zip(results) {
                match result {
                    Ok(path) => {
                        produced.insert(id, path);
                    }
                    Err(err) => {
                        let output = self.output_path(&graph, id);
                        self.cleanup_partial(graph.get(id), output);
                        return Err(err);
                    }
                }
            }
        }

        Ok(produced)
    }

    /// Single-artifact build mode (spec §4.10 last paragraph): every
    /// transitive dependency of `target` must already be cached (this does
    /// not build them), and only `target` itself is built.
    pub fn build_single(&self, graph: &ArtifactGraph, target: ArtifactId) -> Result<PathBuf, MorphError> {
        for id in graph.walk(target) {
            if id == target {
                continue;
            }
            let output = self.output_path(graph, id);
            if !self.cache.all_present([&output]) {
                let artifact = graph.get(id);
                return Err(MorphError::cache(format!("dependency {} ({}) of the requested build is not cached; build it first", artifact.name, artifact.kind)));
            }
        }

        let stage_items: Vec<(String, PathBuf)> = graph
            .get(target)
            .dependencies()
            .iter()
            .map(|&dep| (graph.get(dep).name.clone(), self.output_path(graph, dep)))
            .collect();
        let dependency_prefixes = self.dependency_prefixes(graph, target);

        self.build_one(graph, target, &stage_items, &dependency_prefixes)
    }

    /// Delete whatever partial outputs a failed build already wrote for
    /// `artifact` (spec §7: "partial caches from failed builds are deleted
    /// before the process exits") — a failing chunk build can have already
    /// `write_atomic`'d its `.meta`/`.log` files before a later stage failed.
    fn cleanup_partial(&self, artifact: &Artifact, output: PathBuf) {
        let meta = self.cache.meta_path(&artifact.cache_id);
        let log = self.cache.log_path(&artifact.cache_id);
        if let Err(e) = self.cache.remove_partial([output, meta, log]) {
            warn!("cleanup: failed to remove partial cache entries for {}: {e}", artifact.name);
        }
    }

    fn clone_for_task(&self) -> Scheduler {
        Scheduler {
            cache: Arc::clone(&self.cache),
            chunk_builder: Arc::clone(&self.chunk_builder),
            stratum_builder: Arc::clone(&self.stratum_builder),
            system_builder: Arc::clone(&self.system_builder),
            cancel: Arc::clone(&self.cancel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morph_graph::GraphBuilder;
    use morph_types::test_util::{FakeTreeish, StaticMorphLoader, StaticSourceManager};
    use morph_types::{BuildSystem, ChunkMorphology, Morphology, Settings, StratumMorphology, StratumSource};

    use crate::system::HostSystemTools;

    fn build_scheduler(cache: Arc<CacheDir>) -> Scheduler {
        let settings = Arc::new(Settings::new("/tmp/unused"));
        Scheduler::new(
            Arc::clone(&cache),
            ChunkBuilder::new(Arc::clone(&cache), settings),
            StratumBuilder::new(Arc::clone(&cache)),
            SystemBuilder::new(cache, Arc::new(HostSystemTools)),
        )
    }

    fn demo_graph(cache: &CacheDir) -> (Arc<ArtifactGraph>, Vec<ArtifactId>) {
        let sources = Arc::new(StaticSourceManager::new());
        sources.insert("repo-a", "ref-a", FakeTreeish::new("repo-a", "ref-a", "sha-a"));
        sources.insert("repo-s", "ref-s", FakeTreeish::new("repo-s", "ref-s", "sha-s"));

        let loader = Arc::new(StaticMorphLoader::new());
        loader.insert(
            "a.morph",
            Morphology::Chunk(ChunkMorphology {
                name: "a".to_string(),
                description: String::new(),
                build_system: Some(BuildSystem::Dummy),
                configure_commands: None,
                build_commands: None,
                test_commands: None,
                install_commands: None,
                max_jobs: None,
                chunks: None,
            }),
        );
        loader.insert(
            "stratum.morph",
            Morphology::Stratum(StratumMorphology {
                name: "stratum".to_string(),
                description: String::new(),
                sources: vec![StratumSource {
                    repo: "repo-a".to_string(),
                    git_ref: "ref-a".to_string(),
                    morph: None,
                    name: "a".to_string(),
                }],
                build_depends: None,
            }),
        );

        let mut builder = GraphBuilder::new(sources, loader, "x86_64");
        let roots = builder.build(cache, "repo-s", "ref-s", "stratum.morph").unwrap();
        (Arc::new(builder.into_graph()), roots)
    }

    #[tokio::test]
    async fn build_produces_the_stratum_and_its_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(CacheDir::new(dir.path()).unwrap());
        let (graph, roots) = demo_graph(&cache);
        let scheduler = build_scheduler(Arc::clone(&cache));

        let produced = scheduler.build(Arc::clone(&graph), &roots).await.unwrap();
        assert_eq!(produced.len(), 2);
        for path in produced.values() {
            assert!(path.is_file());
        }
    }

    #[tokio::test]
    async fn rebuilding_skips_the_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(CacheDir::new(dir.path()).unwrap());
        let (graph, roots) = demo_graph(&cache);
        let scheduler = build_scheduler(Arc::clone(&cache));

        let first = scheduler.build(Arc::clone(&graph), &roots).await.unwrap();
        let second = scheduler.build(Arc::clone(&graph), &roots).await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn single_artifact_build_fails_fast_when_a_dependency_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(CacheDir::new(dir.path()).unwrap());
        let (graph, roots) = demo_graph(&cache);
        let scheduler = build_scheduler(Arc::clone(&cache));

        let err = scheduler.build_single(&graph, roots[0]).unwrap_err();
        assert!(matches!(err, MorphError::Cache(_)));
    }

    #[tokio::test]
    async fn single_artifact_build_succeeds_once_dependencies_are_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(CacheDir::new(dir.path()).unwrap());
        let (graph, roots) = demo_graph(&cache);
        let scheduler = build_scheduler(Arc::clone(&cache));

        scheduler.build(Arc::clone(&graph), &roots).await.unwrap();
        let path = scheduler.build_single(&graph, roots[0]).unwrap();
        assert!(path.is_file());
    }
}
