//! Chunk builder (spec §4.7, component C7).
//!
//! Each chunk-name split produced by a chunk morphology's `chunks` mapping is
//! built independently: its own staging destdir, its own full
//! configure/build/test/install cycle, archived on its own. The morphology's
//! commands are shared across splits (there is exactly one source checkout
//! and one build system per chunk morphology); only the destdir and the
//! archive patterns differ per split.

use std::path::PathBuf;
use std::sync::Arc;

use fs_err as fs;
use morph_cache::CacheDir;
use morph_exec::{CommandExecutor, StagingArea};
use morph_graph::{Artifact, ArtifactDetail};
use morph_types::{BuildSystem, ChunkMorphology, MorphError, Settings};
use tracing::info;

use crate::env::{chunk_environment, with_serial_makeflags};
use crate::extract::{extract_treeish, normalize_mtimes};
use crate::recipes;

#[derive(Clone, Copy)]
enum Stage {
    Configure,
    Build,
    Test,
    Install,
}

impl Stage {
    const ALL: [Stage; 4] = [Stage::Configure, Stage::Build, Stage::Test, Stage::Install];

    fn name(self) -> &'static str {
        match self {
            Stage::Configure => "configure",
            Stage::Build => "build",
            Stage::Test => "test",
            Stage::Install => "install",
        }
    }

    fn commands(self, morphology: &ChunkMorphology) -> Vec<String> {
        let explicit = match self {
            Stage::Configure => &morphology.configure_commands,
            Stage::Build => &morphology.build_commands,
            Stage::Test => &morphology.test_commands,
            Stage::Install => &morphology.install_commands,
        };
        if let Some(commands) = explicit {
            return commands.clone();
        }
        let build_system = morphology.build_system.unwrap_or(BuildSystem::Dummy);
        match self {
            Stage::Configure => recipes::configure_commands(build_system),
            Stage::Build => recipes::build_commands(build_system),
            Stage::Test => recipes::test_commands(build_system),
            Stage::Install => recipes::install_commands(build_system),
        }
    }
}

/// Builds one chunk-split artifact into a cached archive.
pub struct ChunkBuilder {
    cache: Arc<CacheDir>,
    settings: Arc<Settings>,
}

impl ChunkBuilder {
    pub fn new(cache: Arc<CacheDir>, settings: Arc<Settings>) -> Self {
        Self { cache, settings }
    }

    /// The single output file this artifact's build will produce.
    pub fn plan(&self, artifact: &Artifact) -> PathBuf {
        self.cache.artifact_path(&artifact.cache_id, "chunk", &artifact.name)
    }

    /// Build `artifact` (which must carry [`ArtifactDetail::Chunk`]) and
    /// return the path of the archive it produced.
    pub fn build(&self, artifact: &Artifact, staging: &StagingArea, dependency_prefixes: &[String]) -> Result<PathBuf, MorphError> {
        let (treeish, morphology, patterns, _prefix) = match &artifact.detail {
            ArtifactDetail::Chunk {
                treeish,
                morphology,
                patterns,
                prefix,
            } => (treeish, morphology, patterns, prefix),
            _ => return Err(MorphError::configuration(format!("{} is not a chunk artifact", artifact.name))),
        };

        let builddir = staging.builddir(&artifact.name);
        let destdir = staging.ensure_destdir(&artifact.name)?;

        extract_treeish(treeish, &builddir)?;
        normalize_mtimes(&builddir)?;

        let max_jobs = self.settings.resolve_max_jobs(morphology.max_jobs);
        let base_env = chunk_environment(&self.settings, staging.root(), &destdir, max_jobs, dependency_prefixes);

        let mut log = Vec::new();
        let mut timings = Vec::new();

        for stage in Stage::ALL {
            let commands = stage.commands(morphology);
            if commands.is_empty() {
                continue;
            }

            let env = match stage {
                Stage::Build => base_env.clone(),
                _ => with_serial_makeflags(&base_env),
            };
            let executor = CommandExecutor::new(builddir.clone()).with_env(env);

            let start = chrono::Utc::now();
            info!("chunk {}: running {} stage", artifact.name, stage.name());
            for command in &commands {
                executor.run(command, &mut log)?;
            }
            let stop = chrono::Utc::now();

            timings.push(serde_json::json!({
                "stage": stage.name(),
                "start": start.to_rfc3339(),
                "stop": stop.to_rfc3339(),
                "delta_seconds": (stop - start).num_milliseconds() as f64 / 1000.0,
            }));
        }

        let baserock_dir = destdir.join("baserock");
        fs::create_dir_all(&baserock_dir)?;
        let meta = serde_json::json!({
            "name": artifact.name,
            "kind": "chunk",
            "description": morphology.description,
        });
        fs::write(baserock_dir.join(format!("{}.meta", artifact.name)), serde_json::to_vec_pretty(&meta).map_err(|e| MorphError::archive(e.to_string()))?)?;

        let mut archive_patterns = patterns.clone();
        archive_patterns.push(format!("baserock/{}\\.", artifact.name));

        let archive_path = self.plan(artifact);
        let tmp_path = staging.root().join(format!(".{}.chunk.tmp", artifact.name));
        let archive_file = fs::File::create(&tmp_path)?;
        morph_archive::create_chunk(&destdir, archive_file, &archive_patterns)?;

        if fs::read_dir(&destdir)?.next().is_some() {
            return Err(MorphError::archive(format!("destdir for {} is not empty after archiving", artifact.name)));
        }

        if let Some(parent) = archive_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&tmp_path, &archive_path)?;

        let meta_json = serde_json::to_vec_pretty(&serde_json::json!({ "stages": timings })).map_err(|e| MorphError::archive(e.to_string()))?;
        self.cache.write_atomic(&self.cache.meta_path(&artifact.cache_id), &meta_json)?;
        self.cache.write_atomic(&self.cache.log_path(&artifact.cache_id), &log)?;

        Ok(archive_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morph_cache::CacheDir;
    use morph_graph::GraphBuilder;
    use morph_types::test_util::{FakeTreeish, StaticMorphLoader, StaticSourceManager};
    use morph_types::Morphology;

    fn settings() -> Arc<Settings> {
        let mut settings = Settings::new("/tmp/unused");
        settings.no_ccache = true;
        Arc::new(settings)
    }

    fn dummy_chunk_morphology(name: &str) -> Morphology {
        Morphology::Chunk(ChunkMorphology {
            name: name.to_string(),
            description: "a test chunk".to_string(),
            build_system: Some(BuildSystem::Dummy),
            configure_commands: None,
            build_commands: None,
            test_commands: None,
            install_commands: None,
            max_jobs: None,
            chunks: None,
        })
    }

    fn build_one_chunk_artifact(cache: &CacheDir, morphology: Morphology) -> Artifact {
        let sources = Arc::new(StaticSourceManager::new());
        sources.insert("repo", "ref", FakeTreeish::new("repo", "ref", "sha"));
        let loader = Arc::new(StaticMorphLoader::new());
        loader.insert("hello.morph", morphology);

        let mut graph_builder = GraphBuilder::new(sources, loader, "x86_64");
        let roots = graph_builder.build(cache, "repo", "ref", "hello.morph").unwrap();
        graph_builder.into_graph().get(roots[0]).clone()
    }

    #[test]
    fn build_produces_an_archive_and_leaves_destdir_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDir::new(dir.path()).unwrap();
        let artifact = build_one_chunk_artifact(&cache, dummy_chunk_morphology("hello"));

        let builder = ChunkBuilder::new(Arc::new(cache), settings());
        let staging = StagingArea::new().unwrap();
        let archive_path = builder.build(&artifact, &staging, &[]).unwrap();

        assert!(archive_path.is_file());
        assert_eq!(archive_path, builder.plan(&artifact));
        assert!(builder.cache.meta_path(&artifact.cache_id).is_file());
        assert!(builder.cache.log_path(&artifact.cache_id).is_file());
    }

    #[test]
    fn wrong_artifact_kind_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDir::new(dir.path()).unwrap();
        let artifact = {
            let sources = Arc::new(StaticSourceManager::new());
            sources.insert("repo", "ref", FakeTreeish::new("repo", "ref", "sha"));
            let loader = Arc::new(StaticMorphLoader::new());
            loader.insert(
                "stratum.morph",
                Morphology::Stratum(morph_types::StratumMorphology {
                    name: "stratum".to_string(),
                    description: String::new(),
                    sources: vec![],
                    build_depends: None,
                }),
            );
            let mut graph_builder = GraphBuilder::new(sources, loader, "x86_64");
            let roots = graph_builder.build(&cache, "repo", "ref", "stratum.morph").unwrap();
            graph_builder.into_graph().get(roots[0]).clone()
        };

        let builder = ChunkBuilder::new(Arc::new(cache), settings());
        let staging = StagingArea::new().unwrap();
        let err = builder.build(&artifact, &staging, &[]).unwrap_err();
        assert!(matches!(err, MorphError::Configuration(_)));
    }
}
