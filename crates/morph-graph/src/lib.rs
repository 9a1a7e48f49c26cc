//! The artifact dependency graph and the morphology-driven builder that
//! populates it (spec §4.3 CacheKeyComputer, §4.4 ArtifactGraph).

mod builder;
mod graph;

pub use builder::{GraphBuilder, METADATA_VERSION};
pub use graph::{Artifact, ArtifactDetail, ArtifactGraph, ArtifactId};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use morph_cache::CacheDir;
    use morph_types::test_util::{FakeTreeish, StaticMorphLoader, StaticSourceManager};
    use morph_types::{BuildSystem, ChunkMorphology, Morphology, StratumMorphology, StratumSource};

    use super::*;

    fn chunk_morphology(name: &str) -> Morphology {
        Morphology::Chunk(ChunkMorphology {
            name: name.to_string(),
            description: String::new(),
            build_system: Some(BuildSystem::Dummy),
            configure_commands: None,
            build_commands: None,
            test_commands: None,
            install_commands: None,
            max_jobs: None,
            chunks: None,
        })
    }

    #[test]
    fn a_stratum_depends_on_every_chunk_named_by_its_sources() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDir::new(dir.path()).unwrap();

        let sources = Arc::new(StaticSourceManager::new());
        sources.insert("repo-a", "ref-a", FakeTreeish::new("repo-a", "ref-a", "sha-a"));
        sources.insert("repo-s", "ref-s", FakeTreeish::new("repo-s", "ref-s", "sha-s"));

        let loader = Arc::new(StaticMorphLoader::new());
        loader.insert("a.morph", chunk_morphology("a"));
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
        let roots = builder.build(&cache, "repo-s", "ref-s", "stratum.morph").unwrap();
        let graph = builder.graph();

        assert_eq!(roots.len(), 1);
        let stratum_id = roots[0];
        assert_eq!(graph.get(stratum_id).dependencies().len(), 1);
        let chunk_id = graph.get(stratum_id).dependencies()[0];
        assert_eq!(graph.get(chunk_id).name, "a");
    }

    #[test]
    fn shared_chunk_dependency_is_built_once_across_two_strata() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDir::new(dir.path()).unwrap();

        let sources = Arc::new(StaticSourceManager::new());
        sources.insert("repo-a", "ref-a", FakeTreeish::new("repo-a", "ref-a", "sha-a"));
        sources.insert("repo-s", "ref-s", FakeTreeish::new("repo-s", "ref-s", "sha-s"));

        let loader = Arc::new(StaticMorphLoader::new());
        loader.insert("a.morph", chunk_morphology("a"));
        for stratum_name in ["one", "two"] {
            loader.insert(
                format!("{stratum_name}.morph"),
                Morphology::Stratum(StratumMorphology {
                    name: stratum_name.to_string(),
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
        }

        let mut builder = GraphBuilder::new(sources, loader, "x86_64");
        let one_roots = builder.build(&cache, "repo-s", "ref-s", "one.morph").unwrap();
        let two_roots = builder.build(&cache, "repo-s", "ref-s", "two.morph").unwrap();
        let graph = builder.graph();

        let one_chunk = graph.get(one_roots[0]).dependencies()[0];
        let two_chunk = graph.get(two_roots[0]).dependencies()[0];
        assert_eq!(one_chunk, two_chunk);
        assert_eq!(graph.len(), 3, "one shared chunk plus the two strata, not a duplicated chunk");
    }

    #[test]
    fn a_system_depends_on_each_of_its_strata() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDir::new(dir.path()).unwrap();

        let sources = Arc::new(StaticSourceManager::new());
        sources.insert("repo", "ref", FakeTreeish::new("repo", "ref", "sha"));

        let loader = Arc::new(StaticMorphLoader::new());
        loader.insert("a.morph", chunk_morphology("a"));
        loader.insert(
            "base.morph",
            Morphology::Stratum(StratumMorphology {
                name: "base".to_string(),
                description: String::new(),
                sources: vec![StratumSource {
                    repo: "repo".to_string(),
                    git_ref: "ref".to_string(),
                    morph: None,
                    name: "a".to_string(),
                }],
                build_depends: None,
            }),
        );
        loader.insert(
            "minimal.morph",
            Morphology::System(morph_types::SystemMorphology {
                name: "minimal".to_string(),
                description: String::new(),
                strata: vec!["base".to_string()],
                disk_size: "1G".to_string(),
            }),
        );

        let mut builder = GraphBuilder::new(sources, loader, "x86_64");
        let roots = builder.build(&cache, "repo", "ref", "minimal.morph").unwrap();
        let graph = builder.graph();

        assert_eq!(roots.len(), 1);
        let system_id = roots[0];
        assert_eq!(graph.get(system_id).kind, "system");
        assert_eq!(graph.get(system_id).dependencies().len(), 1);
        assert_eq!(graph.get(graph.get(system_id).dependencies()[0]).name, "base");
    }
}
