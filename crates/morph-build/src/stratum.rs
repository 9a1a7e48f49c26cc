//! Stratum builder (spec §4.8, component C8).
//!
//! A stratum has no commands of its own: it just unpacks its constituent
//! chunk archives, in the declared source order, into one destdir and
//! re-tars the result.

use std::path::PathBuf;
use std::sync::Arc;

use fs_err as fs;
use morph_cache::CacheDir;
use morph_exec::StagingArea;
use morph_graph::{Artifact, ArtifactDetail};
use morph_types::MorphError;

pub struct StratumBuilder {
    cache: Arc<CacheDir>,
}

impl StratumBuilder {
    pub fn new(cache: Arc<CacheDir>) -> Self {
        Self { cache }
    }

    pub fn plan(&self, artifact: &Artifact) -> PathBuf {
        self.cache.artifact_path(&artifact.cache_id, "stratum", &artifact.name)
    }

    /// Build `artifact` (which must carry [`ArtifactDetail::Stratum`]) from
    /// its already-built chunks. `stage_items` must be in the stratum
    /// morphology's declared source order — the scheduler is responsible for
    /// that ordering, not this builder.
    pub fn build(&self, artifact: &Artifact, staging: &StagingArea, stage_items: &[(String, PathBuf)]) -> Result<PathBuf, MorphError> {
        if !matches!(artifact.detail, ArtifactDetail::Stratum) {
            return Err(MorphError::configuration(format!("{} is not a stratum artifact", artifact.name)));
        }

        let destdir = staging.ensure_destdir(&artifact.name)?;
        let start = chrono::Utc::now();

        for (chunk_name, archive_path) in stage_items {
            let file = fs::File::open(archive_path).map_err(MorphError::Io)?;
            morph_archive::unpack(file, &destdir).map_err(|e| MorphError::archive(format!("unpacking chunk {chunk_name} into stratum {}: {e}", artifact.name)))?;
        }

        let baserock_dir = destdir.join("baserock");
        fs::create_dir_all(&baserock_dir)?;
        let meta = serde_json::json!({
            "name": artifact.name,
            "kind": "stratum",
            "chunks": stage_items.iter().map(|(name, _)| name).collect::<Vec<_>>(),
        });
        fs::write(
            baserock_dir.join(format!("{}.meta", artifact.name)),
            serde_json::to_vec_pretty(&meta).map_err(|e| MorphError::archive(e.to_string()))?,
        )?;

        let archive_path = self.plan(artifact);
        let tmp_path = staging.root().join(format!(".{}.stratum.tmp", artifact.name));
        let archive_file = fs::File::create(&tmp_path)?;
        morph_archive::create_stratum(&destdir, archive_file)?;
        if let Some(parent) = archive_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&tmp_path, &archive_path)?;
        let stop = chrono::Utc::now();

        let meta_json = serde_json::json!({
            "stages": [{
                "stage": "unpack",
                "start": start.to_rfc3339(),
                "stop": stop.to_rfc3339(),
                "delta_seconds": (stop - start).num_milliseconds() as f64 / 1000.0,
            }],
        });
        self.cache
            .write_atomic(&self.cache.meta_path(&artifact.cache_id), &serde_json::to_vec_pretty(&meta_json).map_err(|e| MorphError::archive(e.to_string()))?)?;
        self.cache.write_atomic(&self.cache.log_path(&artifact.cache_id), b"")?;

        Ok(archive_path)
    }
}
