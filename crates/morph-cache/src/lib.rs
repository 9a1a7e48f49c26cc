//! The content-addressed cache directory (spec §4.2, component C2).
//!
//! Maps a [`CacheId`] record — the inputs that make an artifact
//! reproducible — to a stable path under a configured root. Callers append
//! `.{kind}.{name}`, `.meta`, or `.log` to the prefix returned by
//! [`CacheDir::name`].

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use fs_err as fs;
use sha2::{Digest, Sha256};
use tracing::debug;

/// The record fed into the hash. Fields are listed here in the order the
/// spec names them; canonicalization (§4.2) sorts them lexicographically by
/// field name regardless of this declaration order, so adding a field never
/// silently changes already-computed keys for records that don't use it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheId {
    pub name: String,
    pub arch: String,
    /// The source treeish's `sha1`.
    pub git_ref: String,
    /// Concatenation (in declared order) of the `cache_key` of every child
    /// artifact: chunks for a stratum, strata for a system, empty for a
    /// chunk.
    pub kids: String,
    pub metadata_version: u32,
}

impl CacheId {
    /// Canonical serialization: `key=value` pairs, one per line, fields
    /// sorted lexicographically by name. This is the Rust equivalent of the
    /// teacher's implicit "sorted dict repr" hashing trick — explicit here
    /// because Rust has no dict literal ordering to lean on.
    fn canonical(&self) -> String {
        let mut fields: Vec<(&str, &str)> = vec![
            ("arch", self.arch.as_str()),
            ("kids", self.kids.as_str()),
            ("name", self.name.as_str()),
            ("ref", self.git_ref.as_str()),
        ];
        fields.sort_by_key(|(k, _)| *k);

        let mut out = String::new();
        for (key, value) in fields {
            let _ = writeln!(out, "{key}={value}");
        }
        let _ = writeln!(out, "metadata_version={}", self.metadata_version);
        out
    }
}

/// Maps [`CacheId`] records to filesystem paths under a configured root.
#[derive(Debug, Clone)]
pub struct CacheDir {
    root: PathBuf,
}

impl CacheDir {
    /// Open (creating if necessary) a cache directory at `root`.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Hexadecimal digest of a strong hash over the canonicalized
    /// `cache_id`. The contract is collision resistance, not a specific
    /// algorithm — SHA-256 satisfies it.
    pub fn key(&self, cache_id: &CacheId) -> String {
        let mut hasher = Sha256::new();
        hasher.update(cache_id.canonical().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// `{root}/{key}` — the prefix builders append `.{kind}.{name}`,
    /// `.meta`, or `.log` to.
    pub fn name(&self, cache_id: &CacheId) -> PathBuf {
        self.root.join(self.key(cache_id))
    }

    /// Full path to a produced artifact file: `{prefix}.{kind}.{name}`.
    pub fn artifact_path(&self, cache_id: &CacheId, kind: &str, name: &str) -> PathBuf {
        let mut prefix = self.name(cache_id).into_os_string();
        prefix.push(".");
        prefix.push(kind);
        prefix.push(".");
        prefix.push(name);
        PathBuf::from(prefix)
    }

    /// Full path to the build-timings metadata file: `{prefix}.meta`.
    pub fn meta_path(&self, cache_id: &CacheId) -> PathBuf {
        let mut prefix = self.name(cache_id).into_os_string();
        prefix.push(".meta");
        PathBuf::from(prefix)
    }

    /// Full path to the build log: `{prefix}.log`.
    pub fn log_path(&self, cache_id: &CacheId) -> PathBuf {
        let mut prefix = self.name(cache_id).into_os_string();
        prefix.push(".log");
        PathBuf::from(prefix)
    }

    /// Returns `true` if every one of `paths` already exists — the
    /// scheduler's cache-hit check.
    pub fn all_present<'a>(&self, paths: impl IntoIterator<Item = &'a PathBuf>) -> bool {
        paths.into_iter().all(|p| p.is_file())
    }

    /// Write `contents` to `path` via a temporary sibling file that is
    /// renamed into place, so concurrent readers never observe a partial
    /// write (spec §5 "shared resources").
    pub fn write_atomic(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;
        let tmp_name = format!(
            ".{}.tmp",
            path.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("cache-entry")
        );
        let tmp_path = parent.join(tmp_name);
        fs::write(&tmp_path, contents)?;
        fs::rename(&tmp_path, path)?;
        debug!("wrote cache entry {}", path.display());
        Ok(())
    }

    /// Delete every output file associated with a `cache_id` (used to clean
    /// up partial caches from a failed build before the process exits, per
    /// spec §7).
    pub fn remove_partial(&self, paths: impl IntoIterator<Item = PathBuf>) -> io::Result<()> {
        for path in paths {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}
