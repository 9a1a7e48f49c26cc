//! Source tree extraction (spec §4.7 "Source extraction";
//! `original_source/morphlib/builder.py::extract_treeish`/`set_mtime_recursively`).

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use morph_types::{MorphError, Treeish};

/// Recursively clone `treeish` (and, depth-first, each of its submodules'
/// own treeishes) into `dst`, rewriting every submodule's configured URL to
/// point at its already-extracted local copy so that a later `git
/// submodule` invocation never touches the network.
pub fn extract_treeish(treeish: &Arc<dyn Treeish>, dst: &Path) -> Result<(), MorphError> {
    treeish.copy_to(dst)?;
    treeish.checkout(dst, treeish.git_ref())?;

    for submodule in treeish.submodules() {
        let sub_dst = dst.join(&submodule.path);
        extract_treeish(&submodule.treeish, &sub_dst)?;
        treeish.set_submodule_url(dst, &submodule.name, &format!("file://{}", sub_dst.display()))?;
    }

    Ok(())
}

/// Set every file and directory under `root` to the current time, so Make
/// doesn't rebuild pre-shipped generated files that checkout left with
/// arbitrary (often very old, or out-of-order) timestamps. This is
/// unrelated to [`morph_archive::NORMALIZED_TIMESTAMP`], which governs
/// *archive output*, not working-tree input.
pub fn normalize_mtimes(root: &Path) -> Result<(), MorphError> {
    let now_ft = filetime::FileTime::from_system_time(SystemTime::now());

    for entry in walkdir::WalkDir::new(root).contents_first(true) {
        let entry = entry.map_err(|e| MorphError::archive(e.to_string()))?;
        if entry.path_is_symlink() {
            continue;
        }
        filetime::set_file_times(entry.path(), now_ft, now_ft).map_err(MorphError::Io)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_mtimes_touches_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/file"), b"x").unwrap();

        let old = filetime::FileTime::from_unix_time(0, 0);
        filetime::set_file_times(dir.path().join("a/b/file"), old, old).unwrap();

        normalize_mtimes(dir.path()).unwrap();

        let meta = std::fs::metadata(dir.path().join("a/b/file")).unwrap();
        let mtime = filetime::FileTime::from_last_modification_time(&meta);
        assert!(mtime.unix_seconds() > 0);
    }

    #[test]
    fn extract_treeish_recurses_into_submodules() {
        use morph_types::test_util::FakeTreeish;
        use morph_types::{Submodule, Treeish};

        let sub = FakeTreeish::new("sub-repo", "sub-ref", "sub-sha");
        let parent: Arc<dyn Treeish> = Arc::new(morph_types::test_util::FakeTreeish {
            repo: "parent-repo".to_string(),
            git_ref: "parent-ref".to_string(),
            sha1: "parent-sha".to_string(),
            submodules: vec![Submodule {
                name: "sub".to_string(),
                path: "vendor/sub".to_string(),
                treeish: sub,
            }],
        });

        let dst = tempfile::tempdir().unwrap();
        extract_treeish(&parent, dst.path()).unwrap();

        assert!(dst.path().join(".fake-treeish").exists());
        assert!(dst.path().join("vendor/sub/.fake-treeish").exists());
    }
}
