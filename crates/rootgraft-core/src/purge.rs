//! Exclusion-aware subtree deletion.
//!
//! Clears a root before a restore so the result matches the archive exactly,
//! modulo the exclusion set. Directories that contain an exclusion boundary
//! survive as shells holding the excluded entries.

use std::fs;
use std::io;
use std::path::Path;

use rootgraft_common::error::{GraftError, Result};
use rootgraft_common::types::CancelToken;

use crate::enumerate::enumerate;
use crate::exclusion::ExclusionSet;

/// Deletes everything under `root` that the exclusion set does not protect.
///
/// `root` itself is emptied but kept. Returns the number of units removed.
///
/// # Errors
///
/// Returns an error if enumeration or a removal fails for any reason other
/// than the path already being gone.
pub fn purge(root: &Path, exclusions: &ExclusionSet, cancel: &CancelToken) -> Result<usize> {
    let units = enumerate(root, exclusions, cancel)?;
    let mut removed = 0usize;

    for unit in units.iter().filter(|u| u.is_atomic()) {
        cancel.check("purge")?;
        if unit.path == root {
            removed += clear_dir(root)?;
        } else {
            remove_path(&unit.path)?;
            removed += 1;
        }
    }

    tracing::info!(root = %root.display(), removed, "purged");
    Ok(removed)
}

/// Removes the children of `dir`, keeping `dir`.
fn clear_dir(dir: &Path) -> Result<usize> {
    let metadata = match fs::symlink_metadata(dir) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(GraftError::io(dir, e)),
    };
    if !metadata.is_dir() {
        remove_path(dir)?;
        return Ok(1);
    }

    let mut removed = 0;
    for entry in fs::read_dir(dir).map_err(|e| GraftError::io(dir, e))? {
        let entry = entry.map_err(|e| GraftError::io(dir, e))?;
        remove_path(&entry.path())?;
        removed += 1;
    }
    Ok(removed)
}

/// Removes a file, symlink, or directory tree without following symlinks.
///
/// # Errors
///
/// Returns an error unless the removal succeeds or the path is already gone.
pub fn remove_path(path: &Path) -> Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(GraftError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn purge_without_exclusions_empties_root_but_keeps_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("x/y")).expect("mkdir");
        fs::write(dir.path().join("x/y/f"), "f").expect("write");
        fs::write(dir.path().join("g"), "g").expect("write");

        let removed =
            purge(dir.path(), &ExclusionSet::empty(), &CancelToken::new()).expect("purge");
        assert_eq!(removed, 2);
        assert!(dir.path().is_dir());
        assert_eq!(fs::read_dir(dir.path()).expect("read").count(), 0);
    }

    #[test]
    fn purge_keeps_excluded_subtree_and_its_parent_shell() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        fs::create_dir_all(root.join("var/cache")).expect("mkdir");
        fs::write(root.join("var/cache/keep"), "k").expect("write");
        fs::write(root.join("var/stale"), "s").expect("write");
        fs::write(root.join("stale"), "s").expect("write");

        let set = ExclusionSet::build(&[], &[root.join("var/cache")], &[]).expect("build");
        let _ = purge(root, &set, &CancelToken::new()).expect("purge");

        assert!(root.join("var/cache/keep").exists());
        assert!(!root.join("var/stale").exists());
        assert!(!root.join("stale").exists());
    }

    #[test]
    fn purge_removes_symlink_not_target() {
        let outside = tempfile::tempdir().expect("tempdir");
        fs::write(outside.path().join("target"), "t").expect("write");
        let dir = tempfile::tempdir().expect("tempdir");
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).expect("symlink");

        let _ = purge(dir.path(), &ExclusionSet::empty(), &CancelToken::new()).expect("purge");
        assert!(outside.path().join("target").exists());
        assert!(fs::symlink_metadata(dir.path().join("link")).is_err());
    }

    #[test]
    fn purge_missing_root_is_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing: PathBuf = dir.path().join("nope");
        let removed = purge(&missing, &ExclusionSet::empty(), &CancelToken::new()).expect("purge");
        assert_eq!(removed, 0);
    }

    #[test]
    fn remove_path_missing_is_ok() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(remove_path(&dir.path().join("nothing")).is_ok());
    }
}
