//! Exclusion-aware path enumeration.
//!
//! Splits a root into the smallest number of units that together cover
//! everything not excluded. A subtree with no exclusion boundary inside is
//! returned as one atomic unit and never walked; only directories that
//! contain a boundary are descended, and they appear as `Recurse` units
//! standing for the directory node alone.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rootgraft_common::error::{GraftError, Result};
use rootgraft_common::types::CancelToken;

use crate::exclusion::ExclusionSet;

/// How a unit's content is covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    /// The whole subtree is included as-is.
    Atomic,
    /// Only the directory node itself; its children are separate units.
    Recurse,
}

/// A path selected by [`enumerate`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumeratedUnit {
    /// Absolute path of the unit.
    pub path: PathBuf,
    /// Coverage of the unit.
    pub kind: UnitKind,
}

impl EnumeratedUnit {
    /// Returns whether the unit covers its whole subtree.
    #[must_use]
    pub fn is_atomic(&self) -> bool {
        self.kind == UnitKind::Atomic
    }
}

/// Computes the units covering `root` minus the exclusion set.
///
/// Parents always precede their children in the result. Paths that vanish
/// while being visited contribute nothing. Symlinks are leaves.
///
/// # Errors
///
/// Returns an error if a directory cannot be listed for a reason other than
/// having vanished, or if `cancel` fires.
pub fn enumerate(
    root: &Path,
    exclusions: &ExclusionSet,
    cancel: &CancelToken,
) -> Result<Vec<EnumeratedUnit>> {
    let mut units = Vec::new();
    visit(root, exclusions, cancel, &mut units)?;
    tracing::debug!(
        root = %root.display(),
        units = units.len(),
        atomic = units.iter().filter(|u| u.is_atomic()).count(),
        "enumerated"
    );
    Ok(units)
}

/// Flat view of [`enumerate`]: the paths of the atomic units only.
///
/// # Errors
///
/// Same as [`enumerate`].
pub fn enumerate_paths(
    root: &Path,
    exclusions: &ExclusionSet,
    cancel: &CancelToken,
) -> Result<Vec<PathBuf>> {
    Ok(enumerate(root, exclusions, cancel)?
        .into_iter()
        .filter(EnumeratedUnit::is_atomic)
        .map(|u| u.path)
        .collect())
}

fn visit(
    path: &Path,
    exclusions: &ExclusionSet,
    cancel: &CancelToken,
    units: &mut Vec<EnumeratedUnit>,
) -> Result<()> {
    cancel.check("enumerate")?;

    if exclusions.is_excluded(path) {
        tracing::trace!(path = %path.display(), "excluded");
        return Ok(());
    }

    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(GraftError::io(path, e)),
    };

    if !metadata.is_dir() || !exclusions.has_boundary_inside(path) {
        units.push(EnumeratedUnit {
            path: path.to_path_buf(),
            kind: UnitKind::Atomic,
        });
        return Ok(());
    }

    units.push(EnumeratedUnit {
        path: path.to_path_buf(),
        kind: UnitKind::Recurse,
    });

    for child in list_children(path)? {
        visit(&child, exclusions, cancel, units)?;
    }
    Ok(())
}

/// Lists a directory's children in name order; a vanished directory has none.
fn list_children(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(GraftError::io(dir, e)),
    };

    let mut children = Vec::new();
    for entry in entries {
        match entry {
            Ok(entry) => children.push(entry.path()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(GraftError::io(dir, e)),
        }
    }
    children.sort();
    Ok(children)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        for d in ["a/keep", "a/skip/deep", "b", "c/cache/pkgs"] {
            fs::create_dir_all(root.join(d)).expect("mkdir");
        }
        for f in ["a/keep/f1", "a/skip/deep/f2", "a/top", "b/f3", "c/cache/pkgs/p1"] {
            fs::write(root.join(f), f).expect("write");
        }
        dir
    }

    fn exclude(paths: &[PathBuf]) -> ExclusionSet {
        ExclusionSet::build(&[], paths, &[]).expect("build")
    }

    /// Expands units to every concrete path they cover.
    fn covered(units: &[EnumeratedUnit]) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for unit in units {
            if unit.is_atomic() {
                let walker = walkdir::WalkDir::new(&unit.path)
                    .follow_links(false)
                    .follow_root_links(false);
                for entry in walker {
                    out.push(entry.expect("walk").path().to_path_buf());
                }
            } else {
                out.push(unit.path.clone());
            }
        }
        out
    }

    fn all_paths(root: &Path) -> BTreeSet<PathBuf> {
        walkdir::WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .map(|e| e.expect("walk").path().to_path_buf())
            .collect()
    }

    #[test]
    fn enumerate_without_exclusions_returns_single_atomic_root() {
        let dir = fixture();
        let units = enumerate(dir.path(), &ExclusionSet::empty(), &CancelToken::new())
            .expect("enumerate");
        assert_eq!(
            units,
            vec![EnumeratedUnit {
                path: dir.path().to_path_buf(),
                kind: UnitKind::Atomic,
            }]
        );
    }

    #[test]
    fn enumerate_untouched_sibling_stays_atomic() {
        let dir = fixture();
        let root = dir.path();
        let units = enumerate(root, &exclude(&[root.join("a/skip")]), &CancelToken::new())
            .expect("enumerate");

        assert!(units.contains(&EnumeratedUnit {
            path: root.join("c"),
            kind: UnitKind::Atomic,
        }));
        assert!(units.iter().all(|u| !u.path.starts_with(root.join("c/cache"))));
        assert!(units.contains(&EnumeratedUnit {
            path: root.join("a"),
            kind: UnitKind::Recurse,
        }));
    }

    #[test]
    fn enumerate_partitions_root_with_exclusions() {
        let dir = fixture();
        let root = dir.path();
        let excluded = [root.join("a/skip"), root.join("c/cache/pkgs")];
        let units = enumerate(root, &exclude(&excluded), &CancelToken::new())
            .expect("enumerate");

        let covered = covered(&units);
        let unique: BTreeSet<_> = covered.iter().cloned().collect();
        assert_eq!(unique.len(), covered.len(), "a path was covered twice");

        let expected: BTreeSet<_> = all_paths(root)
            .into_iter()
            .filter(|p| !excluded.iter().any(|e| p.starts_with(e)))
            .collect();
        assert_eq!(unique, expected);
    }

    #[test]
    fn enumerate_partitions_root_with_symlink_leaf() {
        let dir = fixture();
        let root = dir.path();
        std::os::unix::fs::symlink("../b", root.join("a/link")).expect("symlink");
        let excluded = [root.join("a/skip")];
        let units = enumerate(root, &exclude(&excluded), &CancelToken::new())
            .expect("enumerate");
        assert!(units.contains(&EnumeratedUnit {
            path: root.join("a/link"),
            kind: UnitKind::Atomic,
        }));

        let covered = covered(&units);
        assert!(!covered.contains(&root.join("a/link/f3")));
        let unique: BTreeSet<_> = covered.iter().cloned().collect();
        assert_eq!(unique.len(), covered.len(), "a path was covered twice");
        let expected: BTreeSet<_> = all_paths(root)
            .into_iter()
            .filter(|p| !excluded.iter().any(|e| p.starts_with(e)))
            .collect();
        assert_eq!(unique, expected);
    }

    #[test]
    fn enumerate_excluded_root_contributes_nothing() {
        let dir = fixture();
        let units = enumerate(
            dir.path(),
            &exclude(&[dir.path().to_path_buf()]),
            &CancelToken::new(),
        )
        .expect("enumerate");
        assert!(units.is_empty());
    }

    #[test]
    fn enumerate_force_included_root_inside_exclusion_is_atomic() {
        let dir = fixture();
        let root = dir.path().join("b");
        let patterns = vec![format!("{},!{}", dir.path().display(), root.display())];
        let set = ExclusionSet::build(&[], &[], &patterns).expect("build");
        let units = enumerate(&root, &set, &CancelToken::new()).expect("enumerate");
        assert_eq!(units.len(), 1);
        assert!(units[0].is_atomic());
    }

    #[test]
    fn enumerate_missing_root_is_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let units = enumerate(
            &dir.path().join("vanished"),
            &ExclusionSet::empty(),
            &CancelToken::new(),
        )
        .expect("enumerate");
        assert!(units.is_empty());
    }

    #[test]
    fn enumerate_does_not_descend_through_symlink() {
        let dir = fixture();
        let root = dir.path();
        std::os::unix::fs::symlink(root.join("a"), root.join("link")).expect("symlink");
        let set = exclude(&[root.join("link/skip")]);
        let units = enumerate(root, &set, &CancelToken::new()).expect("enumerate");
        assert!(units.contains(&EnumeratedUnit {
            path: root.join("link"),
            kind: UnitKind::Atomic,
        }));
    }

    #[test]
    fn enumerate_paths_lists_atomic_leaves_only() {
        let dir = fixture();
        let root = dir.path();
        let paths = enumerate_paths(root, &exclude(&[root.join("a/skip")]), &CancelToken::new())
            .expect("enumerate");
        assert_eq!(
            paths,
            vec![root.join("a/keep"), root.join("a/top"), root.join("b"), root.join("c")]
        );
    }

    #[test]
    fn enumerate_cancelled_returns_error() {
        let dir = fixture();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = enumerate(dir.path(), &ExclusionSet::empty(), &cancel);
        assert!(matches!(result, Err(GraftError::Cancelled { .. })));
    }
}
