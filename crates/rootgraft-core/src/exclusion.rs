//! Exclusion set construction and matching.
//!
//! Raw user patterns, live mount points, and fixed system directories are
//! folded into one canonical, deduplicated set of absolute paths. Each entry
//! either excludes its subtree or, when written with a leading `!`, forces it
//! back in. A path is governed by the deepest entry that contains it; on a
//! tie the force-include wins.

use std::path::{Component, Path, PathBuf};

use rootgraft_common::error::{GraftError, Result};

/// Whether an entry removes or rescues its subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Polarity {
    /// Subtree is skipped.
    Exclude,
    /// Subtree is carved back out of a broader exclusion.
    ForceInclude,
}

/// A single absolute path with its polarity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExclusionEntry {
    /// Absolute, lexically normalized path.
    pub path: PathBuf,
    /// Effect of the entry.
    pub polarity: Polarity,
}

impl ExclusionEntry {
    fn new(path: PathBuf, polarity: Polarity) -> Self {
        Self { path, polarity }
    }
}

/// Ordered, deduplicated, immutable collection of exclusion entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    entries: Vec<ExclusionEntry>,
}

impl ExclusionSet {
    /// Returns a set that excludes nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds the set from live mount points, fixed system directories, and
    /// user patterns.
    ///
    /// Patterns may hold several paths separated by `:` or `,`; a leading `!`
    /// marks a force-include. Mount points and system directories are always
    /// excludes.
    ///
    /// # Errors
    ///
    /// Returns `PathResolution` if a relative input cannot be made absolute.
    pub fn build(
        mount_points: &[PathBuf],
        system_dirs: &[PathBuf],
        user_patterns: &[String],
    ) -> Result<Self> {
        let mut raw = Vec::new();
        for path in mount_points.iter().chain(system_dirs) {
            raw.push(ExclusionEntry::new(absolutize(path)?, Polarity::Exclude));
        }
        for (pattern, polarity) in split_patterns(user_patterns) {
            raw.push(ExclusionEntry::new(absolutize(Path::new(pattern))?, polarity));
        }

        let set = Self::from_entries(raw);
        tracing::debug!(entries = set.entries.len(), "exclusion set built");
        Ok(set)
    }

    fn from_entries(mut raw: Vec<ExclusionEntry>) -> Self {
        raw.sort();
        raw.dedup();

        let entries = raw
            .iter()
            .filter(|entry| !is_redundant(entry, &raw))
            .cloned()
            .collect();
        Self { entries }
    }

    /// Returns the entries in path order.
    #[must_use]
    pub fn entries(&self) -> &[ExclusionEntry] {
        &self.entries
    }

    /// Returns whether the set holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates the paths of `Exclude` entries.
    pub fn excluded_paths(&self) -> impl Iterator<Item = &Path> {
        self.entries
            .iter()
            .filter(|e| e.polarity == Polarity::Exclude)
            .map(|e| e.path.as_path())
    }

    /// Returns whether `path` falls under an exclusion that no deeper
    /// force-include rescues.
    #[must_use]
    pub fn is_excluded(&self, path: &Path) -> bool {
        let mut governing: Option<&ExclusionEntry> = None;
        for entry in &self.entries {
            if !path.starts_with(&entry.path) {
                continue;
            }
            let deeper = governing.is_none_or(|g| {
                let (a, b) = (depth(&entry.path), depth(&g.path));
                a > b || (a == b && entry.polarity == Polarity::ForceInclude)
            });
            if deeper {
                governing = Some(entry);
            }
        }
        governing.is_some_and(|g| g.polarity == Polarity::Exclude)
    }

    /// Returns whether some exclusion lies strictly inside `path`'s subtree.
    #[must_use]
    pub fn has_boundary_inside(&self, path: &Path) -> bool {
        self.excluded_paths()
            .any(|excluded| is_strict_descendant(excluded, path))
    }
}

/// Splits raw patterns on `:` and `,`, stripping the `!` negation prefix.
fn split_patterns(patterns: &[String]) -> impl Iterator<Item = (&str, Polarity)> {
    patterns
        .iter()
        .flat_map(|p| p.split([':', ',']))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter_map(|p| match p.strip_prefix('!') {
            Some(rest) if rest.is_empty() => None,
            Some(rest) => Some((rest, Polarity::ForceInclude)),
            None => Some((p, Polarity::Exclude)),
        })
}

/// An entry is redundant when a same-polarity ancestor already covers it and
/// no opposite-polarity entry sits between the two.
fn is_redundant(entry: &ExclusionEntry, all: &[ExclusionEntry]) -> bool {
    all.iter().any(|ancestor| {
        ancestor.polarity == entry.polarity
            && is_strict_descendant(&entry.path, &ancestor.path)
            && !all.iter().any(|between| {
                between.polarity != entry.polarity
                    && between.path.starts_with(&ancestor.path)
                    && entry.path.starts_with(&between.path)
            })
    })
}

fn is_strict_descendant(path: &Path, ancestor: &Path) -> bool {
    path != ancestor && path.starts_with(ancestor)
}

fn depth(path: &Path) -> usize {
    path.components().count()
}

/// Makes `path` absolute against the working directory and removes `.` and
/// `..` components lexically. Symlinks are not resolved.
///
/// # Errors
///
/// Returns `PathResolution` if the working directory cannot be read.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path).map_err(|e| GraftError::PathResolution {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::ParentDir => {
                let _ = normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}
