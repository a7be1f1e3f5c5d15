//! Three-pass archive restore.
//!
//! The archive is scanned once per record class: directories, then regular
//! files, then symlinks and hardlinks. Splitting the passes makes the result
//! independent of record order, so a hardlink may precede the file it points
//! to. The exclusion set is applied to every destination path in every pass.
//! Directory modes and timestamps are finalized after the link pass, deepest
//! first, because populating a directory changes its mtime and a read-only
//! mode would block populating it. No entry is ever created, replaced, or
//! linked through a symlink lying between the destination root and the
//! entry, so an archive cannot reach outside the destination.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use rootgraft_common::error::{GraftError, Result};
use rootgraft_common::types::CancelToken;
use rootgraft_core::exclusion::ExclusionSet;
use rootgraft_core::filesystem::metadata::{
    EntryMetadata, apply_mode, is_privileged, restore_mtime, restore_owner,
    restore_times_and_owner,
};
use rootgraft_core::purge::remove_path;

use super::{FileRecord, RecordKind};

/// Counters reported after a restore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreStats {
    /// Directories created.
    pub directories: u64,
    /// Regular files written.
    pub files: u64,
    /// Symlinks created.
    pub symlinks: u64,
    /// Hardlinks created.
    pub hardlinks: u64,
    /// Records skipped by the exclusion set.
    pub excluded: u64,
    /// Records skipped for other reasons (unlinkable targets, protected shells).
    pub skipped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Directories,
    Files,
    Links,
}

impl Pass {
    const fn stage(self) -> &'static str {
        match self {
            Self::Directories => "restore directories",
            Self::Files => "restore files",
            Self::Links => "restore links",
        }
    }

    const fn accepts(self, kind: RecordKind) -> bool {
        matches!(
            (self, kind),
            (Self::Directories, RecordKind::Directory)
                | (Self::Files, RecordKind::Regular)
                | (Self::Links, RecordKind::Symlink | RecordKind::Hardlink)
        )
    }
}

struct Restorer<'a> {
    dest: &'a Path,
    exclusions: &'a ExclusionSet,
    privileged: bool,
    directories: Vec<(PathBuf, EntryMetadata)>,
    stats: RestoreStats,
}

/// Restores a seekable tar archive into `dest`.
///
/// The source is rewound before each pass; one-shot streams must be spooled
/// first (see [`crate::source::ArchiveSource`]).
///
/// # Errors
///
/// Returns `ArchiveFormat` for malformed records, an I/O error if an entry
/// cannot be created, or `Cancelled` if `cancel` fires between records.
pub fn restore_archive<R: Read + Seek>(
    source: &mut R,
    dest: &Path,
    exclusions: &ExclusionSet,
    cancel: &CancelToken,
) -> Result<RestoreStats> {
    let mut restorer = Restorer {
        dest,
        exclusions,
        privileged: is_privileged(),
        directories: Vec::new(),
        stats: RestoreStats::default(),
    };
    if !restorer.privileged {
        tracing::debug!("unprivileged restore, ownership will not be restored");
    }

    for pass in [Pass::Directories, Pass::Files, Pass::Links] {
        cancel.check(pass.stage())?;
        scan(source, pass, cancel, |record, content| {
            restorer.restore(record, content)
        })?;
        tracing::debug!(stage = pass.stage(), "pass complete");
    }
    restorer.finalize_directories()?;

    let stats = restorer.stats;
    tracing::info!(
        dest = %dest.display(),
        directories = stats.directories,
        files = stats.files,
        symlinks = stats.symlinks,
        hardlinks = stats.hardlinks,
        excluded = stats.excluded,
        skipped = stats.skipped,
        "archive restored"
    );
    Ok(stats)
}

/// Rewinds `source` and feeds every record accepted by `pass` to `visit`.
fn scan<R, F>(source: &mut R, pass: Pass, cancel: &CancelToken, mut visit: F) -> Result<()>
where
    R: Read + Seek,
    F: FnMut(&FileRecord, &mut dyn Read) -> Result<()>,
{
    let _ = source
        .seek(SeekFrom::Start(0))
        .map_err(|e| GraftError::archive(format!("archive source cannot rewind: {e}")))?;

    let mut archive = tar::Archive::new(&mut *source);
    let entries = archive
        .entries()
        .map_err(|e| GraftError::archive(format!("cannot read archive: {e}")))?;

    for entry in entries {
        cancel.check(pass.stage())?;
        let mut entry =
            entry.map_err(|e| GraftError::archive(format!("corrupt archive record: {e}")))?;
        let Some(record) = FileRecord::from_entry(&entry)? else {
            continue;
        };
        if pass.accepts(record.kind) {
            visit(&record, &mut entry)?;
        }
    }
    Ok(())
}

impl Restorer<'_> {
    fn restore(&mut self, record: &FileRecord, content: &mut dyn Read) -> Result<()> {
        let target = self.dest.join(&record.path);
        if self.exclusions.is_excluded(&target) {
            tracing::trace!(path = %target.display(), "excluded from restore");
            self.stats.excluded += 1;
            return Ok(());
        }

        match record.kind {
            RecordKind::Directory => self.restore_directory(&target, record),
            RecordKind::Regular => self.restore_file(&target, record, content),
            RecordKind::Symlink => self.restore_symlink(&target, record),
            RecordKind::Hardlink => self.restore_hardlink(&target, record),
        }
    }

    fn restore_directory(&mut self, target: &Path, record: &FileRecord) -> Result<()> {
        if self.escapes(target) {
            return Ok(());
        }
        if fs::symlink_metadata(target).is_ok_and(|m| !m.is_dir()) && !self.clear_slot(target)? {
            return Ok(());
        }
        fs::create_dir_all(target).map_err(|e| GraftError::io(target, e))?;
        // Owner needs full access until the directory is finalized.
        apply_mode(target, record.meta.mode | 0o700)?;
        self.directories.push((target.to_path_buf(), record.meta));
        self.stats.directories += 1;
        Ok(())
    }

    fn restore_file(
        &mut self,
        target: &Path,
        record: &FileRecord,
        content: &mut dyn Read,
    ) -> Result<()> {
        if !self.prepare_slot(target)? {
            return Ok(());
        }

        let mut file = File::create(target).map_err(|e| GraftError::io(target, e))?;
        let copied = io::copy(content, &mut file).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => GraftError::archive(format!(
                "truncated content for {}",
                record.path.display()
            )),
            _ => GraftError::io(target, e),
        })?;
        if copied != record.size {
            return Err(GraftError::archive(format!(
                "{} declares {} bytes but holds {copied}",
                record.path.display(),
                record.size
            )));
        }
        drop(file);

        restore_owner(target, record.meta.uid, record.meta.gid, self.privileged);
        apply_mode(target, record.meta.mode)?;
        restore_mtime(target, record.meta.mtime);
        self.stats.files += 1;
        Ok(())
    }

    fn restore_symlink(&mut self, target: &Path, record: &FileRecord) -> Result<()> {
        let Some(link) = record.link_target.as_deref() else {
            return Err(GraftError::archive(format!(
                "symlink {} has no target",
                record.path.display()
            )));
        };
        if !self.prepare_slot(target)? {
            return Ok(());
        }

        std::os::unix::fs::symlink(link, target).map_err(|e| GraftError::io(target, e))?;
        restore_times_and_owner(target, &record.meta, self.privileged);
        self.stats.symlinks += 1;
        Ok(())
    }

    fn restore_hardlink(&mut self, target: &Path, record: &FileRecord) -> Result<()> {
        let Some(link) = record.link_target.as_deref() else {
            return Err(GraftError::archive(format!(
                "hardlink {} has no target",
                record.path.display()
            )));
        };
        let source = self.dest.join(link);
        if let Some(through) = linked_ancestor(self.dest, &source) {
            tracing::warn!(
                path = %target.display(),
                source = %source.display(),
                through = %through.display(),
                "hardlink source lies behind a symlink, skipping"
            );
            self.stats.skipped += 1;
            return Ok(());
        }
        if self.exclusions.is_excluded(&source) || fs::symlink_metadata(&source).is_err() {
            tracing::warn!(
                path = %target.display(),
                source = %source.display(),
                "hardlink source was not materialized, skipping"
            );
            self.stats.skipped += 1;
            return Ok(());
        }
        if !self.prepare_slot(target)? {
            return Ok(());
        }

        fs::hard_link(&source, target).map_err(|e| GraftError::io(target, e))?;
        self.stats.hardlinks += 1;
        Ok(())
    }

    /// Creates the parent of `target` and removes whatever occupies it.
    ///
    /// Returns false when the slot holds a directory with excluded content.
    fn prepare_slot(&mut self, target: &Path) -> Result<bool> {
        if self.escapes(target) {
            return Ok(false);
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| GraftError::io(parent, e))?;
        }
        self.clear_slot(target)
    }

    /// Counts and reports a record whose parent chain crosses a symlink.
    fn escapes(&mut self, target: &Path) -> bool {
        let Some(through) = linked_ancestor(self.dest, target) else {
            return false;
        };
        tracing::warn!(
            path = %target.display(),
            through = %through.display(),
            "record would be written through a symlink, skipping"
        );
        self.stats.skipped += 1;
        true
    }

    fn clear_slot(&mut self, target: &Path) -> Result<bool> {
        if self.exclusions.has_boundary_inside(target) {
            tracing::warn!(
                path = %target.display(),
                "record would replace a directory holding excluded entries, skipping"
            );
            self.stats.skipped += 1;
            return Ok(false);
        }
        remove_path(target)?;
        Ok(true)
    }

    /// Applies exact modes, owners, and timestamps to restored directories,
    /// children before parents.
    fn finalize_directories(&mut self) -> Result<()> {
        self.directories
            .sort_by_key(|(path, _)| std::cmp::Reverse(path.components().count()));
        for (path, meta) in &self.directories {
            restore_owner(path, meta.uid, meta.gid, self.privileged);
            apply_mode(path, meta.mode)?;
            restore_mtime(path, meta.mtime);
        }
        Ok(())
    }
}

/// Returns the first symlink among the existing ancestors of `target` below
/// `dest`. `dest` itself and `target` are not inspected.
fn linked_ancestor(dest: &Path, target: &Path) -> Option<PathBuf> {
    let relative = target.strip_prefix(dest).ok()?;
    let mut components = relative.components();
    let _ = components.next_back();

    let mut current = dest.to_path_buf();
    for component in components {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => return Some(current),
            Ok(_) => {}
            Err(_) => return None,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::MetadataExt;

    use super::*;

    fn header(kind: tar::EntryType, mode: u32, size: u64) -> tar::Header {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(kind);
        header.set_mode(mode);
        header.set_size(size);
        header.set_mtime(1_600_000_000);
        header
    }

    /// Builds an archive whose hardlink and symlink precede their targets.
    fn out_of_order_archive() -> io::Cursor<Vec<u8>> {
        let mut builder = tar::Builder::new(Vec::new());
        builder
            .append_link(&mut header(tar::EntryType::Link, 0o644, 0), "etc/alias", "etc/real")
            .expect("link");
        builder
            .append_link(&mut header(tar::EntryType::Symlink, 0o777, 0), "etc/soft", "real")
            .expect("symlink");
        builder
            .append_data(&mut header(tar::EntryType::Regular, 0o640, 4), "etc/real", &b"data"[..])
            .expect("file");
        builder
            .append_data(&mut header(tar::EntryType::Directory, 0o755, 0), "etc", io::empty())
            .expect("dir");
        builder
            .append_data(&mut header(tar::EntryType::Directory, 0o700, 0), "empty", io::empty())
            .expect("dir");
        io::Cursor::new(builder.into_inner().expect("finish"))
    }

    #[test]
    fn restore_links_appearing_before_targets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut archive = out_of_order_archive();
        let stats = restore_archive(
            &mut archive,
            dir.path(),
            &ExclusionSet::empty(),
            &CancelToken::new(),
        )
        .expect("restore");

        assert_eq!(stats.hardlinks, 1);
        assert_eq!(stats.symlinks, 1);
        let real = fs::metadata(dir.path().join("etc/real")).expect("stat");
        let alias = fs::metadata(dir.path().join("etc/alias")).expect("stat");
        assert_eq!(real.ino(), alias.ino());
        assert_eq!(real.mode() & 0o7777, 0o640);
        assert_eq!(
            fs::read_link(dir.path().join("etc/soft")).expect("readlink"),
            PathBuf::from("real")
        );
        assert_eq!(
            fs::metadata(dir.path().join("empty")).expect("stat").mode() & 0o7777,
            0o700
        );
        assert_eq!(real.mtime(), 1_600_000_000);
    }

    #[test]
    fn restore_excluded_subtree_gets_no_directory_shell() {
        let dir = tempfile::tempdir().expect("tempdir");
        let set = ExclusionSet::build(&[], &[dir.path().join("etc")], &[]).expect("build");
        let mut archive = out_of_order_archive();
        let stats = restore_archive(&mut archive, dir.path(), &set, &CancelToken::new())
            .expect("restore");

        assert!(!dir.path().join("etc").exists());
        assert!(dir.path().join("empty").is_dir());
        assert_eq!(stats.excluded, 4);
    }

    #[test]
    fn restore_replaces_existing_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("etc")).expect("mkdir");
        fs::write(dir.path().join("etc/soft"), "stale").expect("write");
        fs::write(dir.path().join("etc/alias"), "stale").expect("write");

        let mut archive = out_of_order_archive();
        let _ = restore_archive(
            &mut archive,
            dir.path(),
            &ExclusionSet::empty(),
            &CancelToken::new(),
        )
        .expect("restore");
        assert_eq!(
            fs::read_to_string(dir.path().join("etc/alias")).expect("read"),
            "data"
        );
        assert!(
            fs::symlink_metadata(dir.path().join("etc/soft"))
                .expect("lstat")
                .file_type()
                .is_symlink()
        );
    }

    #[test]
    fn restore_rejects_parent_escape() {
        let mut raw = header(tar::EntryType::Regular, 0o644, 1);
        let name = b"../escape";
        raw.as_old_mut().name[..name.len()].copy_from_slice(name);
        raw.set_cksum();
        let mut builder = tar::Builder::new(Vec::new());
        builder.append(&raw, &b"x"[..]).expect("append");
        let mut archive = io::Cursor::new(builder.into_inner().expect("finish"));

        let dir = tempfile::tempdir().expect("tempdir");
        let result = restore_archive(
            &mut archive,
            &dir.path().join("dest"),
            &ExclusionSet::empty(),
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(GraftError::ArchiveFormat { .. })));
        assert!(!dir.path().join("escape").exists());
    }

    #[test]
    fn restore_never_writes_through_archived_symlink() {
        let dir = tempfile::tempdir().expect("tempdir");
        let outside = dir.path().join("outside");
        fs::create_dir_all(&outside).expect("mkdir");
        fs::write(outside.join("victim"), "precious").expect("write");
        fs::write(outside.join("b"), "keep").expect("write");

        let mut builder = tar::Builder::new(Vec::new());
        builder
            .append_link(&mut header(tar::EntryType::Symlink, 0o777, 0), "a", &outside)
            .expect("symlink");
        builder
            .append_data(&mut header(tar::EntryType::Regular, 0o644, 4), "x", &b"evil"[..])
            .expect("file");
        builder
            .append_link(&mut header(tar::EntryType::Link, 0o644, 0), "a/victim", "x")
            .expect("link");
        builder
            .append_link(&mut header(tar::EntryType::Symlink, 0o777, 0), "a/b", "x")
            .expect("symlink");
        let mut archive = io::Cursor::new(builder.into_inner().expect("finish"));

        let dest = dir.path().join("dest");
        let stats = restore_archive(
            &mut archive,
            &dest,
            &ExclusionSet::empty(),
            &CancelToken::new(),
        )
        .expect("restore");

        assert_eq!(
            fs::read_to_string(outside.join("victim")).expect("read"),
            "precious"
        );
        assert_eq!(fs::read_to_string(outside.join("b")).expect("read"), "keep");
        assert_eq!(stats.symlinks, 1);
        assert_eq!(stats.hardlinks, 0);
        assert_eq!(stats.skipped, 2);
        assert_eq!(fs::read_link(dest.join("a")).expect("readlink"), outside);
    }

    #[test]
    fn restore_hardlink_source_behind_symlink_is_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let outside = dir.path().join("outside");
        fs::create_dir_all(&outside).expect("mkdir");
        fs::write(outside.join("secret"), "private").expect("write");

        let mut builder = tar::Builder::new(Vec::new());
        builder
            .append_link(&mut header(tar::EntryType::Symlink, 0o777, 0), "a", &outside)
            .expect("symlink");
        builder
            .append_link(&mut header(tar::EntryType::Link, 0o644, 0), "copy", "a/secret")
            .expect("link");
        let mut archive = io::Cursor::new(builder.into_inner().expect("finish"));

        let dest = dir.path().join("dest");
        let stats = restore_archive(
            &mut archive,
            &dest,
            &ExclusionSet::empty(),
            &CancelToken::new(),
        )
        .expect("restore");

        assert_eq!(stats.hardlinks, 0);
        assert_eq!(stats.skipped, 1);
        assert!(!dest.join("copy").exists());
    }

    #[test]
    fn restore_cancelled_before_first_pass_creates_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut archive = out_of_order_archive();
        let result = restore_archive(&mut archive, dir.path(), &ExclusionSet::empty(), &cancel);
        assert!(matches!(result, Err(GraftError::Cancelled { .. })));
        assert_eq!(fs::read_dir(dir.path()).expect("read").count(), 0);
    }

    #[test]
    fn restore_truncated_archive_is_format_error() {
        let mut bytes = out_of_order_archive().into_inner();
        // Cut inside the regular file's content block.
        bytes.truncate(512 * 3 + 2);
        let dir = tempfile::tempdir().expect("tempdir");
        let result = restore_archive(
            &mut io::Cursor::new(bytes),
            dir.path(),
            &ExclusionSet::empty(),
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(GraftError::ArchiveFormat { .. })));
    }
}
