//! Tar archive records shared by the writer and the reader.
//!
//! Archives hold four record kinds: directories, regular files, symlinks,
//! and hardlinks. Paths are relative to the archive root and never start
//! with a separator.

pub mod reader;
pub mod writer;

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};

use rootgraft_common::error::{GraftError, Result};
use rootgraft_core::filesystem::metadata::EntryMetadata;

pub use reader::{RestoreStats, restore_archive};
pub use writer::{ArchiveWriter, WriteStats, write_archive};

/// Kind of an archive record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Directory, written even when empty.
    Directory,
    /// Regular file with content.
    Regular,
    /// Symbolic link; `link_target` is the raw link text.
    Symlink,
    /// Hardlink to an earlier regular record; `link_target` is its archive path.
    Hardlink,
}

/// One archive entry without its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Path relative to the archive root; empty for the root itself.
    pub path: PathBuf,
    /// Record kind.
    pub kind: RecordKind,
    /// Mode, owner, and modification time.
    pub meta: EntryMetadata,
    /// Content length; zero for everything but regular files.
    pub size: u64,
    /// Symlink text or hardlink archive path.
    pub link_target: Option<PathBuf>,
}

impl FileRecord {
    /// Builds a record from filesystem metadata, or `None` for file types the
    /// archive format does not carry (devices, FIFOs, sockets).
    #[must_use]
    pub fn from_metadata(path: PathBuf, metadata: &Metadata) -> Option<Self> {
        let file_type = metadata.file_type();
        let (kind, size) = if file_type.is_dir() {
            (RecordKind::Directory, 0)
        } else if file_type.is_symlink() {
            (RecordKind::Symlink, 0)
        } else if file_type.is_file() {
            (RecordKind::Regular, metadata.len())
        } else {
            return None;
        };

        Some(Self {
            path,
            kind,
            meta: EntryMetadata {
                mode: metadata.mode() & 0o7777,
                uid: metadata.uid(),
                gid: metadata.gid(),
                mtime: metadata.mtime(),
            },
            size,
            link_target: None,
        })
    }

    /// Parses the header of a tar entry.
    ///
    /// Returns `Ok(None)` for entry types outside the four supported kinds.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveFormat` if a header field is malformed or a path tries
    /// to escape the archive root.
    pub fn from_entry<R: std::io::Read>(entry: &tar::Entry<'_, R>) -> Result<Option<Self>> {
        let header = entry.header();
        let kind = match header.entry_type() {
            tar::EntryType::Directory => RecordKind::Directory,
            tar::EntryType::Regular | tar::EntryType::Continuous => RecordKind::Regular,
            tar::EntryType::Symlink => RecordKind::Symlink,
            tar::EntryType::Link => RecordKind::Hardlink,
            other => {
                tracing::warn!(entry_type = ?other, "skipping unsupported archive record");
                return Ok(None);
            }
        };

        let raw_path = entry
            .path()
            .map_err(|e| GraftError::archive(format!("unreadable record path: {e}")))?;
        let path = sanitize(&raw_path)?;

        let link_target = match kind {
            RecordKind::Symlink | RecordKind::Hardlink => {
                let target = entry
                    .link_name()
                    .map_err(|e| GraftError::archive(format!("unreadable link target: {e}")))?
                    .ok_or_else(|| {
                        GraftError::archive(format!("link {} has no target", path.display()))
                    })?
                    .into_owned();
                Some(if kind == RecordKind::Hardlink {
                    sanitize(&target)?
                } else {
                    target
                })
            }
            _ => None,
        };

        let raw = header.as_old();
        let mode = header_field(header.mode(), "mode", &path)?;
        let uid = narrow(numeric_field(header.uid(), &raw.uid, "uid", &path)?, "uid", &path)?;
        let gid = narrow(numeric_field(header.gid(), &raw.gid, "gid", &path)?, "gid", &path)?;
        let mtime = i64::try_from(numeric_field(header.mtime(), &raw.mtime, "mtime", &path)?)
            .unwrap_or(i64::MAX);
        let size = if kind == RecordKind::Regular {
            header_field(header.size(), "size", &path)?
        } else {
            0
        };

        Ok(Some(Self {
            path,
            kind,
            meta: EntryMetadata {
                mode: mode & 0o7777,
                uid,
                gid,
                mtime,
            },
            size,
            link_target,
        }))
    }

    /// Builds the tar header for this record. Path and checksum are filled in
    /// by the builder when the record is appended.
    #[must_use]
    pub fn header(&self) -> tar::Header {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(match self.kind {
            RecordKind::Directory => tar::EntryType::Directory,
            RecordKind::Regular => tar::EntryType::Regular,
            RecordKind::Symlink => tar::EntryType::Symlink,
            RecordKind::Hardlink => tar::EntryType::Link,
        });
        header.set_mode(self.meta.mode);
        header.set_uid(u64::from(self.meta.uid));
        header.set_gid(u64::from(self.meta.gid));
        header.set_mtime(u64::try_from(self.meta.mtime).unwrap_or(0));
        header.set_size(self.size);
        header
    }

    /// Returns the path written into the archive (`.` for the root).
    #[must_use]
    pub fn archive_path(&self) -> &Path {
        if self.path.as_os_str().is_empty() {
            Path::new(".")
        } else {
            &self.path
        }
    }
}

fn header_field<T>(value: std::io::Result<T>, name: &str, path: &Path) -> Result<T> {
    value.map_err(|e| GraftError::archive(format!("bad {name} field for {}: {e}", path.display())))
}

/// Like [`header_field`], but a field left blank by the producer reads as 0.
fn numeric_field(value: std::io::Result<u64>, raw: &[u8], name: &str, path: &Path) -> Result<u64> {
    if value.is_err() && raw.iter().all(|&b| matches!(b, 0 | b' ')) {
        return Ok(0);
    }
    header_field(value, name, path)
}

fn narrow(value: u64, name: &str, path: &Path) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| GraftError::archive(format!("{name} out of range for {}", path.display())))
}

/// Strips leading separators and `.` components from an archive path.
///
/// # Errors
///
/// Returns `ArchiveFormat` if the path contains `..`.
pub fn sanitize(raw: &Path) -> Result<PathBuf> {
    let mut clean = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                return Err(GraftError::archive(format!(
                    "record path escapes archive root: {}",
                    raw.display()
                )));
            }
        }
    }
    Ok(clean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_leading_separator_and_dots() {
        assert_eq!(
            sanitize(Path::new("/./usr/bin/")).expect("clean"),
            PathBuf::from("usr/bin")
        );
        assert_eq!(sanitize(Path::new("./")).expect("clean"), PathBuf::new());
    }

    #[test]
    fn sanitize_rejects_parent_components() {
        let err = sanitize(Path::new("etc/../../passwd")).expect_err("must fail");
        assert!(matches!(err, GraftError::ArchiveFormat { .. }));
    }

    #[test]
    fn from_metadata_root_dir_uses_dot_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let meta = std::fs::symlink_metadata(dir.path()).expect("stat");
        let record = FileRecord::from_metadata(PathBuf::new(), &meta).expect("dir record");
        assert_eq!(record.kind, RecordKind::Directory);
        assert_eq!(record.archive_path(), Path::new("."));
    }

    #[test]
    fn from_entry_blank_owner_and_mtime_read_as_zero() {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(2);
        let raw = header.as_old_mut();
        raw.uid = [b' '; 8];
        raw.gid = [0; 8];
        raw.mtime = [b' '; 12];
        let mut builder = tar::Builder::new(Vec::new());
        builder.append_data(&mut header, "etc/motd", &b"hi"[..]).expect("append");
        let bytes = builder.into_inner().expect("finish");

        let mut archive = tar::Archive::new(&bytes[..]);
        let entry = archive.entries().expect("entries").next().expect("one").expect("entry");
        let record = FileRecord::from_entry(&entry).expect("parse").expect("supported");
        assert_eq!(record.path, PathBuf::from("etc/motd"));
        assert_eq!((record.meta.uid, record.meta.gid, record.meta.mtime), (0, 0, 0));
        assert_eq!(record.meta.mode, 0o644);
    }

    #[test]
    fn from_entry_garbage_owner_is_format_error() {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(0);
        header.as_old_mut().uid = *b"zz\0\0\0\0\0\0";
        let mut builder = tar::Builder::new(Vec::new());
        builder.append_data(&mut header, "bad", std::io::empty()).expect("append");
        let bytes = builder.into_inner().expect("finish");

        let mut archive = tar::Archive::new(&bytes[..]);
        let entry = archive.entries().expect("entries").next().expect("one").expect("entry");
        let err = FileRecord::from_entry(&entry).expect_err("garbage uid");
        assert!(matches!(err, GraftError::ArchiveFormat { .. }));
    }

    #[test]
    fn header_carries_mode_owner_and_type() {
        let record = FileRecord {
            path: PathBuf::from("bin/tool"),
            kind: RecordKind::Regular,
            meta: EntryMetadata {
                mode: 0o4755,
                uid: 1000,
                gid: 50,
                mtime: 1_700_000_000,
            },
            size: 12,
            link_target: None,
        };
        let header = record.header();
        assert_eq!(header.mode().expect("mode"), 0o4755);
        assert_eq!(header.uid().expect("uid"), 1000);
        assert_eq!(header.gid().expect("gid"), 50);
        assert_eq!(header.size().expect("size"), 12);
        assert_eq!(header.entry_type(), tar::EntryType::Regular);
    }
}
