//! Archive writer.
//!
//! Serializes enumerated units into a tar stream. Atomic units are walked
//! in full; recurse units contribute only their own directory record.
//! Hardlinked regular files are stored once and referenced afterwards.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use rootgraft_common::error::{GraftError, Result};
use rootgraft_common::types::CancelToken;
use rootgraft_core::enumerate::{EnumeratedUnit, UnitKind};
use walkdir::WalkDir;

use super::{FileRecord, RecordKind};

/// Counters reported after an archive has been written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    /// Directory records.
    pub directories: u64,
    /// Regular records with content.
    pub files: u64,
    /// Symlink records.
    pub symlinks: u64,
    /// Hardlink records.
    pub hardlinks: u64,
    /// Content bytes stored.
    pub bytes: u64,
    /// Entries skipped because they vanished or have an unsupported type.
    pub skipped: u64,
}

/// Streaming tar writer rooted at a filesystem directory.
pub struct ArchiveWriter<W: Write> {
    builder: tar::Builder<W>,
    root: PathBuf,
    /// `(device, inode)` of multiply-linked files to their first archive path.
    seen: HashMap<(u64, u64), PathBuf>,
    stats: WriteStats,
}

impl<W: Write> ArchiveWriter<W> {
    /// Creates a writer whose record paths are relative to `root`.
    pub fn new(output: W, root: impl Into<PathBuf>) -> Self {
        let mut builder = tar::Builder::new(output);
        builder.follow_symlinks(false);
        Self {
            builder,
            root: root.into(),
            seen: HashMap::new(),
            stats: WriteStats::default(),
        }
    }

    /// Appends one enumerated unit.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the source or writing the stream fails,
    /// or if `cancel` fires. Vanished entries are skipped, not errors.
    pub fn append_unit(&mut self, unit: &EnumeratedUnit, cancel: &CancelToken) -> Result<()> {
        match unit.kind {
            UnitKind::Recurse => {
                cancel.check("archive")?;
                match fs::symlink_metadata(&unit.path) {
                    Ok(metadata) => self.append_path(&unit.path, &metadata),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        self.skip_vanished(&unit.path);
                        Ok(())
                    }
                    Err(e) => Err(GraftError::io(&unit.path, e)),
                }
            }
            UnitKind::Atomic => self.append_tree(&unit.path, cancel),
        }
    }

    fn append_tree(&mut self, top: &Path, cancel: &CancelToken) -> Result<()> {
        // A unit may itself be a symlink; archive the link, not its target.
        let walker = WalkDir::new(top)
            .follow_links(false)
            .follow_root_links(false)
            .sort_by_file_name()
            .into_iter();

        for entry in walker {
            cancel.check("archive")?;
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map_or_else(|| top.to_path_buf(), Path::to_path_buf);
                    match e.into_io_error() {
                        Some(io) if io.kind() == io::ErrorKind::NotFound => {
                            self.skip_vanished(&path);
                            continue;
                        }
                        Some(io) => return Err(GraftError::io(&path, io)),
                        None => {
                            return Err(GraftError::Io {
                                path,
                                source: io::Error::other("filesystem loop"),
                            });
                        }
                    }
                }
            };

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => match e.into_io_error() {
                    Some(io) if io.kind() == io::ErrorKind::NotFound => {
                        self.skip_vanished(entry.path());
                        continue;
                    }
                    Some(io) => return Err(GraftError::io(entry.path(), io)),
                    None => continue,
                },
            };
            self.append_path(entry.path(), &metadata)?;
        }
        Ok(())
    }

    fn append_path(&mut self, path: &Path, metadata: &fs::Metadata) -> Result<()> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| GraftError::Config {
                message: format!(
                    "{} lies outside archive root {}",
                    path.display(),
                    self.root.display()
                ),
            })?
            .to_path_buf();

        let Some(mut record) = FileRecord::from_metadata(relative, metadata) else {
            tracing::warn!(path = %path.display(), "skipping unsupported file type");
            self.stats.skipped += 1;
            return Ok(());
        };

        match record.kind {
            RecordKind::Directory => {
                let mut header = record.header();
                self.builder
                    .append_data(&mut header, record.archive_path(), io::empty())
                    .map_err(|e| GraftError::io(path, e))?;
                self.stats.directories += 1;
            }
            RecordKind::Symlink => {
                let target = match fs::read_link(path) {
                    Ok(target) => target,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        self.skip_vanished(path);
                        return Ok(());
                    }
                    Err(e) => return Err(GraftError::io(path, e)),
                };
                let mut header = record.header();
                self.builder
                    .append_link(&mut header, record.archive_path(), &target)
                    .map_err(|e| GraftError::io(path, e))?;
                self.stats.symlinks += 1;
            }
            RecordKind::Regular | RecordKind::Hardlink => {
                self.append_regular(path, metadata, &mut record)?;
            }
        }
        Ok(())
    }

    fn append_regular(
        &mut self,
        path: &Path,
        metadata: &fs::Metadata,
        record: &mut FileRecord,
    ) -> Result<()> {
        let identity = (metadata.nlink() > 1).then(|| (metadata.dev(), metadata.ino()));

        if let Some(first) = identity.and_then(|key| self.seen.get(&key)) {
            record.kind = RecordKind::Hardlink;
            record.size = 0;
            let first = first.clone();
            let mut header = record.header();
            self.builder
                .append_link(&mut header, record.archive_path(), &first)
                .map_err(|e| GraftError::io(path, e))?;
            self.stats.hardlinks += 1;
            return Ok(());
        }

        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.skip_vanished(path);
                return Ok(());
            }
            Err(e) => return Err(GraftError::io(path, e)),
        };

        // The header size is fixed; pad or truncate if the file changed since stat.
        let size = record.size;
        let content = file.take(size).chain(io::repeat(0)).take(size);
        let mut header = record.header();
        self.builder
            .append_data(&mut header, record.archive_path(), content)
            .map_err(|e| GraftError::io(path, e))?;

        if let Some(key) = identity {
            let _ = self.seen.insert(key, record.path.clone());
        }
        self.stats.files += 1;
        self.stats.bytes += size;
        Ok(())
    }

    fn skip_vanished(&mut self, path: &Path) {
        tracing::warn!(path = %path.display(), "source vanished, skipping");
        self.stats.skipped += 1;
    }

    /// Writes the end-of-archive marker and returns the output and counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the trailer cannot be written.
    pub fn finish(self) -> Result<(W, WriteStats)> {
        let stats = self.stats;
        let output = self
            .builder
            .into_inner()
            .map_err(|e| GraftError::io(&self.root, e))?;
        Ok((output, stats))
    }
}

/// Writes `units` under `root` into a new archive file at `destination`.
///
/// On any failure the partially written destination is removed.
///
/// # Errors
///
/// Returns an error if the destination cannot be created, a source cannot
/// be read, or `cancel` fires.
pub fn write_archive(
    root: &Path,
    units: &[EnumeratedUnit],
    destination: &Path,
    cancel: &CancelToken,
) -> Result<WriteStats> {
    let file = File::create(destination).map_err(|e| GraftError::io(destination, e))?;
    let result = write_units(file, root, units, cancel);

    match result {
        Ok(stats) => {
            tracing::info!(
                destination = %destination.display(),
                directories = stats.directories,
                files = stats.files,
                symlinks = stats.symlinks,
                hardlinks = stats.hardlinks,
                bytes = stats.bytes,
                skipped = stats.skipped,
                "archive written"
            );
            Ok(stats)
        }
        Err(e) => {
            if let Err(remove) = fs::remove_file(destination) {
                tracing::warn!(
                    destination = %destination.display(),
                    error = %remove,
                    "failed to remove partial archive"
                );
            }
            Err(e)
        }
    }
}

fn write_units(
    file: File,
    root: &Path,
    units: &[EnumeratedUnit],
    cancel: &CancelToken,
) -> Result<WriteStats> {
    let mut writer = ArchiveWriter::new(io::BufWriter::new(file), root);
    for unit in units {
        writer.append_unit(unit, cancel)?;
    }
    let (output, stats) = writer.finish()?;
    let file = output
        .into_inner()
        .map_err(|e| GraftError::io(root, e.into_error()))?;
    file.sync_all().map_err(|e| GraftError::io(root, e))?;
    Ok(stats)
}
