//! Replayable archive sources.
//!
//! The restore engine scans its input three times, so every source handed
//! to it must be seekable. Plain tar files already are. Compressed files
//! and one-shot streams are decoded once into an anonymous temporary file.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use flate2::read::GzDecoder;
use rootgraft_common::error::{GraftError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A seekable archive stream.
#[derive(Debug)]
pub struct ArchiveSource {
    file: File,
}

impl ArchiveSource {
    /// Opens an archive file, spooling it through a gzip decoder when the
    /// name or the leading bytes mark it as compressed.
    ///
    /// # Errors
    ///
    /// Returns `MissingSource` if the file does not exist, or an I/O error
    /// if it cannot be read or decoded.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| GraftError::io(path, e))?;
        if has_gzip_extension(path) || starts_with_gzip_magic(&mut file, path)? {
            tracing::debug!(path = %path.display(), "decompressing gzip archive");
            let decoder = GzDecoder::new(BufReader::new(file));
            return Self::spool(decoder).map_err(|e| match e {
                GraftError::Io { source, .. } => GraftError::archive(format!(
                    "cannot decompress {}: {source}",
                    path.display()
                )),
                other => other,
            });
        }
        tracing::debug!(path = %path.display(), "opened archive");
        Ok(Self { file })
    }

    /// Copies a one-shot stream into an anonymous temporary file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the stream or the temporary file fails.
    pub fn spool<R: Read>(mut stream: R) -> Result<Self> {
        let spool_path = std::env::temp_dir();
        let mut file = tempfile::tempfile().map_err(|e| GraftError::io(&spool_path, e))?;
        let bytes = io::copy(&mut stream, &mut file).map_err(|e| GraftError::io(&spool_path, e))?;
        let _ = file
            .seek(SeekFrom::Start(0))
            .map_err(|e| GraftError::io(&spool_path, e))?;
        tracing::debug!(bytes, "spooled archive stream");
        Ok(Self { file })
    }

    /// Wraps an already-open seekable file.
    #[must_use]
    pub const fn from_file(file: File) -> Self {
        Self { file }
    }
}

impl Read for ArchiveSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for ArchiveSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

fn has_gzip_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("tgz"))
}

fn starts_with_gzip_magic(file: &mut File, path: &Path) -> Result<bool> {
    let mut magic = [0u8; 2];
    let read = file.read(&mut magic).map_err(|e| GraftError::io(path, e))?;
    let _ = file
        .seek(SeekFrom::Start(0))
        .map_err(|e| GraftError::io(path, e))?;
    Ok(read == magic.len() && magic == GZIP_MAGIC)
}
