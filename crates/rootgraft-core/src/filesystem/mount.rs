//! Live mount point discovery.
//!
//! Reads the kernel mount table so that every mounted directory can be
//! excluded from snapshot, purge, and restore, and later bind-mounted into a
//! sandbox.

use std::path::{Path, PathBuf};

use rootgraft_common::constants::MOUNTINFO_PATH;
use rootgraft_common::error::{GraftError, Result};

/// Returns every mount point of the calling process except `/`.
///
/// A missing mount table (non-Linux hosts) yields an empty list.
///
/// # Errors
///
/// Returns an error if the mount table exists but cannot be read.
pub fn live_mount_points() -> Result<Vec<PathBuf>> {
    read_mount_points(Path::new(MOUNTINFO_PATH))
}

/// Reads mount points from a `mountinfo`-formatted file.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read_mount_points(mountinfo: &Path) -> Result<Vec<PathBuf>> {
    let content = match std::fs::read_to_string(mountinfo) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %mountinfo.display(), "no mount table");
            return Ok(Vec::new());
        }
        Err(e) => return Err(GraftError::io(mountinfo, e)),
    };

    let mounts = parse_mountinfo(&content);
    tracing::debug!(count = mounts.len(), "live mount points");
    Ok(mounts)
}

/// Extracts the mount point column (fifth field) of each line.
fn parse_mountinfo(content: &str) -> Vec<PathBuf> {
    let mut mounts: Vec<PathBuf> = content
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .map(unescape_octal)
        .filter(|mount| mount != "/")
        .map(PathBuf::from)
        .collect();
    mounts.sort();
    mounts.dedup();
    mounts
}

/// Decodes the `\ooo` escapes the kernel uses for spaces, tabs, newlines,
/// and backslashes.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 8).ok());
            if let Some(value) = decoded {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
