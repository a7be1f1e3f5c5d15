//! Best-effort metadata restoration.
//!
//! Permissions, timestamps, and ownership are applied after an entry is
//! materialized. Timestamp and ownership failures never abort a restore:
//! they are logged and skipped. Ownership is only attempted when the
//! process runs with an effective UID of 0.

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use nix::sys::stat::lutimes;
use nix::sys::time::{TimeVal, TimeValLike};
use rootgraft_common::error::{GraftError, Result};

/// Ownership, mode, and modification time carried by an archive record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Permission bits including setuid/setgid/sticky.
    pub mode: u32,
    /// Owner user ID.
    pub uid: u32,
    /// Owner group ID.
    pub gid: u32,
    /// Modification time in seconds since the epoch.
    pub mtime: i64,
}

/// Returns whether the process may restore ownership.
#[must_use]
pub fn is_privileged() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Sets the permission bits of a non-symlink entry.
///
/// # Errors
///
/// Returns an error if `chmod(2)` fails.
pub fn apply_mode(path: &Path, mode: u32) -> Result<()> {
    std::fs::set_permissions(path, Permissions::from_mode(mode & 0o7777))
        .map_err(|e| GraftError::io(path, e))
}

/// Restores the modification time without following symlinks.
///
/// Failures are logged and swallowed.
pub fn restore_mtime(path: &Path, mtime: i64) {
    let stamp = TimeVal::seconds(mtime);
    if let Err(e) = lutimes(path, &stamp, &stamp) {
        tracing::warn!(path = %path.display(), error = %e, "failed to restore timestamp");
    }
}

/// Restores ownership without following symlinks when `privileged` is set.
///
/// Unprivileged callers skip silently; privileged failures are logged and
/// swallowed.
pub fn restore_owner(path: &Path, uid: u32, gid: u32, privileged: bool) {
    if !privileged {
        return;
    }
    if let Err(e) = std::os::unix::fs::lchown(path, Some(uid), Some(gid)) {
        tracing::warn!(path = %path.display(), uid, gid, error = %e, "failed to restore owner");
    }
}

/// Applies timestamp and ownership in the order that keeps both intact.
pub fn restore_times_and_owner(path: &Path, meta: &EntryMetadata, privileged: bool) {
    restore_owner(path, meta.uid, meta.gid, privileged);
    restore_mtime(path, meta.mtime);
}
