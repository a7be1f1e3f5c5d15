//! System-wide constants and default paths.

use std::path::PathBuf;

/// Default base directory for rootgraft data when `$HOME` is unavailable.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/rootgraft";

/// File name of the persisted environment baseline inside the data directory.
pub const BASELINE_FILE_NAME: &str = "env.baseline";

/// File name of the configuration file inside the data directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Directories that are always excluded from snapshot, purge, and restore.
pub const SYSTEM_DIRS: &[&str] = &["/proc", "/sys", "/dev", "/run"];

/// Sandbox binary used when the configuration names none.
pub const DEFAULT_SANDBOX_BINARY: &str = "proot";

/// Shell used when an image declares neither command nor shell.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Mount table consulted for live mount points.
pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "graft";

/// Returns the default data directory, preferring `$HOME/.rootgraft` and
/// falling back to `/var/lib/rootgraft`.
///
/// The directory is not created here; callers that write into it do so.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME").map_or_else(
        || PathBuf::from(SYSTEM_DATA_DIR),
        |home| PathBuf::from(home).join(".rootgraft"),
    )
}

/// Returns the directory holding the running executable, if it can be found.
///
/// Resolved once by the binary and passed down as configuration.
#[must_use]
pub fn current_exec_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(std::path::Path::to_path_buf))
}
