//! Configuration model for the rootgraft engines.
//!
//! Every field of the on-disk file is optional. Defaults are applied by the
//! explicit accessors below rather than by a generic "first non-zero value"
//! helper, so an explicit `false` stays distinguishable from "not set".

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{GraftError, Result};

/// Root configuration for rootgraft, as stored in `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraftConfig {
    /// Base directory for rootgraft state.
    pub data_dir: Option<PathBuf>,
    /// Path of the persisted environment baseline.
    pub baseline_file: Option<PathBuf>,
    /// Directory appended to `PATH` in every exported environment.
    pub exec_dir: Option<PathBuf>,
    /// Directories always excluded, replacing the built-in list when set.
    pub system_dirs: Option<Vec<PathBuf>>,
    /// Additional exclusion patterns (same syntax as `--exclude`).
    pub exclude: Vec<String>,
    /// Sandbox binary name or path.
    pub sandbox_binary: Option<String>,
    /// Whether image variables override session-local ones.
    pub overwrite: Option<bool>,
    /// Whether `env`/`apply` persist the new baseline.
    pub persist_env: Option<bool>,
}

impl GraftConfig {
    /// Loads the configuration from `path`, returning defaults if it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no configuration file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(GraftError::io(path, e)),
        };
        let config: Self = serde_json::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Returns the configured data directory or the platform default.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(constants::default_data_dir)
    }

    /// Returns the baseline file path, defaulting inside the data directory.
    #[must_use]
    pub fn baseline_file(&self) -> PathBuf {
        self.baseline_file
            .clone()
            .unwrap_or_else(|| self.data_dir().join(constants::BASELINE_FILE_NAME))
    }

    /// Returns the directory appended to `PATH`.
    ///
    /// Falls back to `fallback` (normally the running executable's
    /// directory, resolved by the caller).
    ///
    /// # Errors
    ///
    /// Returns `Config` if neither the file nor the caller supplies one.
    pub fn exec_dir(&self, fallback: Option<PathBuf>) -> Result<PathBuf> {
        self.exec_dir
            .clone()
            .or(fallback)
            .ok_or_else(|| GraftError::Config {
                message: "cannot determine executable directory; set exec_dir".into(),
            })
    }

    /// Returns the always-excluded system directories.
    #[must_use]
    pub fn system_dirs(&self) -> Vec<PathBuf> {
        self.system_dirs.clone().unwrap_or_else(|| {
            constants::SYSTEM_DIRS
                .iter()
                .map(PathBuf::from)
                .collect()
        })
    }

    /// Returns the sandbox binary name.
    #[must_use]
    pub fn sandbox_binary(&self) -> &str {
        self.sandbox_binary
            .as_deref()
            .unwrap_or(constants::DEFAULT_SANDBOX_BINARY)
    }

    /// Resolves the overwrite flag: the CLI value wins when given.
    #[must_use]
    pub fn overwrite(&self, flag: Option<bool>) -> bool {
        flag.or(self.overwrite).unwrap_or(false)
    }

    /// Resolves the persistence flag: the CLI value wins when given.
    #[must_use]
    pub fn persist_env(&self, flag: Option<bool>) -> bool {
        flag.or(self.persist_env).unwrap_or(false)
    }
}
