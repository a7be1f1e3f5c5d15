//! Image collaborator boundary.
//!
//! The engines only need an image's declared runtime configuration and a
//! readable rootfs archive. [`LocalImage`] provides both from files on disk:
//! an OCI-style config JSON and a tar (optionally gzip) rootfs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rootgraft_common::error::{GraftError, Result};
use rootgraft_common::types::EnvMap;
use serde::{Deserialize, Serialize};

use crate::source::ArchiveSource;

/// Runtime configuration declared by an image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageConfig {
    /// Environment as `KEY=VALUE` strings.
    pub env: Option<Vec<String>>,
    /// Entrypoint prefix of the command.
    pub entrypoint: Option<Vec<String>>,
    /// Default command arguments.
    pub cmd: Option<Vec<String>>,
    /// Working directory inside the rootfs.
    pub working_dir: Option<String>,
    /// User as a name or `uid[:gid]`.
    pub user: Option<String>,
    /// Shell used when no command is declared.
    pub shell: Option<Vec<String>>,
    /// Volume mount points; values are empty objects.
    pub volumes: Option<BTreeMap<String, serde_json::Value>>,
}

impl ImageConfig {
    /// Parses either a bare config object or a full image config document
    /// that nests it under `config`.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the JSON does not match either shape.
    pub fn from_json(content: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(content)?;
        let config = match value.get("config") {
            Some(inner) if inner.is_object() => inner.clone(),
            Some(serde_json::Value::Null) => return Ok(Self::default()),
            _ => value,
        };
        Ok(serde_json::from_value(config)?)
    }
}

/// What the engines need from an image.
pub trait Image {
    /// Environment as `KEY=VALUE` strings.
    fn env(&self) -> &[String];
    /// Entrypoint prefix of the command.
    fn entrypoint(&self) -> &[String];
    /// Default command arguments.
    fn cmd(&self) -> &[String];
    /// Working directory, empty if undeclared.
    fn working_dir(&self) -> &str;
    /// User as `name`, `uid`, or `uid:gid`; empty if undeclared.
    fn user(&self) -> &str;
    /// Shell command vector.
    fn shell(&self) -> &[String];
    /// Declared volume paths.
    fn volumes(&self) -> Vec<PathBuf>;
    /// Opens the rootfs as a replayable archive.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be opened or decoded.
    fn rootfs(&self) -> Result<ArchiveSource>;
    /// Files backing the image on the host, kept out of any purge.
    fn source_paths(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// An image stored as a config file and a rootfs archive.
#[derive(Debug, Clone)]
pub struct LocalImage {
    config: ImageConfig,
    config_path: Option<PathBuf>,
    rootfs: PathBuf,
}

impl LocalImage {
    /// Loads the image config from `config_path` and records the rootfs path.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if either file is missing, or an error if the
    /// config cannot be parsed.
    pub fn load(config_path: &Path, rootfs_path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(config_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GraftError::NotFound {
                    kind: "image config",
                    id: config_path.display().to_string(),
                }
            } else {
                GraftError::io(config_path, e)
            }
        })?;
        if !rootfs_path.exists() {
            return Err(GraftError::NotFound {
                kind: "rootfs archive",
                id: rootfs_path.display().to_string(),
            });
        }
        let config = ImageConfig::from_json(&content)?;
        tracing::info!(
            config = %config_path.display(),
            rootfs = %rootfs_path.display(),
            "loaded local image"
        );
        Ok(Self {
            config,
            config_path: Some(config_path.to_path_buf()),
            rootfs: rootfs_path.to_path_buf(),
        })
    }

    /// Builds an image from an in-memory config.
    #[must_use]
    pub const fn new(config: ImageConfig, rootfs: PathBuf) -> Self {
        Self {
            config,
            config_path: None,
            rootfs,
        }
    }

    /// Returns the parsed config.
    #[must_use]
    pub const fn config(&self) -> &ImageConfig {
        &self.config
    }
}

impl Image for LocalImage {
    fn env(&self) -> &[String] {
        self.config.env.as_deref().unwrap_or_default()
    }

    fn entrypoint(&self) -> &[String] {
        self.config.entrypoint.as_deref().unwrap_or_default()
    }

    fn cmd(&self) -> &[String] {
        self.config.cmd.as_deref().unwrap_or_default()
    }

    fn working_dir(&self) -> &str {
        self.config.working_dir.as_deref().unwrap_or_default()
    }

    fn user(&self) -> &str {
        self.config.user.as_deref().unwrap_or_default()
    }

    fn shell(&self) -> &[String] {
        self.config.shell.as_deref().unwrap_or_default()
    }

    fn volumes(&self) -> Vec<PathBuf> {
        self.config
            .volumes
            .as_ref()
            .map(|volumes| volumes.keys().map(PathBuf::from).collect())
            .unwrap_or_default()
    }

    fn rootfs(&self) -> Result<ArchiveSource> {
        ArchiveSource::open(&self.rootfs)
    }

    fn source_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.rootfs.clone()];
        paths.extend(self.config_path.clone());
        paths
    }
}

/// Converts an image's `KEY=VALUE` list into an [`EnvMap`].
///
/// Entries are split at the first `=`. Later duplicates win.
pub fn image_env(image: &dyn Image) -> EnvMap {
    let mut env = EnvMap::new();
    for entry in image.env() {
        match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                let _ = env.insert(key.to_owned(), value.to_owned());
            }
            _ => tracing::warn!(entry = %entry, "ignoring malformed image environment entry"),
        }
    }
    env
}
