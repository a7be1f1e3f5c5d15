//! Unified error types for the rootgraft workspace.
//!
//! The variants mirror the failure classes of the filesystem and
//! environment engines: path resolution, raw I/O, malformed archives,
//! vanished sources, permission failures, and cooperative cancellation.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum GraftError {
    /// A path could not be made absolute.
    #[error("cannot resolve path {path}: {source}")]
    PathResolution {
        /// Path that failed to resolve.
        path: PathBuf,
        /// Underlying I/O error (usually from reading the working directory).
        source: io::Error,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// An archive record is malformed or truncated.
    #[error("malformed archive: {message}")]
    ArchiveFormat {
        /// Description of the malformed record.
        message: String,
    },

    /// A path vanished between enumeration and access.
    #[error("source vanished: {path}")]
    MissingSource {
        /// Path that no longer exists.
        path: PathBuf,
    },

    /// A permission or capability error.
    #[error("permission denied at {path}: {message}")]
    PermissionDenied {
        /// Path of the denied operation.
        path: PathBuf,
        /// Description of the denied operation.
        message: String,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The operation was cancelled between records.
    #[error("operation cancelled during {stage}")]
    Cancelled {
        /// Stage that observed the cancellation.
        stage: &'static str,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl GraftError {
    /// Classifies an I/O error raised while touching `path`.
    ///
    /// `NotFound` becomes [`GraftError::MissingSource`] and
    /// `PermissionDenied` becomes [`GraftError::PermissionDenied`]; all
    /// other kinds stay [`GraftError::Io`].
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match source.kind() {
            io::ErrorKind::NotFound => Self::MissingSource { path },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path,
                message: source.to_string(),
            },
            _ => Self::Io { path, source },
        }
    }

    /// Builds an [`GraftError::ArchiveFormat`] from any displayable message.
    pub fn archive(message: impl Into<String>) -> Self {
        Self::ArchiveFormat {
            message: message.into(),
        }
    }

    /// Returns true for errors the engines downgrade to a warning.
    #[must_use]
    pub const fn is_missing_source(&self) -> bool {
        matches!(self, Self::MissingSource { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, GraftError>;
