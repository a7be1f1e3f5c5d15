//! Domain primitive types used across the rootgraft workspace.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{GraftError, Result};

/// Mapping from environment variable name to value.
///
/// Ordered so that rendered scripts and baseline files are deterministic.
pub type EnvMap = BTreeMap<String, String>;

/// Cooperative cancellation flag checked between archive records.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of every operation holding a clone of this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fails with [`GraftError::Cancelled`] if cancellation was requested.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` tagged with `stage` once the token is set.
    pub fn check(&self, stage: &'static str) -> Result<()> {
        if self.is_cancelled() {
            tracing::warn!(stage, "cancellation observed");
            return Err(GraftError::Cancelled { stage });
        }
        Ok(())
    }
}

/// Numeric user/group identity a sandboxed command runs as.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// User ID.
    pub uid: u32,
    /// Group ID.
    pub gid: u32,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check("test").is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(
            token.check("test"),
            Err(GraftError::Cancelled { stage: "test" })
        ));
    }

    #[test]
    fn identity_displays_as_uid_colon_gid() {
        let id = Identity { uid: 1000, gid: 100 };
        assert_eq!(id.to_string(), "1000:100");
    }
}
