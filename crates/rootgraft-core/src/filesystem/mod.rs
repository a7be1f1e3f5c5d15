//! Host filesystem facts and metadata helpers.
//!
//! Provides live mount point discovery and best-effort restoration of
//! permissions, timestamps, and ownership.

pub mod metadata;
pub mod mount;
