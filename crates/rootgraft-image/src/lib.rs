//! # rootgraft-image
//!
//! Archive engine and image boundary for rootgraft.
//!
//! Handles:
//! - **Archive**: Tar writer with hardlink deduplication and a three-pass,
//!   order-independent, exclusion-aware reader.
//! - **Source**: Seekable archive sources, spooling gzip and one-shot streams.
//! - **Image**: The image contract and a local config-plus-rootfs backend.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod archive;
pub mod image;
pub mod source;
