//! # rootgraft-core
//!
//! Filesystem primitives for transplanting a root filesystem onto a live
//! host.
//!
//! This crate provides:
//! - **Exclusions**: canonical exclusion sets built from patterns, mount
//!   points, and system directories.
//! - **Enumeration**: the minimal set of subtrees to operate on.
//! - **Purge**: exclusion-aware deletion of a root before restore.
//! - **Filesystem**: mount discovery and metadata restoration.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod enumerate;
pub mod exclusion;
pub mod filesystem;
pub mod purge;
