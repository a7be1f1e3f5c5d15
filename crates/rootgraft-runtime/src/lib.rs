//! Orchestration for rootgraft: environment reconciliation, sandbox plans,
//! and the engine behind every CLI operation.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod baseline;
pub mod engine;
pub mod env;
pub mod exec;
pub mod sandbox;
