//! Integration tests for replaykit
//!
//! These tests drive the engine end to end: interception, storage, bundles
//! and the command-line tool.

#[path = "../common/mod.rs"]
pub mod common;

pub mod cli;
pub mod engine_bundle;
pub mod record_replay;
