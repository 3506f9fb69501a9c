//! Test Helper Utilities
//!
//! Shared utilities for testing bggfinna-ingest

#![allow(dead_code)]

pub mod fake_sources;
pub mod log_capture;

pub use fake_sources::{
    catan_game, catan_search, fetched_at, simple_game, FakeCatalog, RecordingSleeper, Scripted, ScriptedDatabase,
};
pub use log_capture::{capture_logs, LogCapture};
