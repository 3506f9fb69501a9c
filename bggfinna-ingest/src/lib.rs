//! bggfinna-ingest library interface
//!
//! Library catalog → ranking database matching and enrichment pipeline.
//! Exposes the stages for the binary and for integration testing.

pub mod db;
pub mod error;
pub mod services;
pub mod utils;
pub mod workflow;

pub use crate::error::{IngestError, IngestResult};
pub use crate::workflow::{PipelineOrchestrator, PipelineStatistics, Stage, StageSelection};
