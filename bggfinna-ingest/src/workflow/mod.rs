//! Pipeline workflow: stage sequencing and run statistics

pub mod orchestrator;
pub mod statistics;

pub use orchestrator::{PipelineOrchestrator, Stage, StageSelection};
pub use statistics::{CatalogStats, EnrichmentStats, LoadStats, MatchingStats, PipelineStatistics};
