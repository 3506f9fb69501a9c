//! # bggfinna Common Library
//!
//! Shared code for the bggfinna pipeline crates including:
//! - Domain records (catalog records, match results, enriched games)
//! - Tabular artifact reading and writing
//! - Configuration loading and run-size profiles
//! - Common error type

pub mod artifacts;
pub mod config;
pub mod error;
pub mod models;

pub use artifacts::{ArtifactKind, ArtifactStore};
pub use config::{RunProfile, RunSettings, TomlConfig};
pub use error::{Error, Result};
pub use models::{CatalogMetadata, CatalogRecord, EnrichedGame, ExternalId, MatchMethod, MatchResult};
