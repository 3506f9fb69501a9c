//! Service modules for the catalog-to-ranking pipeline
//!
//! External collaborators sit behind traits ([`CatalogSource`],
//! [`GameDatabase`]) so the matcher and the fetcher can be driven by scripted
//! fakes in tests.

pub mod bgg_client;
pub mod bgg_xml;
pub mod enrichment_fetcher;
pub mod finna_client;
pub mod game_matcher;
pub mod title_normalizer;

pub use bgg_client::{BggClient, GameDatabase, ThingsResponse};
pub use bgg_xml::SearchCandidate;
pub use enrichment_fetcher::{
    distinct_ids, BatchOutcome, BatchState, EnrichmentFetcher, EnrichmentOutcome, Omission, OmissionReason,
};
pub use finna_client::{CatalogSource, FinnaClient};
pub use game_matcher::{GameMatcher, MatchTier, ScoredCandidate};
pub use title_normalizer::normalize_title;
