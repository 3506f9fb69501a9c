//! Pipeline statistics tracking
//!
//! One struct per stage, each with a one-line `display_string()` for the run
//! summary log.

use bggfinna_common::models::MatchMethod;
use serde::{Deserialize, Serialize};

/// **CATALOG Stage Statistics**
///
/// Display: "N catalog records fetched (limit L)"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub records_fetched: usize,
    pub record_limit: Option<usize>,
    /// Records dropped because their source id was already seen
    pub duplicates_dropped: usize,
}

impl CatalogStats {
    pub fn display_string(&self) -> String {
        let mut line = match self.record_limit {
            Some(limit) => format!("{} catalog records fetched (limit {})", self.records_fetched, limit),
            None => format!("{} catalog records fetched", self.records_fetched),
        };
        if self.duplicates_dropped > 0 {
            line.push_str(&format!(", {} duplicates dropped", self.duplicates_dropped));
        }
        line
    }
}

/// **MATCH Stage Statistics**
///
/// Display: "N records: X exact, Y fuzzy, Z unmatched (M malformed responses)"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingStats {
    pub records: usize,
    pub exact: usize,
    pub fuzzy: usize,
    pub unmatched: usize,
    /// Records degraded to unmatched because a search response was unreadable
    pub malformed_responses: usize,
}

impl MatchingStats {
    pub fn record(&mut self, method: MatchMethod) {
        match method {
            MatchMethod::Exact => self.exact += 1,
            MatchMethod::Fuzzy => self.fuzzy += 1,
            MatchMethod::Unmatched => self.unmatched += 1,
        }
    }

    pub fn matched(&self) -> usize {
        self.exact + self.fuzzy
    }

    pub fn display_string(&self) -> String {
        format!(
            "{} records: {} exact, {} fuzzy, {} unmatched ({} malformed responses)",
            self.records, self.exact, self.fuzzy, self.unmatched, self.malformed_responses
        )
    }
}

/// **ENRICH Stage Statistics**
///
/// Display: "N ids in B batches: E enriched, F not found, T timed out, R retries"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentStats {
    pub requested_ids: usize,
    pub batches: usize,
    pub enriched: usize,
    pub not_found: usize,
    pub timed_out: usize,
    pub timed_out_batches: usize,
    pub retries: usize,
}

impl EnrichmentStats {
    pub fn omitted(&self) -> usize {
        self.not_found + self.timed_out
    }

    pub fn display_string(&self) -> String {
        format!(
            "{} ids in {} batches: {} enriched, {} not found, {} timed out, {} retries",
            self.requested_ids, self.batches, self.enriched, self.not_found, self.timed_out, self.retries
        )
    }
}

/// **LOAD Stage Statistics**
///
/// Display: "N game rows (M matched, E enriched), C categories, K mechanics"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStats {
    pub game_rows: usize,
    pub matched_rows: usize,
    pub enriched_rows: usize,
    pub categories: usize,
    pub mechanics: usize,
}

impl LoadStats {
    pub fn display_string(&self) -> String {
        format!(
            "{} game rows ({} matched, {} enriched), {} categories, {} mechanics",
            self.game_rows, self.matched_rows, self.enriched_rows, self.categories, self.mechanics
        )
    }
}

/// Statistics of one run; stages that did not run stay None
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatistics {
    pub catalog: Option<CatalogStats>,
    pub matching: Option<MatchingStats>,
    pub enrichment: Option<EnrichmentStats>,
    pub load: Option<LoadStats>,
}

impl PipelineStatistics {
    /// Summary lines for the stages that ran
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(s) = &self.catalog {
            lines.push(format!("catalog: {}", s.display_string()));
        }
        if let Some(s) = &self.matching {
            lines.push(format!("match: {}", s.display_string()));
        }
        if let Some(s) = &self.enrichment {
            lines.push(format!("enrich: {}", s.display_string()));
        }
        if let Some(s) = &self.load {
            lines.push(format!("load: {}", s.display_string()));
        }
        lines
    }
}
