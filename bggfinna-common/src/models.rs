//! Domain records passed between pipeline stages
//!
//! Catalog records come from the library feed, match results link them to
//! the ranking database, and enriched games carry the ranking metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Identifier of a game in the external ranking database
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(pub u64);

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExternalId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(ExternalId)
    }
}

/// One library holding from the catalog feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRecord {
    /// Catalog identifier, unique within a run (e.g. "keski.3376040")
    pub source_id: String,
    /// Title as catalogued
    pub title: String,
    /// Remaining raw fields, kept verbatim
    pub metadata: CatalogMetadata,
}

/// Raw catalog fields carried alongside the title
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogMetadata {
    pub alternative_titles: Vec<String>,
    pub year: Option<String>,
    pub publication_dates: Vec<String>,
    pub languages: Vec<String>,
    pub authors: Vec<String>,
    pub publishers: Vec<String>,
    /// Holding locations (library buildings)
    pub buildings: Vec<String>,
}

impl CatalogRecord {
    pub fn new(source_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            title: title.into(),
            metadata: CatalogMetadata::default(),
        }
    }

    /// Publication year parsed from the catalog fields
    ///
    /// Tries the `year` field, then publication dates, then the title itself.
    pub fn catalog_year(&self) -> Option<i32> {
        self.metadata
            .year
            .as_deref()
            .and_then(first_year_in)
            .or_else(|| {
                self.metadata
                    .publication_dates
                    .iter()
                    .find_map(|d| first_year_in(d))
            })
            .or_else(|| first_year_in(&self.title))
    }

    /// Primary title followed by non-empty alternative titles
    pub fn all_titles(&self) -> Vec<&str> {
        std::iter::once(self.title.as_str())
            .chain(self.metadata.alternative_titles.iter().map(String::as_str))
            .filter(|t| !t.trim().is_empty())
            .collect()
    }
}

/// First plausible four-digit publication year (1900-2099) in free text
pub fn first_year_in(text: &str) -> Option<i32> {
    let bytes = text.as_bytes();
    if bytes.len() < 4 {
        return None;
    }
    for start in 0..=bytes.len() - 4 {
        let window = &bytes[start..start + 4];
        if !window.iter().all(u8::is_ascii_digit) {
            continue;
        }
        let before_digit = start > 0 && bytes[start - 1].is_ascii_digit();
        let after_digit = start + 4 < bytes.len() && bytes[start + 4].is_ascii_digit();
        if before_digit || after_digit {
            continue;
        }
        let year: i32 = text[start..start + 4].parse().ok()?;
        if (1900..=2099).contains(&year) {
            return Some(year);
        }
    }
    None
}

/// How a match decision was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    Exact,
    Fuzzy,
    Unmatched,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Exact => "exact",
            MatchMethod::Fuzzy => "fuzzy",
            MatchMethod::Unmatched => "unmatched",
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Match decision for one catalog record
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub source_id: String,
    /// None when no candidate cleared the acceptance threshold
    pub external_id: Option<ExternalId>,
    pub method: MatchMethod,
    /// 0.0-1.0
    pub confidence: f64,
    /// External name that won the match
    pub matched_title: Option<String>,
}

impl MatchResult {
    pub fn matched(
        source_id: impl Into<String>,
        external_id: ExternalId,
        method: MatchMethod,
        confidence: f64,
        matched_title: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            external_id: Some(external_id),
            method,
            confidence: round_confidence(confidence),
            matched_title: Some(matched_title.into()),
        }
    }

    pub fn unmatched(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            external_id: None,
            method: MatchMethod::Unmatched,
            confidence: 0.0,
            matched_title: None,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.external_id.is_some()
    }
}

/// Confidence stored with four decimals so artifacts stay stable across runs
fn round_confidence(value: f64) -> f64 {
    (value.clamp(0.0, 1.0) * 10_000.0).round() / 10_000.0
}

/// Ranking metadata for one matched game
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedGame {
    pub external_id: ExternalId,
    pub primary_name: String,
    pub year_published: Option<i32>,
    /// Overall board game rank; None when "Not Ranked"
    pub rank: Option<u32>,
    /// Average user rating
    pub rating: Option<f64>,
    pub bayes_average: Option<f64>,
    pub users_rated: Option<u32>,
    /// Average complexity weight (1-5)
    pub weight: Option<f64>,
    pub min_players: Option<u32>,
    pub max_players: Option<u32>,
    pub min_playtime: Option<u32>,
    pub max_playtime: Option<u32>,
    pub min_age: Option<u32>,
    pub categories: BTreeSet<String>,
    pub mechanics: BTreeSet<String>,
    pub designers: BTreeSet<String>,
    pub publishers: BTreeSet<String>,
    pub fetched_at: DateTime<Utc>,
}

impl EnrichedGame {
    /// Record with identity only; the parser fills the rest
    pub fn new(external_id: ExternalId, fetched_at: DateTime<Utc>) -> Self {
        Self {
            external_id,
            primary_name: String::new(),
            year_published: None,
            rank: None,
            rating: None,
            bayes_average: None,
            users_rated: None,
            weight: None,
            min_players: None,
            max_players: None,
            min_playtime: None,
            max_playtime: None,
            min_age: None,
            categories: BTreeSet::new(),
            mechanics: BTreeSet::new(),
            designers: BTreeSet::new(),
            publishers: BTreeSet::new(),
            fetched_at,
        }
    }
}
