//! Tabular hand-off artifacts between pipeline stages
//!
//! Each stage writes exactly one CSV file. Writes go to a temporary sibling
//! and are renamed into place, so an aborted stage never leaves a truncated
//! artifact behind under the real name.

use crate::models::{
    CatalogMetadata, CatalogRecord, EnrichedGame, ExternalId, MatchMethod, MatchResult,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Separator for list-valued columns
pub const LIST_SEPARATOR: &str = "; ";

/// The three artifacts a run produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    CatalogRecords,
    MatchResults,
    EnrichedGames,
}

impl ArtifactKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            ArtifactKind::CatalogRecords => "catalog_records.csv",
            ArtifactKind::MatchResults => "match_results.csv",
            ArtifactKind::EnrichedGames => "enriched_games.csv",
        }
    }
}

/// Artifact locations for one output directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, kind: ArtifactKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    pub fn exists(&self, kind: ArtifactKind) -> bool {
        self.path(kind).is_file()
    }

    pub fn write_catalog_records(&self, records: &[CatalogRecord]) -> Result<PathBuf> {
        let rows: Vec<CatalogRow> = records.iter().map(CatalogRow::from).collect();
        self.write_rows(ArtifactKind::CatalogRecords, &rows)
    }

    pub fn read_catalog_records(&self) -> Result<Vec<CatalogRecord>> {
        let rows: Vec<CatalogRow> = self.read_rows(ArtifactKind::CatalogRecords)?;
        Ok(rows.into_iter().map(CatalogRecord::from).collect())
    }

    pub fn write_match_results(&self, results: &[MatchResult]) -> Result<PathBuf> {
        let rows: Vec<MatchRow> = results.iter().map(MatchRow::from).collect();
        self.write_rows(ArtifactKind::MatchResults, &rows)
    }

    pub fn read_match_results(&self) -> Result<Vec<MatchResult>> {
        let rows: Vec<MatchRow> = self.read_rows(ArtifactKind::MatchResults)?;
        Ok(rows.into_iter().map(MatchResult::from).collect())
    }

    pub fn write_enriched_games(&self, games: &[EnrichedGame]) -> Result<PathBuf> {
        let rows: Vec<EnrichedRow> = games.iter().map(EnrichedRow::from).collect();
        self.write_rows(ArtifactKind::EnrichedGames, &rows)
    }

    pub fn read_enriched_games(&self) -> Result<Vec<EnrichedGame>> {
        let rows: Vec<EnrichedRow> = self.read_rows(ArtifactKind::EnrichedGames)?;
        Ok(rows.into_iter().map(EnrichedGame::from).collect())
    }

    fn write_rows<T: Serialize>(&self, kind: ArtifactKind, rows: &[T]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let final_path = self.path(kind);
        let tmp_path = final_path.with_extension("csv.tmp");

        {
            // has_headers(false) + explicit header keeps empty artifacts readable
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_path(&tmp_path)?;
            writer.write_record(header_for(kind))?;
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }

        fs::rename(&tmp_path, &final_path)?;

        info!(
            artifact = kind.file_name(),
            rows = rows.len(),
            path = %final_path.display(),
            "Artifact written"
        );

        Ok(final_path)
    }

    fn read_rows<T: DeserializeOwned>(&self, kind: ArtifactKind) -> Result<Vec<T>> {
        let path = self.path(kind);
        if !path.is_file() {
            return Err(Error::NotFound(format!(
                "{} (run the producing stage first)",
                path.display()
            )));
        }

        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(&path)?;
        let rows = reader
            .deserialize()
            .collect::<std::result::Result<Vec<T>, csv::Error>>()?;

        debug!(artifact = kind.file_name(), rows = rows.len(), "Artifact read");
        Ok(rows)
    }
}

fn header_for(kind: ArtifactKind) -> &'static [&'static str] {
    match kind {
        ArtifactKind::CatalogRecords => &[
            "source_id",
            "title",
            "alternative_titles",
            "year",
            "publication_dates",
            "languages",
            "authors",
            "publishers",
            "buildings",
        ],
        ArtifactKind::MatchResults => &[
            "source_id",
            "external_id",
            "method",
            "confidence",
            "matched_title",
        ],
        ArtifactKind::EnrichedGames => &[
            "external_id",
            "primary_name",
            "year_published",
            "rank",
            "rating",
            "bayes_average",
            "users_rated",
            "weight",
            "min_players",
            "max_players",
            "min_playtime",
            "max_playtime",
            "min_age",
            "categories",
            "mechanics",
            "designers",
            "publishers",
            "fetched_at",
        ],
    }
}

/// Join a list column
pub fn join_list<'a, I>(items: I) -> String
where
    I: IntoIterator<Item = &'a String>,
{
    items
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(LIST_SEPARATOR)
}

/// Split a list column; tolerates missing spaces after the separator
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct CatalogRow {
    source_id: String,
    title: String,
    alternative_titles: String,
    year: Option<String>,
    publication_dates: String,
    languages: String,
    authors: String,
    publishers: String,
    buildings: String,
}

impl From<&CatalogRecord> for CatalogRow {
    fn from(record: &CatalogRecord) -> Self {
        let m = &record.metadata;
        Self {
            source_id: record.source_id.clone(),
            title: record.title.clone(),
            alternative_titles: join_list(&m.alternative_titles),
            year: m.year.clone(),
            publication_dates: join_list(&m.publication_dates),
            languages: join_list(&m.languages),
            authors: join_list(&m.authors),
            publishers: join_list(&m.publishers),
            buildings: join_list(&m.buildings),
        }
    }
}

impl From<CatalogRow> for CatalogRecord {
    fn from(row: CatalogRow) -> Self {
        Self {
            source_id: row.source_id,
            title: row.title,
            metadata: CatalogMetadata {
                alternative_titles: split_list(&row.alternative_titles),
                year: row.year.filter(|y| !y.trim().is_empty()),
                publication_dates: split_list(&row.publication_dates),
                languages: split_list(&row.languages),
                authors: split_list(&row.authors),
                publishers: split_list(&row.publishers),
                buildings: split_list(&row.buildings),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MatchRow {
    source_id: String,
    external_id: Option<ExternalId>,
    method: MatchMethod,
    confidence: f64,
    matched_title: Option<String>,
}

impl From<&MatchResult> for MatchRow {
    fn from(result: &MatchResult) -> Self {
        Self {
            source_id: result.source_id.clone(),
            external_id: result.external_id,
            method: result.method,
            confidence: result.confidence,
            matched_title: result.matched_title.clone(),
        }
    }
}

impl From<MatchRow> for MatchResult {
    fn from(row: MatchRow) -> Self {
        Self {
            source_id: row.source_id,
            external_id: row.external_id,
            method: row.method,
            confidence: row.confidence,
            matched_title: row.matched_title.filter(|t| !t.is_empty()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EnrichedRow {
    external_id: ExternalId,
    primary_name: String,
    year_published: Option<i32>,
    rank: Option<u32>,
    rating: Option<f64>,
    bayes_average: Option<f64>,
    users_rated: Option<u32>,
    weight: Option<f64>,
    min_players: Option<u32>,
    max_players: Option<u32>,
    min_playtime: Option<u32>,
    max_playtime: Option<u32>,
    min_age: Option<u32>,
    categories: String,
    mechanics: String,
    designers: String,
    publishers: String,
    fetched_at: DateTime<Utc>,
}

impl From<&EnrichedGame> for EnrichedRow {
    fn from(game: &EnrichedGame) -> Self {
        Self {
            external_id: game.external_id,
            primary_name: game.primary_name.clone(),
            year_published: game.year_published,
            rank: game.rank,
            rating: game.rating,
            bayes_average: game.bayes_average,
            users_rated: game.users_rated,
            weight: game.weight,
            min_players: game.min_players,
            max_players: game.max_players,
            min_playtime: game.min_playtime,
            max_playtime: game.max_playtime,
            min_age: game.min_age,
            categories: join_list(&game.categories),
            mechanics: join_list(&game.mechanics),
            designers: join_list(&game.designers),
            publishers: join_list(&game.publishers),
            fetched_at: game.fetched_at,
        }
    }
}

impl From<EnrichedRow> for EnrichedGame {
    fn from(row: EnrichedRow) -> Self {
        let to_set = |s: &str| split_list(s).into_iter().collect::<BTreeSet<_>>();
        Self {
            external_id: row.external_id,
            primary_name: row.primary_name,
            year_published: row.year_published,
            rank: row.rank,
            rating: row.rating,
            bayes_average: row.bayes_average,
            users_rated: row.users_rated,
            weight: row.weight,
            min_players: row.min_players,
            max_players: row.max_players,
            min_playtime: row.min_playtime,
            max_playtime: row.max_playtime,
            min_age: row.min_age,
            categories: to_set(&row.categories),
            mechanics: to_set(&row.mechanics),
            designers: to_set(&row.designers),
            publishers: to_set(&row.publishers),
            fetched_at: row.fetched_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list_trims_and_drops_empty() {
        assert_eq!(split_list("a; b;;c ;"), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_join_list() {
        let items = vec!["Dice".to_string(), "Trading".to_string()];
        assert_eq!(join_list(&items), "Dice; Trading");
    }

    #[test]
    fn test_artifact_file_names_are_distinct() {
        let names = [
            ArtifactKind::CatalogRecords.file_name(),
            ArtifactKind::MatchResults.file_name(),
            ArtifactKind::EnrichedGames.file_name(),
        ];
        assert_eq!(names.iter().collect::<BTreeSet<_>>().len(), 3);
    }
}
