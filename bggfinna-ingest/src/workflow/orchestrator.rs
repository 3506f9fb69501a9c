//! Pipeline Orchestrator
//!
//! Runs the stages in fixed order:
//!
//! ```text
//! catalog → match → enrich → load
//! ```
//!
//! Each stage reads the previous stage's complete artifact and writes its own
//! before the next stage starts, so any stage can be re-run alone from its
//! input artifact. Run size is decided once by [`RunSettings`]; stages never
//! look at the environment.

use crate::db::{init_database_pool, load_store, log_diagnostics};
use crate::error::{IngestError, IngestResult};
use crate::services::{
    distinct_ids, BggClient, CatalogSource, EnrichmentFetcher, FinnaClient, GameDatabase, GameMatcher,
};
use crate::utils::backoff::{BackoffPolicy, Sleeper, TokioSleeper};
use crate::workflow::statistics::{CatalogStats, EnrichmentStats, LoadStats, MatchingStats, PipelineStatistics};
use bggfinna_common::config::{EnrichmentConfig, MatcherConfig};
use bggfinna_common::models::CatalogRecord;
use bggfinna_common::{ArtifactStore, RunSettings, TomlConfig};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

/// Pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Catalog,
    Match,
    Enrich,
    Load,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Catalog, Stage::Match, Stage::Enrich, Stage::Load];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Catalog => "catalog",
            Stage::Match => "match",
            Stage::Enrich => "enrich",
            Stage::Load => "load",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "catalog" | "source" | "finna" => Ok(Stage::Catalog),
            "match" | "matcher" => Ok(Stage::Match),
            "enrich" | "fetch" => Ok(Stage::Enrich),
            "load" => Ok(Stage::Load),
            other => Err(format!(
                "unknown stage '{}' (expected catalog, match, enrich or load)",
                other
            )),
        }
    }
}

/// Which stages a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageSelection {
    #[default]
    All,
    /// One stage, from its input artifact
    Only(Stage),
    /// The named stage and every later one
    From(Stage),
}

impl StageSelection {
    pub fn stages(&self) -> Vec<Stage> {
        match self {
            StageSelection::All => Stage::ALL.to_vec(),
            StageSelection::Only(stage) => vec![*stage],
            StageSelection::From(first) => Stage::ALL.iter().copied().filter(|s| s >= first).collect(),
        }
    }
}

/// Sequences the pipeline stages over one output folder
pub struct PipelineOrchestrator {
    settings: RunSettings,
    store: ArtifactStore,
    catalog: Arc<dyn CatalogSource>,
    database: Arc<dyn GameDatabase>,
    sleeper: Arc<dyn Sleeper>,
    matcher_config: MatcherConfig,
    enrichment_config: EnrichmentConfig,
}

impl PipelineOrchestrator {
    pub fn new(
        settings: RunSettings,
        catalog: Arc<dyn CatalogSource>,
        database: Arc<dyn GameDatabase>,
        sleeper: Arc<dyn Sleeper>,
        matcher_config: MatcherConfig,
        enrichment_config: EnrichmentConfig,
    ) -> Self {
        let store = ArtifactStore::new(settings.output_dir.clone());
        Self {
            settings,
            store,
            catalog,
            database,
            sleeper,
            matcher_config,
            enrichment_config,
        }
    }

    /// Wire the real Finna and BGG clients
    ///
    /// One BGG client serves both search and detail requests so they share
    /// a single pacing budget.
    pub fn from_config(settings: RunSettings, config: &TomlConfig) -> IngestResult<Self> {
        let catalog = Arc::new(FinnaClient::from_config(&config.catalog)?);
        let database = Arc::new(BggClient::from_config(&config.enrichment)?);
        Ok(Self::new(
            settings,
            catalog,
            database,
            Arc::new(TokioSleeper),
            config.matcher.clone(),
            config.enrichment.clone(),
        ))
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Run the selected stages in order, stopping at the first failure
    pub async fn run(&self, selection: StageSelection) -> IngestResult<PipelineStatistics> {
        self.settings.ensure_output_dir()?;

        tracing::info!(
            profile = %self.settings.profile,
            record_limit = ?self.settings.record_limit,
            output_dir = %self.settings.output_dir.display(),
            stages = ?selection.stages(),
            "Pipeline starting"
        );

        let mut statistics = PipelineStatistics::default();
        let started = Instant::now();

        for stage in selection.stages() {
            let stage_started = Instant::now();
            tracing::info!(stage = %stage, "Stage starting");

            let summary = match stage {
                Stage::Catalog => {
                    let stats = self.run_catalog().await?;
                    let line = stats.display_string();
                    statistics.catalog = Some(stats);
                    line
                }
                Stage::Match => {
                    let stats = self.run_match().await?;
                    let line = stats.display_string();
                    statistics.matching = Some(stats);
                    line
                }
                Stage::Enrich => {
                    let stats = self.run_enrich().await?;
                    let line = stats.display_string();
                    statistics.enrichment = Some(stats);
                    line
                }
                Stage::Load => {
                    let stats = self.run_load().await?;
                    let line = stats.display_string();
                    statistics.load = Some(stats);
                    line
                }
            };

            tracing::info!(
                stage = %stage,
                elapsed_ms = stage_started.elapsed().as_millis() as u64,
                "Stage complete: {}",
                summary
            );
        }

        tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "Pipeline complete");
        for line in statistics.summary_lines() {
            tracing::info!("{}", line);
        }

        Ok(statistics)
    }

    /// Fetch catalog records and write `catalog_records.csv`
    pub async fn run_catalog(&self) -> IngestResult<CatalogStats> {
        let limit = self.settings.record_limit;
        let fetched = self.catalog.fetch_records(limit).await?;
        let (mut records, duplicates_dropped) = dedupe_records(fetched);
        if duplicates_dropped > 0 {
            tracing::warn!(
                dropped = duplicates_dropped,
                kept = records.len(),
                "Catalog repeated source ids, keeping the first occurrence"
            );
        }
        if let Some(limit) = limit {
            records.truncate(limit);
        }

        self.store.write_catalog_records(&records)?;

        Ok(CatalogStats {
            records_fetched: records.len(),
            record_limit: limit,
            duplicates_dropped,
        })
    }

    /// Match every catalog record and write `match_results.csv`
    pub async fn run_match(&self) -> IngestResult<MatchingStats> {
        let records = self.store.read_catalog_records()?;

        let matcher = GameMatcher::new(
            Arc::clone(&self.database),
            Arc::clone(&self.sleeper),
            &self.matcher_config,
            BackoffPolicy::from_config(&self.enrichment_config),
        );
        let (results, stats) = matcher.match_all(&records).await?;

        self.store.write_match_results(&results)?;
        Ok(stats)
    }

    /// Enrich the distinct matched ids and write `enriched_games.csv`
    pub async fn run_enrich(&self) -> IngestResult<EnrichmentStats> {
        let results = self.store.read_match_results()?;
        let ids = distinct_ids(&results);

        tracing::info!(
            match_results = results.len(),
            distinct_ids = ids.len(),
            "Collected ids for enrichment"
        );

        let fetcher = EnrichmentFetcher::new(
            Arc::clone(&self.database),
            Arc::clone(&self.sleeper),
            BackoffPolicy::from_config(&self.enrichment_config),
            self.enrichment_config.max_batch_size,
        );
        let outcome = fetcher.fetch_all(&ids).await?;

        if !outcome.omissions.is_empty() {
            tracing::warn!(
                omitted = outcome.stats.omitted(),
                not_found = outcome.stats.not_found,
                timed_out = outcome.stats.timed_out,
                "Some ids produced no enriched game"
            );
        }

        self.store.write_enriched_games(&outcome.games)?;
        Ok(outcome.stats)
    }

    /// Load the three artifacts into `boardgames.db`
    pub async fn run_load(&self) -> IngestResult<LoadStats> {
        let records = self.store.read_catalog_records()?;
        let matches = self.store.read_match_results()?;
        let games = self.store.read_enriched_games()?;

        let db_path = self.settings.database_path();
        let pool = init_database_pool(&db_path).await?;

        let result = async {
            let stats = load_store(&pool, &records, &matches, &games).await?;
            log_diagnostics(&pool).await?;
            Ok::<_, IngestError>(stats)
        }
        .await;

        pool.close().await;
        let stats = result?;

        tracing::info!(path = %db_path.display(), "Store written");
        Ok(stats)
    }
}

/// Drop records whose `source_id` was already seen, keeping feed order
fn dedupe_records(records: Vec<CatalogRecord>) -> (Vec<CatalogRecord>, usize) {
    let total = records.len();
    let mut seen = HashSet::new();
    let kept: Vec<CatalogRecord> = records
        .into_iter()
        .filter(|r| seen.insert(r.source_id.clone()))
        .collect();
    let dropped = total - kept.len();
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let mut second = CatalogRecord::new("keski.1", "Catan (2nd copy)");
        second.metadata.year = Some("2020".to_string());
        let records = vec![
            CatalogRecord::new("keski.1", "Catan"),
            CatalogRecord::new("keski.2", "Alias"),
            second,
        ];

        let (kept, dropped) = dedupe_records(records);

        assert_eq!(dropped, 1);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].title, "Catan");
        assert_eq!(kept[1].source_id, "keski.2");
    }

    #[test]
    fn test_stage_selection() {
        assert_eq!(StageSelection::All.stages(), Stage::ALL.to_vec());
        assert_eq!(StageSelection::Only(Stage::Enrich).stages(), vec![Stage::Enrich]);
        assert_eq!(
            StageSelection::From(Stage::Match).stages(),
            vec![Stage::Match, Stage::Enrich, Stage::Load]
        );
    }

    #[test]
    fn test_stage_names() {
        assert_eq!("Match".parse::<Stage>().unwrap(), Stage::Match);
        assert_eq!("fetch".parse::<Stage>().unwrap(), Stage::Enrich);
        assert!("deploy".parse::<Stage>().is_err());
        assert_eq!(Stage::Load.to_string(), "load");
    }
}
