//! Scripted collaborators for driving the pipeline without a network
//!
//! - [`FakeCatalog`]: fixed catalog records
//! - [`ScriptedDatabase`]: search results per query, known detail records,
//!   and a queue of scripted failures consumed before normal answers
//! - [`RecordingSleeper`]: records requested delays instead of waiting

use async_trait::async_trait;
use bggfinna_common::models::{CatalogRecord, EnrichedGame, ExternalId};
use bggfinna_ingest::error::{IngestError, IngestResult};
use bggfinna_ingest::services::{normalize_title, CatalogSource, GameDatabase, SearchCandidate, ThingsResponse};
use bggfinna_ingest::utils::Sleeper;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Fixed timestamp so enriched games compare equal across runs
pub fn fetched_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap()
}

/// Catalog source returning fixed records
pub struct FakeCatalog {
    records: Vec<CatalogRecord>,
}

impl FakeCatalog {
    pub fn new(records: Vec<CatalogRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl CatalogSource for FakeCatalog {
    async fn fetch_records(&self, limit: Option<usize>) -> IngestResult<Vec<CatalogRecord>> {
        let take = limit.unwrap_or(self.records.len());
        Ok(self.records.iter().take(take).cloned().collect())
    }
}

/// One scripted reply, consumed before the normal answer
#[derive(Debug, Clone, PartialEq)]
pub enum Scripted {
    Pending,
    RateLimited(Option<Duration>),
    Network,
    NotFound,
    Malformed,
}

impl Scripted {
    fn into_error(self) -> IngestError {
        match self {
            Scripted::Pending => unreachable!("pending is not an error"),
            Scripted::RateLimited(retry_after) => IngestError::RateLimited { retry_after },
            Scripted::Network => IngestError::Network("connection reset by peer".to_string()),
            Scripted::NotFound => IngestError::NotFound("no such items".to_string()),
            Scripted::Malformed => IngestError::MalformedResponse("unexpected root element: html".to_string()),
        }
    }
}

/// Ranking database with scripted behavior
#[derive(Default)]
pub struct ScriptedDatabase {
    search_results: HashMap<String, Vec<SearchCandidate>>,
    games: HashMap<ExternalId, EnrichedGame>,
    search_script: Mutex<VecDeque<Scripted>>,
    thing_script: Mutex<VecDeque<Scripted>>,
    search_calls: Mutex<Vec<String>>,
    thing_calls: Mutex<Vec<Vec<ExternalId>>>,
}

impl ScriptedDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Search results for a query (key is normalized like the matcher does)
    pub fn with_search(mut self, query: &str, candidates: Vec<SearchCandidate>) -> Self {
        self.search_results.insert(normalize_title(query), candidates);
        self
    }

    /// A detail record the database knows
    pub fn with_game(mut self, game: EnrichedGame) -> Self {
        self.games.insert(game.external_id, game);
        self
    }

    pub fn script_search(self, replies: Vec<Scripted>) -> Self {
        self.search_script.lock().unwrap().extend(replies);
        self
    }

    pub fn script_things(self, replies: Vec<Scripted>) -> Self {
        self.thing_script.lock().unwrap().extend(replies);
        self
    }

    pub fn search_calls(&self) -> Vec<String> {
        self.search_calls.lock().unwrap().clone()
    }

    pub fn thing_calls(&self) -> Vec<Vec<ExternalId>> {
        self.thing_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GameDatabase for ScriptedDatabase {
    async fn search(&self, query: &str) -> IngestResult<Vec<SearchCandidate>> {
        self.search_calls.lock().unwrap().push(query.to_string());

        if let Some(reply) = self.search_script.lock().unwrap().pop_front() {
            return Err(reply.into_error());
        }

        Ok(self.search_results.get(query).cloned().unwrap_or_default())
    }

    async fn fetch_things(&self, ids: &[ExternalId]) -> IngestResult<ThingsResponse> {
        self.thing_calls.lock().unwrap().push(ids.to_vec());

        match self.thing_script.lock().unwrap().pop_front() {
            Some(Scripted::Pending) => return Ok(ThingsResponse::Pending),
            Some(other) => return Err(other.into_error()),
            None => {}
        }

        let games = ids.iter().filter_map(|id| self.games.get(id).cloned()).collect();
        Ok(ThingsResponse::Ready(games))
    }
}

/// Sleeper that only records
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }

    pub fn total(&self) -> Duration {
        self.delays().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

/// Detail record for CATAN (id 13)
pub fn catan_game() -> EnrichedGame {
    let mut game = EnrichedGame::new(ExternalId(13), fetched_at());
    game.primary_name = "CATAN".to_string();
    game.year_published = Some(1995);
    game.rank = Some(556);
    game.rating = Some(7.09);
    game.bayes_average = Some(6.9);
    game.users_rated = Some(123456);
    game.weight = Some(2.29);
    game.min_players = Some(3);
    game.max_players = Some(4);
    game.min_playtime = Some(60);
    game.max_playtime = Some(120);
    game.min_age = Some(10);
    game.categories.insert("Economic".to_string());
    game.categories.insert("Negotiation".to_string());
    game.mechanics.insert("Dice Rolling".to_string());
    game.mechanics.insert("Trading".to_string());
    game.designers.insert("Klaus Teuber".to_string());
    game.publishers.insert("KOSMOS".to_string());
    game
}

/// Minimal detail record
pub fn simple_game(id: u64, name: &str) -> EnrichedGame {
    let mut game = EnrichedGame::new(ExternalId(id), fetched_at());
    game.primary_name = name.to_string();
    game.min_players = Some(2);
    game.max_players = Some(4);
    game
}

/// Search hits for "catan"
pub fn catan_search() -> Vec<SearchCandidate> {
    vec![
        SearchCandidate::new(ExternalId(13), "CATAN", Some(1995)),
        SearchCandidate::new(ExternalId(926), "CATAN: Cities & Knights", Some(1998)),
        SearchCandidate::new(ExternalId(27710), "Catan Dice Game", Some(2007)),
    ]
}
