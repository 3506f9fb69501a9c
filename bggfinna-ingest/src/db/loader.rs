//! Bulk load of the three artifacts into the store
//!
//! Every load replaces the tables wholesale inside one transaction. `games`
//! holds one row per catalog record, left-joined to its match result and, if
//! present, the enriched game; missing pieces stay NULL. Categories and
//! mechanics are normalized into lookup tables with link tables keyed by the
//! external id.

use crate::error::IngestResult;
use crate::workflow::statistics::LoadStats;
use bggfinna_common::artifacts::join_list;
use bggfinna_common::models::{CatalogRecord, EnrichedGame, ExternalId, MatchResult};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::{BTreeMap, BTreeSet, HashMap};

const SCHEMA: &[&str] = &[
    "DROP TABLE IF EXISTS game_categories",
    "DROP TABLE IF EXISTS game_mechanics",
    "DROP TABLE IF EXISTS categories",
    "DROP TABLE IF EXISTS mechanics",
    "DROP TABLE IF EXISTS games",
    r#"
    CREATE TABLE games (
        source_id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        alternative_titles TEXT NOT NULL,
        catalog_year TEXT,
        languages TEXT NOT NULL,
        authors TEXT NOT NULL,
        catalog_publishers TEXT NOT NULL,
        buildings TEXT NOT NULL,
        has_match INTEGER NOT NULL,
        bgg_id INTEGER,
        match_method TEXT,
        match_confidence REAL,
        matched_title TEXT,
        primary_name TEXT,
        year_published INTEGER,
        rank INTEGER,
        rating REAL,
        bayes_average REAL,
        users_rated INTEGER,
        weight REAL,
        min_players INTEGER,
        max_players INTEGER,
        min_playtime INTEGER,
        max_playtime INTEGER,
        min_age INTEGER,
        categories TEXT,
        mechanics TEXT,
        designers TEXT,
        publishers TEXT,
        fetched_at TEXT
    )
    "#,
    "CREATE TABLE categories (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE)",
    "CREATE TABLE mechanics (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE)",
    r#"
    CREATE TABLE game_categories (
        bgg_id INTEGER NOT NULL,
        category_id INTEGER NOT NULL REFERENCES categories(id),
        PRIMARY KEY (bgg_id, category_id)
    )
    "#,
    r#"
    CREATE TABLE game_mechanics (
        bgg_id INTEGER NOT NULL,
        mechanic_id INTEGER NOT NULL REFERENCES mechanics(id),
        PRIMARY KEY (bgg_id, mechanic_id)
    )
    "#,
    "CREATE INDEX idx_games_bgg_id ON games(bgg_id)",
    "CREATE INDEX idx_games_rank ON games(rank)",
];

fn id_value(id: ExternalId) -> i64 {
    id.0 as i64
}

fn opt_u32(value: Option<u32>) -> Option<i64> {
    value.map(i64::from)
}

fn opt_list(set: Option<&BTreeSet<String>>) -> Option<String> {
    set.map(join_list)
}

/// Replace the store contents with the joined artifacts
pub async fn load_store(
    pool: &SqlitePool,
    records: &[CatalogRecord],
    matches: &[MatchResult],
    games: &[EnrichedGame],
) -> IngestResult<LoadStats> {
    let matches_by_source: HashMap<&str, &MatchResult> =
        matches.iter().map(|m| (m.source_id.as_str(), m)).collect();
    let games_by_id: HashMap<ExternalId, &EnrichedGame> = games.iter().map(|g| (g.external_id, g)).collect();

    let mut tx = pool.begin().await?;

    for statement in SCHEMA {
        sqlx::query(statement).execute(&mut *tx).await?;
    }

    let mut stats = LoadStats::default();

    for record in records {
        let matched = matches_by_source
            .get(record.source_id.as_str())
            .copied()
            .filter(|m| m.is_matched());
        let match_row = matches_by_source.get(record.source_id.as_str()).copied();
        let game = matched
            .and_then(|m| m.external_id)
            .and_then(|id| games_by_id.get(&id).copied());

        insert_game(&mut tx, record, match_row, game).await?;

        stats.game_rows += 1;
        if matched.is_some() {
            stats.matched_rows += 1;
        }
        if game.is_some() {
            stats.enriched_rows += 1;
        }
    }

    let (categories, mechanics) = insert_taxonomies(&mut tx, games).await?;
    stats.categories = categories;
    stats.mechanics = mechanics;

    tx.commit().await?;

    tracing::info!(
        game_rows = stats.game_rows,
        matched_rows = stats.matched_rows,
        enriched_rows = stats.enriched_rows,
        "Store loaded"
    );

    Ok(stats)
}

async fn insert_game(
    tx: &mut Transaction<'_, Sqlite>,
    record: &CatalogRecord,
    match_row: Option<&MatchResult>,
    game: Option<&EnrichedGame>,
) -> IngestResult<()> {
    let m = &record.metadata;

    sqlx::query(
        r#"
        INSERT INTO games (
            source_id, title, alternative_titles, catalog_year, languages, authors,
            catalog_publishers, buildings, has_match, bgg_id, match_method,
            match_confidence, matched_title, primary_name, year_published, rank,
            rating, bayes_average, users_rated, weight, min_players, max_players,
            min_playtime, max_playtime, min_age, categories, mechanics, designers,
            publishers, fetched_at
        ) VALUES (
            ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
            ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
        )
        "#,
    )
    .bind(&record.source_id)
    .bind(&record.title)
    .bind(join_list(&m.alternative_titles))
    .bind(m.year.as_deref())
    .bind(join_list(&m.languages))
    .bind(join_list(&m.authors))
    .bind(join_list(&m.publishers))
    .bind(join_list(&m.buildings))
    .bind(match_row.map_or(false, MatchResult::is_matched))
    .bind(match_row.and_then(|r| r.external_id).map(id_value))
    .bind(match_row.map(|r| r.method.as_str()))
    .bind(match_row.map(|r| r.confidence))
    .bind(match_row.and_then(|r| r.matched_title.as_deref()))
    .bind(game.map(|g| g.primary_name.as_str()))
    .bind(game.and_then(|g| g.year_published))
    .bind(opt_u32(game.and_then(|g| g.rank)))
    .bind(game.and_then(|g| g.rating))
    .bind(game.and_then(|g| g.bayes_average))
    .bind(opt_u32(game.and_then(|g| g.users_rated)))
    .bind(game.and_then(|g| g.weight))
    .bind(opt_u32(game.and_then(|g| g.min_players)))
    .bind(opt_u32(game.and_then(|g| g.max_players)))
    .bind(opt_u32(game.and_then(|g| g.min_playtime)))
    .bind(opt_u32(game.and_then(|g| g.max_playtime)))
    .bind(opt_u32(game.and_then(|g| g.min_age)))
    .bind(opt_list(game.map(|g| &g.categories)))
    .bind(opt_list(game.map(|g| &g.mechanics)))
    .bind(opt_list(game.map(|g| &g.designers)))
    .bind(opt_list(game.map(|g| &g.publishers)))
    .bind(game.map(|g| g.fetched_at.to_rfc3339()))
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Fill the category and mechanic lookup and link tables
///
/// Names get ids in alphabetical order so reloads are stable.
async fn insert_taxonomies(
    tx: &mut Transaction<'_, Sqlite>,
    games: &[EnrichedGame],
) -> IngestResult<(usize, usize)> {
    let category_ids = name_ids(games.iter().flat_map(|g| g.categories.iter()));
    let mechanic_ids = name_ids(games.iter().flat_map(|g| g.mechanics.iter()));

    for (name, id) in &category_ids {
        sqlx::query("INSERT INTO categories (id, name) VALUES (?, ?)")
            .bind(id)
            .bind(name)
            .execute(&mut **tx)
            .await?;
    }
    for (name, id) in &mechanic_ids {
        sqlx::query("INSERT INTO mechanics (id, name) VALUES (?, ?)")
            .bind(id)
            .bind(name)
            .execute(&mut **tx)
            .await?;
    }

    for game in games {
        for name in &game.categories {
            if let Some(id) = category_ids.get(name) {
                sqlx::query("INSERT OR IGNORE INTO game_categories (bgg_id, category_id) VALUES (?, ?)")
                    .bind(id_value(game.external_id))
                    .bind(id)
                    .execute(&mut **tx)
                    .await?;
            }
        }
        for name in &game.mechanics {
            if let Some(id) = mechanic_ids.get(name) {
                sqlx::query("INSERT OR IGNORE INTO game_mechanics (bgg_id, mechanic_id) VALUES (?, ?)")
                    .bind(id_value(game.external_id))
                    .bind(id)
                    .execute(&mut **tx)
                    .await?;
            }
        }
    }

    Ok((category_ids.len(), mechanic_ids.len()))
}

fn name_ids<'a>(names: impl Iterator<Item = &'a String>) -> BTreeMap<String, i64> {
    let distinct: BTreeSet<&String> = names.collect();
    distinct
        .into_iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), i as i64 + 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bggfinna_common::models::MatchMethod;
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::Row;

    async fn memory_pool() -> SqlitePool {
        // One connection: every in-memory connection is its own database
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    fn catan() -> EnrichedGame {
        let mut game = EnrichedGame::new(ExternalId(13), Utc::now());
        game.primary_name = "CATAN".to_string();
        game.min_players = Some(3);
        game.max_players = Some(4);
        game.rank = Some(556);
        game.categories.insert("Economic".to_string());
        game.categories.insert("Negotiation".to_string());
        game.mechanics.insert("Trading".to_string());
        game
    }

    #[tokio::test]
    async fn test_left_join_keeps_every_record() {
        let pool = memory_pool().await;
        let records = vec![
            CatalogRecord::new("keski.1", "Catan"),
            CatalogRecord::new("keski.2", "Xyzzy Nonexistent Game 9999"),
            CatalogRecord::new("keski.3", "Catan : lautapeli"),
        ];
        let matches = vec![
            MatchResult::matched("keski.1", ExternalId(13), MatchMethod::Exact, 1.0, "CATAN"),
            MatchResult::unmatched("keski.2"),
            MatchResult::matched("keski.3", ExternalId(13), MatchMethod::Exact, 1.0, "CATAN"),
        ];

        let stats = load_store(&pool, &records, &matches, &[catan()]).await.unwrap();
        assert_eq!(stats.game_rows, 3);
        assert_eq!(stats.matched_rows, 2);
        assert_eq!(stats.enriched_rows, 2);
        assert_eq!(stats.categories, 2);
        assert_eq!(stats.mechanics, 1);

        let row = sqlx::query("SELECT has_match, bgg_id, max_players FROM games WHERE source_id = 'keski.2'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(!row.get::<bool, _>("has_match"));
        assert_eq!(row.get::<Option<i64>, _>("bgg_id"), None);
        assert_eq!(row.get::<Option<i64>, _>("max_players"), None);

        // Links are per game, not per record
        let links: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM game_categories")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(links, 2);
    }

    #[tokio::test]
    async fn test_reload_replaces_contents() {
        let pool = memory_pool().await;
        let records = vec![CatalogRecord::new("keski.1", "Catan"), CatalogRecord::new("keski.2", "Kimble")];
        load_store(&pool, &records, &[], &[]).await.unwrap();
        load_store(&pool, &records[..1], &[], &[]).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM games")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
