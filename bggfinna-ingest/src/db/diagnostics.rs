//! Post-load diagnostics
//!
//! Reports how records were matched and which external ids were claimed by
//! more than one catalog record (several holdings of one game, or a matching
//! mistake worth a look).

use crate::error::IngestResult;
use sqlx::SqlitePool;

/// External id shared by several catalog records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateMatch {
    pub bgg_id: i64,
    pub matched_title: Option<String>,
    /// Sorted catalog ids
    pub source_ids: Vec<String>,
}

/// Row count per match method; records without a match row report "none"
pub async fn method_breakdown(pool: &SqlitePool) -> IngestResult<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT COALESCE(match_method, 'none') AS method, COUNT(*) AS n
        FROM games
        GROUP BY method
        ORDER BY method
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// External ids matched by more than one record, most shared first
pub async fn duplicate_matches(pool: &SqlitePool) -> IngestResult<Vec<DuplicateMatch>> {
    let rows: Vec<(i64, Option<String>, String)> = sqlx::query_as(
        r#"
        SELECT bgg_id, MAX(matched_title), GROUP_CONCAT(source_id, char(31))
        FROM games
        WHERE bgg_id IS NOT NULL
        GROUP BY bgg_id
        HAVING COUNT(*) > 1
        ORDER BY COUNT(*) DESC, bgg_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(bgg_id, matched_title, joined)| {
            let mut source_ids: Vec<String> = joined.split('\u{1f}').map(str::to_string).collect();
            source_ids.sort();
            DuplicateMatch {
                bgg_id,
                matched_title,
                source_ids,
            }
        })
        .collect())
}

/// Log the method breakdown and duplicate report
pub async fn log_diagnostics(pool: &SqlitePool) -> IngestResult<()> {
    let breakdown = method_breakdown(pool).await?;
    let total: i64 = breakdown.iter().map(|(_, n)| n).sum();

    for (method, count) in &breakdown {
        let share = if total > 0 { *count as f64 * 100.0 / total as f64 } else { 0.0 };
        tracing::info!(method = %method, count, share = %format!("{:.1}%", share), "Match method breakdown");
    }

    let duplicates = duplicate_matches(pool).await?;
    if duplicates.is_empty() {
        tracing::info!("No external id is shared by several catalog records");
    }
    for dup in &duplicates {
        tracing::info!(
            bgg_id = dup.bgg_id,
            title = dup.matched_title.as_deref().unwrap_or(""),
            records = dup.source_ids.len(),
            source_ids = %dup.source_ids.join(", "),
            "External id shared by several catalog records"
        );
    }

    Ok(())
}
