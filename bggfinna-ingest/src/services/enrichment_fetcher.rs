//! Enrichment Fetcher Service
//!
//! Retrieves detail records for matched ids from the queue-based detail
//! endpoint. Ids are deduplicated once, sorted, and split into batches; every
//! batch runs its own small state machine:
//!
//! ```text
//! SUBMITTED ─┬─ READY ──────────── terminal (omitted ids → NOT_FOUND)
//!            ├─ NOT_FOUND ──────── terminal (whole batch omitted)
//!            ├─ PENDING ──────┐
//!            └─ RATE_LIMITED ─┴─ backoff → SUBMITTED, or TIMED_OUT when
//!                                the attempt/wait budget is spent
//! ```
//!
//! Network errors are retried like PENDING. A malformed response or an
//! unexpected HTTP status aborts the stage.

use crate::error::{IngestError, IngestResult};
use crate::services::bgg_client::{GameDatabase, ThingsResponse};
use crate::utils::backoff::{BackoffPolicy, RetryBudget, Sleeper};
use crate::workflow::statistics::EnrichmentStats;
use bggfinna_common::models::{EnrichedGame, ExternalId, MatchResult};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Per-batch retrieval state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Submitted,
    Pending,
    RateLimited,
    Ready,
    NotFound,
    TimedOut,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchState::Ready | BatchState::NotFound | BatchState::TimedOut)
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchState::Submitted => "SUBMITTED",
            BatchState::Pending => "PENDING",
            BatchState::RateLimited => "RATE_LIMITED",
            BatchState::Ready => "READY",
            BatchState::NotFound => "NOT_FOUND",
            BatchState::TimedOut => "TIMED_OUT",
        };
        f.write_str(name)
    }
}

/// Why an id produced no enriched game
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OmissionReason {
    NotFound,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Omission {
    pub external_id: ExternalId,
    pub reason: OmissionReason,
}

/// Terminal result of one batch
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub state: BatchState,
    pub games: Vec<EnrichedGame>,
    pub omissions: Vec<Omission>,
    pub attempts: u32,
    pub waited: Duration,
}

/// Result of the whole enrichment stage
#[derive(Debug, Clone, Default)]
pub struct EnrichmentOutcome {
    /// One game per enriched id, ascending by id
    pub games: Vec<EnrichedGame>,
    pub omissions: Vec<Omission>,
    pub stats: EnrichmentStats,
}

/// Distinct matched ids from the match results
pub fn distinct_ids(results: &[MatchResult]) -> BTreeSet<ExternalId> {
    results.iter().filter_map(|r| r.external_id).collect()
}

/// Batched detail retrieval with bounded retries
pub struct EnrichmentFetcher {
    database: Arc<dyn GameDatabase>,
    sleeper: Arc<dyn Sleeper>,
    policy: BackoffPolicy,
    max_batch_size: usize,
}

impl EnrichmentFetcher {
    pub fn new(
        database: Arc<dyn GameDatabase>,
        sleeper: Arc<dyn Sleeper>,
        policy: BackoffPolicy,
        max_batch_size: usize,
    ) -> Self {
        Self {
            database,
            sleeper,
            policy,
            max_batch_size: max_batch_size.max(1),
        }
    }

    /// Fetch every id once, batch by batch
    pub async fn fetch_all(&self, ids: &BTreeSet<ExternalId>) -> IngestResult<EnrichmentOutcome> {
        let ordered: Vec<ExternalId> = ids.iter().copied().collect();
        let mut outcome = EnrichmentOutcome {
            stats: EnrichmentStats {
                requested_ids: ordered.len(),
                ..EnrichmentStats::default()
            },
            ..EnrichmentOutcome::default()
        };

        let batch_count = ordered.len().div_ceil(self.max_batch_size);
        tracing::info!(
            ids = ordered.len(),
            batches = batch_count,
            max_batch_size = self.max_batch_size,
            "Starting enrichment"
        );

        for (index, batch) in ordered.chunks(self.max_batch_size).enumerate() {
            let batch_no = index + 1;
            let result = self.fetch_batch(batch_no, batch).await?;

            outcome.stats.batches += 1;
            outcome.stats.retries += result.attempts.saturating_sub(1) as usize;
            if result.state == BatchState::TimedOut {
                outcome.stats.timed_out_batches += 1;
            }

            for omission in &result.omissions {
                match omission.reason {
                    OmissionReason::NotFound => outcome.stats.not_found += 1,
                    OmissionReason::TimedOut => outcome.stats.timed_out += 1,
                }
            }

            outcome.stats.enriched += result.games.len();
            outcome.games.extend(result.games);
            outcome.omissions.extend(result.omissions);

            tracing::info!(
                batch = batch_no,
                of = batch_count,
                state = %result.state,
                attempts = result.attempts,
                "Batch finished"
            );
        }

        outcome.games.sort_by_key(|g| g.external_id);
        Ok(outcome)
    }

    /// Drive one batch to a terminal state
    pub async fn fetch_batch(&self, batch_no: usize, ids: &[ExternalId]) -> IngestResult<BatchOutcome> {
        let mut budget = RetryBudget::new(self.policy.clone());
        let mut state = BatchState::Submitted;

        loop {
            budget.record_attempt();
            tracing::debug!(batch = batch_no, attempt = budget.attempts(), from = %state, "Batch submitted");

            let extra = match self.database.fetch_things(ids).await {
                Ok(ThingsResponse::Ready(games)) => {
                    return Ok(self.ready(batch_no, ids, games, &budget));
                }
                Ok(ThingsResponse::Pending) => {
                    state = BatchState::Pending;
                    Duration::ZERO
                }
                Err(IngestError::NotFound(_)) => {
                    tracing::warn!(batch = batch_no, ids = ?ids, "Whole batch not found");
                    return Ok(BatchOutcome {
                        state: BatchState::NotFound,
                        games: Vec::new(),
                        omissions: omit(ids, OmissionReason::NotFound),
                        attempts: budget.attempts(),
                        waited: budget.waited(),
                    });
                }
                Err(IngestError::RateLimited { retry_after }) => {
                    state = BatchState::RateLimited;
                    retry_after.unwrap_or_else(|| budget.rate_limit_delay())
                }
                Err(IngestError::Network(msg)) => {
                    tracing::warn!(batch = batch_no, error = %msg, "Network error, retrying batch");
                    state = BatchState::Pending;
                    Duration::ZERO
                }
                Err(e) => return Err(e),
            };

            match budget.next_delay(extra) {
                Some(delay) => {
                    tracing::debug!(
                        batch = batch_no,
                        state = %state,
                        delay_ms = delay.as_millis() as u64,
                        "Backing off before resubmitting"
                    );
                    self.sleeper.sleep(delay).await;
                    state = BatchState::Submitted;
                }
                None => {
                    tracing::warn!(
                        batch = batch_no,
                        last_state = %state,
                        attempts = budget.attempts(),
                        waited_ms = budget.waited().as_millis() as u64,
                        ids = ?ids,
                        "Batch timed out, ids omitted"
                    );
                    return Ok(BatchOutcome {
                        state: BatchState::TimedOut,
                        games: Vec::new(),
                        omissions: omit(ids, OmissionReason::TimedOut),
                        attempts: budget.attempts(),
                        waited: budget.waited(),
                    });
                }
            }
        }
    }

    fn ready(&self, batch_no: usize, ids: &[ExternalId], games: Vec<EnrichedGame>, budget: &RetryBudget) -> BatchOutcome {
        let requested: HashSet<ExternalId> = ids.iter().copied().collect();
        let mut returned: HashSet<ExternalId> = HashSet::new();

        // Keep only requested ids, first occurrence wins
        let games: Vec<EnrichedGame> = games
            .into_iter()
            .filter(|g| requested.contains(&g.external_id) && returned.insert(g.external_id))
            .collect();

        let omissions: Vec<Omission> = ids
            .iter()
            .filter(|id| !returned.contains(*id))
            .map(|&external_id| Omission {
                external_id,
                reason: OmissionReason::NotFound,
            })
            .collect();

        if !omissions.is_empty() {
            tracing::warn!(
                batch = batch_no,
                missing = ?omissions.iter().map(|o| o.external_id.0).collect::<Vec<_>>(),
                "Ids absent from detail response"
            );
        }

        BatchOutcome {
            state: BatchState::Ready,
            games,
            omissions,
            attempts: budget.attempts(),
            waited: budget.waited(),
        }
    }
}

fn omit(ids: &[ExternalId], reason: OmissionReason) -> Vec<Omission> {
    ids.iter()
        .map(|&external_id| Omission { external_id, reason })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bggfinna_common::models::MatchMethod;

    #[test]
    fn test_distinct_ids_deduplicates_and_sorts() {
        let results = vec![
            MatchResult::matched("a", ExternalId(13), MatchMethod::Exact, 1.0, "CATAN"),
            MatchResult::unmatched("b"),
            MatchResult::matched("c", ExternalId(9), MatchMethod::Fuzzy, 0.9, "X"),
            MatchResult::matched("d", ExternalId(13), MatchMethod::Exact, 1.0, "CATAN"),
        ];
        let ids: Vec<u64> = distinct_ids(&results).into_iter().map(|id| id.0).collect();
        assert_eq!(ids, vec![9, 13]);
    }

    #[test]
    fn test_terminal_states() {
        assert!(BatchState::Ready.is_terminal());
        assert!(BatchState::NotFound.is_terminal());
        assert!(BatchState::TimedOut.is_terminal());
        assert!(!BatchState::Pending.is_terminal());
        assert!(!BatchState::RateLimited.is_terminal());
        assert_eq!(BatchState::TimedOut.to_string(), "TIMED_OUT");
    }
}
