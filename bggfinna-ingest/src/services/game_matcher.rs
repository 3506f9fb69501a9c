//! Game Matcher Service
//!
//! Resolves each catalog record to at most one ranking-database id.
//!
//! **Algorithm:**
//! 1. Normalize the primary and alternative titles
//! 2. Search with the primary title, then each further distinct alternative,
//!    stopping once an exact-tier candidate exists
//! 3. Merge candidates (first occurrence of an id wins) and score them:
//!    exact normalized equality outranks fuzzy similarity
//! 4. Rank by tier, similarity (three decimals), year distance, search order
//! 5. Accept the top candidate if its similarity clears the threshold

use crate::error::{IngestError, IngestResult};
use crate::services::bgg_client::GameDatabase;
use crate::services::bgg_xml::SearchCandidate;
use crate::services::title_normalizer::{contains_word_run, normalize_title, word_count};
use crate::utils::backoff::{BackoffPolicy, RetryBudget, Sleeper};
use crate::workflow::statistics::MatchingStats;
use bggfinna_common::config::MatcherConfig;
use bggfinna_common::models::{CatalogRecord, ExternalId, MatchMethod, MatchResult};
use std::collections::HashSet;
use std::sync::Arc;

/// Match strength; lower sorts first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchTier {
    Exact,
    Fuzzy,
}

/// Candidate with its best score against the catalog titles
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: SearchCandidate,
    pub tier: MatchTier,
    /// 1.0 for exact; Jaro-Winkler for fuzzy
    pub similarity: f64,
    /// Candidate name that produced the score
    pub matched_name: String,
    /// Position in the merged search results
    pub search_order: usize,
}

/// Score one candidate against the normalized catalog titles
///
/// Returns None when the candidate is neither an exact nor a fuzzy match.
/// Fuzzy matching only considers multi-word catalog titles; a candidate name
/// qualifies when it contains the title as a word run or is Jaro-Winkler
/// similar at or above `threshold`.
pub fn score_candidate(
    candidate: &SearchCandidate,
    catalog_titles: &[String],
    threshold: f64,
    search_order: usize,
) -> Option<ScoredCandidate> {
    let mut best: Option<(MatchTier, f64, &str)> = None;

    for name in &candidate.names {
        let normalized = normalize_title(name);
        if normalized.is_empty() {
            continue;
        }

        for title in catalog_titles {
            let scored = if normalized == *title {
                Some((MatchTier::Exact, 1.0))
            } else if word_count(title) > 1 {
                let similarity = strsim::jaro_winkler(title, &normalized);
                if contains_word_run(&normalized, title) || similarity >= threshold {
                    Some((MatchTier::Fuzzy, similarity))
                } else {
                    None
                }
            } else {
                None
            };

            if let Some((tier, similarity)) = scored {
                let better = match best {
                    None => true,
                    Some((best_tier, best_similarity, _)) => {
                        tier < best_tier || (tier == best_tier && similarity > best_similarity)
                    }
                };
                if better {
                    best = Some((tier, similarity, name.as_str()));
                }
            }
        }
    }

    best.map(|(tier, similarity, name)| ScoredCandidate {
        candidate: candidate.clone(),
        tier,
        similarity,
        matched_name: name.to_string(),
        search_order,
    })
}

fn quantized(similarity: f64) -> i64 {
    (similarity * 1000.0).round() as i64
}

/// Year distance key; a missing candidate year sorts after every present one
fn year_key(candidate_year: Option<i32>, catalog_year: Option<i32>) -> (u8, i32) {
    match (catalog_year, candidate_year) {
        (Some(catalog), Some(year)) => (0, (year - catalog).abs()),
        (Some(_), None) => (1, 0),
        // No catalog year: no preference
        (None, _) => (0, 0),
    }
}

/// Order candidates best first
pub fn rank_candidates(candidates: &mut [ScoredCandidate], catalog_year: Option<i32>) {
    candidates.sort_by(|a, b| {
        a.tier
            .cmp(&b.tier)
            .then_with(|| quantized(b.similarity).cmp(&quantized(a.similarity)))
            .then_with(|| {
                year_key(a.candidate.publication_year, catalog_year)
                    .cmp(&year_key(b.candidate.publication_year, catalog_year))
            })
            .then_with(|| a.search_order.cmp(&b.search_order))
    });
}

/// Distinct non-empty normalized titles, primary first
pub fn query_titles(record: &CatalogRecord) -> Vec<String> {
    let mut seen = HashSet::new();
    record
        .all_titles()
        .into_iter()
        .map(normalize_title)
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

/// Title matcher backed by a ranking-database search
pub struct GameMatcher {
    database: Arc<dyn GameDatabase>,
    sleeper: Arc<dyn Sleeper>,
    acceptance_threshold: f64,
    search_policy: BackoffPolicy,
}

impl GameMatcher {
    pub fn new(
        database: Arc<dyn GameDatabase>,
        sleeper: Arc<dyn Sleeper>,
        config: &MatcherConfig,
        search_policy: BackoffPolicy,
    ) -> Self {
        Self {
            database,
            sleeper,
            acceptance_threshold: config.acceptance_threshold.clamp(0.0, 1.0),
            search_policy,
        }
    }

    /// Search, retrying rate-limit signals within the search budget
    async fn search_with_retry(&self, query: &str) -> IngestResult<Vec<SearchCandidate>> {
        let mut budget = RetryBudget::new(self.search_policy.clone());

        loop {
            budget.record_attempt();
            match self.database.search(query).await {
                Ok(candidates) => return Ok(candidates),
                Err(IngestError::RateLimited { retry_after }) => {
                    let extra = retry_after.unwrap_or_else(|| budget.rate_limit_delay());
                    let delay = budget.next_delay(extra).ok_or_else(|| {
                        IngestError::RetryBudgetExceeded(format!(
                            "search '{}' still rate limited after {} attempts",
                            query,
                            budget.attempts()
                        ))
                    })?;
                    tracing::warn!(
                        query = %query,
                        attempt = budget.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "Search rate limited, backing off"
                    );
                    self.sleeper.sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Resolve one catalog record
    ///
    /// # Errors
    /// Propagates every client error, including `MalformedResponse`;
    /// [`match_all`](Self::match_all) degrades that one to "unmatched".
    pub async fn match_record(&self, record: &CatalogRecord) -> IngestResult<MatchResult> {
        let titles = query_titles(record);
        let catalog_year = record.catalog_year();

        let mut seen_ids: HashSet<ExternalId> = HashSet::new();
        let mut scored: Vec<ScoredCandidate> = Vec::new();
        let mut order = 0usize;

        for query in &titles {
            tracing::debug!(source_id = %record.source_id, query = %query, "Searching ranking database");

            for candidate in self.search_with_retry(query).await? {
                if !seen_ids.insert(candidate.external_id) {
                    continue;
                }
                if let Some(s) = score_candidate(&candidate, &titles, self.acceptance_threshold, order) {
                    scored.push(s);
                }
                order += 1;
            }

            if scored.iter().any(|s| s.tier == MatchTier::Exact) {
                break;
            }
        }

        rank_candidates(&mut scored, catalog_year);

        let result = match scored.first() {
            Some(best) if best.similarity >= self.acceptance_threshold => {
                let (method, confidence) = match best.tier {
                    MatchTier::Exact => (MatchMethod::Exact, 1.0),
                    MatchTier::Fuzzy => (MatchMethod::Fuzzy, best.similarity),
                };
                MatchResult::matched(
                    record.source_id.clone(),
                    best.candidate.external_id,
                    method,
                    confidence,
                    best.matched_name.clone(),
                )
            }
            _ => MatchResult::unmatched(record.source_id.clone()),
        };

        tracing::debug!(
            source_id = %record.source_id,
            method = %result.method,
            external_id = ?result.external_id,
            confidence = result.confidence,
            candidates = scored.len(),
            "Match decided"
        );

        Ok(result)
    }

    /// Resolve every record in order
    ///
    /// A malformed search response degrades its record to "unmatched" and is
    /// counted; any other error aborts.
    pub async fn match_all(&self, records: &[CatalogRecord]) -> IngestResult<(Vec<MatchResult>, MatchingStats)> {
        let mut stats = MatchingStats {
            records: records.len(),
            ..MatchingStats::default()
        };
        let mut results = Vec::with_capacity(records.len());

        for (index, record) in records.iter().enumerate() {
            let result = match self.match_record(record).await {
                Ok(result) => result,
                Err(IngestError::MalformedResponse(msg)) => {
                    tracing::warn!(
                        source_id = %record.source_id,
                        error = %msg,
                        "Malformed search response, record left unmatched"
                    );
                    stats.malformed_responses += 1;
                    MatchResult::unmatched(record.source_id.clone())
                }
                Err(e) => {
                    tracing::error!(source_id = %record.source_id, error = %e, "Matching aborted");
                    return Err(e);
                }
            };

            stats.record(result.method);
            results.push(result);

            if (index + 1) % 25 == 0 {
                tracing::info!(processed = index + 1, total = records.len(), "Matching progress");
            }
        }

        Ok((results, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|t| normalize_title(t)).collect()
    }

    #[test]
    fn test_exact_outranks_fuzzy() {
        let catalog = titles(&["Ticket to Ride"]);
        let exact = SearchCandidate::new(ExternalId(9209), "Ticket to Ride", Some(2004));
        let fuzzy = SearchCandidate::new(ExternalId(14996), "Ticket to Ride: Europe", Some(2005));

        let mut scored = vec![
            score_candidate(&fuzzy, &catalog, 0.85, 0).unwrap(),
            score_candidate(&exact, &catalog, 0.85, 1).unwrap(),
        ];
        rank_candidates(&mut scored, None);

        assert_eq!(scored[0].candidate.external_id, ExternalId(9209));
        assert_eq!(scored[0].tier, MatchTier::Exact);
        assert_eq!(scored[1].tier, MatchTier::Fuzzy);
    }

    #[test]
    fn test_base_game_outranks_longer_expansion() {
        let catalog = titles(&["Star Realms Deckbuilding"]);
        let expansion = SearchCandidate::new(
            ExternalId(182631),
            "Star Realms: Deckbuilding Game - Colony Wars Expansion",
            Some(2015),
        );
        let base = SearchCandidate::new(ExternalId(147020), "Star Realms: Deckbuilding Game", Some(2014));

        let mut scored = vec![
            score_candidate(&expansion, &catalog, 0.85, 0).unwrap(),
            score_candidate(&base, &catalog, 0.85, 1).unwrap(),
        ];
        rank_candidates(&mut scored, None);

        assert_eq!(scored[0].candidate.external_id, ExternalId(147020));
        assert!(scored[0].similarity > scored[1].similarity);
    }

    #[test]
    fn test_single_word_titles_never_fuzzy() {
        let catalog = titles(&["Catan"]);
        let near = SearchCandidate::new(ExternalId(1), "Catan Junior", Some(2011));
        assert!(score_candidate(&near, &catalog, 0.85, 0).is_none());
    }

    #[test]
    fn test_alternate_candidate_name_counts() {
        let catalog = titles(&["Carcassonne : lautapeli"]);
        let candidate = SearchCandidate::new(ExternalId(822), "Carcassonne: The City", None)
            .with_name("Carcassonne");
        let scored = score_candidate(&candidate, &catalog, 0.85, 0).unwrap();
        assert_eq!(scored.tier, MatchTier::Exact);
        assert_eq!(scored.matched_name, "Carcassonne");
    }

    #[test]
    fn test_year_tie_break_prefers_closest_present_year() {
        let catalog = titles(&["Alias"]);
        let mut scored = vec![
            score_candidate(&SearchCandidate::new(ExternalId(1), "Alias", None), &catalog, 0.85, 0).unwrap(),
            score_candidate(&SearchCandidate::new(ExternalId(2), "Alias", Some(1990)), &catalog, 0.85, 1).unwrap(),
            score_candidate(&SearchCandidate::new(ExternalId(3), "Alias", Some(2012)), &catalog, 0.85, 2).unwrap(),
        ];
        rank_candidates(&mut scored, Some(2015));

        let order: Vec<u64> = scored.iter().map(|s| s.candidate.external_id.0).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn test_search_order_breaks_remaining_ties() {
        let catalog = titles(&["Alias"]);
        let mut scored = vec![
            score_candidate(&SearchCandidate::new(ExternalId(7), "Alias", None), &catalog, 0.85, 1).unwrap(),
            score_candidate(&SearchCandidate::new(ExternalId(5), "Alias", None), &catalog, 0.85, 0).unwrap(),
        ];
        rank_candidates(&mut scored, None);
        assert_eq!(scored[0].candidate.external_id, ExternalId(5));
    }

    #[test]
    fn test_query_titles_distinct_and_ordered() {
        let mut record = CatalogRecord::new("keski.1", "Catan : lautapeli");
        record.metadata.alternative_titles = vec![
            "Catan".to_string(),
            "Settlers of Catan".to_string(),
            "".to_string(),
        ];
        assert_eq!(query_titles(&record), vec!["catan", "settlers of catan"]);
    }
}
