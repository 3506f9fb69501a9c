//! BoardGameGeek XML API2 client
//!
//! Search and detail requests share one token-bucket pacer, so consecutive
//! calls to the ranking API are spaced by `min_request_interval` regardless of
//! which stage issues them. HTTP statuses are classified into [`IngestError`]
//! kinds; retrying is left to the callers.
//!
//! API Documentation: https://boardgamegeek.com/wiki/page/BGG_XML_API2

use crate::error::{IngestError, IngestResult};
use crate::services::bgg_xml::{parse_search_response, parse_thing_response, SearchCandidate};
use async_trait::async_trait;
use bggfinna_common::config::EnrichmentConfig;
use bggfinna_common::models::{EnrichedGame, ExternalId};
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Outcome of one detail request
#[derive(Debug, Clone, PartialEq)]
pub enum ThingsResponse {
    /// Detail records for the ids the API knows; unknown ids are absent
    Ready(Vec<EnrichedGame>),
    /// Request queued server-side (HTTP 202); ask again later
    Pending,
}

/// External ranked game database
#[async_trait]
pub trait GameDatabase: Send + Sync {
    /// Free-text search restricted to board games, in relevance order
    async fn search(&self, query: &str) -> IngestResult<Vec<SearchCandidate>>;

    /// Detail records with statistics for a batch of ids
    async fn fetch_things(&self, ids: &[ExternalId]) -> IngestResult<ThingsResponse>;
}

type DirectLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// HTTP client for the BGG XML API
pub struct BggClient {
    client: Client,
    base_url: String,
    /// None when pacing is disabled (zero interval)
    rate_limiter: Option<DirectLimiter>,
}

impl BggClient {
    /// Build a client from the enrichment configuration
    pub fn from_config(config: &EnrichmentConfig) -> IngestResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent())
            .build()
            .map_err(|e| IngestError::Network(format!("Failed to build HTTP client: {}", e)))?;

        let rate_limiter = Quota::with_period(Duration::from_millis(config.min_request_interval_ms))
            .map(RateLimiter::direct);

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            rate_limiter,
        })
    }

    async fn pace(&self) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> IngestResult<(StatusCode, Option<Duration>, String)> {
        self.pace().await;

        let url = format!("{}/{}", self.base_url, path);
        tracing::debug!(url = %url, ?query, "Querying BGG API");

        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await?;

        Ok((status, retry_after, body))
    }
}

/// Map statuses shared by both endpoints to errors
fn check_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> IngestResult<()> {
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            Err(IngestError::RateLimited { retry_after })
        }
        StatusCode::NOT_FOUND => Err(IngestError::NotFound(truncate(body))),
        s if !s.is_success() => Err(IngestError::Api(s.as_u16(), truncate(body))),
        _ => Ok(()),
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(200).collect()
}

fn user_agent() -> String {
    format!("bggfinna/{}", env!("CARGO_PKG_VERSION"))
}

#[async_trait]
impl GameDatabase for BggClient {
    async fn search(&self, query: &str) -> IngestResult<Vec<SearchCandidate>> {
        let params = [("query", query.to_string()), ("type", "boardgame".to_string())];
        let (status, retry_after, body) = self.get("search", &params).await?;
        check_status(status, retry_after, &body)?;

        let candidates = parse_search_response(&body)?;
        tracing::debug!(query = %query, candidates = candidates.len(), "BGG search complete");
        Ok(candidates)
    }

    async fn fetch_things(&self, ids: &[ExternalId]) -> IngestResult<ThingsResponse> {
        let joined = ids.iter().map(ExternalId::to_string).collect::<Vec<_>>().join(",");
        let params = [("id", joined), ("stats", "1".to_string())];
        let (status, retry_after, body) = self.get("thing", &params).await?;

        if status == StatusCode::ACCEPTED {
            tracing::debug!(batch_size = ids.len(), "BGG detail request queued (202)");
            return Ok(ThingsResponse::Pending);
        }
        check_status(status, retry_after, &body)?;

        let games = parse_thing_response(&body, chrono::Utc::now())?;
        Ok(ThingsResponse::Ready(games))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(check_status(StatusCode::OK, None, "").is_ok());
        assert!(matches!(
            check_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(7)), ""),
            Err(IngestError::RateLimited { retry_after: Some(d) }) if d == Duration::from_secs(7)
        ));
        assert!(matches!(
            check_status(StatusCode::SERVICE_UNAVAILABLE, None, ""),
            Err(IngestError::RateLimited { retry_after: None })
        ));
        assert!(matches!(
            check_status(StatusCode::NOT_FOUND, None, "gone"),
            Err(IngestError::NotFound(_))
        ));
        assert!(matches!(
            check_status(StatusCode::BAD_GATEWAY, None, "oops"),
            Err(IngestError::Api(502, _))
        ));
    }

    #[test]
    fn test_client_builds_with_and_without_pacing() {
        let client = BggClient::from_config(&EnrichmentConfig::default()).unwrap();
        assert!(client.rate_limiter.is_some());
        assert_eq!(client.base_url, "https://boardgamegeek.com/xmlapi2");

        let unpaced = BggClient::from_config(&EnrichmentConfig {
            min_request_interval_ms: 0,
            base_url: "http://localhost:9/".to_string(),
            ..EnrichmentConfig::default()
        })
        .unwrap();
        assert!(unpaced.rate_limiter.is_none());
        assert_eq!(unpaced.base_url, "http://localhost:9");
    }
}
