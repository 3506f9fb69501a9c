//! Finna library catalog client
//!
//! Pages through the Finna search API for board games held in one building
//! (holding location) and converts each hit into a [`CatalogRecord`].
//!
//! API Documentation: https://api.finna.fi/

use crate::error::{IngestError, IngestResult};
use async_trait::async_trait;
use bggfinna_common::config::CatalogConfig;
use bggfinna_common::models::{CatalogMetadata, CatalogRecord};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const BOARD_GAME_FORMAT_FILTER: &str = "~format:\"1/Game/BoardGame/\"";
const MAX_PAGE_SIZE: usize = 100;

const RECORD_FIELDS: &[&str] = &[
    "id",
    "title",
    "alternativeTitles",
    "year",
    "publicationDates",
    "languages",
    "authors",
    "publishers",
    "buildings",
];

/// Source of raw library holdings
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch catalog records in feed order, at most `limit` when given
    async fn fetch_records(&self, limit: Option<usize>) -> IngestResult<Vec<CatalogRecord>>;
}

#[derive(Debug, Deserialize)]
struct FinnaSearchResponse {
    status: String,
    #[serde(rename = "resultCount", default)]
    result_count: usize,
    #[serde(default)]
    records: Vec<FinnaRecord>,
    #[serde(rename = "statusMessage", default)]
    status_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FinnaRecord {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(rename = "alternativeTitles", default)]
    alternative_titles: Vec<String>,
    #[serde(default)]
    year: Option<String>,
    #[serde(rename = "publicationDates", default)]
    publication_dates: Vec<String>,
    #[serde(default)]
    languages: Vec<String>,
    /// `{primary: {name: {...}}, secondary: ..., corporate: ...}`; empty groups come as `[]`
    #[serde(default)]
    authors: Value,
    #[serde(default)]
    publishers: Vec<String>,
    #[serde(default)]
    buildings: Vec<FinnaBuilding>,
}

#[derive(Debug, Deserialize)]
struct FinnaBuilding {
    value: String,
}

impl From<FinnaRecord> for CatalogRecord {
    fn from(record: FinnaRecord) -> Self {
        CatalogRecord {
            source_id: record.id,
            title: record.title.trim().to_string(),
            metadata: CatalogMetadata {
                alternative_titles: record.alternative_titles,
                year: record.year.filter(|y| !y.trim().is_empty()),
                publication_dates: record.publication_dates,
                languages: record.languages,
                authors: author_names(&record.authors),
                publishers: record.publishers,
                buildings: record.buildings.into_iter().map(|b| b.value).collect(),
            },
        }
    }
}

/// Flatten the author groups into names, primary authors first
fn author_names(authors: &Value) -> Vec<String> {
    let mut names = Vec::new();
    for group in ["primary", "secondary", "corporate"] {
        if let Some(Value::Object(map)) = authors.get(group) {
            for name in map.keys() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
    }
    names
}

/// HTTP client for the Finna search API
pub struct FinnaClient {
    client: Client,
    search_url: String,
    building: String,
    lookfor: String,
    page_size: usize,
}

impl FinnaClient {
    pub fn from_config(config: &CatalogConfig) -> IngestResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(format!("bggfinna/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            search_url: format!("{}/search", config.base_url.trim_end_matches('/')),
            building: config.building.clone(),
            lookfor: config.lookfor.clone(),
            page_size: config.page_size.clamp(1, MAX_PAGE_SIZE),
        })
    }

    fn page_query(&self, page: usize, limit: usize) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("lookfor", self.lookfor.clone()),
            ("filter[]", format!("building:\"{}\"", self.building)),
            ("filter[]", BOARD_GAME_FORMAT_FILTER.to_string()),
            ("limit", limit.to_string()),
            ("page", page.to_string()),
        ];
        query.extend(RECORD_FIELDS.iter().map(|f| ("field[]", f.to_string())));
        query
    }

    async fn fetch_page(&self, page: usize, limit: usize) -> IngestResult<FinnaSearchResponse> {
        let response = self
            .client
            .get(&self.search_url)
            .query(&self.page_query(page, limit))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::Api(status.as_u16(), body.chars().take(200).collect()));
        }

        let body = response.text().await?;
        let parsed: FinnaSearchResponse = serde_json::from_str(&body)
            .map_err(|e| IngestError::MalformedResponse(format!("Finna search: {}", e)))?;

        if parsed.status != "OK" {
            return Err(IngestError::MalformedResponse(format!(
                "Finna status {}: {}",
                parsed.status,
                parsed.status_message.as_deref().unwrap_or("no message")
            )));
        }

        Ok(parsed)
    }
}

#[async_trait]
impl CatalogSource for FinnaClient {
    async fn fetch_records(&self, limit: Option<usize>) -> IngestResult<Vec<CatalogRecord>> {
        let mut records: Vec<CatalogRecord> = Vec::new();
        let mut page = 1;

        loop {
            let wanted = match limit {
                Some(max) if records.len() >= max => break,
                Some(max) => (max - records.len()).min(self.page_size),
                None => self.page_size,
            };

            let response = self.fetch_page(page, self.page_size).await?;
            let received = response.records.len();
            records.extend(response.records.into_iter().take(wanted).map(CatalogRecord::from));

            tracing::info!(
                page,
                received,
                total = records.len(),
                result_count = response.result_count,
                "Fetched catalog page"
            );

            if received < self.page_size || records.len() >= response.result_count {
                break;
            }
            page += 1;
        }

        Ok(records)
    }
}
