//! Bibliographic-metadata fetcher.
//!
//! Queries the bibliographic REST API for all works matching an affiliation
//! within a publication-year range, walking the cursor-paged result set.
//! Items are passed through as raw blobs; the normalizer owns their shape.

use crate::error::{AcadError, Result};
use crate::normalize::RawRecord;
use crate::publication::Provider;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bibliographic API works endpoint
const BIBLIO_API_URL: &str = "https://api.crossref.org/works";

/// Polite pool email for the API
const MAILTO: &str = "acadmetrics@example.edu";

/// Rows per cursor page (API maximum is 1000; 100 keeps responses small)
const PAGE_ROWS: u32 = 100;

/// Hard cap on cursor pages per fetch
const MAX_PAGES: u32 = 50;

/// Bibliographic API client with bounded retries and polite pacing.
pub struct BiblioClient {
    client: reqwest::Client,
    max_retries: u32,
}

impl BiblioClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("acadmetrics/0.1 (mailto:{})", MAILTO))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AcadError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: 3,
        })
    }

    /// Fetch every work for an affiliation within the inclusive year range.
    ///
    /// A page that keeps failing after retries fails the fetch; the caller
    /// decides whether the other provider's stream still makes the run useful.
    pub async fn fetch_works(
        &self,
        affiliation: &str,
        year_lo: i32,
        year_hi: i32,
    ) -> Result<Vec<RawRecord>> {
        info!(
            affiliation,
            year_lo, year_hi, "Starting bibliographic works fetch"
        );

        let mut cursor = "*".to_string();
        let mut all_records = Vec::new();

        for page in 0..MAX_PAGES {
            let works_page = self
                .fetch_page_with_retry(affiliation, year_lo, year_hi, &cursor)
                .await?;

            let count = works_page.items.len();
            debug!(page, count, "Fetched works page");
            all_records.extend(works_page.items.into_iter().map(to_raw_record));

            match works_page.next_cursor {
                Some(next) if count > 0 => cursor = next,
                _ => break,
            }

            // Polite pacing between cursor pages
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        info!(total = all_records.len(), "Bibliographic fetch complete");
        Ok(all_records)
    }

    /// Fetch one cursor page with exponential backoff on rate limits.
    async fn fetch_page_with_retry(
        &self,
        affiliation: &str,
        year_lo: i32,
        year_hi: i32,
        cursor: &str,
    ) -> Result<WorksPage> {
        let mut backoff = Duration::from_millis(500);

        for attempt in 0..self.max_retries {
            match self.do_fetch(affiliation, year_lo, year_hi, cursor).await {
                Ok(page) => return Ok(page),
                Err(AcadError::RateLimited(secs)) => {
                    let wait = Duration::from_secs(secs).max(backoff);
                    warn!(
                        attempt = attempt + 1,
                        wait_secs = wait.as_secs(),
                        "Rate limited, waiting"
                    );
                    tokio::time::sleep(wait).await;
                    backoff *= 2;
                }
                Err(e) if attempt + 1 < self.max_retries => {
                    debug!(attempt = attempt + 1, error = %e, "Page fetch failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }

        Err(AcadError::Api {
            code: 0,
            message: "bibliographic page fetch exhausted retries".to_string(),
        })
    }

    async fn do_fetch(
        &self,
        affiliation: &str,
        year_lo: i32,
        year_hi: i32,
        cursor: &str,
    ) -> Result<WorksPage> {
        let filter = build_year_filter(year_lo, year_hi);
        let rows = PAGE_ROWS.to_string();
        let response = self
            .client
            .get(BIBLIO_API_URL)
            .query(&[
                ("query.affiliation", affiliation),
                ("filter", filter.as_str()),
                ("rows", rows.as_str()),
                ("cursor", cursor),
                ("select", "DOI,title,author,container-title,published,is-referenced-by-count,abstract"),
                ("mailto", MAILTO),
            ])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AcadError::RateLimited(5));
        }

        if !response.status().is_success() {
            return Err(AcadError::Api {
                code: response.status().as_u16() as i32,
                message: format!("Bibliographic API error: {}", response.status()),
            });
        }

        let data: WorksResponse = response.json().await?;
        Ok(WorksPage {
            items: data.message.items,
            next_cursor: data.message.next_cursor,
        })
    }
}

/// Publication-date filter expression for the works endpoint.
fn build_year_filter(year_lo: i32, year_hi: i32) -> String {
    format!(
        "from-pub-date:{}-01-01,until-pub-date:{}-12-31",
        year_lo, year_hi
    )
}

/// Wrap one works item as a raw record. The DOI is the raw id; items without
/// one get a stable content-derived id so re-fetches stay idempotent.
fn to_raw_record(item: Value) -> RawRecord {
    let raw_id = item
        .get("DOI")
        .and_then(Value::as_str)
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| {
            let mut hasher = Sha256::new();
            hasher.update(item.to_string().as_bytes());
            format!("bib-{}", &hex::encode(hasher.finalize())[..12])
        });
    RawRecord::new(Provider::Bibliographic, raw_id, item)
}

struct WorksPage {
    items: Vec<Value>,
    next_cursor: Option<String>,
}

// === Works API Response Types ===

#[derive(Debug, Deserialize)]
struct WorksResponse {
    message: WorksMessage,
}

#[derive(Debug, Deserialize)]
struct WorksMessage {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(rename = "next-cursor", default)]
    next_cursor: Option<String>,
}
