//! Citation-index fetcher.
//!
//! Fetches search result pages from the citation-index service over plain HTTP
//! and extracts raw records with CSS selectors. The service rate-limits
//! aggressively, so requests carry browser-like headers and a randomized
//! delay between pages. CAPTCHA interstitials abort the fetch.

use crate::error::{AcadError, Result};
use crate::normalize::RawRecord;
use crate::publication::Provider;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

/// Default citation-index URL
pub const DEFAULT_INDEX_URL: &str = "https://scholar.google.com";

/// User agent string for requests
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Search options for the citation index.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Proxy URL (e.g., "http://127.0.0.1:7890")
    pub proxy: Option<String>,
    /// Page numbers to fetch (1-indexed)
    pub pages: Vec<i32>,
    /// Results from this year onwards
    pub year_lo: Option<i32>,
    /// Custom base URL for mirror sites
    pub base_url: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            proxy: None,
            pages: vec![1],
            year_lo: None,
            base_url: None,
        }
    }
}

/// Query the citation index and return raw records.
///
/// Pages that fail to fetch are logged and skipped; a CAPTCHA interstitial
/// aborts the whole fetch since every subsequent page would hit it too.
pub async fn fetch_records(search_str: &str, options: &SearchOptions) -> Result<Vec<RawRecord>> {
    let index_url = options
        .base_url
        .as_ref()
        .map(|s| s.trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_INDEX_URL.to_string());

    info!(
        query = search_str,
        url = %index_url,
        pages = ?options.pages,
        "Starting citation-index query"
    );

    let client = build_http_client(options.proxy.as_deref())?;
    let mut all_records = Vec::new();

    for page_num in &options.pages {
        let start = (page_num - 1) * 10;
        let url = build_search_url(&index_url, search_str, start, options.year_lo)?;

        debug!(page = page_num, url = %url, "Fetching page");

        // Randomized delay to stay under the rate limiter
        let delay = rand::random::<u64>() % 1500 + 500;
        tokio::time::sleep(Duration::from_millis(delay)).await;

        match fetch_page(&client, &url).await {
            Ok(html) => {
                if html.contains("Solving the above CAPTCHA") || html.contains("unusual traffic") {
                    warn!(page = page_num, "CAPTCHA detected");
                    return Err(AcadError::RateLimited(300));
                }

                let page_records = parse_result_items(&html)?;
                info!(page = page_num, count = page_records.len(), "Parsed results");
                all_records.extend(page_records);
            }
            Err(e) => {
                error!(page = page_num, error = %e, "Failed to fetch page");
                // Continue with other pages instead of failing completely
            }
        }
    }

    info!(total = all_records.len(), "Citation-index query complete");
    Ok(all_records)
}

/// Build HTTP client with optional proxy
fn build_http_client(proxy: Option<&str>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(30));

    if let Some(proxy_url) = proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| AcadError::Config(format!("Invalid proxy URL '{}': {}", proxy_url, e)))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| AcadError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Build a citation-index search URL
fn build_search_url(
    base_url: &str,
    query: &str,
    start: i32,
    year_lo: Option<i32>,
) -> Result<Url> {
    let mut url = Url::parse(&format!("{}/scholar", base_url))
        .map_err(|e| AcadError::Config(format!("Invalid base URL: {}", e)))?;

    {
        let mut params = url.query_pairs_mut();
        params.append_pair("q", query);
        params.append_pair("hl", "en-US"); // Force English locale for consistent parsing
        params.append_pair("start", &start.to_string());
        params.append_pair("as_sdt", "0,5"); // Articles only, no books
        if let Some(year) = year_lo {
            params.append_pair("as_ylo", &year.to_string());
        }
    }

    Ok(url)
}

async fn fetch_page(client: &reqwest::Client, url: &Url) -> Result<String> {
    let response = client
        .get(url.as_str())
        .header(
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        )
        .header("Accept-Language", "en-US,en;q=0.9")
        .header("Upgrade-Insecure-Requests", "1")
        .send()
        .await?;

    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(AcadError::RateLimited(60));
    }

    if !status.is_success() {
        return Err(AcadError::Api {
            code: status.as_u16() as i32,
            message: format!("HTTP error: {}", status),
        });
    }

    response.text().await.map_err(AcadError::Network)
}

/// Parse a search result page into raw records.
///
/// Field extraction stays shallow on purpose: the blob carries the scraped
/// strings as-is and the normalizer owns all interpretation.
pub fn parse_result_items(html: &str) -> Result<Vec<RawRecord>> {
    let document = Html::parse_document(html);

    let item_selector =
        Selector::parse("div.gs_r.gs_or.gs_scl").map_err(|e| AcadError::Parse(e.to_string()))?;
    let title_selector =
        Selector::parse("h3.gs_rt").map_err(|e| AcadError::Parse(e.to_string()))?;
    let link_selector =
        Selector::parse("h3.gs_rt a").map_err(|e| AcadError::Parse(e.to_string()))?;
    let meta_selector =
        Selector::parse("div.gs_a").map_err(|e| AcadError::Parse(e.to_string()))?;
    let snippet_selector =
        Selector::parse("div.gs_rs").map_err(|e| AcadError::Parse(e.to_string()))?;
    let cite_selector =
        Selector::parse("div.gs_fl a").map_err(|e| AcadError::Parse(e.to_string()))?;

    let year_regex =
        Regex::new(r"\b(19|20)\d{2}\b").map_err(|e| AcadError::Parse(e.to_string()))?;
    let cite_regex =
        Regex::new(r"Cited by\s*(\d+)").map_err(|e| AcadError::Parse(e.to_string()))?;

    let mut records = Vec::new();

    for item in document.select(&item_selector) {
        let mut title = String::new();
        if let Some(title_elem) = item.select(&title_selector).next() {
            if let Some(link) = item.select(&link_selector).next() {
                title = link.text().collect::<String>().trim().to_string();
            } else {
                title = title_elem.text().collect::<String>().trim().to_string();
            }
        }
        if title.is_empty() {
            continue;
        }

        // The metadata line reads "authors - venue, year - publisher".
        let mut authors = String::new();
        let mut venue = String::new();
        let mut year = String::new();
        if let Some(meta_elem) = item.select(&meta_selector).next() {
            let meta_text = meta_elem.text().collect::<String>();
            let parts: Vec<&str> = meta_text.split(" - ").collect();

            if !parts.is_empty() {
                authors = parts[0].trim().to_string();
            }
            if parts.len() >= 2 {
                let venue_year = parts[1];
                if let Some(year_match) = year_regex.find(venue_year) {
                    year = year_match.as_str().to_string();
                    venue = venue_year[..year_match.start()]
                        .trim()
                        .trim_end_matches(',')
                        .to_string();
                } else {
                    venue = venue_year.trim().to_string();
                }
            }
        }

        let snippet = item
            .select(&snippet_selector)
            .next()
            .map(|e| e.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let mut cited_by = String::new();
        for link in item.select(&cite_selector) {
            let href = link.value().attr("href").unwrap_or("");
            if href.contains("cites=") {
                let text = link.text().collect::<String>();
                if let Some(caps) = cite_regex.captures(&text) {
                    if let Some(count) = caps.get(1) {
                        cited_by = count.as_str().to_string();
                        break;
                    }
                }
            }
        }

        let raw_id = derive_raw_id(&title, &year);
        records.push(RawRecord::new(
            Provider::CitationIndex,
            raw_id,
            json!({
                "title": title,
                "authors": authors,
                "venue": venue,
                "year": year,
                "cited_by": cited_by,
                "snippet": snippet,
            }),
        ));
    }

    Ok(records)
}

/// Stable raw id for a scraped result: the index exposes no record id, so the
/// same result must hash identically across runs for idempotent re-ingestion.
fn derive_raw_id(title: &str, year: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.trim().to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(year.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("ci-{}", &digest[..12])
}
