//! Record normalization.
//!
//! Maps each provider's raw record shape into a `PublicationDraft`. Pure: no I/O,
//! no side effects. Missing or malformed fields degrade to explicit sentinels;
//! only a record with neither a title nor an identifier is rejected.

use crate::error::{AcadError, Result};
use crate::publication::{Author, Provider, SourceKey, UNKNOWN_FIELD};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static YEAR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("valid year regex"));

static TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));

/// A provider-tagged raw record blob, exactly as the fetcher produced it.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub provider: Provider,
    pub raw_id: String,
    pub data: Value,
}

impl RawRecord {
    pub fn new(provider: Provider, raw_id: impl Into<String>, data: Value) -> Self {
        Self {
            provider,
            raw_id: raw_id.into(),
            data,
        }
    }
}

/// A normalized but not-yet-resolved record pending identity matching.
#[derive(Debug, Clone)]
pub struct PublicationDraft {
    pub identifier: Option<String>,
    pub title: String,
    pub venue: String,
    pub year: Option<i32>,
    pub authors: Vec<Author>,
    pub citation_count: u64,
    pub abstract_hint: String,
    pub source: SourceKey,
}

/// Normalize one raw record into a draft.
///
/// # Errors
///
/// Returns `AcadError::MalformedRecord` only when the record carries neither a
/// title nor an identifier; every other defect degrades a field.
pub fn normalize(record: &RawRecord) -> Result<PublicationDraft> {
    let draft = match record.provider {
        Provider::CitationIndex => normalize_citation_index(record),
        Provider::Bibliographic => normalize_bibliographic(record),
    };

    if draft.title == UNKNOWN_FIELD && draft.identifier.is_none() {
        return Err(AcadError::MalformedRecord(format!(
            "{} record {} has neither title nor identifier",
            record.provider, record.raw_id
        )));
    }
    Ok(draft)
}

/// Citation-index records arrive flat: scraped strings, citation count as text.
fn normalize_citation_index(record: &RawRecord) -> PublicationDraft {
    let data = &record.data;

    let title = text_field(data, "title");
    let venue = text_field(data, "venue");
    let year = data
        .get("year")
        .and_then(value_to_year)
        .or_else(|| extract_year(&venue));

    let authors = data
        .get("authors")
        .and_then(Value::as_str)
        .map(split_author_list)
        .unwrap_or_default();

    let citation_count = data
        .get("cited_by")
        .and_then(value_to_count)
        .unwrap_or(0);

    let identifier = data
        .get("doi")
        .and_then(Value::as_str)
        .map(canonical_identifier)
        .filter(|d| !d.is_empty());

    PublicationDraft {
        identifier,
        title,
        venue,
        year,
        authors,
        citation_count,
        abstract_hint: data
            .get("snippet")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string(),
        source: SourceKey::new(record.provider, record.raw_id.clone()),
    }
}

/// Bibliographic records use the works-API shape: array-wrapped titles,
/// structured authors with affiliations, date-parts.
fn normalize_bibliographic(record: &RawRecord) -> PublicationDraft {
    let data = &record.data;

    let title = first_of_array(data, "title");
    let venue = first_of_array(data, "container-title");

    let year = data
        .get("published")
        .and_then(|p| p.get("date-parts"))
        .and_then(|dp| dp.get(0))
        .and_then(|parts| parts.get(0))
        .and_then(Value::as_i64)
        .map(|y| y as i32)
        .filter(|y| (1000..=9999).contains(y));

    let authors = data
        .get("author")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(parse_structured_author).collect())
        .unwrap_or_default();

    let citation_count = data
        .get("is-referenced-by-count")
        .and_then(value_to_count)
        .unwrap_or(0);

    let identifier = data
        .get("DOI")
        .and_then(Value::as_str)
        .map(canonical_identifier)
        .filter(|d| !d.is_empty());

    let abstract_hint = data
        .get("abstract")
        .and_then(Value::as_str)
        .map(strip_html_tags)
        .unwrap_or_default();

    PublicationDraft {
        identifier,
        title,
        venue,
        year,
        authors,
        citation_count,
        abstract_hint,
        source: SourceKey::new(record.provider, record.raw_id.clone()),
    }
}

/// Trimmed string field, degrading to the unknown sentinel.
fn text_field(data: &Value, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .map(|s| collapse_whitespace(s))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN_FIELD.to_string())
}

/// First entry of a string-array field (works-API convention), with sentinel.
fn first_of_array(data: &Value, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(Value::as_str)
        .map(collapse_whitespace)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN_FIELD.to_string())
}

fn parse_structured_author(value: &Value) -> Option<Author> {
    let given = value.get("given").and_then(Value::as_str).unwrap_or("");
    let family = value.get("family").and_then(Value::as_str).unwrap_or("");
    let name = collapse_whitespace(&format!("{} {}", given, family));
    if name.is_empty() {
        return None;
    }
    let affiliation = value
        .get("affiliation")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(|a| a.get("name"))
        .and_then(Value::as_str)
        .map(|s| collapse_whitespace(s))
        .filter(|s| !s.is_empty());
    Some(Author { name, affiliation })
}

/// Split a scraped author line ("J. Smith, A. Lee, …") into individual authors.
fn split_author_list(line: &str) -> Vec<Author> {
    line.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty() && *part != "…" && *part != "...")
        .map(Author::new)
        .collect()
}

/// Lowercased, trimmed identifier; strips common DOI URL prefixes.
pub fn canonical_identifier(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    lower
        .strip_prefix("https://doi.org/")
        .or_else(|| lower.strip_prefix("http://doi.org/"))
        .or_else(|| lower.strip_prefix("doi:"))
        .unwrap_or(&lower)
        .to_string()
}

fn value_to_year(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n.as_i64().map(|y| y as i32),
        Value::String(s) => extract_year(s),
        _ => None,
    }
    .filter(|y| (1000..=9999).contains(y))
}

fn value_to_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

/// Pull a plausible publication year out of free text.
fn extract_year(text: &str) -> Option<i32> {
    YEAR_REGEX
        .find(text)
        .and_then(|m| m.as_str().parse().ok())
}

/// Strip markup tags from abstract text.
fn strip_html_tags(text: &str) -> String {
    collapse_whitespace(&TAG_REGEX.replace_all(text, " "))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
