//! Canonical publication entities.
//!
//! A `Publication` is the single authoritative record for a real-world work after
//! deduplication across providers. Entities are created from drafts, mutated only
//! through the merge engine, and retired (tombstoned) rather than deleted when a
//! later merge proves two entities identical.

use crate::taxonomy::CategoryLabel;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

/// Sentinel venue/title text for fields the source did not supply.
pub const UNKNOWN_FIELD: &str = "unknown";

/// Source providers feeding the pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Provider {
    /// Citation-index service (scraped search pages)
    #[serde(rename = "citation-index")]
    CitationIndex,
    /// Bibliographic-metadata service (REST API)
    #[serde(rename = "bibliographic")]
    Bibliographic,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::CitationIndex => "citation-index",
            Provider::Bibliographic => "bibliographic",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One contributing source record: provider plus the provider's own id.
///
/// Appended on every merge, never removed.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SourceKey {
    pub provider: Provider,
    pub raw_id: String,
}

impl SourceKey {
    pub fn new(provider: Provider, raw_id: impl Into<String>) -> Self {
        Self {
            provider,
            raw_id: raw_id.into(),
        }
    }
}

/// An author as recorded on a publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
}

impl Author {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            affiliation: None,
        }
    }

    pub fn with_affiliation(name: impl Into<String>, affiliation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            affiliation: Some(affiliation.into()),
        }
    }

    /// Identity key: surname plus first initial, lowercased.
    ///
    /// "J. Smith", "John Smith", and "Smith, John" all map to `smith|j`.
    pub fn key(&self) -> String {
        let surname = self.surname();
        let initial = self
            .given_part()
            .chars()
            .find(|c| c.is_alphabetic())
            .map(|c| c.to_lowercase().to_string())
            .unwrap_or_default();
        format!("{}|{}", surname, initial)
    }

    /// Lowercased surname used for tier-3 overlap checks.
    pub fn surname(&self) -> String {
        let name = self.name.trim();
        if let Some((family, _)) = name.split_once(',') {
            return family.trim().to_lowercase();
        }
        name.split_whitespace()
            .last()
            .unwrap_or("")
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase()
    }

    fn given_part(&self) -> String {
        let name = self.name.trim();
        if let Some((_, given)) = name.split_once(',') {
            return given.trim().to_string();
        }
        let mut parts: Vec<&str> = name.split_whitespace().collect();
        if parts.len() > 1 {
            parts.pop();
            parts.join(" ")
        } else {
            String::new()
        }
    }
}

/// Category assigned by the classification service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssignedCategory {
    pub label: CategoryLabel,
    pub confidence: f64,
}

impl AssignedCategory {
    /// The degradation sentinel assigned after exhausted retries.
    pub fn unclassified() -> Self {
        Self {
            label: CategoryLabel::Unclassified,
            confidence: 0.0,
        }
    }
}

/// Canonical publication entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publication {
    /// Surrogate key, stable from creation; never changes, never reused.
    pub entity_id: String,
    /// Best-available unique key (DOI or provider id); adopt-if-absent, permanent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub title: String,
    pub venue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    pub authors: Vec<Author>,
    pub citation_count: u64,
    pub source_records: BTreeSet<SourceKey>,
    /// Set once by the classification service, immutable afterward.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<AssignedCategory>,
    /// Abstract or snippet text fed to the classifier; empty when absent.
    #[serde(default)]
    pub abstract_hint: String,
    /// Tombstone pointer: set when this entity was merged into another.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_into: Option<String>,
    /// Creation order within the candidate pool; deterministic tie-break key.
    pub created_seq: u64,
}

impl Publication {
    /// Whether this entity is still canonical (not merged away).
    pub fn is_live(&self) -> bool {
        self.merged_into.is_none()
    }

    /// Retire this entity in favor of `survivor`. The data stays for traceability.
    pub fn retire(&mut self, survivor: &str) {
        self.merged_into = Some(survivor.to_string());
    }

    /// Content hash over normalized title, venue, and year.
    ///
    /// This is the classification-cache key: unchanged entities hash identically
    /// across runs, so the model is never re-invoked for them.
    pub fn content_hash(&self) -> String {
        content_hash(&self.title, &self.venue, self.year)
    }
}

/// Hash of the classification-relevant identity of a work.
pub fn content_hash(title: &str, venue: &str, year: Option<i32>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_title(title).as_bytes());
    hasher.update(b"|");
    hasher.update(venue.trim().to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(year.map(|y| y.to_string()).unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

/// Derive a surrogate entity id for a first-sighted work.
///
/// Includes the first author key so distinct works sharing title/venue/year do
/// not collide.
pub fn derive_entity_id(
    title: &str,
    venue: &str,
    year: Option<i32>,
    first_author_key: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content_hash(title, venue, year).as_bytes());
    hasher.update(b"|");
    hasher.update(first_author_key.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("pub-{}", &digest[..12])
}

/// Normalize a title for comparison and hashing: lowercase, strip punctuation,
/// collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_space = true;
    for c in title.chars() {
        if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                out.push(lower);
            }
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("Foo Bar"), "foo bar");
        assert_eq!(normalize_title("  Foo—Bar: a study!  "), "foo bar a study");
        assert_eq!(normalize_title("Machine Learning."), "machine learning");
    }

    #[test]
    fn test_author_key_variants() {
        let a = Author::new("J. Smith");
        let b = Author::new("John Smith");
        let c = Author::new("Smith, John");
        assert_eq!(a.key(), "smith|j");
        assert_eq!(b.key(), a.key());
        assert_eq!(c.key(), a.key());
        assert_eq!(a.surname(), "smith");
    }

    #[test]
    fn test_author_key_single_token() {
        let a = Author::new("Plato");
        assert_eq!(a.surname(), "plato");
        assert_eq!(a.key(), "plato|");
    }

    #[test]
    fn test_content_hash_ignores_formatting() {
        let a = content_hash("Foo Bar", "Nature", Some(2020));
        let b = content_hash("foo bar!", " NATURE ", Some(2020));
        assert_eq!(a, b);
        let c = content_hash("Foo Bar", "Nature", Some(2021));
        assert_ne!(a, c);
    }

    #[test]
    fn test_entity_id_distinguishes_authors() {
        let a = derive_entity_id("Foo Bar", "Nature", Some(2020), "smith|j");
        let b = derive_entity_id("Foo Bar", "Nature", Some(2020), "lee|a");
        assert_ne!(a, b);
        assert!(a.starts_with("pub-"));
    }
}
