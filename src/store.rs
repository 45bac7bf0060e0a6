//! Publication persistence.
//!
//! The pipeline treats the store as a key-value collaborator: fetch by
//! identifier, prefilter candidates by year, upsert canonical entities.
//! `JsonStore` is the file-backed implementation used by the CLI; it keeps the
//! whole entity set in memory and writes through on every upsert.

use crate::error::{AcadError, Result};
use crate::publication::Publication;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Default store file path: `~/.acadmetrics_store.json`
fn default_store_path() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|p| p.join(".acadmetrics_store.json"))
        .ok_or_else(|| AcadError::Config("Cannot determine home directory".to_string()))
}

/// Persistence interface the pipeline depends on.
///
/// A failing call fails the record being processed; a store that cannot be
/// opened at all fails the run.
#[async_trait]
pub trait PublicationStore: Send + Sync {
    /// Look up a live entity by its publication identifier (DOI/provider id).
    async fn get_by_identifier(&self, identifier: &str) -> Result<Option<Publication>>;

    /// Cheap prefilter: entities published within the inclusive year range,
    /// plus entities with no recorded year.
    async fn query_candidates(&self, year_lo: i32, year_hi: i32) -> Result<Vec<Publication>>;

    /// Insert or replace an entity by its surrogate id.
    async fn upsert(&self, publication: &Publication) -> Result<()>;

    /// Every persisted entity, tombstones included.
    async fn all(&self) -> Result<Vec<Publication>>;
}

/// JSON-file-backed store.
pub struct JsonStore {
    path: PathBuf,
    entities: Mutex<HashMap<String, Publication>>,
}

impl JsonStore {
    /// Open the store at the default path.
    pub fn open_default() -> Result<Self> {
        Self::open(default_store_path()?)
    }

    /// Open a store file, creating an empty store when the file is absent.
    ///
    /// # Errors
    ///
    /// Unreadable or unparseable content is a hard error: silently starting
    /// empty would duplicate every previously persisted entity.
    pub fn open(path: PathBuf) -> Result<Self> {
        let entities = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| AcadError::Persistence(format!("read {}: {}", path.display(), e)))?;
            let list: Vec<Publication> = serde_json::from_str(&content)
                .map_err(|e| AcadError::Persistence(format!("parse {}: {}", path.display(), e)))?;
            info!(count = list.len(), path = %path.display(), "Loaded publication store");
            list.into_iter()
                .map(|p| (p.entity_id.clone(), p))
                .collect()
        } else {
            debug!(path = %path.display(), "Store file not found, starting empty");
            HashMap::new()
        };

        Ok(Self {
            path,
            entities: Mutex::new(entities),
        })
    }

    /// The store file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of persisted entities.
    pub fn len(&self) -> usize {
        self.entities.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete the store file and clear the in-memory set.
    pub fn clear(&self) -> Result<()> {
        if let Ok(mut entities) = self.entities.lock() {
            entities.clear();
        }
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            info!(path = %self.path.display(), "Cleared publication store");
        }
        Ok(())
    }

    fn save_locked(&self, entities: &HashMap<String, Publication>) -> Result<()> {
        let mut list: Vec<&Publication> = entities.values().collect();
        list.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        let content = serde_json::to_string_pretty(&list)?;
        std::fs::write(&self.path, content)
            .map_err(|e| AcadError::Persistence(format!("write {}: {}", self.path.display(), e)))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Publication>>> {
        self.entities
            .lock()
            .map_err(|_| AcadError::Persistence("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl PublicationStore for JsonStore {
    async fn get_by_identifier(&self, identifier: &str) -> Result<Option<Publication>> {
        let entities = self.lock()?;
        Ok(entities
            .values()
            .find(|p| p.is_live() && p.identifier.as_deref() == Some(identifier))
            .cloned())
    }

    async fn query_candidates(&self, year_lo: i32, year_hi: i32) -> Result<Vec<Publication>> {
        let entities = self.lock()?;
        Ok(entities
            .values()
            .filter(|p| match p.year {
                Some(year) => year >= year_lo && year <= year_hi,
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn upsert(&self, publication: &Publication) -> Result<()> {
        let mut entities = self.lock()?;
        entities.insert(publication.entity_id.clone(), publication.clone());
        self.save_locked(&entities)
    }

    async fn all(&self) -> Result<Vec<Publication>> {
        let entities = self.lock()?;
        Ok(entities.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publication::Author;
    use tempfile::TempDir;

    fn publication(entity_id: &str, identifier: Option<&str>, year: Option<i32>) -> Publication {
        Publication {
            entity_id: entity_id.to_string(),
            identifier: identifier.map(str::to_string),
            title: "Foo Bar".to_string(),
            venue: "Nature".to_string(),
            year,
            authors: vec![Author::new("J. Smith")],
            citation_count: 5,
            source_records: Default::default(),
            category: None,
            abstract_hint: String::new(),
            merged_into: None,
            created_seq: 0,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get_by_identifier() -> Result<()> {
        let dir = TempDir::new()?;
        let store = JsonStore::open(dir.path().join("store.json"))?;

        store
            .upsert(&publication("pub-1", Some("10.1/x"), Some(2020)))
            .await?;

        let found = store.get_by_identifier("10.1/x").await?;
        assert_eq!(found.map(|p| p.entity_id), Some("pub-1".to_string()));
        assert!(store.get_by_identifier("10.9/none").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_by_entity_id() -> Result<()> {
        let dir = TempDir::new()?;
        let store = JsonStore::open(dir.path().join("store.json"))?;

        let mut entity = publication("pub-1", Some("10.1/x"), Some(2020));
        store.upsert(&entity).await?;
        entity.citation_count = 9;
        store.upsert(&entity).await?;

        assert_eq!(store.len(), 1);
        let found = store.get_by_identifier("10.1/x").await?.expect("present");
        assert_eq!(found.citation_count, 9);
        Ok(())
    }

    #[tokio::test]
    async fn test_query_candidates_year_range() -> Result<()> {
        let dir = TempDir::new()?;
        let store = JsonStore::open(dir.path().join("store.json"))?;

        store.upsert(&publication("pub-1", None, Some(2019))).await?;
        store.upsert(&publication("pub-2", None, Some(2022))).await?;
        store.upsert(&publication("pub-3", None, None)).await?;

        let hits = store.query_candidates(2019, 2020).await?;
        let ids: Vec<&str> = {
            let mut ids: Vec<&str> = hits.iter().map(|p| p.entity_id.as_str()).collect();
            ids.sort();
            ids
        };
        // Year-less entities always pass the prefilter.
        assert_eq!(ids, vec!["pub-1", "pub-3"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_persists_across_reopen() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("store.json");

        {
            let store = JsonStore::open(path.clone())?;
            store
                .upsert(&publication("pub-1", Some("10.1/x"), Some(2020)))
                .await?;
        }

        let reopened = JsonStore::open(path)?;
        assert_eq!(reopened.len(), 1);
        assert!(reopened.get_by_identifier("10.1/x").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_tombstones_excluded_from_identifier_lookup() -> Result<()> {
        let dir = TempDir::new()?;
        let store = JsonStore::open(dir.path().join("store.json"))?;

        let mut retired = publication("pub-1", Some("10.1/x"), Some(2020));
        retired.merged_into = Some("pub-2".to_string());
        store.upsert(&retired).await?;
        store
            .upsert(&publication("pub-2", Some("10.1/x"), Some(2020)))
            .await?;

        let found = store.get_by_identifier("10.1/x").await?.expect("live one");
        assert_eq!(found.entity_id, "pub-2");

        // Tombstone still present in the full set for traceability.
        assert_eq!(store.all().await?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_corrupt_store_is_a_hard_error() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("store.json");
        std::fs::write(&path, "not json").expect("write");

        assert!(matches!(
            JsonStore::open(path),
            Err(AcadError::Persistence(_))
        ));
    }

    #[test]
    fn test_clear_removes_file() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("store.json");
        std::fs::write(&path, "[]")?;

        let store = JsonStore::open(path.clone())?;
        store.clear()?;
        assert!(!path.exists());
        assert!(store.is_empty());
        Ok(())
    }
}
