//! Metric aggregation.
//!
//! Folds canonical, classified publications into per-author and per-department
//! accumulators. All mutation is monotonic increment; a per-accumulator set of
//! already-folded entity ids makes re-processing the same publication a no-op.

use crate::error::{AcadError, Result};
use crate::publication::Publication;
use crate::taxonomy::CategoryLabel;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use tracing::{debug, info};

/// Department bucket for affiliations the directory cannot resolve.
pub const UNASSIGNED_DEPARTMENT: &str = "unassigned";

/// Running totals for one category within an accumulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTally {
    pub publication_count: u64,
    pub citation_sum: u64,
}

/// Running metric totals for one author or one department.
///
/// Created lazily on first contributing publication; only ever incremented.
#[derive(Debug, Clone, Default)]
pub struct MetricAccumulator {
    tallies: BTreeMap<CategoryLabel, CategoryTally>,
    folded: HashSet<String>,
}

impl MetricAccumulator {
    /// Apply one publication. Returns false (and changes nothing) when this
    /// entity was already folded into this accumulator.
    pub fn fold(&mut self, entity_id: &str, label: CategoryLabel, citations: u64) -> bool {
        if !self.folded.insert(entity_id.to_string()) {
            return false;
        }
        let tally = self.tallies.entry(label).or_default();
        tally.publication_count += 1;
        tally.citation_sum += citations;
        true
    }

    pub fn tally(&self, label: CategoryLabel) -> CategoryTally {
        self.tallies.get(&label).copied().unwrap_or_default()
    }

    pub fn tallies(&self) -> &BTreeMap<CategoryLabel, CategoryTally> {
        &self.tallies
    }

    pub fn total_publications(&self) -> u64 {
        self.tallies.values().map(|t| t.publication_count).sum()
    }

    pub fn total_citations(&self) -> u64 {
        self.tallies.values().map(|t| t.citation_sum).sum()
    }
}

/// Directory collaborator: maps an author affiliation string to a department id.
pub trait Directory: Send + Sync {
    fn resolve_department(&self, affiliation: &str) -> Option<String>;
}

/// One affiliation-matching rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryRule {
    /// Case-insensitive substring to look for in the affiliation
    pub pattern: String,
    /// Department id to resolve to
    pub department: String,
}

/// Substring-rule directory, loadable from a JSON rule file.
///
/// First matching rule wins; an empty directory resolves nothing, folding every
/// affiliation into the unassigned bucket.
#[derive(Debug, Clone, Default)]
pub struct RuleDirectory {
    rules: Vec<DirectoryRule>,
}

impl RuleDirectory {
    pub fn new(rules: Vec<DirectoryRule>) -> Self {
        Self { rules }
    }

    /// Load rules from a JSON file: `[{"pattern": "...", "department": "..."}]`
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let rules: Vec<DirectoryRule> = serde_json::from_str(&content)?;
        if rules.iter().any(|r| r.pattern.trim().is_empty()) {
            return Err(AcadError::Config(
                "directory rule with empty pattern".to_string(),
            ));
        }
        info!(count = rules.len(), path = %path.display(), "Loaded directory rules");
        Ok(Self { rules })
    }
}

impl Directory for RuleDirectory {
    fn resolve_department(&self, affiliation: &str) -> Option<String> {
        let haystack = affiliation.to_lowercase();
        self.rules
            .iter()
            .find(|rule| haystack.contains(&rule.pattern.to_lowercase()))
            .map(|rule| rule.department.clone())
    }
}

/// Snapshot of one accumulator, emitted to the export collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct AccumulatorSnapshot {
    pub key: String,
    pub display_name: String,
    pub categories: Vec<CategorySnapshot>,
    pub total_publications: u64,
    pub total_citations: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorySnapshot {
    pub category: CategoryLabel,
    pub publication_count: u64,
    pub citation_sum: u64,
}

/// Folds classified publications into per-author and per-department metrics.
pub struct Aggregator<D> {
    directory: D,
    by_author: BTreeMap<String, MetricAccumulator>,
    author_names: BTreeMap<String, String>,
    by_department: BTreeMap<String, MetricAccumulator>,
}

impl<D: Directory> Aggregator<D> {
    pub fn new(directory: D) -> Self {
        Self {
            directory,
            by_author: BTreeMap::new(),
            author_names: BTreeMap::new(),
            by_department: BTreeMap::new(),
        }
    }

    /// Fold one canonical, classified publication into the accumulators.
    ///
    /// Re-folding the same entity is a no-op per accumulator, so re-ingestion
    /// across providers or runs never double-counts.
    pub fn fold(&mut self, publication: &Publication) {
        let label = publication
            .category
            .map(|c| c.label)
            .unwrap_or(CategoryLabel::Unclassified);
        let citations = publication.citation_count;
        let entity_id = publication.entity_id.as_str();

        let mut departments: BTreeSet<String> = BTreeSet::new();
        for author in &publication.authors {
            let key = author.key();
            self.author_names
                .entry(key.clone())
                .or_insert_with(|| author.name.clone());
            self.by_author
                .entry(key)
                .or_default()
                .fold(entity_id, label, citations);

            let department = author
                .affiliation
                .as_deref()
                .and_then(|aff| self.directory.resolve_department(aff))
                .unwrap_or_else(|| UNASSIGNED_DEPARTMENT.to_string());
            departments.insert(department);
        }

        // Each department counts a publication once, however many of its
        // authors contributed.
        for department in departments {
            self.by_department
                .entry(department)
                .or_default()
                .fold(entity_id, label, citations);
        }

        debug!(entity = entity_id, label = %label, "Folded publication");
    }

    /// Recompute every accumulator from scratch over the given entities.
    /// Only live, already-classified entities contribute.
    pub fn rebuild<'a>(&mut self, publications: impl Iterator<Item = &'a Publication>) {
        self.by_author.clear();
        self.author_names.clear();
        self.by_department.clear();
        for publication in publications.filter(|p| p.is_live()) {
            self.fold(publication);
        }
    }

    pub fn author_accumulator(&self, author_key: &str) -> Option<&MetricAccumulator> {
        self.by_author.get(author_key)
    }

    pub fn department_accumulator(&self, department: &str) -> Option<&MetricAccumulator> {
        self.by_department.get(department)
    }

    pub fn author_snapshots(&self) -> Vec<AccumulatorSnapshot> {
        self.by_author
            .iter()
            .map(|(key, acc)| {
                snapshot(
                    key,
                    self.author_names.get(key).cloned().unwrap_or_default(),
                    acc,
                )
            })
            .collect()
    }

    pub fn department_snapshots(&self) -> Vec<AccumulatorSnapshot> {
        self.by_department
            .iter()
            .map(|(key, acc)| snapshot(key, key.clone(), acc))
            .collect()
    }
}

fn snapshot(key: &str, display_name: String, accumulator: &MetricAccumulator) -> AccumulatorSnapshot {
    AccumulatorSnapshot {
        key: key.to_string(),
        display_name,
        categories: accumulator
            .tallies()
            .iter()
            .map(|(category, tally)| CategorySnapshot {
                category: *category,
                publication_count: tally.publication_count,
                citation_sum: tally.citation_sum,
            })
            .collect(),
        total_publications: accumulator.total_publications(),
        total_citations: accumulator.total_citations(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publication::{AssignedCategory, Author};

    fn directory() -> RuleDirectory {
        RuleDirectory::new(vec![
            DirectoryRule {
                pattern: "biology".to_string(),
                department: "dept-biology".to_string(),
            },
            DirectoryRule {
                pattern: "physics".to_string(),
                department: "dept-physics".to_string(),
            },
        ])
    }

    fn publication(entity_id: &str, citations: u64, authors: Vec<Author>) -> Publication {
        Publication {
            entity_id: entity_id.to_string(),
            identifier: None,
            title: "Foo Bar".to_string(),
            venue: "Nature".to_string(),
            year: Some(2020),
            authors,
            citation_count: citations,
            source_records: Default::default(),
            category: Some(AssignedCategory {
                label: CategoryLabel::LifeSciences,
                confidence: 0.9,
            }),
            abstract_hint: String::new(),
            merged_into: None,
            created_seq: 0,
        }
    }

    #[test]
    fn test_fold_counts_author_and_department() {
        let mut aggregator = Aggregator::new(directory());
        aggregator.fold(&publication(
            "pub-1",
            5,
            vec![Author::with_affiliation("J. Smith", "Dept of Biology, State U")],
        ));

        let author = aggregator.author_accumulator("smith|j").expect("author");
        assert_eq!(author.tally(CategoryLabel::LifeSciences).publication_count, 1);
        assert_eq!(author.tally(CategoryLabel::LifeSciences).citation_sum, 5);

        let dept = aggregator
            .department_accumulator("dept-biology")
            .expect("department");
        assert_eq!(dept.total_publications(), 1);
        assert_eq!(dept.total_citations(), 5);
    }

    #[test]
    fn test_refold_is_idempotent() {
        let mut aggregator = Aggregator::new(directory());
        let publication = publication(
            "pub-1",
            5,
            vec![Author::with_affiliation("J. Smith", "Dept of Biology")],
        );
        aggregator.fold(&publication);
        aggregator.fold(&publication);

        let author = aggregator.author_accumulator("smith|j").expect("author");
        assert_eq!(author.total_publications(), 1);
        assert_eq!(author.total_citations(), 5);
        let dept = aggregator
            .department_accumulator("dept-biology")
            .expect("department");
        assert_eq!(dept.total_publications(), 1);
    }

    #[test]
    fn test_unresolved_affiliation_goes_unassigned() {
        let mut aggregator = Aggregator::new(directory());
        aggregator.fold(&publication(
            "pub-1",
            2,
            vec![
                Author::with_affiliation("J. Smith", "School of Dance"),
                Author::new("A. Lee"),
            ],
        ));

        let unassigned = aggregator
            .department_accumulator(UNASSIGNED_DEPARTMENT)
            .expect("unassigned bucket");
        // Both authors resolve to the same bucket, counted once.
        assert_eq!(unassigned.total_publications(), 1);
        assert_eq!(unassigned.total_citations(), 2);
    }

    #[test]
    fn test_department_counted_once_for_coauthors() {
        let mut aggregator = Aggregator::new(directory());
        aggregator.fold(&publication(
            "pub-1",
            7,
            vec![
                Author::with_affiliation("J. Smith", "Dept of Biology"),
                Author::with_affiliation("A. Lee", "Biology Program"),
            ],
        ));

        let dept = aggregator
            .department_accumulator("dept-biology")
            .expect("department");
        assert_eq!(dept.total_publications(), 1);
        assert_eq!(dept.total_citations(), 7);
    }

    #[test]
    fn test_unclassified_publication_folds_into_sentinel() {
        let mut aggregator = Aggregator::new(RuleDirectory::default());
        let mut publication = publication("pub-1", 0, vec![Author::new("J. Smith")]);
        publication.category = None;
        aggregator.fold(&publication);

        let author = aggregator.author_accumulator("smith|j").expect("author");
        assert_eq!(
            author.tally(CategoryLabel::Unclassified).publication_count,
            1
        );
    }

    #[test]
    fn test_rebuild_from_scratch() {
        let mut aggregator = Aggregator::new(directory());
        let live = publication("pub-1", 3, vec![Author::new("J. Smith")]);
        let mut retired = publication("pub-2", 9, vec![Author::new("J. Smith")]);
        retired.merged_into = Some("pub-1".to_string());

        aggregator.fold(&live);
        aggregator.fold(&retired);
        assert_eq!(
            aggregator
                .author_accumulator("smith|j")
                .expect("author")
                .total_publications(),
            2
        );

        aggregator.rebuild([&live, &retired].into_iter());
        let author = aggregator.author_accumulator("smith|j").expect("author");
        assert_eq!(author.total_publications(), 1);
        assert_eq!(author.total_citations(), 3);
    }

    #[test]
    fn test_snapshots_sorted_and_totaled() {
        let mut aggregator = Aggregator::new(directory());
        aggregator.fold(&publication(
            "pub-1",
            5,
            vec![Author::with_affiliation("J. Smith", "Dept of Biology")],
        ));
        aggregator.fold(&publication(
            "pub-2",
            3,
            vec![Author::with_affiliation("J. Smith", "Dept of Biology")],
        ));

        let authors = aggregator.author_snapshots();
        assert_eq!(authors.len(), 1);
        assert_eq!(authors[0].display_name, "J. Smith");
        assert_eq!(authors[0].total_publications, 2);
        assert_eq!(authors[0].total_citations, 8);

        let departments = aggregator.department_snapshots();
        assert_eq!(departments.len(), 1);
        assert_eq!(departments[0].key, "dept-biology");
    }
}
