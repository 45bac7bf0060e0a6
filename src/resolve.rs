//! Identity resolution.
//!
//! Decides whether a normalized draft refers to a publication already known to
//! the run. Matching applies three tiers in order, first success wins:
//!
//! 1. Identifier equality (DOI / provider id, exact)
//! 2. Normalized-title equality AND author-key overlap AND year equality
//! 3. Fuzzy title similarity above threshold AND year within ±1 AND surname overlap
//!
//! Ties among tier-2/3 candidates resolve by highest similarity, then earliest
//! creation order. The pool keeps retired entities behind canonical pointers so
//! references held by downstream consumers stay valid after a transitive merge.

use crate::merge;
use crate::normalize::PublicationDraft;
use crate::publication::{
    derive_entity_id, normalize_title, Publication, UNKNOWN_FIELD,
};
use std::collections::{BTreeSet, HashMap};
use strsim::jaro_winkler;
use tracing::{debug, warn};

/// Default Jaro-Winkler threshold for tier-3 title matching.
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.92;

/// Default year slack for tier-3 matching.
pub const DEFAULT_YEAR_SLACK: i32 = 1;

/// Resolver tuning parameters.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Minimum Jaro-Winkler similarity for a tier-3 title match
    pub fuzzy_title_threshold: f64,
    /// Maximum year distance for a tier-3 match
    pub year_slack: i32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            fuzzy_title_threshold: DEFAULT_FUZZY_THRESHOLD,
            year_slack: DEFAULT_YEAR_SLACK,
        }
    }
}

/// Matching tier that produced a candidate. Ordering is match priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchTier {
    Identifier,
    TitleAuthorsYear,
    FuzzyTitle,
}

/// Ephemeral comparison result; discarded after the merge decision.
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub entity_id: String,
    pub tier: MatchTier,
    pub score: f64,
    pub created_seq: u64,
}

/// Precomputed comparison view of a draft.
struct DraftView {
    identifier: Option<String>,
    norm_title: String,
    year: Option<i32>,
    author_keys: BTreeSet<String>,
    surnames: BTreeSet<String>,
}

impl DraftView {
    fn new(draft: &PublicationDraft) -> Self {
        Self {
            identifier: draft.identifier.clone(),
            norm_title: normalize_title(&draft.title),
            year: draft.year,
            author_keys: draft.authors.iter().map(|a| a.key()).collect(),
            surnames: draft.authors.iter().map(|a| a.surname()).collect(),
        }
    }

    fn has_usable_title(&self, draft_title: &str) -> bool {
        draft_title != UNKNOWN_FIELD && !self.norm_title.is_empty()
    }
}

/// The in-run candidate pool: every canonical entity seen or seeded this run,
/// plus tombstones for entities retired by transitive merges.
pub struct CandidatePool {
    entities: HashMap<String, Publication>,
    by_identifier: HashMap<String, String>,
    next_seq: u64,
    config: ResolverConfig,
}

impl CandidatePool {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            entities: HashMap::new(),
            by_identifier: HashMap::new(),
            next_seq: 0,
            config,
        }
    }

    /// Number of live (non-tombstoned) entities.
    pub fn live_count(&self) -> usize {
        self.entities.values().filter(|p| p.is_live()).count()
    }

    /// Seed the pool with a persisted entity. Its stored creation order is kept
    /// so cross-run tie-breaks stay reproducible.
    pub fn seed(&mut self, publication: Publication) {
        self.next_seq = self.next_seq.max(publication.created_seq + 1);
        if let Some(id) = &publication.identifier {
            self.by_identifier
                .entry(id.clone())
                .or_insert_with(|| publication.entity_id.clone());
        }
        self.entities
            .entry(publication.entity_id.clone())
            .or_insert(publication);
    }

    /// Follow canonical pointers to the current authoritative entity id.
    pub fn canonical_id(&self, entity_id: &str) -> String {
        let mut current = entity_id;
        let mut hops = 0;
        while let Some(next) = self
            .entities
            .get(current)
            .and_then(|p| p.merged_into.as_deref())
        {
            current = next;
            hops += 1;
            if hops > self.entities.len() {
                // A pointer cycle would be a pool corruption bug; stop following.
                warn!(entity = entity_id, "Canonical pointer cycle detected");
                break;
            }
        }
        current.to_string()
    }

    pub fn get(&self, entity_id: &str) -> Option<&Publication> {
        self.entities.get(entity_id)
    }

    pub fn get_mut(&mut self, entity_id: &str) -> Option<&mut Publication> {
        self.entities.get_mut(entity_id)
    }

    /// All entities, tombstones included, for end-of-run persistence.
    pub fn entities(&self) -> impl Iterator<Item = &Publication> {
        self.entities.values()
    }

    /// Resolve a draft against the pool.
    ///
    /// Returns the best matching candidate, or `None` to signal that a new
    /// entity should be created.
    pub fn resolve(&self, draft: &PublicationDraft) -> Option<MatchCandidate> {
        let view = DraftView::new(draft);

        // Tier 1: identifier equality.
        if let Some(identifier) = &view.identifier {
            if let Some(entity_id) = self.by_identifier.get(identifier) {
                let canonical = self.canonical_id(entity_id);
                if let Some(publication) = self.entities.get(&canonical) {
                    return Some(MatchCandidate {
                        entity_id: canonical,
                        tier: MatchTier::Identifier,
                        score: 1.0,
                        created_seq: publication.created_seq,
                    });
                }
            }
        }

        if !view.has_usable_title(&draft.title) {
            return None;
        }

        // Tiers 2 and 3 over the live pool; tier 2 beats tier 3 regardless of score.
        let mut best: Option<MatchCandidate> = None;
        for publication in self.entities.values().filter(|p| p.is_live()) {
            if let Some(candidate) = compare(&view, publication, &self.config) {
                best = Some(match best.take() {
                    Some(current) if prefer(&current, &candidate) => current,
                    _ => candidate,
                });
            }
        }
        best
    }

    /// Create a new canonical entity from a draft. Returns its entity id.
    pub fn insert_new(&mut self, draft: &PublicationDraft) -> String {
        let seq = self.next_seq;
        self.next_seq += 1;

        let first_author_key = draft
            .authors
            .first()
            .map(|a| a.key())
            .unwrap_or_default();
        let mut entity_id =
            derive_entity_id(&draft.title, &draft.venue, draft.year, &first_author_key);
        if self.entities.contains_key(&entity_id) {
            entity_id = format!("{}-{}", entity_id, seq);
        }

        let publication = Publication {
            entity_id: entity_id.clone(),
            identifier: draft.identifier.clone(),
            title: draft.title.clone(),
            venue: draft.venue.clone(),
            year: draft.year,
            authors: draft.authors.clone(),
            citation_count: draft.citation_count,
            source_records: [draft.source.clone()].into_iter().collect(),
            category: None,
            abstract_hint: draft.abstract_hint.clone(),
            merged_into: None,
            created_seq: seq,
        };

        if let Some(id) = &publication.identifier {
            self.by_identifier.insert(id.clone(), entity_id.clone());
        }
        debug!(entity = %entity_id, seq, "Created canonical entity");
        self.entities.insert(entity_id.clone(), publication);
        entity_id
    }

    /// Register an identifier adopted during a merge.
    ///
    /// Returns the id of a *different* live entity already holding the same
    /// identifier, which signals that the two entities are the same work.
    pub fn register_identifier(&mut self, entity_id: &str) -> Option<String> {
        let identifier = self.entities.get(entity_id)?.identifier.clone()?;
        match self.by_identifier.get(&identifier) {
            Some(holder) => {
                let canonical = self.canonical_id(holder);
                if canonical != entity_id {
                    Some(canonical)
                } else {
                    None
                }
            }
            None => {
                self.by_identifier.insert(identifier, entity_id.to_string());
                None
            }
        }
    }

    /// Find live entities that tier-2 match `entity_id` and could be unioned
    /// with it (no identifier conflict).
    pub fn find_equivalents(&self, entity_id: &str) -> Vec<String> {
        let Some(subject) = self.entities.get(entity_id) else {
            return Vec::new();
        };
        if !subject.is_live() || subject.title == UNKNOWN_FIELD {
            return Vec::new();
        }
        let norm_title = normalize_title(&subject.title);
        let author_keys: BTreeSet<String> =
            subject.authors.iter().map(|a| a.key()).collect();

        self.entities
            .values()
            .filter(|other| other.is_live() && other.entity_id != subject.entity_id)
            .filter(|other| {
                identifier_compatible(subject, other)
                    && other.year == subject.year
                    && subject.year.is_some()
                    && normalize_title(&other.title) == norm_title
                    && other.authors.iter().any(|a| author_keys.contains(&a.key()))
            })
            .map(|other| other.entity_id.clone())
            .collect()
    }

    /// Union two live entities proven identical. The identifier-bearing entity
    /// survives; on parity the earlier-created one does. Returns the survivor id.
    pub fn union(&mut self, left_id: &str, right_id: &str) -> Option<String> {
        let left_id = self.canonical_id(left_id);
        let right_id = self.canonical_id(right_id);
        if left_id == right_id {
            return Some(left_id);
        }

        let (survivor_id, retired_id) = {
            let left = self.entities.get(&left_id)?;
            let right = self.entities.get(&right_id)?;
            if !identifier_compatible(left, right) {
                warn!(
                    left = %left_id,
                    right = %right_id,
                    "Refusing union: conflicting identifiers"
                );
                return None;
            }
            if pick_survivor(left, right) {
                (left_id.clone(), right_id.clone())
            } else {
                (right_id.clone(), left_id.clone())
            }
        };

        // Take the retired entity out, merge it in, and put the tombstone back.
        let mut retired = self.entities.remove(&retired_id)?;
        if let Some(survivor) = self.entities.get_mut(&survivor_id) {
            merge::union_entities(survivor, &mut retired);
            if let Some(id) = survivor.identifier.clone() {
                self.by_identifier.insert(id, survivor_id.clone());
            }
        }
        debug!(survivor = %survivor_id, retired = %retired_id, "Unioned equivalent entities");
        self.entities.insert(retired_id, retired);
        Some(survivor_id)
    }
}

/// True when `left` should survive a union with `right`.
fn pick_survivor(left: &Publication, right: &Publication) -> bool {
    match (&left.identifier, &right.identifier) {
        (Some(_), None) => true,
        (None, Some(_)) => false,
        _ => left.created_seq <= right.created_seq,
    }
}

fn identifier_compatible(a: &Publication, b: &Publication) -> bool {
    match (&a.identifier, &b.identifier) {
        (Some(x), Some(y)) => x == y,
        _ => true,
    }
}

/// Compare a draft view against one live entity, returning the strongest
/// tier-2/3 candidate it yields.
fn compare(
    view: &DraftView,
    publication: &Publication,
    config: &ResolverConfig,
) -> Option<MatchCandidate> {
    if publication.title == UNKNOWN_FIELD {
        return None;
    }
    let entity_title = normalize_title(&publication.title);
    if entity_title.is_empty() {
        return None;
    }

    let year_equal = match (view.year, publication.year) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    };
    let year_close = match (view.year, publication.year) {
        (Some(a), Some(b)) => (a - b).abs() <= config.year_slack,
        _ => false,
    };

    // Tier 2: exact normalized title, shared author key, same year.
    if year_equal && entity_title == view.norm_title {
        let overlap = publication
            .authors
            .iter()
            .any(|a| view.author_keys.contains(&a.key()));
        if overlap {
            return Some(MatchCandidate {
                entity_id: publication.entity_id.clone(),
                tier: MatchTier::TitleAuthorsYear,
                score: 1.0,
                created_seq: publication.created_seq,
            });
        }
    }

    // Tier 3: fuzzy title, year within slack, surname overlap.
    if year_close {
        let similarity = jaro_winkler(&entity_title, &view.norm_title);
        if similarity >= config.fuzzy_title_threshold {
            let overlap = publication
                .authors
                .iter()
                .any(|a| view.surnames.contains(&a.surname()));
            if overlap {
                return Some(MatchCandidate {
                    entity_id: publication.entity_id.clone(),
                    tier: MatchTier::FuzzyTitle,
                    score: similarity,
                    created_seq: publication.created_seq,
                });
            }
        }
    }

    None
}

/// True when `current` should be kept over `challenger`: better tier, then
/// higher score, then earlier creation.
fn prefer(current: &MatchCandidate, challenger: &MatchCandidate) -> bool {
    if current.tier != challenger.tier {
        return current.tier < challenger.tier;
    }
    if (current.score - challenger.score).abs() > f64::EPSILON {
        return current.score > challenger.score;
    }
    current.created_seq <= challenger.created_seq
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publication::{Author, Provider, SourceKey};

    fn draft(
        identifier: Option<&str>,
        title: &str,
        year: Option<i32>,
        authors: &[&str],
    ) -> PublicationDraft {
        PublicationDraft {
            identifier: identifier.map(str::to_string),
            title: title.to_string(),
            venue: "Nature".to_string(),
            year,
            authors: authors.iter().map(|a| Author::new(*a)).collect(),
            citation_count: 0,
            abstract_hint: String::new(),
            source: SourceKey::new(Provider::CitationIndex, "raw"),
        }
    }

    fn pool() -> CandidatePool {
        CandidatePool::new(ResolverConfig::default())
    }

    #[test]
    fn test_tier1_identifier_match() {
        let mut pool = pool();
        let id = pool.insert_new(&draft(Some("10.1/x"), "Foo Bar", Some(2020), &["J. Smith"]));

        let probe = draft(Some("10.1/x"), "Completely Different Title", None, &[]);
        let candidate = pool.resolve(&probe).expect("tier 1 match");
        assert_eq!(candidate.entity_id, id);
        assert_eq!(candidate.tier, MatchTier::Identifier);
    }

    #[test]
    fn test_tier2_title_author_year_match() {
        let mut pool = pool();
        let id = pool.insert_new(&draft(Some("10.1/x"), "Foo Bar", Some(2020), &["J. Smith"]));

        let probe = draft(None, "Foo Bar", Some(2020), &["John Smith", "A. Lee"]);
        let candidate = pool.resolve(&probe).expect("tier 2 match");
        assert_eq!(candidate.entity_id, id);
        assert_eq!(candidate.tier, MatchTier::TitleAuthorsYear);
    }

    #[test]
    fn test_tier3_fuzzy_match_with_year_slack() {
        let mut pool = pool();
        let id = pool.insert_new(&draft(
            None,
            "Deep Learning for Landslide Detection",
            Some(2020),
            &["J. Smith"],
        ));

        let probe = draft(
            None,
            "Deep Learning for Landslide Detections",
            Some(2021),
            &["Jane Smith"],
        );
        let candidate = pool.resolve(&probe).expect("tier 3 match");
        assert_eq!(candidate.entity_id, id);
        assert_eq!(candidate.tier, MatchTier::FuzzyTitle);
        assert!(candidate.score >= DEFAULT_FUZZY_THRESHOLD);
    }

    #[test]
    fn test_no_match_creates_new() {
        let mut pool = pool();
        pool.insert_new(&draft(None, "Foo Bar", Some(2020), &["J. Smith"]));

        // Same title but disjoint authors and distant year.
        let probe = draft(None, "Foo Bar", Some(2010), &["Q. Zhao"]);
        assert!(pool.resolve(&probe).is_none());
    }

    #[test]
    fn test_tie_breaks_on_earliest_created() {
        let mut pool = pool();
        let first = pool.insert_new(&draft(None, "Foo Bar", Some(2020), &["J. Smith"]));
        // Second entity with identical comparison fields but a different first
        // author ordering so it gets a distinct entity id.
        let second = pool.insert_new(&draft(None, "Foo Bar", Some(2020), &["A. Lee", "J. Smith"]));
        assert_ne!(first, second);

        let probe = draft(None, "Foo Bar", Some(2020), &["J. Smith"]);
        let candidate = pool.resolve(&probe).expect("matches");
        assert_eq!(candidate.entity_id, first);
    }

    #[test]
    fn test_unknown_title_never_fuzzy_matches() {
        let mut pool = pool();
        pool.insert_new(&draft(Some("10.1/x"), UNKNOWN_FIELD, Some(2020), &["J. Smith"]));

        let probe = draft(None, UNKNOWN_FIELD, Some(2020), &["J. Smith"]);
        assert!(pool.resolve(&probe).is_none());
    }

    #[test]
    fn test_canonical_pointer_resolution_after_union() {
        let mut pool = pool();
        let with_id = pool.insert_new(&draft(Some("10.1/x"), "Foo Bar", Some(2020), &["J. Smith"]));
        let without_id = pool.insert_new(&draft(None, "Foo Bar Study", Some(2020), &["J. Smith"]));

        let survivor = pool.union(&with_id, &without_id).expect("union succeeds");
        assert_eq!(survivor, with_id);
        assert_eq!(pool.canonical_id(&without_id), with_id);
        assert_eq!(pool.live_count(), 1);

        // The tombstone still exists for traceability.
        let retired = pool.get(&without_id).expect("tombstone kept");
        assert_eq!(retired.merged_into.as_deref(), Some(with_id.as_str()));
    }

    #[test]
    fn test_union_refuses_identifier_conflict() {
        let mut pool = pool();
        let a = pool.insert_new(&draft(Some("10.1/x"), "Foo Bar", Some(2020), &["J. Smith"]));
        let b = pool.insert_new(&draft(Some("10.2/y"), "Foo Bar", Some(2020), &["A. Lee"]));
        assert!(pool.union(&a, &b).is_none());
        assert_eq!(pool.live_count(), 2);
    }

    #[test]
    fn test_find_equivalents_after_identifier_adoption() {
        let mut pool = pool();
        let bare = pool.insert_new(&draft(None, "Foo Bar", Some(2020), &["J. Smith"]));
        let keyed = pool.insert_new(&draft(Some("10.1/x"), "Foo Bar", Some(2020), &["Jane Smith", "A. Lee"]));

        let equivalents = pool.find_equivalents(&keyed);
        assert_eq!(equivalents, vec![bare.clone()]);

        let survivor = pool.union(&keyed, &bare).expect("union");
        assert_eq!(survivor, keyed);
    }

    #[test]
    fn test_seed_preserves_creation_order() {
        let mut pool = pool();
        let persisted = Publication {
            entity_id: "pub-seeded".to_string(),
            identifier: Some("10.1/x".to_string()),
            title: "Foo Bar".to_string(),
            venue: "Nature".to_string(),
            year: Some(2020),
            authors: vec![Author::new("J. Smith")],
            citation_count: 3,
            source_records: Default::default(),
            category: None,
            abstract_hint: String::new(),
            merged_into: None,
            created_seq: 7,
        };
        pool.seed(persisted);

        let fresh = pool.insert_new(&draft(None, "Other Work", Some(2020), &["A. Lee"]));
        let fresh_seq = pool.get(&fresh).expect("exists").created_seq;
        assert!(fresh_seq > 7);

        let probe = draft(Some("10.1/x"), "Anything", None, &[]);
        assert_eq!(
            pool.resolve(&probe).expect("seeded match").entity_id,
            "pub-seeded"
        );
    }
}
