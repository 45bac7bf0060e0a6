//! Merge engine.
//!
//! Combines records confirmed to describe the same work. The field policy is
//! deterministic: identifier adopt-if-absent (permanent), citation count by max,
//! authors by keyed union in first-seen order, source records by set union,
//! title/venue/year first-seen wins. Recorded sentinels may be upgraded to real
//! values, real values never change.

use crate::normalize::PublicationDraft;
use crate::publication::{Author, Publication, UNKNOWN_FIELD};
use tracing::debug;

/// Merge a confirmed-same draft into an existing canonical entity.
///
/// No side effects beyond mutating `existing`; the persistence write is the
/// caller's responsibility.
pub fn merge_draft(existing: &mut Publication, draft: &PublicationDraft) {
    if existing.identifier.is_none() {
        if let Some(id) = &draft.identifier {
            debug!(entity = %existing.entity_id, identifier = %id, "Adopting identifier");
            existing.identifier = Some(id.clone());
        }
    }

    existing.citation_count = existing.citation_count.max(draft.citation_count);
    union_authors(&mut existing.authors, &draft.authors);
    existing.source_records.insert(draft.source.clone());

    if existing.title == UNKNOWN_FIELD && draft.title != UNKNOWN_FIELD {
        existing.title = draft.title.clone();
    }
    if existing.venue == UNKNOWN_FIELD && draft.venue != UNKNOWN_FIELD {
        existing.venue = draft.venue.clone();
    }
    if existing.year.is_none() {
        existing.year = draft.year;
    }
    if existing.abstract_hint.is_empty() && !draft.abstract_hint.is_empty() {
        existing.abstract_hint = draft.abstract_hint.clone();
    }
}

/// Union a retired entity's data into the surviving entity and tombstone it.
///
/// Callers must ensure the identifiers do not conflict (at most one present, or
/// both equal): identifier permanence is never violated here.
pub fn union_entities(survivor: &mut Publication, retired: &mut Publication) {
    debug_assert!(
        survivor.identifier.is_none()
            || retired.identifier.is_none()
            || survivor.identifier == retired.identifier
    );

    if survivor.identifier.is_none() {
        survivor.identifier = retired.identifier.clone();
    }

    survivor.citation_count = survivor.citation_count.max(retired.citation_count);
    union_authors(&mut survivor.authors, &retired.authors);
    for source in &retired.source_records {
        survivor.source_records.insert(source.clone());
    }

    if survivor.title == UNKNOWN_FIELD && retired.title != UNKNOWN_FIELD {
        survivor.title = retired.title.clone();
    }
    if survivor.venue == UNKNOWN_FIELD && retired.venue != UNKNOWN_FIELD {
        survivor.venue = retired.venue.clone();
    }
    if survivor.year.is_none() {
        survivor.year = retired.year;
    }
    if survivor.abstract_hint.is_empty() {
        survivor.abstract_hint = retired.abstract_hint.clone();
    }
    if survivor.category.is_none() {
        survivor.category = retired.category;
    }

    retired.retire(&survivor.entity_id);
}

/// Union by normalized author key, preserving first-seen order. A later sighting
/// may fill in a missing affiliation but never replaces one.
fn union_authors(existing: &mut Vec<Author>, incoming: &[Author]) {
    for author in incoming {
        let key = author.key();
        match existing.iter_mut().find(|a| a.key() == key) {
            Some(known) => {
                if known.affiliation.is_none() && author.affiliation.is_some() {
                    known.affiliation = author.affiliation.clone();
                }
            }
            None => existing.push(author.clone()),
        }
    }
}
