//! Run orchestration.
//!
//! Drives each raw record through normalize → resolve → merge/create →
//! classify → aggregate in strict sequence. Across entities the arrival order
//! is arbitrary, but every record sees the full candidate pool including
//! everything merged earlier in the run. Failures stay local to the record
//! that caused them; only store unavailability at seed time fails the run.

use crate::aggregate::{Aggregator, Directory};
use crate::classify::{Classifier, ModelClient};
use crate::error::{AcadError, Result};
use crate::merge;
use crate::normalize::{self, RawRecord};
use crate::resolve::{CandidatePool, ResolverConfig};
use crate::store::PublicationStore;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};

/// Counters for one reporting run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunStats {
    pub records_processed: u64,
    pub entities_created: u64,
    pub records_merged: u64,
    pub entities_unioned: u64,
    pub malformed_skipped: u64,
    pub classification_degraded: u64,
    pub record_failures: u64,
}

/// The reconciliation pipeline: candidate pool, classifier, aggregator, and
/// store wired together for one run.
pub struct Pipeline<S, C, D> {
    store: S,
    classifier: Classifier<C>,
    aggregator: Aggregator<D>,
    pool: CandidatePool,
    stats: RunStats,
}

impl<S, C, D> Pipeline<S, C, D>
where
    S: PublicationStore,
    C: ModelClient,
    D: Directory,
{
    pub fn new(
        store: S,
        classifier: Classifier<C>,
        aggregator: Aggregator<D>,
        resolver_config: ResolverConfig,
    ) -> Self {
        Self {
            store,
            classifier,
            aggregator,
            pool: CandidatePool::new(resolver_config),
            stats: RunStats::default(),
        }
    }

    /// Seed the candidate pool and the classification cache from persisted
    /// entities matching the year prefilter (expanded by one on both sides for
    /// tier-3 slack).
    ///
    /// # Errors
    ///
    /// Store failure here is run-fatal: without the persisted candidate set,
    /// every subsequent match decision would be wrong.
    pub async fn seed(&mut self, year_lo: i32, year_hi: i32) -> Result<()> {
        let candidates = self
            .store
            .query_candidates(year_lo - 1, year_hi + 1)
            .await?;
        let count = candidates.len();
        for publication in candidates {
            if let Some(category) = publication.category {
                self.classifier
                    .seed_cache(publication.content_hash(), category);
            }
            self.pool.seed(publication);
        }
        info!(seeded = count, year_lo, year_hi, "Candidate pool seeded from store");
        Ok(())
    }

    /// Consume one provider's record stream. Record-local failures are counted
    /// and logged; the stream is always drained.
    pub async fn ingest<St>(&mut self, mut records: St)
    where
        St: Stream<Item = RawRecord> + Unpin,
    {
        while let Some(record) = records.next().await {
            let provider = record.provider;
            let raw_id = record.raw_id.clone();
            match self.process_record(record).await {
                Ok(()) => {}
                Err(AcadError::MalformedRecord(msg)) => {
                    warn!(%provider, raw_id = %raw_id, reason = %msg, "Skipping malformed record");
                    self.stats.malformed_skipped += 1;
                }
                Err(e) => {
                    error!(%provider, raw_id = %raw_id, error = %e, "Record processing failed");
                    self.stats.record_failures += 1;
                }
            }
        }
    }

    /// Process a single raw record end to end.
    pub async fn process_record(&mut self, record: RawRecord) -> Result<()> {
        self.stats.records_processed += 1;
        let draft = normalize::normalize(&record)?;

        let entity_id = match self.pool.resolve(&draft) {
            Some(candidate) => {
                let mut entity_id = self.pool.canonical_id(&candidate.entity_id);
                if let Some(entity) = self.pool.get_mut(&entity_id) {
                    merge::merge_draft(entity, &draft);
                }
                self.stats.records_merged += 1;

                // An adopted identifier can reveal that another pooled entity
                // is the same work; so can the merged-in author set.
                if let Some(holder) = self.pool.register_identifier(&entity_id) {
                    if let Some(survivor) = self.union_entities(&entity_id, &holder).await {
                        entity_id = survivor;
                    }
                }
                for other in self.pool.find_equivalents(&entity_id) {
                    if let Some(survivor) = self.union_entities(&entity_id, &other).await {
                        entity_id = survivor;
                    }
                }
                entity_id
            }
            None => {
                self.stats.entities_created += 1;
                self.pool.insert_new(&draft)
            }
        };

        let canonical = self.pool.canonical_id(&entity_id);

        // Classify once per canonical entity; the cache makes this idempotent
        // across providers and runs.
        let needs_category = self
            .pool
            .get(&canonical)
            .map(|p| p.category.is_none())
            .unwrap_or(false);
        if needs_category {
            let snapshot = self
                .pool
                .get(&canonical)
                .cloned()
                .ok_or_else(|| AcadError::Validation(format!("entity {} vanished", canonical)))?;
            let category = self.classifier.classify(&snapshot).await;
            if let Some(entity) = self.pool.get_mut(&canonical) {
                entity.category = Some(category);
            }
        }

        if let Some(entity) = self.pool.get(&canonical).cloned() {
            self.aggregator.fold(&entity);
            self.store.upsert(&entity).await?;
        }
        Ok(())
    }

    /// Union two entities proven identical, persisting the tombstone.
    async fn union_entities(&mut self, left: &str, right: &str) -> Option<String> {
        let left_id = self.pool.canonical_id(left);
        let right_id = self.pool.canonical_id(right);
        if left_id == right_id {
            return Some(left_id);
        }
        let survivor = self.pool.union(&left_id, &right_id)?;
        let retired = if survivor == left_id { right_id } else { left_id };
        self.stats.entities_unioned += 1;
        info!(survivor = %survivor, retired = %retired, "Merged equivalent entities");

        if let Some(tombstone) = self.pool.get(&retired).cloned() {
            if let Err(e) = self.store.upsert(&tombstone).await {
                warn!(entity = %retired, error = %e, "Failed to persist tombstone");
            }
        }
        Some(survivor)
    }

    /// Recompute the accumulators from the pool's live entities. Used after a
    /// run that unioned entities, where incremental totals can lag merges.
    pub fn rebuild_aggregates(&mut self) {
        let live: Vec<_> = self.pool.entities().filter(|p| p.is_live()).cloned().collect();
        self.aggregator.rebuild(live.iter());
        info!(entities = live.len(), "Rebuilt accumulators from live entities");
    }

    /// Close out the run and return its counters.
    pub fn finish(&mut self) -> RunStats {
        self.stats.classification_degraded = self.classifier.failures().len() as u64;
        info!(
            processed = self.stats.records_processed,
            created = self.stats.entities_created,
            merged = self.stats.records_merged,
            unioned = self.stats.entities_unioned,
            malformed = self.stats.malformed_skipped,
            degraded = self.stats.classification_degraded,
            failed = self.stats.record_failures,
            "Run complete"
        );
        self.stats.clone()
    }

    pub fn pool(&self) -> &CandidatePool {
        &self.pool
    }

    pub fn aggregator(&self) -> &Aggregator<D> {
        &self.aggregator
    }

    pub fn classifier(&self) -> &Classifier<C> {
        &self.classifier
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }
}
