//! Bounded pairwise search for similar items.
//!
//! Every source item is scored against every target item. An item that scored
//! at or below [`MIN_CONFIDENCE`] against the whole library is flagged as having
//! no similar items and is skipped by later runs, which turns repeated full
//! scans into work proportional to what changed since the last run.
//!
//! The flag is only trusted when the run's confidence is above
//! `MIN_CONFIDENCE`, is only committed when the run saw every eligible item of
//! the library, and is tied to the fingerprint version it was computed for (see
//! [`crate::store::Item`]). Items gaining a match through a new or changed
//! neighbour are cleared with [`invalidate_similar_to`]. Items that arrive or
//! change while a search runs are swept the same way once its flags are
//! committed.
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};

use crate::deduplication::cancel::CancelToken;
use crate::error::Result;
use crate::logging::log_pair_error;
use crate::processing::{
    Comparison, Fingerprint, SimilarityPolicy, SimilarityScorer, MIN_CONFIDENCE,
};
use crate::store::{ItemRef, ItemStore};
use crate::types::{ItemId, ItemPair, SimilarPair};

/// Progress of a search, reported once per source item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindProgress {
    pub done: usize,
    pub total: usize,
}

impl FindProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.done as f64 / self.total as f64
        }
    }
}

/// How a search ended
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// Every source was scanned
    Completed(Vec<SimilarPair>),
    /// The cancel token fired; pairs found so far are not final
    Cancelled { partial: Vec<SimilarPair> },
}

impl SearchOutcome {
    pub fn pairs(&self) -> &[SimilarPair] {
        match self {
            SearchOutcome::Completed(pairs) => pairs,
            SearchOutcome::Cancelled { partial } => partial,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SearchOutcome::Cancelled { .. })
    }

    pub fn into_pairs(self) -> Vec<SimilarPair> {
        match self {
            SearchOutcome::Completed(pairs) => pairs,
            SearchOutcome::Cancelled { partial } => partial,
        }
    }
}

/// An eligible item with the fingerprint it is compared by
struct Candidate {
    item: ItemRef,
    fingerprint: Fingerprint,
    version: u64,
    flagged: bool,
}

impl Candidate {
    fn id(&self) -> ItemId {
        self.item.id()
    }
}

/// Eligible, de-duplicated candidates in input order
fn candidates(items: &[ItemRef], trust_flags: bool) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| !item.is_group() && !item.is_removed())
        .filter(|item| seen.insert(item.id()))
        .filter_map(|item| {
            let flagged = trust_flags && item.has_no_similar();
            let snapshot = item.snapshot();
            if !snapshot.fingerprint.is_eligible() {
                return None;
            }
            Some(Candidate {
                item: item.clone(),
                fingerprint: snapshot.fingerprint,
                version: snapshot.version,
                flagged,
            })
        })
        .collect()
}

struct Search {
    outcome: SearchOutcome,
    /// Sources that scored nothing above the floor, with the version they were read at
    unmatched: Vec<(ItemRef, u64)>,
    /// Whether the targets covered every eligible item in the store
    covered_library: bool,
    /// Fingerprint version of every target as it was read
    target_versions: HashMap<ItemId, u64>,
}

/// Orchestrates similarity searches over a store
pub struct DuplicateFinder<'a> {
    store: &'a dyn ItemStore,
}

impl<'a> DuplicateFinder<'a> {
    pub fn new(store: &'a dyn ItemStore) -> Self {
        Self { store }
    }

    /// Find accepted pairs between `compare_from` and `compare_to`
    ///
    /// Ineligible items (no histogram, groups, removed items) are skipped
    /// silently. Pairs in the non-duplicate registry are never returned. Flags
    /// are committed to the store only when the search completes.
    pub fn find(
        &self,
        compare_from: &[ItemRef],
        compare_to: &[ItemRef],
        policy: &SimilarityPolicy,
        progress: impl FnMut(FindProgress),
        cancel: &CancelToken,
    ) -> Result<SearchOutcome> {
        policy.validate()?;

        let search = self.search(
            compare_from,
            compare_to,
            policy,
            policy.allows_pruning(),
            progress,
            cancel,
        );

        if search.outcome.is_cancelled() {
            info!(
                "Similarity search cancelled after {} pairs",
                search.outcome.pairs().len()
            );
            return Ok(search.outcome);
        }

        if search.covered_library {
            let flagged = self.commit_flags(&search.unmatched);
            debug!("Flagged {} items as having no similar items", flagged);
            self.sweep_late_changes(&search.target_versions)?;
        }

        info!(
            "Similarity search found {} pairs",
            search.outcome.pairs().len()
        );
        Ok(search.outcome)
    }

    /// Recompute every item's flag from scratch, ignoring existing flags
    ///
    /// Returns the number of items flagged, or `None` if cancelled, in which
    /// case no flag is touched.
    pub fn rebuild_similarity_cache(
        &self,
        progress: impl FnMut(FindProgress),
        cancel: &CancelToken,
    ) -> Result<Option<usize>> {
        let items = self.store.items_snapshot();
        let policy = SimilarityPolicy::default();
        let search = self.search(&items, &items, &policy, false, progress, cancel);
        if search.outcome.is_cancelled() {
            info!("Similarity cache rebuild cancelled");
            return Ok(None);
        }

        let unmatched: HashSet<ItemId> = search
            .unmatched
            .iter()
            .map(|(item, _)| item.id())
            .collect();
        for item in items.iter().filter(|item| !unmatched.contains(&item.id())) {
            self.store.persist_no_similar_flag(item, false)?;
        }
        let flagged = self.commit_flags(&search.unmatched);
        self.sweep_late_changes(&search.target_versions)?;

        info!(
            "Similarity cache rebuilt: {} of {} items have no similar items",
            flagged,
            items.len()
        );
        Ok(Some(flagged))
    }

    fn commit_flags(&self, unmatched: &[(ItemRef, u64)]) -> usize {
        let mut flagged = 0;
        for (item, version) in unmatched {
            // Refused when the fingerprint changed while the search ran
            match self.store.commit_no_similar(item, *version) {
                Ok(true) => flagged += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to persist flag for item {}: {}", item.id(), e),
            }
        }
        flagged
    }

    /// Invalidate around items the search did not see at their current version
    ///
    /// An item imported or re-fingerprinted during the search ran its own
    /// invalidation before the flags above existed, so it is repeated here.
    /// Anything changing after this snapshot invalidates against the committed
    /// flags itself.
    fn sweep_late_changes(&self, target_versions: &HashMap<ItemId, u64>) -> Result<()> {
        let late: Vec<ItemRef> = self
            .store
            .items_snapshot()
            .into_iter()
            .filter(|item| item.is_eligible())
            .filter(|item| target_versions.get(&item.id()) != Some(&item.version()))
            .collect();

        let mut cleared = 0;
        for item in &late {
            cleared += invalidate_similar_to(self.store, item)?;
        }
        if !late.is_empty() {
            debug!(
                "{} items changed during the search; cleared {} flags",
                late.len(),
                cleared
            );
        }
        Ok(())
    }

    fn search(
        &self,
        compare_from: &[ItemRef],
        compare_to: &[ItemRef],
        policy: &SimilarityPolicy,
        trust_flags: bool,
        mut progress: impl FnMut(FindProgress),
        cancel: &CancelToken,
    ) -> Search {
        let scorer = SimilarityScorer::new(*policy);
        let registry = self.store.non_duplicates();

        let sources = candidates(compare_from, trust_flags);
        let targets = candidates(compare_to, trust_flags);
        let target_ids: HashSet<ItemId> = targets.iter().map(Candidate::id).collect();
        let target_versions: HashMap<ItemId, u64> =
            targets.iter().map(|t| (t.id(), t.version)).collect();

        let covered_library = self
            .store
            .items_snapshot()
            .iter()
            .filter(|item| item.is_eligible())
            .all(|item| target_ids.contains(&item.id()));

        debug!(
            "Searching {} sources against {} targets (confidence {}, flags trusted: {})",
            sources.len(),
            targets.len(),
            policy.confidence,
            trust_flags
        );

        let total = sources.len();
        let mut pairs = Vec::new();
        let mut seen: HashSet<ItemPair> = HashSet::new();
        let mut scanned: HashSet<ItemId> = HashSet::new();
        let mut touched: HashSet<ItemId> = HashSet::new();
        let mut unmatched = Vec::new();

        for (index, a) in sources.iter().enumerate() {
            if cancel.is_cancelled() {
                return Search {
                    outcome: SearchOutcome::Cancelled { partial: pairs },
                    unmatched: Vec::new(),
                    covered_library,
                    target_versions,
                };
            }

            if !a.flagged {
                let a_is_target = target_ids.contains(&a.id());
                let results: Vec<(usize, Result<Option<Comparison>>)> = targets
                    .par_iter()
                    .enumerate()
                    .filter(|(_, b)| b.id() != a.id() && !b.flagged)
                    // Already scored the other way round
                    .filter(|(_, b)| !(a_is_target && scanned.contains(&b.id())))
                    .filter_map(|(j, b)| {
                        if cancel.is_cancelled() {
                            return None;
                        }
                        Some((j, scorer.evaluate(&a.fingerprint, &b.fingerprint)))
                    })
                    .collect();

                if cancel.is_cancelled() {
                    return Search {
                        outcome: SearchOutcome::Cancelled { partial: pairs },
                        unmatched: Vec::new(),
                        covered_library,
                        target_versions,
                    };
                }

                for (j, result) in results {
                    let b = &targets[j];
                    match result {
                        Ok(Some(comparison)) => {
                            if comparison.raw_score > MIN_CONFIDENCE {
                                touched.insert(a.id());
                                touched.insert(b.id());
                            }
                            let key = ItemPair::new(a.id(), b.id());
                            if comparison.accepted
                                && !registry.contains(key)
                                && seen.insert(key)
                            {
                                pairs.push(SimilarPair::new(a.id(), b.id(), comparison.score));
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            log_pair_error(a.id(), b.id(), &e);
                            // Unknown score: never prune on it
                            touched.insert(a.id());
                            touched.insert(b.id());
                        }
                    }
                }

                scanned.insert(a.id());
                if !touched.contains(&a.id()) {
                    unmatched.push((a.item.clone(), a.version));
                }
            }

            progress(FindProgress {
                done: index + 1,
                total,
            });
        }

        Search {
            outcome: SearchOutcome::Completed(pairs),
            unmatched,
            covered_library,
            target_versions,
        }
    }
}

/// Clear the flag of every item that scores above the floor against `item`
///
/// Call after `item` is added or its fingerprint changes. Returns how many
/// flags were cleared.
pub fn invalidate_similar_to(store: &dyn ItemStore, item: &ItemRef) -> Result<usize> {
    let fingerprint = item.fingerprint();
    let scorer = SimilarityScorer::new(SimilarityPolicy::default());
    let mut cleared = 0;

    for other in store.items_snapshot() {
        if other.id() == item.id() || !other.has_no_similar() {
            continue;
        }
        match scorer.evaluate(&fingerprint, &other.fingerprint()) {
            Ok(Some(comparison)) if comparison.raw_score > MIN_CONFIDENCE => {
                store.persist_no_similar_flag(&other, false)?;
                cleared += 1;
            }
            Ok(_) => {}
            Err(e) => {
                log_pair_error(item.id(), other.id(), &e);
                store.persist_no_similar_flag(&other, false)?;
                cleared += 1;
            }
        }
    }

    Ok(cleared)
}
