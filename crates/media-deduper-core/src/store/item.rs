use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::processing::{Fingerprint, Histogram};
use crate::types::{ContentHash, ItemId, MediaFormat};

pub type ItemRef = Arc<Item>;

/// What an item is
#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    /// A single file in the library
    Media { path: PathBuf, format: MediaFormat },
    /// A collection of other items; never compared
    Group { title: String, members: Vec<ItemId> },
}

/// Fingerprint together with the version it was read at
#[derive(Debug, Clone)]
pub struct FingerprintSnapshot {
    pub fingerprint: Fingerprint,
    pub version: u64,
}

#[derive(Debug, Default)]
struct FingerprintState {
    fingerprint: Fingerprint,
    version: u64,
}

/// A library item as seen by the duplicate engine
///
/// Hash and histogram live behind one lock and move together. Every change to
/// them bumps `version`. The "no similar items" flag records the version it was
/// computed for and reads as unset once the fingerprint has moved on.
#[derive(Debug)]
pub struct Item {
    id: ItemId,
    kind: ItemKind,
    added_at: DateTime<Utc>,
    state: RwLock<FingerprintState>,
    // version + 1 when set, 0 when unset
    no_similar_at: AtomicU64,
    removed: AtomicBool,
}

impl Item {
    pub fn new_media(id: ItemId, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = MediaFormat::from_path(&path);
        Self::new(id, ItemKind::Media { path, format }, Utc::now())
    }

    pub fn new_group(id: ItemId, title: impl Into<String>, members: Vec<ItemId>) -> Self {
        Self::new(
            id,
            ItemKind::Group {
                title: title.into(),
                members,
            },
            Utc::now(),
        )
    }

    pub(crate) fn new(id: ItemId, kind: ItemKind, added_at: DateTime<Utc>) -> Self {
        Self {
            id,
            kind,
            added_at,
            state: RwLock::new(FingerprintState::default()),
            no_similar_at: AtomicU64::new(0),
            removed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn kind(&self) -> &ItemKind {
        &self.kind
    }

    pub fn added_at(&self) -> DateTime<Utc> {
        self.added_at
    }

    /// File backing a media item
    pub fn path(&self) -> Option<&Path> {
        match &self.kind {
            ItemKind::Media { path, .. } => Some(path),
            ItemKind::Group { .. } => None,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, ItemKind::Group { .. })
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.snapshot().fingerprint
    }

    pub fn snapshot(&self) -> FingerprintSnapshot {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        FingerprintSnapshot {
            fingerprint: state.fingerprint.clone(),
            version: state.version,
        }
    }

    pub fn content_hash(&self) -> Option<ContentHash> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.fingerprint.content_hash
    }

    pub fn version(&self) -> u64 {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.version
    }

    /// Comparable and still in the library
    pub fn is_eligible(&self) -> bool {
        if self.is_group() || self.is_removed() {
            return false;
        }
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.fingerprint.is_eligible()
    }

    pub fn has_no_similar(&self) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        self.no_similar_at.load(Ordering::Acquire) == state.version + 1
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub(crate) fn set_content_hash(&self, hash: Option<ContentHash>) {
        self.mutate(|fp| fp.content_hash = hash);
    }

    pub(crate) fn set_histogram(&self, histogram: Option<Histogram>) {
        self.mutate(|fp| fp.histogram = histogram.map(Arc::new));
    }

    pub(crate) fn set_fingerprint(&self, fingerprint: Fingerprint) {
        self.mutate(|fp| *fp = fingerprint);
    }

    /// Set the flag only if the fingerprint is still at `version`
    pub(crate) fn mark_no_similar(&self, version: u64) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.version != version {
            return false;
        }
        self.no_similar_at.store(version + 1, Ordering::Release);
        true
    }

    pub(crate) fn clear_no_similar(&self) {
        self.no_similar_at.store(0, Ordering::Release);
    }

    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
        self.clear_no_similar();
    }

    fn mutate(&self, change: impl FnOnce(&mut Fingerprint)) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        change(&mut state.fingerprint);
        state.version += 1;
        self.no_similar_at.store(0, Ordering::Release);
    }
}
