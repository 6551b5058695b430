use log::info;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::default_extensions;
use crate::deduplication::invalidate_similar_to;
use crate::error::Result;
use crate::logging::log_store_modification;
use crate::processing::{Fingerprint, Histogram};
use crate::store::catalog::Catalog;
use crate::store::item::{Item, ItemRef};
use crate::store::{ItemStore, NonDuplicateRegistry};
use crate::types::{ContentHash, ItemId, ItemPair};

/// Non-duplicate pairs held in memory
#[derive(Debug, Default)]
pub struct NonDuplicateSet {
    pairs: RwLock<HashSet<ItemPair>>,
}

impl NonDuplicateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_pairs(pairs: impl IntoIterator<Item = ItemPair>) -> Self {
        Self {
            pairs: RwLock::new(pairs.into_iter().collect()),
        }
    }
}

impl NonDuplicateRegistry for NonDuplicateSet {
    fn contains(&self, pair: ItemPair) -> bool {
        let pairs = self.pairs.read().unwrap_or_else(PoisonError::into_inner);
        pairs.contains(&pair)
    }

    fn add(&self, pair: ItemPair) -> Result<bool> {
        let mut pairs = self.pairs.write().unwrap_or_else(PoisonError::into_inner);
        Ok(pairs.insert(pair))
    }

    fn remove(&self, pair: ItemPair) -> Result<bool> {
        let mut pairs = self.pairs.write().unwrap_or_else(PoisonError::into_inner);
        Ok(pairs.remove(&pair))
    }

    fn remove_all_for(&self, id: ItemId) -> Result<usize> {
        let mut pairs = self.pairs.write().unwrap_or_else(PoisonError::into_inner);
        let before = pairs.len();
        pairs.retain(|pair| !pair.contains(id));
        Ok(before - pairs.len())
    }

    fn pairs(&self) -> Vec<ItemPair> {
        let pairs = self.pairs.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<_> = pairs.iter().copied().collect();
        out.sort();
        out
    }
}

/// Item store that lives entirely in memory
#[derive(Debug)]
pub struct InMemoryItemStore {
    catalog: Catalog,
    non_duplicates: NonDuplicateSet,
    allowed_extensions: Vec<String>,
    next_id: AtomicU64,
}

impl Default for InMemoryItemStore {
    fn default() -> Self {
        Self::new(default_extensions())
    }
}

impl InMemoryItemStore {
    pub fn new(allowed_extensions: Vec<String>) -> Self {
        Self {
            catalog: Catalog::new(),
            non_duplicates: NonDuplicateSet::new(),
            allowed_extensions,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert an item with a precomputed fingerprint, bypassing file checks
    pub fn insert_with_fingerprint(
        &self,
        path: impl AsRef<Path>,
        fingerprint: Fingerprint,
    ) -> ItemRef {
        let item = Arc::new(Item::new_media(self.allocate_id(), path.as_ref()));
        item.set_fingerprint(fingerprint);
        self.catalog.insert(item.clone());
        item
    }

    fn allocate_id(&self) -> ItemId {
        ItemId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl ItemStore for InMemoryItemStore {
    fn items_snapshot(&self) -> Vec<ItemRef> {
        self.catalog.snapshot()
    }

    fn get(&self, id: ItemId) -> Option<ItemRef> {
        self.catalog.get(id)
    }

    fn lookup_by_hash(&self, hash: &ContentHash) -> Option<ItemRef> {
        self.catalog.lookup_by_hash(hash)
    }

    fn register(&self, path: &Path) -> Result<ItemRef> {
        self.catalog
            .check_registrable(path, &self.allowed_extensions)?;
        let item = Arc::new(Item::new_media(self.allocate_id(), path));
        self.catalog.insert(item.clone());
        log_store_modification("register", item.id(), Some(path));
        Ok(item)
    }

    fn create_group(&self, title: &str, members: &[ItemId]) -> Result<ItemRef> {
        let item = Arc::new(Item::new_group(self.allocate_id(), title, members.to_vec()));
        self.catalog.insert(item.clone());
        log_store_modification("create_group", item.id(), None);
        Ok(item)
    }

    fn delete_item(&self, item: &ItemRef) -> Result<()> {
        self.forget_item(item)?;
        if let Some(path) = item.path() {
            remove_file_if_present(path)?;
        }
        Ok(())
    }

    fn forget_item(&self, item: &ItemRef) -> Result<()> {
        if self.catalog.remove(item.id()).is_some() {
            self.non_duplicates.remove_all_for(item.id())?;
            log_store_modification("forget", item.id(), item.path());
        }
        Ok(())
    }

    fn persist_hash(&self, item: &ItemRef, hash: ContentHash) -> Result<()> {
        self.catalog
            .update(item, |item| item.set_content_hash(Some(hash)))?;
        invalidate_similar_to(self, item)?;
        Ok(())
    }

    fn persist_histogram(&self, item: &ItemRef, histogram: Option<Histogram>) -> Result<()> {
        self.catalog.update(item, |item| item.set_histogram(histogram))?;
        invalidate_similar_to(self, item)?;
        Ok(())
    }

    fn persist_fingerprint(
        &self,
        item: &ItemRef,
        hash: ContentHash,
        histogram: Option<Histogram>,
    ) -> Result<()> {
        self.catalog.update(item, |item| {
            item.set_fingerprint(Fingerprint::new(Some(hash), histogram))
        })?;
        invalidate_similar_to(self, item)?;
        Ok(())
    }

    fn persist_no_similar_flag(&self, item: &ItemRef, flag: bool) -> Result<()> {
        if flag {
            self.commit_no_similar(item, item.version())?;
        } else {
            item.clear_no_similar();
        }
        Ok(())
    }

    fn commit_no_similar(&self, item: &ItemRef, version: u64) -> Result<bool> {
        Ok(item.mark_no_similar(version))
    }

    fn non_duplicates(&self) -> &dyn NonDuplicateRegistry {
        &self.non_duplicates
    }
}

pub(crate) fn remove_file_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!("Deleted file {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
