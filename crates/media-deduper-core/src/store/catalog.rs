use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use crate::error::{Error, Result};
use crate::store::item::ItemRef;
use crate::types::{ContentHash, ItemId};

/// In-memory index of live items shared by the store implementations
#[derive(Debug, Default)]
pub(crate) struct Catalog {
    inner: RwLock<Indexes>,
}

#[derive(Debug, Default)]
struct Indexes {
    items: BTreeMap<ItemId, ItemRef>,
    by_path: HashMap<PathBuf, ItemId>,
    by_hash: HashMap<ContentHash, BTreeSet<ItemId>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that `path` may join the library
    pub fn check_registrable(&self, path: &Path, allowed_extensions: &[String]) -> Result<()> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .unwrap_or_default();
        if !allowed_extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&ext)) {
            return Err(rejection(path, format!("extension '{}' is not allowed", ext)));
        }

        if !path.is_file() {
            return Err(rejection(path, "file does not exist".to_string()));
        }

        let indexes = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = indexes.by_path.get(path) {
            return Err(rejection(
                path,
                format!("path is already in the library as item {}", existing),
            ));
        }
        Ok(())
    }

    pub fn insert(&self, item: ItemRef) {
        let mut indexes = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(path) = item.path() {
            indexes.by_path.insert(path.to_path_buf(), item.id());
        }
        if let Some(hash) = item.content_hash() {
            indexes.by_hash.entry(hash).or_default().insert(item.id());
        }
        indexes.items.insert(item.id(), item);
    }

    pub fn remove(&self, id: ItemId) -> Option<ItemRef> {
        let mut indexes = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let item = indexes.items.remove(&id)?;
        if let Some(path) = item.path() {
            indexes.by_path.remove(path);
        }
        if let Some(hash) = item.content_hash() {
            unindex_hash(&mut indexes, hash, id);
        }
        item.mark_removed();
        Some(item)
    }

    pub fn snapshot(&self) -> Vec<ItemRef> {
        let indexes = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        indexes.items.values().cloned().collect()
    }

    pub fn get(&self, id: ItemId) -> Option<ItemRef> {
        let indexes = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        indexes.items.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        let indexes = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        indexes.items.len()
    }

    pub fn lookup_by_hash(&self, hash: &ContentHash) -> Option<ItemRef> {
        let indexes = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let id = indexes.by_hash.get(hash)?.iter().next()?;
        indexes.items.get(id).cloned()
    }

    /// Apply a fingerprint change and keep the hash index in step
    pub fn update(&self, item: &ItemRef, change: impl FnOnce(&ItemRef)) -> Result<()> {
        let mut indexes = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if !indexes.items.contains_key(&item.id()) {
            return Err(Error::ItemNotFound(item.id()));
        }

        let before = item.content_hash();
        change(item);
        let after = item.content_hash();

        if before != after {
            if let Some(old) = before {
                unindex_hash(&mut indexes, old, item.id());
            }
            if let Some(new) = after {
                indexes.by_hash.entry(new).or_default().insert(item.id());
            }
        }
        Ok(())
    }
}

fn unindex_hash(indexes: &mut Indexes, hash: ContentHash, id: ItemId) {
    if let Some(ids) = indexes.by_hash.get_mut(&hash) {
        ids.remove(&id);
        if ids.is_empty() {
            indexes.by_hash.remove(&hash);
        }
    }
}

fn rejection(path: &Path, reason: String) -> Error {
    Error::StoreRejection {
        path: path.to_path_buf(),
        reason,
    }
}
