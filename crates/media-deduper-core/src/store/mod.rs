//! Item store seam.
//!
//! The core never owns the library: it reads and mutates items only through
//! [`ItemStore`]. Two implementations ship with the crate, an in-memory store for
//! embedding and tests and a SQLite store for the CLI.
mod catalog;
mod item;
mod memory;
mod sqlite;

pub use item::{FingerprintSnapshot, Item, ItemKind, ItemRef};
pub use memory::{InMemoryItemStore, NonDuplicateSet};
pub use sqlite::SqliteItemStore;

pub(crate) use memory::remove_file_if_present;

use std::path::Path;

use crate::error::Result;
use crate::processing::Histogram;
use crate::types::{ContentHash, ItemId, ItemPair};

/// Pairs of items the user has dismissed as "not duplicates"
pub trait NonDuplicateRegistry: Send + Sync {
    fn contains(&self, pair: ItemPair) -> bool;

    /// Returns false if the pair was already present
    fn add(&self, pair: ItemPair) -> Result<bool>;

    /// Returns false if the pair was not present
    fn remove(&self, pair: ItemPair) -> Result<bool>;

    /// Drop every pair that mentions `id`
    fn remove_all_for(&self, id: ItemId) -> Result<usize>;

    fn pairs(&self) -> Vec<ItemPair>;
}

/// Operations the duplicate engine needs from the library
pub trait ItemStore: Send + Sync {
    /// All live items, in id order
    fn items_snapshot(&self) -> Vec<ItemRef>;

    fn get(&self, id: ItemId) -> Option<ItemRef>;

    /// Any live item whose content hash equals `hash`
    fn lookup_by_hash(&self, hash: &ContentHash) -> Option<ItemRef>;

    /// Add a media file to the library
    ///
    /// Fails with [`crate::Error::StoreRejection`] for disallowed extensions,
    /// missing files and paths that are already in the library.
    fn register(&self, path: &Path) -> Result<ItemRef>;

    /// Add a group item gathering existing items
    fn create_group(&self, title: &str, members: &[ItemId]) -> Result<ItemRef>;

    /// Remove the item from the library and delete its file
    fn delete_item(&self, item: &ItemRef) -> Result<()>;

    /// Remove the item from the library, leaving its file in place
    fn forget_item(&self, item: &ItemRef) -> Result<()>;

    /// Fingerprint updates also clear the flags of neighbours the item now
    /// scores above the floor against
    fn persist_hash(&self, item: &ItemRef, hash: ContentHash) -> Result<()>;

    fn persist_histogram(&self, item: &ItemRef, histogram: Option<Histogram>) -> Result<()>;

    /// Replace hash and histogram in one step so readers never see a mix
    fn persist_fingerprint(
        &self,
        item: &ItemRef,
        hash: ContentHash,
        histogram: Option<Histogram>,
    ) -> Result<()>;

    fn persist_no_similar_flag(&self, item: &ItemRef, flag: bool) -> Result<()>;

    /// Set the flag only if the fingerprint is still at `version`
    ///
    /// Returns false, writing nothing, when the fingerprint moved on.
    fn commit_no_similar(&self, item: &ItemRef, version: u64) -> Result<bool>;

    fn non_duplicates(&self) -> &dyn NonDuplicateRegistry;
}
