//! Core functionality for importing media and finding duplicate items.
//!
//! This library provides the building blocks of a deduplicating media library:
//! - Content hashing and colour histogram fingerprints
//! - Similarity scoring with a confidence-based acceptance policy
//! - Pairwise duplicate search with memoized "no similar item" flags
//! - A serialized import queue for local files and URLs
//! - In-memory and SQLite item stores

// -- Internal Modules --
mod error;

// -- Public Re-exports --
pub use config::Config;
pub use deduplication::{
    find_exact_duplicates, invalidate_similar_to, CancelToken, DuplicateFinder, FindProgress,
    SearchOutcome,
};
pub use error::{Error, Result};
pub use import::{ImportEvent, ImportJob, ImportSource, ImportStatus, ImporterThread, JobRef};
pub use processing::{ColorfulBias, Histogram, SimilarityPolicy, SimilarityScorer};
pub use store::{InMemoryItemStore, ItemRef, ItemStore, SqliteItemStore};
pub use types::*;

// -- Public Modules --
pub mod config;
pub mod deduplication;
pub mod discovery;
pub mod import;
pub mod logging;
pub mod processing;
pub mod store;
pub mod types;
