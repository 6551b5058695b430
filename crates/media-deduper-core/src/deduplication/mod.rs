//! Duplicate detection over the item store.
//!
//! - [`find_exact_duplicates`]: groups byte-identical items by content hash
//! - [`DuplicateFinder`]: memoized pairwise similarity search
//! - [`invalidate_similar_to`]: keeps the memoization sound after items change
mod cancel;
mod exact;
mod finder;

pub use cancel::CancelToken;
pub use exact::find_exact_duplicates;
pub use finder::{invalidate_similar_to, DuplicateFinder, FindProgress, SearchOutcome};
