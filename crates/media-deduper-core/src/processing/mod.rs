// Core modules
mod content_hash;
pub mod histogram;
pub mod similarity;
pub mod video_frame;

// Expose content hash calculation
pub use content_hash::compute_content_hash;

// Expose histogram extraction and scoring
pub use histogram::{extract as extract_histogram, Histogram, BIN_SIZE};
pub use similarity::{
    confidence_square, ColorfulBias, Comparison, Fingerprint, SimilarityPolicy,
    SimilarityScorer, DEFAULT_CONFIDENCE, MIN_CONFIDENCE,
};
