use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Custom error types for the media-deduper library
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (download target, hashing, decoding)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding error
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Remote source could not be fetched
    #[error("Download error: {0}")]
    Download(#[from] reqwest::Error),

    /// Remote source is not a usable URL
    #[error("Invalid URL {0}")]
    InvalidUrl(String),

    /// File not found error
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Item is not (or no longer) in the library
    #[error("Item {0} is not in the library")]
    ItemNotFound(crate::types::ItemId),

    /// Histogram extraction is not available for this file
    #[error("Unsupported media format: {0}")]
    UnsupportedFormat(String),

    /// The item store refused to register a file
    #[error("Item store rejected {path}: {reason}")]
    StoreRejection { path: PathBuf, reason: String },

    /// Backing database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Histogram blob could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Histogram channels are malformed
    #[error("Invalid histogram: {0}")]
    InvalidHistogram(String),

    /// Invalid configuration error
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl From<bincode::error::EncodeError> for Error {
    fn from(err: bincode::error::EncodeError) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for Error {
    fn from(err: bincode::error::DecodeError) -> Self {
        Error::Serialization(err.to_string())
    }
}
