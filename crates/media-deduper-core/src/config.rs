use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::processing::SimilarityPolicy;

/// Extensions accepted into the library unless configured otherwise
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff", "mp4", "webm", "mkv", "avi",
    "mov", "flv", "wmv",
];

pub fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect()
}

/// Log level for the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Configuration for the media library and its duplicate checks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the item database
    pub database_path: PathBuf,

    /// Where remote imports are downloaded to
    pub download_dir: PathBuf,

    /// Directory for rolling log files
    pub log_dir: PathBuf,

    /// File extensions the library accepts
    pub allowed_extensions: Vec<String>,

    /// Policy used when a command does not override it
    pub similarity: SimilarityPolicy,

    /// Log level
    pub log_level: LogLevel,
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("media-deduper")
}

impl Default for Config {
    fn default() -> Self {
        let base = data_dir();
        Self {
            database_path: base.join("library.db"),
            download_dir: base.join("downloads"),
            log_dir: base.join("logs"),
            allowed_extensions: default_extensions(),
            similarity: SimilarityPolicy::default(),
            log_level: LogLevel::Info,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| Error::Configuration(format!("Failed to open config file: {}", e)))?;

        let config: Config = serde_json::from_reader(file)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {}", e)))?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .map_err(|e| Error::Configuration(format!("Failed to create config file: {}", e)))?;

        serde_json::to_writer_pretty(file, self)
            .map_err(|e| Error::Configuration(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.similarity.validate()?;

        if self.allowed_extensions.is_empty() {
            return Err(Error::Configuration(
                "At least one allowed extension is required".to_string(),
            ));
        }

        if self.allowed_extensions.iter().any(|ext| ext.starts_with('.')) {
            return Err(Error::Configuration(
                "Extensions are listed without a leading dot".to_string(),
            ));
        }

        Ok(())
    }
}
