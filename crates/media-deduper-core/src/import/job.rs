use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::types::{ItemId, SimilarPair};

/// Progress value meaning "unknown"
pub const INDETERMINATE: f64 = -1.0;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

pub type JobRef = Arc<ImportJob>;

/// Process-unique job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where an import reads its file from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSource {
    Local(PathBuf),
    Remote(String),
}

impl ImportSource {
    /// Interpret a command line argument: http(s) URLs are remote, anything else a path
    pub fn parse(value: &str) -> Self {
        let lower = value.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            ImportSource::Remote(value.to_string())
        } else {
            ImportSource::Local(PathBuf::from(value))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ImportSource::Remote(_))
    }
}

impl fmt::Display for ImportSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportSource::Local(path) => write!(f, "{}", path.display()),
            ImportSource::Remote(url) => write!(f, "{}", url),
        }
    }
}

/// Lifecycle of an import job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportStatus {
    Waiting,
    Importing,
    Succeeded,
    SucceededSimilar,
    FailedDuplicate,
    FailedImport,
}

impl ImportStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ImportStatus::Succeeded
                | ImportStatus::SucceededSimilar
                | ImportStatus::FailedDuplicate
                | ImportStatus::FailedImport
        )
    }

    pub fn is_success(self) -> bool {
        matches!(self, ImportStatus::Succeeded | ImportStatus::SucceededSimilar)
    }

    fn can_become(self, next: ImportStatus) -> bool {
        match self {
            ImportStatus::Waiting => next == ImportStatus::Importing,
            ImportStatus::Importing => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ImportStatus::Waiting => "waiting",
            ImportStatus::Importing => "importing",
            ImportStatus::Succeeded => "imported",
            ImportStatus::SucceededSimilar => "imported (similar items found)",
            ImportStatus::FailedDuplicate => "duplicate",
            ImportStatus::FailedImport => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug)]
struct JobState {
    status: ImportStatus,
    target_path: Option<PathBuf>,
    item_id: Option<ItemId>,
    similar_to: Vec<SimilarPair>,
    duplicate_of: Option<ItemId>,
    failure: Option<String>,
}

/// One ingestion request
///
/// Created in [`ImportStatus::Waiting`]. Only the importer worker moves it
/// forward, so every field other than the status is final once the job is
/// terminal.
#[derive(Debug)]
pub struct ImportJob {
    id: JobId,
    source: ImportSource,
    enqueued_at: DateTime<Utc>,
    state: Mutex<JobState>,
    /// f64 bits
    progress: AtomicU64,
}

impl ImportJob {
    pub fn new(source: ImportSource) -> JobRef {
        Arc::new(Self {
            id: JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed)),
            source,
            enqueued_at: Utc::now(),
            state: Mutex::new(JobState {
                status: ImportStatus::Waiting,
                target_path: None,
                item_id: None,
                similar_to: Vec::new(),
                duplicate_of: None,
                failure: None,
            }),
            progress: AtomicU64::new(INDETERMINATE.to_bits()),
        })
    }

    pub fn local(path: impl Into<PathBuf>) -> JobRef {
        Self::new(ImportSource::Local(path.into()))
    }

    pub fn remote(url: impl Into<String>) -> JobRef {
        Self::new(ImportSource::Remote(url.into()))
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn source(&self) -> &ImportSource {
        &self.source
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    pub fn status(&self) -> ImportStatus {
        self.lock().status
    }

    /// Fraction in `[0, 1]`, or [`INDETERMINATE`]
    pub fn progress(&self) -> f64 {
        f64::from_bits(self.progress.load(Ordering::Acquire))
    }

    /// Local file the job imports, known once the source is resolved
    pub fn target_path(&self) -> Option<PathBuf> {
        self.lock().target_path.clone()
    }

    /// Item created by a successful import
    pub fn item_id(&self) -> Option<ItemId> {
        self.lock().item_id
    }

    /// Accepted matches, best first
    pub fn similar_to(&self) -> Vec<SimilarPair> {
        self.lock().similar_to.clone()
    }

    /// Existing item with the same content, for a duplicate import
    pub fn duplicate_of(&self) -> Option<ItemId> {
        self.lock().duplicate_of
    }

    /// Why a failed import failed
    pub fn failure(&self) -> Option<String> {
        self.lock().failure.clone()
    }

    /// Move to `next` if the state machine allows it
    pub(crate) fn transition(&self, next: ImportStatus) -> bool {
        let mut state = self.lock();
        if !state.status.can_become(next) {
            warn!(
                "Job {} ignored transition {:?} -> {:?}",
                self.id, state.status, next
            );
            return false;
        }
        state.status = next;
        true
    }

    pub(crate) fn set_progress(&self, value: f64) {
        self.progress.store(value.to_bits(), Ordering::Release);
    }

    pub(crate) fn set_target_path(&self, path: &Path) {
        self.lock().target_path = Some(path.to_path_buf());
    }

    pub(crate) fn set_item_id(&self, id: ItemId) {
        self.lock().item_id = Some(id);
    }

    pub(crate) fn set_similar_to(&self, pairs: Vec<SimilarPair>) {
        self.lock().similar_to = pairs;
    }

    pub(crate) fn set_duplicate_of(&self, id: ItemId) {
        self.lock().duplicate_of = Some(id);
    }

    pub(crate) fn set_failure(&self, reason: impl Into<String>) {
        self.lock().failure = Some(reason.into());
    }

    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
