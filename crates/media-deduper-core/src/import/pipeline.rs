//! The ordered steps one import job runs through.
use log::{debug, info, warn};
use reqwest::blocking::Client;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::import::download::download;
use crate::import::job::{ImportJob, ImportSource, ImportStatus, INDETERMINATE};
use crate::logging::{log_hash_error, log_pair_error};
use crate::processing::{
    compute_content_hash, extract_histogram, Histogram, SimilarityPolicy, SimilarityScorer,
    MIN_CONFIDENCE,
};
use crate::store::{remove_file_if_present, ItemRef, ItemStore};
use crate::types::{ItemPair, SimilarPair};

/// Everything a job needs besides itself
pub(crate) struct ImportContext {
    pub store: Arc<dyn ItemStore>,
    pub policy: SimilarityPolicy,
    pub download_dir: PathBuf,
    pub client: Client,
}

/// Where the file being imported came from
struct Resolved {
    path: PathBuf,
    downloaded: bool,
}

/// Run `job` to a terminal status
///
/// Failures are recorded on the job and reported as
/// [`ImportStatus::FailedImport`]; this never returns a non-terminal status.
pub(crate) fn execute(job: &ImportJob, ctx: &ImportContext) -> ImportStatus {
    let status = match run(job, ctx) {
        Ok(status) => status,
        Err(e) => {
            warn!("Import {} of {} failed: {}", job.id(), job.source(), e);
            job.set_failure(e.to_string());
            ImportStatus::FailedImport
        }
    };
    job.set_progress(1.0);
    status
}

fn run(job: &ImportJob, ctx: &ImportContext) -> Result<ImportStatus> {
    let resolved = resolve(job, ctx)?;
    job.set_target_path(&resolved.path);

    let item = match ctx.store.register(&resolved.path) {
        Ok(item) => item,
        Err(e) => {
            if resolved.downloaded {
                remove_file_if_present(&resolved.path)?;
            }
            return Err(e);
        }
    };

    match fingerprint_and_compare(job, ctx, &item, &resolved.path) {
        Ok(ImportStatus::FailedDuplicate) => {
            discard(ctx, &item, &resolved)?;
            Ok(ImportStatus::FailedDuplicate)
        }
        Ok(status) => Ok(status),
        Err(e) => {
            // Never leave a half-imported item behind
            if let Err(cleanup) = discard(ctx, &item, &resolved) {
                warn!("Failed to discard item {}: {}", item.id(), cleanup);
            }
            Err(e)
        }
    }
}

fn resolve(job: &ImportJob, ctx: &ImportContext) -> Result<Resolved> {
    match job.source() {
        ImportSource::Local(path) => Ok(Resolved {
            path: path.clone(),
            downloaded: false,
        }),
        ImportSource::Remote(url) => {
            let path = download(&ctx.client, url, &ctx.download_dir, |done, total| {
                job.set_progress(match total {
                    Some(total) if total > 0 => done as f64 / total as f64,
                    _ => INDETERMINATE,
                });
            })?;
            job.set_progress(INDETERMINATE);
            Ok(Resolved {
                path,
                downloaded: true,
            })
        }
    }
}

/// Remove an item this job created; downloaded files go too
fn discard(ctx: &ImportContext, item: &ItemRef, resolved: &Resolved) -> Result<()> {
    if resolved.downloaded {
        ctx.store.delete_item(item)
    } else {
        ctx.store.forget_item(item)
    }
}

fn fingerprint_and_compare(
    job: &ImportJob,
    ctx: &ImportContext,
    item: &ItemRef,
    path: &Path,
) -> Result<ImportStatus> {
    let hash = compute_content_hash(path).map_err(|e| {
        log_hash_error(path, &e);
        e
    })?;
    let histogram = histogram_if_available(path);

    if let Some(existing) = ctx
        .store
        .lookup_by_hash(&hash)
        .filter(|existing| existing.id() != item.id())
    {
        info!(
            "{} duplicates item {} ({})",
            path.display(),
            existing.id(),
            hash
        );
        job.set_duplicate_of(existing.id());
        return Ok(ImportStatus::FailedDuplicate);
    }

    ctx.store.persist_fingerprint(item, hash, histogram)?;

    let similar = compare_with_library(ctx, item)?;
    job.set_item_id(item.id());
    if similar.is_empty() {
        Ok(ImportStatus::Succeeded)
    } else {
        debug!("Item {} has {} similar items", item.id(), similar.len());
        job.set_similar_to(similar);
        Ok(ImportStatus::SucceededSimilar)
    }
}

fn histogram_if_available(path: &Path) -> Option<Histogram> {
    match extract_histogram(path) {
        Ok(histogram) => Some(histogram),
        Err(Error::UnsupportedFormat(format)) => {
            debug!("No histogram for {} ({})", path.display(), format);
            None
        }
        Err(e) => {
            warn!("Histogram extraction failed for {}: {}", path.display(), e);
            None
        }
    }
}

/// Score the new item against every other item in the store
///
/// Neighbours above the floor already lost their flag when the fingerprint was
/// persisted. The new item gets one when nothing scored above the floor.
fn compare_with_library(ctx: &ImportContext, item: &ItemRef) -> Result<Vec<SimilarPair>> {
    let snapshot = item.snapshot();
    if !snapshot.fingerprint.is_eligible() {
        return Ok(Vec::new());
    }

    let scorer = SimilarityScorer::new(ctx.policy);
    let registry = ctx.store.non_duplicates();
    let mut similar = Vec::new();
    let mut touched = false;

    for other in ctx.store.items_snapshot() {
        if other.id() == item.id() {
            continue;
        }
        match scorer.evaluate(&snapshot.fingerprint, &other.fingerprint()) {
            Ok(Some(comparison)) => {
                if comparison.raw_score > MIN_CONFIDENCE {
                    touched = true;
                }
                if comparison.accepted && !registry.contains(ItemPair::new(item.id(), other.id())) {
                    similar.push(SimilarPair::new(item.id(), other.id(), comparison.score));
                }
            }
            Ok(None) => {}
            Err(e) => {
                log_pair_error(item.id(), other.id(), &e);
                touched = true;
            }
        }
    }

    if !touched {
        ctx.store.commit_no_similar(item, snapshot.version)?;
    }

    similar.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
    });
    Ok(similar)
}
