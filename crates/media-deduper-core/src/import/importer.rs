use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use reqwest::blocking::Client;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::JoinHandle;

use crate::error::Result;
use crate::import::job::{ImportJob, ImportSource, ImportStatus, JobRef};
use crate::import::pipeline::{execute, ImportContext};
use crate::processing::SimilarityPolicy;
use crate::store::ItemStore;

/// Something observers of the importer are told about
#[derive(Debug, Clone)]
pub enum ImportEvent {
    JobAdded(JobRef),
    StatusChanged { job: JobRef, status: ImportStatus },
}

pub type ImportListener = Box<dyn Fn(&ImportEvent) + Send + Sync>;

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<JobRef>,
    active: Option<JobRef>,
    paused: bool,
    shutdown: bool,
}

impl QueueState {
    /// Nothing running and nothing that could start
    fn is_idle(&self) -> bool {
        self.active.is_none() && (self.jobs.is_empty() || self.paused)
    }
}

struct Shared {
    queue: Mutex<QueueState>,
    /// Signalled when work arrives, on resume and on shutdown
    wake: Condvar,
    /// Signalled whenever the worker may have become idle
    idle: Condvar,
    listeners: RwLock<Vec<ImportListener>>,
    subscribers: Mutex<Vec<Sender<ImportEvent>>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ImportEvent) {
        for listener in self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            if let Err(e) = catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                warn!("Import listener panicked: {:?}", e);
            }
        }

        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Single background worker that imports queued jobs one at a time, in order
///
/// Imports are serialized so two jobs never race on the duplicate check for
/// the same content. Dropping the importer stops the worker after the job in
/// flight; queued jobs stay `Waiting`.
pub struct ImporterThread {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl ImporterThread {
    pub fn new(
        store: Arc<dyn ItemStore>,
        policy: SimilarityPolicy,
        download_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        policy.validate()?;
        let ctx = ImportContext {
            store,
            policy,
            download_dir: download_dir.into(),
            client: Client::builder().build()?,
        };
        Ok(Self::spawn(ctx)?)
    }

    pub(crate) fn spawn(ctx: ImportContext) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState::default()),
            wake: Condvar::new(),
            idle: Condvar::new(),
            listeners: RwLock::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
        });

        let worker = shared.clone();
        let handle = std::thread::Builder::new()
            .name("media-importer".to_string())
            .spawn(move || worker_loop(worker, ctx))?;

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Append a waiting job to the queue
    ///
    /// Returns false, leaving the queue unchanged and announcing nothing, if
    /// the job has already been started or is queued already.
    pub fn enqueue(&self, job: JobRef) -> bool {
        let mut state = self.shared.lock();
        let known = state.active.as_ref().map(|active| active.id()) == Some(job.id())
            || state.jobs.iter().any(|queued| queued.id() == job.id());
        if known || job.status() != ImportStatus::Waiting {
            warn!("Job {} can not be enqueued", job.id());
            return false;
        }
        state.jobs.push_back(job.clone());
        // Announced under the queue lock so the worker can not start it first
        self.shared.emit(ImportEvent::JobAdded(job.clone()));
        drop(state);

        debug!("Enqueued job {} for {}", job.id(), job.source());
        self.shared.wake.notify_all();
        true
    }

    /// Create and enqueue a job for `source`
    pub fn import(&self, source: ImportSource) -> JobRef {
        let job = ImportJob::new(source);
        self.enqueue(job.clone());
        job
    }

    /// Remove a job that has not started yet
    ///
    /// Returns false if the job is running, finished, or was never queued.
    pub fn cancel(&self, job: &JobRef) -> bool {
        let mut state = self.shared.lock();
        let Some(position) = state.jobs.iter().position(|queued| queued.id() == job.id()) else {
            return false;
        };
        if job.status() != ImportStatus::Waiting {
            return false;
        }
        state.jobs.remove(position);
        drop(state);
        info!("Cancelled job {} for {}", job.id(), job.source());
        self.shared.idle.notify_all();
        true
    }

    /// Stop starting new jobs; the job in flight still finishes
    pub fn pause(&self) {
        self.shared.lock().paused = true;
        self.shared.idle.notify_all();
        info!("Importer paused");
    }

    pub fn resume(&self) {
        self.shared.lock().paused = false;
        self.shared.wake.notify_all();
        info!("Importer resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }

    /// Jobs still waiting, in queue order
    pub fn pending(&self) -> Vec<JobRef> {
        self.shared.lock().jobs.iter().cloned().collect()
    }

    pub fn active_job(&self) -> Option<JobRef> {
        self.shared.lock().active.clone()
    }

    /// Block until no job is running and none can start
    ///
    /// While paused this returns as soon as the job in flight finishes.
    pub fn wait_idle(&self) {
        let mut state = self.shared.lock();
        while !state.shutdown && !state.is_idle() {
            state = self
                .shared
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Register a callback for job-added and status-changed events
    ///
    /// Callbacks run on the thread that caused the event, the worker for
    /// status changes, and must not call back into the importer's queue
    /// operations: job-added events are delivered with the queue locked.
    pub fn add_listener(&self, listener: impl Fn(&ImportEvent) + Send + Sync + 'static) {
        self.shared
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(listener));
    }

    /// Channel receiving every event from now on
    pub fn subscribe(&self) -> Receiver<ImportEvent> {
        let (tx, rx) = unbounded();
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Stop the worker once the job in flight is done and wait for it
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shared.lock().shutdown = true;
        self.shared.wake.notify_all();
        self.shared.idle.notify_all();
        if handle.join().is_err() {
            error!("Importer worker terminated abnormally");
        }
        info!("Importer stopped");
    }
}

impl Drop for ImporterThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>, ctx: ImportContext) {
    debug!("Importer worker started");
    while let Some(job) = next_job(&shared) {
        if job.transition(ImportStatus::Importing) {
            shared.emit(ImportEvent::StatusChanged {
                job: job.clone(),
                status: ImportStatus::Importing,
            });

            let status = match catch_unwind(AssertUnwindSafe(|| execute(&job, &ctx))) {
                Ok(status) => status,
                Err(panic) => {
                    error!("Import {} panicked: {:?}", job.id(), panic);
                    job.set_failure("import panicked");
                    ImportStatus::FailedImport
                }
            };

            if job.transition(status) {
                info!("Job {} for {}: {}", job.id(), job.source(), status);
                shared.emit(ImportEvent::StatusChanged {
                    job: job.clone(),
                    status,
                });
            }
        }

        shared.lock().active = None;
        shared.idle.notify_all();
    }
    debug!("Importer worker exiting");
}

/// Block until a job can start, or return `None` on shutdown
fn next_job(shared: &Shared) -> Option<JobRef> {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            return None;
        }
        if !state.paused {
            if let Some(job) = state.jobs.pop_front() {
                state.active = Some(job.clone());
                return Some(job);
            }
        }
        shared.idle.notify_all();
        state = shared
            .wake
            .wait(state)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryItemStore;
    use image::{Rgba, RgbaImage};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    fn importer(store: Arc<InMemoryItemStore>, dir: &Path) -> ImporterThread {
        ImporterThread::new(store, SimilarityPolicy::default(), dir.join("downloads")).unwrap()
    }

    fn write_png(dir: &Path, name: &str, shade: u8) -> PathBuf {
        let path = dir.join(name);
        RgbaImage::from_pixel(16, 16, Rgba([shade, 255 - shade, shade / 2, 255]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_jobs_finish_in_queue_order() {
        let dir = tempdir().unwrap();
        let store = Arc::new(InMemoryItemStore::default());
        let importer = importer(store.clone(), dir.path());
        let events = importer.subscribe();

        importer.pause();
        let jobs: Vec<JobRef> = ["a.png", "b.png", "c.png"]
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let path = write_png(dir.path(), name, 40 * i as u8);
                importer.import(ImportSource::Local(path))
            })
            .collect();
        importer.resume();
        importer.wait_idle();

        let finished: Vec<_> = events
            .try_iter()
            .filter_map(|event| match event {
                ImportEvent::StatusChanged { job, status } if status.is_terminal() => {
                    Some(job.id())
                }
                _ => None,
            })
            .collect();
        let expected: Vec<_> = jobs.iter().map(|job| job.id()).collect();
        assert_eq!(finished, expected);
        assert!(jobs.iter().all(|job| job.status().is_success()));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_cancel_waiting_job() {
        let dir = tempdir().unwrap();
        let store = Arc::new(InMemoryItemStore::default());
        let importer = importer(store.clone(), dir.path());

        importer.pause();
        let kept = importer.import(ImportSource::Local(write_png(dir.path(), "kept.png", 10)));
        let dropped = importer.import(ImportSource::Local(write_png(dir.path(), "dropped.png", 90)));

        assert!(importer.cancel(&dropped));
        assert!(!importer.cancel(&dropped));
        assert_eq!(importer.pending().len(), 1);

        importer.resume();
        importer.wait_idle();

        assert_eq!(kept.status(), ImportStatus::Succeeded);
        assert_eq!(dropped.status(), ImportStatus::Waiting);
        assert!(dropped.target_path().is_none());
        assert_eq!(store.len(), 1);

        // Too late once the job has run
        assert!(!importer.cancel(&kept));
    }

    #[test]
    fn test_paused_importer_starts_nothing() {
        let dir = tempdir().unwrap();
        let store = Arc::new(InMemoryItemStore::default());
        let importer = importer(store.clone(), dir.path());

        importer.pause();
        assert!(importer.is_paused());
        let job = importer.import(ImportSource::Local(write_png(dir.path(), "a.png", 0)));

        importer.wait_idle();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(job.status(), ImportStatus::Waiting);
        assert!(store.is_empty());

        importer.resume();
        importer.wait_idle();
        assert_eq!(job.status(), ImportStatus::Succeeded);
    }

    #[test]
    fn test_listeners_see_every_transition() {
        let dir = tempdir().unwrap();
        let store = Arc::new(InMemoryItemStore::default());
        let importer = importer(store, dir.path());

        let added = Arc::new(AtomicUsize::new(0));
        let changed = Arc::new(AtomicUsize::new(0));
        {
            let added = added.clone();
            let changed = changed.clone();
            importer.add_listener(move |event| match event {
                ImportEvent::JobAdded(_) => {
                    added.fetch_add(1, Ordering::SeqCst);
                }
                ImportEvent::StatusChanged { .. } => {
                    changed.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        importer.add_listener(|_| panic!("listener failure must not stop the importer"));

        let path = write_png(dir.path(), "a.png", 0);
        let job = importer.import(ImportSource::Local(path.clone()));
        importer.wait_idle();
        let duplicate = importer.import(ImportSource::Local(path));
        importer.wait_idle();

        assert_eq!(job.status(), ImportStatus::Succeeded);
        // Same path registered twice is a store rejection
        assert_eq!(duplicate.status(), ImportStatus::FailedImport);
        assert_eq!(added.load(Ordering::SeqCst), 2);
        // Importing plus one terminal status per job
        assert_eq!(changed.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_concurrent_enqueue_announces_once() {
        let dir = tempdir().unwrap();
        let store = Arc::new(InMemoryItemStore::default());
        let importer = importer(store, dir.path());
        let events = importer.subscribe();

        importer.pause();
        let job = ImportJob::local(write_png(dir.path(), "a.png", 0));
        let accepted = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| importer.enqueue(job.clone())))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .filter(|accepted| *accepted)
                .count()
        });

        assert_eq!(accepted, 1);
        assert_eq!(importer.pending().len(), 1);
        let announced = events
            .try_iter()
            .filter(|event| matches!(event, ImportEvent::JobAdded(_)))
            .count();
        assert_eq!(announced, 1);

        importer.resume();
        importer.wait_idle();
        let first = events.try_iter().next();
        assert!(matches!(
            first,
            Some(ImportEvent::StatusChanged { status: ImportStatus::Importing, .. })
        ));
        assert_eq!(job.status(), ImportStatus::Succeeded);
    }

    #[test]
    fn test_finished_job_can_not_be_requeued() {
        let dir = tempdir().unwrap();
        let store = Arc::new(InMemoryItemStore::default());
        let importer = importer(store, dir.path());

        let job = importer.import(ImportSource::Local(write_png(dir.path(), "a.png", 0)));
        importer.wait_idle();
        assert!(!importer.enqueue(job));
    }

    #[test]
    fn test_shutdown_leaves_queued_jobs_waiting() {
        let dir = tempdir().unwrap();
        let store = Arc::new(InMemoryItemStore::default());
        let mut importer = importer(store.clone(), dir.path());

        importer.pause();
        let job = importer.import(ImportSource::Local(write_png(dir.path(), "a.png", 0)));
        importer.shutdown();
        importer.shutdown();

        assert_eq!(job.status(), ImportStatus::Waiting);
        assert!(store.is_empty());
        // Returns immediately once stopped
        importer.wait_idle();
    }
}
