mod common;

use common::{copy_file, create_plain_png, create_test_png};
use media_deduper_core::config::default_extensions;
use media_deduper_core::{
    ImportEvent, ImportJob, ImportSource, ImportStatus, ImporterThread, InMemoryItemStore,
    ItemStore, SimilarityPolicy, SqliteItemStore,
};
use std::sync::Arc;
use tempfile::tempdir;

#[test]
fn test_importing_identical_content_twice_is_a_duplicate() {
    let dir = tempdir().unwrap();
    let store = Arc::new(InMemoryItemStore::default());
    let importer =
        ImporterThread::new(store.clone(), SimilarityPolicy::default(), dir.path().join("dl"))
            .unwrap();

    let original = create_plain_png(dir.path(), "cat.png", [180, 90, 20]);
    let copy = copy_file(&original, dir.path(), "cat-again.png");

    let first = importer.import(ImportSource::Local(original));
    importer.wait_idle();
    let count = store.len();

    let second = importer.import(ImportSource::Local(copy.clone()));
    importer.wait_idle();

    assert_eq!(first.status(), ImportStatus::Succeeded);
    assert_eq!(second.status(), ImportStatus::FailedDuplicate);
    assert_eq!(second.duplicate_of(), first.item_id());
    assert_eq!(store.len(), count);
    assert!(copy.exists());
}

#[test]
fn test_similar_import_is_reported() {
    let dir = tempdir().unwrap();
    let store = Arc::new(InMemoryItemStore::default());
    let importer =
        ImporterThread::new(store.clone(), SimilarityPolicy::default(), dir.path().join("dl"))
            .unwrap();

    let a = create_test_png(dir.path(), "a.png", [40, 120, 220], 0, 0);
    let b = create_test_png(dir.path(), "b.png", [40, 120, 220], 60, 10);
    let c = create_plain_png(dir.path(), "c.png", [250, 250, 10]);

    let jobs: Vec<_> = [a, b, c]
        .into_iter()
        .map(|path| importer.import(ImportSource::Local(path)))
        .collect();
    importer.wait_idle();

    assert_eq!(jobs[0].status(), ImportStatus::Succeeded);
    assert_eq!(jobs[1].status(), ImportStatus::SucceededSimilar);
    assert_eq!(jobs[2].status(), ImportStatus::Succeeded);

    let similar = jobs[1].similar_to();
    assert_eq!(similar.len(), 1);
    assert!(similar[0].similarity >= 0.95);
    assert_eq!(
        similar[0].other(jobs[1].item_id().unwrap()),
        jobs[0].item_id()
    );
}

#[test]
fn test_import_order_and_events() {
    let dir = tempdir().unwrap();
    let store = Arc::new(InMemoryItemStore::default());
    let importer =
        ImporterThread::new(store, SimilarityPolicy::default(), dir.path().join("dl")).unwrap();
    let events = importer.subscribe();

    importer.pause();
    let jobs: Vec<_> = (0..5u8)
        .map(|i| {
            let path = create_plain_png(dir.path(), &format!("{}.png", i), [i * 50, 10, 200]);
            ImportJob::local(path)
        })
        .collect();
    for job in &jobs {
        assert!(importer.enqueue(job.clone()));
    }
    importer.resume();
    importer.wait_idle();

    let mut added = Vec::new();
    let mut finished = Vec::new();
    for event in events.try_iter() {
        match event {
            ImportEvent::JobAdded(job) => added.push(job.id()),
            ImportEvent::StatusChanged { job, status } if status.is_terminal() => {
                finished.push(job.id())
            }
            ImportEvent::StatusChanged { .. } => {}
        }
    }
    let ids: Vec<_> = jobs.iter().map(|job| job.id()).collect();
    assert_eq!(added, ids);
    assert_eq!(finished, ids);
}

#[test]
fn test_import_into_sqlite_survives_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("library.db");
    let path = create_plain_png(dir.path(), "kept.png", [10, 200, 90]);

    let item_id = {
        let store = Arc::new(SqliteItemStore::open(&db_path, default_extensions()).unwrap());
        let importer =
            ImporterThread::new(store, SimilarityPolicy::default(), dir.path().join("dl")).unwrap();
        let job = importer.import(ImportSource::Local(path.clone()));
        importer.wait_idle();
        assert_eq!(job.status(), ImportStatus::Succeeded);
        job.item_id().unwrap()
    };

    let store = Arc::new(SqliteItemStore::open(&db_path, default_extensions()).unwrap());
    let item = store.get(item_id).unwrap();
    assert_eq!(item.path(), Some(path.as_path()));
    assert!(item.is_eligible());
    assert!(item.has_no_similar());

    // The stored hash still catches a re-import of the same bytes
    let copy = copy_file(&path, dir.path(), "copy.png");
    let importer =
        ImporterThread::new(store.clone(), SimilarityPolicy::default(), dir.path().join("dl"))
            .unwrap();
    let job = importer.import(ImportSource::Local(copy));
    importer.wait_idle();
    assert_eq!(job.status(), ImportStatus::FailedDuplicate);
    assert_eq!(store.len(), 1);
}
