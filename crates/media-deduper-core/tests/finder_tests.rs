mod common;

use common::{create_grey_png, create_plain_png, create_test_png};
use media_deduper_core::config::default_extensions;
use media_deduper_core::{
    find_exact_duplicates, invalidate_similar_to, CancelToken, DuplicateFinder, ImportSource,
    ImporterThread, ItemPair, ItemRef, ItemStore, SimilarityPolicy, SqliteItemStore,
};
use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn import_all(store: &Arc<SqliteItemStore>, dir: &Path, paths: Vec<std::path::PathBuf>) {
    let importer =
        ImporterThread::new(store.clone(), SimilarityPolicy::default(), dir.join("dl")).unwrap();
    for path in paths {
        importer.import(ImportSource::Local(path));
    }
    importer.wait_idle();
}

fn find_pairs(store: &SqliteItemStore, policy: &SimilarityPolicy) -> HashSet<ItemPair> {
    let items = store.items_snapshot();
    DuplicateFinder::new(store)
        .find(&items, &items, policy, |_| {}, &CancelToken::new())
        .unwrap()
        .pairs()
        .iter()
        .map(|pair| pair.key())
        .collect()
}

fn by_name(store: &SqliteItemStore, name: &str) -> ItemRef {
    store
        .items_snapshot()
        .into_iter()
        .find(|item| item.path().and_then(|p| p.file_name()) == Some(OsStr::new(name)))
        .unwrap()
}

#[test]
fn test_library_scan_is_stable_across_runs() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SqliteItemStore::open(&dir.path().join("db"), default_extensions()).unwrap());
    import_all(
        &store,
        dir.path(),
        vec![
            create_test_png(dir.path(), "blue.png", [20, 60, 230], 0, 0),
            create_test_png(dir.path(), "blue-edit.png", [20, 60, 230], 50, 9),
            create_plain_png(dir.path(), "green.png", [20, 230, 60]),
            create_plain_png(dir.path(), "orange.png", [250, 140, 0]),
        ],
    );

    let policy = SimilarityPolicy::default();
    let first = find_pairs(&store, &policy);
    let blue = by_name(&store, "blue.png");
    let edit = by_name(&store, "blue-edit.png");
    assert_eq!(first, HashSet::from([ItemPair::new(blue.id(), edit.id())]));
    assert!(by_name(&store, "green.png").has_no_similar());

    // Flags persisted by the first run prune the second without changing it
    let reopened = SqliteItemStore::open(&dir.path().join("db"), default_extensions()).unwrap();
    assert!(by_name(&reopened, "orange.png").has_no_similar());
    assert_eq!(find_pairs(&reopened, &policy), first);
}

#[test]
fn test_ignored_pair_is_never_reported() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SqliteItemStore::open(&dir.path().join("db"), default_extensions()).unwrap());
    import_all(
        &store,
        dir.path(),
        vec![
            create_test_png(dir.path(), "a.png", [200, 30, 30], 0, 0),
            create_test_png(dir.path(), "b.png", [200, 30, 30], 40, 8),
        ],
    );
    let a = by_name(&store, "a.png");
    let b = by_name(&store, "b.png");
    store.non_duplicates().add(ItemPair::new(a.id(), b.id())).unwrap();

    let reopened = SqliteItemStore::open(&dir.path().join("db"), default_extensions()).unwrap();
    assert!(find_pairs(&reopened, &SimilarityPolicy::with_confidence(0.9)).is_empty());
}

#[test]
fn test_black_and_white_toggle() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SqliteItemStore::open(&dir.path().join("db"), default_extensions()).unwrap());
    import_all(
        &store,
        dir.path(),
        vec![
            create_grey_png(dir.path(), "grey1.png", 0),
            create_grey_png(dir.path(), "grey2.png", 1),
        ],
    );

    let mut policy = SimilarityPolicy::with_confidence(0.9);
    assert!(find_pairs(&store, &policy).is_empty());

    policy.compare_black_and_white = true;
    let pairs = find_pairs(&store, &policy);
    assert_eq!(pairs.len(), 1);
}

#[test]
fn test_exact_groups_and_invalidation() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SqliteItemStore::open(&dir.path().join("db"), default_extensions()).unwrap());
    import_all(
        &store,
        dir.path(),
        vec![create_plain_png(dir.path(), "lonely.png", [120, 20, 180])],
    );
    let lonely = by_name(&store, "lonely.png");
    assert!(lonely.has_no_similar());
    assert!(find_exact_duplicates(&store.items_snapshot()).is_empty());

    // A neighbour registered behind the importer's back
    let sibling_path = create_test_png(dir.path(), "sibling.png", [120, 20, 180], 30, 12);
    let sibling = store.register(&sibling_path).unwrap();
    let hash = media_deduper_core::processing::compute_content_hash(&sibling_path).unwrap();
    let histogram = media_deduper_core::processing::extract_histogram(&sibling_path).unwrap();
    store
        .persist_fingerprint(&sibling, hash, Some(histogram))
        .unwrap();

    // Writing the fingerprint already cleared the neighbour
    assert!(!lonely.has_no_similar());
    assert_eq!(invalidate_similar_to(store.as_ref(), &sibling).unwrap(), 0);
    let pairs = find_pairs(&store, &SimilarityPolicy::default());
    assert!(pairs.contains(&ItemPair::new(lonely.id(), sibling.id())));
}
