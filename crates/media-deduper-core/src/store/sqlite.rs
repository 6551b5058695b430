//! SQLite-backed item store.
//!
//! All items are loaded into a [`Catalog`] when the database is opened; every
//! mutation is applied to the in-memory item and written through to the
//! database in the same call. Histograms are stored as bincode blobs.
use chrono::{DateTime, Utc};
use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::deduplication::invalidate_similar_to;
use crate::error::{Error, Result};
use crate::logging::log_store_modification;
use crate::processing::{Fingerprint, Histogram};
use crate::store::catalog::Catalog;
use crate::store::item::{Item, ItemKind, ItemRef};
use crate::store::memory::{remove_file_if_present, NonDuplicateSet};
use crate::store::{ItemStore, NonDuplicateRegistry};
use crate::types::{ContentHash, ItemId, ItemPair, MediaFormat};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS items (
        id INTEGER PRIMARY KEY,
        kind TEXT NOT NULL,
        path TEXT UNIQUE,
        title TEXT,
        members TEXT,
        content_hash BLOB,
        histogram BLOB,
        has_no_similar INTEGER NOT NULL DEFAULT 0,
        added_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_items_content_hash ON items(content_hash);

    CREATE TABLE IF NOT EXISTS non_duplicates (
        first INTEGER NOT NULL,
        second INTEGER NOT NULL,
        PRIMARY KEY (first, second)
    );";

type SharedConnection = Arc<Mutex<Connection>>;

fn lock(conn: &SharedConnection) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

fn encode_histogram(histogram: Option<&Histogram>) -> Result<Option<Vec<u8>>> {
    histogram
        .map(|h| bincode::serde::encode_to_vec(h, bincode::config::standard()))
        .transpose()
        .map_err(Error::from)
}

fn decode_histogram(bytes: &[u8]) -> Result<Histogram> {
    let (histogram, _): (Histogram, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    histogram.validate()?;
    Ok(histogram)
}

/// Non-duplicate pairs persisted in the `non_duplicates` table
#[derive(Debug)]
pub struct SqliteNonDuplicates {
    conn: SharedConnection,
    cache: NonDuplicateSet,
}

impl SqliteNonDuplicates {
    fn load(conn: SharedConnection) -> Result<Self> {
        let pairs = {
            let guard = lock(&conn);
            let mut stmt = guard.prepare("SELECT first, second FROM non_duplicates")?;
            let rows = stmt.query_map([], |row| {
                Ok(ItemPair::new(
                    ItemId(row.get::<_, i64>(0)? as u64),
                    ItemId(row.get::<_, i64>(1)? as u64),
                ))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        Ok(Self {
            conn,
            cache: NonDuplicateSet::from_pairs(pairs),
        })
    }
}

impl NonDuplicateRegistry for SqliteNonDuplicates {
    fn contains(&self, pair: ItemPair) -> bool {
        self.cache.contains(pair)
    }

    fn add(&self, pair: ItemPair) -> Result<bool> {
        lock(&self.conn).execute(
            "INSERT OR IGNORE INTO non_duplicates (first, second) VALUES (?1, ?2)",
            params![pair.first().0 as i64, pair.second().0 as i64],
        )?;
        self.cache.add(pair)
    }

    fn remove(&self, pair: ItemPair) -> Result<bool> {
        lock(&self.conn).execute(
            "DELETE FROM non_duplicates WHERE first = ?1 AND second = ?2",
            params![pair.first().0 as i64, pair.second().0 as i64],
        )?;
        self.cache.remove(pair)
    }

    fn remove_all_for(&self, id: ItemId) -> Result<usize> {
        lock(&self.conn).execute(
            "DELETE FROM non_duplicates WHERE first = ?1 OR second = ?1",
            params![id.0 as i64],
        )?;
        self.cache.remove_all_for(id)
    }

    fn pairs(&self) -> Vec<ItemPair> {
        self.cache.pairs()
    }
}

/// Item store persisted in a SQLite database
#[derive(Debug)]
pub struct SqliteItemStore {
    conn: SharedConnection,
    catalog: Catalog,
    non_duplicates: SqliteNonDuplicates,
    allowed_extensions: Vec<String>,
}

impl SqliteItemStore {
    /// Open (or create) the database at `db_path` and load every item
    pub fn open(db_path: &Path, allowed_extensions: Vec<String>) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn, allowed_extensions, &db_path.display().to_string())
    }

    /// Database that disappears with the process
    pub fn open_in_memory(allowed_extensions: Vec<String>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, allowed_extensions, ":memory:")
    }

    fn from_connection(
        conn: Connection,
        allowed_extensions: Vec<String>,
        location: &str,
    ) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 10000;",
        )?;
        conn.execute_batch(SCHEMA)?;

        let catalog = Catalog::new();
        let loaded = load_items(&conn)?;
        let count = loaded.len();
        for item in loaded {
            catalog.insert(item);
        }

        let conn = Arc::new(Mutex::new(conn));
        let non_duplicates = SqliteNonDuplicates::load(conn.clone())?;

        info!("Item database opened at {} ({} items)", location, count);

        Ok(Self {
            conn,
            catalog,
            non_duplicates,
            allowed_extensions,
        })
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply a fingerprint change and write it through
    ///
    /// The connection lock is held across both steps so a concurrent flag
    /// commit lands either before the change (and is reset by it) or after it
    /// (and is refused by the version check).
    fn update_fingerprint(&self, item: &ItemRef, change: impl FnOnce(&ItemRef)) -> Result<()> {
        {
            let conn = lock(&self.conn);
            self.catalog.update(item, change)?;
            let fingerprint = item.fingerprint();
            let hash = fingerprint.content_hash.map(|h| h.as_bytes().to_vec());
            let histogram = encode_histogram(fingerprint.histogram.as_deref())?;
            conn.execute(
                "UPDATE items SET content_hash = ?1, histogram = ?2, has_no_similar = 0 WHERE id = ?3",
                params![hash, histogram, item.id().0 as i64],
            )?;
        }
        invalidate_similar_to(self, item)?;
        Ok(())
    }

    fn delete_row(&self, id: ItemId) -> Result<()> {
        lock(&self.conn).execute("DELETE FROM items WHERE id = ?1", params![id.0 as i64])?;
        Ok(())
    }
}

fn load_items(conn: &Connection) -> Result<Vec<ItemRef>> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, path, title, members, content_hash, histogram, has_no_similar, added_at
         FROM items ORDER BY id",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, Option<Vec<u8>>>(5)?,
            row.get::<_, Option<Vec<u8>>>(6)?,
            row.get::<_, bool>(7)?,
            row.get::<_, String>(8)?,
        ))
    })?;

    let mut items = Vec::new();
    for row in rows {
        let (id, kind, path, title, members, hash, histogram, no_similar, added_at) = row?;
        let id = ItemId(id as u64);

        let kind = match kind.as_str() {
            "group" => ItemKind::Group {
                title: title.unwrap_or_default(),
                members: serde_json::from_str::<Vec<u64>>(members.as_deref().unwrap_or("[]"))
                    .map_err(|e| Error::Serialization(e.to_string()))?
                    .into_iter()
                    .map(ItemId)
                    .collect(),
            },
            _ => {
                let path = PathBuf::from(path.unwrap_or_default());
                let format = MediaFormat::from_path(&path);
                ItemKind::Media { path, format }
            }
        };

        let added_at = DateTime::parse_from_rfc3339(&added_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        let content_hash = hash.as_deref().and_then(ContentHash::from_slice);
        let histogram = match histogram.as_deref().map(decode_histogram).transpose() {
            Ok(h) => h,
            Err(e) => {
                warn!("Discarding unreadable histogram of item {}: {}", id, e);
                None
            }
        };

        let item = Arc::new(Item::new(id, kind, added_at));
        item.set_fingerprint(Fingerprint::new(content_hash, histogram));
        if no_similar {
            item.mark_no_similar(item.version());
        }
        items.push(item);
    }

    Ok(items)
}

impl ItemStore for SqliteItemStore {
    fn items_snapshot(&self) -> Vec<ItemRef> {
        self.catalog.snapshot()
    }

    fn get(&self, id: ItemId) -> Option<ItemRef> {
        self.catalog.get(id)
    }

    fn lookup_by_hash(&self, hash: &ContentHash) -> Option<ItemRef> {
        self.catalog.lookup_by_hash(hash)
    }

    fn register(&self, path: &Path) -> Result<ItemRef> {
        self.catalog
            .check_registrable(path, &self.allowed_extensions)?;

        let added_at = Utc::now();
        let id = {
            let conn = lock(&self.conn);
            conn.execute(
                "INSERT INTO items (kind, path, added_at) VALUES ('media', ?1, ?2)",
                params![path.to_string_lossy().into_owned(), added_at.to_rfc3339()],
            )?;
            ItemId(conn.last_insert_rowid() as u64)
        };

        let kind = ItemKind::Media {
            path: path.to_path_buf(),
            format: MediaFormat::from_path(path),
        };
        let item = Arc::new(Item::new(id, kind, added_at));
        self.catalog.insert(item.clone());
        log_store_modification("register", id, Some(path));
        Ok(item)
    }

    fn create_group(&self, title: &str, members: &[ItemId]) -> Result<ItemRef> {
        let member_ids: Vec<u64> = members.iter().map(|id| id.0).collect();
        let members_json =
            serde_json::to_string(&member_ids).map_err(|e| Error::Serialization(e.to_string()))?;

        let added_at = Utc::now();
        let id = {
            let conn = lock(&self.conn);
            conn.execute(
                "INSERT INTO items (kind, title, members, added_at) VALUES ('group', ?1, ?2, ?3)",
                params![title, members_json, added_at.to_rfc3339()],
            )?;
            ItemId(conn.last_insert_rowid() as u64)
        };

        let kind = ItemKind::Group {
            title: title.to_string(),
            members: members.to_vec(),
        };
        let item = Arc::new(Item::new(id, kind, added_at));
        self.catalog.insert(item.clone());
        log_store_modification("create_group", id, None);
        Ok(item)
    }

    fn delete_item(&self, item: &ItemRef) -> Result<()> {
        self.forget_item(item)?;
        if let Some(path) = item.path() {
            remove_file_if_present(path)?;
        }
        Ok(())
    }

    fn forget_item(&self, item: &ItemRef) -> Result<()> {
        if self.catalog.remove(item.id()).is_some() {
            self.delete_row(item.id())?;
            self.non_duplicates.remove_all_for(item.id())?;
            log_store_modification("forget", item.id(), item.path());
        }
        Ok(())
    }

    fn persist_hash(&self, item: &ItemRef, hash: ContentHash) -> Result<()> {
        self.update_fingerprint(item, |item| item.set_content_hash(Some(hash)))
    }

    fn persist_histogram(&self, item: &ItemRef, histogram: Option<Histogram>) -> Result<()> {
        self.update_fingerprint(item, |item| item.set_histogram(histogram))
    }

    fn persist_fingerprint(
        &self,
        item: &ItemRef,
        hash: ContentHash,
        histogram: Option<Histogram>,
    ) -> Result<()> {
        self.update_fingerprint(item, |item| {
            item.set_fingerprint(Fingerprint::new(Some(hash), histogram))
        })
    }

    fn persist_no_similar_flag(&self, item: &ItemRef, flag: bool) -> Result<()> {
        if flag {
            self.commit_no_similar(item, item.version())?;
            return Ok(());
        }
        let conn = lock(&self.conn);
        item.clear_no_similar();
        conn.execute(
            "UPDATE items SET has_no_similar = 0 WHERE id = ?1",
            params![item.id().0 as i64],
        )?;
        Ok(())
    }

    fn commit_no_similar(&self, item: &ItemRef, version: u64) -> Result<bool> {
        let conn = lock(&self.conn);
        if !item.mark_no_similar(version) {
            return Ok(false);
        }
        conn.execute(
            "UPDATE items SET has_no_similar = 1 WHERE id = ?1",
            params![item.id().0 as i64],
        )?;
        Ok(true)
    }

    fn non_duplicates(&self) -> &dyn NonDuplicateRegistry {
        &self.non_duplicates
    }
}

impl SqliteItemStore {
    /// Number of rows in the items table
    pub fn stored_count(&self) -> Result<usize> {
        let count: Option<i64> = lock(&self.conn)
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
            .optional()?;
        Ok(count.unwrap_or(0) as usize)
    }
}
