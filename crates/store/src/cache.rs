//! The controller-side file cache.

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::{now_nanos, FileMetadata, StoreError};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS files (
    path       TEXT PRIMARY KEY,
    hash       TEXT NOT NULL,
    size       INTEGER NOT NULL,
    mod_time   INTEGER NOT NULL,
    last_sync  INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)";

/// Per-file sync metadata keyed by watch-root-relative path.
///
/// All access goes through one connection behind a mutex, so concurrent
/// callers are safe. The cache never swallows I/O problems: callers receive
/// the error and decide (the sync coordinator treats cache errors as "sync
/// anyway").
#[derive(Debug)]
pub struct FileCache {
    conn: Mutex<Connection>,
}

impl FileCache {
    /// Open (creating if necessary) the cache database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// An in-memory cache for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Decide whether `abs` (known as `rel` in the cache) needs syncing.
    ///
    /// Returns `Ok(Some(hash))` with the freshly computed digest when the
    /// file should be uploaded, and `Ok(None)` when the cache says it is
    /// current. Matching `(size, mod_time)` short-circuits without hashing.
    pub fn should_sync(&self, rel: &str, abs: &Path) -> Result<Option<String>, StoreError> {
        let meta = fs::metadata(abs).map_err(|source| StoreError::Io {
            path: abs.to_path_buf(),
            source,
        })?;
        let size = meta.len();
        let mod_time = mod_time_nanos(&meta);

        let cached = self.get(rel)?;
        if let Some(row) = &cached {
            if row.size == size && row.mod_time == mod_time {
                return Ok(None);
            }
        }

        let hash = checksums::hash_file(abs)?;
        match cached {
            Some(row) if row.hash == hash => Ok(None),
            _ => Ok(Some(hash)),
        }
    }

    /// Upsert the row for `rel` after a successful sync.
    pub fn record_sync(&self, rel: &str, abs: &Path, hash: &str) -> Result<(), StoreError> {
        let meta = fs::metadata(abs).map_err(|source| StoreError::Io {
            path: abs.to_path_buf(),
            source,
        })?;
        let now = now_nanos();
        self.upsert(&FileMetadata {
            path: rel.to_string(),
            hash: hash.to_string(),
            size: meta.len(),
            mod_time: mod_time_nanos(&meta),
            last_sync: now,
            created_at: now,
            updated_at: now,
        })
    }

    /// Upsert a fully formed metadata row.
    ///
    /// `created_at` is preserved for existing rows; `updated_at` always
    /// takes the new value.
    pub fn upsert(&self, meta: &FileMetadata) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("cache connection poisoned");
        conn.execute(
            "INSERT INTO files (path, hash, size, mod_time, last_sync, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(path) DO UPDATE SET
                 hash = excluded.hash,
                 size = excluded.size,
                 mod_time = excluded.mod_time,
                 last_sync = excluded.last_sync,
                 updated_at = excluded.updated_at",
            params![
                meta.path,
                meta.hash,
                meta.size,
                meta.mod_time,
                meta.last_sync,
                meta.created_at,
                meta.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Fetch the row for `rel`, if any.
    pub fn get(&self, rel: &str) -> Result<Option<FileMetadata>, StoreError> {
        let conn = self.conn.lock().expect("cache connection poisoned");
        let row = conn
            .query_row(
                "SELECT path, hash, size, mod_time, last_sync, created_at, updated_at
                 FROM files WHERE path = ?1",
                params![rel],
                |row| {
                    Ok(FileMetadata {
                        path: row.get(0)?,
                        hash: row.get(1)?,
                        size: row.get(2)?,
                        mod_time: row.get(3)?,
                        last_sync: row.get(4)?,
                        created_at: row.get(5)?,
                        updated_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Remove the row for `rel`. Returns whether a row existed.
    pub fn remove(&self, rel: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().expect("cache connection poisoned");
        let changed = conn.execute("DELETE FROM files WHERE path = ?1", params![rel])?;
        Ok(changed > 0)
    }

    /// Drop every row.
    pub fn reset(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("cache connection poisoned");
        conn.execute("DELETE FROM files", [])?;
        Ok(())
    }

    /// Row count and total tracked bytes.
    pub fn stats(&self) -> Result<(u64, u64), StoreError> {
        let conn = self.conn.lock().expect("cache connection poisoned");
        let (count, total): (u64, u64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM files",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((count, total))
    }
}

fn mod_time_nanos(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
}
