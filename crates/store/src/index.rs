//! The agent-side index snapshot.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection};
use tracing::debug;

use crate::{IndexEntry, StoreError};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS files (
    path           TEXT PRIMARY KEY,
    rel            TEXT NOT NULL,
    size           INTEGER NOT NULL,
    mod_time_nanos INTEGER NOT NULL,
    hash           TEXT NOT NULL,
    is_dir         INTEGER NOT NULL
)";

/// A persisted snapshot of one full tree walk.
///
/// The snapshot is replaced wholesale: one transaction deletes every row and
/// inserts the new set, so a concurrent reader sees the old snapshot or the
/// new one, never a partial table.
#[derive(Debug)]
pub struct IndexStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl IndexStore {
    /// Open (creating if necessary) the index database at `db_path`.
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
            db_path: db_path.to_path_buf(),
        })
    }

    /// Where the database lives.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Atomically replace the snapshot with `entries`.
    pub fn replace_snapshot(&self, entries: &[IndexEntry]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().expect("index connection poisoned");
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM files", [])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO files (path, rel, size, mod_time_nanos, hash, is_dir)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for entry in entries {
                insert.execute(params![
                    entry.path,
                    entry.rel,
                    entry.size,
                    entry.mod_time_nanos,
                    entry.hash,
                    i64::from(entry.is_dir),
                ])?;
            }
        }
        tx.commit()?;
        debug!(rows = entries.len(), "index snapshot committed");
        Ok(())
    }

    /// Load the current snapshot ordered by path.
    pub fn load_snapshot(&self) -> Result<Vec<IndexEntry>, StoreError> {
        let conn = self.conn.lock().expect("index connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT path, rel, size, mod_time_nanos, hash, is_dir FROM files ORDER BY path",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(IndexEntry {
                path: row.get(0)?,
                rel: row.get(1)?,
                size: row.get(2)?,
                mod_time_nanos: row.get(3)?,
                hash: row.get(4)?,
                is_dir: row.get::<_, i64>(5)? != 0,
            })
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Serialize the snapshot as JSON next to the caller-chosen `path`,
    /// writing a `.tmp` sibling first and renaming into place.
    pub fn export_json(&self, path: &Path) -> Result<(), StoreError> {
        let entries = self.load_snapshot()?;
        let body = serde_json::to_vec_pretty(&entries)?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, body).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }
}

/// Difference between two snapshots, keyed by relative path.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexDiff {
    /// Paths present only in the new snapshot.
    pub added: Vec<String>,
    /// Paths present in both with a different digest or size.
    pub modified: Vec<String>,
    /// Paths present only in the old snapshot.
    pub removed: Vec<String>,
}

impl IndexDiff {
    /// Compare two snapshots.
    pub fn between(old: &[IndexEntry], new: &[IndexEntry]) -> Self {
        use std::collections::BTreeMap;

        let old_map: BTreeMap<&str, &IndexEntry> =
            old.iter().map(|e| (e.rel.as_str(), e)).collect();
        let new_map: BTreeMap<&str, &IndexEntry> =
            new.iter().map(|e| (e.rel.as_str(), e)).collect();

        let mut diff = Self::default();
        for (rel, entry) in &new_map {
            match old_map.get(rel) {
                None => diff.added.push((*rel).to_string()),
                Some(prev) if prev.hash != entry.hash || prev.size != entry.size => {
                    diff.modified.push((*rel).to_string());
                }
                Some(_) => {}
            }
        }
        for rel in old_map.keys() {
            if !new_map.contains_key(rel) {
                diff.removed.push((*rel).to_string());
            }
        }
        diff
    }

    /// Total number of changed paths.
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    /// Whether the snapshots are identical.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(rel: &str, hash: &str) -> IndexEntry {
        IndexEntry {
            path: format!("/remote/{rel}"),
            rel: rel.to_string(),
            size: hash.len() as u64,
            mod_time_nanos: 1,
            hash: hash.to_string(),
            is_dir: false,
        }
    }

    #[test]
    fn snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::open(&dir.path().join("indexing_files.db")).unwrap();

        let entries = vec![entry("a.txt", "h1"), entry("b/c.txt", "h2")];
        store.replace_snapshot(&entries).unwrap();
        assert_eq!(store.load_snapshot().unwrap(), entries);
    }

    #[test]
    fn replacement_overwrites_not_merges() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::open(&dir.path().join("indexing_files.db")).unwrap();

        store
            .replace_snapshot(&[entry("a", "1"), entry("b", "2")])
            .unwrap();
        store.replace_snapshot(&[entry("c", "3")]).unwrap();

        let rows = store.load_snapshot().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rel, "c");
    }

    #[test]
    fn json_export_lands_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::open(&dir.path().join("indexing_files.db")).unwrap();
        store.replace_snapshot(&[entry("a", "1")]).unwrap();

        let out = dir.path().join("indexing_files.json");
        store.export_json(&out).unwrap();

        let text = fs::read_to_string(&out).unwrap();
        let parsed: Vec<IndexEntry> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.len(), 1);
        assert!(!out.with_extension("tmp").exists());
    }

    #[test]
    fn diff_classifies_changes() {
        let old = vec![entry("same", "h"), entry("changed", "old"), entry("gone", "x")];
        let new = vec![entry("same", "h"), entry("changed", "new"), entry("fresh", "y")];

        let diff = IndexDiff::between(&old, &new);
        assert_eq!(diff.added, vec!["fresh"]);
        assert_eq!(diff.modified, vec!["changed"]);
        assert_eq!(diff.removed, vec!["gone"]);
        assert_eq!(diff.len(), 3);
    }

    #[test]
    fn diff_of_identical_snapshots_is_empty() {
        let snap = vec![entry("a", "1")];
        assert!(IndexDiff::between(&snap, &snap).is_empty());
    }
}
