//! The cache behavior behind a local-edit-is-mirrored cycle: a change
//! syncs once, an identical rewrite syncs never, and deletions drop rows.

use std::fs;
use std::path::Path;

use store::{FileCache, FileMetadata, StoreError};

fn write(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn edit_sync_edit_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FileCache::open(&dir.path().join(".sync_temp/file_cache.db")).unwrap();
    let file = write(dir.path(), "a.txt", b"hi");

    // First sighting uploads.
    let digest = cache.should_sync("src/a.txt", &file).unwrap().unwrap();
    assert_eq!(digest, checksums::hash_bytes(b"hi"));
    cache.record_sync("src/a.txt", &file, &digest).unwrap();

    // Same bytes: nothing to do, even though the row exists.
    assert_eq!(cache.should_sync("src/a.txt", &file).unwrap(), None);

    // Real change: one more upload with the new digest.
    let file = write(dir.path(), "a.txt", b"hello");
    let digest = cache.should_sync("src/a.txt", &file).unwrap().unwrap();
    assert_eq!(digest, checksums::hash_bytes(b"hello"));
    cache.record_sync("src/a.txt", &file, &digest).unwrap();
    assert_eq!(cache.should_sync("src/a.txt", &file).unwrap(), None);
}

#[test]
fn cache_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join(".sync_temp/file_cache.db");
    let file = write(dir.path(), "persist.txt", b"durable");

    {
        let cache = FileCache::open(&db).unwrap();
        let digest = cache.should_sync("persist.txt", &file).unwrap().unwrap();
        cache.record_sync("persist.txt", &file, &digest).unwrap();
    }

    let cache = FileCache::open(&db).unwrap();
    assert_eq!(cache.should_sync("persist.txt", &file).unwrap(), None);
    assert_eq!(cache.stats().unwrap().0, 1);
}

#[test]
fn delete_propagation_drops_the_row() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FileCache::open(&dir.path().join(".sync_temp/file_cache.db")).unwrap();
    let file = write(dir.path(), "doomed.txt", b"bye");

    let digest = cache.should_sync("doomed.txt", &file).unwrap().unwrap();
    cache.record_sync("doomed.txt", &file, &digest).unwrap();
    assert!(cache.get("doomed.txt").unwrap().is_some());

    assert!(cache.remove("doomed.txt").unwrap());
    assert!(cache.get("doomed.txt").unwrap().is_none());

    // A re-created file with the same content syncs again.
    assert!(cache.should_sync("doomed.txt", &file).unwrap().is_some());
}

#[test]
fn unreadable_paths_surface_errors_rather_than_guesses() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FileCache::open(&dir.path().join(".sync_temp/file_cache.db")).unwrap();

    let err = cache
        .should_sync("ghost.txt", &dir.path().join("ghost.txt"))
        .unwrap_err();
    assert!(matches!(err, StoreError::Io { .. }));
}

#[test]
fn manual_rows_round_trip_through_upsert() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FileCache::open(&dir.path().join(".sync_temp/file_cache.db")).unwrap();

    let meta = FileMetadata {
        path: "weird name with spaces/ünïcode.bin".into(),
        hash: "ef46db3751d8e999".into(),
        size: 0,
        mod_time: 1,
        last_sync: 2,
        created_at: 3,
        updated_at: 4,
    };
    cache.upsert(&meta).unwrap();
    assert_eq!(cache.get(&meta.path).unwrap().unwrap(), meta);
}
