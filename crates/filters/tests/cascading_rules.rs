//! Cascading `.sync_ignore` behavior across a real directory tree.
//!
//! Rules load per directory from the root down to the queried path's
//! parent, the last matching rule wins, and manual-transfer endpoints
//! bypass everything.

use std::fs;

use filters::{IgnoreCache, IgnoreConfig};
use tempfile::TempDir;

fn tree() -> TempDir {
    tempfile::tempdir().unwrap()
}

#[test]
fn root_rules_apply_to_nested_paths() {
    let dir = tree();
    fs::write(dir.path().join(".sync_ignore"), "*.log\n").unwrap();

    let cache = IgnoreCache::new(dir.path(), &IgnoreConfig::default()).unwrap();
    assert!(cache.is_ignored("app.log", false));
    assert!(cache.is_ignored("deep/nested/app.log", false));
    assert!(!cache.is_ignored("app.txt", false));
}

#[test]
fn nested_negation_overrides_root_rule() {
    let dir = tree();
    fs::write(dir.path().join(".sync_ignore"), "*.log\n").unwrap();
    fs::create_dir(dir.path().join("logs")).unwrap();
    fs::write(dir.path().join("logs/.sync_ignore"), "!keep.log\n").unwrap();

    let cache = IgnoreCache::new(dir.path(), &IgnoreConfig::default()).unwrap();
    assert!(cache.is_ignored("logs/drop.log", false));
    assert!(!cache.is_ignored("logs/keep.log", false));
    // The negation lives in logs/; it has no say at the root.
    assert!(cache.is_ignored("keep.log", false));
}

#[test]
fn comments_only_file_loads_zero_rules() {
    let dir = tree();
    fs::write(
        dir.path().join(".sync_ignore"),
        "# nothing but comments\n\n# and blanks\n",
    )
    .unwrap();

    let cache = IgnoreCache::new(dir.path(), &IgnoreConfig::default()).unwrap();
    assert!(!cache.is_ignored("anything.txt", false));
    // Defaults still apply.
    assert!(cache.is_ignored(".sync_temp", true));
}

#[test]
fn ignored_directory_covers_its_subtree() {
    let dir = tree();
    fs::write(dir.path().join(".sync_ignore"), "target\n").unwrap();

    let cache = IgnoreCache::new(dir.path(), &IgnoreConfig::default()).unwrap();
    assert!(cache.is_ignored("target", true));
    assert!(cache.is_ignored("target/debug/build.rs", false));
    assert!(cache.is_ignored("crates/sub/target/debug/a.o", false));
}

#[test]
fn rules_are_cached_until_invalidated() {
    let dir = tree();
    fs::write(dir.path().join(".sync_ignore"), "*.tmp\n").unwrap();

    let cache = IgnoreCache::new(dir.path(), &IgnoreConfig::default()).unwrap();
    assert!(cache.is_ignored("scratch.tmp", false));

    // Rewrite the rules; the cached copy still answers until invalidation.
    fs::write(dir.path().join(".sync_ignore"), "# empty now\n").unwrap();
    assert!(cache.is_ignored("scratch.tmp", false));

    cache.invalidate(dir.path());
    assert!(!cache.is_ignored("scratch.tmp", false));
}

#[test]
fn invalidation_reaches_cached_descendants() {
    let dir = tree();
    fs::create_dir_all(dir.path().join("a/b")).unwrap();
    fs::write(dir.path().join("a/b/.sync_ignore"), "*.gen\n").unwrap();

    let cache = IgnoreCache::new(dir.path(), &IgnoreConfig::default()).unwrap();
    assert!(cache.is_ignored("a/b/out.gen", false));

    fs::remove_file(dir.path().join("a/b/.sync_ignore")).unwrap();
    cache.invalidate(&dir.path().join("a"));
    assert!(!cache.is_ignored("a/b/out.gen", false));
}

#[test]
fn authoritative_config_suppresses_disk_rules() {
    // Scenario: uploaded config ignores *.bak; an on-disk rule file tries to
    // ignore foo.txt. The on-disk rule must not be consulted.
    let dir = tree();
    fs::create_dir(dir.path().join("nested")).unwrap();
    fs::write(dir.path().join("nested/.sync_ignore"), "foo.txt\n").unwrap();

    let cache = IgnoreCache::new(
        dir.path(),
        &IgnoreConfig {
            ignores: vec!["**/*.bak".into()],
            manual_transfer: vec![],
        },
    )
    .unwrap();

    assert!(!cache.scan_disk_allowed());
    assert!(!cache.is_ignored("nested/foo.txt", false));
    assert!(cache.is_ignored("nested/x.bak", false));
}

#[test]
fn manual_transfer_endpoint_bypasses_disk_rules() {
    let dir = tree();
    fs::write(dir.path().join(".sync_ignore"), "gen\n").unwrap();

    let cache = IgnoreCache::new(
        dir.path(),
        &IgnoreConfig {
            ignores: vec![],
            manual_transfer: vec!["gen/api".into()],
        },
    )
    .unwrap();

    assert!(cache.is_ignored_with_manual("gen/other.rs", false, true));
    assert!(!cache.is_ignored_with_manual("gen/api/client.rs", false, true));
    assert!(!cache.is_ignored_with_manual("gen/api", true, true));
}

#[test]
fn paths_with_spaces_and_non_ascii_round_trip() {
    let dir = tree();
    fs::write(dir.path().join(".sync_ignore"), "*.bak\n").unwrap();

    let cache = IgnoreCache::new(dir.path(), &IgnoreConfig::default()).unwrap();
    assert!(cache.is_ignored("some dir/übersicht.bak", false));
    assert!(!cache.is_ignored("some dir/übersicht.txt", false));
}
