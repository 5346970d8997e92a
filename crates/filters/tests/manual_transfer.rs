//! Manual-transfer endpoints: explicit requests beat every ignore rule.

use std::fs;

use filters::{IgnoreCache, IgnoreConfig, ManualTransferList};

#[test]
fn endpoints_match_exact_and_descendant_paths() {
    let list = ManualTransferList::new(["dist", "docs/generated"]);
    assert!(list.covers("dist"));
    assert!(list.covers("dist/bundle.js"));
    assert!(list.covers("docs/generated/api.md"));
    assert!(!list.covers("docs"));
    assert!(!list.covers("distribution"));
}

#[test]
fn endpoints_beat_authoritative_rules() {
    let cache = IgnoreCache::new(
        "/w",
        &IgnoreConfig {
            ignores: vec!["dist".into()],
            manual_transfer: vec!["dist".into()],
        },
    )
    .unwrap();

    assert!(!cache.is_ignored_with_manual("dist/bundle.js", false, true));
    // With the override disabled the rule applies again.
    assert!(cache.is_ignored_with_manual("dist/bundle.js", false, false));
}

#[test]
fn endpoints_beat_on_disk_rules() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(".sync_ignore"), "generated\n").unwrap();

    let cache = IgnoreCache::new(
        dir.path(),
        &IgnoreConfig {
            ignores: vec![],
            manual_transfer: vec!["generated/api".into()],
        },
    )
    .unwrap();

    assert!(cache.is_ignored_with_manual("generated/internal.rs", false, true));
    assert!(!cache.is_ignored_with_manual("generated/api/client.rs", false, true));
}

#[test]
fn endpoints_do_not_override_nonmatching_paths() {
    let cache = IgnoreCache::new(
        "/w",
        &IgnoreConfig {
            ignores: vec!["*.log".into()],
            manual_transfer: vec!["logs/keep".into()],
        },
    )
    .unwrap();

    assert!(cache.is_ignored_with_manual("other/app.log", false, true));
    assert!(!cache.is_ignored_with_manual("logs/keep/app.log", false, true));
}

#[test]
fn windows_style_endpoint_input_normalizes() {
    let list = ManualTransferList::new(["assets\\images"]);
    assert!(list.covers("assets/images/logo.png"));
}
