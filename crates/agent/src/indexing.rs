//! The `indexing` subcommand: walk, hash, snapshot, summarize.

use std::path::{Path, PathBuf};

use filters::{IgnoreCache, SYNC_TEMP_DIR};
use store::{IndexDiff, IndexEntry, IndexStore};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::{AgentContext, AgentError};

/// Flags for one indexing run.
#[derive(Debug, Default)]
pub struct IndexingOptions {
    /// `Some` limits the walk to these prefixes; an empty list falls back
    /// to the config's manual-transfer list.
    pub manual_transfer: Option<Vec<String>>,
    /// Skip ignore evaluation entirely.
    pub bypass_ignore: bool,
}

/// Run a full indexing pass and commit it atomically.
pub fn run(ctx: &AgentContext, options: &IndexingOptions) -> Result<(), AgentError> {
    let store = IndexStore::open(&ctx.index_db_path())?;
    let previous = store.load_snapshot()?;
    let ignore = IgnoreCache::new(&ctx.working_dir, &ctx.ignore_config())?;

    let roots = walk_roots(ctx, options.manual_transfer.as_deref());
    let mut entries = Vec::new();
    for root in &roots {
        collect(ctx, &ignore, root, options.bypass_ignore, &mut entries);
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    store.replace_snapshot(&entries)?;
    store.export_json(&ctx.index_db_path().with_extension("json"))?;

    let diff = IndexDiff::between(&previous, &entries);
    let summary = serde_json::json!({
        "entries": entries.len(),
        "added": diff.added.len(),
        "modified": diff.modified.len(),
        "removed": diff.removed.len(),
    });
    println!("{summary}");
    println!(
        "indexing complete: {} entries ({} added, {} modified, {} removed)",
        entries.len(),
        diff.added.len(),
        diff.modified.len(),
        diff.removed.len()
    );
    Ok(())
}

/// The roots to walk: the manual-transfer prefixes when limiting, the
/// working directory otherwise.
fn walk_roots(ctx: &AgentContext, manual_override: Option<&[String]>) -> Vec<PathBuf> {
    let Some(requested) = manual_override else {
        return vec![ctx.working_dir.clone()];
    };

    let effective: Vec<&String> = if requested.is_empty() {
        ctx.config.manual_transfer.iter().collect()
    } else {
        requested.iter().collect()
    };

    if effective.is_empty() {
        warn!("manual-transfer limiting requested but no endpoints configured; walking everything");
        return vec![ctx.working_dir.clone()];
    }
    effective
        .into_iter()
        .map(|prefix| ctx.working_dir.join(prefix))
        .collect()
}

/// Walk one root, hashing files and honoring ignore rules.
fn collect(
    ctx: &AgentContext,
    ignore: &IgnoreCache,
    root: &Path,
    bypass_ignore: bool,
    entries: &mut Vec<IndexEntry>,
) {
    if !root.exists() {
        warn!(root = %root.display(), "walk root missing, skipping");
        return;
    }

    let walker = WalkDir::new(root).follow_links(false).into_iter();
    let walker = walker.filter_entry(|entry| {
        // The scratch directory holds the index itself; never descend.
        if entry.file_name().to_str() == Some(SYNC_TEMP_DIR) {
            return false;
        }
        if bypass_ignore || entry.depth() == 0 {
            return true;
        }
        let Some(rel) = relative(&ctx.working_dir, entry.path()) else {
            return true;
        };
        !ignore.is_ignored_with_manual(&rel, entry.file_type().is_dir(), true)
    });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(%err, "walk entry unreadable, skipping");
                continue;
            }
        };
        let Some(rel) = relative(&ctx.working_dir, entry.path()) else {
            continue;
        };
        if rel.is_empty() {
            continue;
        }

        let is_dir = entry.file_type().is_dir();
        let (size, mod_time_nanos) = match entry.metadata() {
            Ok(meta) => (meta.len(), mod_nanos(&meta)),
            Err(err) => {
                debug!(path = %entry.path().display(), %err, "stat failed, skipping");
                continue;
            }
        };

        let hash = if is_dir {
            String::new()
        } else {
            match checksums::hash_file(entry.path()) {
                Ok(digest) => digest,
                Err(err) => {
                    debug!(path = %entry.path().display(), %err, "hash failed, skipping");
                    continue;
                }
            }
        };

        entries.push(IndexEntry {
            path: entry.path().to_string_lossy().into_owned(),
            rel,
            size: if is_dir { 0 } else { size },
            mod_time_nanos,
            hash,
            is_dir,
        });
    }
}

fn relative(working_dir: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(working_dir)
        .ok()
        .map(|rel| rel.to_string_lossy().replace('\\', "/"))
}

fn mod_nanos(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn context_in(dir: &Path) -> AgentContext {
        AgentContext::resolve_in(dir.to_path_buf()).unwrap()
    }

    fn write_config(dir: &Path, body: &str) {
        let scratch = dir.join(SYNC_TEMP_DIR);
        fs::create_dir_all(&scratch).unwrap();
        fs::write(scratch.join(crate::context::CONFIG_NAME), body).unwrap();
    }

    #[test]
    fn indexing_records_files_with_digests() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.rs"), b"fn a() {}").unwrap();
        fs::write(dir.path().join("top.txt"), b"hello").unwrap();

        let ctx = context_in(dir.path());
        run(&ctx, &IndexingOptions::default()).unwrap();

        let store = IndexStore::open(&ctx.index_db_path()).unwrap();
        let snapshot = store.load_snapshot().unwrap();
        let rels: Vec<&str> = snapshot.iter().map(|e| e.rel.as_str()).collect();
        assert!(rels.contains(&"src"));
        assert!(rels.contains(&"src/a.rs"));
        assert!(rels.contains(&"top.txt"));

        let file = snapshot.iter().find(|e| e.rel == "top.txt").unwrap();
        assert_eq!(file.hash, checksums::hash_bytes(b"hello"));
        assert!(!file.is_dir);
    }

    #[test]
    fn authoritative_ignores_shape_the_walk() {
        // Uploaded config ignores *.bak; an on-disk rule file trying to
        // ignore foo.txt must have no effect.
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "{\"devsync.ignores\": [\"**/*.bak\"]}");
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/.sync_ignore"), "foo.txt\n").unwrap();
        fs::write(dir.path().join("nested/foo.txt"), b"kept").unwrap();
        fs::write(dir.path().join("nested/x.bak"), b"dropped").unwrap();

        let ctx = context_in(dir.path());
        run(&ctx, &IndexingOptions::default()).unwrap();

        let snapshot = IndexStore::open(&ctx.index_db_path())
            .unwrap()
            .load_snapshot()
            .unwrap();
        let rels: Vec<&str> = snapshot.iter().map(|e| e.rel.as_str()).collect();
        assert!(rels.contains(&"nested/foo.txt"));
        assert!(!rels.contains(&"nested/x.bak"));
    }

    #[test]
    fn bypass_ignore_indexes_everything() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "{\"devsync.ignores\": [\"*.bak\"]}");
        fs::write(dir.path().join("x.bak"), b"now visible").unwrap();

        let ctx = context_in(dir.path());
        run(
            &ctx,
            &IndexingOptions {
                manual_transfer: None,
                bypass_ignore: true,
            },
        )
        .unwrap();

        let snapshot = IndexStore::open(&ctx.index_db_path())
            .unwrap()
            .load_snapshot()
            .unwrap();
        assert!(snapshot.iter().any(|e| e.rel == "x.bak"));
    }

    #[test]
    fn manual_transfer_limits_the_walk() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("kept")).unwrap();
        fs::create_dir_all(dir.path().join("skipped")).unwrap();
        fs::write(dir.path().join("kept/in.txt"), b"in").unwrap();
        fs::write(dir.path().join("skipped/out.txt"), b"out").unwrap();

        let ctx = context_in(dir.path());
        run(
            &ctx,
            &IndexingOptions {
                manual_transfer: Some(vec!["kept".into()]),
                bypass_ignore: false,
            },
        )
        .unwrap();

        let snapshot = IndexStore::open(&ctx.index_db_path())
            .unwrap()
            .load_snapshot()
            .unwrap();
        let rels: Vec<&str> = snapshot.iter().map(|e| e.rel.as_str()).collect();
        assert!(rels.contains(&"kept/in.txt"));
        assert!(!rels.contains(&"skipped/out.txt"));
    }

    #[test]
    fn second_run_replaces_the_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"one").unwrap();

        let ctx = context_in(dir.path());
        run(&ctx, &IndexingOptions::default()).unwrap();

        fs::remove_file(dir.path().join("a.txt")).unwrap();
        fs::write(dir.path().join("b.txt"), b"two").unwrap();
        run(&ctx, &IndexingOptions::default()).unwrap();

        let snapshot = IndexStore::open(&ctx.index_db_path())
            .unwrap()
            .load_snapshot()
            .unwrap();
        let rels: Vec<&str> = snapshot.iter().map(|e| e.rel.as_str()).collect();
        assert!(rels.contains(&"b.txt"));
        assert!(!rels.contains(&"a.txt"));
    }
}
