//! The `prune` subcommand: delete literally empty directories.

use std::path::{Path, PathBuf};

use filters::SYNC_TEMP_DIR;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::{AgentContext, AgentError};

/// Result of one prune pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PruneSummary {
    /// Directories examined.
    pub scanned: usize,
    /// Directories removed (or that would be, in dry-run).
    pub removed: Vec<PathBuf>,
    /// Whether this was a dry run.
    pub dry_run: bool,
}

/// Remove empty directories under the sync prefixes, deepest first.
///
/// `.sync_temp` and `.git` subtrees are never touched, nor is a prefix root
/// itself. Removal is per-directory `rmdir` semantics only: a directory
/// with any entry survives.
pub fn run(ctx: &AgentContext, dry_run: bool) -> Result<PruneSummary, AgentError> {
    let roots: Vec<PathBuf> = if ctx.config.manual_transfer.is_empty() {
        vec![ctx.working_dir.clone()]
    } else {
        ctx.config
            .manual_transfer
            .iter()
            .map(|prefix| ctx.working_dir.join(prefix))
            .collect()
    };

    let mut summary = PruneSummary {
        dry_run,
        ..PruneSummary::default()
    };

    for root in &roots {
        if !root.exists() {
            debug!(root = %root.display(), "prune root missing, skipping");
            continue;
        }
        prune_root(root, dry_run, &mut summary)?;
    }

    let json = serde_json::json!({
        "scanned": summary.scanned,
        "removed": summary.removed.len(),
        "dry_run": summary.dry_run,
    });
    println!("{json}");
    println!(
        "prune {}: removed {} of {} directories",
        if dry_run { "(dry run)" } else { "complete" },
        summary.removed.len(),
        summary.scanned
    );
    Ok(summary)
}

fn prune_root(root: &Path, dry_run: bool, summary: &mut PruneSummary) -> Result<(), AgentError> {
    // Deepest-first so a directory whose only content was an empty child is
    // itself empty by the time we reach it.
    let mut dirs: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect();
    dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));

    for dir in dirs {
        if dir == *root || is_protected(&dir) {
            continue;
        }
        summary.scanned += 1;

        let empty = match std::fs::read_dir(&dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(err) => {
                warn!(dir = %dir.display(), %err, "prune readdir failed");
                continue;
            }
        };
        if !empty {
            continue;
        }

        if dry_run {
            summary.removed.push(dir);
            continue;
        }
        match std::fs::remove_dir(&dir) {
            Ok(()) => summary.removed.push(dir),
            Err(err) => warn!(dir = %dir.display(), %err, "prune rmdir failed"),
        }
    }
    Ok(())
}

/// Whether a directory lies in (or under) a protected subtree.
fn is_protected(dir: &Path) -> bool {
    dir.components().any(|component| {
        matches!(
            component.as_os_str().to_str(),
            Some(SYNC_TEMP_DIR) | Some(".git")
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn context_in(dir: &Path) -> AgentContext {
        AgentContext::resolve_in(dir.to_path_buf()).unwrap()
    }

    #[test]
    fn empty_chains_collapse_deepest_first() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b/c")).unwrap();

        let summary = run(&context_in(dir.path()), false).unwrap();
        assert_eq!(summary.removed.len(), 3);
        assert!(!dir.path().join("a").exists());
        // The root itself survives.
        assert!(dir.path().exists());
    }

    #[test]
    fn directories_with_entries_survive() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("keep")).unwrap();
        fs::write(dir.path().join("keep/file.txt"), b"content").unwrap();
        fs::create_dir_all(dir.path().join("drop")).unwrap();

        run(&context_in(dir.path()), false).unwrap();
        assert!(dir.path().join("keep").exists());
        assert!(dir.path().join("keep/file.txt").exists());
        assert!(!dir.path().join("drop").exists());
    }

    #[test]
    fn protected_subtrees_are_untouched() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git/refs")).unwrap();
        fs::create_dir_all(dir.path().join(".sync_temp/empty")).unwrap();

        run(&context_in(dir.path()), false).unwrap();
        assert!(dir.path().join(".git/refs").exists());
        assert!(dir.path().join(".sync_temp/empty").exists());
    }

    #[test]
    fn dry_run_reports_without_removing() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ghost")).unwrap();

        let summary = run(&context_in(dir.path()), true).unwrap();
        assert_eq!(summary.removed.len(), 1);
        assert!(summary.dry_run);
        assert!(dir.path().join("ghost").exists());
    }
}
