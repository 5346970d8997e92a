//! The two-mode ignore matcher with a per-directory rule cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::manual::ManualTransferList;
use crate::rule::RuleSet;
use crate::{FilterError, IgnoreConfig, COLLECTIONS_DIR, DEFAULT_IGNORES, IGNORE_FILE, SYNC_TEMP_DIR};

/// Ignore decisions for a single watched tree.
///
/// In *authoritative* mode (a non-empty `ignores` list in the config) the
/// cache never touches on-disk rule files. Otherwise `.sync_ignore` files
/// cascade from the root down to the queried path's parent, loaded once per
/// directory and cached until invalidated.
#[derive(Debug)]
pub struct IgnoreCache {
    root: PathBuf,
    authoritative: Option<Arc<Option<RuleSet>>>,
    manual: ManualTransferList,
    dir_rules: RwLock<HashMap<PathBuf, Arc<Option<RuleSet>>>>,
}

impl IgnoreCache {
    /// Build a cache for `root` from the configured rule sources.
    ///
    /// # Errors
    ///
    /// Fails when an authoritative pattern does not compile; on-disk rules
    /// are always loaded leniently later.
    pub fn new(root: impl Into<PathBuf>, config: &IgnoreConfig) -> Result<Self, FilterError> {
        let authoritative = if config.ignores.is_empty() {
            None
        } else {
            Some(Arc::new(Some(RuleSet::from_patterns(&config.ignores)?)))
        };
        Ok(Self {
            root: root.into(),
            authoritative,
            manual: ManualTransferList::new(&config.manual_transfer),
            dir_rules: RwLock::new(HashMap::new()),
        })
    }

    /// The watched tree this cache answers for.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether on-disk `.sync_ignore` files may be consulted.
    pub fn scan_disk_allowed(&self) -> bool {
        self.authoritative.is_none()
    }

    /// The configured manual-transfer endpoints.
    pub fn manual_transfer(&self) -> &ManualTransferList {
        &self.manual
    }

    /// Raw ignore decision for a root-relative path.
    ///
    /// The path itself is matched first; when no rule speaks to it, a rule
    /// ignoring one of its ancestor directories ignores the whole subtree.
    pub fn is_ignored(&self, rel: &str, is_dir: bool) -> bool {
        let _ = is_dir;
        let rel = normalize(rel);
        let basename = rel.rsplit('/').next().unwrap_or(&rel);

        if DEFAULT_IGNORES.contains(&basename) {
            return true;
        }
        // Everything inside the scratch and collections trees stays out of
        // sync, whatever the rules say.
        if rel
            .split('/')
            .any(|c| c == SYNC_TEMP_DIR || c == COLLECTIONS_DIR)
        {
            return true;
        }

        let sets = self.rule_sets_for(&rel);
        if let Some(verdict) = decide_concat(&sets, &rel, basename) {
            return verdict;
        }

        let components: Vec<&str> = rel.split('/').filter(|c| !c.is_empty()).collect();
        let mut prefix = String::new();
        for component in components.iter().take(components.len().saturating_sub(1)) {
            if prefix.is_empty() {
                prefix.push_str(component);
            } else {
                prefix.push('/');
                prefix.push_str(component);
            }
            if decide_concat(&sets, &prefix, component) == Some(true) {
                return true;
            }
        }
        false
    }

    /// Rule sets applicable to a query, in evaluation order.
    fn rule_sets_for(&self, rel: &str) -> Vec<Arc<Option<RuleSet>>> {
        if let Some(rules) = &self.authoritative {
            return vec![Arc::clone(rules)];
        }
        self.ancestor_dirs(rel)
            .iter()
            .map(|dir| self.dir_rules(dir))
            .collect()
    }

    /// Ignore decision with the manual-transfer override applied first.
    ///
    /// When `apply_manual` is false the override is disabled and the raw
    /// decision is returned.
    pub fn is_ignored_with_manual(&self, rel: &str, is_dir: bool, apply_manual: bool) -> bool {
        if apply_manual && self.manual.covers(&normalize(rel)) {
            return false;
        }
        self.is_ignored(rel, is_dir)
    }

    /// Drop cached rules for `dir` and every cached descendant.
    ///
    /// Called when a `.sync_ignore` file changes anywhere in the tree.
    pub fn invalidate(&self, dir: &Path) {
        let mut cache = self.dir_rules.write().expect("dir rule cache poisoned");
        cache.retain(|cached, _| !cached.starts_with(dir));
    }

    /// Drop every cached rule set.
    pub fn clear(&self) {
        self.dir_rules
            .write()
            .expect("dir rule cache poisoned")
            .clear();
    }

    /// Absolute ancestor directories from the root down to `rel`'s parent.
    fn ancestor_dirs(&self, rel: &str) -> Vec<PathBuf> {
        let mut dirs = vec![self.root.clone()];
        let mut current = self.root.clone();
        let components: Vec<&str> = rel.split('/').filter(|c| !c.is_empty()).collect();
        for component in components.iter().take(components.len().saturating_sub(1)) {
            current = current.join(component);
            dirs.push(current.clone());
        }
        dirs
    }

    /// Load (or fetch cached) rules for one directory.
    fn dir_rules(&self, dir: &Path) -> Arc<Option<RuleSet>> {
        if let Some(rules) = self
            .dir_rules
            .read()
            .expect("dir rule cache poisoned")
            .get(dir)
        {
            return Arc::clone(rules);
        }

        let loaded = match std::fs::read_to_string(dir.join(IGNORE_FILE)) {
            Ok(content) => {
                let set = RuleSet::from_lines_lossy(&content);
                if set.is_empty() {
                    None
                } else {
                    Some(set)
                }
            }
            Err(err) => {
                // Missing file is the common case; a genuine read failure
                // still just means "no rules from this directory".
                if err.kind() != std::io::ErrorKind::NotFound {
                    debug!(dir = %dir.display(), %err, "ignore file unreadable");
                }
                None
            }
        };

        let rules = Arc::new(loaded);
        self.dir_rules
            .write()
            .expect("dir rule cache poisoned")
            .insert(dir.to_path_buf(), Arc::clone(&rules));
        rules
    }
}

/// Evaluate concatenated rule sets; the last matching rule wins.
fn decide_concat(sets: &[Arc<Option<RuleSet>>], rel: &str, basename: &str) -> Option<bool> {
    let mut verdict = None;
    for set in sets {
        if let Some(rules) = set.as_ref() {
            if let Some(decision) = rules.decide(rel, basename) {
                verdict = Some(decision);
            }
        }
    }
    verdict
}

fn normalize(rel: &str) -> String {
    let rel = rel.replace('\\', "/");
    rel.trim_start_matches("./").trim_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with(config: IgnoreConfig) -> IgnoreCache {
        IgnoreCache::new("/w", &config).unwrap()
    }

    #[test]
    fn defaults_are_always_ignored() {
        let cache = cache_with(IgnoreConfig::default());
        assert!(cache.is_ignored(SYNC_TEMP_DIR, true));
        assert!(cache.is_ignored(crate::CONFIG_FILE, false));
        assert!(cache.is_ignored(IGNORE_FILE, false));
        assert!(cache.is_ignored(".sync_temp/file_cache.db", false));
        assert!(cache.is_ignored("nested/.sync_ignore", false));
    }

    #[test]
    fn authoritative_rules_apply_without_disk() {
        let cache = cache_with(IgnoreConfig {
            ignores: vec!["**/*.bak".into()],
            manual_transfer: vec![],
        });
        assert!(!cache.scan_disk_allowed());
        assert!(cache.is_ignored("a/b/x.bak", false));
        assert!(!cache.is_ignored("a/b/x.txt", false));
    }

    #[test]
    fn manual_transfer_overrides_ignores() {
        let cache = cache_with(IgnoreConfig {
            ignores: vec!["vendor".into()],
            manual_transfer: vec!["vendor/keep".into()],
        });
        assert!(cache.is_ignored("vendor/lib.rs", false));
        assert!(!cache.is_ignored_with_manual("vendor/keep/lib.rs", false, true));
        assert!(cache.is_ignored_with_manual("vendor/keep/lib.rs", false, false));
    }

    #[test]
    fn backslash_paths_are_normalized() {
        let cache = cache_with(IgnoreConfig {
            ignores: vec!["target".into()],
            manual_transfer: vec![],
        });
        assert!(cache.is_ignored("src\\target\\debug", false));
    }
}
