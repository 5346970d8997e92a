//! Manual-transfer endpoint prefixes.

/// A set of relative path prefixes that are explicit sync endpoints.
///
/// A path is covered when it equals an endpoint or begins with
/// `endpoint + "/"`. Covered paths bypass ignore evaluation unless the
/// caller disables the bypass.
#[derive(Debug, Clone, Default)]
pub struct ManualTransferList {
    endpoints: Vec<String>,
}

impl ManualTransferList {
    /// Build a list from endpoint strings.
    ///
    /// Endpoints are normalized: separators become `/`, surrounding
    /// whitespace and trailing slashes are dropped, empty entries are
    /// discarded.
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let endpoints = endpoints
            .into_iter()
            .filter_map(|e| {
                let cleaned = e
                    .as_ref()
                    .trim()
                    .replace('\\', "/")
                    .trim_matches('/')
                    .to_string();
                (!cleaned.is_empty()).then_some(cleaned)
            })
            .collect();
        Self { endpoints }
    }

    /// Whether no endpoints are configured.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// The normalized endpoints.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Whether `rel` equals an endpoint or lies below one.
    pub fn covers(&self, rel: &str) -> bool {
        let rel = rel.trim_matches('/');
        self.endpoints
            .iter()
            .any(|e| rel == e || rel.starts_with(&format!("{e}/")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_covers_itself_and_children() {
        let list = ManualTransferList::new(["src/gen", "assets"]);
        assert!(list.covers("src/gen"));
        assert!(list.covers("src/gen/out.rs"));
        assert!(list.covers("assets/logo.png"));
    }

    #[test]
    fn prefix_match_is_per_component() {
        let list = ManualTransferList::new(["src/gen"]);
        assert!(!list.covers("src/generated"));
        assert!(!list.covers("src"));
    }

    #[test]
    fn endpoints_are_normalized() {
        let list = ManualTransferList::new([" src/gen/ ", "", "a\\b"]);
        assert_eq!(list.endpoints(), &["src/gen", "a/b"]);
        assert!(list.covers("a/b/c"));
    }

    #[test]
    fn empty_list_covers_nothing() {
        let list = ManualTransferList::default();
        assert!(list.is_empty());
        assert!(!list.covers("anything"));
    }
}
