//! Single ignore rules and ordered rule sets.

use globset::{GlobBuilder, GlobMatcher};
use tracing::warn;

use crate::FilterError;

/// One compiled ignore rule.
///
/// A rule remembers its raw text for diagnostics and whether it was negated
/// with a leading `!`. Bare patterns (no `/`, no `**`) are compiled twice so
/// `build` behaves like `build` plus `**/build`.
#[derive(Debug, Clone)]
pub struct Rule {
    raw: String,
    negated: bool,
    matchers: Vec<GlobMatcher>,
}

impl Rule {
    /// Parse one rule line.
    ///
    /// Returns `Ok(None)` for blank lines and `#` comments.
    pub fn parse(line: &str) -> Result<Option<Self>, FilterError> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(None);
        }

        let (negated, pattern) = match trimmed.strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, trimmed),
        };
        if pattern.is_empty() {
            return Ok(None);
        }

        let mut matchers = vec![compile(pattern)?];
        if !pattern.contains('/') && !pattern.contains("**") {
            matchers.push(compile(&format!("**/{pattern}"))?);
        }

        Ok(Some(Self {
            raw: trimmed.to_string(),
            negated,
            matchers,
        }))
    }

    /// Whether this rule un-ignores instead of ignoring.
    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// The rule's original text.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Match against a root-relative path and its basename.
    pub fn matches(&self, rel: &str, basename: &str) -> bool {
        self.matchers
            .iter()
            .any(|m| m.is_match(rel) || m.is_match(basename))
    }
}

fn compile(pattern: &str) -> Result<GlobMatcher, FilterError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|source| FilterError::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// An ordered list of rules where the last match wins.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Compile a list of pattern lines, failing on the first bad pattern.
    pub fn from_patterns<I, S>(patterns: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rules = Vec::new();
        for line in patterns {
            if let Some(rule) = Rule::parse(line.as_ref())? {
                rules.push(rule);
            }
        }
        Ok(Self { rules })
    }

    /// Compile pattern lines leniently, skipping lines that do not compile.
    ///
    /// Used for on-disk `.sync_ignore` content, where one bad line must not
    /// take down the rest of the file.
    pub fn from_lines_lossy(lines: &str) -> Self {
        let mut rules = Vec::new();
        for line in lines.lines() {
            match Rule::parse(line) {
                Ok(Some(rule)) => rules.push(rule),
                Ok(None) => {}
                Err(err) => warn!(%err, "skipping unparseable ignore rule"),
            }
        }
        Self { rules }
    }

    /// Number of compiled rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set holds no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Iterate rules in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// Evaluate the set against a root-relative path.
    ///
    /// Returns `Some(true)` when the last matching rule ignores the path,
    /// `Some(false)` when it un-ignores it, and `None` when nothing matched.
    pub fn decide(&self, rel: &str, basename: &str) -> Option<bool> {
        let mut verdict = None;
        for rule in &self.rules {
            if rule.matches(rel, basename) {
                verdict = Some(!rule.is_negated());
            }
        }
        verdict
    }
}
