//! POSIX path and shell-quoting helpers for remote command lines.

use std::borrow::Cow;

/// Join path segments with forward slashes, collapsing doubled separators.
pub fn posix_join(base: &str, rel: &str) -> String {
    let base = base.trim_end_matches('/');
    let rel = rel.trim_start_matches('/');
    if base.is_empty() {
        return format!("/{rel}");
    }
    if rel.is_empty() {
        return base.to_string();
    }
    format!("{base}/{rel}")
}

/// The parent directory of a forward-slash path.
pub fn posix_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    if idx == 0 {
        Some("/")
    } else {
        Some(&trimmed[..idx])
    }
}

/// Quote an argument for a remote POSIX shell when necessary.
///
/// Single-quote wrapping with the `'\''` escape; plain identifiers pass
/// through unquoted.
pub fn shell_quote(arg: &str) -> Cow<'_, str> {
    if !needs_quoting(arg) {
        return Cow::Borrowed(arg);
    }
    let quoted = arg.replace('\'', r"'\''");
    Cow::Owned(format!("'{quoted}'"))
}

fn needs_quoting(arg: &str) -> bool {
    if arg.is_empty() {
        return true;
    }
    const SPECIAL: &[char] = &[
        ' ', '\t', '\n', '\'', '"', '\\', '$', '`', '!', '*', '?', '[', ']', '(', ')', '{', '}',
        '<', '>', '|', '&', ';', '#', '~',
    ];
    arg.chars().any(|c| SPECIAL.contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_handles_slashes() {
        assert_eq!(posix_join("/srv/app", "src/a.rs"), "/srv/app/src/a.rs");
        assert_eq!(posix_join("/srv/app/", "/src/a.rs"), "/srv/app/src/a.rs");
        assert_eq!(posix_join("", "src"), "/src");
        assert_eq!(posix_join("/srv", ""), "/srv");
    }

    #[test]
    fn parent_walks_up_one_level() {
        assert_eq!(posix_parent("/srv/app/a.rs"), Some("/srv/app"));
        assert_eq!(posix_parent("/a"), Some("/"));
        assert_eq!(posix_parent("/srv/app/"), Some("/srv"));
        assert_eq!(posix_parent("relative"), None);
    }

    #[test]
    fn plain_arguments_pass_through() {
        assert_eq!(shell_quote("simple_file.txt"), "simple_file.txt");
    }

    #[test]
    fn specials_get_single_quotes() {
        assert_eq!(shell_quote("has space"), "'has space'");
        assert_eq!(shell_quote("a$b"), "'a$b'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn embedded_single_quotes_escape() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
