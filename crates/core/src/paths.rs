//! Path translation between the local and remote trees.

use std::path::{Path, PathBuf};

use transport::posix_join;

use crate::OsTarget;

/// The watch-root-relative form of `abs`, forward slashes.
pub fn relative_of(root: &Path, abs: &Path) -> Option<String> {
    abs.strip_prefix(root)
        .ok()
        .map(|rel| rel.to_string_lossy().replace('\\', "/"))
        .filter(|rel| !rel.is_empty())
}

/// The absolute remote path for a relative one.
///
/// POSIX targets get forward-slash joins; Windows targets get backslashes
/// with `/c/...` roots mapped to `C:\...`.
pub fn to_remote(os: OsTarget, remote_root: &str, rel: &str) -> String {
    match os {
        OsTarget::Linux | OsTarget::Darwin => posix_join(remote_root, rel),
        OsTarget::Windows => windows_join(remote_root, rel),
    }
}

/// Translate an absolute remote path back into `(local_abs, rel)`.
///
/// Returns `None` when the path does not lie under the remote root.
pub fn to_local(local_root: &Path, remote_root: &str, remote_abs: &str) -> Option<(PathBuf, String)> {
    let normalized_abs = remote_abs.replace('\\', "/");
    let normalized_root = normalize_remote_root(remote_root);

    let rel = normalized_abs
        .strip_prefix(&normalized_root)
        .map(|rest| rest.trim_start_matches('/'))?;
    if rel.is_empty() {
        return None;
    }
    Some((local_root.join(rel), rel.to_string()))
}

/// Whether a remote path lies inside the scratch directory.
pub fn under_sync_temp(path: &str) -> bool {
    path.replace('\\', "/")
        .split('/')
        .any(|component| component == filters::SYNC_TEMP_DIR)
}

fn normalize_remote_root(root: &str) -> String {
    let forward = root.replace('\\', "/");
    // C:/users and /c/users both normalize to /c/users for prefix checks.
    let mut chars = forward.chars();
    match (chars.next(), chars.next()) {
        (Some(drive), Some(':')) if drive.is_ascii_alphabetic() => {
            format!("/{}{}", drive.to_ascii_lowercase(), chars.as_str())
        }
        _ => forward,
    }
    .trim_end_matches('/')
    .to_string()
}

fn windows_join(remote_root: &str, rel: &str) -> String {
    let root = map_drive(remote_root);
    let root = root.trim_end_matches(['\\', '/']);
    let rel = rel.replace('/', "\\");
    let rel = rel.trim_start_matches('\\');
    format!("{root}\\{rel}")
}

/// `/c/users/dev` becomes `C:\users\dev`; already-mapped roots pass through.
fn map_drive(root: &str) -> String {
    let forward = root.replace('\\', "/");
    let bytes = forward.as_bytes();
    if bytes.len() >= 2
        && bytes[0] == b'/'
        && bytes[1].is_ascii_alphabetic()
        && (bytes.len() == 2 || bytes[2] == b'/')
    {
        let drive = forward[1..2].to_ascii_uppercase();
        let rest = forward[2..].replace('/', "\\");
        return format!("{drive}:{rest}");
    }
    forward.replace('/', "\\")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posix_targets_join_with_forward_slashes() {
        assert_eq!(
            to_remote(OsTarget::Linux, "/srv/app", "src/a.rs"),
            "/srv/app/src/a.rs"
        );
        assert_eq!(
            to_remote(OsTarget::Darwin, "/srv/app/", "a b/ü.txt"),
            "/srv/app/a b/ü.txt"
        );
    }

    #[test]
    fn windows_targets_join_with_backslashes_and_drive_mapping() {
        assert_eq!(
            to_remote(OsTarget::Windows, "/c/users/dev", "src/a.rs"),
            "C:\\users\\dev\\src\\a.rs"
        );
        assert_eq!(
            to_remote(OsTarget::Windows, "C:\\proj", "src/a.rs"),
            "C:\\proj\\src\\a.rs"
        );
    }

    #[test]
    fn remote_paths_translate_back_to_local() {
        let (abs, rel) = to_local(Path::new("/w"), "/srv/app", "/srv/app/docs/old.md").unwrap();
        assert_eq!(abs, PathBuf::from("/w/docs/old.md"));
        assert_eq!(rel, "docs/old.md");
    }

    #[test]
    fn paths_outside_the_remote_root_do_not_translate() {
        assert!(to_local(Path::new("/w"), "/srv/app", "/etc/passwd").is_none());
        assert!(to_local(Path::new("/w"), "/srv/app", "/srv/app").is_none());
    }

    #[test]
    fn windows_remote_paths_translate_back() {
        let (abs, rel) =
            to_local(Path::new("/w"), "/c/proj", "C:\\proj\\src\\main.rs").unwrap();
        assert_eq!(abs, PathBuf::from("/w/src/main.rs"));
        assert_eq!(rel, "src/main.rs");
    }

    #[test]
    fn sync_temp_paths_are_recognized() {
        assert!(under_sync_temp("/srv/app/.sync_temp/config.json"));
        assert!(under_sync_temp("C:\\proj\\.sync_temp\\agent.exe"));
        assert!(!under_sync_temp("/srv/app/src/main.rs"));
    }

    #[test]
    fn relative_of_uses_forward_slashes() {
        assert_eq!(
            relative_of(Path::new("/w"), Path::new("/w/src/a.rs")),
            Some("src/a.rs".into())
        );
        assert_eq!(relative_of(Path::new("/w"), Path::new("/w")), None);
        assert_eq!(relative_of(Path::new("/w"), Path::new("/other")), None);
    }
}
