//! Version tag written into managed entities

use std::path::Path;

use crate::runner;

/// Tag used when no version can be determined
pub const UNVERSIONED: &str = "unversioned";

/// Resolve the version tag for a run.
///
/// An explicit tag wins; otherwise the short commit hash of the repository
/// holding the manifests, with a `-dirty` suffix when it has uncommitted
/// changes.
pub fn resolve(explicit: Option<&str>, manifest_dir: &Path) -> String {
    if let Some(tag) = explicit.map(str::trim).filter(|t| !t.is_empty()) {
        return tag.to_string();
    }
    match git_version(manifest_dir) {
        Some(version) => version,
        None => {
            log::info!(
                "{} is not in a git repository, using version '{UNVERSIONED}'",
                manifest_dir.display()
            );
            UNVERSIONED.to_string()
        }
    }
}

fn git_version(dir: &Path) -> Option<String> {
    let hash = runner::run_capture(dir, "git", &["rev-parse", "--short", "HEAD"]).ok()?;
    if hash.is_empty() {
        return None;
    }
    let status = runner::run_capture(dir, "git", &["status", "--porcelain", "--", "."]).ok()?;
    if status.is_empty() {
        Some(hash)
    } else {
        Some(format!("{hash}-dirty"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_tag_wins() {
        let dir = TempDir::new().unwrap();
        assert_eq!(resolve(Some("release-3"), dir.path()), "release-3");
    }

    #[test]
    fn test_blank_tag_is_ignored() {
        let dir = TempDir::new().unwrap();
        assert_eq!(resolve(Some("  "), dir.path()), UNVERSIONED);
    }

    #[test]
    fn test_outside_repository() {
        let dir = TempDir::new().unwrap();
        assert_eq!(resolve(None, dir.path()), UNVERSIONED);
    }
}
