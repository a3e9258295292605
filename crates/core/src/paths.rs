//! Branch name validation and branch → worktree → database path mapping.
//!
//! Everything here is pure: no filesystem access happens in this module.

use std::path::{Path, PathBuf};

use crate::errors::BranchError;

/// Maps branch names onto the on-disk layout of a repository.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    worktree_base: String,
    db_file_name: String,
    trunk: String,
}

impl PathResolver {
    pub fn new(
        root: impl Into<PathBuf>,
        worktree_base: &str,
        db_file_name: &str,
        trunk: &str,
    ) -> Self {
        Self {
            root: root.into(),
            worktree_base: worktree_base.to_string(),
            db_file_name: db_file_name.to_string(),
            trunk: trunk.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn trunk(&self) -> &str {
        &self.trunk
    }

    pub fn db_file_name(&self) -> &str {
        &self.db_file_name
    }

    pub fn worktree_base_name(&self) -> &str {
        &self.worktree_base
    }

    /// Directory that holds the worktrees of every non-trunk branch.
    pub fn worktree_base(&self) -> PathBuf {
        self.root.join(&self.worktree_base)
    }

    pub fn is_trunk(&self, branch: &str) -> bool {
        branch == self.trunk
    }

    /// Working directory of `branch`.
    ///
    /// The trunk is checked out in the primary working copy, every other
    /// branch under `<root>/<worktree_base>/<branch>`. Branch names containing
    /// `/` map onto nested directories.
    pub fn worktree_path(&self, branch: &str) -> PathBuf {
        if self.is_trunk(branch) {
            return self.root.clone();
        }
        let mut path = self.worktree_base();
        for segment in branch.split('/') {
            path.push(segment);
        }
        path
    }

    /// Database file of `branch` inside its working directory.
    pub fn database_path(&self, branch: &str) -> PathBuf {
        self.worktree_path(branch).join(&self.db_file_name)
    }

    /// Inverse of [`worktree_path`](Self::worktree_path) for paths under the
    /// worktree base.
    pub fn branch_for_worktree(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(self.worktree_base()).ok()?;
        let segments: Vec<&str> = rel
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        if segments.is_empty() {
            return None;
        }
        Some(segments.join("/"))
    }
}

/// Reject names that are not safe both as a git reference and as a relative
/// path below the worktree base.
pub fn validate_branch_name(name: &str) -> Result<(), BranchError> {
    if name.is_empty() {
        return Err(BranchError::invalid_name(name, "must not be empty"));
    }
    if name.len() > 200 {
        return Err(BranchError::invalid_name(name, "longer than 200 bytes"));
    }
    if name.starts_with('-') {
        return Err(BranchError::invalid_name(name, "must not start with '-'"));
    }
    if name.starts_with('/') || name.ends_with('/') {
        return Err(BranchError::invalid_name(
            name,
            "must not start or end with '/'",
        ));
    }
    if name.ends_with('.') || name.ends_with(".lock") {
        return Err(BranchError::invalid_name(
            name,
            "must not end with '.' or '.lock'",
        ));
    }
    if name == "HEAD" {
        return Err(BranchError::invalid_name(name, "reserved name"));
    }
    if name.contains("..") || name.contains("//") || name.contains("@{") || name == "@" {
        return Err(BranchError::invalid_name(
            name,
            "must not contain '..', '//', or '@{'",
        ));
    }
    if let Some(c) = name
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\@".contains(*c))
    {
        return Err(BranchError::invalid_name(
            name,
            format!("contains forbidden character {:?}", c),
        ));
    }
    if name.split('/').any(|segment| segment.starts_with('.')) {
        return Err(BranchError::invalid_name(
            name,
            "path segments must not start with '.'",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> PathResolver {
        PathResolver::new("/srv/repo", "worktrees", "db.sqlite", "main")
    }

    #[test]
    fn test_trunk_uses_primary_working_copy() {
        let r = resolver();
        assert_eq!(r.worktree_path("main"), PathBuf::from("/srv/repo"));
        assert_eq!(r.database_path("main"), PathBuf::from("/srv/repo/db.sqlite"));
    }

    #[test]
    fn test_branch_paths() {
        let r = resolver();
        assert_eq!(
            r.database_path("feature"),
            PathBuf::from("/srv/repo/worktrees/feature/db.sqlite")
        );
        assert_eq!(
            r.worktree_path("team/alice"),
            PathBuf::from("/srv/repo/worktrees/team/alice")
        );
    }

    #[test]
    fn test_branch_for_worktree() {
        let r = resolver();
        let path = r.worktree_path("team/alice");
        assert_eq!(r.branch_for_worktree(&path).as_deref(), Some("team/alice"));
        assert_eq!(r.branch_for_worktree(Path::new("/elsewhere/x")), None);
        assert_eq!(r.branch_for_worktree(&r.worktree_base()), None);
    }

    #[test]
    fn test_valid_names() {
        for name in ["feature", "feature-1", "team/alice", "v1.2", "fix_bug"] {
            assert!(validate_branch_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_names() {
        for name in [
            "",
            "..",
            "a/../b",
            "/abs",
            "trailing/",
            "-flag",
            "has space",
            "tab\tname",
            "x.lock",
            "a//b",
            "a@{1}",
            "HEAD",
            ".hidden",
            "a/.hidden",
            "what?",
            "star*",
        ] {
            assert!(
                matches!(
                    validate_branch_name(name),
                    Err(BranchError::InvalidBranchName { .. })
                ),
                "{name:?} should be rejected"
            );
        }
    }
}
