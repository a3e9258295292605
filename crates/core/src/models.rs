//! Domain model types shared by the manager, the web API, and the CLI.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Branch
// ---------------------------------------------------------------------------

/// A named branch reference and the commit it points at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Branch {
    pub name: String,
    /// Full hex object id.
    pub revision: String,
    /// Author timestamp of the commit at `revision`.
    pub created_at: DateTime<Utc>,
    /// True iff this is the configured trunk.
    pub is_main: bool,
}

impl Branch {
    /// Abbreviated revision for display.
    pub fn short_revision(&self) -> &str {
        let end = self.revision.len().min(8);
        &self.revision[..end]
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Outcome of merging one branch into another.
///
/// Content conflicts are reported here, not as errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeResult {
    pub success: bool,
    pub conflicts: Vec<String>,
    pub message: String,
}

impl MergeResult {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Branch status
// ---------------------------------------------------------------------------

/// A branch together with the on-disk state of its database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchStatus {
    pub branch: Branch,
    pub db_path: PathBuf,
    pub db_exists: bool,
    /// Database file size in bytes, 0 when absent.
    pub size: u64,
    pub worktree_exists: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_revision() {
        let branch = Branch {
            name: "main".into(),
            revision: "0123456789abcdef".into(),
            created_at: Utc::now(),
            is_main: true,
        };
        assert_eq!(branch.short_revision(), "01234567");

        let short = Branch {
            revision: "abc".into(),
            ..branch
        };
        assert_eq!(short.short_revision(), "abc");
    }

    #[test]
    fn test_merge_result_serialization() {
        let result = MergeResult {
            success: false,
            conflicts: vec!["CONFLICT (content): Merge conflict in db.sqlite".into()],
            message: "Automatic merge failed".into(),
        };
        assert!(result.has_conflicts());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["conflicts"].as_array().unwrap().len(), 1);
    }
}
