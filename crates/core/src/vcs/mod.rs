//! Version-control backends.
//!
//! The repository store talks to git through the narrow [`VcsBackend`]
//! trait. Two implementations exist: [`NativeBackend`] (libgit2 via `git2`)
//! and [`CliBackend`] (the `git` binary). [`open_or_init`] picks one from the
//! repository configuration.

pub mod cli;
pub mod native;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{BackendKind, RepositoryConfig};
use crate::errors::VcsError;

pub use cli::CliBackend;
pub use native::NativeBackend;

/// Author and committer identity for commits made by Branchlore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

impl CommitIdentity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// A local branch reference as reported by a backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BranchRef {
    pub name: String,
    pub revision: String,
    /// Author time of the commit the reference points at.
    pub committed_at: DateTime<Utc>,
}

/// Outcome of a tool step whose failure is data rather than an error
/// (checkout and merge).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    pub text: String,
}

impl ToolOutput {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            success: true,
            text: text.into(),
        }
    }

    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            success: false,
            text: text.into(),
        }
    }
}

/// Operations the branch repository needs from version control.
///
/// All paths are absolute. "Primary working copy" means the repository
/// root; `checkout`, `merge`, and `abort_merge` act on it.
pub trait VcsBackend: Send + Sync {
    /// Revision HEAD of the primary working copy resolves to, `None` when
    /// HEAD is unborn.
    fn head_revision(&self) -> Result<Option<String>, VcsError>;

    /// Look up a local branch, `None` when the reference does not exist.
    fn find_branch(&self, name: &str) -> Result<Option<BranchRef>, VcsError>;

    /// Every local branch, in no particular order.
    fn list_branches(&self) -> Result<Vec<BranchRef>, VcsError>;

    /// Create `refs/heads/<name>` pointing at `revision`.
    fn create_branch(&self, name: &str, revision: &str) -> Result<(), VcsError>;

    /// Delete `refs/heads/<name>`.
    fn delete_branch(&self, name: &str) -> Result<(), VcsError>;

    /// Stage every change below `workdir` and commit it on whatever branch
    /// that working copy has checked out. Returns the new revision, or
    /// `None` when there was nothing to commit and `allow_empty` is false.
    fn commit_all(
        &self,
        workdir: &Path,
        message: &str,
        allow_empty: bool,
    ) -> Result<Option<String>, VcsError>;

    /// Check `branch` out into a new linked worktree at `path`.
    fn add_worktree(&self, path: &Path, branch: &str) -> Result<(), VcsError>;

    /// Unregister the linked worktree at `path` and delete its directory.
    /// A path that is not a registered worktree is not an error.
    fn remove_worktree(&self, path: &Path) -> Result<(), VcsError>;

    /// Switch the primary working copy to `branch`.
    fn checkout(&self, branch: &str) -> Result<ToolOutput, VcsError>;

    /// Merge `source` into the branch checked out in the primary working
    /// copy. Conflicts are reported as git-style `CONFLICT (...)` lines in a
    /// failed [`ToolOutput`].
    fn merge(&self, source: &str, message: &str) -> Result<ToolOutput, VcsError>;

    /// Abandon an in-progress merge in the primary working copy.
    fn abort_merge(&self) -> Result<(), VcsError>;
}

/// Open the repository at `root`, initializing it with HEAD on the trunk if
/// `<root>/.git` does not exist yet.
pub fn open_or_init(
    config: &RepositoryConfig,
    root: &Path,
) -> Result<Arc<dyn VcsBackend>, VcsError> {
    let identity = CommitIdentity::new(&config.author_name, &config.author_email);
    let exists = root.join(".git").exists();
    debug!(root = %root.display(), exists, backend = %config.backend, "opening repository");

    let backend: Arc<dyn VcsBackend> = match config.backend {
        BackendKind::Native => {
            let backend = if exists {
                NativeBackend::open(root, identity)?
            } else {
                NativeBackend::init(root, &config.trunk, identity)?
            };
            Arc::new(backend)
        }
        BackendKind::Cli => {
            let backend = CliBackend::new(root, config.command_timeout(), identity);
            if !exists {
                backend.init(&config.trunk)?;
            }
            Arc::new(backend)
        }
    };
    Ok(backend)
}

/// Whether two paths name the same location, comparing canonical forms when
/// both exist.
pub(crate) fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
