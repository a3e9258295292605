//! Error types for the Branchlore core library.
//!
//! Each subsystem has its own error type derived with `thiserror`.
//! [`BranchError`] is what the manager returns; backend failures reach it
//! through [`BranchError::RepositoryIo`].

use thiserror::Error;

// ---------------------------------------------------------------------------
// Branch manager errors
// ---------------------------------------------------------------------------

/// Failures surfaced by the branch repository manager.
#[derive(Debug, Error)]
pub enum BranchError {
    /// An operation was attempted before initialization succeeded.
    #[error("branch repository is not initialized")]
    NotInitialized,

    /// Filesystem or version-control failure, with the tool's diagnostic.
    #[error("repository I/O error: {0}")]
    RepositoryIo(#[from] VcsError),

    /// No reference exists for the branch.
    #[error("branch '{0}' not found")]
    BranchNotFound(String),

    /// A reference with this name already exists.
    #[error("branch '{0}' already exists")]
    BranchExists(String),

    /// The repository has no revision to branch from.
    #[error("repository has no commits")]
    NoCommits,

    /// Materializing the branch's worktree failed.
    #[error("failed to create worktree for branch '{branch}': {detail}")]
    WorktreeCreation { branch: String, detail: String },

    /// The trunk branch cannot be deleted.
    #[error("branch '{0}' is the trunk and cannot be deleted")]
    TrunkProtected(String),

    /// The branch name cannot be used as a reference or a path segment.
    #[error("invalid branch name '{name}': {reason}")]
    InvalidBranchName { name: String, reason: String },
}

impl BranchError {
    /// Short machine-readable code, used by the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::RepositoryIo(_) => "REPOSITORY_IO",
            Self::BranchNotFound(_) => "BRANCH_NOT_FOUND",
            Self::BranchExists(_) => "BRANCH_EXISTS",
            Self::NoCommits => "NO_COMMITS",
            Self::WorktreeCreation { .. } => "WORKTREE_ERROR",
            Self::TrunkProtected(_) => "TRUNK_PROTECTED",
            Self::InvalidBranchName { .. } => "INVALID_BRANCH_NAME",
        }
    }

    pub(crate) fn invalid_name(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidBranchName {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Version-control backend errors
// ---------------------------------------------------------------------------

/// Errors from the version-control backends (libgit2 or the `git` binary).
#[derive(Debug, Error)]
pub enum VcsError {
    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2(#[from] git2::Error),

    /// The `git` binary was not found on `$PATH`.
    #[error("git binary not found: {0}")]
    BinaryNotFound(String),

    /// A `git` command exited with a non-zero status.
    #[error("`{command}` failed (exit {exit_code}): {output}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    /// A `git` command did not finish within its budget and was killed.
    #[error("`{command}` timed out after {timeout_ms}ms")]
    TimedOut { command: String, timeout_ms: u64 },

    /// Generic I/O wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// TOML serialization error.
    #[error("configuration serialize error: {0}")]
    SerializeError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading or writing the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from a branch's SQLite database.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// The statement text was empty.
    #[error("empty SQL statement")]
    EmptyStatement,

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = BranchError::BranchNotFound("feature".into());
        assert_eq!(err.to_string(), "branch 'feature' not found");

        let err = BranchError::TrunkProtected("main".into());
        assert!(err.to_string().contains("cannot be deleted"));

        let err = VcsError::CommandFailed {
            command: "git checkout nope --".into(),
            exit_code: 1,
            output: "error: pathspec 'nope' did not match".into(),
        };
        assert!(err.to_string().contains("pathspec"));

        let err = ConfigError::InvalidValue {
            field: "repository.trunk".into(),
            detail: "must not be empty".into(),
        };
        assert!(err.to_string().contains("repository.trunk"));
    }

    #[test]
    fn test_vcs_error_becomes_repository_io() {
        let err: BranchError = VcsError::TimedOut {
            command: "git merge feature".into(),
            timeout_ms: 5_000,
        }
        .into();
        assert!(matches!(err, BranchError::RepositoryIo(VcsError::TimedOut { .. })));
        assert_eq!(err.code(), "REPOSITORY_IO");
        assert!(err.to_string().contains("5000ms"));
    }
}
