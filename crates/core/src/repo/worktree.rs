//! Lazy, per-branch worktree provisioning.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::locks::hold;
use super::store::RepositoryStore;
use crate::errors::BranchError;
use crate::paths::validate_branch_name;

/// Ensures each branch has a working directory, creating it on first use.
pub struct WorktreeProvisioner {
    store: Arc<RepositoryStore>,
    auto_create_branches: bool,
}

impl WorktreeProvisioner {
    pub fn new(store: Arc<RepositoryStore>, auto_create_branches: bool) -> Self {
        Self {
            store,
            auto_create_branches,
        }
    }

    /// Working directory of `branch`, created if it does not exist yet.
    ///
    /// An existing directory is returned as is. The trunk maps to the
    /// primary working copy and never needs provisioning.
    #[instrument(skip(self))]
    pub fn ensure_worktree(&self, branch: &str) -> Result<PathBuf, BranchError> {
        validate_branch_name(branch)?;
        let paths = self.store.paths();
        let storage = self.store.storage();
        let path = paths.worktree_path(branch);

        if paths.is_trunk(branch) || storage.path_exists(&path) {
            return Ok(path);
        }

        let branch_lock = self.store.locks().branch(branch);
        let _branch = hold(&branch_lock);
        if storage.path_exists(&path) {
            debug!("worktree appeared while waiting for lock");
            return Ok(path);
        }

        if self.store.find_branch(branch)?.is_none() {
            if !self.auto_create_branches {
                return Err(BranchError::BranchNotFound(branch.to_string()));
            }
            match self.store.create_branch(branch) {
                Ok(_) | Err(BranchError::BranchExists(_)) => {}
                Err(e) => return Err(e),
            }
            debug!("created missing branch at trunk");
        }

        let _repo = self.store.locks().read();
        if let Err(e) = self.store.backend().add_worktree(&path, branch) {
            if let Err(cleanup) = storage.cleanup(&path) {
                warn!(path = %path.display(), error = %cleanup, "failed to clean up partial worktree");
            }
            return Err(BranchError::WorktreeCreation {
                branch: branch.to_string(),
                detail: e.to_string(),
            });
        }
        debug!(path = %path.display(), "worktree created");
        Ok(path)
    }
}
