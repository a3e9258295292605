//! Ownership of the on-disk git repository and its branch references.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, instrument};

use super::locks::{hold, RepoLocks};
use crate::config::RepositoryConfig;
use crate::errors::{BranchError, VcsError};
use crate::models::Branch;
use crate::paths::{validate_branch_name, PathResolver};
use crate::storage::FileSystem;
use crate::vcs::{self, BranchRef, VcsBackend};

const INITIAL_COMMIT_MESSAGE: &str = "Initial commit";

/// The repository and its references. Shared by the worktree provisioner
/// and the merge engine through an `Arc`.
pub struct RepositoryStore {
    backend: Arc<dyn VcsBackend>,
    paths: PathResolver,
    storage: FileSystem,
    locks: RepoLocks,
}

impl RepositoryStore {
    /// Open or create the repository at the resolver's root with the backend
    /// chosen by `config`.
    #[instrument(skip_all, fields(root = %paths.root().display()))]
    pub fn initialize(config: &RepositoryConfig, paths: PathResolver) -> Result<Self, BranchError> {
        std::fs::create_dir_all(paths.root()).map_err(VcsError::from)?;
        let backend = vcs::open_or_init(config, paths.root())?;
        Self::with_backend(backend, paths)
    }

    /// Finish initialization on an already opened backend: exclude the
    /// worktree base from the primary working copy and make sure there is a
    /// commit to branch from. Idempotent.
    pub fn with_backend(
        backend: Arc<dyn VcsBackend>,
        paths: PathResolver,
    ) -> Result<Self, BranchError> {
        let store = Self {
            backend,
            storage: FileSystem::new(paths.clone()),
            paths,
            locks: RepoLocks::new(),
        };
        store.ensure_worktree_base_excluded()?;
        store.ensure_initial_commit()?;
        Ok(store)
    }

    pub fn backend(&self) -> &Arc<dyn VcsBackend> {
        &self.backend
    }

    pub fn paths(&self) -> &PathResolver {
        &self.paths
    }

    pub fn storage(&self) -> &FileSystem {
        &self.storage
    }

    pub fn locks(&self) -> &RepoLocks {
        &self.locks
    }

    fn ensure_worktree_base_excluded(&self) -> Result<(), BranchError> {
        let git_dir = self.paths.root().join(".git");
        if !git_dir.is_dir() {
            return Ok(());
        }
        let info = git_dir.join("info");
        let exclude = info.join("exclude");
        let entry = format!("/{}/", self.paths.worktree_base_name());

        let existing = match std::fs::read_to_string(&exclude) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(VcsError::from(e).into()),
        };
        if existing.lines().any(|line| line.trim() == entry) {
            return Ok(());
        }

        std::fs::create_dir_all(&info).map_err(VcsError::from)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&exclude)
            .map_err(VcsError::from)?;
        let separator = if existing.is_empty() || existing.ends_with('\n') {
            ""
        } else {
            "\n"
        };
        writeln!(file, "{}{}", separator, entry).map_err(VcsError::from)?;
        debug!(entry, "excluded worktree base");
        Ok(())
    }

    fn ensure_initial_commit(&self) -> Result<(), BranchError> {
        let _repo = self.locks.write();
        if self.backend.head_revision()?.is_none() {
            let rev = self
                .backend
                .commit_all(self.paths.root(), INITIAL_COMMIT_MESSAGE, true)?;
            debug!(?rev, "created initial commit");
        }
        Ok(())
    }

    fn to_branch(&self, r: BranchRef) -> Branch {
        Branch {
            is_main: self.paths.is_trunk(&r.name),
            name: r.name,
            revision: r.revision,
            created_at: r.committed_at,
        }
    }

    /// Record a new reference at the trunk's current revision.
    #[instrument(skip(self))]
    pub fn create_branch(&self, name: &str) -> Result<Branch, BranchError> {
        validate_branch_name(name)?;
        let _repo = self.locks.write();

        if self.backend.find_branch(name)?.is_some() {
            return Err(BranchError::BranchExists(name.to_string()));
        }
        let trunk = self
            .backend
            .find_branch(self.paths.trunk())?
            .ok_or(BranchError::NoCommits)?;
        self.backend.create_branch(name, &trunk.revision)?;

        let created = self
            .backend
            .find_branch(name)?
            .ok_or_else(|| BranchError::BranchNotFound(name.to_string()))?;
        debug!(revision = %created.revision, "branch created");
        Ok(self.to_branch(created))
    }

    pub fn get_branch(&self, name: &str) -> Result<Branch, BranchError> {
        self.find_branch(name)?
            .ok_or_else(|| BranchError::BranchNotFound(name.to_string()))
    }

    /// Like [`get_branch`](Self::get_branch) but a missing branch is `None`.
    pub fn find_branch(&self, name: &str) -> Result<Option<Branch>, BranchError> {
        if validate_branch_name(name).is_err() {
            return Ok(None);
        }
        Ok(self.backend.find_branch(name)?.map(|r| self.to_branch(r)))
    }

    /// All local branches: trunk first, then by name.
    pub fn list_branches(&self) -> Result<Vec<Branch>, BranchError> {
        let mut branches: Vec<Branch> = self
            .backend
            .list_branches()?
            .into_iter()
            .map(|r| self.to_branch(r))
            .collect();
        branches.sort_by(|a, b| b.is_main.cmp(&a.is_main).then_with(|| a.name.cmp(&b.name)));
        Ok(branches)
    }

    /// Remove the branch's worktree, then its reference.
    #[instrument(skip(self))]
    pub fn delete_branch(&self, name: &str) -> Result<(), BranchError> {
        if self.paths.is_trunk(name) {
            return Err(BranchError::TrunkProtected(name.to_string()));
        }
        if validate_branch_name(name).is_err() {
            return Err(BranchError::BranchNotFound(name.to_string()));
        }

        // The branch mutex is kept after delete: waiters already queued on it
        // and later callers share it.
        let branch_lock = self.locks.branch(name);
        let _branch = hold(&branch_lock);
        let _repo = self.locks.write();

        if self.backend.find_branch(name)?.is_none() {
            return Err(BranchError::BranchNotFound(name.to_string()));
        }
        self.remove_worktree_dir(name)?;
        self.backend.delete_branch(name)?;
        debug!("branch deleted");
        Ok(())
    }

    /// Unregister and delete the worktree of `branch`, if present. Callers
    /// hold the branch lock and the exclusive repository lock.
    pub(crate) fn remove_worktree_dir(&self, branch: &str) -> Result<(), BranchError> {
        let path = self.paths.worktree_path(branch);
        if self.paths.is_trunk(branch) || !self.storage.path_exists(&path) {
            return Ok(());
        }
        self.backend.remove_worktree(&path)?;
        self.storage.cleanup(&path).map_err(VcsError::from)?;
        self.prune_empty_parents(&path);
        Ok(())
    }

    /// Remove directories left empty under the worktree base by a nested
    /// branch name.
    fn prune_empty_parents(&self, path: &Path) {
        let base = self.paths.worktree_base();
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == base || !dir.starts_with(&base) {
                break;
            }
            if std::fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }

    /// Revision HEAD of the primary working copy points at.
    pub fn current_revision(&self) -> Result<String, BranchError> {
        self.backend.head_revision()?.ok_or(BranchError::NoCommits)
    }

    /// Stage and commit everything in the branch's working copy. `None`
    /// when the working copy is not provisioned or has no changes.
    #[instrument(skip(self, message))]
    pub fn commit(&self, name: &str, message: &str) -> Result<Option<Branch>, BranchError> {
        if validate_branch_name(name).is_err() {
            return Err(BranchError::BranchNotFound(name.to_string()));
        }
        let branch_lock = self.locks.branch(name);
        let _branch = hold(&branch_lock);
        let _repo = self.locks.write();

        if self.backend.find_branch(name)?.is_none() {
            return Err(BranchError::BranchNotFound(name.to_string()));
        }
        let workdir = self.paths.worktree_path(name);
        if !self.storage.path_exists(&workdir) {
            debug!("branch has no working copy");
            return Ok(None);
        }
        match self.backend.commit_all(&workdir, message, false)? {
            Some(revision) => {
                debug!(%revision, "committed branch");
                let branch = self
                    .backend
                    .find_branch(name)?
                    .ok_or_else(|| BranchError::BranchNotFound(name.to_string()))?;
                Ok(Some(self.to_branch(branch)))
            }
            None => Ok(None),
        }
    }
}
