//! The branch repository manager: the operation surface the HTTP API, the
//! daemon, and the CLI call into.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::RepositoryConfig;
use crate::errors::{BranchError, VcsError};
use crate::models::{Branch, BranchStatus, MergeResult};
use crate::paths::PathResolver;
use crate::repo::{MergeEngine, RepositoryStore, WorktreeProvisioner};
use crate::storage::FileSystem;
use crate::telemetry::time_git_operation;
use crate::vcs::VcsBackend;

/// Lifecycle of a [`BranchRepositoryManager`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    Uninitialized,
    Initializing,
    Ready,
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

struct Components {
    store: Arc<RepositoryStore>,
    provisioner: WorktreeProvisioner,
    merger: MergeEngine,
}

enum State {
    Uninitialized,
    Initializing,
    Ready(Arc<Components>),
}

/// Owns the repository and routes every branch operation to the component
/// responsible for it. Operations fail with [`BranchError::NotInitialized`]
/// until [`init`](Self::init) has succeeded.
pub struct BranchRepositoryManager {
    config: RepositoryConfig,
    paths: PathResolver,
    storage: FileSystem,
    state: RwLock<State>,
    init_lock: Mutex<()>,
}

impl BranchRepositoryManager {
    pub fn new(config: RepositoryConfig) -> Self {
        let paths = config.path_resolver();
        Self {
            storage: FileSystem::new(paths.clone()),
            paths,
            config,
            state: RwLock::new(State::Uninitialized),
            init_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn paths(&self) -> &PathResolver {
        &self.paths
    }

    pub fn storage(&self) -> &FileSystem {
        &self.storage
    }

    pub fn state(&self) -> ManagerState {
        match &*self.state.read().unwrap_or_else(|p| p.into_inner()) {
            State::Uninitialized => ManagerState::Uninitialized,
            State::Initializing => ManagerState::Initializing,
            State::Ready(_) => ManagerState::Ready,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ManagerState::Ready
    }

    /// Open or create the repository with the configured backend. A no-op
    /// once ready; a failure leaves the manager uninitialized.
    #[instrument(skip(self), fields(root = %self.paths.root().display()))]
    pub fn init(&self) -> Result<(), BranchError> {
        self.init_inner(|| RepositoryStore::initialize(&self.config, self.paths.clone()))
    }

    /// Like [`init`](Self::init), but on a backend the caller opened.
    pub fn init_with_backend(&self, backend: Arc<dyn VcsBackend>) -> Result<(), BranchError> {
        self.init_inner(|| RepositoryStore::with_backend(backend, self.paths.clone()))
    }

    fn init_inner<F>(&self, open: F) -> Result<(), BranchError>
    where
        F: FnOnce() -> Result<RepositoryStore, BranchError>,
    {
        let _serial = self.init_lock.lock().unwrap_or_else(|p| p.into_inner());
        if self.is_ready() {
            debug!("already initialized");
            return Ok(());
        }
        self.set_state(State::Initializing);

        match open() {
            Ok(store) => {
                let store = Arc::new(store);
                let components = Components {
                    provisioner: WorktreeProvisioner::new(
                        Arc::clone(&store),
                        self.config.auto_create_branches,
                    ),
                    merger: MergeEngine::new(Arc::clone(&store)),
                    store,
                };
                self.set_state(State::Ready(Arc::new(components)));
                debug!("branch repository ready");
                Ok(())
            }
            Err(e) => {
                self.set_state(State::Uninitialized);
                Err(e)
            }
        }
    }

    fn set_state(&self, next: State) {
        *self.state.write().unwrap_or_else(|p| p.into_inner()) = next;
    }

    fn ready(&self) -> Result<Arc<Components>, BranchError> {
        match &*self.state.read().unwrap_or_else(|p| p.into_inner()) {
            State::Ready(components) => Ok(Arc::clone(components)),
            _ => Err(BranchError::NotInitialized),
        }
    }

    pub fn create_branch(&self, name: &str) -> Result<Branch, BranchError> {
        let components = self.ready()?;
        time_git_operation("create_branch", || components.store.create_branch(name))
    }

    pub fn get_branch(&self, name: &str) -> Result<Branch, BranchError> {
        self.ready()?.store.get_branch(name)
    }

    pub fn list_branches(&self) -> Result<Vec<Branch>, BranchError> {
        self.ready()?.store.list_branches()
    }

    pub fn delete_branch(&self, name: &str) -> Result<(), BranchError> {
        let components = self.ready()?;
        time_git_operation("delete_branch", || components.store.delete_branch(name))
    }

    /// Absolute path of the branch's database file, provisioning its
    /// worktree first if needed. The file itself may not exist yet.
    pub fn resolve_database_path(&self, branch: &str) -> Result<PathBuf, BranchError> {
        let components = self.ready()?;
        let worktree = time_git_operation("ensure_worktree", || {
            components.provisioner.ensure_worktree(branch)
        })?;
        Ok(worktree.join(self.paths.db_file_name()))
    }

    /// Commit the branch's working copy. `None` when nothing changed.
    pub fn commit_branch(&self, name: &str, message: &str) -> Result<Option<Branch>, BranchError> {
        let components = self.ready()?;
        time_git_operation("commit", || components.store.commit(name, message))
    }

    pub fn merge(&self, source: &str, target: &str) -> Result<MergeResult, BranchError> {
        let components = self.ready()?;
        time_git_operation("merge", || components.merger.merge(source, target))
    }

    pub fn current_revision(&self) -> Result<String, BranchError> {
        self.ready()?.store.current_revision()
    }

    /// The branch plus the on-disk state of its database. Does not
    /// provision anything.
    pub fn branch_status(&self, name: &str) -> Result<BranchStatus, BranchError> {
        let branch = self.ready()?.store.get_branch(name)?;
        let db_path = self.paths.database_path(name);
        let worktree = self.paths.worktree_path(name);
        let db_exists = db_path.is_file();
        let size = if db_exists {
            self.storage.size(&db_path).map_err(VcsError::from)?
        } else {
            0
        };
        Ok(BranchStatus {
            branch,
            db_path,
            db_exists,
            size,
            worktree_exists: self.storage.path_exists(&worktree),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(root: &std::path::Path) -> BranchRepositoryManager {
        BranchRepositoryManager::new(RepositoryConfig {
            root: root.to_path_buf(),
            ..RepositoryConfig::default()
        })
    }

    #[test]
    fn test_operations_require_init() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        assert_eq!(m.state(), ManagerState::Uninitialized);
        assert!(matches!(m.list_branches(), Err(BranchError::NotInitialized)));
        assert!(matches!(m.current_revision(), Err(BranchError::NotInitialized)));
        assert!(matches!(
            m.resolve_database_path("main"),
            Err(BranchError::NotInitialized)
        ));
        assert!(matches!(m.merge("a", "main"), Err(BranchError::NotInitialized)));
    }

    #[test]
    fn test_init_then_ready() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        m.init().unwrap();
        assert_eq!(m.state(), ManagerState::Ready);
        assert_eq!(m.state().to_string(), "ready");
        m.init().unwrap();
        assert_eq!(m.list_branches().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_init_returns_to_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let m = manager(&blocker.join("repo"));
        assert!(matches!(m.init(), Err(BranchError::RepositoryIo(_))));
        assert_eq!(m.state(), ManagerState::Uninitialized);
    }

    #[test]
    fn test_branch_status() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        m.init().unwrap();
        m.create_branch("feature").unwrap();

        let status = m.branch_status("feature").unwrap();
        assert!(!status.db_exists);
        assert!(!status.worktree_exists);
        assert_eq!(status.size, 0);

        let db = m.resolve_database_path("feature").unwrap();
        std::fs::write(&db, b"12345").unwrap();
        let status = m.branch_status("feature").unwrap();
        assert!(status.db_exists);
        assert!(status.worktree_exists);
        assert_eq!(status.size, 5);
        assert_eq!(status.db_path, db);
    }
}
