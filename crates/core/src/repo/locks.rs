//! In-process locking for repository mutations.
//!
//! Two layers: one mutex per branch name for provisioning and deletion, and
//! a repository-wide `RwLock` around git state. Always take a branch lock
//! before the repository lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
pub struct RepoLocks {
    repo: RwLock<()>,
    branches: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RepoLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex serializing work on `branch`. Lock it with [`hold`].
    /// Entries are never removed, so every caller for one name gets the
    /// same mutex for the lifetime of the process.
    pub fn branch(&self, branch: &str) -> Arc<Mutex<()>> {
        let mut branches = self.branches.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(branches.entry(branch.to_string()).or_default())
    }

    /// Shared repository lock, for operations that add worktrees.
    pub fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.repo.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Exclusive repository lock, for reference changes, commits, merges.
    pub fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.repo.write().unwrap_or_else(|p| p.into_inner())
    }
}

/// Lock a branch mutex, recovering from poison.
pub fn hold(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(|p| p.into_inner())
}
