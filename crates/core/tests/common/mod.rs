//! Shared helpers for the core integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};

use branchlore_core::config::{BackendKind, RepositoryConfig};
use branchlore_core::errors::VcsError;
use branchlore_core::vcs::{BranchRef, ToolOutput, VcsBackend};
use branchlore_core::{BranchDatabase, BranchRepositoryManager, QueryOutcome};

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn repo_config(root: &Path, backend: BackendKind) -> RepositoryConfig {
    RepositoryConfig {
        root: root.to_path_buf(),
        backend,
        command_timeout_secs: 30,
        ..RepositoryConfig::default()
    }
}

pub fn ready_manager(root: &Path, backend: BackendKind) -> BranchRepositoryManager {
    let manager = BranchRepositoryManager::new(repo_config(root, backend));
    manager.init().expect("init failed");
    manager
}

/// Insert one row into the branch's `demo` table, creating the database if
/// needed, and close the connection again.
pub fn insert_demo_row(manager: &BranchRepositoryManager, branch: &str, msg: &str) -> PathBuf {
    let path = manager.resolve_database_path(branch).unwrap();
    let db = BranchDatabase::open(&path).unwrap();
    db.execute(&format!("INSERT INTO demo (msg) VALUES ('{}')", msg))
        .unwrap();
    path
}

pub fn demo_messages(path: &Path) -> Vec<String> {
    let db = BranchDatabase::open(path).unwrap();
    match db.execute("SELECT msg FROM demo ORDER BY id").unwrap() {
        QueryOutcome::Rows { rows, .. } => rows
            .into_iter()
            .map(|row| row[0].as_str().unwrap_or_default().to_string())
            .collect(),
        other => panic!("expected rows, got {:?}", other),
    }
}

/// Backend wrapper that counts worktree creations.
pub struct CountingBackend<B> {
    pub inner: B,
    pub worktrees_added: AtomicUsize,
}

impl<B> CountingBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            worktrees_added: AtomicUsize::new(0),
        }
    }

    pub fn adds(&self) -> usize {
        self.worktrees_added.load(Ordering::SeqCst)
    }
}

impl<B: VcsBackend> VcsBackend for CountingBackend<B> {
    fn head_revision(&self) -> Result<Option<String>, VcsError> {
        self.inner.head_revision()
    }
    fn find_branch(&self, name: &str) -> Result<Option<BranchRef>, VcsError> {
        self.inner.find_branch(name)
    }
    fn list_branches(&self) -> Result<Vec<BranchRef>, VcsError> {
        self.inner.list_branches()
    }
    fn create_branch(&self, name: &str, revision: &str) -> Result<(), VcsError> {
        self.inner.create_branch(name, revision)
    }
    fn delete_branch(&self, name: &str) -> Result<(), VcsError> {
        self.inner.delete_branch(name)
    }
    fn commit_all(
        &self,
        workdir: &Path,
        message: &str,
        allow_empty: bool,
    ) -> Result<Option<String>, VcsError> {
        self.inner.commit_all(workdir, message, allow_empty)
    }
    fn add_worktree(&self, path: &Path, branch: &str) -> Result<(), VcsError> {
        self.worktrees_added.fetch_add(1, Ordering::SeqCst);
        self.inner.add_worktree(path, branch)
    }
    fn remove_worktree(&self, path: &Path) -> Result<(), VcsError> {
        self.inner.remove_worktree(path)
    }
    fn checkout(&self, branch: &str) -> Result<ToolOutput, VcsError> {
        self.inner.checkout(branch)
    }
    fn merge(&self, source: &str, message: &str) -> Result<ToolOutput, VcsError> {
        self.inner.merge(source, message)
    }
    fn abort_merge(&self) -> Result<(), VcsError> {
        self.inner.abort_merge()
    }
}
