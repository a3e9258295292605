//! In-process git backend via `git2` (libgit2).
//!
//! libgit2 calls run on the calling thread and cannot be interrupted, so
//! `repository.command_timeout_secs` does not apply to this backend.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use git2::build::CheckoutBuilder;
use git2::{
    BranchType, Commit, ErrorCode, IndexAddOption, IndexConflict, MergeOptions, Oid,
    Repository, RepositoryInitOptions, RepositoryState, ResetType, Signature,
    WorktreeAddOptions, WorktreePruneOptions,
};
use tracing::{debug, instrument};

use super::{same_path, BranchRef, CommitIdentity, ToolOutput, VcsBackend};
use crate::errors::VcsError;

const CONFLICT_FOOTER: &str = "Automatic merge failed; fix conflicts and then commit the result.";

/// libgit2-backed [`VcsBackend`].
pub struct NativeBackend {
    repo: Mutex<Repository>,
    workdir: PathBuf,
    identity: CommitIdentity,
}

impl NativeBackend {
    /// Open an existing repository whose working copy is `root`.
    pub fn open(root: &Path, identity: CommitIdentity) -> Result<Self, VcsError> {
        let repo = Repository::open(root)?;
        Ok(Self {
            repo: Mutex::new(repo),
            workdir: root.to_path_buf(),
            identity,
        })
    }

    /// Create `root` and a repository in it with HEAD pointing at
    /// `refs/heads/<trunk>`.
    pub fn init(root: &Path, trunk: &str, identity: CommitIdentity) -> Result<Self, VcsError> {
        let mut opts = RepositoryInitOptions::new();
        opts.mkpath(true).initial_head(trunk);
        let repo = Repository::init_opts(root, &opts)?;
        debug!(root = %root.display(), trunk, "initialized repository");
        Ok(Self {
            repo: Mutex::new(repo),
            workdir: root.to_path_buf(),
            identity,
        })
    }

    fn repo(&self) -> MutexGuard<'_, Repository> {
        self.repo.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("repository mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn signature(&self) -> Result<Signature<'static>, VcsError> {
        Ok(Signature::now(&self.identity.name, &self.identity.email)?)
    }

    fn commit_in(
        &self,
        repo: &Repository,
        message: &str,
        allow_empty: bool,
    ) -> Result<Option<String>, VcsError> {
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        let tree_id = index.write_tree()?;

        let parent = head_commit(repo)?;
        if let Some(parent) = &parent {
            if parent.tree_id() == tree_id && !allow_empty {
                return Ok(None);
            }
        }

        let tree = repo.find_tree(tree_id)?;
        let sig = self.signature()?;
        let parents: Vec<&Commit> = parent.iter().collect();
        let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        debug!(sha = %oid, "created commit");
        Ok(Some(oid.to_string()))
    }

    /// Path of the linked worktree that has `branch` checked out, if any.
    fn checked_out_elsewhere(repo: &Repository, branch: &str) -> Result<Option<PathBuf>, VcsError> {
        let names = repo.worktrees()?;
        for name in names.iter().flatten() {
            let Ok(worktree) = repo.find_worktree(name) else {
                continue;
            };
            let Ok(linked) = Repository::open_from_worktree(&worktree) else {
                continue;
            };
            let head = match linked.head() {
                Ok(head) => head,
                Err(_) => continue,
            };
            if head.shorthand() == Some(branch) {
                return Ok(Some(worktree.path().to_path_buf()));
            }
        }
        Ok(None)
    }

    fn unique_worktree_name(repo: &Repository, branch: &str) -> String {
        let base: String = branch
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        let mut name = base.clone();
        let mut n = 1;
        while repo.find_worktree(&name).is_ok() {
            n += 1;
            name = format!("{}{}", base, n);
        }
        name
    }
}

impl VcsBackend for NativeBackend {
    fn head_revision(&self) -> Result<Option<String>, VcsError> {
        let repo = self.repo();
        let revision = head_commit(&repo)?.map(|c| c.id().to_string());
        Ok(revision)
    }

    fn find_branch(&self, name: &str) -> Result<Option<BranchRef>, VcsError> {
        let repo = self.repo();
        let branch = match repo.find_branch(name, BranchType::Local) {
            Ok(branch) => branch,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let commit = branch.get().peel_to_commit()?;
        Ok(Some(branch_ref(name, &commit)))
    }

    fn list_branches(&self) -> Result<Vec<BranchRef>, VcsError> {
        let repo = self.repo();
        let mut out = Vec::new();
        for entry in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = entry?;
            let Some(name) = branch.name()? else {
                continue;
            };
            let commit = branch.get().peel_to_commit()?;
            out.push(branch_ref(name, &commit));
        }
        Ok(out)
    }

    #[instrument(skip(self))]
    fn create_branch(&self, name: &str, revision: &str) -> Result<(), VcsError> {
        let repo = self.repo();
        let oid = Oid::from_str(revision)?;
        repo.reference(
            &format!("refs/heads/{}", name),
            oid,
            false,
            &format!("branch: Created from {}", revision),
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn delete_branch(&self, name: &str) -> Result<(), VcsError> {
        let repo = self.repo();
        let mut branch = repo.find_branch(name, BranchType::Local)?;
        branch.delete()?;
        Ok(())
    }

    #[instrument(skip(self, message))]
    fn commit_all(
        &self,
        workdir: &Path,
        message: &str,
        allow_empty: bool,
    ) -> Result<Option<String>, VcsError> {
        if same_path(workdir, &self.workdir) {
            let repo = self.repo();
            self.commit_in(&repo, message, allow_empty)
        } else {
            let linked = Repository::open(workdir)?;
            self.commit_in(&linked, message, allow_empty)
        }
    }

    #[instrument(skip(self))]
    fn add_worktree(&self, path: &Path, branch: &str) -> Result<(), VcsError> {
        let repo = self.repo();
        let reference = repo.find_reference(&format!("refs/heads/{}", branch))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let name = Self::unique_worktree_name(&repo, branch);
        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(&reference));
        repo.worktree(&name, path, Some(&opts))?;
        debug!(name, "worktree added");
        Ok(())
    }

    #[instrument(skip(self))]
    fn remove_worktree(&self, path: &Path) -> Result<(), VcsError> {
        let repo = self.repo();
        let names = repo.worktrees()?;
        for name in names.iter().flatten() {
            let worktree = repo.find_worktree(name)?;
            if !same_path(worktree.path(), path) {
                continue;
            }
            let mut opts = WorktreePruneOptions::new();
            opts.valid(true).locked(false).working_tree(true);
            worktree.prune(Some(&mut opts))?;
            debug!(name, "worktree pruned");
            return Ok(());
        }
        debug!("no registered worktree at path");
        Ok(())
    }

    #[instrument(skip(self))]
    fn checkout(&self, branch: &str) -> Result<ToolOutput, VcsError> {
        let repo = self.repo();
        let refname = format!("refs/heads/{}", branch);
        let reference = match repo.find_reference(&refname) {
            Ok(reference) => reference,
            Err(e) if e.code() == ErrorCode::NotFound => {
                return Ok(ToolOutput::failure(format!(
                    "error: pathspec '{}' did not match any file(s) known to git",
                    branch
                )));
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(path) = Self::checked_out_elsewhere(&repo, branch)? {
            return Ok(ToolOutput::failure(format!(
                "fatal: '{}' is already checked out at '{}'",
                branch,
                path.display()
            )));
        }

        let commit = reference.peel_to_commit()?;
        let mut cb = CheckoutBuilder::new();
        cb.safe();
        if let Err(e) = repo.checkout_tree(commit.as_object(), Some(&mut cb)) {
            return Ok(ToolOutput::failure(format!("error: {}", e.message())));
        }
        repo.set_head(&refname)?;
        Ok(ToolOutput::success(format!("Switched to branch '{}'", branch)))
    }

    #[instrument(skip(self, message))]
    fn merge(&self, source: &str, message: &str) -> Result<ToolOutput, VcsError> {
        let repo = self.repo();
        let source_ref = match repo.find_reference(&format!("refs/heads/{}", source)) {
            Ok(reference) => reference,
            Err(e) if e.code() == ErrorCode::NotFound => {
                return Ok(ToolOutput::failure(format!(
                    "merge: {} - not something we can merge",
                    source
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let incoming = repo.reference_to_annotated_commit(&source_ref)?;
        let (analysis, _) = repo.merge_analysis(&[&incoming])?;

        if analysis.is_up_to_date() {
            return Ok(ToolOutput::success("Already up to date."));
        }

        if analysis.is_fast_forward() {
            let target = repo.find_commit(incoming.id())?;
            let mut head = repo.head()?;
            let old = head.target().map(|o| o.to_string()).unwrap_or_default();
            let mut cb = CheckoutBuilder::new();
            cb.safe();
            if let Err(e) = repo.checkout_tree(target.as_object(), Some(&mut cb)) {
                return Ok(ToolOutput::failure(format!("error: {}", e.message())));
            }
            head.set_target(target.id(), &format!("merge {}: Fast-forward", source))?;
            let new = target.id().to_string();
            return Ok(ToolOutput::success(format!(
                "Updating {}..{}\nFast-forward",
                short(&old),
                short(&new)
            )));
        }

        let mut merge_opts = MergeOptions::new();
        let mut cb = CheckoutBuilder::new();
        cb.safe().allow_conflicts(true).conflict_style_merge(true);
        if let Err(e) = repo.merge(&[&incoming], Some(&mut merge_opts), Some(&mut cb)) {
            return Ok(ToolOutput::failure(format!("error: {}", e.message())));
        }

        let mut index = repo.index()?;
        if index.has_conflicts() {
            let mut lines = Vec::new();
            for conflict in index.conflicts()? {
                lines.push(describe_conflict(&conflict?));
            }
            lines.push(CONFLICT_FOOTER.to_string());
            return Ok(ToolOutput::failure(lines.join("\n")));
        }

        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = self.signature()?;
        let ours = repo.head()?.peel_to_commit()?;
        let theirs = repo.find_commit(incoming.id())?;
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&ours, &theirs])?;
        repo.cleanup_state()?;
        Ok(ToolOutput::success("Merge made by the 'ort' strategy."))
    }

    #[instrument(skip(self))]
    fn abort_merge(&self) -> Result<(), VcsError> {
        let repo = self.repo();
        if repo.state() != RepositoryState::Merge {
            debug!("no merge in progress");
            return Ok(());
        }

        // Only paths the merge touched are restored; unrelated local edits
        // survive, as with `git merge --abort`.
        let head = repo.head()?.peel_to_commit()?;
        let head_tree = head.tree()?;
        let index = repo.index()?;
        let mut touched = BTreeSet::new();
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            for entry in [&conflict.ancestor, &conflict.our, &conflict.their]
                .into_iter()
                .flatten()
            {
                touched.insert(String::from_utf8_lossy(&entry.path).into_owned());
            }
        }
        let staged = repo.diff_tree_to_index(Some(&head_tree), Some(&index), None)?;
        for delta in staged.deltas() {
            if let Some(path) = delta.new_file().path() {
                touched.insert(path.to_string_lossy().into_owned());
            }
        }

        repo.reset(head.as_object(), ResetType::Mixed, None)?;
        if !touched.is_empty() {
            let mut cb = CheckoutBuilder::new();
            cb.force().remove_untracked(true);
            for path in &touched {
                cb.path(path.as_str());
            }
            repo.checkout_tree(head.as_object(), Some(&mut cb))?;
        }
        repo.cleanup_state()?;
        debug!(paths = touched.len(), "merge aborted");
        Ok(())
    }
}

fn head_commit(repo: &Repository) -> Result<Option<Commit<'_>>, VcsError> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?)),
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn branch_ref(name: &str, commit: &Commit<'_>) -> BranchRef {
    BranchRef {
        name: name.to_string(),
        revision: commit.id().to_string(),
        committed_at: timestamp(commit.author().when().seconds()),
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn describe_conflict(conflict: &IndexConflict) -> String {
    let path = [&conflict.our, &conflict.their, &conflict.ancestor]
        .into_iter()
        .flatten()
        .next()
        .map(|e| String::from_utf8_lossy(&e.path).into_owned())
        .unwrap_or_default();
    match (&conflict.ancestor, &conflict.our, &conflict.their) {
        (None, Some(_), Some(_)) => format!("CONFLICT (add/add): Merge conflict in {}", path),
        (Some(_), Some(_), Some(_)) => format!("CONFLICT (content): Merge conflict in {}", path),
        _ => format!(
            "CONFLICT (modify/delete): {} deleted in one branch and modified in the other.",
            path
        ),
    }
}

fn short(rev: &str) -> &str {
    &rev[..rev.len().min(7)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> CommitIdentity {
        CommitIdentity::new("Test", "test@example.com")
    }

    fn init_with_commit(root: &Path) -> NativeBackend {
        let backend = NativeBackend::init(root, "main", identity()).unwrap();
        std::fs::write(root.join(".git/info/exclude"), "/worktrees/\n").unwrap();
        backend.commit_all(root, "Initial commit", true).unwrap();
        backend
    }

    #[test]
    fn test_init_points_head_at_trunk() {
        let dir = tempfile::tempdir().unwrap();
        let backend = NativeBackend::init(dir.path(), "main", identity()).unwrap();
        assert_eq!(backend.head_revision().unwrap(), None);

        let rev = backend.commit_all(dir.path(), "Initial commit", true).unwrap();
        assert!(rev.is_some());
        assert_eq!(backend.head_revision().unwrap(), rev);

        let main = backend.find_branch("main").unwrap().expect("main exists");
        assert_eq!(Some(main.revision), rev);
    }

    #[test]
    fn test_commit_all_skips_unchanged_tree() {
        let dir = tempfile::tempdir().unwrap();
        let backend = init_with_commit(dir.path());
        assert_eq!(backend.commit_all(dir.path(), "nothing", false).unwrap(), None);

        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        assert!(backend.commit_all(dir.path(), "add a", false).unwrap().is_some());
    }

    #[test]
    fn test_branch_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let backend = init_with_commit(dir.path());
        let head = backend.head_revision().unwrap().unwrap();

        backend.create_branch("feature", &head).unwrap();
        let feature = backend.find_branch("feature").unwrap().unwrap();
        assert_eq!(feature.revision, head);
        assert_eq!(backend.list_branches().unwrap().len(), 2);

        backend.delete_branch("feature").unwrap();
        assert!(backend.find_branch("feature").unwrap().is_none());
    }

    #[test]
    fn test_worktree_add_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let backend = init_with_commit(dir.path());
        let head = backend.head_revision().unwrap().unwrap();
        backend.create_branch("team/alice", &head).unwrap();

        let path = dir.path().join("worktrees").join("team").join("alice");
        backend.add_worktree(&path, "team/alice").unwrap();
        assert!(path.join(".git").exists());

        std::fs::write(path.join("notes.txt"), "hi").unwrap();
        let rev = backend.commit_all(&path, "notes", false).unwrap().unwrap();
        assert_eq!(backend.find_branch("team/alice").unwrap().unwrap().revision, rev);
        assert_eq!(backend.head_revision().unwrap().unwrap(), head);

        backend.remove_worktree(&path).unwrap();
        assert!(!path.exists());
        backend.delete_branch("team/alice").unwrap();
    }

    #[test]
    fn test_checkout_refuses_branch_held_by_worktree() {
        let dir = tempfile::tempdir().unwrap();
        let backend = init_with_commit(dir.path());
        let head = backend.head_revision().unwrap().unwrap();
        backend.create_branch("feature", &head).unwrap();
        backend
            .add_worktree(&dir.path().join("worktrees").join("feature"), "feature")
            .unwrap();

        let out = backend.checkout("feature").unwrap();
        assert!(!out.success);
        assert!(out.text.contains("already checked out"));

        let out = backend.checkout("missing").unwrap();
        assert!(!out.success);
    }

    #[test]
    fn test_merge_reports_content_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let backend = init_with_commit(root);
        std::fs::write(root.join("data.txt"), "base\n").unwrap();
        backend.commit_all(root, "base", false).unwrap();
        let base = backend.head_revision().unwrap().unwrap();
        backend.create_branch("feature", &base).unwrap();

        let wt = root.join("worktrees").join("feature");
        backend.add_worktree(&wt, "feature").unwrap();
        std::fs::write(wt.join("data.txt"), "feature\n").unwrap();
        backend.commit_all(&wt, "feature edit", false).unwrap();

        std::fs::write(root.join("data.txt"), "main\n").unwrap();
        backend.commit_all(root, "main edit", false).unwrap();

        let out = backend.merge("feature", "Merge feature").unwrap();
        assert!(!out.success);
        assert!(out
            .text
            .contains("CONFLICT (content): Merge conflict in data.txt"));

        backend.abort_merge().unwrap();
        assert_eq!(std::fs::read_to_string(root.join("data.txt")).unwrap(), "main\n");
    }

    #[test]
    fn test_merge_fast_forward() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let backend = init_with_commit(root);
        let base = backend.head_revision().unwrap().unwrap();
        backend.create_branch("feature", &base).unwrap();
        let wt = root.join("worktrees").join("feature");
        backend.add_worktree(&wt, "feature").unwrap();
        std::fs::write(wt.join("new.txt"), "x").unwrap();
        let rev = backend.commit_all(&wt, "add", false).unwrap().unwrap();

        let out = backend.merge("feature", "Merge feature").unwrap();
        assert!(out.success, "{}", out.text);
        assert!(out.text.contains("Fast-forward"));
        assert_eq!(backend.head_revision().unwrap().unwrap(), rev);
        assert!(root.join("new.txt").exists());
    }
}
