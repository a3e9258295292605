//! Filesystem helpers for worktree directories and branch database files.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::paths::PathResolver;

/// Filesystem operations the repository needs beyond version control.
#[derive(Debug, Clone)]
pub struct FileSystem {
    paths: PathResolver,
}

impl FileSystem {
    pub fn new(paths: PathResolver) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &PathResolver {
        &self.paths
    }

    pub fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    /// Size in bytes of a file, or the recursive total of a directory.
    /// A missing path has size 0.
    pub fn size(&self, path: &Path) -> io::Result<u64> {
        let meta = match std::fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        if !meta.is_dir() {
            return Ok(meta.len());
        }
        let mut total = 0;
        for entry in std::fs::read_dir(path)? {
            total += self.size(&entry?.path())?;
        }
        Ok(total)
    }

    /// Recursively delete `path`. Deleting something that is already gone
    /// succeeds.
    pub fn cleanup(&self, path: &Path) -> io::Result<()> {
        let result = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
        match result {
            Ok(()) => {
                debug!(path = %path.display(), "removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Database file of every provisioned branch whose file exists, trunk
    /// included, keyed by branch name.
    pub fn branch_databases(&self) -> io::Result<BTreeMap<String, PathBuf>> {
        let mut found = BTreeMap::new();

        let trunk_db = self.paths.database_path(self.paths.trunk());
        if trunk_db.is_file() {
            found.insert(self.paths.trunk().to_string(), trunk_db);
        }

        let base = self.paths.worktree_base();
        if base.is_dir() {
            self.scan_worktrees(&base, &mut found)?;
        }
        Ok(found)
    }

    /// A directory holding a `.git` file is a worktree; anything else is an
    /// intermediate directory of a branch name containing `/`.
    fn scan_worktrees(&self, dir: &Path, found: &mut BTreeMap<String, PathBuf>) -> io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if path.join(".git").exists() {
                let db = path.join(self.paths.db_file_name());
                if db.is_file() {
                    if let Some(branch) = self.paths.branch_for_worktree(&path) {
                        found.insert(branch, db);
                    }
                }
            } else {
                self.scan_worktrees(&path, found)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs_for(root: &Path) -> FileSystem {
        FileSystem::new(PathResolver::new(root, "worktrees", "db.sqlite", "main"))
    }

    fn fake_worktree(fs: &FileSystem, branch: &str, with_db: bool) {
        let wt = fs.paths().worktree_path(branch);
        std::fs::create_dir_all(&wt).unwrap();
        std::fs::write(wt.join(".git"), "gitdir: /elsewhere").unwrap();
        if with_db {
            std::fs::write(wt.join("db.sqlite"), b"0123456789").unwrap();
        }
    }

    #[test]
    fn test_size_of_file_and_dir() {
        let dir = tempfile::tempdir().unwrap();
        let fs = fs_for(dir.path());
        let sub = dir.path().join("a").join("b");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("one"), b"12345").unwrap();
        std::fs::write(dir.path().join("a").join("two"), b"123").unwrap();

        assert_eq!(fs.size(&sub.join("one")).unwrap(), 5);
        assert_eq!(fs.size(&dir.path().join("a")).unwrap(), 8);
        assert_eq!(fs.size(&dir.path().join("missing")).unwrap(), 0);
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let fs = fs_for(dir.path());
        let target = dir.path().join("gone");
        std::fs::create_dir_all(target.join("inner")).unwrap();
        assert!(fs.path_exists(&target));

        fs.cleanup(&target).unwrap();
        assert!(!fs.path_exists(&target));
        fs.cleanup(&target).unwrap();
    }

    #[test]
    fn test_branch_databases() {
        let dir = tempfile::tempdir().unwrap();
        let fs = fs_for(dir.path());
        std::fs::write(dir.path().join("db.sqlite"), b"x").unwrap();
        fake_worktree(&fs, "feature", true);
        fake_worktree(&fs, "team/alice", true);
        fake_worktree(&fs, "empty", false);

        let dbs = fs.branch_databases().unwrap();
        let names: Vec<&str> = dbs.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["feature", "main", "team/alice"]);
        assert_eq!(dbs["team/alice"], fs.paths().database_path("team/alice"));
    }
}
