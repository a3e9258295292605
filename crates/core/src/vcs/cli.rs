//! Git backend that shells out to the `git` binary.
//!
//! Every invocation runs with `LC_ALL=C` so diagnostics are not localized,
//! and is killed if it outlives the configured timeout.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use super::{BranchRef, CommitIdentity, ToolOutput, VcsBackend};
use crate::errors::VcsError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const READ_GRACE: Duration = Duration::from_secs(2);

/// [`VcsBackend`] driving the `git` command-line tool.
#[derive(Debug, Clone)]
pub struct CliBackend {
    binary: String,
    workdir: PathBuf,
    timeout: Duration,
    identity: CommitIdentity,
}

impl CliBackend {
    pub fn new(root: &Path, timeout: Duration, identity: CommitIdentity) -> Self {
        Self {
            binary: "git".into(),
            workdir: root.to_path_buf(),
            timeout,
            identity,
        }
    }

    /// Use a different executable than `git` from `$PATH`.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Create the working copy directory and an empty repository whose HEAD
    /// points at `refs/heads/<trunk>`.
    #[instrument(skip(self), fields(root = %self.workdir.display()))]
    pub fn init(&self, trunk: &str) -> Result<(), VcsError> {
        std::fs::create_dir_all(&self.workdir)?;
        self.run_checked(&self.workdir, &["init", "-q"])?;
        let head = format!("refs/heads/{}", trunk);
        self.run_checked(&self.workdir, &["symbolic-ref", "HEAD", &head])?;
        Ok(())
    }

    /// Run git in `dir`. A non-zero exit is reported in the returned
    /// [`GitOutput`]; only spawn failures and timeouts are errors.
    fn exec(&self, dir: &Path, args: &[&str]) -> Result<GitOutput, VcsError> {
        let command = format!("git {}", args.join(" "));
        debug!(cmd = %command, dir = %dir.display(), "running git command");

        let mut cmd = Command::new(&self.binary);
        cmd.current_dir(dir)
            .args(["-c", "commit.gpgsign=false"])
            .args(args)
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_AUTHOR_NAME", &self.identity.name)
            .env("GIT_AUTHOR_EMAIL", &self.identity.email)
            .env("GIT_COMMITTER_NAME", &self.identity.name)
            .env("GIT_COMMITTER_EMAIL", &self.identity.email)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VcsError::BinaryNotFound(self.binary.clone())
            } else {
                VcsError::Io(e)
            }
        })?;

        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                if let Err(e) = child.kill() {
                    debug!(cmd = %command, error = %e, "failed to kill git command");
                }
                let _ = child.wait();
                debug!(cmd = %command, "git command timed out");
                return Err(VcsError::TimedOut {
                    command,
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        // A process that git left running in the background can hold the
        // pipes open after git exits, so the readers get a deadline too.
        let stdout_buf = collect(&stdout, READ_GRACE);
        let stderr_buf = collect(&stderr, READ_GRACE);

        let mut text = String::from_utf8_lossy(&stdout_buf).into_owned();
        let stderr_text = String::from_utf8_lossy(&stderr_buf);
        if !stderr_text.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr_text);
        }

        if !status.success() {
            debug!(cmd = %command, code = ?status.code(), "git command failed");
        }
        Ok(GitOutput {
            command,
            exit_code: status.code().unwrap_or(-1),
            text,
        })
    }

    fn run(&self, dir: &Path, args: &[&str]) -> Result<ToolOutput, VcsError> {
        let out = self.exec(dir, args)?;
        Ok(ToolOutput {
            success: out.exit_code == 0,
            text: out.text,
        })
    }

    /// Like [`exec`](Self::exec) but a non-zero exit becomes
    /// [`VcsError::CommandFailed`]. Returns stdout and stderr combined.
    fn run_checked(&self, dir: &Path, args: &[&str]) -> Result<String, VcsError> {
        self.exec(dir, args)?.into_result()
    }

    fn branch_refs(&self, pattern: &str) -> Result<Vec<BranchRef>, VcsError> {
        let out = self.run_checked(
            &self.workdir,
            &[
                "for-each-ref",
                "--format=%(refname)%09%(objectname)%09%(authordate:unix)",
                pattern,
            ],
        )?;
        Ok(out.lines().filter_map(parse_ref_line).collect())
    }
}

/// Raw result of one git invocation.
struct GitOutput {
    command: String,
    exit_code: i32,
    text: String,
}

impl GitOutput {
    fn into_result(self) -> Result<String, VcsError> {
        if self.exit_code == 0 {
            return Ok(self.text);
        }
        Err(VcsError::CommandFailed {
            command: self.command,
            exit_code: self.exit_code,
            output: self.text.trim().to_string(),
        })
    }
}

impl VcsBackend for CliBackend {
    fn head_revision(&self) -> Result<Option<String>, VcsError> {
        let out = self.run(&self.workdir, &["rev-parse", "--verify", "-q", "HEAD^{commit}"])?;
        if !out.success {
            return Ok(None);
        }
        Ok(Some(out.text.trim().to_string()))
    }

    fn find_branch(&self, name: &str) -> Result<Option<BranchRef>, VcsError> {
        let refs = self.branch_refs(&format!("refs/heads/{}", name))?;
        Ok(refs.into_iter().find(|r| r.name == name))
    }

    fn list_branches(&self) -> Result<Vec<BranchRef>, VcsError> {
        self.branch_refs("refs/heads")
    }

    #[instrument(skip(self))]
    fn create_branch(&self, name: &str, revision: &str) -> Result<(), VcsError> {
        self.run_checked(&self.workdir, &["branch", name, revision])?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn delete_branch(&self, name: &str) -> Result<(), VcsError> {
        self.run_checked(&self.workdir, &["branch", "-D", name])?;
        Ok(())
    }

    #[instrument(skip(self, message))]
    fn commit_all(
        &self,
        workdir: &Path,
        message: &str,
        allow_empty: bool,
    ) -> Result<Option<String>, VcsError> {
        self.run_checked(workdir, &["add", "-A"])?;
        let status = self.run_checked(workdir, &["status", "--porcelain"])?;
        if status.trim().is_empty() && !allow_empty {
            return Ok(None);
        }
        let mut args = vec!["commit", "-q", "-m", message];
        if allow_empty {
            args.push("--allow-empty");
        }
        self.run_checked(workdir, &args)?;
        let rev = self.run_checked(workdir, &["rev-parse", "HEAD"])?;
        Ok(Some(rev.trim().to_string()))
    }

    #[instrument(skip(self))]
    fn add_worktree(&self, path: &Path, branch: &str) -> Result<(), VcsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let path_str = path.to_string_lossy();
        self.run_checked(&self.workdir, &["worktree", "add", &path_str, branch])?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn remove_worktree(&self, path: &Path) -> Result<(), VcsError> {
        let path_str = path.to_string_lossy();
        let out = self.exec(&self.workdir, &["worktree", "remove", "--force", &path_str])?;
        if out.exit_code != 0 && !out.text.contains("is not a working tree") {
            out.into_result()?;
        }
        self.run_checked(&self.workdir, &["worktree", "prune"])?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn checkout(&self, branch: &str) -> Result<ToolOutput, VcsError> {
        self.run(&self.workdir, &["checkout", branch, "--"])
    }

    #[instrument(skip(self, message))]
    fn merge(&self, source: &str, message: &str) -> Result<ToolOutput, VcsError> {
        self.run(&self.workdir, &["merge", "--no-edit", "-m", message, source])
    }

    #[instrument(skip(self))]
    fn abort_merge(&self) -> Result<(), VcsError> {
        self.run_checked(&self.workdir, &["merge", "--abort"])?;
        Ok(())
    }
}

/// Drain a child pipe on its own thread. The buffer arrives on the
/// returned channel once the pipe closes.
fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send(buf);
    });
    rx
}

fn collect(rx: &Receiver<Vec<u8>>, grace: Duration) -> Vec<u8> {
    match rx.recv_timeout(grace) {
        Ok(buf) => buf,
        Err(_) => {
            debug!("git output pipe still open after exit, ignoring remainder");
            Vec::new()
        }
    }
}

/// Parse one `refname<TAB>objectname<TAB>authordate` line.
fn parse_ref_line(line: &str) -> Option<BranchRef> {
    let mut parts = line.split('\t');
    let refname = parts.next()?;
    let revision = parts.next()?;
    let secs: i64 = parts.next()?.trim().parse().ok()?;
    let name = refname.strip_prefix("refs/heads/")?;
    Some(BranchRef {
        name: name.to_string(),
        revision: revision.to_string(),
        committed_at: DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default(),
    })
}
