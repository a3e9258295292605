//! Branch merges in the primary working copy.

use std::sync::Arc;

use tracing::{debug, instrument};

use super::store::RepositoryStore;
use crate::errors::{BranchError, VcsError};
use crate::models::MergeResult;
use crate::paths::validate_branch_name;
use crate::vcs::ToolOutput;

const CONFLICT_MARKER: &str = "CONFLICT";

/// Every diagnostic line that reports a conflict, trimmed, in order.
pub fn parse_conflicts(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.contains(CONFLICT_MARKER))
        .map(|line| line.trim().to_string())
        .collect()
}

fn classify(out: ToolOutput) -> MergeResult {
    let conflicts = if !out.success && out.text.contains(CONFLICT_MARKER) {
        parse_conflicts(&out.text)
    } else {
        Vec::new()
    };
    MergeResult {
        success: out.success,
        conflicts,
        message: out.text,
    }
}

fn checkout_failed(target: &str, output: &str) -> BranchError {
    BranchError::RepositoryIo(VcsError::CommandFailed {
        command: format!("git checkout {} --", target),
        exit_code: 1,
        output: output.to_string(),
    })
}

/// Merges branches by checking the target out in the primary working copy.
pub struct MergeEngine {
    store: Arc<RepositoryStore>,
}

impl MergeEngine {
    pub fn new(store: Arc<RepositoryStore>) -> Self {
        Self { store }
    }

    /// Merge `source` into `target`.
    ///
    /// Both names must be local branches. A `target` that is not one, or
    /// that cannot be checked out, is an error. A `source` that is not one
    /// is a failed [`MergeResult`], as is anything that goes wrong during
    /// the merge itself. Afterwards a failed merge is aborted and the
    /// primary working copy is put back on the trunk; neither step affects
    /// the result.
    #[instrument(skip(self))]
    pub fn merge(&self, source: &str, target: &str) -> Result<MergeResult, BranchError> {
        let _repo = self.store.locks().write();
        let backend = self.store.backend();
        let trunk = self.store.paths().trunk();

        if let Err(e) = validate_branch_name(target) {
            return Err(checkout_failed(target, &e.to_string()));
        }
        if backend.find_branch(target)?.is_none() {
            return Err(checkout_failed(
                target,
                &format!("branch '{}' does not exist", target),
            ));
        }
        let source_known = validate_branch_name(source).is_ok()
            && backend.find_branch(source)?.is_some();
        if !source_known {
            debug!("merge source is not a branch");
            return Ok(MergeResult {
                success: false,
                conflicts: Vec::new(),
                message: format!("merge: {} - not something we can merge", source),
            });
        }

        let checkout = backend.checkout(target)?;
        if !checkout.success {
            return Err(checkout_failed(target, checkout.text.trim()));
        }

        let message = format!("Merge branch '{}' into {}", source, target);
        let outcome = backend.merge(source, &message);

        let result = match outcome {
            Ok(out) => Ok(classify(out)),
            Err(e) => Err(BranchError::from(e)),
        };

        if !matches!(result, Ok(MergeResult { success: true, .. })) {
            if let Err(e) = backend.abort_merge() {
                debug!(error = %e, "merge abort failed");
            }
        }
        if target != trunk {
            match backend.checkout(trunk) {
                Ok(out) if out.success => {}
                Ok(out) => debug!(output = %out.text.trim(), "could not return to trunk"),
                Err(e) => debug!(error = %e, "could not return to trunk"),
            }
        }

        if let Ok(merge) = &result {
            debug!(
                success = merge.success,
                conflicts = merge.conflicts.len(),
                "merge finished"
            );
        }
        result
    }
}
