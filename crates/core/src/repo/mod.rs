//! Components behind the branch repository manager.
//!
//! - [`store`] owns the git repository and its branch references.
//! - [`worktree`] materializes per-branch working directories on demand.
//! - [`merge`] merges one branch into another in the primary working copy.
//! - [`locks`] serializes the three against each other.

pub mod locks;
pub mod merge;
pub mod store;
pub mod worktree;

pub use locks::RepoLocks;
pub use merge::{parse_conflicts, MergeEngine};
pub use store::RepositoryStore;
pub use worktree::WorktreeProvisioner;
