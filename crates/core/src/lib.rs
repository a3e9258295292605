//! Branchlore core library.
//!
//! Git-style branching for SQLite databases: every branch is a git
//! reference, and its database lives in a git worktree that is created the
//! first time the branch is used. This crate holds the branch repository
//! manager and everything beneath it: configuration, path mapping, the
//! version-control backends, worktree provisioning, merging, and access to
//! the per-branch SQLite files.

pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod manager;
pub mod models;
pub mod paths;
pub mod repo;
pub mod storage;
pub mod telemetry;
pub mod vcs;

// Re-exports for convenience.
pub use cache::BranchCache;
pub use config::AppConfig;
pub use db::{BranchDatabase, QueryOutcome};
pub use errors::BranchError;
pub use manager::{BranchRepositoryManager, ManagerState};
pub use models::{Branch, BranchStatus, MergeResult};
