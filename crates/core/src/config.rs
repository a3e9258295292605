//! TOML-based configuration system for Branchlore.
//!
//! Values come from three layers, later layers winning: the TOML file,
//! `BRANCHLORE_*` environment variables ([`AppConfig::apply_env_overrides`]),
//! and command-line flags applied by the binaries.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::paths::PathResolver;

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Repository layout and version-control settings.
    #[serde(default)]
    pub repository: RepositoryConfig,

    /// HTTP API settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Daemon logging and background-loop settings.
    #[serde(default)]
    pub daemon: DaemonConfig,
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// Which version-control mechanism backs the repository.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// libgit2 through the `git2` crate.
    #[default]
    Native,
    /// The `git` binary, one subprocess per operation.
    Cli,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Cli => write!(f, "cli"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "git2" => Ok(Self::Native),
            "cli" | "git" => Ok(Self::Cli),
            other => Err(ConfigError::InvalidValue {
                field: "repository.backend".into(),
                detail: format!("unknown backend '{}', expected 'native' or 'cli'", other),
            }),
        }
    }
}

/// Repository layout and version-control settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Repository root. Relative paths resolve against the working directory.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Directory under the root that holds per-branch worktrees.
    #[serde(default = "default_worktree_base")]
    pub worktree_base: String,

    /// File name of each branch's SQLite database.
    #[serde(default = "default_db_file_name")]
    pub db_file_name: String,

    /// Name of the trunk branch.
    #[serde(default = "default_trunk")]
    pub trunk: String,

    /// Version-control backend.
    #[serde(default)]
    pub backend: BackendKind,

    /// Upper bound for a single `git` subprocess (cli backend only).
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Create a missing branch at the trunk revision when its database is
    /// first resolved, instead of failing.
    #[serde(default)]
    pub auto_create_branches: bool,

    /// Author and committer name for commits made by Branchlore.
    #[serde(default = "default_author_name")]
    pub author_name: String,

    /// Author and committer email for commits made by Branchlore.
    #[serde(default = "default_author_email")]
    pub author_email: String,
}

fn default_root() -> PathBuf {
    PathBuf::from("branchlore-repo")
}
fn default_worktree_base() -> String {
    "worktrees".into()
}
fn default_db_file_name() -> String {
    "db.sqlite".into()
}
fn default_trunk() -> String {
    "main".into()
}
fn default_command_timeout() -> u64 {
    60
}
fn default_author_name() -> String {
    "Branchlore".into()
}
fn default_author_email() -> String {
    "branchlore@example.com".into()
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            worktree_base: default_worktree_base(),
            db_file_name: default_db_file_name(),
            trunk: default_trunk(),
            backend: BackendKind::default(),
            command_timeout_secs: default_command_timeout(),
            auto_create_branches: false,
            author_name: default_author_name(),
            author_email: default_author_email(),
        }
    }
}

impl RepositoryConfig {
    /// The repository root as an absolute path.
    pub fn resolved_root(&self) -> PathBuf {
        if self.root.is_absolute() {
            return self.root.clone();
        }
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(&self.root),
            Err(_) => self.root.clone(),
        }
    }

    /// Build the path resolver for this layout.
    pub fn path_resolver(&self) -> PathResolver {
        PathResolver::new(
            self.resolved_root(),
            &self.worktree_base,
            &self.db_file_name,
            &self.trunk,
        )
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (default `127.0.0.1:8080`).
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:8080".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Seconds between maintenance passes (branch and database accounting).
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,

    /// Seconds between repository health checks.
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_maintenance_interval() -> u64 {
    30
}
fn default_health_interval() -> u64 {
    60
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            maintenance_interval_secs: default_maintenance_interval(),
            health_check_interval_secs: default_health_interval(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Like [`load_from_file`](Self::load_from_file), but a missing file
    /// yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load_from_file(path) {
            Err(ConfigError::FileNotFound(path)) => {
                debug!(%path, "configuration file missing, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Write the configuration as TOML, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, contents)?;
        info!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Apply `BRANCHLORE_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(val) = env_override("BRANCHLORE_REPO_PATH") {
            self.repository.root = PathBuf::from(val);
        }
        if let Some(val) = env_override("BRANCHLORE_WORKTREE_BASE") {
            self.repository.worktree_base = val;
        }
        if let Some(val) = env_override("BRANCHLORE_DB_FILENAME") {
            self.repository.db_file_name = val;
        }
        if let Some(val) = env_override("BRANCHLORE_BACKEND") {
            self.repository.backend = val.parse()?;
        }
        if let Some(val) = env_override("BRANCHLORE_SERVER_ADDR") {
            self.server.listen = val;
        }
        if let Some(val) = env_override("BRANCHLORE_LOG_LEVEL") {
            self.daemon.log_level = val;
        }
        Ok(())
    }

    /// Validate that all fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let repo = &self.repository;
        if repo.root.as_os_str().is_empty() {
            return Err(invalid("repository.root", "must not be empty"));
        }
        for (field, value) in [
            ("repository.worktree_base", &repo.worktree_base),
            ("repository.db_file_name", &repo.db_file_name),
        ] {
            if value.is_empty() {
                return Err(invalid(field, "must not be empty"));
            }
            if value.contains('/') || value.contains('\\') || value == "." || value == ".." {
                return Err(invalid(field, "must be a single path segment"));
            }
        }
        if repo.trunk.is_empty() {
            return Err(invalid("repository.trunk", "must not be empty"));
        }
        if crate::paths::validate_branch_name(&repo.trunk).is_err() {
            return Err(invalid("repository.trunk", "is not a valid branch name"));
        }
        if repo.command_timeout_secs == 0 {
            return Err(invalid("repository.command_timeout_secs", "must be > 0"));
        }
        if self.server.listen.parse::<SocketAddr>().is_err() {
            return Err(invalid(
                "server.listen",
                "must be a socket address like 127.0.0.1:8080",
            ));
        }
        if self.daemon.maintenance_interval_secs == 0 || self.daemon.health_check_interval_secs == 0
        {
            return Err(invalid("daemon", "loop intervals must be > 0"));
        }
        Ok(())
    }

    /// Default location of the user configuration file.
    pub fn default_path() -> PathBuf {
        match dirs::home_dir() {
            Some(home) => home.join(".branchlore").join("config.toml"),
            None => PathBuf::from(".branchlore.toml"),
        }
    }
}

fn invalid(field: &str, detail: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        detail: detail.into(),
    }
}

fn env_override(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => {
            debug!(name, "applying environment override");
            Some(val)
        }
        _ => None,
    }
}
