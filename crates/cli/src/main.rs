//! Branchlore command-line tool.
//!
//! Manages branches and their SQLite databases in a local repository,
//! runs one-off queries, and opens interactive sessions against a running
//! daemon.

mod connect;
mod render;
mod style;
mod target;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing_subscriber::EnvFilter;

use branchlore_core::config::{AppConfig, BackendKind};
use branchlore_core::{BranchDatabase, BranchRepositoryManager};

use crate::target::Target;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Branchlore command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "branchlore",
    version,
    about = "Git-style branching for SQLite databases"
)]
struct Cli {
    /// Path to the TOML configuration file (defaults to ~/.branchlore/config.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the repository root.
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    /// Override the version-control backend (native or cli).
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the repository (or open an existing one).
    Init,

    /// Manage branches.
    Branch {
        #[command(subcommand)]
        action: BranchAction,
    },

    /// Commit a branch's database.
    Commit {
        branch: String,

        /// Commit message.
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Merge one branch into another.
    Merge { source: String, target: String },

    /// Run one SQL statement against `database[@branch]` (branch defaults to the trunk).
    Query { target: Target, sql: String },

    /// Open an interactive SQL session on a running daemon.
    Connect {
        target: Target,

        /// Daemon address (defaults to the configured listen address).
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Show repository status.
    Status,

    /// Manage the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum BranchAction {
    /// Create a branch at the trunk's current revision.
    Create { name: String },
    /// List all branches.
    List,
    /// Show a branch and its database.
    Show { name: String },
    /// Delete a branch, its worktree, and its database.
    Delete { name: String },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    // Minimal logging for CLI
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_target(false)
        .without_time()
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);

    if let Commands::Config {
        action: ConfigAction::Init { force },
    } = &cli.command
    {
        return cmd_config_init(&config_path, *force);
    }

    let config = load_config(&cli, &config_path)?;

    match cli.command {
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
        Commands::Connect { target, server } => {
            let server = server.unwrap_or_else(|| config.server.listen.clone());
            let branch = target.branch_or(&config.repository.trunk);
            connect::run(&target, branch, &server).await
        }
        command => {
            let manager = open_manager(&config)?;
            match command {
                Commands::Init => cmd_init(&manager),
                Commands::Branch { action } => cmd_branch(&manager, action),
                Commands::Commit { branch, message } => {
                    cmd_commit(&manager, &branch, message.as_deref())
                }
                Commands::Merge { source, target } => cmd_merge(&manager, &source, &target),
                Commands::Query { target, sql } => cmd_query(&manager, &target, &sql),
                Commands::Status => cmd_status(&manager),
                Commands::Connect { .. } | Commands::Config { .. } => unreachable!(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(cli: &Cli, path: &Path) -> Result<AppConfig> {
    let mut config =
        AppConfig::load_or_default(path).context("failed to load configuration file")?;
    config
        .apply_env_overrides()
        .context("failed to apply environment overrides")?;
    if let Some(repo) = &cli.repo {
        config.repository.root = repo.clone();
    }
    if let Some(backend) = cli.backend {
        config.repository.backend = backend;
    }
    config
        .validate()
        .context("configuration validation failed")?;
    Ok(config)
}

/// Every local command opens (or creates) the repository first.
fn open_manager(config: &AppConfig) -> Result<BranchRepositoryManager> {
    let manager = BranchRepositoryManager::new(config.repository.clone());
    manager.init().with_context(|| {
        format!(
            "failed to open repository at {}",
            config.repository.resolved_root().display()
        )
    })?;
    Ok(manager)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(manager: &BranchRepositoryManager) -> Result<()> {
    let revision = manager.current_revision()?;
    println!(
        "{}",
        style::success(&format!(
            "Repository ready at {}",
            manager.paths().root().display()
        ))
    );
    println!("  Trunk     {}", style::branch(manager.paths().trunk(), true));
    println!("  Revision  {}", &revision[..revision.len().min(8)]);
    println!("  Backend   {}", manager.config().backend);
    Ok(())
}

fn cmd_branch(manager: &BranchRepositoryManager, action: BranchAction) -> Result<()> {
    match action {
        BranchAction::Create { name } => {
            let branch = manager.create_branch(&name)?;
            println!(
                "{}",
                style::success(&format!(
                    "Created branch {} at {}",
                    style::branch(&branch.name, false),
                    branch.short_revision()
                ))
            );
            Ok(())
        }

        BranchAction::List => {
            let branches = manager.list_branches()?;
            println!("{}", render::branch_table(&branches));
            println!("{} branch(es)", branches.len());
            Ok(())
        }

        BranchAction::Show { name } => {
            let status = manager.branch_status(&name)?;
            let branch = &status.branch;

            println!();
            println!("{}", style::header(&format!("Branch {}", branch.name)));
            println!("{}", "═".repeat(branch.name.len() + 7));
            println!("  Revision   {}", branch.revision);
            println!("  Created    {}", branch.created_at.format("%Y-%m-%d %H:%M:%S"));
            println!("  Trunk      {}", if branch.is_main { "yes" } else { "no" });
            println!("  Database   {}", status.db_path.display());

            if status.db_exists {
                println!("  Size       {}", render::size(status.size));
                let db = BranchDatabase::open(&status.db_path)
                    .context("failed to open branch database")?;
                let tables = db.tables().context("failed to list tables")?;
                println!(
                    "  Tables     {}",
                    if tables.is_empty() {
                        style::dim("none")
                    } else {
                        tables.join(", ")
                    }
                );
            } else if status.worktree_exists {
                println!("  {}", style::dim("Database not created yet."));
            } else {
                println!("  {}", style::dim("Not provisioned; first use creates it."));
            }
            println!();
            Ok(())
        }

        BranchAction::Delete { name } => {
            manager.delete_branch(&name)?;
            println!("{}", style::success(&format!("Deleted branch {}", name)));
            Ok(())
        }
    }
}

fn cmd_commit(manager: &BranchRepositoryManager, branch: &str, message: Option<&str>) -> Result<()> {
    let message = message
        .map(str::to_string)
        .unwrap_or_else(|| format!("Update {}", branch));
    match manager.commit_branch(branch, &message)? {
        Some(b) => println!(
            "{}",
            style::success(&format!("Committed {} at {}", b.name, b.short_revision()))
        ),
        None => println!("{}", style::warn("Nothing to commit")),
    }
    Ok(())
}

fn cmd_merge(manager: &BranchRepositoryManager, source: &str, target: &str) -> Result<()> {
    let result = manager.merge(source, target)?;
    if result.success {
        println!(
            "{}",
            style::success(&format!("Merged {} into {}", source, target))
        );
        let summary = result.message.trim();
        if !summary.is_empty() {
            println!("  {}", style::dim(summary));
        }
        return Ok(());
    }

    println!(
        "{}",
        style::error(&format!("Merge of {} into {} failed", source, target))
    );
    if result.has_conflicts() {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Conflict"]);
        for line in &result.conflicts {
            table.add_row(vec![Cell::new(line)]);
        }
        println!("{}", table);
    } else {
        println!("{}", result.message.trim());
    }
    anyhow::bail!("merge did not complete; {} is unchanged", target)
}

fn cmd_query(manager: &BranchRepositoryManager, target: &Target, sql: &str) -> Result<()> {
    let branch = target.branch_or(manager.paths().trunk());
    let path = manager.resolve_database_path(branch)?;
    let db = BranchDatabase::open(&path).context("failed to open branch database")?;
    let outcome = db.execute(sql).context("query failed")?;
    println!("{}", render::outcome(&outcome));
    Ok(())
}

fn cmd_status(manager: &BranchRepositoryManager) -> Result<()> {
    let paths = manager.paths();
    let branches = manager.list_branches()?;
    let revision = manager.current_revision()?;
    let databases = manager
        .storage()
        .branch_databases()
        .context("failed to scan branch databases")?;

    println!();
    println!("{}", style::header("Branchlore Repository"));
    println!("{}", "═".repeat(21));
    println!();
    let state = if manager.is_ready() {
        style::state_ready()
    } else {
        style::state_not_ready(&manager.state().to_string())
    };
    println!("  State      {}", state);
    println!("  Root       {}", paths.root().display());
    println!("  Trunk      {}", style::branch(paths.trunk(), true));
    println!("  Revision   {}", &revision[..revision.len().min(8)]);
    println!("  Backend    {}", manager.config().backend);
    println!("  Branches   {}", branches.len());
    println!("  Databases  {}", databases.len());

    if !databases.is_empty() {
        println!();
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Branch", "Database", "Size"]);
        for (branch, path) in &databases {
            let size = manager.storage().size(path).unwrap_or(0);
            table.add_row(vec![
                Cell::new(branch),
                Cell::new(path.display()),
                Cell::new(render::size(size)),
            ]);
        }
        println!("{}", table);
    }
    println!();
    Ok(())
}

fn cmd_config_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "file already exists: {}. Pass --force to overwrite it.",
            path.display()
        );
    }
    AppConfig::default()
        .save(path)
        .context("failed to write config file")?;

    println!(
        "{}",
        style::success(&format!(
            "Default configuration written to {}",
            path.display()
        ))
    );
    println!();
    println!("Next steps:");
    println!("  1. Set [repository] root to where the branch repository should live");
    println!("  2. Create it with: branchlore init --config {}", path.display());
    println!(
        "  3. Start the daemon: branchlore-daemon --config {}",
        path.display()
    );
    Ok(())
}

fn cmd_config_show(config: &AppConfig, path: &Path) -> Result<()> {
    let source = if path.exists() {
        path.display().to_string()
    } else {
        format!("{} (not found, using defaults)", path.display())
    };
    println!("{}", style::dim(&format!("# {}", source)));
    let rendered = toml::to_string_pretty(config).context("failed to render configuration")?;
    print!("{}", rendered);
    Ok(())
}
