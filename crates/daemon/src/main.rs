//! Branchlore daemon entry point.
//!
//! Loads configuration, starts the HTTP API, initializes the branch
//! repository in the background, runs the maintenance scheduler, and
//! handles graceful shutdown.

mod scheduler;
mod signals;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use branchlore_core::config::{AppConfig, BackendKind};
use branchlore_core::BranchRepositoryManager;
use branchlore_web::{exporter, WebServer};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// Branchlore server daemon.
#[derive(Parser, Debug)]
#[command(
    name = "branchlore-daemon",
    version,
    about = "Serve branch-isolated SQLite databases over HTTP"
)]
struct Args {
    /// Path to the TOML configuration file (defaults to ~/.branchlore/config.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Override the listen address.
    #[arg(long)]
    listen: Option<String>,

    /// Override the repository root.
    #[arg(long)]
    repo: Option<PathBuf>,

    /// Override the version-control backend (native or cli).
    #[arg(long)]
    backend: Option<BackendKind>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Configuration: file, then environment, then flags.
    let config_path = args.config.clone().unwrap_or_else(AppConfig::default_path);
    let mut config =
        AppConfig::load_or_default(&config_path).context("failed to load configuration file")?;
    config
        .apply_env_overrides()
        .context("failed to apply environment overrides")?;
    if let Some(listen) = &args.listen {
        config.server.listen = listen.clone();
    }
    if let Some(repo) = &args.repo {
        config.repository.root = repo.clone();
    }
    if let Some(backend) = args.backend {
        config.repository.backend = backend;
    }
    config
        .validate()
        .context("configuration validation failed")?;

    // Initialize tracing
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.daemon.log_level);

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .init();

    // Startup banner
    info!("========================================");
    info!("  Branchlore Daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file   : {}", config_path.display());
    info!("Repository    : {}", config.repository.resolved_root().display());
    info!("Trunk         : {}", config.repository.trunk);
    info!("Backend       : {}", config.repository.backend);
    info!("Database file : {}", config.repository.db_file_name);
    info!("Web listen    : {}", config.server.listen);
    info!("Log level     : {}", log_level);
    info!("========================================");

    if exporter::install().is_none() {
        warn!("Prometheus metrics are disabled");
    }

    let manager = Arc::new(BranchRepositoryManager::new(config.repository.clone()));

    // Start the web server first; branch endpoints answer 503 until the
    // repository is ready.
    let web_shutdown = Arc::new(Notify::new());
    let web_server = WebServer::new(config.clone(), Arc::clone(&manager));
    let listen_addr = config.server.listen.clone();
    let web_handle = {
        let web_shutdown = Arc::clone(&web_shutdown);
        tokio::spawn(async move {
            let signal = async move { web_shutdown.notified().await };
            if let Err(e) = web_server.start(&listen_addr, signal).await {
                error!("Web server error: {}", e);
            }
        })
    };

    // Initialize the repository in the background
    let init_manager = Arc::clone(&manager);
    let init_handle = tokio::task::spawn_blocking(move || match init_manager.init() {
        Ok(()) => info!("branch repository ready"),
        Err(e) => error!(error = %e, "failed to initialize branch repository"),
    });

    // Create and start the scheduler
    let scheduler_shutdown = Arc::new(Notify::new());
    let sched = scheduler::Scheduler::new(
        Arc::clone(&manager),
        Duration::from_secs(config.daemon.maintenance_interval_secs),
        Duration::from_secs(config.daemon.health_check_interval_secs),
    );
    let scheduler_handle = {
        let scheduler_shutdown = Arc::clone(&scheduler_shutdown);
        tokio::spawn(async move { sched.run(scheduler_shutdown).await })
    };

    // Wait for shutdown signal
    signals::wait_for_shutdown().await;

    info!("Shutdown signal received, stopping...");

    scheduler_shutdown.notify_one();
    web_shutdown.notify_one();

    let stopped = async {
        if let Err(e) = scheduler_handle.await {
            warn!("scheduler task error: {}", e);
        }
        if let Err(e) = web_handle.await {
            warn!("web server task error: {}", e);
        }
        if let Err(e) = init_handle.await {
            warn!("initialization task error: {}", e);
        }
    };
    match tokio::time::timeout(SHUTDOWN_GRACE, stopped).await {
        Ok(()) => info!("all tasks stopped gracefully"),
        Err(_) => warn!(
            "tasks did not stop within {}s, forcing shutdown",
            SHUTDOWN_GRACE.as_secs()
        ),
    }

    info!("Branchlore daemon stopped.");
    Ok(())
}
