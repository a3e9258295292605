//! Branchlore web server and REST API.
//!
//! Provides an Axum-based HTTP server with:
//! - Status and health endpoints
//! - Branch management (list, create, inspect, delete)
//! - SQL execution against a branch's database
//! - Merge and commit endpoints
//! - Prometheus metrics at `/metrics`

pub mod api;
pub mod exporter;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::{middleware, Router};
use chrono::{DateTime, Utc};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use branchlore_core::config::AppConfig;
use branchlore_core::{BranchCache, BranchDatabase, BranchRepositoryManager};

use crate::api::status::AppError;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub manager: Arc<BranchRepositoryManager>,
    pub config: AppConfig,
    /// Open connections keyed by branch name.
    pub databases: BranchCache<BranchDatabase>,
    pub started_at: DateTime<Utc>,
    /// Shared while a cached connection is in use, exclusive while a merge
    /// or delete replaces database files underneath the cache.
    files: RwLock<()>,
}

impl AppState {
    pub fn new(config: AppConfig, manager: Arc<BranchRepositoryManager>) -> Self {
        Self {
            manager,
            config,
            databases: BranchCache::new().with_eviction_hook(|branch, _| {
                debug!(branch, "closed cached database connection");
            }),
            started_at: Utc::now(),
            files: RwLock::new(()),
        }
    }

    /// Run `f` on the branch's open database, provisioning its worktree and
    /// opening the file on first use. Blocking. No merge or delete runs
    /// while `f` does.
    pub fn with_database<R>(
        &self,
        branch: &str,
        f: impl FnOnce(&BranchDatabase) -> Result<R, AppError>,
    ) -> Result<R, AppError> {
        let _files = self.files.read().unwrap_or_else(|p| p.into_inner());
        let db = self.database(branch)?;
        f(&db)
    }

    /// Run `f`, which rewrites the database files of `branches`, with no
    /// connection in use. Their cache entries are dropped before and after,
    /// so the next use opens whatever file `f` left behind. Blocking.
    pub fn rewriting<R>(&self, branches: &[&str], f: impl FnOnce() -> R) -> R {
        let _files = self.files.write().unwrap_or_else(|p| p.into_inner());
        self.release(branches);
        let out = f();
        self.release(branches);
        out
    }

    fn database(&self, branch: &str) -> Result<Arc<BranchDatabase>, AppError> {
        if let Some(db) = self.databases.get(branch) {
            return Ok(db);
        }
        let path = self.manager.resolve_database_path(branch)?;
        let db = self
            .databases
            .get_or_try_insert_with(branch, || BranchDatabase::open(&path))?;
        Ok(db)
    }

    fn release(&self, branches: &[&str]) {
        for branch in branches {
            self.databases.evict(branch);
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}

/// Build the application router with all API routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    exporter::install();

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .merge(api::status::routes())
        .merge(api::branches::routes())
        .merge(api::query::routes())
        .merge(api::merge::routes())
        .merge(exporter::routes())
        .route_layer(middleware::from_fn(exporter::track_requests))
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024)) // 2 MB max request body
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// The web server.
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    /// Create a new web server over a shared manager. The manager does not
    /// have to be initialized yet; branch endpoints answer 503 until it is.
    pub fn new(config: AppConfig, manager: Arc<BranchRepositoryManager>) -> Self {
        Self {
            state: Arc::new(AppState::new(config, manager)),
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Serve on `listen_addr` until `shutdown` resolves, then finish the
    /// in-flight requests and close every cached connection.
    pub async fn start<F>(self, listen_addr: &str, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = listen_addr.parse()?;
        let app = router(Arc::clone(&self.state));

        info!(addr = %addr, "starting web server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        self.state.databases.clear();
        info!("web server stopped");
        Ok(())
    }
}
