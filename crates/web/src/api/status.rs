//! Status and health check endpoints.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::warn;

use branchlore_core::errors::{BranchError, DatabaseError};
use branchlore_core::Branch;

use crate::api::run_blocking;
use crate::AppState;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: String,
    state: String,
}

#[derive(Serialize)]
struct DatabaseEntry {
    branch: String,
    path: PathBuf,
    size: u64,
}

#[derive(Serialize)]
struct RepositorySettings {
    root: PathBuf,
    trunk: String,
    backend: String,
    worktree_base: String,
    db_file_name: String,
}

#[derive(Serialize)]
struct StatusResponse {
    state: String,
    current_revision: String,
    branch_count: usize,
    branches: Vec<Branch>,
    database_count: usize,
    databases: Vec<DatabaseEntry>,
    cached_connections: usize,
    repository: RepositorySettings,
    uptime_secs: u64,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/status", get(get_status))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        state: state.manager.state().to_string(),
    })
}

async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, AppError> {
    let shared = Arc::clone(&state);
    let (current_revision, branches, databases) = run_blocking(move || {
        let manager = &shared.manager;
        let branches = manager.list_branches()?;
        let current_revision = manager.current_revision()?;
        let storage = manager.storage();
        let databases = storage
            .branch_databases()
            .map_err(|e| AppError::Internal(format!("failed to scan databases: {}", e)))?
            .into_iter()
            .map(|(branch, path)| DatabaseEntry {
                size: storage.size(&path).unwrap_or(0),
                branch,
                path,
            })
            .collect::<Vec<_>>();
        Ok((current_revision, branches, databases))
    })
    .await?;

    let repo = state.manager.config();
    Ok(Json(StatusResponse {
        state: state.manager.state().to_string(),
        current_revision,
        branch_count: branches.len(),
        branches,
        database_count: databases.len(),
        databases,
        cached_connections: state.databases.len(),
        repository: RepositorySettings {
            root: state.manager.paths().root().to_path_buf(),
            trunk: repo.trunk.clone(),
            backend: repo.backend.to_string(),
            worktree_base: repo.worktree_base.clone(),
            db_file_name: repo.db_file_name.clone(),
        },
        uptime_secs: state.uptime_secs(),
    }))
}

// ---------------------------------------------------------------------------
// Shared error type for API handlers
// ---------------------------------------------------------------------------

/// API error type that converts to a JSON `{ "error", "code" }` response.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Internal(String),
    /// A branch manager failure, mapped by kind.
    Branch(BranchError),
    /// A statement submitted through the query endpoint failed.
    Query(DatabaseError),
}

impl From<BranchError> for AppError {
    fn from(e: BranchError) -> Self {
        Self::Branch(e)
    }
}

impl From<DatabaseError> for AppError {
    fn from(e: DatabaseError) -> Self {
        Self::Query(e)
    }
}

fn branch_status_code(e: &BranchError) -> StatusCode {
    match e {
        BranchError::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
        BranchError::BranchNotFound(_) => StatusCode::NOT_FOUND,
        BranchError::BranchExists(_) => StatusCode::CONFLICT,
        BranchError::InvalidBranchName { .. } | BranchError::TrunkProtected(_) => {
            StatusCode::BAD_REQUEST
        }
        BranchError::WorktreeCreation { .. }
        | BranchError::RepositoryIo(_)
        | BranchError::NoCommits => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", msg),
            AppError::Branch(e) => (branch_status_code(&e), e.code(), e.to_string()),
            AppError::Query(e) => (StatusCode::BAD_REQUEST, "QUERY_FAILED", e.to_string()),
        };

        if status.is_server_error() {
            warn!(%status, code, error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message, "code": code });
        (status, Json(body)).into_response()
    }
}
