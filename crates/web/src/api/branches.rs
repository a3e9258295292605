//! Branch management endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use branchlore_core::{Branch, BranchStatus};

use super::run_blocking;
use super::status::AppError;
use crate::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CreateBranchRequest {
    pub name: String,
}

#[derive(Serialize)]
struct BranchDetailResponse {
    #[serde(flatten)]
    status: BranchStatus,
    /// Present only when the database file exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    tables: Option<Vec<String>>,
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: String,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/branches", get(list_branches).post(create_branch))
        .route(
            "/api/branches/*name",
            get(get_branch).delete(delete_branch),
        )
}

/// Trunk first, then by name.
async fn list_branches(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Branch>>, AppError> {
    let branches = run_blocking(move || Ok(state.manager.list_branches()?)).await?;
    Ok(Json(branches))
}

async fn create_branch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBranchRequest>,
) -> Result<(StatusCode, Json<Branch>), AppError> {
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::BadRequest("branch name is required".into()));
    }

    let branch = run_blocking(move || Ok(state.manager.create_branch(&name)?)).await?;
    info!(branch = %branch.name, revision = %branch.short_revision(), "branch created via API");
    Ok((StatusCode::CREATED, Json(branch)))
}

async fn get_branch(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<BranchDetailResponse>, AppError> {
    let detail = run_blocking(move || {
        let status = state.manager.branch_status(&name)?;
        let tables = if status.db_exists {
            Some(state.with_database(&name, |db| Ok(db.tables()?))?)
        } else {
            None
        };
        Ok(BranchDetailResponse { status, tables })
    })
    .await?;
    Ok(Json(detail))
}

async fn delete_branch(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let deleted = run_blocking(move || {
        state.rewriting(&[name.as_str()], || state.manager.delete_branch(&name))?;
        Ok(name)
    })
    .await?;
    info!(branch = %deleted, "branch deleted via API");
    Ok(Json(DeleteResponse { deleted }))
}
