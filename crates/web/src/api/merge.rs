//! Merge and commit endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use branchlore_core::{Branch, MergeResult};

use super::run_blocking;
use super::status::AppError;
use crate::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct MergeRequest {
    pub source: String,
    pub target: String,
}

#[derive(Deserialize)]
pub struct CommitRequest {
    pub branch: String,
    pub message: Option<String>,
}

#[derive(Serialize)]
struct CommitResponse {
    committed: bool,
    branch: Branch,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/merge", post(merge_branches))
        .route("/api/commit", post(commit_branch))
}

/// Content conflicts come back as `200` with `success: false`.
async fn merge_branches(
    State(state): State<Arc<AppState>>,
    Json(body): Json<MergeRequest>,
) -> Result<Json<MergeResult>, AppError> {
    if body.source.trim().is_empty() || body.target.trim().is_empty() {
        return Err(AppError::BadRequest("source and target are required".into()));
    }

    let result = run_blocking(move || {
        // Checkouts in the primary working copy replace the target's and the
        // trunk's database files.
        let trunk = state.manager.paths().trunk().to_string();
        let result = state.rewriting(&[body.target.as_str(), trunk.as_str()], || {
            state.manager.merge(&body.source, &body.target)
        })?;
        info!(
            source = %body.source,
            target = %body.target,
            success = result.success,
            conflicts = result.conflicts.len(),
            "merge requested via API"
        );
        Ok(result)
    })
    .await?;
    Ok(Json(result))
}

async fn commit_branch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CommitRequest>,
) -> Result<Json<CommitResponse>, AppError> {
    let message = body
        .message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("Update {}", body.branch));

    let response = run_blocking(move || {
        match state.manager.commit_branch(&body.branch, &message)? {
            Some(branch) => Ok(CommitResponse {
                committed: true,
                branch,
            }),
            None => Ok(CommitResponse {
                committed: false,
                branch: state.manager.get_branch(&body.branch)?,
            }),
        }
    })
    .await?;
    Ok(Json(response))
}
