//! SQL execution against a branch's database.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::debug;

use branchlore_core::QueryOutcome;

use super::run_blocking;
use super::status::AppError;
use crate::AppState;

#[derive(Deserialize)]
pub struct QueryRequest {
    pub branch: String,
    pub sql: String,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/query", post(run_query))
}

/// Runs one statement. The branch's worktree is provisioned and its
/// database opened on first use.
async fn run_query(
    State(state): State<Arc<AppState>>,
    Json(body): Json<QueryRequest>,
) -> Result<Json<QueryOutcome>, AppError> {
    if body.branch.trim().is_empty() {
        return Err(AppError::BadRequest("branch is required".into()));
    }
    if body.sql.trim().is_empty() {
        return Err(AppError::BadRequest("sql is required".into()));
    }

    let outcome = run_blocking(move || {
        state.with_database(&body.branch, |db| {
            debug!(branch = %body.branch, "executing query");
            Ok(db.execute(&body.sql)?)
        })
    })
    .await?;
    Ok(Json(outcome))
}
