//! REST API endpoint modules.

pub mod branches;
pub mod merge;
pub mod query;
pub mod status;

use status::AppError;

/// Run repository or database work off the async executor.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("worker task failed: {}", e)))?
}
