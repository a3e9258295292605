//! Prometheus exposition: the process-wide recorder, the `/metrics` route,
//! and request counting for every API route.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::warn;

use branchlore_core::telemetry::{self, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION};

use crate::AppState;

static RECORDER: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the Prometheus recorder on first call and return its handle.
/// `None` if another recorder was already installed in this process.
pub fn install() -> Option<&'static PrometheusHandle> {
    RECORDER
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                telemetry::describe();
                Some(handle)
            }
            Err(e) => {
                warn!(error = %e, "failed to install Prometheus recorder");
                None
            }
        })
        .as_ref()
}

/// Drain histogram buckets. Called periodically by the daemon.
pub fn run_upkeep() {
    if let Some(handle) = install() {
        handle.run_upkeep();
    }
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(render))
}

async fn render() -> Response {
    match install() {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder unavailable").into_response(),
    }
}

/// Count and time each request by method, route template, and status.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "endpoint" => endpoint.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION, "method" => method, "endpoint" => endpoint)
        .record(started.elapsed().as_secs_f64());
    response
}
