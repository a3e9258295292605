//! Prometheus metric names and the helpers that record them.
//!
//! Recording goes through the `metrics` facade, so every call here is a
//! no-op until a recorder is installed (the web server installs one).

use std::collections::BTreeMap;
use std::time::Instant;

pub const BRANCHES_TOTAL: &str = "branchlore_branches_total";
pub const DATABASES_TOTAL: &str = "branchlore_databases_total";
pub const DATABASE_SIZE_BYTES: &str = "branchlore_database_size_bytes";
pub const MAINTENANCE_DURATION: &str = "branchlore_maintenance_duration_seconds";
pub const HEALTH_CHECK_DURATION: &str = "branchlore_health_check_duration_seconds";
pub const HTTP_REQUESTS_TOTAL: &str = "branchlore_http_requests_total";
pub const HTTP_REQUEST_DURATION: &str = "branchlore_http_request_duration_seconds";
pub const GIT_OPERATION_DURATION: &str = "branchlore_git_operation_duration_seconds";
pub const DB_QUERY_DURATION: &str = "branchlore_db_query_duration_seconds";
pub const DB_QUERY_ERRORS: &str = "branchlore_db_query_errors_total";

/// Register help text for every metric with the installed recorder.
pub fn describe() {
    metrics::describe_gauge!(BRANCHES_TOTAL, "The total number of branches being tracked");
    metrics::describe_gauge!(DATABASES_TOTAL, "The total number of branch databases");
    metrics::describe_gauge!(DATABASE_SIZE_BYTES, "Size of branch databases in bytes");
    metrics::describe_histogram!(MAINTENANCE_DURATION, "Time spent performing maintenance tasks");
    metrics::describe_histogram!(HEALTH_CHECK_DURATION, "Time spent performing health checks");
    metrics::describe_counter!(HTTP_REQUESTS_TOTAL, "The total number of HTTP requests");
    metrics::describe_histogram!(HTTP_REQUEST_DURATION, "The HTTP request latencies in seconds");
    metrics::describe_histogram!(GIT_OPERATION_DURATION, "Time spent on git operations");
    metrics::describe_histogram!(DB_QUERY_DURATION, "Time spent executing database queries");
    metrics::describe_counter!(DB_QUERY_ERRORS, "The total number of database query errors");
}

/// Run `f` and record how long it took as a git operation.
pub fn time_git_operation<T>(operation: &'static str, f: impl FnOnce() -> T) -> T {
    let started = Instant::now();
    let out = f();
    metrics::histogram!(GIT_OPERATION_DURATION, "operation" => operation)
        .record(started.elapsed().as_secs_f64());
    out
}

pub fn record_query(started: Instant, ok: bool) {
    metrics::histogram!(DB_QUERY_DURATION).record(started.elapsed().as_secs_f64());
    if !ok {
        metrics::counter!(DB_QUERY_ERRORS).increment(1);
    }
}

/// Publish the branch and database inventory gathered by a maintenance run.
pub fn record_inventory(branches: usize, database_sizes: &BTreeMap<String, u64>) {
    metrics::gauge!(BRANCHES_TOTAL).set(branches as f64);
    metrics::gauge!(DATABASES_TOTAL).set(database_sizes.len() as f64);
    for (branch, size) in database_sizes {
        metrics::gauge!(DATABASE_SIZE_BYTES, "branch" => branch.clone()).set(*size as f64);
    }
}

/// Record the time elapsed since `started` in the histogram `name`.
pub fn observe_duration(name: &'static str, started: Instant) {
    metrics::histogram!(name).record(started.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn test_recorded_values_render() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            let sizes = BTreeMap::from([
                ("main".to_string(), 4096),
                ("team/alice".to_string(), 8192),
            ]);
            record_inventory(3, &sizes);
            let answer = time_git_operation("merge", || 42);
            assert_eq!(answer, 42);
            record_query(Instant::now(), false);
        });

        let text = handle.render();
        assert_eq!(sample(&text, "branchlore_branches_total"), Some(3.0), "{}", text);
        assert_eq!(sample(&text, "branchlore_databases_total"), Some(2.0));
        assert_eq!(
            sample(&text, r#"branchlore_database_size_bytes{branch="team/alice"}"#),
            Some(8192.0)
        );
        assert_eq!(sample(&text, "branchlore_db_query_errors_total"), Some(1.0));
        assert!(text.contains(r#"operation="merge""#));
    }

    /// Value of the exposition line whose series is exactly `series`.
    fn sample(text: &str, series: &str) -> Option<f64> {
        text.lines()
            .filter_map(|line| line.strip_prefix(series))
            .filter_map(|rest| rest.strip_prefix(' '))
            .find_map(|value| value.trim().parse().ok())
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        assert_eq!(time_git_operation("commit", || "done"), "done");
        record_query(Instant::now(), true);
    }
}
