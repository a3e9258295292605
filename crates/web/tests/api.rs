//! HTTP API tests against the router, backed by a scratch repository.

use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use branchlore_core::config::{AppConfig, RepositoryConfig};
use branchlore_core::BranchRepositoryManager;
use branchlore_web::{router, AppState};

fn app(ready: bool) -> (TempDir, Arc<AppState>, Router) {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig {
        repository: RepositoryConfig {
            root: dir.path().join("repo"),
            ..RepositoryConfig::default()
        },
        ..AppConfig::default()
    };
    let manager = Arc::new(BranchRepositoryManager::new(config.repository.clone()));
    if ready {
        manager.init().unwrap();
    }
    let state = Arc::new(AppState::new(config, manager));
    let router = router(Arc::clone(&state));
    (dir, state, router)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn query(app: &Router, branch: &str, sql: &str) -> (StatusCode, Value) {
    send(
        app,
        Method::POST,
        "/api/query",
        Some(json!({ "branch": branch, "sql": sql })),
    )
    .await
}

#[tokio::test]
async fn test_health_reports_manager_state() {
    let (_dir, _state, app) = app(false);
    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["state"], "uninitialized");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_uninitialized_manager_answers_503() {
    let (_dir, _state, app) = app(false);
    let (status, body) = send(&app, Method::GET, "/api/branches", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "NOT_INITIALIZED");

    let (status, _) = query(&app, "main", "SELECT 1").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_branch_lifecycle() {
    let (_dir, state, app) = app(true);

    let (status, body) = send(&app, Method::GET, "/api/branches", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["name"], "main");
    assert_eq!(body[0]["is_main"], true);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/branches",
        Some(json!({ "name": "team/alice" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "team/alice");
    assert_eq!(body["is_main"], false);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/branches",
        Some(json!({ "name": "team/alice" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "BRANCH_EXISTS");

    let (status, body) = send(&app, Method::GET, "/api/branches/team/alice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["branch"]["name"], "team/alice");
    assert_eq!(body["db_exists"], false);
    assert!(body.get("tables").is_none());

    let (status, _) = query(&app, "team/alice", "SELECT 1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state.databases.len(), 1);

    let (status, body) = send(&app, Method::GET, "/api/branches/team/alice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["db_exists"], true);
    assert_eq!(body["worktree_exists"], true);
    let tables: Vec<&str> = body["tables"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t.as_str())
        .collect();
    assert!(tables.contains(&"demo"));

    let (status, body) = send(&app, Method::DELETE, "/api/branches/team/alice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], "team/alice");
    assert!(state.databases.is_empty());

    let (status, body) = send(&app, Method::GET, "/api/branches/team/alice", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "BRANCH_NOT_FOUND");
}

#[tokio::test]
async fn test_client_errors() {
    let (_dir, _state, app) = app(true);

    let (status, body) = send(&app, Method::DELETE, "/api/branches/main", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "TRUNK_PROTECTED");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/branches",
        Some(json!({ "name": "bad..name" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_BRANCH_NAME");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/branches",
        Some(json!({ "name": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    let (status, body) = query(&app, "main", "SELEKT nonsense").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "QUERY_FAILED");

    let (status, _) = query(&app, "missing", "SELECT 1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_query_commit_and_merge() {
    let (_dir, _state, app) = app(true);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/branches",
        Some(json!({ "name": "feature" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = query(
        &app,
        "feature",
        "INSERT INTO demo (msg) VALUES ('from feature')",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rows_affected"], 1);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/commit",
        Some(json!({ "branch": "feature", "message": "add row" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["committed"], true);
    assert_eq!(body["branch"]["name"], "feature");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/commit",
        Some(json!({ "branch": "feature" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["committed"], false);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/merge",
        Some(json!({ "source": "feature", "target": "main" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["conflicts"].as_array().unwrap().is_empty());

    let (status, body) = query(&app, "main", "SELECT msg FROM demo").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["rows"][0][0], "from feature");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/merge",
        Some(json!({ "source": "feature", "target": "nowhere" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "REPOSITORY_IO");
}

#[tokio::test]
async fn test_status_summary() {
    let (_dir, _state, app) = app(true);
    query(&app, "main", "SELECT 1").await;

    let (status, body) = send(&app, Method::GET, "/api/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "ready");
    assert_eq!(body["branch_count"], 1);
    assert_eq!(body["database_count"], 1);
    assert_eq!(body["databases"][0]["branch"], "main");
    assert_eq!(body["repository"]["trunk"], "main");
    assert_eq!(body["repository"]["backend"], "native");
    assert_eq!(body["cached_connections"], 1);
    assert_eq!(body["current_revision"].as_str().unwrap().len(), 40);
}

#[test]
fn test_merge_waits_for_connections_in_use() {
    let (_dir, state, _app) = app(true);
    state.manager.create_branch("feature").unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let (held_tx, held_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel::<()>();

    let reader = {
        let state = Arc::clone(&state);
        let order = Arc::clone(&order);
        thread::spawn(move || {
            state
                .with_database("main", |db| {
                    held_tx.send(()).unwrap();
                    go_rx.recv().unwrap();
                    order.lock().unwrap().push("query");
                    Ok(db.execute("SELECT COUNT(*) FROM demo")?)
                })
                .unwrap();
        })
    };
    held_rx.recv().unwrap();

    let merger = {
        let state = Arc::clone(&state);
        let order = Arc::clone(&order);
        thread::spawn(move || {
            let result = state.rewriting(&["main"], || state.manager.merge("feature", "main"));
            order.lock().unwrap().push("merge");
            result
        })
    };
    thread::sleep(Duration::from_millis(200));
    assert!(!merger.is_finished(), "merge ran while a connection was in use");

    go_tx.send(()).unwrap();
    reader.join().unwrap();
    assert!(merger.join().unwrap().unwrap().success);
    assert_eq!(*order.lock().unwrap(), vec!["query", "merge"]);
    assert!(state.databases.get("main").is_none());
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (_dir, _state, app) = app(true);
    let (status, _) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("branchlore_http_requests_total"), "{}", text);
    assert!(text.contains(r#"endpoint="/health""#));
}
