//! Integration tests for pdt-api endpoints
//!
//! Tests cover:
//! - Case filters by deployment, including the required companions
//! - Migration filters by report status and dependency ordering
//! - CRUD status codes and error bodies
//! - API token middleware, public health and trigger_sync routes

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use pdt_api::{build_router, AppState};
use pdt_common::db::init_database;
use pdt_common::store::cases;
use pdt_sync::{QueuedTask, Task, TaskQueue};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tower::ServiceExt;

struct TestApp {
    _dir: TempDir,
    app: Router,
    db: sqlx::SqlitePool,
    tasks: UnboundedReceiver<QueuedTask>,
}

async fn setup_app(api_token: Option<&str>) -> TestApp {
    let dir = TempDir::new().unwrap();
    let db = init_database(&dir.path().join("pdt.db")).await.unwrap();
    let (queue, tasks) = TaskQueue::new();
    let app = build_router(AppState::new(db.clone(), queue, api_token.map(str::to_string)));
    TestApp { _dir: dir, app, db, tasks }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, "GET", uri, None).await
}

async fn post(app: &Router, uri: &str, body: Value) -> Value {
    let (status, json) = send(app, "POST", uri, Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "POST {} failed: {}", uri, json);
    json
}

fn ids(page: &Value) -> Vec<i64> {
    page["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["id"].as_i64().unwrap())
        .collect()
}

fn migration_cases(list: &Value) -> Vec<i64> {
    list.as_array()
        .unwrap()
        .iter()
        .map(|row| row["case"].as_i64().unwrap())
        .collect()
}

/// `prod` linked to `alpha`, release 5 with case 1 (alpha) owning a
/// migration, and a deployed report for release 5 on prod listing case 1
async fn seed(app: &Router) -> i64 {
    post(app, "/api/ci-projects/", json!({ "name": "alpha" })).await;
    post(app, "/api/instances/", json!({ "name": "prod", "ci_projects": ["alpha"] })).await;
    post(app, "/api/instances/", json!({ "name": "staging" })).await;
    post(app, "/api/releases/", json!({ "number": 5, "datetime": "2015-01-18T23:00:00Z" })).await;
    post(
        app,
        "/api/cases/",
        json!({ "id": 1, "title": "First", "project": "Core", "release": 5, "ci_project": "alpha" }),
    )
    .await;
    let migration = post(app, "/api/migrations/", json!({ "uid": "m1", "case": 1 })).await;
    post(
        app,
        "/api/deployment-reports/",
        json!({ "release": 5, "instance": "prod", "status": "deployed", "cases": [1] }),
    )
    .await;
    migration["id"].as_i64().unwrap()
}

// =============================================================================
// Health and authentication
// =============================================================================

#[tokio::test]
async fn test_health_endpoint_no_auth_required() {
    let test = setup_app(Some("secret")).await;

    let (status, body) = get(&test.app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "pdt-api");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_api_token_required_when_configured() {
    let test = setup_app(Some("secret")).await;

    let (status, body) = get(&test.app, "/api/instances/").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let request = Request::builder()
        .uri("/api/instances/")
        .header(header::AUTHORIZATION, "Token wrong")
        .body(Body::empty())
        .unwrap();
    let response = test.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/api/instances/")
        .header(header::AUTHORIZATION, "Token secret")
        .body(Body::empty())
        .unwrap();
    let response = test.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_trigger_sync_is_public_and_only_enqueues() {
    let mut test = setup_app(Some("secret")).await;

    let (status, body) = send(&test.app, "POST", "/api/cases/42/trigger_sync/", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "sync is triggered successfully" }));

    let queued = test.tasks.try_recv().unwrap();
    assert_eq!(queued.task, Task::PullCase(42));
    assert!(cases::get_case(&test.db, 42).await.is_err(), "pull must not run inline");
}

#[tokio::test]
async fn test_trigger_sync_without_worker_is_unavailable() {
    let test = setup_app(None).await;
    let TestApp { app, tasks, .. } = test;
    drop(tasks);

    let (status, body) = send(&app, "POST", "/api/cases/42/trigger_sync", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "QUEUE_UNAVAILABLE");
}

// =============================================================================
// Cases
// =============================================================================

#[tokio::test]
async fn test_cases_deployed_on_scenario() {
    let test = setup_app(None).await;
    seed(&test.app).await;

    let (status, page) = get(&test.app, "/api/cases/?ci_project=alpha&release=5&deployed_on=prod").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&page), vec![1]);

    let (status, page) = get(&test.app, "/api/cases/?ci_project=alpha&release=5&exclude_deployed_on=prod").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&page), Vec::<i64>::new());

    let (_, page) = get(&test.app, "/api/cases/?ci_project=alpha&release=5&exclude_deployed_on=staging").await;
    assert_eq!(ids(&page), vec![1]);
}

#[tokio::test]
async fn test_deployed_on_requires_ci_project_and_release() {
    let test = setup_app(None).await;
    seed(&test.app).await;

    let (status, body) = get(&test.app, "/api/cases/?release=5&deployed_on=prod").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(body["error"]["message"].as_str().unwrap().contains("CI project"));

    let (status, body) = get(&test.app, "/api/cases/?ci_project=alpha&exclude_deployed_on=prod").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("Release"));
}

#[tokio::test]
async fn test_deployment_report_tags_case() {
    let test = setup_app(None).await;
    seed(&test.app).await;

    let (status, case) = get(&test.app, "/api/cases/1/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(case["tags"], json!(["deployed-prod"]));
    assert_eq!(cases::list_case_edits(&test.db, 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_case_patch_records_title_edit() {
    let test = setup_app(None).await;
    seed(&test.app).await;

    let (status, case) = send(&test.app, "PATCH", "/api/cases/1", Some(json!({ "title": "Renamed" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(case["title"], "Renamed");
    assert_eq!(case["project"], "Core");

    let edits = cases::list_case_edits(&test.db, 1).await.unwrap();
    assert_eq!(edits.len(), 2);
    assert_eq!(edits[1].kind.as_str(), "title");
}

#[tokio::test]
async fn test_cases_ordering_and_pagination() {
    let test = setup_app(None).await;
    for (id, title) in [(3, "Alpha"), (1, "Charlie"), (2, "Bravo")] {
        post(&test.app, "/api/cases", json!({ "id": id, "title": title })).await;
    }

    let (_, page) = get(&test.app, "/api/cases/").await;
    assert_eq!(ids(&page), vec![1, 2, 3]);

    let (_, page) = get(&test.app, "/api/cases/?order_by=-title&page=2&page_size=2").await;
    assert_eq!(page["count"], 3);
    assert_eq!(page["page"], 2);
    assert_eq!(page["total_pages"], 2);
    assert_eq!(ids(&page), vec![3]);

    let (status, body) = get(&test.app, "/api/cases/?order_by=area").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

// =============================================================================
// Migrations
// =============================================================================

#[tokio::test]
async fn test_exclude_status_on_instance() {
    let test = setup_app(None).await;
    let applied = seed(&test.app).await;

    for (id, title) in [(2, "Second"), (3, "Third"), (4, "Fourth")] {
        post(&test.app, "/api/cases/", json!({ "id": id, "title": title, "release": 5, "ci_project": "alpha" })).await;
    }
    let failed = post(&test.app, "/api/migrations/", json!({ "uid": "m2", "case": 2 })).await;
    let elsewhere = post(&test.app, "/api/migrations/", json!({ "uid": "m3", "case": 3 })).await;
    post(&test.app, "/api/migrations/", json!({ "uid": "m4", "case": 4 })).await;

    for (migration, instance, status) in [
        (applied, "prod", "applied"),
        (failed["id"].as_i64().unwrap(), "prod", "error"),
        (elsewhere["id"].as_i64().unwrap(), "staging", "applied"),
    ] {
        post(
            &test.app,
            "/api/migration-reports/",
            json!({ "migration": migration, "instance": instance, "status": status }),
        )
        .await;
    }

    let (status, list) = get(&test.app, "/api/migrations/?exclude_status=applied&instance=prod").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(migration_cases(&list), vec![2, 3, 4]);

    let (_, list) = get(&test.app, "/api/migrations/?status=applied").await;
    assert_eq!(migration_cases(&list), vec![1, 3]);

    let (status, body) = get(&test.app, "/api/migrations/?exclude_status=applied").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_migrations_follow_dependencies() {
    let test = setup_app(None).await;
    for id in [1, 2, 3] {
        post(&test.app, "/api/cases/", json!({ "id": id, "title": format!("Case {}", id) })).await;
    }
    let base = post(&test.app, "/api/migrations/", json!({ "case": 3 })).await;
    let base_id = base["id"].as_i64().unwrap();
    post(&test.app, "/api/migrations/", json!({ "case": 1, "depends_on": [base_id] })).await;
    post(&test.app, "/api/migrations/", json!({ "case": 2 })).await;

    let (status, list) = get(&test.app, "/api/migrations/?order_by=-case").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(migration_cases(&list), vec![2, 3, 1]);
    assert!(list[0]["uid"].as_str().is_some_and(|uid| !uid.is_empty()));
}

#[tokio::test]
async fn test_dependency_cycle_is_conflict() {
    let test = setup_app(None).await;
    for id in [1, 2] {
        post(&test.app, "/api/cases/", json!({ "id": id, "title": format!("Case {}", id) })).await;
    }
    let first = post(&test.app, "/api/migrations/", json!({ "case": 1 })).await;
    let first_id = first["id"].as_i64().unwrap();
    let second = post(&test.app, "/api/migrations/", json!({ "case": 2, "depends_on": [first_id] })).await;
    let second_id = second["id"].as_i64().unwrap();

    let (status, _) = send(
        &test.app,
        "PATCH",
        &format!("/api/migrations/{}", first_id),
        Some(json!({ "depends_on": [second_id] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(&test.app, "/api/migrations/").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "DEPENDENCY_CYCLE");

    // Filtering one side of the cycle out leaves a valid order
    let (status, list) = get(&test.app, "/api/migrations/?case=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(migration_cases(&list), vec![2]);
}

// =============================================================================
// CRUD behavior
// =============================================================================

#[tokio::test]
async fn test_unknown_id_is_not_found() {
    let test = setup_app(None).await;

    for uri in ["/api/cases/99", "/api/migrations/99", "/api/releases/99/", "/api/deployment-reports/99"] {
        let (status, body) = get(&test.app, uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "GET {}", uri);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    let (status, _) = send(&test.app, "DELETE", "/api/instances/99", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_non_integer_id_is_a_json_validation_error() {
    let mut test = setup_app(None).await;

    for (method, uri) in [
        ("GET", "/api/cases/abc"),
        ("DELETE", "/api/releases/abc/"),
        ("POST", "/api/cases/abc/trigger_sync/"),
    ] {
        let (status, body) = send(&test.app, method, uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{} {}", method, uri);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }
    assert!(test.tasks.try_recv().is_err());
}

#[tokio::test]
async fn test_unknown_filter_and_bad_values_are_rejected() {
    let test = setup_app(None).await;

    for uri in [
        "/api/instances/?colour=red",
        "/api/releases/?number=five",
        "/api/migrations/?reviewed=maybe",
        "/api/migration-reports/?status=done",
        "/api/deployment-reports/?datetime__gte=yesterday",
    ] {
        let (status, body) = get(&test.app, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "GET {}", uri);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }
}

#[tokio::test]
async fn test_create_update_delete_release() {
    let test = setup_app(None).await;

    let release = post(&test.app, "/api/releases/", json!({ "number": 7, "datetime": "2016-02-01T10:00:00Z" })).await;
    let id = release["id"].as_i64().unwrap();

    let (status, updated) = send(
        &test.app,
        "PUT",
        &format!("/api/releases/{}", id),
        Some(json!({ "number": 8, "datetime": "2016-02-01T10:00:00Z" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["number"], 8);

    let (_, page) = get(&test.app, "/api/releases/?number=8").await;
    assert_eq!(ids(&page), vec![id]);

    let (status, _) = send(&test.app, "DELETE", &format!("/api/releases/{}", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = get(&test.app, &format!("/api/releases/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_duplicate_and_malformed_bodies_are_validation_errors() {
    let test = setup_app(None).await;
    post(&test.app, "/api/instances/", json!({ "name": "prod" })).await;

    let (status, body) = send(&test.app, "POST", "/api/instances/", Some(json!({ "name": "prod" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, body) = send(&test.app, "POST", "/api/releases/", Some(json!({ "number": "seven" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_report_filters() {
    let test = setup_app(None).await;
    let migration = seed(&test.app).await;
    post(
        &test.app,
        "/api/migration-reports/",
        json!({ "migration": migration, "instance": "prod", "status": "pending", "datetime": "2015-01-19T10:00:00Z" }),
    )
    .await;
    let later = post(
        &test.app,
        "/api/migration-reports/",
        json!({ "migration": migration, "instance": "prod", "status": "applied", "datetime": "2015-01-20T10:00:00Z" }),
    )
    .await;

    let (_, page) = get(&test.app, "/api/migration-reports/?datetime__gte=2015-01-20T00:00:00Z").await;
    assert_eq!(ids(&page), vec![later["id"].as_i64().unwrap()]);

    let (_, page) = get(&test.app, "/api/deployment-reports/?instance=prod&status=deployed").await;
    assert_eq!(page["count"], 1);
    assert_eq!(page["results"][0]["cases"], json!([1]));
}
