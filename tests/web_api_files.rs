//! HTTP tests for the auth, file and profile endpoints.

use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use chrono::{Duration, Utc};
use datashare::clock::ManualClock;
use datashare::config::Config;
use datashare::router::create_router;
use datashare::storage::BlobStorage;
use datashare::{db, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

struct TestApp {
    server: TestServer,
    clock: Arc<ManualClock>,
    state: AppState,
    _dir: TempDir,
}

fn create_test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.auth.bcrypt_cost = 4;
    config.storage.max_upload_bytes = 1024;
    config.server.public_url = "http://share.test/".to_string();

    let conn = db::open_in_memory().expect("Failed to create test database");
    let storage = BlobStorage::new(dir.path().join("uploads")).unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let state = AppState::new(conn, storage, clock.clone(), &config);

    let router = create_router(state.clone(), &[]);
    let server = TestServer::new(router).expect("Failed to create test server");

    TestApp {
        server,
        clock,
        state,
        _dir: dir,
    }
}

/// Register and log in, returning the bearer token.
async fn login_as(server: &TestServer, email: &str) -> String {
    server
        .post("/api/auth/register")
        .json(&json!({ "email": email, "password": "password123" }))
        .await
        .assert_status(StatusCode::CREATED);

    let response = server
        .post("/api/auth/login")
        .json(&json!({ "email": email, "password": "password123" }))
        .await;
    response.assert_status_ok();
    response.json::<Value>()["token"].as_str().unwrap().to_string()
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

fn file_form(name: &str, content: &'static [u8]) -> MultipartForm {
    MultipartForm::new().add_part(
        "file",
        Part::bytes(content).file_name(name).mime_type("text/plain"),
    )
}

async fn upload_anonymous(server: &TestServer, form: MultipartForm) -> Value {
    let response = server
        .post("/api/files/upload-anonymous")
        .multipart(form)
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()
}

async fn upload_as(server: &TestServer, token: &str, form: MultipartForm) -> Value {
    let response = server
        .post("/api/files/upload")
        .add_header(AUTHORIZATION, bearer(token))
        .multipart(form)
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()
}

// ============================================================================
// Auth & profile
// ============================================================================

#[tokio::test]
async fn test_register_validation_and_duplicates() {
    let app = create_test_app();

    app.server
        .post("/api/auth/register")
        .json(&json!({ "email": "not-an-email", "password": "password123" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.server
        .post("/api/auth/register")
        .json(&json!({ "email": "a@example.com", "password": "short" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let response = app
        .server
        .post("/api/auth/register")
        .json(&json!({ "email": "a@example.com", "password": "password123" }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["email"], "a@example.com");
    assert!(body.get("password").is_none());

    let response = app
        .server
        .post("/api/auth/register")
        .json(&json!({ "email": "a@example.com", "password": "password123" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_login_rejects_bad_credentials() {
    let app = create_test_app();
    login_as(&app.server, "a@example.com").await;

    app.server
        .post("/api/auth/login")
        .json(&json!({ "email": "a@example.com", "password": "wrong-password" }))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    app.server
        .post("/api/auth/login")
        .json(&json!({ "email": "nobody@example.com", "password": "password123" }))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let app = create_test_app();

    app.server
        .get("/api/files/history")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    app.server
        .get("/api/users/me")
        .add_header(AUTHORIZATION, "Bearer invalid-token")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_session_expires() {
    let app = create_test_app();
    let token = login_as(&app.server, "a@example.com").await;

    app.clock.advance(Duration::hours(25));
    app.server
        .get("/api/users/me")
        .add_header(AUTHORIZATION, bearer(&token))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_profile_read_and_update() {
    let app = create_test_app();
    let alice = login_as(&app.server, "alice@example.com").await;
    login_as(&app.server, "bob@example.com").await;

    let response = app
        .server
        .get("/api/users/me")
        .add_header(AUTHORIZATION, bearer(&alice))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["email"], "alice@example.com");
    assert!(body.get("passwordHash").is_none());

    app.server
        .patch("/api/users/me")
        .add_header(AUTHORIZATION, bearer(&alice))
        .json(&json!({ "email": "bob@example.com" }))
        .await
        .assert_status(StatusCode::CONFLICT);

    let response = app
        .server
        .patch("/api/users/me")
        .add_header(AUTHORIZATION, bearer(&alice))
        .json(&json!({ "email": "alice@new.example.com" }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["email"], "alice@new.example.com");
}

#[tokio::test]
async fn test_account_deletion_keeps_files_anonymous() {
    let app = create_test_app();
    let token = login_as(&app.server, "a@example.com").await;
    let file = upload_as(&app.server, &token, file_form("keep.txt", b"kept")).await;

    app.server
        .delete("/api/users/me")
        .add_header(AUTHORIZATION, bearer(&token))
        .await
        .assert_status(StatusCode::NO_CONTENT);

    app.server
        .get("/api/users/me")
        .add_header(AUTHORIZATION, bearer(&token))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let response = app
        .server
        .post(&format!("/api/files/{}/download", file["token"].as_str().unwrap()))
        .await;
    response.assert_status_ok();
    assert_eq!(response.as_bytes().as_ref(), b"kept");
}

// ============================================================================
// Upload, metadata, download
// ============================================================================

#[tokio::test]
async fn test_anonymous_upload_metadata_and_expiry() {
    let app = create_test_app();
    let form = file_form("ten.txt", b"0123456789").add_text("expirationDays", "1");
    let file = upload_anonymous(&app.server, form).await;

    let token = file["token"].as_str().unwrap();
    assert_eq!(token.len(), 32);
    assert_eq!(file["size"], 10);
    assert_eq!(file["hasPassword"], false);
    assert_eq!(
        file["url"],
        format!("http://share.test/api/files/{}/download", token)
    );
    assert!(file.get("storageName").is_none());

    let response = app
        .server
        .get(&format!("/api/files/{}/metadata", token))
        .await;
    response.assert_status_ok();
    let meta: Value = response.json();
    assert_eq!(meta["name"], "ten.txt");
    assert_eq!(meta["hasPassword"], false);
    assert_eq!(meta["isExpired"], false);
    assert!(meta.get("storageName").is_none());
    assert!(meta.get("passwordHash").is_none());

    app.clock.advance(Duration::days(1) + Duration::seconds(1));

    let meta: Value = app
        .server
        .get(&format!("/api/files/{}/metadata", token))
        .await
        .json();
    assert_eq!(meta["isExpired"], true);

    app.server
        .post(&format!("/api/files/{}/download", token))
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_password_download_counts_only_successes() {
    let app = create_test_app();
    let form = file_form("secret.txt", b"top secret").add_text("password", "Secret1");
    let file = upload_anonymous(&app.server, form).await;
    let token = file["token"].as_str().unwrap();
    assert_eq!(file["hasPassword"], true);

    let response = app
        .server
        .post(&format!("/api/files/{}/download", token))
        .json(&json!({ "password": "Secret1" }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.as_bytes().as_ref(), b"top secret");
    assert_eq!(
        response.header("content-disposition"),
        "attachment; filename=\"secret.txt\""
    );

    app.server
        .post(&format!("/api/files/{}/download", token))
        .json(&json!({ "password": "wrong" }))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    app.server
        .post(&format!("/api/files/{}/download", token))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let record = app
        .state
        .files
        .records()
        .find_by_token(token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.download_count, 1);
}

#[tokio::test]
async fn test_unknown_token_is_not_found() {
    let app = create_test_app();
    app.server
        .get("/api/files/doesnotexist/metadata")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    app.server
        .post("/api/files/doesnotexist/download")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_rejections() {
    let app = create_test_app();

    app.server
        .post("/api/files/upload-anonymous")
        .multipart(file_form("setup.exe", b"MZ"))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    static BIG: [u8; 2048] = [0u8; 2048];
    app.server
        .post("/api/files/upload-anonymous")
        .multipart(file_form("big.bin", &BIG))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.server
        .post("/api/files/upload-anonymous")
        .multipart(file_form("a.txt", b"x").add_text("expirationDays", "8"))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.server
        .post("/api/files/upload-anonymous")
        .multipart(MultipartForm::new().add_text("expirationDays", "3"))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let tags = (0..11).map(|i| format!("t{i}")).collect::<Vec<_>>().join(",");
    app.server
        .post("/api/files/upload-anonymous")
        .multipart(file_form("a.txt", b"x").add_text("tags", tags))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let leftovers: usize = std::fs::read_dir(app.state.files.storage().root())
        .unwrap()
        .map(|shard| std::fs::read_dir(shard.unwrap().path()).unwrap().count())
        .sum();
    assert_eq!(leftovers, 0);
}

// ============================================================================
// History, tags and owner mutations
// ============================================================================

#[tokio::test]
async fn test_history_filters_and_tag_counts() {
    let app = create_test_app();
    let token = login_as(&app.server, "a@example.com").await;

    upload_as(
        &app.server,
        &token,
        file_form("Report.txt", b"1").add_text("tags", "work, urgent"),
    )
    .await;
    upload_as(
        &app.server,
        &token,
        file_form("notes.txt", b"2").add_text("tags", "work"),
    )
    .await;
    upload_as(&app.server, &token, file_form("smart.txt", b"3").add_text("tags", "smart")).await;
    upload_anonymous(&app.server, file_form("report-anon.txt", b"4")).await;

    let history: Value = app
        .server
        .get("/api/files/history")
        .add_header(AUTHORIZATION, bearer(&token))
        .await
        .json();
    let names: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["filename"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["smart.txt", "notes.txt", "Report.txt"]);

    let search: Value = app
        .server
        .get("/api/files/history")
        .add_query_param("search", "REPORT")
        .add_header(AUTHORIZATION, bearer(&token))
        .await
        .json();
    assert_eq!(search.as_array().unwrap().len(), 1);

    let art: Value = app
        .server
        .get("/api/files/history")
        .add_query_param("tag", "art")
        .add_header(AUTHORIZATION, bearer(&token))
        .await
        .json();
    assert!(art.as_array().unwrap().is_empty());

    let tags: Value = app
        .server
        .get("/api/files/tags")
        .add_header(AUTHORIZATION, bearer(&token))
        .await
        .json();
    assert_eq!(
        tags,
        json!([
            { "label": "work", "count": 2 },
            { "label": "smart", "count": 1 },
            { "label": "urgent", "count": 1 }
        ])
    );
}

#[tokio::test]
async fn test_history_hides_expired_files() {
    let app = create_test_app();
    let token = login_as(&app.server, "a@example.com").await;
    upload_as(
        &app.server,
        &token,
        file_form("short.txt", b"1").add_text("expirationDays", "1"),
    )
    .await;
    upload_as(&app.server, &token, file_form("long.txt", b"2")).await;

    app.clock.advance(Duration::days(2));
    let history: Value = app
        .server
        .get("/api/files/history")
        .add_header(AUTHORIZATION, bearer(&token))
        .await
        .json();
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["filename"], "long.txt");
}

#[tokio::test]
async fn test_non_owner_gets_not_found() {
    let app = create_test_app();
    let alice = login_as(&app.server, "alice@example.com").await;
    let bob = login_as(&app.server, "bob@example.com").await;
    let file = upload_as(&app.server, &alice, file_form("a.txt", b"alice")).await;
    let id = file["id"].as_str().unwrap();

    app.server
        .patch(&format!("/api/files/{}/tags", id))
        .add_header(AUTHORIZATION, bearer(&bob))
        .json(&json!({ "tags": ["mine"] }))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    app.server
        .patch(&format!("/api/files/{}/password", id))
        .add_header(AUTHORIZATION, bearer(&bob))
        .json(&json!({ "password": "hijacked" }))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    app.server
        .patch(&format!("/api/files/{}/expiration", id))
        .add_header(AUTHORIZATION, bearer(&bob))
        .json(&json!({ "expirationDays": 7 }))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    app.server
        .delete(&format!("/api/files/{}", id))
        .add_header(AUTHORIZATION, bearer(&bob))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let history: Value = app
        .server
        .get("/api/files/history")
        .add_header(AUTHORIZATION, bearer(&bob))
        .await
        .json();
    assert!(history.as_array().unwrap().is_empty());

    app.server
        .delete("/api/files/not-a-uuid")
        .add_header(AUTHORIZATION, bearer(&alice))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_owner_updates_and_delete() {
    let app = create_test_app();
    let token = login_as(&app.server, "a@example.com").await;
    let file = upload_as(
        &app.server,
        &token,
        file_form("a.txt", b"payload").add_text("expirationDays", "1"),
    )
    .await;
    let id = file["id"].as_str().unwrap();
    let share = file["token"].as_str().unwrap();

    let response = app
        .server
        .patch(&format!("/api/files/{}/tags", id))
        .add_header(AUTHORIZATION, bearer(&token))
        .json(&json!({ "tags": ["work", "q3"] }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["tags"], json!(["work", "q3"]));

    app.server
        .patch(&format!("/api/files/{}/tags", id))
        .add_header(AUTHORIZATION, bearer(&token))
        .json(&json!({ "tags": ["x".repeat(31)] }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.server
        .patch(&format!("/api/files/{}/expiration", id))
        .add_header(AUTHORIZATION, bearer(&token))
        .json(&json!({ "expirationDays": 0 }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.clock.advance(Duration::hours(20));
    app.server
        .patch(&format!("/api/files/{}/expiration", id))
        .add_header(AUTHORIZATION, bearer(&token))
        .json(&json!({ "expirationDays": 3 }))
        .await
        .assert_status_ok();

    // Past the original one-day window, still downloadable after the extension.
    app.clock.advance(Duration::days(1));
    app.server
        .post(&format!("/api/files/{}/download", share))
        .await
        .assert_status_ok();

    let response = app
        .server
        .patch(&format!("/api/files/{}/password", id))
        .add_header(AUTHORIZATION, bearer(&token))
        .json(&json!({ "password": "newpass1" }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["hasPassword"], true);

    app.server
        .post(&format!("/api/files/{}/download", share))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    app.server
        .delete(&format!("/api/files/{}", id))
        .add_header(AUTHORIZATION, bearer(&token))
        .await
        .assert_status_ok();

    app.server
        .get(&format!("/api/files/{}/metadata", share))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reaper_removes_expired_uploads() {
    let app = create_test_app();
    let file = upload_anonymous(
        &app.server,
        file_form("a.txt", b"bytes").add_text("expirationDays", "1"),
    )
    .await;
    let share = file["token"].as_str().unwrap();

    app.clock.advance(Duration::days(2));
    let reaper = app.state.reaper();
    let report = reaper.run_cycle().await.unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(reaper.run_cycle().await.unwrap().found, 0);

    app.server
        .get(&format!("/api/files/{}/metadata", share))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health() {
    let app = create_test_app();
    let response = app.server.get("/api/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_mistyped_json_is_bad_request() {
    let app = create_test_app();
    let token = login_as(&app.server, "a@example.com").await;
    let file = upload_as(&app.server, &token, file_form("a.txt", b"x")).await;
    let id = file["id"].as_str().unwrap();

    let response = app
        .server
        .patch(&format!("/api/files/{}/expiration", id))
        .add_header(AUTHORIZATION, bearer(&token))
        .json(&json!({ "expirationDays": "three" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"]["code"], "BAD_REQUEST");

    let response = app
        .server
        .patch(&format!("/api/files/{}/tags", id))
        .add_header(AUTHORIZATION, bearer(&token))
        .json(&json!({ "tags": "work,urgent" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"]["code"], "BAD_REQUEST");

    let response = app
        .server
        .post("/api/auth/register")
        .json(&json!({ "email": "b@example.com" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_delete_on_static_file_routes_is_not_found() {
    let app = create_test_app();
    let token = login_as(&app.server, "a@example.com").await;

    for path in ["/api/files/tags", "/api/files/history"] {
        app.server
            .delete(path)
            .add_header(AUTHORIZATION, bearer(&token))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
