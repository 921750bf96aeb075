use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use review_queue::api::{router, ApiState, SESSION_HEADER};
use review_queue::catalog::ItemCatalog;
use review_queue::config::CoordinatorConfig;
use review_queue::coordinator::Coordinator;
use review_queue::store::{MemoryBackend, StateBackend};

fn create_test_app() -> Router {
    create_test_app_with(CoordinatorConfig::default())
}

fn create_test_app_with(config: CoordinatorConfig) -> Router {
    let catalog = ItemCatalog::from_reader(
        "company_name,website,industry\n\
         Acme,https://acme.example,Tools\n\
         Beta,https://beta.example,Retail\n"
            .as_bytes(),
    )
    .unwrap();
    let store: Arc<dyn StateBackend> = Arc::new(MemoryBackend::new());
    let coordinator = Coordinator::new(Arc::new(catalog), store, config, Default::default());
    router(ApiState {
        coordinator: Arc::new(coordinator),
    })
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Option<String>, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let session = response
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, session, json)
}

fn get(uri: &str, session: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(sid) = session {
        builder = builder.header(SESSION_HEADER, sid);
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, session: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(SESSION_HEADER, session)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_new_session_is_issued_and_asked_for_username() {
    let app = create_test_app();

    let (status, session, body) = send(&app, get("/api/current", None)).await;
    assert_eq!(status, StatusCode::OK);
    let session = session.expect("session header");
    assert_eq!(body["session_id"], json!(session));
    assert_eq!(body["requires_username"], json!(true));
    assert_eq!(body["progress"]["total"], json!(2));
}

#[tokio::test]
async fn test_review_flow() {
    let app = create_test_app();

    let (status, _, body) = send(
        &app,
        post("/api/set-username", "s1", json!({ "username": "alice" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], json!("alice"));

    let (status, _, body) = send(&app, get("/api/current", Some("s1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["finished"], json!(false));
    assert_eq!(body["item_index"], json!(0));
    assert_eq!(body["item"]["company_name"], json!("Acme"));
    assert_eq!(body["item"]["industry"], json!("Tools"));

    let (status, _, body) = send(
        &app,
        post("/api/mark", "s1", json!({ "item_index": 0, "liked": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["completion"]["user_stats"]["reviews"], json!(1));

    let (_, _, progress) = send(&app, get("/api/progress", None)).await;
    assert_eq!(progress["liked"], json!(1));
    assert_eq!(progress["remaining"], json!(1));

    let (_, _, board) = send(&app, get("/api/leaderboard", None)).await;
    assert_eq!(board["total_users"], json!(1));
    assert_eq!(board["leaderboard"][0]["username"], json!("alice"));
}

#[tokio::test]
async fn test_mark_wrong_item_conflicts() {
    let app = create_test_app();
    send(&app, post("/api/set-username", "s1", json!({ "username": "bob" }))).await;
    send(&app, get("/api/current", Some("s1"))).await;

    let (status, _, body) = send(
        &app,
        post("/api/mark", "s1", json!({ "item_index": 1, "liked": false })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], json!(false));

    let (status, _, _) = send(
        &app,
        post("/api/mark", "nobody", json!({ "item_index": 0, "liked": false })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_blank_username_is_rejected() {
    let app = create_test_app();
    let (status, _, _) = send(
        &app,
        post("/api/set-username", "s1", json!({ "username": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_exhausted_queue_reports_finished() {
    let app = create_test_app();
    for sid in ["s1", "s2", "s3"] {
        send(&app, post("/api/set-username", sid, json!({ "username": sid }))).await;
    }
    send(&app, get("/api/current", Some("s1"))).await;
    send(&app, get("/api/current", Some("s2"))).await;

    let (status, _, body) = send(&app, get("/api/current", Some("s3"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["finished"], json!(true));
}

#[tokio::test]
async fn test_restart_frees_item() {
    let app = create_test_app();
    send(&app, post("/api/set-username", "s1", json!({ "username": "a" }))).await;
    send(&app, get("/api/current", Some("s1"))).await;

    let (status, _, body) = send(&app, post("/api/restart", "s1", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released"], json!(0));

    send(&app, post("/api/set-username", "s2", json!({ "username": "b" }))).await;
    let (_, _, body) = send(&app, get("/api/current", Some("s2"))).await;
    assert_eq!(body["item_index"], json!(0));
}

#[tokio::test]
async fn test_export_csv() {
    let app = create_test_app();

    let (status, _, _) = send(&app, get("/api/export/liked", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = send(&app, get("/api/export/maybe", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    send(&app, post("/api/set-username", "s1", json!({ "username": "a" }))).await;
    send(&app, get("/api/current", Some("s1"))).await;
    send(
        &app,
        post("/api/mark", "s1", json!({ "item_index": 0, "liked": true })),
    )
    .await;

    let response = app
        .clone()
        .oneshot(get("/api/export/liked", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/csv");
    let disposition = response.headers()["content-disposition"].to_str().unwrap();
    assert!(disposition.contains("liked_websites_"));

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(
        String::from_utf8(body.to_vec()).unwrap(),
        "company_name,website,industry\nAcme,https://acme.example,Tools\n"
    );
}

#[tokio::test]
async fn test_admin_reset_and_stats() {
    let app = create_test_app();
    send(&app, post("/api/set-username", "s1", json!({ "username": "a" }))).await;
    send(&app, get("/api/current", Some("s1"))).await;

    let (_, _, stats) = send(&app, get("/api/admin/stats", None)).await;
    assert_eq!(stats["assigned"], json!(1));
    assert_eq!(stats["global_cursor"], json!(1));
    assert_eq!(stats["sessions"], json!(["s1"]));

    let (status, _, body) = send(&app, post("/api/admin/reset", "admin", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));

    let (_, _, stats) = send(&app, get("/api/admin/stats", None)).await;
    assert_eq!(stats["assigned"], json!(0));
    assert_eq!(stats["global_cursor"], json!(0));
}

#[tokio::test]
async fn test_username_survives_session_expiry() {
    let config = CoordinatorConfig::default().with_session_timeout(Duration::from_millis(100));
    let app = create_test_app_with(config);
    send(&app, post("/api/set-username", "s1", json!({ "username": "alice" }))).await;

    tokio::time::sleep(Duration::from_millis(250)).await;

    let (status, _, body) = send(&app, get("/api/current", Some("s1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], json!("alice"));
    assert_eq!(body["item_index"], json!(0));

    let (status, _, body) = send(
        &app,
        post("/api/mark", "s1", json!({ "item_index": 0, "liked": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["completion"]["user_stats"]["reviews"], json!(1));

    let (_, _, board) = send(&app, get("/api/leaderboard", None)).await;
    assert_eq!(board["leaderboard"][0]["username"], json!("alice"));
    assert_eq!(board["leaderboard"][0]["reviews"], json!(1));

    let (_, _, body) = send(&app, get("/api/current", Some("s1"))).await;
    assert!(body.get("requires_username").is_none());
    assert_eq!(body["username"], json!("alice"));
}
