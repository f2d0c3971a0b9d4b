mod common;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use roomdrop::{AppState, Config, app, rooms::ClientId};
use serde_json::{Value, json};
use tower::ServiceExt;

async fn router() -> (Router, tempfile::TempDir) {
    let (hub, dir) = common::hub().await;
    (app(AppState::new(hub, Config::default())), dir)
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, json)
}

#[tokio::test]
async fn create_join_fetch_delete() {
    let (app, _dir) = router().await;
    let host = ClientId::new();
    let guest = ClientId::new();

    let (status, room) = call(&app, Method::POST, "/rooms", Some(json!({ "clientId": host }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(room["status"], "waiting");
    assert_eq!(room["host_id"], json!(host));
    assert!(room["guest_id"].is_null());
    let code = room["room_code"].as_str().unwrap().to_owned();
    let id = room["id"].as_str().unwrap().to_owned();

    let (status, joined) = call(
        &app,
        Method::POST,
        "/rooms/join",
        Some(json!({ "roomCode": code.to_lowercase(), "clientId": guest })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(joined["status"], "connected");
    assert_eq!(joined["guest_id"], json!(guest));

    let (status, third) = call(
        &app,
        Method::POST,
        "/rooms/join",
        Some(json!({ "roomCode": code, "clientId": ClientId::new() })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(third["error"], "code not found or room full");

    let as_host = format!("/rooms/{id}?clientId={host}");
    let (status, fetched) = call(&app, Method::GET, &as_host, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, joined);

    for _ in 0..2 {
        let (status, _) = call(&app, Method::DELETE, &as_host, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    let (status, _) = call(&app, Method::GET, &as_host, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn strangers_can_neither_read_nor_delete_a_room() {
    let (app, _dir) = router().await;
    let host = ClientId::new();
    let (_, room) = call(&app, Method::POST, "/rooms", Some(json!({ "clientId": host }))).await;
    let id = room["id"].as_str().unwrap().to_owned();

    for uri in [format!("/rooms/{id}"), format!("/rooms/{id}?clientId={}", ClientId::new())] {
        let (status, body) = call(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "room not found");

        let (status, _) = call(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    let (status, fetched) = call(&app, Method::GET, &format!("/rooms/{id}?clientId={host}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["status"], "waiting");
}

#[tokio::test]
async fn session_identity_is_not_overridden_by_the_request() {
    let (app, _dir) = router().await;
    let host = ClientId::new();

    let create = Request::builder()
        .method(Method::POST)
        .uri("/rooms")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "clientId": host }).to_string()))
        .unwrap();
    let response = app.clone().oneshot(create).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let cookie = response.headers()["set-cookie"].to_str().unwrap().split(';').next().unwrap().to_owned();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let room: Value = serde_json::from_slice(&bytes).unwrap();
    let code = room["room_code"].as_str().unwrap();

    // same session claiming another id is still the host, and cannot join its own room
    let join = Request::builder()
        .method(Method::POST)
        .uri("/rooms/join")
        .header("content-type", "application/json")
        .header("cookie", cookie)
        .body(Body::from(json!({ "roomCode": code, "clientId": ClientId::new() }).to_string()))
        .unwrap();
    let response = app.clone().oneshot(join).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_code_reads_like_a_full_room() {
    let (app, _dir) = router().await;
    let (status, body) = call(&app, Method::POST, "/rooms/join", Some(json!({ "roomCode": "ZZZZ" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "code not found or room full");
}

#[tokio::test]
async fn grant_carries_both_urls_and_expiry() {
    let (app, _dir) = router().await;
    let (status, grant) = call(
        &app,
        Method::POST,
        "/uploads/grant",
        Some(json!({ "fileName": "report.pdf", "mimeType": "application/pdf", "size": 1_048_576 })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let upload = grant["uploadUrl"].as_str().unwrap();
    let download = grant["downloadUrl"].as_str().unwrap();
    assert!(upload.contains("signature="));
    assert!(download.ends_with("-report.pdf"));
    assert!(grant["expiresAt"].is_string());
}

#[tokio::test]
async fn oversized_grant_is_refused() {
    let (app, _dir) = router().await;
    let (status, body) = call(
        &app,
        Method::POST,
        "/uploads/grant",
        Some(json!({ "fileName": "big.iso", "mimeType": "application/octet-stream", "size": 250u64 * 1024 * 1024 })),
    )
    .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"], "250.0 MB is too large, the limit is 200.0 MB");
}

#[tokio::test]
async fn health() {
    let (app, _dir) = router().await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
