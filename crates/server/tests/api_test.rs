//! REST API round trips against the in-process router.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use server::state::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt;

fn configs_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("golf-configs-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let practice = json!({
        "name": "Practice green",
        "grid": { "height": 48, "aspect": 1.5 },
        "backend": "Cpu",
        "seed": 5
    });
    std::fs::write(dir.join("practice.json"), practice.to_string()).unwrap();
    std::fs::write(dir.join("broken.json"), "{ not json").unwrap();
    std::fs::write(dir.join("notes.txt"), "ignored").unwrap();
    dir
}

fn test_app() -> Router {
    server::app(Arc::new(AppState::new(configs_dir(), 3000)))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
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
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()));
    (status, value)
}

#[tokio::test]
async fn health_and_configs() {
    let app = test_app();
    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".into()));

    let (status, body) = call(&app, "GET", "/api/configs", None).await;
    assert_eq!(status, StatusCode::OK);
    let configs = body["configs"].as_array().unwrap();
    assert_eq!(configs.len(), 1, "only the valid json config is listed: {}", body);
    assert_eq!(configs[0]["name"], "practice");
    assert_eq!(configs[0]["course"], "Practice green");
    assert_eq!(configs[0]["width"], 72);
    assert_eq!(configs[0]["par"], 5);

    let (status, body) = call(&app, "GET", "/api/configs/practice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["seed"], 5);

    let (status, _) = call(&app, "GET", "/api/configs/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn play_a_game_over_rest() {
    let app = test_app();
    let (status, created) = call(&app, "POST", "/api/games", Some(json!({ "config": "practice" }))).await;
    assert_eq!(status, StatusCode::OK, "{}", created);
    assert_eq!(created["state"], "Created");
    assert_eq!(created["width"], 72);
    let id = created["game_id"].as_str().unwrap().to_string();
    assert!(created["ws_url"].as_str().unwrap().ends_with(&id));

    let (status, game) = call(&app, "GET", &format!("/api/games/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(game["config"], "practice");
    assert_eq!(game["status"]["score"], 0);

    let (status, putt) =
        call(&app, "POST", &format!("/api/games/{id}/putt"), Some(json!({ "pointer": [64.4, 24.0] }))).await;
    assert_eq!(status, StatusCode::OK, "{}", putt);
    // Origin defaults to the start at (14.4, 24).
    let p = putt["reply"]["Putt"][0].as_f64().unwrap();
    assert!((p - 0.08).abs() < 1e-5, "momentum {}", p);
    assert_eq!(putt["status"]["score"], 2);

    let (status, measured) = call(&app, "POST", &format!("/api/games/{id}/measure"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(measured["reply"]["Measured"]["cell"][0].as_u64().unwrap() < 72);
    assert_eq!(measured["status"]["score"], 3);

    let (_, shown) = call(&app, "POST", &format!("/api/games/{id}/measurements"), None).await;
    assert_eq!(shown["reply"]["Measurements"].as_array().unwrap().len(), 100);
    assert_eq!(shown["status"]["paused"], true);

    let (_, resumed) = call(&app, "POST", &format!("/api/games/{id}/resume"), None).await;
    assert_eq!(resumed["status"]["paused"], false);

    let (_, club) = call(&app, "POST", &format!("/api/games/{id}/club"), Some(json!({ "size": 2.0 }))).await;
    assert_eq!(club["status"]["club_size"], 1.0);

    let (_, reset) = call(&app, "POST", &format!("/api/games/{id}/reset"), None).await;
    assert_eq!(reset["status"]["score"], 0);

    let (status, _) = call(&app, "POST", &format!("/api/games/{id}/start"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, game) = call(&app, "GET", &format!("/api/games/{id}"), None).await;
    assert_eq!(game["state"], "Running");

    let (status, _) = call(&app, "DELETE", &format!("/api/games/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "GET", &format!("/api/games/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bad_requests() {
    let app = test_app();
    let (status, _) = call(&app, "POST", "/api/games", Some(json!({ "config": "missing" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, "POST", "/api/games", Some(json!({ "config": "broken" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, "POST", "/api/games/nope/measure", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
