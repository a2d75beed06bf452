//! HTTP surface tests over the in-memory engine: puzzle CRUD + listing,
//! game creation emitting `create` first, projected state, solve
//! recording.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use gridcast_core::solve::SolveService;
use gridcast_hub::StreamHub;
use gridcast_server::{build_router, AppState, Config};
use gridcast_testing::fixtures::puzzle_3x3;
use gridcast_testing::mocks::{test_clock, InMemoryCatalog, InMemoryEventStore};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn test_app() -> Router {
    let config = Arc::new(Config::from_env());
    let store = Arc::new(InMemoryEventStore::new());
    let catalog = Arc::new(InMemoryCatalog::new());
    let clock = Arc::new(test_clock());
    let solves = Arc::new(SolveService::new(
        store.clone(),
        Arc::new(catalog.solve_store()),
        clock.clone(),
    ));
    let hub = Arc::new(StreamHub::new(
        store.clone(),
        None,
        clock.clone(),
        config.hub_config(),
    ));

    build_router(AppState {
        config,
        store,
        catalog,
        solves,
        hub,
        clock,
    })
}

async fn request(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    let request = match body {
        Some(json) => builder.body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request builds");

    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

fn create_puzzle_body(pid: &str) -> Value {
    json!({
        "pid": pid,
        "is_public": true,
        "content": serde_json::to_value(puzzle_3x3()).expect("content"),
    })
}

#[tokio::test]
async fn puzzle_crud_and_listing() {
    let app = test_app();

    let (status, created) =
        request(&app, "POST", "/api/puzzles", Some(create_puzzle_body("101-mini"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["pid"], "101-mini");
    assert_eq!(created["times_solved"], 0);

    // Duplicate pid conflicts.
    let (status, _) =
        request(&app, "POST", "/api/puzzles", Some(create_puzzle_body("101-mini"))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, fetched) = request(&app, "GET", "/api/puzzles/101-mini", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["content"]["info"]["type"], "Mini Puzzle");

    let (status, listed) = request(
        &app,
        "GET",
        "/api/puzzles?types=Mini%20Puzzle&search=three",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().expect("array").len(), 1);

    let (status, listed) = request(&app, "GET", "/api/puzzles?types=Daily%20Puzzle", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(listed.as_array().expect("array").is_empty());

    let (status, _) = request(
        &app,
        "PATCH",
        "/api/puzzles/101-mini",
        Some(json!({ "is_public": false })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, listed) = request(&app, "GET", "/api/puzzles", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(listed.as_array().expect("array").is_empty());

    let (status, _) = request(&app, "DELETE", "/api/puzzles/101-mini", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = request(&app, "GET", "/api/puzzles/101-mini", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn game_creation_emits_create_and_state_projects() {
    let app = test_app();
    request(&app, "POST", "/api/puzzles", Some(create_puzzle_body("7"))).await;

    let (status, created) = request(
        &app,
        "POST",
        "/api/games",
        Some(json!({ "pid": "7", "gid": "g-http" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["gid"], "g-http");
    assert_eq!(created["event"]["type"], "create");
    assert_eq!(created["event"]["seq"], 1);

    let (status, state) = request(&app, "GET", "/api/games/g-http/state", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["pid"], "7");
    assert_eq!(state["solved"], false);
    assert_eq!(state["grid"].as_array().expect("rows").len(), 3);
    assert_eq!(state["clock"]["paused"], true);

    // Unknown game: stream has no create event.
    let (status, _) = request(&app, "GET", "/api/games/nope/state", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Unknown puzzle for game creation.
    let (status, _) = request(&app, "POST", "/api/games", Some(json!({ "pid": "missing" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn solve_endpoint_is_idempotent() {
    let app = test_app();
    request(&app, "POST", "/api/puzzles", Some(create_puzzle_body("9"))).await;
    request(
        &app,
        "POST",
        "/api/games",
        Some(json!({ "pid": "9", "gid": "g-solve" })),
    )
    .await;

    let (status, first) = request(
        &app,
        "POST",
        "/api/games/g-solve/solve",
        Some(json!({ "pid": "9", "time_taken_seconds": 42 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["recorded"], true);
    assert_eq!(first["solve"]["revealed_squares_count"], 0);

    let (status, second) = request(
        &app,
        "POST",
        "/api/games/g-solve/solve",
        Some(json!({ "pid": "9", "time_taken_seconds": 42 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["recorded"], false);

    let (_, puzzle) = request(&app, "GET", "/api/puzzles/9", None).await;
    assert_eq!(puzzle["times_solved"], 1);

    let (status, _) = request(
        &app,
        "POST",
        "/api/games/g-solve/solve",
        Some(json!({ "pid": "9", "time_taken_seconds": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn room_state_is_empty_for_untouched_rooms() {
    let app = test_app();
    let (status, state) = request(&app, "GET", "/api/rooms/r-1/state", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(state["users"].as_object().expect("users").is_empty());
}
