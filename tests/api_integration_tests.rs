//! Integration Tests for API Endpoints
//!
//! Tests the full request/response cycle for the key-value and status
//! endpoints.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{delete, get, send_json, spawn_app};

// == Key-Value Endpoint Tests ==

#[tokio::test]
async fn test_set_then_get_round_trip() {
    let app = spawn_app().await;

    let response = send_json(
        &app.router,
        "PUT",
        "/kv/user/profile",
        json!({"value": {"name": "Ada", "cart": [1, 2]}}),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.json()["message"]
        .as_str()
        .unwrap()
        .contains("profile"));

    let response = get(&app.router, "/kv/user/profile").await;
    assert_eq!(response.status, StatusCode::OK);
    let json = response.json();
    assert_eq!(json["namespace"], "user");
    assert_eq!(json["key"], "profile");
    assert_eq!(json["value"], json!({"name": "Ada", "cart": [1, 2]}));
}

#[tokio::test]
async fn test_get_missing_key_is_404() {
    let app = spawn_app().await;

    let response = get(&app.router, "/kv/user/nobody").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(response.json()["error"]
        .as_str()
        .unwrap()
        .contains("user/nobody"));
}

#[tokio::test]
async fn test_set_rejects_zero_ttl() {
    let app = spawn_app().await;

    let response = send_json(&app.router, "PUT", "/kv/user/k", json!({"value": 1, "ttl": 0})).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_set_rejects_namespace_with_separator() {
    let app = spawn_app().await;

    let response = send_json(&app.router, "PUT", "/kv/user_x/k", json!({"value": 1})).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_set_without_value_is_rejected() {
    let app = spawn_app().await;

    let response = send_json(&app.router, "PUT", "/kv/user/k", json!({"ttl": 1000})).await;
    assert!(response.status.is_client_error());
}

#[tokio::test]
async fn test_short_ttl_expires() {
    let app = spawn_app().await;

    send_json(&app.router, "PUT", "/kv/session/token", json!({"value": "abc", "ttl": 50})).await;
    assert_eq!(get(&app.router, "/kv/session/token").await.status, StatusCode::OK);

    tokio::time::sleep(std::time::Duration::from_millis(120)).await;
    assert_eq!(
        get(&app.router, "/kv/session/token").await.status,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_delete_key() {
    let app = spawn_app().await;

    send_json(&app.router, "PUT", "/kv/user/k", json!({"value": true})).await;
    let response = delete(&app.router, "/kv/user/k").await;
    assert_eq!(response.status, StatusCode::OK);

    assert_eq!(get(&app.router, "/kv/user/k").await.status, StatusCode::NOT_FOUND);

    // Deleting again is not an error
    assert_eq!(delete(&app.router, "/kv/user/k").await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_clear_namespace_leaves_others() {
    let app = spawn_app().await;

    send_json(&app.router, "PUT", "/kv/user/a", json!({"value": 1})).await;
    send_json(&app.router, "PUT", "/kv/user/b", json!({"value": 2})).await;
    send_json(&app.router, "PUT", "/kv/product/c", json!({"value": 3})).await;

    let response = delete(&app.router, "/kv/user").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["removed"], 2);

    assert_eq!(get(&app.router, "/kv/user/a").await.status, StatusCode::NOT_FOUND);
    assert_eq!(get(&app.router, "/kv/product/c").await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_clear_all() {
    let app = spawn_app().await;

    send_json(&app.router, "PUT", "/kv/user/a", json!({"value": 1})).await;
    send_json(&app.router, "PUT", "/kv/product/c", json!({"value": 3})).await;

    let response = delete(&app.router, "/kv").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["removed"], 2);
    assert_eq!(get(&app.router, "/kv/product/c").await.status, StatusCode::NOT_FOUND);
}

// == Status Endpoint Tests ==

#[tokio::test]
async fn test_stats_report_hit_rate() {
    let app = spawn_app().await;

    send_json(&app.router, "PUT", "/kv/user/a", json!({"value": 1})).await;
    get(&app.router, "/kv/user/a").await;
    get(&app.router, "/kv/user/a").await;
    for key in ["x", "y", "z"] {
        get(&app.router, &format!("/kv/user/{key}")).await;
    }

    let response = get(&app.router, "/stats").await;
    assert_eq!(response.status, StatusCode::OK);
    let json = response.json();
    assert_eq!(json["kv"]["hits"], 2);
    assert_eq!(json["kv"]["misses"], 3);
    assert_eq!(json["kv"]["sets"], 1);
    assert_eq!(json["kv"]["hitRate"], "40.00%");
    assert_eq!(json["kv"]["memoryEntries"], 1);
}

#[tokio::test]
async fn test_stats_include_worker_and_prefetch() {
    let app = spawn_app().await;

    let json = get(&app.router, "/stats").await.json();
    assert_eq!(json["worker"]["state"], "active");
    assert!(json["worker"]["partitions"]
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p["name"] == "wazhop-v1-static" && p["entries"] == 1));
    assert_eq!(json["prefetch"]["cachedEntries"], 0);
    assert_eq!(json["prefetch"]["inFlight"], 0);
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = spawn_app().await;

    let response = get(&app.router, "/health").await;
    assert_eq!(response.status, StatusCode::OK);
    let json = response.json();
    assert_eq!(json["status"], "healthy");
    assert!(json["timestamp"].is_string());
}
