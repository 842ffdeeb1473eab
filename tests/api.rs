// Integration tests for the HTTP API: auth, match lifecycle, rating
// application, leaderboard, API keys, and the provider bridge surface.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use ladder_backend::api;
use ladder_backend::config::ProviderConfig;
use ladder_backend::db::Database;
use ladder_backend::provider::ProviderClient;
use ladder_backend::rate_limit::RateLimiter;

fn test_provider_config() -> ProviderConfig {
    ProviderConfig {
        client_id: "test-client".to_string(),
        client_secret: "test-secret".to_string(),
        authorize_url: "https://provider.test/oauth/authorize".to_string(),
        token_url: "https://provider.test/oauth/token".to_string(),
        api_base: "https://provider.test/api/v1".to_string(),
        redirect_uri: "http://localhost:3000/api/provider/callback".to_string(),
    }
}

async fn test_app() -> Router {
    let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
    let provider = Arc::new(ProviderClient::new(test_provider_config()));
    api::app(db, provider, RateLimiter::new())
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(t) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    let request = match body {
        Some(v) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

/// Register a user and return (jwt, user_id).
async fn register(app: &Router, username: &str) -> (String, i64) {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": "password123",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
    (
        body["token"].as_str().unwrap().to_string(),
        body["user"]["id"].as_i64().unwrap(),
    )
}

// ── Health and auth ──────────────────────────────────────────────────

#[tokio::test]
async fn test_health_check() {
    let app = test_app().await;
    let (status, body) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_register_starts_at_1600() {
    let app = test_app().await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({
            "username": "alice",
            "email": "alice@example.com",
            "password": "password123",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["rating"], 1600);
    assert!(body["token"].as_str().is_some());
}

#[tokio::test]
async fn test_register_validation() {
    let app = test_app().await;

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({"username": "al", "email": "a@b.c", "password": "password123"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({"username": "alice", "email": "a@b.c", "password": "short"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_register_duplicate_username_conflicts() {
    let app = test_app().await;
    register(&app, "alice").await;
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({
            "username": "alice",
            "email": "other@example.com",
            "password": "password123",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_login_and_me() {
    let app = test_app().await;
    register(&app, "alice").await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({"username": "alice", "password": "password123"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = send(&app, Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({"username": "alice", "password": "wrongpassword"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_me_requires_auth() {
    let app = test_app().await;
    let (status, _) = send(&app, Method::GET, "/api/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, Method::GET, "/api/auth/me", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ── Match lifecycle ──────────────────────────────────────────────────

#[tokio::test]
async fn test_match_flow_applies_ratings() {
    let app = test_app().await;
    let (token_a, id_a) = register(&app, "alice").await;
    let (_token_b, id_b) = register(&app, "bob").await;

    let (status, m) = send(
        &app,
        Method::POST,
        "/api/matches",
        Some(&token_a),
        Some(json!({"opponent_id": id_b})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(m["player1_id"], id_a);
    assert_eq!(m["player2_id"], id_b);
    assert!(m["completed_at"].is_null());
    let match_id = m["id"].as_i64().unwrap();

    let (status, done) = send(
        &app,
        Method::POST,
        &format!("/api/matches/{match_id}/result"),
        Some(&token_a),
        Some(json!({"winner_id": id_a})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["winner_id"], id_a);
    assert_eq!(done["delta_p1"], 16);
    assert_eq!(done["delta_p2"], -16);
    assert!(!done["completed_at"].is_null());

    let (status, player) = send(
        &app,
        Method::GET,
        &format!("/api/players/{id_a}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(player["rating"], 1616);
}

#[tokio::test]
async fn test_match_result_reported_only_once() {
    let app = test_app().await;
    let (token_a, id_a) = register(&app, "alice").await;
    let (token_b, id_b) = register(&app, "bob").await;

    let (_, m) = send(
        &app,
        Method::POST,
        "/api/matches",
        Some(&token_a),
        Some(json!({"opponent_id": id_b})),
    )
    .await;
    let match_id = m["id"].as_i64().unwrap();
    let uri = format!("/api/matches/{match_id}/result");

    let (status, _) = send(&app, Method::POST, &uri, Some(&token_a), Some(json!({"winner_id": id_a}))).await;
    assert_eq!(status, StatusCode::OK);

    // Second report, even from the other participant, is rejected
    let (status, body) = send(&app, Method::POST, &uri, Some(&token_b), Some(json!({"winner_id": id_b}))).await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    // Ratings reflect exactly one application
    let (_, player) = send(&app, Method::GET, &format!("/api/players/{id_a}"), None, None).await;
    assert_eq!(player["rating"], 1616);
}

#[tokio::test]
async fn test_match_validation() {
    let app = test_app().await;
    let (token_a, id_a) = register(&app, "alice").await;
    let (_token_b, id_b) = register(&app, "bob").await;
    let (token_c, _id_c) = register(&app, "carol").await;

    // Self-match rejected
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/matches",
        Some(&token_a),
        Some(json!({"opponent_id": id_a})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Unknown opponent rejected
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/matches",
        Some(&token_a),
        Some(json!({"opponent_id": 9999})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, m) = send(
        &app,
        Method::POST,
        "/api/matches",
        Some(&token_a),
        Some(json!({"opponent_id": id_b})),
    )
    .await;
    let match_id = m["id"].as_i64().unwrap();
    let uri = format!("/api/matches/{match_id}/result");

    // Non-participant cannot report
    let (status, _) = send(&app, Method::POST, &uri, Some(&token_c), Some(json!({"winner_id": id_a}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Winner must be a participant
    let (status, _) = send(&app, Method::POST, &uri, Some(&token_a), Some(json!({"winner_id": 9999}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Missing match
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/matches/9999/result",
        Some(&token_a),
        Some(json!({"winner_id": id_a})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_match() {
    let app = test_app().await;
    let (token_a, id_a) = register(&app, "alice").await;
    let (token_b, id_b) = register(&app, "bob").await;

    let (_, m) = send(
        &app,
        Method::POST,
        "/api/matches",
        Some(&token_a),
        Some(json!({"opponent_id": id_b})),
    )
    .await;
    let match_id = m["id"].as_i64().unwrap();

    // Only the creator may cancel
    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/api/matches/{match_id}"),
        Some(&token_b),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/api/matches/{match_id}"),
        Some(&token_a),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Completed matches cannot be cancelled
    let (_, m) = send(
        &app,
        Method::POST,
        "/api/matches",
        Some(&token_a),
        Some(json!({"opponent_id": id_b})),
    )
    .await;
    let match_id = m["id"].as_i64().unwrap();
    send(
        &app,
        Method::POST,
        &format!("/api/matches/{match_id}/result"),
        Some(&token_a),
        Some(json!({"winner_id": id_a})),
    )
    .await;
    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/api/matches/{match_id}"),
        Some(&token_a),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_list_matches_status_filter() {
    let app = test_app().await;
    let (token_a, id_a) = register(&app, "alice").await;
    let (_token_b, id_b) = register(&app, "bob").await;

    let (_, m1) = send(
        &app,
        Method::POST,
        "/api/matches",
        Some(&token_a),
        Some(json!({"opponent_id": id_b})),
    )
    .await;
    send(
        &app,
        Method::POST,
        "/api/matches",
        Some(&token_a),
        Some(json!({"opponent_id": id_b})),
    )
    .await;
    send(
        &app,
        Method::POST,
        &format!("/api/matches/{}/result", m1["id"]),
        Some(&token_a),
        Some(json!({"winner_id": id_a})),
    )
    .await;

    let (status, all) = send(&app, Method::GET, "/api/matches", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 2);

    let (_, pending) = send(&app, Method::GET, "/api/matches?status=pending", None, None).await;
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let (_, completed) = send(&app, Method::GET, "/api/matches?status=completed", None, None).await;
    assert_eq!(completed.as_array().unwrap().len(), 1);

    let (status, _) = send(&app, Method::GET, "/api/matches?status=bogus", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ── Leaderboard and stats ────────────────────────────────────────────

#[tokio::test]
async fn test_leaderboard_ranks_and_counts() {
    let app = test_app().await;
    let (token_a, id_a) = register(&app, "alice").await;
    let (_token_b, id_b) = register(&app, "bob").await;

    for _ in 0..2 {
        let (_, m) = send(
            &app,
            Method::POST,
            "/api/matches",
            Some(&token_a),
            Some(json!({"opponent_id": id_b})),
        )
        .await;
        send(
            &app,
            Method::POST,
            &format!("/api/matches/{}/result", m["id"]),
            Some(&token_a),
            Some(json!({"winner_id": id_a})),
        )
        .await;
    }

    let (status, rows) = send(&app, Method::GET, "/api/leaderboard", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["rank"], 1);
    assert_eq!(rows[0]["player_id"], id_a);
    assert_eq!(rows[0]["wins"], 2);
    assert_eq!(rows[1]["rank"], 2);
    assert_eq!(rows[1]["losses"], 2);

    // Offset pagination keeps absolute ranks
    let (_, page) = send(&app, Method::GET, "/api/leaderboard?limit=1&offset=1", None, None).await;
    let page = page.as_array().unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["rank"], 2);
}

#[tokio::test]
async fn test_player_stats() {
    let app = test_app().await;
    let (token_a, id_a) = register(&app, "alice").await;
    let (_token_b, id_b) = register(&app, "bob").await;

    let (_, m) = send(
        &app,
        Method::POST,
        "/api/matches",
        Some(&token_a),
        Some(json!({"opponent_id": id_b})),
    )
    .await;
    send(
        &app,
        Method::POST,
        &format!("/api/matches/{}/result", m["id"]),
        Some(&token_a),
        Some(json!({"winner_id": id_b})),
    )
    .await;
    // A pending match does not count toward stats
    send(
        &app,
        Method::POST,
        "/api/matches",
        Some(&token_a),
        Some(json!({"opponent_id": id_b})),
    )
    .await;

    let (status, stats) = send(
        &app,
        Method::GET,
        &format!("/api/players/{id_a}/stats"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["wins"], 0);
    assert_eq!(stats["losses"], 1);
    assert_eq!(stats["matches_played"], 1);
    assert_eq!(stats["rating"], 1584);

    let (status, _) = send(&app, Method::GET, "/api/players/9999/stats", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pagination_limit_clamped() {
    let app = test_app().await;
    register(&app, "alice").await;
    register(&app, "bob").await;
    register(&app, "carol").await;

    // Out-of-range limits are clamped instead of reaching SQLite, where
    // a negative LIMIT means unlimited
    let (status, body) = send(&app, Method::GET, "/api/players?limit=-1", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (_, body) = send(&app, Method::GET, "/api/players?limit=0", None, None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (_, body) = send(&app, Method::GET, "/api/leaderboard?limit=-1", None, None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (_, body) = send(&app, Method::GET, "/api/players?limit=100", None, None).await;
    assert_eq!(body.as_array().unwrap().len(), 3);
}

// ── API keys ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_api_key_auth_and_scopes() {
    let app = test_app().await;
    let (token, _id) = register(&app, "alice").await;
    let (_, id_b) = register(&app, "bob").await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/api-keys",
        Some(&token),
        Some(json!({"name": "ci", "scopes": "matches:read,leaderboard:read"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let raw = body["token"].as_str().unwrap().to_string();
    assert!(raw.starts_with("ladder_"));
    // The stored record never echoes the raw token
    assert!(body["api_key"]["token_hash"].is_null());

    // Read access works with the API token
    let (status, _) = send(&app, Method::GET, "/api/auth/me", Some(&raw), None).await;
    assert_eq!(status, StatusCode::OK);

    // Write access is denied for a read-only token
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/matches",
        Some(&raw),
        Some(json!({"opponent_id": id_b})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_api_key_cannot_escalate_scopes() {
    let app = test_app().await;
    let (jwt, _id) = register(&app, "alice").await;
    let (_, id_b) = register(&app, "bob").await;

    // A key that can manage keys but not write matches
    let (_, body) = send(
        &app,
        Method::POST,
        "/api/api-keys",
        Some(&jwt),
        Some(json!({"name": "manager", "scopes": "api_keys:write,matches:read"})),
    )
    .await;
    let manager = body["token"].as_str().unwrap().to_string();

    // It cannot mint a key with scopes it does not hold
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/api-keys",
        Some(&manager),
        Some(json!({"name": "escalated", "scopes": "matches:write"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // The default read scopes are also out of its reach
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/api-keys",
        Some(&manager),
        Some(json!({"name": "defaults"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // A subset of its own scopes is fine
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/api-keys",
        Some(&manager),
        Some(json!({"name": "narrowed", "scopes": "matches:read"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let narrowed = body["token"].as_str().unwrap().to_string();

    // And the narrowed key still cannot write
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/matches",
        Some(&narrowed),
        Some(json!({"opponent_id": id_b})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_api_key_delete() {
    let app = test_app().await;
    let (token, _) = register(&app, "alice").await;

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/api-keys",
        Some(&token),
        Some(json!({"name": "ci"})),
    )
    .await;
    let key_id = body["api_key"]["id"].as_i64().unwrap();

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/api/api-keys/{key_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/api/api-keys/{key_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ── Provider bridge ──────────────────────────────────────────────────

#[tokio::test]
async fn test_provider_connect_and_status() {
    let app = test_app().await;
    let (token, _) = register(&app, "alice").await;

    let (status, body) = send(&app, Method::GET, "/api/provider/status", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["linked"], false);

    let (status, body) = send(&app, Method::GET, "/api/provider/connect", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let url = body["authorize_url"].as_str().unwrap();
    assert!(url.starts_with("https://provider.test/oauth/authorize?"));
    assert!(url.contains("state="));
}

#[tokio::test]
async fn test_provider_callback_rejects_unknown_state() {
    let app = test_app().await;
    let (status, _) = send(
        &app,
        Method::GET,
        "/api/provider/callback?code=abc&state=bogus",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_provider_tournaments_require_link() {
    let app = test_app().await;
    let (token, _) = register(&app, "alice").await;

    let (status, _) = send(
        &app,
        Method::GET,
        "/api/provider/tournaments",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Method::DELETE,
        "/api/provider/connection",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Local tournament records are empty but listable
    let (status, body) = send(&app, Method::GET, "/api/tournaments", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}
