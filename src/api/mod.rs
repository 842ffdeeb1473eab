// HTTP API routes (players, matches, leaderboard, API keys, provider bridge).

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use crate::auth::{self, AuthUser};
use crate::db::{Database, DbError, User};
use crate::metrics;
use crate::provider::{ProviderClient, ProviderError};
use crate::rate_limit::{RateLimitType, RateLimiter};
use crate::rating;

// ── Request types ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct PaginationParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize)]
pub struct ListMatchesParams {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize)]
pub struct CreateMatchRequest {
    pub opponent_id: i64,
}

#[derive(Deserialize)]
pub struct ReportResultRequest {
    pub winner_id: i64,
}

#[derive(Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    pub scopes: Option<String>,
}

#[derive(Deserialize)]
pub struct ProviderCallbackParams {
    pub code: String,
    pub state: String,
}

#[derive(Deserialize)]
pub struct CreateTournamentRequest {
    pub name: String,
}

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub provider: Arc<ProviderClient>,
    pub rate_limiter: RateLimiter,
}

// ── Error helpers ─────────────────────────────────────────────────────

fn json_error(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(json!({ "error": msg })))
}

fn internal_error(e: sqlx::Error) -> impl IntoResponse {
    tracing::error!("Database error: {e}");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

fn db_error(e: DbError) -> axum::response::Response {
    match e {
        DbError::MatchNotFound => {
            json_error(StatusCode::NOT_FOUND, "Match not found").into_response()
        }
        DbError::MatchAlreadyCompleted => {
            json_error(StatusCode::CONFLICT, "Match result already reported").into_response()
        }
        DbError::InvalidWinner => json_error(
            StatusCode::BAD_REQUEST,
            "winner_id must be one of the match participants",
        )
        .into_response(),
        DbError::PlayerNotFound => {
            json_error(StatusCode::NOT_FOUND, "Player not found").into_response()
        }
        DbError::Sqlx(e) => internal_error(e).into_response(),
    }
}

fn provider_error(e: ProviderError) -> axum::response::Response {
    match e {
        ProviderError::NotLinked => json_error(
            StatusCode::NOT_FOUND,
            "No tournament provider account linked",
        )
        .into_response(),
        ProviderError::UnknownState => {
            json_error(StatusCode::BAD_REQUEST, "Unknown or expired authorization state")
                .into_response()
        }
        ProviderError::Api { status, ref body } => {
            tracing::error!("Provider API error {status}: {body}");
            json_error(StatusCode::BAD_GATEWAY, "Tournament provider request failed")
                .into_response()
        }
        ProviderError::Http(e) => {
            tracing::error!("Provider HTTP error: {e}");
            json_error(StatusCode::BAD_GATEWAY, "Tournament provider unreachable").into_response()
        }
        ProviderError::Db(e) => internal_error(e).into_response(),
    }
}

fn rate_limited(e: crate::rate_limit::RateLimitError) -> axum::response::Response {
    json_error(StatusCode::TOO_MANY_REQUESTS, &e.to_string()).into_response()
}

/// Public view of a player for unauthenticated-facing endpoints (no email).
fn player_json(user: &User) -> serde_json::Value {
    json!({
        "id": user.id,
        "username": user.username,
        "display_name": user.display_name,
        "bio": user.bio,
        "rating": user.rating,
        "created_at": user.created_at,
    })
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(
    db: Arc<Database>,
    provider: Arc<ProviderClient>,
    rate_limiter: RateLimiter,
) -> Router {
    let state = AppState {
        db,
        provider,
        rate_limiter,
    };

    Router::new()
        // Players
        .route("/api/players", get(list_players))
        .route("/api/players/{id}", get(get_player))
        .route("/api/players/{id}/stats", get(get_player_stats))
        .route("/api/players/{id}/matches", get(list_player_matches))
        // Matches
        .route("/api/matches", get(list_matches).post(create_match))
        .route("/api/matches/{id}", get(get_match).delete(cancel_match))
        .route("/api/matches/{id}/result", post(report_result))
        // Leaderboard
        .route("/api/leaderboard", get(leaderboard))
        // API keys
        .route("/api/api-keys", get(list_api_keys).post(create_api_key))
        .route("/api/api-keys/{id}", delete(delete_api_key))
        // Tournament provider bridge
        .route("/api/provider/connect", get(provider_connect))
        .route("/api/provider/callback", get(provider_callback))
        .route("/api/provider/status", get(provider_status))
        .route("/api/provider/connection", delete(provider_disconnect))
        .route(
            "/api/provider/tournaments",
            get(provider_list_tournaments).post(provider_create_tournament),
        )
        .route("/api/tournaments", get(list_local_tournaments))
        .with_state(state)
}

/// Assemble the full application: auth routes, API routes, CORS, and the
/// request-metrics and auth-extension layers. Used by main and by the
/// integration tests.
pub fn app(
    db: Arc<Database>,
    provider: Arc<ProviderClient>,
    rate_limiter: RateLimiter,
) -> Router {
    let db_for_ext = db.clone();

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(serve_metrics))
        // Auth routes
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/profile", put(auth::update_profile))
        .with_state(db.clone())
        .merge(router(db, provider, rate_limiter))
        .layer(tower_http::cors::CorsLayer::permissive())
        // Inject Arc<Database> into request extensions so auth extractors can
        // look up API tokens without needing access to AppState directly.
        .layer(axum::middleware::from_fn(
            move |mut req: axum::http::Request<axum::body::Body>, next: axum::middleware::Next| {
                let db = db_for_ext.clone();
                async move {
                    req.extensions_mut().insert(db);
                    next.run(req).await
                }
            },
        ))
        .layer(axum::middleware::from_fn(track_metrics))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "ladder-backend" }))
}

async fn serve_metrics() -> String {
    metrics::gather_metrics()
}

/// Record request count and duration per normalized path.
async fn track_metrics(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = req.method().to_string();
    let path = metrics::normalize_path(req.uri().path());
    let start = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::API_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();
    metrics::API_REQUEST_DURATION_SECONDS
        .with_label_values(&[&path])
        .observe(start.elapsed().as_secs_f64());
    response
}

// ── Player handlers ───────────────────────────────────────────────────

async fn list_players(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(50).clamp(1, 100);
    let offset = params.offset.unwrap_or(0).max(0);
    match state.db.list_players(limit, offset).await {
        Ok(players) => {
            let players: Vec<_> = players.iter().map(player_json).collect();
            (StatusCode::OK, Json(json!(players))).into_response()
        }
        Err(e) => internal_error(e).into_response(),
    }
}

async fn get_player(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.db.get_user(id).await {
        Ok(Some(user)) => (StatusCode::OK, Json(player_json(&user))).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "Player not found").into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn get_player_stats(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let user = match state.db.get_user(id).await {
        Ok(Some(u)) => u,
        Ok(None) => return json_error(StatusCode::NOT_FOUND, "Player not found").into_response(),
        Err(e) => return internal_error(e).into_response(),
    };

    let completed = match state.db.list_completed_matches_for_player(id).await {
        Ok(matches) => matches,
        Err(e) => return internal_error(e).into_response(),
    };

    let wins = rating::count_wins(completed.iter().map(|m| m.winner_id), id);
    let played = completed.len() as i64;

    (
        StatusCode::OK,
        Json(json!({
            "player_id": user.id,
            "username": user.username,
            "rating": user.rating,
            "wins": wins,
            "losses": played - wins,
            "matches_played": played,
        })),
    )
        .into_response()
}

async fn list_player_matches(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<PaginationParams>,
) -> impl IntoResponse {
    match state.db.get_user(id).await {
        Ok(None) => return json_error(StatusCode::NOT_FOUND, "Player not found").into_response(),
        Err(e) => return internal_error(e).into_response(),
        Ok(Some(_)) => {}
    }
    let limit = params.limit.unwrap_or(50).clamp(1, 100);
    let offset = params.offset.unwrap_or(0).max(0);
    match state.db.list_matches_for_player(id, limit, offset).await {
        Ok(matches) => (StatusCode::OK, Json(json!(matches))).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

// ── Match handlers ────────────────────────────────────────────────────

async fn create_match(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateMatchRequest>,
) -> impl IntoResponse {
    if !auth::has_scope(&auth.0, "matches:write") {
        return json_error(StatusCode::FORBIDDEN, "Insufficient API token scope").into_response();
    }
    if req.opponent_id == auth.0.sub {
        return json_error(StatusCode::BAD_REQUEST, "Cannot create a match against yourself")
            .into_response();
    }
    if let Err(e) = state
        .rate_limiter
        .check_limit(auth.0.sub, RateLimitType::MatchCreates)
    {
        return rate_limited(e);
    }
    match state.db.get_user(req.opponent_id).await {
        Ok(None) => return json_error(StatusCode::NOT_FOUND, "Opponent not found").into_response(),
        Err(e) => return internal_error(e).into_response(),
        Ok(Some(_)) => {}
    }
    match state.db.create_match(auth.0.sub, req.opponent_id).await {
        Ok(m) => {
            metrics::MATCHES_CREATED_TOTAL.inc();
            metrics::PENDING_MATCHES.inc();
            (StatusCode::CREATED, Json(json!(m))).into_response()
        }
        Err(e) => internal_error(e).into_response(),
    }
}

async fn list_matches(
    State(state): State<AppState>,
    Query(params): Query<ListMatchesParams>,
) -> impl IntoResponse {
    let completed = match params.status.as_deref() {
        None => None,
        Some("completed") => Some(true),
        Some("pending") => Some(false),
        Some(_) => {
            return json_error(StatusCode::BAD_REQUEST, "status must be pending or completed")
                .into_response()
        }
    };
    let limit = params.limit.unwrap_or(50).clamp(1, 100);
    let offset = params.offset.unwrap_or(0).max(0);
    match state.db.list_matches(completed, limit, offset).await {
        Ok(matches) => (StatusCode::OK, Json(json!(matches))).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn get_match(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.db.get_match(id).await {
        Ok(Some(m)) => (StatusCode::OK, Json(json!(m))).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "Match not found").into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn report_result(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<ReportResultRequest>,
) -> impl IntoResponse {
    if !auth::has_scope(&auth.0, "matches:write") {
        return json_error(StatusCode::FORBIDDEN, "Insufficient API token scope").into_response();
    }
    if let Err(e) = state
        .rate_limiter
        .check_limit(auth.0.sub, RateLimitType::ResultReports)
    {
        return rate_limited(e);
    }

    // Only a participant may report the result.
    let m = match state.db.get_match(id).await {
        Ok(Some(m)) => m,
        Ok(None) => return json_error(StatusCode::NOT_FOUND, "Match not found").into_response(),
        Err(e) => return internal_error(e).into_response(),
    };
    if auth.0.sub != m.player1_id && auth.0.sub != m.player2_id {
        return json_error(StatusCode::FORBIDDEN, "Only a participant may report the result")
            .into_response();
    }

    match state.db.report_match_result(id, req.winner_id).await {
        Ok(m) => {
            metrics::MATCHES_COMPLETED_TOTAL.inc();
            metrics::RATING_UPDATES_TOTAL.inc();
            metrics::PENDING_MATCHES.dec();
            (StatusCode::OK, Json(json!(m))).into_response()
        }
        Err(e) => db_error(e),
    }
}

async fn cancel_match(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let m = match state.db.get_match(id).await {
        Ok(Some(m)) => m,
        Ok(None) => return json_error(StatusCode::NOT_FOUND, "Match not found").into_response(),
        Err(e) => return internal_error(e).into_response(),
    };
    // player1 is the creator
    if auth.0.sub != m.player1_id {
        return json_error(StatusCode::FORBIDDEN, "Only the match creator may cancel it")
            .into_response();
    }
    match state.db.delete_pending_match(id).await {
        Ok(true) => {
            metrics::PENDING_MATCHES.dec();
            StatusCode::NO_CONTENT.into_response()
        }
        // The match exists, so a failed delete means it was completed.
        Ok(false) => json_error(StatusCode::CONFLICT, "Completed matches cannot be cancelled")
            .into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

// ── Leaderboard ───────────────────────────────────────────────────────

async fn leaderboard(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(50).clamp(1, 100);
    let offset = params.offset.unwrap_or(0).max(0);
    match state.db.leaderboard(limit, offset).await {
        Ok(rows) => {
            let ranked: Vec<_> = rows
                .iter()
                .enumerate()
                .map(|(i, row)| {
                    json!({
                        "rank": offset + i as i64 + 1,
                        "player_id": row.id,
                        "username": row.username,
                        "display_name": row.display_name,
                        "rating": row.rating,
                        "wins": row.wins,
                        "losses": row.losses,
                    })
                })
                .collect();
            (StatusCode::OK, Json(json!(ranked))).into_response()
        }
        Err(e) => internal_error(e).into_response(),
    }
}

// ── API key handlers ──────────────────────────────────────────────────

async fn list_api_keys(State(state): State<AppState>, auth: AuthUser) -> impl IntoResponse {
    match state.db.list_api_tokens(auth.0.sub).await {
        Ok(tokens) => (StatusCode::OK, Json(json!(tokens))).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn create_api_key(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateApiKeyRequest>,
) -> impl IntoResponse {
    if !auth::has_scope(&auth.0, "api_keys:write") {
        return json_error(StatusCode::FORBIDDEN, "Insufficient API token scope").into_response();
    }
    if req.name.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "name is required").into_response();
    }

    let scopes = req
        .scopes
        .unwrap_or_else(|| "players:read,matches:read,leaderboard:read".to_string());

    // An API token may only mint tokens with scopes it holds itself;
    // JWT sessions (no scope list) may mint any scopes.
    if scopes
        .split(',')
        .map(str::trim)
        .any(|s| !auth::has_scope(&auth.0, s))
    {
        return json_error(
            StatusCode::FORBIDDEN,
            "Requested scopes exceed those of the authenticating token",
        )
        .into_response();
    }

    // Generate random token; only its hash is stored.
    let raw_token = format!("ladder_{}", hex::encode(generate_random_bytes()));
    let token_hash = hash_token(&raw_token);

    match state
        .db
        .create_api_token(auth.0.sub, &req.name, &token_hash, &scopes)
        .await
    {
        Ok(record) => (
            StatusCode::CREATED,
            // The raw token is returned exactly once.
            Json(json!({ "token": raw_token, "api_key": record })),
        )
            .into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn delete_api_key(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.db.delete_api_token(id, auth.0.sub).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => json_error(StatusCode::NOT_FOUND, "API key not found").into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

fn hash_token(token: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_random_bytes() -> [u8; 32] {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

// ── Provider bridge handlers ──────────────────────────────────────────

async fn provider_connect(State(state): State<AppState>, auth: AuthUser) -> impl IntoResponse {
    if !auth::has_scope(&auth.0, "provider:write") {
        return json_error(StatusCode::FORBIDDEN, "Insufficient API token scope").into_response();
    }
    let url = state.provider.begin_link(auth.0.sub);
    (StatusCode::OK, Json(json!({ "authorize_url": url }))).into_response()
}

async fn provider_callback(
    State(state): State<AppState>,
    Query(params): Query<ProviderCallbackParams>,
) -> impl IntoResponse {
    match state
        .provider
        .complete_link(&state.db, &params.state, &params.code)
        .await
    {
        Ok(conn) => (
            StatusCode::OK,
            Json(json!({ "linked": true, "user_id": conn.user_id, "provider": conn.provider })),
        )
            .into_response(),
        Err(e) => provider_error(e),
    }
}

async fn provider_status(State(state): State<AppState>, auth: AuthUser) -> impl IntoResponse {
    match state.db.get_oauth_connection(auth.0.sub).await {
        Ok(Some(conn)) => (
            StatusCode::OK,
            Json(json!({
                "linked": true,
                "provider": conn.provider,
                "expires_at": conn.expires_at,
            })),
        )
            .into_response(),
        Ok(None) => (StatusCode::OK, Json(json!({ "linked": false }))).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn provider_disconnect(State(state): State<AppState>, auth: AuthUser) -> impl IntoResponse {
    match state.db.delete_oauth_connection(auth.0.sub).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => json_error(StatusCode::NOT_FOUND, "No tournament provider account linked")
            .into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn provider_list_tournaments(
    State(state): State<AppState>,
    auth: AuthUser,
) -> impl IntoResponse {
    if let Err(e) = state
        .rate_limiter
        .check_limit(auth.0.sub, RateLimitType::ProviderRequests)
    {
        return rate_limited(e);
    }
    let token = match state.provider.fresh_access_token(&state.db, auth.0.sub).await {
        Ok(t) => t,
        Err(e) => return provider_error(e),
    };
    match state.provider.list_tournaments(&token).await {
        Ok(tournaments) => (StatusCode::OK, Json(json!(tournaments))).into_response(),
        Err(e) => provider_error(e),
    }
}

async fn provider_create_tournament(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateTournamentRequest>,
) -> impl IntoResponse {
    if !auth::has_scope(&auth.0, "provider:write") {
        return json_error(StatusCode::FORBIDDEN, "Insufficient API token scope").into_response();
    }
    if req.name.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "name is required").into_response();
    }
    if let Err(e) = state
        .rate_limiter
        .check_limit(auth.0.sub, RateLimitType::ProviderRequests)
    {
        return rate_limited(e);
    }
    let token = match state.provider.fresh_access_token(&state.db, auth.0.sub).await {
        Ok(t) => t,
        Err(e) => return provider_error(e),
    };
    let created = match state.provider.create_tournament(&token, &req.name).await {
        Ok(t) => t,
        Err(e) => return provider_error(e),
    };
    match state
        .db
        .create_tournament(auth.0.sub, &created.id, &created.name, &created.url)
        .await
    {
        Ok(local) => (
            StatusCode::CREATED,
            Json(json!({ "tournament": created, "record": local })),
        )
            .into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn list_local_tournaments(
    State(state): State<AppState>,
    auth: AuthUser,
) -> impl IntoResponse {
    match state.db.list_tournaments(auth.0.sub).await {
        Ok(tournaments) => (StatusCode::OK, Json(json!(tournaments))).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}
