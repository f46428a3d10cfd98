//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::GameState;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/match", get(match_state_handler))
        .route("/match/start", post(match_start_handler))
        .route("/match/end", post(match_end_handler))
        .fallback(not_found_handler)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_players: usize,
    max_players: usize,
    sessions: usize,
    is_game_active: bool,
    game_time: f64,
    snapshots_sent: u64,
    snapshot_bytes: u64,
    avg_players_per_snapshot: f32,
    dropped_frames: u64,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.sessions.stats();

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_players: state.store.player_count(),
        max_players: state.store.capacity(),
        sessions: state.sessions.len(),
        is_game_active: state.store.is_active(),
        game_time: state.store.game_time(),
        snapshots_sent: stats.total_snapshots,
        snapshot_bytes: stats.total_bytes,
        avg_players_per_snapshot: stats.avg_players_per_snapshot,
        dropped_frames: stats.dropped_frames,
    })
}

// ============================================================================
// Match control endpoints
// ============================================================================

async fn match_state_handler(State(state): State<AppState>) -> Json<GameState> {
    Json(state.store.snapshot())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchControlResponse {
    match_id: Uuid,
    is_game_active: bool,
    game_time: f64,
}

async fn match_start_handler(State(state): State<AppState>) -> Json<MatchControlResponse> {
    let match_id = state.store.start();
    info!(match_id = %match_id, "Match started via HTTP");

    Json(MatchControlResponse {
        match_id,
        is_game_active: true,
        game_time: 0.0,
    })
}

async fn match_end_handler(State(state): State<AppState>) -> Result<Json<MatchControlResponse>, AppError> {
    if !state.store.is_active() {
        return Err(AppError::Conflict("Match is not active".to_string()));
    }

    state.store.end();
    info!(match_id = %state.store.match_id(), "Match ended via HTTP");

    Ok(Json(MatchControlResponse {
        match_id: state.store.match_id(),
        is_game_active: false,
        game_time: state.store.game_time(),
    }))
}

async fn not_found_handler() -> AppError {
    AppError::NotFound("No such route".to_string())
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn app() -> (AppState, Router) {
        let state = AppState::new(Config::default());
        let router = build_router(state.clone());
        (state, router)
    }

    async fn call(router: Router, method: Method, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_reports_match_and_players() {
        let (state, router) = app();
        state.store.add_player(Uuid::new_v4()).unwrap();

        let (status, body) = call(router, Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_players"], 1);
        assert_eq!(body["max_players"], 16);
        assert_eq!(body["is_game_active"], false);
    }

    #[tokio::test]
    async fn test_start_then_end_match() {
        let (state, router) = app();

        let (status, body) = call(router.clone(), Method::POST, "/match/start").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isGameActive"], true);
        assert_eq!(body["matchId"], state.store.match_id().to_string());
        assert!(state.store.is_active());

        let (status, body) = call(router.clone(), Method::POST, "/match/end").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isGameActive"], false);
        assert!(!state.store.is_active());

        let (status, body) = call(router, Method::POST, "/match/end").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("not active"));
    }

    #[tokio::test]
    async fn test_match_route_returns_snapshot() {
        let (state, router) = app();
        let id = Uuid::new_v4();
        state.store.add_player(id).unwrap();

        let (status, body) = call(router, Method::GET, "/match").await;
        assert_eq!(status, StatusCode::OK);
        let player = &body["players"][id.to_string()];
        assert_eq!(player["health"], 100.0);
        assert_eq!(player["weapon"], "pistol");
        assert!(body["gameTime"].is_number());
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        let (_state, router) = app();
        let (status, body) = call(router, Method::GET, "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }
}
