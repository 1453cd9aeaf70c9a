//! Patrol control API
//!
//! Axum server exposing the patrol lifecycle and the live registry. Each
//! endpoint is a thin handler over an inner function that can be called
//! directly in tests.
//!
//! Endpoints:
//! - GET  /health        : DB status, monitor state, tracked count
//! - GET  /version       : server version info
//! - GET  /sessions      : registry snapshot
//! - POST /pilots        : register external id + callsign
//! - POST /patrols/start : start a patrol
//! - POST /patrols/end   : end a patrol with debrief

use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use patrol_core::config::HttpConfig;
use patrol_core::models::PatrolDebrief;
use patrol_core::registry::SessionRegistry;
use patrol_core::store::PatrolStore;
use patrol_core::PatrolError;
use serde::Deserialize;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::subsystems::monitor::PatrolMonitor;
use crate::subsystems::patrols;

/// Shared state for all HTTP handlers
pub struct HttpState {
    pub pool: PgPool,
    pub store: Arc<dyn PatrolStore>,
    pub monitor: Arc<PatrolMonitor>,
}

pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/sessions", get(sessions_handler))
        .route("/pilots", post(register_handler))
        .route("/patrols/start", post(start_handler))
        .route("/patrols/end", post(end_handler))
        .with_state(state)
}

/// Serve until the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    config: &HttpConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Patrol control API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub user_key: String,
    pub external_id: String,
    #[serde(default)]
    pub callsign: String,
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub user_key: String,
}

#[derive(Debug, Deserialize)]
pub struct EndRequest {
    pub user_key: String,
    #[serde(flatten)]
    pub debrief: PatrolDebrief,
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

pub async fn health_inner(
    pool: &PgPool,
    monitor: &PatrolMonitor,
) -> (StatusCode, serde_json::Value) {
    let monitor_state = monitor.state().await;
    let tracked = monitor.registry().len().await;

    match patrol_core::db::health_check(pool).await {
        Ok(pg_ver) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "postgresql": pg_ver,
                "monitor": monitor_state,
                "tracked_sessions": tracked,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
                "monitor": monitor_state,
                "tracked_sessions": tracked,
            }),
        ),
    }
}

pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "patrol/1",
    })
}

pub async fn sessions_inner(registry: &SessionRegistry) -> (StatusCode, serde_json::Value) {
    let sessions = registry.snapshot().await;
    (
        StatusCode::OK,
        serde_json::json!({
            "count": sessions.len(),
            "sessions": sessions,
        }),
    )
}

pub async fn register_inner(
    store: &dyn PatrolStore,
    req: RegisterRequest,
) -> (StatusCode, serde_json::Value) {
    match patrols::register_pilot(store, &req.user_key, &req.external_id, &req.callsign).await {
        Ok(pilot) => (StatusCode::OK, serde_json::json!({ "pilot": pilot })),
        Err(e) => error_body(&e),
    }
}

pub async fn start_inner(
    store: &dyn PatrolStore,
    registry: &SessionRegistry,
    req: StartRequest,
) -> (StatusCode, serde_json::Value) {
    match patrols::start_patrol(store, registry, &req.user_key).await {
        Ok(session) => (StatusCode::OK, serde_json::json!({ "session": session })),
        Err(e) => error_body(&e),
    }
}

pub async fn end_inner(
    store: &dyn PatrolStore,
    registry: &SessionRegistry,
    req: EndRequest,
) -> (StatusCode, serde_json::Value) {
    match patrols::end_patrol(store, registry, &req.user_key, &req.debrief).await {
        Ok(Some(summary)) => (StatusCode::OK, serde_json::json!({ "summary": summary })),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            serde_json::json!({
                "error": format!("no active patrol for {}", req.user_key),
                "status": "error",
            }),
        ),
        Err(e) => error_body(&e),
    }
}

// ============================================================================
// Axum handler wrappers
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.pool, &state.monitor).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn sessions_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = sessions_inner(state.monitor.registry()).await;
    (status, Json(body))
}

pub async fn register_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    let (status, body) = register_inner(state.store.as_ref(), req).await;
    (status, Json(body))
}

pub async fn start_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<StartRequest>,
) -> impl IntoResponse {
    let (status, body) = start_inner(state.store.as_ref(), state.monitor.registry(), req).await;
    (status, Json(body))
}

pub async fn end_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<EndRequest>,
) -> impl IntoResponse {
    let (status, body) = end_inner(state.store.as_ref(), state.monitor.registry(), req).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

pub fn error_status(error: &PatrolError) -> StatusCode {
    match error {
        PatrolError::DuplicateSession { .. } => StatusCode::CONFLICT,
        PatrolError::NotRegistered { .. } => StatusCode::PRECONDITION_FAILED,
        PatrolError::Invalid(_) => StatusCode::BAD_REQUEST,
        PatrolError::FeedUnavailable(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(error: &PatrolError) -> (StatusCode, serde_json::Value) {
    (
        error_status(error),
        serde_json::json!({
            "error": error.to_string(),
            "status": "error",
        }),
    )
}

// ============================================================================
// Unit Tests
// ============================================================================
