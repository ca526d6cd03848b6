//! HTTP control surface.
//!
//! Thin wiring over the switcher: status, the two switch endpoints, and
//! the lock. There is a single allow-listed caller, authenticated by a
//! static bearer token on every route except the index.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::switcher::{FullStatus, Role, SwitchResult, Switcher};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub switcher: Arc<Switcher>,
    pub api_token: Arc<str>,
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/status", get(get_status))
        .route("/switch_linux", post(switch_linux))
        .route("/switch_windows", post(switch_windows))
        .route("/lock", post(lock))
        .route("/unlock", post(unlock))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    message: &'static str,
}

/// Rejection for a missing or wrong bearer token.
struct Forbidden;

impl IntoResponse for Forbidden {
    fn into_response(self) -> Response {
        (
            StatusCode::FORBIDDEN,
            Json(ErrorBody {
                status: "error",
                message: "Forbidden",
            }),
        )
            .into_response()
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), Forbidden> {
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == &*state.api_token => Ok(()),
        _ => {
            warn!("Rejected API request with missing or invalid token");
            Err(Forbidden)
        }
    }
}

#[derive(Debug, Serialize)]
struct IndexResponse {
    app: &'static str,
    version: &'static str,
}

/// GET / - unauthenticated service banner.
async fn index() -> Json<IndexResponse> {
    Json(IndexResponse {
        app: "vmswitch",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /status
async fn get_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<FullStatus>, Forbidden> {
    authorize(&state, &headers)?;
    Ok(Json(state.switcher.full_status().await))
}

/// POST /switch_linux
async fn switch_linux(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SwitchResult>, Forbidden> {
    authorize(&state, &headers)?;
    // Quiet: the HTTP caller gets the result synchronously, no need for a
    // one-shot chat notification on the already-running skip.
    Ok(Json(state.switcher.switch(Role::Linux, true).await))
}

/// POST /switch_windows
async fn switch_windows(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SwitchResult>, Forbidden> {
    authorize(&state, &headers)?;
    Ok(Json(state.switcher.switch(Role::Windows, true).await))
}

#[derive(Debug, Serialize)]
struct LockResponse {
    locked: bool,
}

/// POST /lock
async fn lock(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<LockResponse>, Forbidden> {
    authorize(&state, &headers)?;
    state.switcher.set_lock(true).await;
    Ok(Json(LockResponse { locked: true }))
}

/// POST /unlock
async fn unlock(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<LockResponse>, Forbidden> {
    authorize(&state, &headers)?;
    state.switcher.set_lock(false).await;
    Ok(Json(LockResponse { locked: false }))
}
