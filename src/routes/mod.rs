//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the websocket gateway plus the health and diagnostics endpoints
//! under a single Axum router.

pub mod ws;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ws", get(ws::handle_ws))
        .route("/api/diagnostics", get(diagnostics))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Recent session establishment failures plus live channel count.
async fn diagnostics(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "channels": state.hub.channel_count(),
        "failures": state.diagnostics.snapshot(),
    }))
}
