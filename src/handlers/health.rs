use axum::{extract::State, http::StatusCode, response::Response};

use crate::{error::Result, handlers::json, state::AppState};

/// Service name and version.
#[axum::debug_handler]
pub async fn root() -> Result<Response> {
    json::respond(
        StatusCode::OK,
        &sonic_rs::json!({
            "message": "Welcome to the Stock Diary API",
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        }),
    )
}

/// Reports whether storage is reachable.
#[axum::debug_handler]
pub async fn health(State(state): State<AppState>) -> Result<Response> {
    match state.diaries.ping().await {
        Ok(()) => json::respond(StatusCode::OK, &sonic_rs::json!({ "status": "healthy" })),
        Err(e) => {
            tracing::error!("❌ Health check failed: {}", e);
            json::respond(
                StatusCode::SERVICE_UNAVAILABLE,
                &sonic_rs::json!({ "status": "unhealthy" }),
            )
        }
    }
}
