use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::{AppError, Result};

/// Serializes `body` with sonic-rs into an `application/json` response.
pub fn respond<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> Result<Response> {
    let body = sonic_rs::to_string(body)
        .map_err(|e| AppError::Internal(format!("Response serialization failed: {}", e)))?;
    Ok((status, [(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// A `{"message": ...}` body.
pub fn message(status: StatusCode, text: &str) -> Result<Response> {
    respond(status, &sonic_rs::json!({ "message": text }))
}
