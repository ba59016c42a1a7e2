use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::Response,
};
use serde::Deserialize;

use crate::{
    error::{AppError, Result},
    handlers::json,
    middleware_layer::auth::CurrentUser,
    services::uploads::UploadService,
    state::AppState,
};

/// The query parameters for requesting a presigned upload.
#[derive(Deserialize)]
pub struct PresignQuery {
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// The request payload sent once the client finished its upload.
#[derive(Deserialize)]
pub struct UploadCompleteRequest {
    /// The object key returned by the presign call.
    pub filename: String,
}

fn uploads(state: &AppState) -> Result<&UploadService> {
    state
        .uploads
        .as_ref()
        .ok_or_else(|| AppError::ServiceUnavailable("Image uploads are not configured".to_string()))
}

/// Issues a presigned `PUT` URL for a diary image.
#[axum::debug_handler]
pub async fn presigned_url(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(params): Query<PresignQuery>,
) -> Result<Response> {
    let upload = uploads(&state)?
        .presign(&params.filename, params.content_type.as_deref())
        .await?;
    tracing::debug!("🖼️ Upload key {} issued to {}", upload.filename, user.id);
    json::respond(StatusCode::OK, &upload)
}

/// Resolves the public URL of a finished upload.
#[axum::debug_handler]
pub async fn upload_complete(
    State(state): State<AppState>,
    Extension(CurrentUser(_user)): Extension<CurrentUser>,
    Json(req): Json<UploadCompleteRequest>,
) -> Result<Response> {
    let file_url = uploads(&state)?.public_url(&req.filename)?;
    json::respond(
        StatusCode::OK,
        &sonic_rs::json!({
            "message": "Upload completed",
            "file_url": file_url,
        }),
    )
}
