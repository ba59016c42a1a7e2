use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Body returned for every authentication failure, whichever carrier failed.
pub const UNAUTHENTICATED_MESSAGE: &str = "Not authenticated";

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection could not be checked out of the pool.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// The pool could not be built.
    #[error("Pool creation error: {0}")]
    PoolCreation(#[from] deadpool_postgres::CreatePoolError),

    /// A column was missing or had an unexpected type.
    #[error("Missing data: {0}")]
    MissingData(String),

    /// No valid credential was presented.
    #[error("Not authenticated: {0}")]
    Unauthenticated(String),

    /// A credential was presented but cannot be used to identify a user.
    #[error("Bad credential: {0}")]
    BadCredential(String),

    /// A resource not found error.
    #[error("Resource not found")]
    NotFound,

    /// A uniqueness rule was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The text-generation upstream could not be used.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A dependency is not configured or not reachable.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl From<garde::Report> for AppError {
    fn from(report: garde::Report) -> Self {
        AppError::Validation(report.to_string())
    }
}

impl AppError {
    /// Collapses credential failures into the uniform gate rejection.
    ///
    /// Storage and availability errors pass through untouched so that an
    /// outage is not reported as a bad login.
    pub fn into_gate_error(self) -> AppError {
        match self {
            AppError::BadCredential(reason) => AppError::Unauthenticated(reason),
            AppError::NotFound => AppError::Unauthenticated("subject no longer exists".to_string()),
            AppError::Conflict(reason) => AppError::Unauthenticated(reason),
            AppError::Validation(reason) => AppError::Unauthenticated(reason),
            other => other,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Pool(ref e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::PoolCreation(ref e) => {
                tracing::error!("Pool creation error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::MissingData(ref column) => {
                tracing::error!("Missing data for column: {}", column);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Unauthenticated(ref reason) => {
                tracing::warn!("Authentication failed: {}", reason);
                let body = error_body(UNAUTHENTICATED_MESSAGE);
                return (
                    StatusCode::UNAUTHORIZED,
                    [
                        (header::CONTENT_TYPE, "application/json"),
                        (header::WWW_AUTHENTICATE, "Bearer"),
                    ],
                    body,
                )
                    .into_response();
            }

            AppError::BadCredential(ref msg) => {
                tracing::warn!("Bad credential: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, "Resource not found".to_string())
            }

            AppError::Conflict(ref msg) => {
                tracing::info!("Conflict: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::UpstreamUnavailable(ref msg) => {
                tracing::error!("Upstream unavailable: {}", msg);
                (StatusCode::BAD_GATEWAY, "Feedback service unavailable".to_string())
            }

            AppError::ServiceUnavailable(ref msg) => {
                tracing::error!("Service unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg.clone())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            error_body(&message),
        )
            .into_response()
    }
}

fn error_body(message: &str) -> String {
    sonic_rs::to_string(&sonic_rs::json!({
        "error": message
    }))
    .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthenticated_hides_reason() {
        let response = AppError::Unauthenticated("token expired".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
    }

    #[test]
    fn conflict_is_bad_request() {
        let response = AppError::Conflict("exists".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn gate_error_collapses_credential_failures() {
        assert!(matches!(
            AppError::BadCredential("no email".into()).into_gate_error(),
            AppError::Unauthenticated(_)
        ));
        assert!(matches!(
            AppError::NotFound.into_gate_error(),
            AppError::Unauthenticated(_)
        ));
        assert!(matches!(
            AppError::Internal("boom".into()).into_gate_error(),
            AppError::Internal(_)
        ));
    }
}
