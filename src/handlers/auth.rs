use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Response,
};
use serde::Deserialize;
use tower_cookies::cookie::{SameSite, time::Duration};
use tower_cookies::{Cookie, Cookies};

use crate::{
    error::{AppError, Result},
    handlers::json,
    middleware_layer::auth::{CurrentUser, carried_credential},
    models::{session::IssuedSession, user::User},
    services::auth as auth_service,
    state::AppState,
};

/// The request payload for login.
#[derive(Deserialize)]
pub struct LoginRequest {
    /// The provider-issued ID token.
    #[serde(alias = "firebase_token")]
    pub credential: String,
}

/// Creates the session cookie.
fn create_session_cookie(name: String, value: String, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, value);
    cookie.set_http_only(true);
    if secure {
        cookie.set_secure(true);
    }
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(Duration::seconds(max_age_secs));
    cookie.set_path("/");
    cookie
}

fn set_session_cookie(state: &AppState, cookies: &Cookies, session: &IssuedSession) {
    let cookie = create_session_cookie(
        state.config.session_cookie_name.clone(),
        session.access_token.clone(),
        state.sessions.ttl().num_seconds(),
        state.config.secure_cookies(),
    );
    cookies.add(cookie);
    tracing::debug!("🍪 Session cookie set");
}

fn session_body(message: &str, user: &User, session: Option<&IssuedSession>) -> sonic_rs::Value {
    match session {
        Some(session) => sonic_rs::json!({
            "message": message,
            "user": user,
            "access_token": session.access_token,
            "token_type": session.token_type,
            "expires_at": session.expires_at.to_rfc3339(),
        }),
        None => sonic_rs::json!({
            "message": message,
            "user": user,
        }),
    }
}

/// Handles login with a provider credential.
///
/// In session mode this also sets the session cookie and returns the token
/// in the body for clients that prefer the header.
#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(payload): Json<LoginRequest>,
) -> Result<Response> {
    tracing::info!("🔐 Login attempt");

    let outcome = auth_service::login(&state, payload.credential.trim()).await?;

    if let Some(session) = &outcome.session {
        set_session_cookie(&state, &cookies, session);
    }

    json::respond(
        StatusCode::OK,
        &session_body("Login successful", &outcome.user, outcome.session.as_ref()),
    )
}

/// Re-mints a session from a still-valid one.
#[axum::debug_handler]
pub async fn refresh(
    State(state): State<AppState>,
    cookies: Cookies,
    headers: HeaderMap,
) -> Result<Response> {
    let (_, token) = carried_credential(&headers, &cookies, &state.config.session_cookie_name)
        .ok_or_else(|| AppError::Unauthenticated("no session to refresh".to_string()))?;

    let session = auth_service::refresh(&state, &token)
        .await
        .map_err(AppError::into_gate_error)?;
    set_session_cookie(&state, &cookies, &session);

    json::respond(StatusCode::OK, &session)
}

/// Handles logout by clearing the session cookie.
///
/// Session tokens are stateless, so a copy held elsewhere stays valid until
/// it expires.
#[axum::debug_handler]
pub async fn logout(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    cookies: Cookies,
) -> Result<Response> {
    tracing::info!("👋 Logout for user: {}", user.id);

    let mut session_cookie = Cookie::new(state.config.session_cookie_name.clone(), "");
    session_cookie.set_max_age(Duration::seconds(0));
    session_cookie.set_path("/");
    cookies.remove(session_cookie);

    json::message(StatusCode::OK, "Logout successful")
}

/// Returns the authenticated user.
#[axum::debug_handler]
pub async fn me(Extension(CurrentUser(user)): Extension<CurrentUser>) -> Result<Response> {
    json::respond(StatusCode::OK, &user)
}
