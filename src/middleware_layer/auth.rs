use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::Response,
};
use tower_cookies::Cookies;

use crate::{
    error::AppError,
    models::user::User,
    services::auth as auth_service,
    state::AppState,
};

/// The caller resolved by `require_auth`, available to handlers as an
/// `Extension`.
#[derive(Clone, Debug)]
pub struct CurrentUser(pub User);

/// Where a credential was found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Carrier {
    Header,
    Cookie,
}

/// Extracts a bearer credential from the `Authorization` header.
///
/// Returns `None` for an absent header and for one that is not of the form
/// `Bearer <token>`.
pub fn bearer_credential(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token.to_string())
    } else {
        None
    }
}

/// Picks the credential to verify: a well-formed bearer header wins, then the
/// session cookie.
pub fn carried_credential(
    headers: &HeaderMap,
    cookies: &Cookies,
    cookie_name: &str,
) -> Option<(Carrier, String)> {
    if let Some(token) = bearer_credential(headers) {
        return Some((Carrier::Header, token));
    }
    if headers.contains_key(header::AUTHORIZATION) {
        tracing::debug!("Ignoring malformed Authorization header");
    }
    cookies
        .get(cookie_name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
        .map(|value| (Carrier::Cookie, value))
}

/// A middleware that requires a verified caller.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `cookies` - The request cookies.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response`, or the uniform unauthenticated error.
pub async fn require_auth(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    tracing::debug!("🔐 Checking authentication...");

    let (carrier, credential) =
        carried_credential(request.headers(), &cookies, &state.config.session_cookie_name)
            .ok_or_else(|| AppError::Unauthenticated("no credential presented".to_string()))?;

    let user = auth_service::resolve_caller(&state, &credential)
        .await
        .map_err(AppError::into_gate_error)?;

    tracing::debug!("✅ User authenticated via {:?}: {}", carrier, user.id);

    request.extensions_mut().insert(CurrentUser(user));

    Ok(next.run(request).await)
}
