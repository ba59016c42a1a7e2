use garde::Validate;
use uuid::Uuid;

use crate::{
    config::AuthMode,
    error::{AppError, Result},
    models::{
        session::IssuedSession,
        user::{NewUser, User},
    },
    state::AppState,
    validation::auth::validate_credential,
};

/// The result of a successful login.
pub struct LoginOutcome {
    pub user: User,
    /// Present only when local sessions are the trust root.
    pub session: Option<IssuedSession>,
}

/// Verifies a provider credential and returns the matching user, creating it
/// on first sight.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `credential` - The provider-issued credential.
///
/// # Returns
///
/// A `Result` containing the `User`. A provider payload without an email is
/// a `BadCredential`.
pub async fn verify_provider_credential(state: &AppState, credential: &str) -> Result<User> {
    let identity = state.identity.verify(credential).await?;

    let email = identity
        .email
        .map(|email| email.trim().to_string())
        .filter(|email| !email.is_empty())
        .ok_or_else(|| {
            AppError::BadCredential("Identity provider did not supply an email".to_string())
        })?;

    let new_user = NewUser {
        external_subject_id: identity.subject_id,
        email,
        display_name: identity
            .display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty()),
    };
    new_user
        .validate()
        .map_err(|e| AppError::BadCredential(format!("Identity payload rejected: {}", e)))?;

    state.users.get_or_create(new_user).await
}

/// Verifies a locally minted session token and loads its user.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `token` - The session token.
///
/// # Returns
///
/// A `Result` containing the `User`, or `Unauthenticated` if the token is
/// expired, malformed or names a user that no longer exists.
pub async fn verify_local_session(state: &AppState, token: &str) -> Result<User> {
    let user_id: Uuid = state.sessions.verify(token)?;
    state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::Unauthenticated("session subject no longer exists".to_string()))
}

/// Resolves the caller of a protected operation through the configured trust
/// root. The two verifiers are never tried in turn.
pub async fn resolve_caller(state: &AppState, credential: &str) -> Result<User> {
    validate_credential(credential)?;
    match state.config.auth_mode {
        AuthMode::ProviderCredential => verify_provider_credential(state, credential).await,
        AuthMode::LocalSession => verify_local_session(state, credential).await,
    }
}

/// Logs a user in with a provider credential.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `credential` - The provider-issued credential.
///
/// # Returns
///
/// A `Result` containing the `LoginOutcome`.
pub async fn login(state: &AppState, credential: &str) -> Result<LoginOutcome> {
    validate_credential(credential)?;
    let user = verify_provider_credential(state, credential).await?;

    let session = match state.config.auth_mode {
        AuthMode::LocalSession => Some(state.sessions.mint(user.id)?),
        AuthMode::ProviderCredential => None,
    };

    tracing::info!("✅ User logged in: {}", user.id);
    Ok(LoginOutcome { user, session })
}

/// Re-mints a session from one that is still valid.
pub async fn refresh(state: &AppState, token: &str) -> Result<IssuedSession> {
    let user = verify_local_session(state, token).await?;
    state.sessions.mint(user.id)
}
