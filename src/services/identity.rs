use async_trait::async_trait;

use crate::{error::Result, models::user::VerifiedIdentity};

/// Verifies a provider-issued credential.
///
/// Implementations fail with `Unauthenticated` for an invalid or expired
/// credential and with `ServiceUnavailable` when the provider cannot be
/// consulted. A missing email is not an error here; callers decide.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<VerifiedIdentity>;
}
