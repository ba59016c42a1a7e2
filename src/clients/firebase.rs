use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{
    Algorithm, DecodingKey, Validation, decode, decode_header,
    jwk::{Jwk, JwkSet},
};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::{
    error::{AppError, Result},
    models::user::VerifiedIdentity,
    services::identity::IdentityVerifier,
};

/// Google rotates the signing keys roughly daily; an hour keeps us well
/// inside that window.
const KEY_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Minimum gap between two key fetches, whatever the credential asks for.
const REFETCH_FLOOR: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct FirebaseClaims {
    sub: String,
    email: Option<String>,
    name: Option<String>,
}

/// Where the signing keys come from.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch(&self) -> Result<JwkSet>;
}

/// Fetches the published key set over HTTP.
pub struct HttpKeySource {
    http: reqwest::Client,
    jwks_url: String,
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch(&self) -> Result<JwkSet> {
        let keys = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| AppError::ServiceUnavailable(format!("Identity keys unreachable: {}", e)))?
            .json::<JwkSet>()
            .await
            .map_err(|e| AppError::ServiceUnavailable(format!("Identity keys unreadable: {}", e)))?;
        tracing::debug!("🔑 Refreshed {} identity signing keys", keys.keys.len());
        Ok(keys)
    }
}

#[derive(Default)]
struct KeyCache {
    /// The last key set fetched successfully, and when.
    keys: Option<(JwkSet, Instant)>,
    /// The last fetch attempt, successful or not.
    last_fetch: Option<Instant>,
}

impl KeyCache {
    /// Answers from the cache; `None` means a fetch is due.
    fn lookup(&self, kid: &str, ttl: Duration) -> Option<Result<Jwk>> {
        let hit = self
            .keys
            .as_ref()
            .and_then(|(keys, fetched_at)| keys.find(kid).map(|jwk| (jwk.clone(), *fetched_at)));

        if let Some((jwk, fetched_at)) = &hit {
            if fetched_at.elapsed() < ttl {
                return Some(Ok(jwk.clone()));
            }
        }

        if self.last_fetch.is_some_and(|at| at.elapsed() < REFETCH_FLOOR) {
            return Some(match (hit, &self.keys) {
                (Some((jwk, _)), _) => Ok(jwk),
                (None, Some(_)) => Err(unknown_key()),
                (None, None) => Err(AppError::ServiceUnavailable(
                    "Identity keys are not available yet".to_string(),
                )),
            });
        }

        None
    }
}

fn unknown_key() -> AppError {
    AppError::Unauthenticated("unknown signing key".to_string())
}

/// Verifies Firebase ID tokens against Google's published signing keys.
pub struct FirebaseVerifier {
    source: Box<dyn KeySource>,
    project_id: String,
    key_ttl: Duration,
    cache: RwLock<KeyCache>,
}

impl FirebaseVerifier {
    pub fn new(http: reqwest::Client, project_id: String, jwks_url: String) -> Self {
        Self::with_key_source(project_id, Box::new(HttpKeySource { http, jwks_url }))
    }

    pub fn with_key_source(project_id: String, source: Box<dyn KeySource>) -> Self {
        Self {
            source,
            project_id,
            key_ttl: KEY_CACHE_TTL,
            cache: RwLock::new(KeyCache::default()),
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.project_id.as_str()]);
        validation.set_issuer(&[format!("https://securetoken.google.com/{}", self.project_id)]);
        validation
    }

    /// Finds the key for `kid`, refetching at most once per `REFETCH_FLOOR`.
    ///
    /// A failed refetch falls back to the last good key set.
    async fn key_for(&self, kid: &str) -> Result<Jwk> {
        if let Some(found) = self.cache.read().await.lookup(kid, self.key_ttl) {
            return found;
        }

        let mut cache = self.cache.write().await;
        if let Some(found) = cache.lookup(kid, self.key_ttl) {
            return found;
        }

        cache.last_fetch = Some(Instant::now());
        match self.source.fetch().await {
            Ok(keys) => {
                let jwk = keys.find(kid).cloned();
                cache.keys = Some((keys, Instant::now()));
                jwk.ok_or_else(unknown_key)
            }
            Err(e) => match &cache.keys {
                Some((keys, _)) => {
                    tracing::warn!("⚠️ Identity key refresh failed, using cached keys: {}", e);
                    keys.find(kid).cloned().ok_or_else(unknown_key)
                }
                None => Err(e),
            },
        }
    }
}

#[async_trait]
impl IdentityVerifier for FirebaseVerifier {
    async fn verify(&self, credential: &str) -> Result<VerifiedIdentity> {
        let header = decode_header(credential)
            .map_err(|_| AppError::Unauthenticated("malformed provider credential".to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| AppError::Unauthenticated("credential has no key id".to_string()))?;

        let jwk = self.key_for(&kid).await?;
        let key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| AppError::Internal(format!("Unusable identity key: {}", e)))?;

        let claims = decode::<FirebaseClaims>(credential, &key, &self.validation())
            .map_err(|e| AppError::Unauthenticated(format!("provider credential rejected: {}", e)))?
            .claims;

        if claims.sub.is_empty() {
            return Err(AppError::Unauthenticated("credential has no subject".to_string()));
        }

        Ok(VerifiedIdentity {
            subject_id: claims.sub,
            email: claims.email,
            display_name: claims.name,
        })
    }
}
