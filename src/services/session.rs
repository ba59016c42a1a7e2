use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::session::{IssuedSession, SessionClaims},
};

/// Why a session token was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session token has expired")]
    Expired,
    #[error("session token is malformed")]
    Malformed,
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        AppError::Unauthenticated(e.to_string())
    }
}

/// Source of "now" for minting and verification.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Mints and verifies stateless HS256 session tokens.
#[derive(Clone)]
pub struct SessionIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionIssuer {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self::with_clock(secret, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(secret: &[u8], ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
            clock,
        }
    }

    /// Mints a token for `user_id` valid for the configured TTL.
    pub fn mint(&self, user_id: Uuid) -> Result<IssuedSession, AppError> {
        let issued_at = self.clock.now();
        let expires_at = issued_at
            .checked_add_signed(self.ttl)
            .ok_or_else(|| AppError::Internal("Session expiry is out of range".to_string()))?;
        let claims = SessionClaims {
            sub: user_id.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };

        let access_token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("Failed to sign session token: {}", e)))?;

        Ok(IssuedSession {
            access_token,
            token_type: "Bearer",
            expires_at: Utc
                .timestamp_opt(claims.exp, 0)
                .single()
                .unwrap_or(expires_at),
        })
    }

    /// Verifies a token and returns the user it names.
    ///
    /// Expiry is checked against the injected clock with no leeway: a token is
    /// `Expired` as soon as `now > exp`.
    pub fn verify(&self, token: &str) -> Result<Uuid, SessionError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<SessionClaims>(token, &self.decoding, &validation)
            .map_err(|_| SessionError::Malformed)?
            .claims;

        if self.clock.now().timestamp() > claims.exp {
            return Err(SessionError::Expired);
        }

        Uuid::parse_str(&claims.sub).map_err(|_| SessionError::Malformed)
    }

    /// Re-mints a token from one that is still valid.
    pub fn refresh(&self, token: &str) -> Result<IssuedSession, AppError> {
        let user_id = self.verify(token)?;
        self.mint(user_id)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    struct FixedClock(Mutex<DateTime<Utc>>);

    impl FixedClock {
        fn at(moment: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(moment)))
        }

        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn verify_returns_minted_subject() {
        let clock = FixedClock::at(start());
        let issuer = SessionIssuer::with_clock(SECRET, Duration::days(7), clock.clone());
        let user_id = Uuid::new_v4();

        let session = issuer.mint(user_id).unwrap();
        assert_eq!(session.token_type, "Bearer");
        assert_eq!(session.expires_at, start() + Duration::days(7));
        assert_eq!(issuer.verify(&session.access_token), Ok(user_id));

        clock.advance(Duration::days(7));
        assert_eq!(issuer.verify(&session.access_token), Ok(user_id));
    }

    #[test]
    fn expired_strictly_after_exp() {
        let clock = FixedClock::at(start());
        let issuer = SessionIssuer::with_clock(SECRET, Duration::days(7), clock.clone());
        let session = issuer.mint(Uuid::new_v4()).unwrap();

        clock.advance(Duration::days(7) + Duration::seconds(1));
        assert_eq!(issuer.verify(&session.access_token), Err(SessionError::Expired));
    }

    #[test]
    fn tampered_or_foreign_tokens_are_malformed() {
        let issuer = SessionIssuer::new(SECRET, Duration::days(7));
        let other = SessionIssuer::new(b"ffffffffffffffffffffffffffffffff", Duration::days(7));
        let token = other.mint(Uuid::new_v4()).unwrap().access_token;

        assert_eq!(issuer.verify(&token), Err(SessionError::Malformed));
        assert_eq!(issuer.verify("not-a-token"), Err(SessionError::Malformed));
        assert_eq!(issuer.verify(""), Err(SessionError::Malformed));
    }

    #[test]
    fn non_uuid_subject_is_malformed() {
        let issuer = SessionIssuer::new(SECRET, Duration::days(7));
        let claims = SessionClaims {
            sub: "firebase-uid".to_string(),
            iat: Utc::now().timestamp(),
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        assert_eq!(issuer.verify(&token), Err(SessionError::Malformed));
    }

    #[test]
    fn refresh_extends_a_live_session() {
        let clock = FixedClock::at(start());
        let issuer = SessionIssuer::with_clock(SECRET, Duration::days(7), clock.clone());
        let user_id = Uuid::new_v4();
        let first = issuer.mint(user_id).unwrap();

        clock.advance(Duration::days(6));
        let refreshed = issuer.refresh(&first.access_token).unwrap();
        assert_eq!(refreshed.expires_at, start() + Duration::days(13));

        clock.advance(Duration::days(2));
        assert_eq!(issuer.verify(&first.access_token), Err(SessionError::Expired));
        assert_eq!(issuer.verify(&refreshed.access_token), Ok(user_id));
        assert!(issuer.refresh(&first.access_token).is_err());
    }

    #[test]
    fn out_of_range_expiry_is_an_error() {
        let issuer = SessionIssuer::with_clock(SECRET, Duration::MAX, FixedClock::at(start()));
        assert!(matches!(issuer.mint(Uuid::new_v4()), Err(AppError::Internal(_))));
    }
}
