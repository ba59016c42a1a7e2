#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use futures::StreamExt;
use http_body_util::BodyExt;
use stock_diary::{
    app,
    config::Config,
    error::{AppError, Result},
    models::user::VerifiedIdentity,
    repositories::memory::MemoryStore,
    services::{
        generation::{DeltaStream, FeedbackGenerator, FeedbackPrompt, UpstreamError},
        identity::IdentityVerifier,
    },
    state::{AppState, Components},
};
use tower::ServiceExt;

/// Accepts `token-<subject>` and vouches for `<subject>@example.com`.
/// `noemail-<subject>` yields an identity without an email.
pub struct FakeIdentity;

#[async_trait]
impl IdentityVerifier for FakeIdentity {
    async fn verify(&self, credential: &str) -> Result<VerifiedIdentity> {
        if let Some(subject) = credential.strip_prefix("token-") {
            return Ok(VerifiedIdentity {
                subject_id: subject.to_string(),
                email: Some(format!("{}@example.com", subject.to_lowercase())),
                display_name: Some(format!("Investor {}", subject)),
            });
        }
        if let Some(subject) = credential.strip_prefix("noemail-") {
            return Ok(VerifiedIdentity {
                subject_id: subject.to_string(),
                email: None,
                display_name: None,
            });
        }
        Err(AppError::Unauthenticated("unknown test credential".to_string()))
    }
}

/// Replays a fixed list of deltas, or fails to open when `units` is `None`.
pub struct FakeGenerator {
    pub units: Option<Vec<&'static str>>,
}

#[async_trait]
impl FeedbackGenerator for FakeGenerator {
    async fn open(&self, _prompt: &FeedbackPrompt) -> std::result::Result<DeltaStream, UpstreamError> {
        match &self.units {
            Some(units) => {
                let units: Vec<_> = units
                    .iter()
                    .map(|unit| Ok::<_, UpstreamError>(unit.to_string()))
                    .collect();
                Ok(futures::stream::iter(units).boxed())
            }
            None => Err(UpstreamError::Unavailable("connection refused".to_string())),
        }
    }
}

pub fn test_config(auth_mode: &str) -> Config {
    let vars: HashMap<String, String> = [
        ("STORAGE_BACKEND", "memory"),
        ("SESSION_SECRET", "test-secret-that-is-at-least-32-bytes-long"),
        ("AUTH_MODE", auth_mode),
        ("RATE_LIMIT_ENABLED", "false"),
        ("FEEDBACK_IDLE_TIMEOUT_SECS", "5"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    Config::from_map(&vars).unwrap()
}

// Shared test context
pub struct TestContext {
    pub router: Router,
    pub store: Arc<MemoryStore>,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: String,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }

    /// The `name=value` pair of the first `Set-Cookie` header.
    pub fn session_cookie(&self) -> Option<String> {
        self.headers
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::to_string)
    }
}

impl TestContext {
    pub fn new(auth_mode: &str) -> Self {
        Self::with_generator(auth_mode, FakeGenerator { units: Some(vec!["Good ", "job!"]) })
    }

    pub fn with_generator(auth_mode: &str, generator: FakeGenerator) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::from_components(
            test_config(auth_mode),
            Components {
                users: store.clone(),
                diaries: store.clone(),
                identity: Arc::new(FakeIdentity),
                generator: Arc::new(generator),
                upload_signer: None,
            },
        );
        Self {
            router: app::router(state).unwrap(),
            store,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        TestResponse {
            status,
            headers,
            body: String::from_utf8(bytes.to_vec()).unwrap(),
        }
    }

    pub async fn login(&self, credential: &str) -> TestResponse {
        self.send(
            Request::post("/api/v1/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(format!(r#"{{"credential":"{}"}}"#, credential)))
                .unwrap(),
        )
        .await
    }

    /// Logs in and returns the bearer value for later requests.
    pub async fn bearer(&self, credential: &str) -> String {
        let response = self.login(credential).await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.body);
        match response.json()["access_token"].as_str() {
            Some(token) => format!("Bearer {}", token),
            None => format!("Bearer {}", credential),
        }
    }

    pub async fn get(&self, path: &str, auth: &str) -> TestResponse {
        self.send(
            Request::get(path)
                .header(header::AUTHORIZATION, auth)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn send_json(&self, method: &str, path: &str, auth: &str, body: serde_json::Value) -> TestResponse {
        self.send(
            Request::builder()
                .method(method)
                .uri(path)
                .header(header::AUTHORIZATION, auth)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn delete(&self, path: &str, auth: &str) -> TestResponse {
        self.send(
            Request::delete(path)
                .header(header::AUTHORIZATION, auth)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}
