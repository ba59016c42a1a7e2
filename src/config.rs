use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use zeroize::Zeroizing;

/// Minimum length of the session signing secret, in bytes.
pub const MIN_SESSION_SECRET_LEN: usize = 32;

/// Longest session lifetime accepted, in days.
pub const MAX_SESSION_DURATION_DAYS: i64 = 3650;

const DEFAULT_FIREBASE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

/// Deployment environment, as named by `APP_ENV`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

/// Which trust root the authentication gate accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMode {
    /// Carried values are identity-provider credentials, verified live.
    ProviderCredential,
    /// Carried values are session tokens minted by this server.
    LocalSession,
}

impl FromStr for AuthMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "provider" => Ok(AuthMode::ProviderCredential),
            "session" => Ok(AuthMode::LocalSession),
            other => bail!("AUTH_MODE must be `provider` or `session`, got `{}`", other),
        }
    }
}

/// What the feedback relay does when the client goes away mid-stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectPolicy {
    /// Keep consuming the upstream and persist the result on completion.
    Drain,
    /// Drop the upstream immediately; nothing is persisted.
    Abort,
}

impl FromStr for DisconnectPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drain" => Ok(DisconnectPolicy::Drain),
            "abort" => Ok(DisconnectPolicy::Abort),
            other => bail!(
                "FEEDBACK_ON_DISCONNECT must be `drain` or `abort`, got `{}`",
                other
            ),
        }
    }
}

/// Where users and diaries live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres { database_url: String, max_connections: usize },
    Memory,
}

/// Firebase ID-token verification settings.
#[derive(Clone, Debug)]
pub struct FirebaseConfig {
    pub project_id: Option<String>,
    pub jwks_url: String,
}

/// Upstream text-generation settings.
#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<Zeroizing<String>>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
}

/// Feedback relay behaviour.
#[derive(Clone, Debug)]
pub struct FeedbackConfig {
    pub idle_timeout: Duration,
    pub on_disconnect: DisconnectPolicy,
    pub serialize_per_diary: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            on_disconnect: DisconnectPolicy::Drain,
            serialize_per_diary: false,
        }
    }
}

/// Presigned image upload settings. Absent when no bucket is configured.
#[derive(Clone, Debug)]
pub struct UploadConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub key_prefix: String,
    pub public_base_url: String,
    pub url_expires: Duration,
}

/// Rate limiting quotas (per peer IP).
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub replenish_ms: u64,
    pub burst: u32,
    pub login_replenish_secs: u64,
    pub login_burst: u32,
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    pub app_env: AppEnv,
    pub bind_addr: SocketAddr,
    pub storage: StorageBackend,
    /// Secret used to sign session tokens.
    pub session_secret: Zeroizing<String>,
    /// The duration of a session in days.
    pub session_duration_days: i64,
    pub session_cookie_name: String,
    pub auth_mode: AuthMode,
    pub cors_origins: Vec<String>,
    pub max_body_bytes: usize,
    pub firebase: FirebaseConfig,
    pub openai: OpenAiConfig,
    pub feedback: FeedbackConfig,
    pub uploads: Option<UploadConfig>,
    pub rate_limit: RateLimitConfig,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Creates a new `Config` from a fixed set of variables.
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    /// Creates a new `Config` from any key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let app_env = match or("APP_ENV", "development").as_str() {
            "production" => AppEnv::Production,
            _ => AppEnv::Development,
        };

        let session_secret = Zeroizing::new(
            var("SESSION_SECRET")
                .context("SESSION_SECRET must be set (generate with: openssl rand -hex 32)")?,
        );
        if session_secret.len() < MIN_SESSION_SECRET_LEN {
            bail!(
                "SESSION_SECRET must be at least {} bytes",
                MIN_SESSION_SECRET_LEN
            );
        }

        let session_duration_days: i64 = or("SESSION_DURATION_DAYS", "7")
            .parse()
            .context("Invalid SESSION_DURATION_DAYS")?;
        if !(1..=MAX_SESSION_DURATION_DAYS).contains(&session_duration_days) {
            bail!(
                "SESSION_DURATION_DAYS must be between 1 and {}",
                MAX_SESSION_DURATION_DAYS
            );
        }

        let idle_timeout_secs: u64 = or("FEEDBACK_IDLE_TIMEOUT_SECS", "30")
            .parse()
            .context("Invalid FEEDBACK_IDLE_TIMEOUT_SECS")?;
        if idle_timeout_secs == 0 {
            bail!("FEEDBACK_IDLE_TIMEOUT_SECS must be at least 1");
        }

        let storage = match or("STORAGE_BACKEND", "postgres").as_str() {
            "postgres" => StorageBackend::Postgres {
                database_url: var("DATABASE_URL").context("DATABASE_URL must be set")?,
                max_connections: or("DATABASE_MAX_CONNECTIONS", "32")
                    .parse()
                    .context("Invalid DATABASE_MAX_CONNECTIONS")?,
            },
            "memory" => StorageBackend::Memory,
            other => bail!("STORAGE_BACKEND must be `postgres` or `memory`, got `{}`", other),
        };

        let uploads = match var("AWS_S3_BUCKET_NAME") {
            Some(bucket) => {
                let region = or("AWS_S3_REGION", "ap-northeast-2");
                let public_base_url = var("CDN_BASE_URL")
                    .unwrap_or_else(|| format!("https://{}.s3.{}.amazonaws.com", bucket, region));
                Some(UploadConfig {
                    endpoint: var("AWS_S3_ENDPOINT"),
                    key_prefix: or("UPLOAD_KEY_PREFIX", "etc/stock-diary/"),
                    public_base_url: public_base_url.trim_end_matches('/').to_string(),
                    url_expires: Duration::from_secs(
                        or("UPLOAD_URL_EXPIRES_SECS", "3600")
                            .parse()
                            .context("Invalid UPLOAD_URL_EXPIRES_SECS")?,
                    ),
                    bucket,
                    region,
                })
            }
            None => None,
        };

        Ok(Self {
            app_env,
            bind_addr: or("BIND_ADDR", "127.0.0.1:3000")
                .parse()
                .context("Invalid BIND_ADDR")?,
            storage,
            session_secret,
            session_duration_days,
            session_cookie_name: or("SESSION_COOKIE_NAME", "stock_diary_session"),
            auth_mode: or("AUTH_MODE", "session").parse()?,
            cors_origins: or("CORS_ORIGINS", "http://localhost:3000")
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            max_body_bytes: or("MAX_BODY_BYTES", "1048576")
                .parse()
                .context("Invalid MAX_BODY_BYTES")?,
            firebase: FirebaseConfig {
                project_id: var("FIREBASE_PROJECT_ID"),
                jwks_url: or("FIREBASE_JWKS_URL", DEFAULT_FIREBASE_JWKS_URL),
            },
            openai: OpenAiConfig {
                api_key: var("OPENAI_API_KEY").map(Zeroizing::new),
                base_url: or("OPENAI_BASE_URL", "https://api.openai.com/v1")
                    .trim_end_matches('/')
                    .to_string(),
                model: or("OPENAI_MODEL", "gpt-4o-mini"),
                temperature: or("OPENAI_TEMPERATURE", "0.7")
                    .parse()
                    .context("Invalid OPENAI_TEMPERATURE")?,
            },
            feedback: FeedbackConfig {
                idle_timeout: Duration::from_secs(idle_timeout_secs),
                on_disconnect: or("FEEDBACK_ON_DISCONNECT", "drain").parse()?,
                serialize_per_diary: or("FEEDBACK_SERIALIZE_PER_DIARY", "false")
                    .parse()
                    .context("Invalid FEEDBACK_SERIALIZE_PER_DIARY")?,
            },
            uploads,
            rate_limit: RateLimitConfig {
                enabled: or("RATE_LIMIT_ENABLED", "true")
                    .parse()
                    .context("Invalid RATE_LIMIT_ENABLED")?,
                replenish_ms: or("RATE_LIMIT_REPLENISH_MS", "100")
                    .parse()
                    .context("Invalid RATE_LIMIT_REPLENISH_MS")?,
                burst: or("RATE_LIMIT_BURST", "100")
                    .parse()
                    .context("Invalid RATE_LIMIT_BURST")?,
                login_replenish_secs: or("LOGIN_RATE_LIMIT_REPLENISH_SECS", "6")
                    .parse()
                    .context("Invalid LOGIN_RATE_LIMIT_REPLENISH_SECS")?,
                login_burst: or("LOGIN_RATE_LIMIT_BURST", "10")
                    .parse()
                    .context("Invalid LOGIN_RATE_LIMIT_BURST")?,
            },
        })
    }

    /// Whether cookies must carry the `Secure` attribute.
    pub fn secure_cookies(&self) -> bool {
        self.app_env == AppEnv::Production
    }

    /// Session lifetime as a `chrono` duration.
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::try_days(self.session_duration_days).unwrap_or(chrono::Duration::MAX)
    }
}
