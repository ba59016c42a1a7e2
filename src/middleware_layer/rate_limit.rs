use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};

use crate::{config::RateLimitConfig, state::AppState};

/// Applies the per-IP quota for authenticated routes.
///
/// Keys on the peer address, so the server must be served with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn limit_protected(router: Router<AppState>, settings: &RateLimitConfig) -> Result<Router<AppState>> {
    if !settings.enabled {
        return Ok(router);
    }

    let conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(settings.replenish_ms)
            .burst_size(settings.burst)
            .use_headers()
            .finish()
            .context("Invalid RATE_LIMIT_REPLENISH_MS / RATE_LIMIT_BURST")?,
    );
    tracing::info!(
        "✅ Rate limiting protected routes: burst {} / {}ms",
        settings.burst,
        settings.replenish_ms
    );
    Ok(router.layer(GovernorLayer::new(conf)))
}

/// Applies the stricter per-IP quota for the login route.
pub fn limit_login(router: Router<AppState>, settings: &RateLimitConfig) -> Result<Router<AppState>> {
    if !settings.enabled {
        return Ok(router);
    }

    let conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(settings.login_replenish_secs)
            .burst_size(settings.login_burst)
            .finish()
            .context("Invalid LOGIN_RATE_LIMIT_REPLENISH_SECS / LOGIN_RATE_LIMIT_BURST")?,
    );
    Ok(router.layer(GovernorLayer::new(conf)))
}
