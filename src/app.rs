use std::time::Duration;

use anyhow::{Context, Result, ensure};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use http::{HeaderValue, Method, header};
use tower_cookies::CookieManagerLayer;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::{
    config::{AuthMode, Config},
    handlers, middleware_layer,
    state::AppState,
};

fn cors_layer(config: &Config) -> Result<CorsLayer> {
    ensure!(
        !config.cors_origins.iter().any(|origin| origin == "*"),
        "CORS_ORIGINS cannot contain '*' because credentials are allowed"
    );
    let origins = config
        .cors_origins
        .iter()
        .map(|origin| {
            origin
                .parse::<HeaderValue>()
                .with_context(|| format!("Invalid CORS origin: {}", origin))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            header::COOKIE,
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(86400)))
}

/// Builds the application router.
///
/// # Arguments
///
/// * `state` - The application state.
///
/// # Returns
///
/// A `Result` containing the `Router`, or an error if the CORS or rate limit
/// settings are unusable.
pub fn router(state: AppState) -> Result<Router> {
    let config = state.config.clone();

    let mut login_routes = Router::new().route("/auth/login", post(handlers::auth::login));
    if config.auth_mode == AuthMode::LocalSession {
        login_routes = login_routes.route("/auth/refresh", post(handlers::auth::refresh));
    }
    let login_routes = middleware_layer::rate_limit::limit_login(login_routes, &config.rate_limit)?;

    let protected_routes = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/me", get(handlers::auth::me))
        .route("/users/me", get(handlers::auth::me))
        .route(
            "/diaries",
            get(handlers::diaries::list_diaries).post(handlers::diaries::create_diary),
        )
        .route("/diaries/range", get(handlers::diaries::diaries_in_range))
        .route("/diaries/date/{date}", get(handlers::diaries::diary_by_date))
        .route(
            "/diaries/images/presigned-url",
            post(handlers::uploads::presigned_url),
        )
        .route(
            "/diaries/images/upload-complete",
            post(handlers::uploads::upload_complete),
        )
        .route(
            "/diaries/{diary_id}",
            get(handlers::diaries::get_diary)
                .put(handlers::diaries::update_diary)
                .delete(handlers::diaries::delete_diary),
        )
        .route(
            "/diaries/{diary_id}/ai-feedback",
            get(handlers::feedback::stream_feedback),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_auth,
        ));
    let protected_routes =
        middleware_layer::rate_limit::limit_protected(protected_routes, &config.rate_limit)?;

    let api = Router::new().merge(login_routes).merge(protected_routes);

    let app = Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health))
        .nest("/api/v1", api)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false))
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(CookieManagerLayer::new())
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(cors_layer(&config)?)
        .with_state(state);

    Ok(app)
}
