//! # warden_api
//!
//! HTTP boundary for Warden: rate limiting, CSRF, authentication and quota
//! enforcement in front of the handlers.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;
use warden_core::services::Services;

use crate::config::ApiConfig;
use crate::handlers::{analyses, auth, health, usage};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Mode-bound service set.
    pub services: Services,
    /// API configuration.
    pub config: ApiConfig,
}

fn cors_layer(config: &ApiConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(AllowOrigin::list(origins))
    }
}

/// Builds the Axum router with all routes and shared state.
///
/// Layer order, outermost first: CORS, rate limit, CSRF, then bearer
/// authentication on the protected routes.
pub fn router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public = Router::new()
        .route(routes::GET_HEALTH, get(health::health_handler))
        .route(routes::GET_AUTH_CONFIG, get(auth::config_handler))
        .route(routes::GET_AUTH_CSRF, get(auth::csrf_handler))
        .route(routes::POST_AUTH_LOGIN, post(auth::login_handler))
        .route(routes::POST_AUTH_REGISTER, post(auth::register_handler))
        .route(routes::POST_AUTH_REFRESH, post(auth::refresh_handler))
        .route(routes::POST_AUTH_LOGOUT, post(auth::logout_handler));

    // Protected routes (require auth)
    let protected = Router::new()
        .route(routes::GET_SUBSCRIPTION_USAGE, get(usage::usage_handler))
        .route(routes::POST_ANALYSES, post(analyses::create_analysis_handler))
        .route(
            routes::POST_USER_PASSWORD,
            post(auth::change_password_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::csrf::csrf_protect,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::rate_limit,
        ))
        .layer(DefaultBodyLimit::max(state.config.max_request_body_size))
        .layer(cors_layer(&state.config))
        .with_state(state)
}
