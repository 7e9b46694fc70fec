//! API router.
//!
//! Returns a composable `Router` with the X-ray endpoints nested under
//! `/api/v1` behind bearer authentication, plus an open `/health` probe.
//! The body limit sits above the 10 MiB intake ceiling so oversized
//! uploads surface as a validation error rather than a transport abort.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::config::AppConfig;

/// Request body ceiling (32 MiB). Intake validation enforces the real
/// 10 MiB image limit with a client-readable error.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Build the full API router.
pub fn api_router(ctx: ApiContext) -> Router {
    // Protected routes — bearer auth required.
    //
    // Handlers use `State<ApiContext>`; the auth middleware reads the same
    // context from the Extension layer (outermost so it is visible there).
    let protected = Router::new()
        .route("/xray/diagnose", post(endpoints::xray::diagnose))
        .route("/xray/history/:patient_id", get(endpoints::xray::history))
        .route(
            "/xray/:id",
            get(endpoints::xray::detail).delete(endpoints::xray::remove),
        )
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::auth::require_auth))
        .layer(axum::Extension(ctx.clone()));

    Router::new()
        .nest("/api/v1", protected)
        .route("/health", get(endpoints::health::check))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer(&ctx.config))
        .layer(TraceLayer::new_for_http())
}

/// Exact-origin CORS when configured, permissive otherwise (matching the
/// front-end deployments this API serves).
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origin = config
        .cors_origin
        .as_deref()
        .and_then(|value| value.parse::<HeaderValue>().ok());

    match origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true),
        None => CorsLayer::permissive(),
    }
}
