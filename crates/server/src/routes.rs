//! Route configuration.

use crate::handlers;
use crate::metrics::{metrics_handler, register_metrics};
use crate::ratelimit::ip_rate_limit_middleware;
use crate::state::AppState;
use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::middleware;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let mut api_routes = Router::new()
        .route("/", get(handlers::root))
        .route("/api/v1/health", get(handlers::health_check))
        .route("/api/v1/subareas/{id}", get(handlers::get_subareas));

    // The /metrics endpoint is unauthenticated; restrict it at the network level.
    if state.config.server.metrics_enabled {
        register_metrics();
        api_routes = api_routes.route("/metrics", get(metrics_handler));
    }

    // Order of execution: TraceLayer -> nosniff -> CORS -> IP rate limit -> Handler.
    // Static files skip CORS and rate limiting.
    let api_routes = api_routes
        .layer(middleware::from_fn_with_state(
            state.rate_limit.clone(),
            ip_rate_limit_middleware,
        ))
        .layer(cors_layer(&state.config.server.cors_origin));

    let static_files = ServeDir::new(state.store().root());

    Router::new()
        .merge(api_routes)
        .nest_service(&state.static_root(), static_files)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods([Method::GET, Method::OPTIONS]);
    if origin == "*" {
        return layer.allow_origin(Any);
    }
    match HeaderValue::from_str(origin) {
        Ok(value) => layer.allow_origin(value),
        Err(e) => {
            tracing::warn!(origin, error = %e, "invalid CORS origin, cross-origin requests disabled");
            layer
        }
    }
}
