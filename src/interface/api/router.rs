//! API Router configuration

use super::metrics_handler::metrics_handler;
use super::push_handler::{health_check, list_push, mute_push, start_push, stop_push, unmute_push, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the API router
pub fn build_router(state: AppState, prometheus_handle: PrometheusHandle) -> Router {
    let health_routes = Router::new().route("/health", get(health_check));

    let push_routes = Router::new()
        .route("/camera/push/start", post(start_push))
        .route("/camera/push/stop", post(stop_push))
        .route("/camera/push/mute", post(mute_push))
        .route("/camera/push/unmute", post(unmute_push))
        .route("/camera/push/list", get(list_push));

    // Metrics route (separate state)
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(prometheus_handle);

    Router::new()
        .merge(health_routes)
        .merge(push_routes)
        .with_state(state)
        .merge(metrics_routes)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
