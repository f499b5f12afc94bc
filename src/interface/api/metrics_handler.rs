//! Prometheus metrics handler

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and describe the bridge metrics
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!(
        "bridge_sessions_started_total",
        "Total number of sessions that reached live"
    );
    describe_counter!(
        "bridge_sessions_failed_total",
        "Total number of failed session starts, by step"
    );
    describe_counter!(
        "bridge_sessions_closed_total",
        "Total number of closed sessions, by reason"
    );
    describe_gauge!("bridge_live_sessions", "Number of currently live sessions");

    Ok(handle)
}

/// HTTP metrics handler
pub async fn metrics_handler(State(prometheus_handle): State<PrometheusHandle>) -> Response {
    let metrics = prometheus_handle.render();
    (StatusCode::OK, metrics).into_response()
}
