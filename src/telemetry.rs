//! Prometheus export for the relay's counters.
//!
//! The relay records through the `metrics` facade; [`init_metrics`] installs
//! the Prometheus recorder once per process and `/metrics` renders it.

use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use metrics::describe_counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;

/// Alerts handled, labelled by `outcome` (`dispatched`, `deduped`, or the
/// failure kind).
pub const ALERTS_TOTAL: &str = "relay_alerts_total";

/// Dedup operations served by the in-memory store because the remote store
/// failed, labelled by `operation`.
pub const DEDUP_FALLBACK_TOTAL: &str = "relay_dedup_fallback_total";

static PROMETHEUS_HANDLE: Mutex<Option<PrometheusHandle>> = parking_lot::const_mutex(None);

/// Installs the global Prometheus recorder.
///
/// Later calls return the handle from the first one.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let mut slot = PROMETHEUS_HANDLE.lock();
    if let Some(handle) = slot.as_ref() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_counter!(ALERTS_TOTAL, "Alerts handled, by outcome");
    describe_counter!(
        DEDUP_FALLBACK_TOTAL,
        "Dedup operations served in memory because the remote store failed"
    );
    tracing::info!("Prometheus metrics recorder initialized");

    *slot = Some(handle.clone());
    Ok(handle)
}

/// The handle installed by [`init_metrics`], if any.
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.lock().clone()
}

/// `GET /metrics`: Prometheus text format.
pub async fn serve_metrics() -> impl IntoResponse {
    match prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(CONTENT_TYPE, "text/plain; charset=utf-8")],
            "metrics not initialized".to_string(),
        ),
    }
}
