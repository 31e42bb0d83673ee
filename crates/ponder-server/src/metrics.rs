//! Prometheus metrics recorder and HTTP-layer metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup before
/// any metric is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// API error responses (counter, labels: code).
pub const API_ERRORS_TOTAL: &str = "api_errors_total";
/// Event streams opened (counter).
pub const SSE_STREAMS_TOTAL: &str = "sse_streams_total";
/// Open event streams (gauge).
pub const SSE_STREAMS_ACTIVE: &str = "sse_streams_active";
