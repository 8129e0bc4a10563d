//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint. Fails if a
/// recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Upgrades refused because of the connection limit (counter).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";
/// WebSocket connection lifetime seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Outbound frames dropped on a full or closed queue (counter).
pub const WS_SEND_DROPS_TOTAL: &str = "ws_send_drops_total";
/// Inbound frames that failed to decode (counter, labels: reason).
pub const WS_DECODE_ERRORS_TOTAL: &str = "ws_decode_errors_total";
/// Procedure calls total (counter, labels: path).
pub const CALLS_TOTAL: &str = "calls_total";
/// Procedure call errors total (counter, labels: path, code).
pub const CALL_ERRORS_TOTAL: &str = "call_errors_total";
/// Procedure call duration seconds (histogram, labels: path).
pub const CALL_DURATION_SECONDS: &str = "call_duration_seconds";
/// `update` frames queued to watchers (counter).
pub const UPDATES_SENT_TOTAL: &str = "updates_sent_total";
