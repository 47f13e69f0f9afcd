//! Prometheus metrics
//!
//! [`MetricsObserver`] records session events with the `metrics` macros and
//! [`serve_metrics`] exposes them over HTTP.

use axum::{extract::State, routing::get, Router};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;

use super::{LogObserver, RelayObserver};
use crate::common::{RelayError, Result};
use crate::relay::{Classification, RelayResult, SessionInfo};

/// Path the exposition endpoint is served on
pub const METRICS_PATH: &str = "/metrics";

/// Install the Prometheus recorder for this process
///
/// Must be called at most once; the binaries do it before building observers.
pub fn install_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| RelayError::Metrics(e.to_string()))
}

/// Serve `GET /metrics` on `listener` until the server fails
pub async fn serve_metrics(listener: TcpListener, handle: PrometheusHandle) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("Metrics endpoint listening on http://{}{}", addr, METRICS_PATH);
    }

    let app = Router::new()
        .route(METRICS_PATH, get(render))
        .with_state(handle);

    axum::serve(listener, app)
        .await
        .map_err(|e| RelayError::Metrics(e.to_string()))
}

async fn render(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

/// Observer that logs like [`LogObserver`] and records metrics
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver {
    log: LogObserver,
}

impl MetricsObserver {
    /// Create a metrics observer
    pub fn new() -> Self {
        Self::default()
    }
}

impl RelayObserver for MetricsObserver {
    fn client_connected(&self, session: &SessionInfo) {
        counter!("relay_sessions_accepted_total").increment(1);
        gauge!("relay_sessions_active").increment(1.0);
        self.log.client_connected(session);
    }

    fn session_rejected(&self, session: &SessionInfo, error: &RelayError) {
        counter!("relay_sessions_rejected_total").increment(1);
        self.log.session_rejected(session, error);
    }

    fn dial_failed(&self, session: &SessionInfo, error: &RelayError) {
        counter!("relay_dial_failures_total").increment(1);
        self.log.dial_failed(session, error);
    }

    fn relay_completed(&self, session: &SessionInfo, result: &RelayResult) {
        let outcome = match result.classification() {
            Classification::Expected => "expected",
            Classification::Unexpected => "unexpected",
        };
        counter!("relay_sessions_completed_total", "outcome" => outcome).increment(1);
        counter!("relay_bytes_total", "direction" => result.forward.direction.label())
            .increment(result.forward.bytes_transferred);
        counter!("relay_bytes_total", "direction" => result.backward.direction.label())
            .increment(result.backward.bytes_transferred);
        histogram!("relay_session_duration_seconds").record(result.duration.as_secs_f64());
        self.log.relay_completed(session, result);
    }

    fn session_fault(&self, session: &SessionInfo, reason: &str) {
        counter!("relay_session_faults_total").increment(1);
        self.log.session_fault(session, reason);
    }

    fn session_closed(&self, session: &SessionInfo) {
        gauge!("relay_sessions_active").decrement(1.0);
        self.log.session_closed(session);
    }
}
