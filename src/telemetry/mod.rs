//! Session observability
//!
//! Every component that reports lifecycle events receives an
//! `Arc<dyn RelayObserver>` at construction time. [`LogObserver`] writes log
//! records; [`MetricsObserver`] additionally feeds the Prometheus exporter.

mod prometheus;

pub use self::prometheus::{install_recorder, serve_metrics, MetricsObserver, METRICS_PATH};

use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::common::{RelayError, Result};
use crate::relay::{Classification, RelayResult, SessionInfo};

/// Build the observer for a binary
///
/// With a metrics address the Prometheus recorder is installed and the
/// exposition endpoint is spawned; otherwise sessions are only logged.
///
/// # Errors
///
/// Failing to bind the metrics listener is fatal, as is a second recorder
/// installation.
pub async fn start_observer(metrics_addr: Option<SocketAddr>) -> Result<Arc<dyn RelayObserver>> {
    let Some(addr) = metrics_addr else {
        return Ok(Arc::new(LogObserver));
    };

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        RelayError::Metrics(format!("could not listen on {}: {}", addr, e))
    })?;
    let handle = install_recorder()?;

    tokio::spawn(async move {
        if let Err(e) = serve_metrics(listener, handle).await {
            error!("Metrics endpoint stopped: {}", e);
        }
    });

    Ok(Arc::new(MetricsObserver::new()))
}

/// Receives session lifecycle events
///
/// Shared by every session, so implementations must tolerate concurrent calls.
pub trait RelayObserver: Send + Sync {
    /// A client connection was accepted
    fn client_connected(&self, session: &SessionInfo);

    /// Handshake or negotiation failed before a backend was dialed
    fn session_rejected(&self, session: &SessionInfo, error: &RelayError);

    /// The backend could not be reached
    fn dial_failed(&self, session: &SessionInfo, error: &RelayError);

    /// Both relay directions finished
    fn relay_completed(&self, session: &SessionInfo, result: &RelayResult);

    /// A fault escaped the session's control flow and was contained
    fn session_fault(&self, session: &SessionInfo, reason: &str);

    /// The session released its resources
    fn session_closed(&self, _session: &SessionInfo) {}
}

/// Observer that only writes log records
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl RelayObserver for LogObserver {
    fn client_connected(&self, session: &SessionInfo) {
        info!("Client connected id={} from={}", session.id, session.remote_addr);
    }

    fn session_rejected(&self, session: &SessionInfo, error: &RelayError) {
        warn!(
            "Session rejected id={} from={}: {}",
            session.id, session.remote_addr, error
        );
    }

    fn dial_failed(&self, session: &SessionInfo, error: &RelayError) {
        warn!(
            "Could not reach backend id={} from={}: {}",
            session.id, session.remote_addr, error
        );
    }

    fn relay_completed(&self, session: &SessionInfo, result: &RelayResult) {
        let cause = result.decisive();
        match result.classification() {
            Classification::Expected => warn!(
                "Session ended id={} direction={} cause={}",
                session.id, cause.direction, cause.cause
            ),
            Classification::Unexpected => error!(
                "Unexpected error while copying data id={} direction={} cause={}",
                session.id, cause.direction, cause.cause
            ),
        }
        info!(
            "Request served id={} duration={:?} sent={} received={}",
            session.id,
            result.duration,
            result.forward.bytes_transferred,
            result.backward.bytes_transferred
        );
    }

    fn session_fault(&self, session: &SessionInfo, reason: &str) {
        error!(
            "Panic occurred in session id={} from={}: {}",
            session.id, session.remote_addr, reason
        );
    }
}
