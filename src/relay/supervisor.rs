//! Connection supervisor
//!
//! The accept loop shared by both endpoints. Every accepted connection runs in
//! its own task inside a supervisor-owned `JoinSet`, so shutdown can cancel and
//! await all sessions.

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, error, info, warn};
use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinSet};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::outcome::SessionInfo;
use super::session::{ConnectionRelay, Session};
use crate::common::{RelayError, Result};
use crate::telemetry::RelayObserver;

/// Pairs an accepted connection with its backend
///
/// Implementations perform whatever handshake and negotiation the endpoint
/// needs and dial the backend. A [`RelayError::Dial`] is reported as a dial
/// failure; any other error as a rejected session.
pub trait SessionConnector: Send + Sync + 'static {
    /// Client side handed to the relay
    type Client: AsyncRead + AsyncWrite + Unpin + Send + 'static;
    /// Backend side handed to the relay
    type Backend: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Establish the session for an accepted `stream`
    fn establish(
        &self,
        stream: TcpStream,
        session: SessionInfo,
    ) -> BoxFuture<'_, Result<(Self::Client, Self::Backend)>>;
}

/// Per-connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    BackendDialing,
    DialFailed,
    Relaying,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accepted => "accepted",
            Self::BackendDialing => "backend-dialing",
            Self::DialFailed => "dial-failed",
            Self::Relaying => "relaying",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Tuning for the accept loop
#[derive(Debug, Clone, Copy)]
pub struct SupervisorOptions {
    /// Read chunk size for each copy direction
    pub buffer_size: usize,
    /// Maximum number of concurrent sessions
    pub max_sessions: usize,
    /// How long shutdown waits for cancelled sessions before aborting them
    pub shutdown_timeout: Duration,
}

/// Accept loop for one endpoint
pub struct ConnectionSupervisor<C> {
    listener: TcpListener,
    connector: Arc<C>,
    observer: Arc<dyn RelayObserver>,
    relay: ConnectionRelay,
    options: SupervisorOptions,
    shutdown: CancellationToken,
}

impl<C: SessionConnector> ConnectionSupervisor<C> {
    /// Create a supervisor accepting on `listener`
    pub fn new(
        listener: TcpListener,
        connector: C,
        observer: Arc<dyn RelayObserver>,
        options: SupervisorOptions,
    ) -> Self {
        Self {
            listener,
            connector: Arc::new(connector),
            observer,
            relay: ConnectionRelay::new(options.buffer_size),
            options,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the accept loop when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Address the supervisor accepts on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown or an accept failure
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Accept`] when `accept` fails; the binaries treat
    /// this as fatal. All sessions are cancelled before returning either way.
    pub async fn run(self) -> Result<()> {
        let sessions_scope = CancellationToken::new();
        let mut sessions = JoinSet::new();

        if let Ok(addr) = self.listener.local_addr() {
            info!("Supervisor listening on {}", addr);
        }

        let result = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting connections");
                    break Ok(());
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    reap(joined);
                }
                accepted = self.listener.accept(), if sessions.len() < self.options.max_sessions => {
                    match accepted {
                        Ok((stream, remote_addr)) => {
                            let info = SessionInfo::new(remote_addr);
                            sessions.spawn(guarded_session(
                                Arc::clone(&self.connector),
                                Arc::clone(&self.observer),
                                self.relay,
                                stream,
                                info,
                                sessions_scope.child_token(),
                            ));
                        }
                        // Reported once, by whoever handles the returned error
                        Err(e) => break Err(RelayError::Accept(e)),
                    }
                }
            }
        };

        debug!("Supervisor stopped with {} active sessions", sessions.len());
        sessions_scope.cancel();
        drain(&mut sessions, self.options.shutdown_timeout).await;
        result
    }
}

/// Session boundary: a panic anywhere below is contained here
async fn guarded_session<C: SessionConnector>(
    connector: Arc<C>,
    observer: Arc<dyn RelayObserver>,
    relay: ConnectionRelay,
    stream: TcpStream,
    info: SessionInfo,
    scope: CancellationToken,
) {
    let started_at = Instant::now();
    observer.client_connected(&info);

    let session = run_session(&*connector, &*observer, relay, stream, info, started_at, scope);
    if let Err(panic) = AssertUnwindSafe(session).catch_unwind().await {
        observer.session_fault(&info, &panic_message(panic.as_ref()));
    }

    debug!("Session {} {}", info.id, SessionState::Closed);
    observer.session_closed(&info);
}

async fn run_session<C: SessionConnector>(
    connector: &C,
    observer: &dyn RelayObserver,
    relay: ConnectionRelay,
    stream: TcpStream,
    info: SessionInfo,
    started_at: Instant,
    scope: CancellationToken,
) {
    debug!("Session {} {}", info.id, SessionState::Accepted);
    debug!("Session {} {}", info.id, SessionState::BackendDialing);

    let established = tokio::select! {
        _ = scope.cancelled() => {
            debug!("Session {} cancelled before the backend was ready", info.id);
            return;
        }
        established = connector.establish(stream, info) => established,
    };

    let (client, backend) = match established {
        Ok(pair) => pair,
        Err(e) if e.is_dial() => {
            debug!("Session {} {}", info.id, SessionState::DialFailed);
            observer.dial_failed(&info, &e);
            return;
        }
        Err(e) => {
            observer.session_rejected(&info, &e);
            return;
        }
    };

    debug!("Session {} {}", info.id, SessionState::Relaying);
    let result = relay
        .run(Session {
            client,
            backend,
            started_at,
            info,
            scope,
        })
        .await;
    observer.relay_completed(&info, &result);
}

fn reap(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        if !e.is_cancelled() {
            error!("Session task error: {}", e);
        }
    }
}

/// Wait for cancelled sessions to unwind, aborting stragglers
async fn drain(sessions: &mut JoinSet<()>, grace: Duration) {
    if sessions.is_empty() {
        return;
    }

    info!("Waiting for {} sessions to complete...", sessions.len());
    let drained = timeout(grace, async {
        while let Some(joined) = sessions.join_next().await {
            reap(joined);
        }
    })
    .await;

    if drained.is_err() {
        warn!("Shutdown timeout reached, {} sessions still active", sessions.len());
        sessions.abort_all();
        while sessions.join_next().await.is_some() {}
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
