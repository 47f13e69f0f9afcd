//! Session connectors for the two endpoints
//!
//! The authenticating endpoint terminates TLS, runs the SOCKS5 gate and dials
//! the requested target. The forwarding endpoint accepts plain TCP and dials
//! the authenticating endpoint over TLS.

use futures::future::BoxFuture;
use log::debug;
use openssl::ssl::SslAcceptor;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_openssl::SslStream;

use super::outcome::SessionInfo;
use super::supervisor::SessionConnector;
use crate::common::{disable_keepalive, RelayError, Result};
use crate::socks::Socks5Negotiator;
use crate::tls::{accept_tls, TlsDialer};

/// TLS termination followed by credential-gated SOCKS5
pub struct AuthenticatingEndpoint {
    acceptor: Arc<SslAcceptor>,
    negotiator: Socks5Negotiator,
    handshake_timeout: Duration,
}

impl AuthenticatingEndpoint {
    /// Create the endpoint
    ///
    /// `handshake_timeout` bounds everything the client must send before a
    /// backend is dialed: the TLS handshake plus SOCKS5 method selection,
    /// authentication and the CONNECT request. The target dial is bounded by
    /// the negotiator's own connect timeout.
    pub fn new(
        acceptor: Arc<SslAcceptor>,
        negotiator: Socks5Negotiator,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            acceptor,
            negotiator,
            handshake_timeout,
        }
    }
}

impl SessionConnector for AuthenticatingEndpoint {
    type Client = SslStream<TcpStream>;
    type Backend = TcpStream;

    fn establish(
        &self,
        stream: TcpStream,
        session: SessionInfo,
    ) -> BoxFuture<'_, Result<(Self::Client, Self::Backend)>> {
        Box::pin(async move {
            disable_keepalive(&stream)?;

            let greeting = async {
                let mut client =
                    accept_tls(&self.acceptor, stream, self.handshake_timeout).await?;
                debug!("Session {} TLS established", session.id);
                let target = self.negotiator.handshake(&mut client).await?;
                Ok::<_, RelayError>((client, target))
            };
            let (mut client, target) = timeout(self.handshake_timeout, greeting)
                .await
                .map_err(|_| {
                    RelayError::Negotiation(format!(
                        "client did not complete the handshake within {:?}",
                        self.handshake_timeout
                    ))
                })??;

            let backend = self.negotiator.connect(&mut client, &target).await?;
            Ok((client, backend))
        })
    }
}

/// Plain TCP in, TLS to the authenticating endpoint out
pub struct ForwardingEndpoint {
    dialer: TlsDialer,
}

impl ForwardingEndpoint {
    /// Create the endpoint
    pub fn new(dialer: TlsDialer) -> Self {
        Self { dialer }
    }
}

impl SessionConnector for ForwardingEndpoint {
    type Client = TcpStream;
    type Backend = SslStream<TcpStream>;

    fn establish(
        &self,
        stream: TcpStream,
        session: SessionInfo,
    ) -> BoxFuture<'_, Result<(Self::Client, Self::Backend)>> {
        Box::pin(async move {
            disable_keepalive(&stream)?;
            debug!("Session {} dialing {}", session.id, self.dialer.addr());
            let backend = self.dialer.dial().await?;
            Ok((stream, backend))
        })
    }
}
