//! Server-side TLS binding
//!
//! Loads the certificate/key pair, binds the listening socket and performs the
//! handshake for each accepted connection.

use log::{debug, info};
use openssl::ssl::{Ssl, SslAcceptor, SslFiletype, SslMethod};
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_openssl::SslStream;

use crate::common::{RelayError, Result};

/// Create a TLS acceptor from PEM certificate chain and private key files
///
/// # Errors
///
/// Returns [`RelayError::Certificate`] if either file cannot be loaded or the
/// key does not match the certificate.
pub fn create_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<SslAcceptor> {
    let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())?;

    acceptor
        .set_certificate_chain_file(cert_path)
        .map_err(|e| {
            RelayError::Certificate(format!(
                "could not load certificate {}: {}",
                cert_path.display(),
                e
            ))
        })?;
    acceptor
        .set_private_key_file(key_path, SslFiletype::PEM)
        .map_err(|e| {
            RelayError::Certificate(format!(
                "could not load private key {}: {}",
                key_path.display(),
                e
            ))
        })?;
    acceptor.check_private_key().map_err(|e| {
        RelayError::Certificate(format!(
            "private key {} does not match certificate {}: {}",
            key_path.display(),
            cert_path.display(),
            e
        ))
    })?;

    Ok(acceptor.build())
}

/// Listening endpoint that terminates TLS
pub struct TlsServerBinding {
    listener: TcpListener,
    acceptor: Arc<SslAcceptor>,
}

impl TlsServerBinding {
    /// Load the key pair and bind `addr`
    ///
    /// # Errors
    ///
    /// Key loading failures and bind failures; both are fatal at startup.
    pub async fn bind(addr: SocketAddr, cert_path: &Path, key_path: &Path) -> Result<Self> {
        let acceptor = create_tls_acceptor(cert_path, key_path)?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayError::Config(format!("could not listen on {}: {}", addr, e)))?;

        info!("TLS listener bound on {}", listener.local_addr().unwrap_or(addr));

        Ok(Self {
            listener,
            acceptor: Arc::new(acceptor),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Split into the listener and the shared acceptor
    pub fn into_parts(self) -> (TcpListener, Arc<SslAcceptor>) {
        (self.listener, self.acceptor)
    }
}

/// Perform the server side of the TLS handshake on `stream`
pub async fn accept_tls(
    acceptor: &SslAcceptor,
    stream: TcpStream,
    handshake_timeout: Duration,
) -> Result<SslStream<TcpStream>> {
    let ssl = Ssl::new(acceptor.context())?;
    let mut stream = SslStream::new(ssl, stream)?;

    match timeout(handshake_timeout, Pin::new(&mut stream).accept()).await {
        Ok(Ok(())) => {
            debug!("TLS handshake successful");
            Ok(stream)
        }
        Ok(Err(e)) => Err(RelayError::TlsHandshake(e.to_string())),
        Err(_) => Err(RelayError::TlsHandshake("handshake timed out".to_string())),
    }
}
