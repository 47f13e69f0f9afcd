//! Client-side TLS dialer used by the forwarding endpoint

use log::{debug, warn};
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_openssl::SslStream;

use crate::common::{disable_keepalive, host_of, RelayError, Result};

/// Options for [`TlsDialer`]
#[derive(Debug, Clone)]
pub struct TlsDialOptions {
    /// Accept any server certificate
    pub insecure_skip_verify: bool,
    /// Extra CA file used to verify the server
    pub ca_cert: Option<PathBuf>,
    /// Name sent as SNI and checked against the certificate
    pub server_name: Option<String>,
    /// Bound on TCP connect plus TLS handshake
    pub connect_timeout: Duration,
}

/// Dials the authenticating endpoint over TLS
pub struct TlsDialer {
    connector: SslConnector,
    addr: String,
    server_name: String,
    verify: bool,
    connect_timeout: Duration,
}

impl TlsDialer {
    /// Build a dialer for `addr`
    ///
    /// Logs a warning whenever peer verification is disabled.
    pub fn new(addr: impl Into<String>, options: TlsDialOptions) -> Result<Self> {
        let addr = addr.into();
        let mut builder = SslConnector::builder(SslMethod::tls())?;

        if let Some(ca_cert) = &options.ca_cert {
            builder.set_ca_file(ca_cert).map_err(|e| {
                RelayError::Certificate(format!(
                    "could not load CA file {}: {}",
                    ca_cert.display(),
                    e
                ))
            })?;
        }

        if options.insecure_skip_verify {
            warn!("Running without verification of the TLS server {} - this is dangerous", addr);
            builder.set_verify(SslVerifyMode::NONE);
        }

        let server_name = options
            .server_name
            .unwrap_or_else(|| host_of(&addr).to_string());

        Ok(Self {
            connector: builder.build(),
            addr,
            server_name,
            verify: !options.insecure_skip_verify,
            connect_timeout: options.connect_timeout,
        })
    }

    /// Backend address this dialer connects to
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Open a TLS connection to the backend
    ///
    /// # Errors
    ///
    /// Every failure, including timeouts and handshake errors, is a
    /// [`RelayError::Dial`].
    pub async fn dial(&self) -> Result<SslStream<TcpStream>> {
        match timeout(self.connect_timeout, self.connect()).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::dial(
                self.addr.clone(),
                io::Error::new(io::ErrorKind::TimedOut, "dial timed out"),
            )),
        }
    }

    async fn connect(&self) -> Result<SslStream<TcpStream>> {
        let tcp = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| RelayError::dial(self.addr.clone(), e))?;
        disable_keepalive(&tcp).map_err(|e| RelayError::dial(self.addr.clone(), e))?;

        let ssl = self
            .connector
            .configure()?
            .verify_hostname(self.verify)
            .into_ssl(&self.server_name)?;
        let mut stream = SslStream::new(ssl, tcp)?;

        Pin::new(&mut stream).connect().await.map_err(|e| {
            RelayError::dial(
                self.addr.clone(),
                io::Error::new(io::ErrorKind::ConnectionAborted, format!("TLS handshake failed: {}", e)),
            )
        })?;

        debug!("TLS session established with {}", self.addr);
        Ok(stream)
    }
}
