//! Error handling module
//!
//! This module defines the error types and result type alias used across the relay.

use std::io;
use thiserror::Error;

/// Secure SOCKS relay error type
#[derive(Error, Debug)]
pub enum RelayError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// OpenSSL error
    #[error("OpenSSL error: {0}")]
    Ssl(#[from] openssl::error::ErrorStack),

    /// TLS handshake error
    #[error("TLS handshake error: {0}")]
    TlsHandshake(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Certificate or private key could not be loaded
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Credential file could not be loaded
    #[error("Credential file error: {0}")]
    Credentials(String),

    /// Backend dial failed or timed out
    #[error("Could not reach {addr}: {source}")]
    Dial {
        /// Address that was dialed
        addr: String,
        /// Underlying cause
        #[source]
        source: io::Error,
    },

    /// Proxy negotiation failed
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Presented credentials were rejected
    #[error("Authentication rejected for identity {0:?}")]
    AuthenticationRejected(String),

    /// Accept loop failure
    #[error("Error accepting connection: {0}")]
    Accept(#[source] io::Error),

    /// Metrics exposition error
    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl RelayError {
    /// Build a dial error for `addr`
    pub fn dial(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Dial { addr: addr.into(), source }
    }

    /// Whether this error is a recoverable backend dial failure
    pub fn is_dial(&self) -> bool {
        matches!(self, Self::Dial { .. })
    }
}

/// Result type alias
///
/// This is a `Result` type alias that uses our custom `RelayError`.
pub type Result<T> = std::result::Result<T, RelayError>;
