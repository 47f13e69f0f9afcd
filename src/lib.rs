//! Secure SOCKS Relay: credential-gated SOCKS5 over TLS
//!
//! Two cooperating endpoints built from the same relay core:
//!
//! - the **server** terminates TLS, requires SOCKS5 username/password
//!   authentication against a bcrypt credential file and connects to the
//!   requested target;
//! - the **forwarder** accepts plain TCP from local applications and carries
//!   it to the server over TLS.
//!
//! # Example
//!
//! ```no_run
//! use secure_socks_relay::auth::{AuthenticationGate, CredentialStore};
//! use secure_socks_relay::config::ServerConfig;
//! use secure_socks_relay::relay::{AuthenticatingEndpoint, ConnectionSupervisor};
//! use secure_socks_relay::socks::Socks5Negotiator;
//! use secure_socks_relay::telemetry::LogObserver;
//! use secure_socks_relay::tls::TlsServerBinding;
//! use secure_socks_relay::Result;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ServerConfig::default();
//!     let store = Arc::new(CredentialStore::load(Path::new("users.htpasswd"))?);
//!     let binding = TlsServerBinding::bind(
//!         config.listen_addr()?,
//!         Path::new("server.crt"),
//!         Path::new("server.key"),
//!     )
//!     .await?;
//!     let (listener, acceptor) = binding.into_parts();
//!
//!     let negotiator = Socks5Negotiator::new(
//!         Arc::new(AuthenticationGate::new(store)),
//!         config.connect_timeout(),
//!     );
//!     let endpoint = AuthenticatingEndpoint::new(acceptor, negotiator, config.connect_timeout());
//!
//!     ConnectionSupervisor::new(
//!         listener,
//!         endpoint,
//!         Arc::new(LogObserver),
//!         config.supervisor_options(),
//!     )
//!     .run()
//!     .await
//! }
//! ```

pub mod auth;
pub mod common;
pub mod config;
pub mod relay;
pub mod socks;
pub mod telemetry;
pub mod tls;

pub use common::{parse_socket_addr, RelayError, Result};
pub use relay::{ConnectionSupervisor, SessionConnector};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
