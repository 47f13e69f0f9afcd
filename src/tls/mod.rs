//! TLS handling module
//!
//! Server binding, client dialing and certificate inspection. Handshakes and
//! ciphers are left to OpenSSL.

mod acceptor;
mod cert;
mod connector;

pub use acceptor::{accept_tls, create_tls_acceptor, TlsServerBinding};
pub use cert::{certificate_info, CertificateInfo};
pub use connector::{TlsDialOptions, TlsDialer};
