//! SOCKS5 negotiation
//!
//! The authenticating endpoint hands every decrypted client stream to
//! [`Socks5Negotiator`]. Only the subset needed to authenticate a client and
//! open a CONNECT tunnel is supported (RFC 1928 + RFC 1929).

mod negotiator;

pub use negotiator::{Socks5Negotiator, TargetAddr};

/// Capability used during negotiation to accept or reject credentials
///
/// Implementations must be cheap to share and must not keep per-session state.
pub trait Authenticator: Send + Sync + 'static {
    /// Return true if `secret` is valid for `identity`
    fn authenticate(&self, identity: &str, secret: &str) -> bool;
}
