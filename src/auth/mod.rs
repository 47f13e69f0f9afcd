//! Credential verification
//!
//! The credential store is loaded once at startup; the gate exposes it to the
//! SOCKS5 negotiator.

mod credentials;
mod gate;

pub use credentials::{Credential, CredentialStore};
pub use gate::AuthenticationGate;
