//! Authentication gate
//!
//! Adapts [`CredentialStore`] to the [`Authenticator`] capability used by the
//! SOCKS5 negotiator.

use std::sync::Arc;

use super::credentials::CredentialStore;
use crate::socks::Authenticator;

/// Accepts or rejects identity/secret pairs offered during negotiation
///
/// Every call is a fresh check against the store; nothing is cached.
#[derive(Debug, Clone)]
pub struct AuthenticationGate {
    store: Arc<CredentialStore>,
}

impl AuthenticationGate {
    /// Create a gate over a shared credential store
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store }
    }
}

impl Authenticator for AuthenticationGate {
    fn authenticate(&self, identity: &str, secret: &str) -> bool {
        self.store.validate(identity, secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_delegates_to_store() {
        let hash = bcrypt::hash("s3cret", 4).unwrap();
        let store = CredentialStore::parse(&format!("alice:{}", hash)).unwrap();
        let gate = AuthenticationGate::new(Arc::new(store));

        assert!(gate.authenticate("alice", "s3cret"));
        assert!(!gate.authenticate("alice", "wrong"));
        assert!(!gate.authenticate("bob", "s3cret"));
        // Repeated checks give the same answer
        assert!(gate.authenticate("alice", "s3cret"));
    }
}
