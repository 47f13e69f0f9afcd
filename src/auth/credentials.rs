//! Credential store
//!
//! Immutable mapping of identity to bcrypt password hash, loaded once from an
//! htpasswd-style file.

use log::{debug, warn};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::common::{RelayError, Result};

/// Hash prefixes understood by [`CredentialStore::validate`]
const BCRYPT_PREFIXES: [&str; 4] = ["$2a$", "$2b$", "$2x$", "$2y$"];

/// One identity-to-hash record
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Identity presented during negotiation
    pub identity: String,
    /// Salted password hash
    pub secret_hash: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("identity", &self.identity)
            .field("secret_hash", &"<redacted>")
            .finish()
    }
}

impl Credential {
    fn is_bcrypt(&self) -> bool {
        BCRYPT_PREFIXES.iter().any(|p| self.secret_hash.starts_with(p))
    }
}

/// Immutable identity → hash lookup
///
/// Built once at startup and shared behind an `Arc`; lookups never mutate.
#[derive(Default)]
pub struct CredentialStore {
    hashes: HashMap<String, String>,
}

impl CredentialStore {
    /// Build a store from already parsed credentials
    ///
    /// # Errors
    ///
    /// Returns an error if an identity is empty or appears twice.
    pub fn from_credentials<I>(credentials: I) -> Result<Self>
    where
        I: IntoIterator<Item = Credential>,
    {
        let mut hashes = HashMap::new();
        for credential in credentials {
            if credential.identity.is_empty() {
                return Err(RelayError::Credentials("empty identity".to_string()));
            }
            if !credential.is_bcrypt() {
                warn!(
                    "Credential for {:?} is not a bcrypt hash and will never validate",
                    credential.identity
                );
            }
            if hashes.insert(credential.identity.clone(), credential.secret_hash).is_some() {
                return Err(RelayError::Credentials(format!(
                    "duplicate identity {:?}",
                    credential.identity
                )));
            }
        }
        Ok(Self { hashes })
    }

    /// Parse htpasswd-style content: one `identity:hash` per line
    ///
    /// Blank lines and `#` comments are skipped.
    pub fn parse(content: &str) -> Result<Self> {
        let mut credentials = Vec::new();
        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (identity, hash) = line.split_once(':').ok_or_else(|| {
                RelayError::Credentials(format!("line {}: expected identity:hash", idx + 1))
            })?;
            if identity.is_empty() {
                return Err(RelayError::Credentials(format!("line {}: empty identity", idx + 1)));
            }
            credentials.push(Credential {
                identity: identity.to_string(),
                secret_hash: hash.to_string(),
            });
        }
        Self::from_credentials(credentials)
    }

    /// Load the credential file at `path`
    ///
    /// # Errors
    ///
    /// Any read or parse failure; callers treat this as fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            RelayError::Credentials(format!("failed to read {}: {}", path.display(), e))
        })?;
        let store = Self::parse(&content).map_err(|e| match e {
            RelayError::Credentials(msg) => {
                RelayError::Credentials(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;
        debug!("Loaded {} credentials from {}", store.len(), path.display());
        Ok(store)
    }

    /// Check `secret` against the stored hash for `identity`
    ///
    /// Returns false for unknown identities and malformed hashes.
    pub fn validate(&self, identity: &str, secret: &str) -> bool {
        match self.hashes.get(identity) {
            Some(hash) => bcrypt::verify(secret, hash).unwrap_or(false),
            None => false,
        }
    }

    /// Number of stored credentials
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Whether the store holds no credentials
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Whether `identity` has a stored hash
    pub fn contains(&self, identity: &str) -> bool {
        self.hashes.contains_key(identity)
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("identities", &self.hashes.len())
            .finish()
    }
}
