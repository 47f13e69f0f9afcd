//! Certificate inspection
//!
//! Used at startup to log which certificate the server presents.

use openssl::x509::X509;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use crate::common::{RelayError, Result};

/// Summary of a PEM certificate
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    /// Subject as `KEY=value` pairs
    pub subject: String,
    /// SHA-256 fingerprint of the DER encoding, colon separated
    pub fingerprint: String,
}

/// Read the first certificate in `cert_path` and summarise it
///
/// # Errors
///
/// Returns an error if the certificate cannot be read or parsed.
pub fn certificate_info(cert_path: &Path) -> Result<CertificateInfo> {
    let pem = fs::read(cert_path).map_err(|e| {
        RelayError::Certificate(format!("could not read {}: {}", cert_path.display(), e))
    })?;
    let cert = X509::from_pem(&pem).map_err(|e| {
        RelayError::Certificate(format!("could not parse {}: {}", cert_path.display(), e))
    })?;

    let subject = cert
        .subject_name()
        .entries()
        .map(|entry| {
            let key = entry.object().nid().short_name().unwrap_or("?");
            let value = entry
                .data()
                .as_utf8()
                .map(|v| v.to_string())
                .unwrap_or_default();
            format!("{}={}", key, value)
        })
        .collect::<Vec<_>>()
        .join(", ");

    let digest = Sha256::digest(cert.to_der()?);
    let fingerprint = digest
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":");

    Ok(CertificateInfo { subject, fingerprint })
}
