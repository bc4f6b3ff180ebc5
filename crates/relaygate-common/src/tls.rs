use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::RelayError;

/// What was found when checking issued certificate material
#[derive(Debug, Clone)]
pub struct CertificateSummary {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Number of certificates in the chain file (leaf first)
    pub chain_len: usize,
}

/// Load certificates from a PEM file
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, RelayError> {
    let file = File::open(path).map_err(|e| {
        RelayError::Certificate(format!("Failed to open cert file {:?}: {}", path, e))
    })?;
    let mut reader = BufReader::new(file);
    let chain = certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| RelayError::Certificate(format!("Failed to parse certificates: {}", e)))?;

    if chain.is_empty() {
        return Err(RelayError::Certificate(format!(
            "No certificates found in {:?}",
            path
        )));
    }
    Ok(chain)
}

/// Load a private key from a PEM file
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, RelayError> {
    let file = File::open(path).map_err(|e| {
        RelayError::Certificate(format!("Failed to open key file {:?}: {}", path, e))
    })?;
    let mut reader = BufReader::new(file);
    private_key(&mut reader)
        .map_err(|e| RelayError::Certificate(format!("Failed to parse private key: {}", e)))?
        .ok_or_else(|| RelayError::Certificate(format!("No private key found in {:?}", path)))
}

/// Check that a certificate chain and private key exist and form a usable
/// TLS server identity.
///
/// Both files must be present, parse as PEM, and be accepted by rustls as a
/// single-cert server configuration. This is the post-issuance check the
/// proxy would otherwise only fail on at reload time.
pub fn verify_certificate_pair(
    cert_path: &Path,
    key_path: &Path,
) -> Result<CertificateSummary, RelayError> {
    for path in [cert_path, key_path] {
        if !path.is_file() {
            return Err(RelayError::Certificate(format!(
                "Missing certificate material: {:?}",
                path
            )));
        }
    }

    let chain = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;
    let chain_len = chain.len();

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| RelayError::Certificate(format!("Failed to select TLS versions: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| RelayError::Certificate(format!("Unusable certificate pair: {}", e)))?;

    tracing::debug!(
        "Verified certificate {:?} ({} in chain) with key {:?}",
        cert_path,
        chain_len,
        key_path
    );

    Ok(CertificateSummary {
        cert_path: cert_path.to_path_buf(),
        key_path: key_path.to_path_buf(),
        chain_len,
    })
}
