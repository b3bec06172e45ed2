//! Client certificate material for encrypted etcd endpoints.
//!
//! Files are read and checked as PEM before any dial is attempted, so a bad
//! path or a truncated certificate fails fast with a `Tls` error instead of
//! surfacing later as an opaque handshake failure.

use std::path::Path;

use rustls_pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject};

use config::EtcdConfig;

use crate::error::{CoordinationError, CoordinationResult};

/// PEM-encoded client identity and trust anchors.
#[derive(Clone)]
pub struct TlsMaterial {
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
    ca_pem: Vec<u8>,
}

impl TlsMaterial {
    /// Load the client certificate, client key and trusted CA named in `config`.
    pub fn load(config: &EtcdConfig) -> CoordinationResult<Self> {
        let cert = required(config.cert_file(), "etcdCertFile")?;
        let key = required(config.key_file(), "etcdKeyFile")?;
        let ca = required(config.trusted_ca_file(), "etcdTrustedCAFileFile")?;
        Self::from_files(cert, key, ca)
    }

    pub fn from_files(cert: &Path, key: &Path, ca: &Path) -> CoordinationResult<Self> {
        Self::from_pem(read(cert)?, read(key)?, read(ca)?)
    }

    /// Validate already-read PEM buffers.
    pub fn from_pem(cert_pem: Vec<u8>, key_pem: Vec<u8>, ca_pem: Vec<u8>) -> CoordinationResult<Self> {
        certificates(&cert_pem, "client certificate")?;
        PrivateKeyDer::from_pem_slice(&key_pem)
            .map_err(|e| CoordinationError::Tls(format!("invalid client key: {e}")))?;
        certificates(&ca_pem, "trusted CA")?;
        Ok(Self {
            cert_pem,
            key_pem,
            ca_pem,
        })
    }

    pub fn cert_pem(&self) -> &[u8] {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &[u8] {
        &self.key_pem
    }

    pub fn ca_pem(&self) -> &[u8] {
        &self.ca_pem
    }
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("cert_pem_len", &self.cert_pem.len())
            .field("ca_pem_len", &self.ca_pem.len())
            .finish_non_exhaustive()
    }
}

fn required<'a>(path: Option<&'a Path>, field: &str) -> CoordinationResult<&'a Path> {
    path.ok_or_else(|| CoordinationError::Tls(format!("https endpoint requires '{field}'")))
}

fn read(path: &Path) -> CoordinationResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        CoordinationError::Tls(format!("failed to read '{}': {e}", path.display()))
    })
}

fn certificates(pem: &[u8], what: &str) -> CoordinationResult<()> {
    let certs = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CoordinationError::Tls(format!("invalid {what}: {e}")))?;
    if certs.is_empty() {
        return Err(CoordinationError::Tls(format!(
            "no certificate found in {what}"
        )));
    }
    Ok(())
}
