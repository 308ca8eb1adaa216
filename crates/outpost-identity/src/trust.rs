//! Trust anchor bootstrap and loading
//!
//! The trust anchor is the root certificate set used to validate the
//! control server and newly issued client certificates. It is created
//! once (pre-provisioned out-of-band, or downloaded from the control
//! server on first start) and never mutated afterwards.

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rustls::RootCertStore;
use tracing::{debug, info};

use crate::error::IdentityError;

/// Timeout for the one-time CA download.
const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(10);

/// Well-known path the control server serves its CA certificate from.
const CA_PATH: &str = "/ca.crt";

/// The root certificate set, held as the PEM bytes persisted on disk.
#[derive(Debug, Clone)]
pub struct TrustAnchor {
    pem: Vec<u8>,
}

impl TrustAnchor {
    /// Build an anchor from PEM bytes, rejecting material that does not
    /// contain at least one parsable certificate.
    pub fn from_pem(pem: Vec<u8>) -> Result<Self, IdentityError> {
        let anchor = Self { pem };
        anchor.root_store()?;
        Ok(anchor)
    }

    /// Raw PEM bytes, exactly as persisted.
    pub fn as_pem(&self) -> &[u8] {
        &self.pem
    }

    /// Assemble a rustls root store from the anchor.
    pub fn root_store(&self) -> Result<RootCertStore, IdentityError> {
        let mut reader = BufReader::new(self.pem.as_slice());
        let certs = rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| IdentityError::CertificateParse(e.to_string()))?;

        let mut roots = RootCertStore::empty();
        for cert in certs {
            roots
                .add(cert)
                .map_err(|e| IdentityError::CertificateParse(e.to_string()))?;
        }
        if roots.is_empty() {
            return Err(IdentityError::EmptyTrustAnchor);
        }
        Ok(roots)
    }
}

/// File-backed trust anchor storage (`<state_dir>/ca.crt`).
#[derive(Debug, Clone)]
pub struct TrustStore {
    path: PathBuf,
}

impl TrustStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: state_dir.into().join("ca.crt"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted anchor, if any. An empty file counts as
    /// absent so a truncated write does not poison the store.
    pub fn load(&self) -> Result<Option<TrustAnchor>, IdentityError> {
        match std::fs::read(&self.path) {
            Ok(pem) if !pem.is_empty() => Ok(Some(TrustAnchor::from_pem(pem)?)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Return the persisted anchor, downloading it from the control
    /// server when none exists yet.
    ///
    /// The download deliberately skips server certificate verification:
    /// the CA being fetched is the very thing later connections verify
    /// against. This is the single trust-on-first-use step in the
    /// agent's lifetime; every request after it is validated.
    ///
    /// Safe to call repeatedly - once the anchor exists no network I/O
    /// happens.
    pub async fn ensure_anchor(&self, base_url: &str) -> Result<TrustAnchor, IdentityError> {
        if let Some(anchor) = self.load()? {
            debug!(path = %self.path.display(), "trust anchor already present");
            return Ok(anchor);
        }

        let url = format!("{}{}", base_url.trim_end_matches('/'), CA_PATH);
        info!(url = %url, "downloading CA certificate");

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(BOOTSTRAP_TIMEOUT)
            .build()?;

        let response = client.get(&url).send().await?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(IdentityError::BootstrapRejected { status });
        }

        let body = response.bytes().await?;
        let anchor = TrustAnchor::from_pem(body.to_vec())?;

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.path, anchor.as_pem())?;
        info!(path = %self.path.display(), "trust anchor persisted");

        Ok(anchor)
    }
}
