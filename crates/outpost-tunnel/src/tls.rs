//! Client-side TLS configuration for the tunnel dial

use std::io::BufReader;
use std::sync::Arc;

use outpost_identity::{AgentIdentity, TrustAnchor};
use tokio_rustls::TlsConnector;

use crate::session::SessionError;

/// Build the connector presenting the agent identity as client
/// credential and validating the peer against the trust anchor.
///
/// Insecure mode skips peer verification but still presents the client
/// certificate, so the control server can authenticate the agent either
/// way.
pub(crate) fn build_tls_connector(
    identity: &AgentIdentity,
    trust: &TrustAnchor,
    insecure: bool,
) -> Result<TlsConnector, SessionError> {
    ensure_crypto_provider();

    let mut cert_reader = BufReader::new(identity.cert_pem().as_bytes());
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SessionError::Tls(format!("invalid client certificate: {e}")))?;

    let mut key_reader = BufReader::new(identity.key_pem().as_bytes());
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| SessionError::Tls(format!("invalid client key: {e}")))?
        .ok_or_else(|| SessionError::Tls("no private key in identity".to_string()))?;

    let builder = rustls::ClientConfig::builder();
    let config = if insecure {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipVerification))
            .with_client_auth_cert(certs, key)
    } else {
        let roots = trust
            .root_store()
            .map_err(|e| SessionError::Tls(e.to_string()))?;
        builder
            .with_root_certificates(roots)
            .with_client_auth_cert(certs, key)
    }
    .map_err(|e| SessionError::Tls(format!("invalid client credential: {e}")))?;

    Ok(TlsConnector::from(Arc::new(config)))
}

// Initialize rustls crypto provider
static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("rustls crypto provider already installed");
        }
    });
}

// Certificate verifier that skips verification (INSECURE)
#[derive(Debug)]
struct SkipVerification;

impl rustls::client::danger::ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
