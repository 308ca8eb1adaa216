//! Agent identity and validity evaluation

use chrono::{DateTime, Utc};

use crate::error::IdentityError;

/// Outcome of evaluating a cached identity against the configured
/// agent name. Every variant other than `Valid` forces re-enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// Unexpired and bound to the configured name.
    Valid,
    /// The certificate's notAfter is in the past.
    Expired,
    /// The certificate is bound to a different agent name. A renamed or
    /// cloned agent must never masquerade with a stale identity.
    NameMismatch,
    /// Missing or unparsable certificate/key material.
    Unreadable,
}

/// The agent's certificate/private-key pair proving its name to the
/// control server. Replaced wholesale by enrollment, never patched.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    common_name: String,
    not_after: DateTime<Utc>,
    cert_pem: String,
    key_pem: String,
}

impl AgentIdentity {
    /// Parse an identity from PEM material, extracting the subject
    /// common name and expiry. Fails if either the certificate or the
    /// private key cannot be parsed.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, IdentityError> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes())
            .map_err(|e| IdentityError::CertificateParse(e.to_string()))?;
        let cert = pem
            .parse_x509()
            .map_err(|e| IdentityError::CertificateParse(e.to_string()))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .ok_or_else(|| {
                IdentityError::CertificateParse("certificate has no common name".into())
            })?
            .to_string();

        let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| {
                IdentityError::CertificateParse("certificate expiry out of range".into())
            })?;

        // The key material must at least hold one private key rustls understands.
        let mut reader = std::io::BufReader::new(key_pem.as_bytes());
        rustls_pemfile::private_key(&mut reader)
            .map_err(|e| IdentityError::CertificateParse(e.to_string()))?
            .ok_or_else(|| IdentityError::CertificateParse("no private key in key material".into()))?;

        Ok(Self {
            common_name,
            not_after,
            cert_pem: cert_pem.to_string(),
            key_pem: key_pem.to_string(),
        })
    }

    /// Subject common name the certificate is bound to.
    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    /// Certificate expiry.
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// Evaluate this identity for the given agent name.
    pub fn evaluate(&self, agent_name: &str) -> Validity {
        if Utc::now() >= self.not_after {
            Validity::Expired
        } else if self.common_name != agent_name {
            Validity::NameMismatch
        } else {
            Validity::Valid
        }
    }

    pub fn is_valid(&self, agent_name: &str) -> bool {
        self.evaluate(agent_name) == Validity::Valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(name: &str, not_after_days: i64) -> (String, String) {
        let mut params = rcgen::CertificateParams::default();
        let mut dn = rcgen::DistinguishedName::new();
        dn.push(rcgen::DnType::CommonName, name);
        params.distinguished_name = dn;
        params.not_before = time::OffsetDateTime::now_utc() - time::Duration::days(2);
        params.not_after = time::OffsetDateTime::now_utc() + time::Duration::days(not_after_days);
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        (cert.pem(), key.serialize_pem())
    }

    #[test]
    fn test_valid_identity() {
        let (cert, key) = issue("agent-a", 30);
        let identity = AgentIdentity::from_pem(&cert, &key).unwrap();
        assert_eq!(identity.common_name(), "agent-a");
        assert_eq!(identity.evaluate("agent-a"), Validity::Valid);
        assert!(identity.is_valid("agent-a"));
    }

    #[test]
    fn test_expired_identity() {
        let (cert, key) = issue("agent-a", -1);
        let identity = AgentIdentity::from_pem(&cert, &key).unwrap();
        assert_eq!(identity.evaluate("agent-a"), Validity::Expired);
    }

    #[test]
    fn test_name_mismatch_beats_reuse() {
        // Unexpired but bound to another name: must not be reused.
        let (cert, key) = issue("agent-a", 30);
        let identity = AgentIdentity::from_pem(&cert, &key).unwrap();
        assert_eq!(identity.evaluate("agent-b"), Validity::NameMismatch);
        assert!(!identity.is_valid("agent-b"));
    }

    #[test]
    fn test_garbage_material_rejected() {
        assert!(AgentIdentity::from_pem("not a cert", "not a key").is_err());

        let (cert, _) = issue("agent-a", 30);
        assert!(AgentIdentity::from_pem(&cert, "not a key").is_err());
    }
}
