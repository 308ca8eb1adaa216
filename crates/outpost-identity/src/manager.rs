//! Identity lifecycle: load a cached identity or enroll a new one

use tracing::info;

use crate::enroll::{enroll, EnrollmentConfig};
use crate::error::IdentityError;
use crate::identity::{AgentIdentity, Validity};
use crate::store::IdentityStore;
use crate::trust::TrustAnchor;

/// Produces a valid agent identity: the cached pair when it still
/// matches the configured name and validity window, a freshly enrolled
/// one otherwise.
pub struct IdentityManager {
    store: IdentityStore,
    config: EnrollmentConfig,
}

impl IdentityManager {
    pub fn new(store: IdentityStore, config: EnrollmentConfig) -> Self {
        Self { store, config }
    }

    /// Evaluate whatever is on disk without touching the network.
    pub fn cached(&self) -> (Validity, Option<AgentIdentity>) {
        match self.store.read() {
            Ok(Some((cert, key))) => match AgentIdentity::from_pem(&cert, &key) {
                Ok(identity) => (identity.evaluate(&self.config.name), Some(identity)),
                Err(_) => (Validity::Unreadable, None),
            },
            _ => (Validity::Unreadable, None),
        }
    }

    /// Return the cached identity when valid; otherwise run one
    /// enrollment attempt and persist the issued pair.
    ///
    /// A failed attempt is reported to the caller - the supervisor owns
    /// the retry policy around this call.
    pub async fn load_or_enroll(
        &self,
        trust: &TrustAnchor,
    ) -> Result<AgentIdentity, IdentityError> {
        match self.cached() {
            (Validity::Valid, Some(identity)) => {
                info!(name = %identity.common_name(), "loaded valid identity from disk");
                return Ok(identity);
            }
            (outcome, _) => {
                info!(outcome = ?outcome, "cached identity unusable, enrolling");
            }
        }

        let identity = enroll(&self.config, trust).await?;
        self.store.write(identity.cert_pem(), identity.key_pem())?;
        info!(
            name = %identity.common_name(),
            not_after = %identity.not_after(),
            "enrolled new identity"
        );
        Ok(identity)
    }
}
