//! Certificate enrollment
//!
//! A single enrollment attempt exchanges the shared token for a freshly
//! issued certificate/key pair. The server authenticates the caller via
//! the token (and optional application secret header) - mutual TLS is
//! not possible yet at this point in the lifecycle.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::IdentityError;
use crate::identity::AgentIdentity;
use crate::trust::TrustAnchor;

/// Timeout for one enrollment exchange.
const ENROLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Header carrying the shared application secret, checked by the
/// control server in front of the enrollment endpoint.
const APP_SECRET_HEADER: &str = "X-App-Secret";

/// Parameters for enrollment attempts.
#[derive(Debug, Clone)]
pub struct EnrollmentConfig {
    /// Full URL of the enrollment endpoint.
    pub endpoint: String,
    /// Shared enrollment token.
    pub token: String,
    /// Agent name the issued certificate will be bound to.
    pub name: String,
    /// Optional group tag forwarded to the server.
    pub group: Option<String>,
    /// Optional shared application secret sent as a request header.
    pub secret: Option<String>,
    /// Skip server certificate verification.
    pub insecure: bool,
}

#[derive(Serialize)]
struct EnrollmentRequest<'a> {
    token: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    group: Option<&'a str>,
}

#[derive(Deserialize)]
struct EnrollmentResponse {
    #[serde(rename = "Cert")]
    cert: String,
    #[serde(rename = "Key")]
    key: String,
}

/// Perform one enrollment attempt against the control server, with TLS
/// validated against the trust anchor. Not self-retrying.
pub async fn enroll(
    config: &EnrollmentConfig,
    trust: &TrustAnchor,
) -> Result<AgentIdentity, IdentityError> {
    debug!(endpoint = %config.endpoint, name = %config.name, "requesting certificate");

    let ca = reqwest::Certificate::from_pem(trust.as_pem())?;
    let mut builder = reqwest::Client::builder()
        .add_root_certificate(ca)
        .timeout(ENROLL_TIMEOUT);
    if config.insecure {
        builder = builder.danger_accept_invalid_certs(true);
    }
    let client = builder.build()?;

    let body = EnrollmentRequest {
        token: &config.token,
        name: &config.name,
        group: config.group.as_deref(),
    };
    let mut request = client.post(&config.endpoint).json(&body);
    if let Some(secret) = &config.secret {
        request = request.header(APP_SECRET_HEADER, secret);
    }

    let response = request.send().await?;
    let status = response.status().as_u16();
    if status != 200 {
        let detail = response.text().await.unwrap_or_default();
        return Err(IdentityError::EnrollmentRejected { status, detail });
    }

    let issued: EnrollmentResponse = response
        .json()
        .await
        .map_err(|e| IdentityError::BadEnrollmentResponse(e.to_string()))?;

    AgentIdentity::from_pem(&issued.cert, &issued.key)
}
