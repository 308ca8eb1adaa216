use thiserror::Error;

/// Errors produced by trust bootstrap, identity loading and enrollment.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CA download rejected (HTTP {status})")]
    BootstrapRejected { status: u16 },

    #[error("trust anchor contains no usable certificate")]
    EmptyTrustAnchor,

    #[error("enrollment rejected (HTTP {status}): {detail}")]
    EnrollmentRejected { status: u16, detail: String },

    #[error("enrollment response was not a certificate/key pair: {0}")]
    BadEnrollmentResponse(String),

    #[error("certificate parse error: {0}")]
    CertificateParse(String),
}
