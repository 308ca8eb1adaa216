//! Outpost identity - trust anchor bootstrap and agent identity lifecycle
//!
//! The agent authenticates to the control server with a client
//! certificate bound to its configured name. This crate owns everything
//! up to the point where a usable credential exists:
//!
//! 1. **Trust bootstrap**: obtain the control server's CA certificate,
//!    either from local storage or via a one-time unverified download.
//! 2. **Identity load**: read a cached certificate/key pair from disk
//!    and evaluate it against the configured agent name and the clock.
//! 3. **Enrollment**: when no usable identity exists, exchange the
//!    shared enrollment token for a freshly issued pair and persist it.
//!
//! Enrollment attempts are single-shot; retry policy belongs to the
//! caller.
//!
//! # Example
//!
//! ```no_run
//! use outpost_identity::{EnrollmentConfig, IdentityManager, IdentityStore, TrustStore};
//!
//! # async fn run() -> Result<(), outpost_identity::IdentityError> {
//! let trust = TrustStore::new("certs");
//! let anchor = trust.ensure_anchor("https://control.example.com:8082").await?;
//!
//! let manager = IdentityManager::new(
//!     IdentityStore::new("certs"),
//!     EnrollmentConfig {
//!         endpoint: "https://control.example.com:8082/enroll".into(),
//!         token: "enrollment-token".into(),
//!         name: "edge-1".into(),
//!         group: None,
//!         secret: None,
//!         insecure: false,
//!     },
//! );
//! let identity = manager.load_or_enroll(&anchor).await?;
//! # let _ = identity;
//! # Ok(())
//! # }
//! ```

mod enroll;
mod error;
mod identity;
mod manager;
mod store;
mod trust;

// Re-export public API
pub use enroll::{enroll, EnrollmentConfig};
pub use error::IdentityError;
pub use identity::{AgentIdentity, Validity};
pub use manager::IdentityManager;
pub use store::IdentityStore;
pub use trust::{TrustAnchor, TrustStore};
