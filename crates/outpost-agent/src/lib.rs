//! Outpost agent - the outbound proxy agent process
//!
//! Ties the identity lifecycle and the tunnel session together under
//! one supervisor loop: ensure a trust anchor exists, produce a valid
//! identity, hold a session open, and reconnect forever on failure.

mod config;
mod supervisor;

// Re-export public API
pub use config::{AgentSection, Config, ServerSection};
pub use supervisor::{RetryPolicy, Supervisor, SupervisorError};
