//! Reconnect supervisor
//!
//! The outermost control structure of the agent: bootstrap the trust
//! anchor, produce a valid identity, hold a tunnel session open, and on
//! any failure wait a fixed delay and try again. In production the loop
//! never terminates; tests cap the attempt budget.

use std::time::Duration;

use outpost_identity::{IdentityManager, IdentityStore, TrustStore};
use outpost_tunnel::TunnelSession;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("retry budget exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: usize },
}

/// Fixed-delay retry policy. `max_attempts: None` retries forever.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_attempts: Option<usize>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

/// Attempt counter for one retried step.
struct RetryState {
    policy: RetryPolicy,
    attempt: usize,
}

impl RetryState {
    fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Wait before the next attempt. Errors once the budget is spent.
    async fn wait(&mut self) -> Result<(), SupervisorError> {
        self.attempt += 1;
        if let Some(max) = self.policy.max_attempts {
            if self.attempt > max {
                return Err(SupervisorError::RetriesExhausted { attempts: max });
            }
        }
        debug!(
            attempt = self.attempt,
            delay_secs = self.policy.delay.as_secs_f64(),
            "waiting before retry"
        );
        sleep(self.policy.delay).await;
        Ok(())
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Drives bootstrap, enrollment and the session in sequence, then loops
/// on session failure for the life of the process.
pub struct Supervisor {
    config: Config,
    policy: RetryPolicy,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        let policy = RetryPolicy {
            delay: config.reconnect_delay(),
            max_attempts: None,
        };
        Self { config, policy }
    }

    /// Override the retry policy; used by tests to avoid real delays.
    pub fn with_policy(config: Config, policy: RetryPolicy) -> Self {
        Self { config, policy }
    }

    /// Run the agent. Only returns when the retry budget is capped and
    /// spent - with the default policy this never happens.
    pub async fn run(&self) -> Result<(), SupervisorError> {
        let enroll_base = self.config.enroll_base_url();

        let trust_store = TrustStore::new(&self.config.agent.state_dir);
        let anchor = self
            .retrying("trust bootstrap", || trust_store.ensure_anchor(&enroll_base))
            .await?;

        let manager = IdentityManager::new(
            IdentityStore::new(&self.config.agent.state_dir),
            self.config.enrollment(),
        );
        let mut identity = self
            .retrying("enrollment", || manager.load_or_enroll(&anchor))
            .await?;

        let addr = self.config.tunnel_address();
        let mut retry = RetryState::new(self.policy.clone());
        loop {
            // Certificates expire during long uptimes; the cached
            // identity is re-evaluated before every reconnect.
            if !identity.is_valid(&self.config.agent.name) {
                info!("identity no longer valid, renewing");
                identity = self
                    .retrying("renewal", || manager.load_or_enroll(&anchor))
                    .await?;
            }

            match TunnelSession::connect(&addr, &identity, &anchor, self.config.server.insecure)
                .await
            {
                Ok(session) => {
                    info!(addr = %addr, "connected, serving streams");
                    retry.reset();
                    if let Err(e) = session.run().await {
                        warn!(error = %e, "session terminated");
                    }
                }
                Err(e) => {
                    warn!(error = %e, addr = %addr, "connect failed");
                }
            }

            retry.wait().await?;
        }
    }

    /// Retry a bootstrap step under the supervisor's policy.
    async fn retrying<T, E, F, Fut>(&self, step: &str, mut op: F) -> Result<T, SupervisorError>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut retry = RetryState::new(self.policy.clone());
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    warn!(step = step, error = %error, "step failed, will retry");
                }
            }
            retry.wait().await?;
        }
    }
}
