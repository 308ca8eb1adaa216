//! Agent configuration
//!
//! Read from a TOML file with `[agent]` and `[server]` sections, then
//! overridden by CLI flags and environment variables. All paths and
//! endpoints the core components use are derived here, so tests can
//! point everything at temporary directories and local mock servers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use outpost_identity::EnrollmentConfig;
use serde::Deserialize;

/// Default port the control server accepts tunnel connections on.
const DEFAULT_CONTROL_PORT: u16 = 8081;

/// Default port of the enrollment/bootstrap HTTP endpoint. Distinct
/// from the control port: enrollment happens before mutual TLS exists.
const DEFAULT_ENROLL_PORT: u16 = 8082;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agent: AgentSection,
    pub server: ServerSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Unique agent name; the issued certificate is bound to it.
    /// Auto-generated when left empty.
    pub name: String,
    /// Optional group tag forwarded at enrollment.
    pub group: Option<String>,
    /// Shared enrollment token. Required.
    pub token: String,
    /// Directory holding ca.crt, client.crt and client.key.
    pub state_dir: PathBuf,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            name: String::new(),
            group: None,
            token: String::new(),
            state_dir: PathBuf::from("certs"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Control server address; a bare host or a full URL. Required.
    pub address: String,
    /// Port of the tunnel listener.
    pub control_port: u16,
    /// Port of the enrollment endpoint.
    pub enroll_port: u16,
    /// Optional shared application secret sent with enrollment.
    pub secret: Option<String>,
    /// Skip TLS certificate verification (development only).
    pub insecure: bool,
    /// Seconds to wait between reconnect attempts.
    pub reconnect_delay_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            address: String::new(),
            control_port: DEFAULT_CONTROL_PORT,
            enroll_port: DEFAULT_ENROLL_PORT,
            secret: None,
            insecure: false,
            reconnect_delay_secs: 5,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. A missing file yields the
    /// defaults so the agent can be driven entirely by flags.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Reject configurations no amount of retrying can fix.
    pub fn validate(&self) -> Result<()> {
        if self.server.address.is_empty() {
            bail!("'server.address' is required");
        }
        if self.agent.token.is_empty() {
            bail!("'agent.token' is required");
        }
        Ok(())
    }

    /// Fill in an auto-generated agent name when none was configured.
    pub fn resolve_name(&mut self) {
        if self.agent.name.is_empty() {
            self.agent.name = format!("agent-{}", uuid::Uuid::new_v4());
        }
    }

    /// Server base URL with a scheme, no trailing slash.
    fn base_url(&self) -> String {
        let mut base = self.server.address.trim_end_matches('/').to_string();
        if !base.starts_with("http") {
            base = format!("https://{base}");
        }
        base
    }

    fn scheme_and_host(&self) -> (String, String) {
        let base = self.base_url();
        match url::Url::parse(&base) {
            Ok(url) => (
                url.scheme().to_string(),
                url.host_str().unwrap_or(&self.server.address).to_string(),
            ),
            Err(_) => ("https".to_string(), self.server.address.clone()),
        }
    }

    /// Base URL of the enrollment listener, which also serves the CA
    /// certificate for bootstrap.
    pub fn enroll_base_url(&self) -> String {
        let (scheme, host) = self.scheme_and_host();
        format!("{scheme}://{host}:{}", self.server.enroll_port)
    }

    /// `host:port` of the tunnel listener.
    pub fn tunnel_address(&self) -> String {
        let (_, host) = self.scheme_and_host();
        format!("{host}:{}", self.server.control_port)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.server.reconnect_delay_secs)
    }

    /// Enrollment parameters for the identity manager.
    pub fn enrollment(&self) -> EnrollmentConfig {
        EnrollmentConfig {
            endpoint: format!("{}/enroll", self.enroll_base_url()),
            token: self.agent.token.clone(),
            name: self.agent.name.clone(),
            group: self.agent.group.clone(),
            secret: self.server.secret.clone(),
            insecure: self.server.insecure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/outpost.toml")).unwrap();
        assert_eq!(config.server.control_port, DEFAULT_CONTROL_PORT);
        assert_eq!(config.server.enroll_port, DEFAULT_ENROLL_PORT);
        assert_eq!(config.server.reconnect_delay_secs, 5);
    }

    #[test]
    fn test_load_toml_sections() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("outpost.toml");
        std::fs::write(
            &path,
            r#"
[agent]
name = "edge-1"
group = "dc-1"
token = "secret-token"

[server]
address = "control.example.com"
control_port = 9091
insecure = true
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.agent.name, "edge-1");
        assert_eq!(config.agent.group.as_deref(), Some("dc-1"));
        assert_eq!(config.server.control_port, 9091);
        assert_eq!(config.server.enroll_port, DEFAULT_ENROLL_PORT);
        assert!(config.server.insecure);
    }

    #[test]
    fn test_validate_requires_address_and_token() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.server.address = "control.example.com".into();
        assert!(config.validate().is_err());

        config.agent.token = "token".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_name_generates_one() {
        let mut config = Config::default();
        config.resolve_name();
        assert!(config.agent.name.starts_with("agent-"));

        let mut named = Config::default();
        named.agent.name = "edge-1".into();
        named.resolve_name();
        assert_eq!(named.agent.name, "edge-1");
    }

    #[test]
    fn test_derived_endpoints_from_bare_host() {
        let mut config = Config::default();
        config.server.address = "control.example.com".into();

        assert_eq!(
            config.enroll_base_url(),
            "https://control.example.com:8082"
        );
        assert_eq!(config.tunnel_address(), "control.example.com:8081");
        assert_eq!(
            config.enrollment().endpoint,
            "https://control.example.com:8082/enroll"
        );
    }

    #[test]
    fn test_derived_endpoints_keep_scheme_and_strip_port() {
        let mut config = Config::default();
        config.server.address = "http://control.example.com:9999/".into();

        assert_eq!(config.enroll_base_url(), "http://control.example.com:8082");
        assert_eq!(config.tunnel_address(), "control.example.com:8081");
    }
}
