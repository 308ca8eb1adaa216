//! Outpost Agent - persistent outbound proxy agent
//!
//! The agent enrolls for a client certificate with a control server,
//! then keeps a mutually authenticated tunnel open to it and serves
//! proxied HTTP/CONNECT requests arriving over multiplexed streams.
//!
//! # Example Usage
//!
//! ```bash
//! # Run with a config file
//! outpost-agent --config /etc/outpost/outpost.toml
//!
//! # Run entirely from flags
//! outpost-agent --server control.example.com --token YOUR_TOKEN --name edge-1
//!
//! # Development against a self-signed server
//! outpost-agent --server localhost --token YOUR_TOKEN --insecure
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use outpost_agent::{Config, Supervisor};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Outpost Agent - outbound tunnel agent for proxied access to this host's network
#[derive(Parser, Debug)]
#[command(
    name = "outpost-agent",
    about = "Persistent outbound agent serving proxied requests from a control server",
    version,
    long_about = "The Outpost agent dials out to a control server, enrolls for a client \
                  certificate on first start, and keeps a mutually authenticated tunnel \
                  open. The control server multiplexes proxied HTTP and CONNECT requests \
                  over that single connection."
)]
struct Args {
    /// Configuration file (TOML format)
    ///
    /// CLI arguments take precedence over file configuration.
    #[arg(long, env = "OUTPOST_CONFIG", default_value = "outpost.toml")]
    config: PathBuf,

    /// Control server address (host or URL)
    #[arg(long, env = "OUTPOST_SERVER")]
    server: Option<String>,

    /// Enrollment token
    #[arg(long, env = "OUTPOST_TOKEN")]
    token: Option<String>,

    /// Agent name (auto-generated if not provided)
    #[arg(long, env = "OUTPOST_AGENT_NAME")]
    name: Option<String>,

    /// Agent group tag
    #[arg(long, env = "OUTPOST_GROUP")]
    group: Option<String>,

    /// Directory for the CA certificate and client identity
    #[arg(long, env = "OUTPOST_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Skip TLS certificate verification (INSECURE - development only)
    #[arg(long, env = "OUTPOST_INSECURE")]
    insecure: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&args.log_level))
        .with_target(true)
        .init();

    let config = load_config(args)?;

    info!("starting outpost agent");
    info!("  agent:  {}", config.agent.name);
    info!("  server: {}", config.tunnel_address());
    info!(
        "  token:  {}...",
        &config.agent.token[..config.agent.token.len().min(8)]
    );
    info!("  state:  {}", config.agent.state_dir.display());

    if config.server.insecure {
        tracing::warn!("running in INSECURE mode - certificate verification is DISABLED");
        tracing::warn!("this should ONLY be used for local development");
    }

    let supervisor = Supervisor::new(config);
    tokio::select! {
        result = supervisor.run() => {
            // Unreachable with the default unlimited retry policy.
            if let Err(e) = result {
                error!("supervisor stopped: {e}");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

/// Load the config file and apply CLI overrides, then validate.
fn load_config(args: Args) -> Result<Config> {
    let mut config = Config::load(&args.config)?;

    if let Some(server) = args.server {
        config.server.address = server;
    }
    if let Some(token) = args.token {
        config.agent.token = token;
    }
    if let Some(name) = args.name {
        config.agent.name = name;
    }
    if let Some(group) = args.group {
        config.agent.group = Some(group);
    }
    if let Some(state_dir) = args.state_dir {
        config.agent.state_dir = state_dir;
    }
    if args.insecure {
        config.server.insecure = true;
    }

    config.validate()?;
    config.resolve_name();
    Ok(config)
}
