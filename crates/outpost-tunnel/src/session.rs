//! Tunnel session: mutual-TLS dial and the stream accept loop

use std::time::Duration;

use futures::future;
use outpost_identity::{AgentIdentity, TrustAnchor};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};
use tracing::{debug, info};

use crate::dispatch::dispatch;
use crate::tls::build_tls_connector;

/// Deadline for the TCP dial of the control server.
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("TLS error: {0}")]
    Tls(String),

    #[error("invalid tunnel address '{0}'")]
    InvalidAddress(String),

    #[error("dial timed out after {}s", .0.as_secs())]
    DialTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("multiplexer error: {0}")]
    Mux(#[from] yamux::ConnectionError),

    #[error("session closed by control server")]
    Closed,
}

type TlsConn = tokio_rustls::client::TlsStream<TcpStream>;

/// One long-lived multiplexed connection to the control server. A
/// stream's lifetime is strictly contained within its session: tearing
/// down the connection tears down every stream multiplexed over it.
pub struct TunnelSession {
    connection: yamux::Connection<Compat<TlsConn>>,
}

impl TunnelSession {
    /// Dial the control server with mutual TLS and wrap the connection
    /// in a multiplexed session.
    ///
    /// The agent takes the *server* role of the multiplexing protocol
    /// even though it is the TCP client: the control server is the side
    /// that opens logical streams.
    pub async fn connect(
        addr: &str,
        identity: &AgentIdentity,
        trust: &TrustAnchor,
        insecure: bool,
    ) -> Result<Self, SessionError> {
        let connector = build_tls_connector(identity, trust, insecure)?;

        let host = addr.split(':').next().unwrap_or(addr);
        let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|_| SessionError::InvalidAddress(addr.to_string()))?;

        let tcp = timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| SessionError::DialTimeout(DIAL_TIMEOUT))??;
        let tls = connector.connect(server_name, tcp).await?;

        info!(addr = %addr, "tunnel connection established");

        let connection = yamux::Connection::new(
            tls.compat(),
            yamux::Config::default(),
            yamux::Mode::Server,
        );

        Ok(Self { connection })
    }

    /// Accept inbound streams until the session dies.
    ///
    /// Every accepted stream is dispatched on its own task, so accepting
    /// never waits on a stream's processing. The loop only ends with an
    /// error: either the multiplexer failed or the connection closed.
    pub async fn run(mut self) -> Result<(), SessionError> {
        loop {
            match future::poll_fn(|cx| self.connection.poll_next_inbound(cx)).await {
                Some(Ok(stream)) => {
                    debug!(stream_id = %stream.id(), "accepted stream");
                    tokio::spawn(dispatch(stream.compat()));
                }
                Some(Err(e)) => return Err(SessionError::Mux(e)),
                None => return Err(SessionError::Closed),
            }
        }
    }
}
