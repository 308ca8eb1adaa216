//! Per-stream request dispatch
//!
//! Each accepted stream carries exactly one request. CONNECT becomes a
//! raw TCP tunnel to the target; any other method is replayed as a
//! plain HTTP request and the response written back. Failures never
//! cross the tunnel: a broken stream is closed without a response and
//! the session carries on.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::http::{read_request_head, ParseError, ProxyRequest};

/// Deadline for reading the request head. The relay phase that follows
/// is unbounded: proxied connections may be long-lived.
const HEAD_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for the TCP dial of a CONNECT target.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Total budget for one forward-relayed request/response exchange.
const FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request parse failed: {0}")]
    Parse(#[from] ParseError),

    #[error("target dial failed: {0}")]
    Connect(std::io::Error),

    #[error("target dial timed out")]
    ConnectTimeout,

    #[error("forward relay timed out")]
    ForwardTimeout,

    #[error("unsupported method: {0}")]
    BadMethod(String),

    #[error("upstream error: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serve one proxied request from an accepted stream.
///
/// The stream is closed on every exit path. Protocol failures (bad
/// head, deadline expiry) terminate it silently - no diagnostic bytes
/// are ever written back into the tunnel.
pub async fn dispatch<S>(mut stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let request = match timeout(HEAD_READ_TIMEOUT, read_request_head(&mut stream)).await {
        Ok(Ok(request)) => request,
        Ok(Err(e)) => {
            debug!(error = %e, "dropping stream with unparsable request");
            let _ = stream.shutdown().await;
            return;
        }
        Err(_) => {
            debug!("dropping stream: request head timed out");
            let _ = stream.shutdown().await;
            return;
        }
    };

    let host = match request.target_host() {
        Ok(host) => host,
        Err(e) => {
            debug!(error = %e, "dropping stream without target host");
            let _ = stream.shutdown().await;
            return;
        }
    };

    info!(method = %request.method, host = %host, "proxying request");

    let result = if request.method.eq_ignore_ascii_case("CONNECT") {
        tunnel_relay(stream, &host, request).await
    } else {
        forward_relay(stream, &host, request).await
    };

    if let Err(e) = result {
        debug!(error = %e, host = %host, "relay ended with error");
    }
}

/// CONNECT: dial the target, acknowledge, then copy raw bytes in both
/// directions. The relay finishes as soon as *either* direction
/// completes; both ends are closed rather than draining the other half.
async fn tunnel_relay<S>(stream: S, host: &str, request: ProxyRequest) -> Result<(), DispatchError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut target = match timeout(CONNECT_TIMEOUT, TcpStream::connect(host)).await {
        Ok(Ok(target)) => target,
        Ok(Err(e)) => return Err(DispatchError::Connect(e)),
        Err(_) => return Err(DispatchError::ConnectTimeout),
    };

    let (mut stream_read, mut stream_write) = tokio::io::split(stream);
    stream_write.write_all(CONNECT_ESTABLISHED).await?;

    // Bytes read past the head belong to the tunnel.
    if !request.buffered.is_empty() {
        target.write_all(&request.buffered).await?;
    }
    let (mut target_read, mut target_write) = target.into_split();

    tokio::select! {
        result = tokio::io::copy(&mut stream_read, &mut target_write) => {
            if let Ok(bytes) = result {
                debug!(host = %host, bytes, "tunnel upstream direction finished");
            }
        }
        result = tokio::io::copy(&mut target_read, &mut stream_write) => {
            if let Ok(bytes) = result {
                debug!(host = %host, bytes, "tunnel downstream direction finished");
            }
        }
    }

    let _ = stream_write.shutdown().await;
    let _ = target_write.shutdown().await;
    Ok(())
}

/// Forward relay: replay the request against the target over plain HTTP
/// and write the raw response back onto the stream. Redirects are
/// passed through untouched so the original caller decides.
async fn forward_relay<S>(
    mut stream: S,
    host: &str,
    request: ProxyRequest,
) -> Result<(), DispatchError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let outcome = timeout(FORWARD_TIMEOUT, async {
        let mut body = request.buffered.clone();
        if let Some(length) = request.content_length {
            while body.len() < length {
                let mut chunk = vec![0u8; (length - body.len()).min(16 * 1024)];
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&chunk[..n]);
            }
        }

        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| DispatchError::BadMethod(request.method.clone()))?;
        let url = format!("http://{}{}", host, request.origin_path());

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(FORWARD_TIMEOUT)
            .build()?;

        let mut upstream = client.request(method, &url);
        for (name, value) in &request.headers {
            if is_hop_by_hop(name)
                || name.eq_ignore_ascii_case("host")
                || name.eq_ignore_ascii_case("content-length")
            {
                continue;
            }
            upstream = upstream.header(name.as_str(), value.as_str());
        }

        let response = upstream.body(body).send().await?;
        write_response(&mut stream, response).await
    })
    .await;

    let result = match outcome {
        Ok(result) => result,
        Err(_) => Err(DispatchError::ForwardTimeout),
    };
    let _ = stream.shutdown().await;
    result
}

/// Write the upstream response back onto the stream. The body has been
/// decoded by the client already, so transfer-coding headers are
/// replaced with an explicit content length.
async fn write_response<S>(stream: &mut S, response: reqwest::Response) -> Result<(), DispatchError>
where
    S: AsyncWrite + Unpin,
{
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?;

    let mut head = format!(
        "HTTP/1.1 {} {}\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    );
    for (name, value) in headers.iter() {
        if is_hop_by_hop(name.as_str()) || name.as_str().eq_ignore_ascii_case("content-length") {
            continue;
        }
        if let Ok(value) = value.to_str() {
            head.push_str(name.as_str());
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
    }
    head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));

    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&body).await?;
    stream.flush().await?;
    Ok(())
}

// Connection-scoped headers must not cross the relay.
fn is_hop_by_hop(name: &str) -> bool {
    name.eq_ignore_ascii_case("connection")
        || name.eq_ignore_ascii_case("proxy-connection")
        || name.eq_ignore_ascii_case("keep-alive")
        || name.eq_ignore_ascii_case("transfer-encoding")
        || name.eq_ignore_ascii_case("upgrade")
        || name.eq_ignore_ascii_case("te")
        || name.eq_ignore_ascii_case("trailer")
}
