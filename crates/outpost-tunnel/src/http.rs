//! HTTP request-head parsing for proxied streams

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Maximum number of headers accepted in a request head.
const MAX_HEADERS: usize = 100;

/// Upper bound on the size of a request head.
const MAX_HEAD_BYTES: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed request head: {0}")]
    Malformed(String),

    #[error("request head exceeds {MAX_HEAD_BYTES} bytes")]
    HeadTooLarge,

    #[error("stream closed before a complete request head")]
    UnexpectedEof,

    #[error("request has no usable target host")]
    MissingHost,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One proxied request, parsed from the head of a stream. Exactly one
/// request is read per stream - streams are not pipelined, so any bytes
/// past the head belong to the body or the tunnel.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// HTTP method (GET, CONNECT, ...).
    pub method: String,
    /// Raw request-target: an authority for CONNECT, an origin-form
    /// path or absolute-form URI otherwise.
    pub target: String,
    /// Request headers in wire order.
    pub headers: Vec<(String, String)>,
    /// Declared body length, if any.
    pub content_length: Option<usize>,
    /// Bytes read past the head while parsing.
    pub buffered: Vec<u8>,
}

impl ProxyRequest {
    /// First header value matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Destination for the relay. CONNECT carries the authority in the
    /// request-target; other methods use the Host header, falling back
    /// to the authority of an absolute-form target.
    pub fn target_host(&self) -> Result<String, ParseError> {
        if self.method.eq_ignore_ascii_case("CONNECT") {
            return Ok(self.target.clone());
        }
        if let Some(host) = self.header("host") {
            return Ok(host.to_string());
        }
        if let Ok(url) = url::Url::parse(&self.target) {
            if let Some(host) = url.host_str() {
                return Ok(match url.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_string(),
                });
            }
        }
        Err(ParseError::MissingHost)
    }

    /// Origin-form path and query for the forward relay. Absolute-form
    /// targets are reduced to their path component.
    pub fn origin_path(&self) -> String {
        if self.target.starts_with('/') {
            return self.target.clone();
        }
        if let Ok(url) = url::Url::parse(&self.target) {
            let mut path = url.path().to_string();
            if let Some(query) = url.query() {
                path.push('?');
                path.push_str(query);
            }
            return path;
        }
        "/".to_string()
    }
}

/// Read and parse a single request head from the stream.
pub async fn read_request_head<S>(stream: &mut S) -> Result<ProxyRequest, ParseError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ParseError::UnexpectedEof);
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(request) = try_parse(&buf)? {
            return Ok(request);
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(ParseError::HeadTooLarge);
        }
    }
}

fn try_parse(buf: &[u8]) -> Result<Option<ProxyRequest>, ParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    match req.parse(buf) {
        Ok(httparse::Status::Complete(header_len)) => {
            let method = req.method.unwrap_or("").to_string();
            let target = req.path.unwrap_or("").to_string();

            let mut parsed_headers = Vec::new();
            let mut content_length = None;
            for header in req.headers.iter() {
                let value = String::from_utf8_lossy(header.value).to_string();
                if header.name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().ok();
                }
                parsed_headers.push((header.name.to_string(), value));
            }

            Ok(Some(ProxyRequest {
                method,
                target,
                headers: parsed_headers,
                content_length,
                buffered: buf[header_len..].to_vec(),
            }))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => Err(ParseError::Malformed(e.to_string())),
    }
}
