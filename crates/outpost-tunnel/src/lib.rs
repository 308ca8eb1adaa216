//! Outpost tunnel - the long-lived control connection and stream proxying
//!
//! One mutually authenticated TLS connection to the control server is
//! multiplexed into independent logical streams. The roles are inverted
//! relative to the TCP connection: the agent dials out, but acts as the
//! *server* of the multiplexing protocol, because the control server is
//! the side that opens streams.
//!
//! Each accepted stream carries exactly one HTTP-style request:
//!
//! - `CONNECT host:port` opens a raw TCP tunnel to the target and
//!   relays bytes in both directions until either side closes.
//! - Any other method is replayed as a plain HTTP request and the
//!   response is written back onto the stream.

mod dispatch;
mod http;
mod session;
mod tls;

// Re-export public API
pub use dispatch::{dispatch, DispatchError};
pub use http::{read_request_head, ParseError, ProxyRequest};
pub use session::{SessionError, TunnelSession};
