//! Error types for proxy operations.

use thiserror::Error;

/// Unified error type for the filtering forward proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O error (socket operations).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Hyper HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// Invalid CONNECT request.
    #[error("Invalid CONNECT request: {0}")]
    InvalidConnect(String),

    /// Plain HTTP request the proxy cannot route (no host).
    #[error("Invalid proxy request: {0}")]
    InvalidRequest(String),

    /// Failed to connect to the destination server.
    #[error("Failed to connect to upstream '{addr}': {message}")]
    UpstreamConnect {
        /// The address we tried to connect to.
        addr: String,
        /// Error message.
        message: String,
    },

    /// The chained upstream proxy refused or broke the tunnel handshake.
    #[error("Upstream proxy handshake failed: {0}")]
    UpstreamHandshake(String),

    /// The configured upstream proxy URL is unusable.
    #[error("Invalid upstream proxy '{url}': {message}")]
    InvalidUpstream {
        /// The configured URL.
        url: String,
        /// Why it was rejected.
        message: String,
    },
}

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;
