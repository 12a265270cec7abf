//! Error types for cql-mirror.

use thiserror::Error;

/// Main error type for all proxy operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O error on one of the three sockets.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or oversized frame on the wire.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Full decode or re-encode of a frame body failed.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS setup or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// A stream id was submitted while a request with the same id
    /// was still in flight.
    #[error("Stream id {0} already in flight")]
    StreamCollision(i16),

    /// The write queue's task has ended.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using ProxyError.
pub type Result<T> = std::result::Result<T, ProxyError>;
