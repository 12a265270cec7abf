//! # cql-mirror
//!
//! A dual-write proxy for the Cassandra native protocol.
//!
//! Clients connect to the proxy as if it were a normal node. Every
//! request frame is mirrored to two clusters: the *source*, whose
//! responses are returned to the client, and the *target*, which is
//! warmed by the same traffic while its responses are compared for
//! divergence metrics and discarded. This supports online migrations:
//! the target fills with live writes while clients keep source
//! semantics.
//!
//! ## Architecture
//!
//! Per client connection:
//! - a frame splitter reassembles the client byte stream into frames
//! - a cheap inspector classifies each frame by opcode
//! - an optional protocol guard rejects disallowed protocol versions
//! - an optional rewriter replaces `uuid()`/`now()` tokens with
//!   proxy-generated time-UUIDs so both clusters store the same values
//! - two upstream links fan the frame out and demultiplex responses by
//!   stream id
//! - writer tasks with queue-full detection propagate backpressure to
//!   the opposite sockets
//!
//! ## Example
//!
//! ```ignore
//! use cql_mirror::{Proxy, ProxyConfig};
//!
//! #[tokio::main]
//! async fn main() -> cql_mirror::Result<()> {
//!     let mut config = ProxyConfig::new("source.example", "target.example");
//!     config.proxy_port = 29042;
//!     Proxy::new(config)?.run().await
//! }
//! ```

pub mod backpressure;
pub mod codec;
pub mod config;
pub mod error;
pub mod guard;
pub mod inspect;
pub mod link;
pub mod metrics;
pub mod orchestrate;
pub mod protocol;
pub mod proxy;
pub mod rewrite;
pub mod tls;
pub mod writer;

pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use proxy::Proxy;
