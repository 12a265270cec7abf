//! Metric emission.
//!
//! All metrics go through the `metrics` facade; the exporter (a
//! Prometheus endpoint in the shipped binary) is installed by the
//! process entry point, not here. The handle is cheap to clone and
//! carries no state beyond the enable flag, so it can be threaded
//! through constructors instead of living in a global.

use std::time::Duration;

use metrics::{counter, histogram};

use crate::inspect::FrameKind;

const PROXY_TIME: &str = "cassandraProxy.cqlOperation.proxyTime";
const TIMER: &str = "cassandraProxy.cqlOperation.timer";
const SERVER_ERROR_COUNT: &str = "cassandraProxy.cqlOperation.cqlServerErrorCount";
const DIFFERENT_RESULT_COUNT: &str = "cassandraProxy.cqlOperation.cqlDifferentResultCount";
const CLIENT_PAUSED: &str = "cassandraProxy.clientSocket.paused";
const SERVER_PAUSED: &str = "cassandraProxy.serverSocket.paused";

/// Handle for emitting proxy metrics.
#[derive(Debug, Clone)]
pub struct ProxyMetrics {
    enabled: bool,
}

impl ProxyMetrics {
    /// Create a handle; when disabled every call is a no-op.
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Create a disabled handle (tests, metrics off).
    pub fn disabled() -> Self {
        Self::new(false)
    }

    /// Whether emission is enabled.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Time spent in local processing before fan-out returned.
    pub fn record_proxy_time(&self, opcode: u8, state: FrameKind, elapsed: Duration) {
        if !self.enabled {
            return;
        }
        histogram!(
            PROXY_TIME,
            "opcode" => opcode.to_string(),
            "state" => state.as_str()
        )
        .record(elapsed.as_secs_f64());
    }

    /// End-to-end request latency.
    pub fn record_request_time(&self, opcode: u8, state: FrameKind, elapsed: Duration) {
        if !self.enabled {
            return;
        }
        histogram!(
            TIMER,
            "opcode" => opcode.to_string(),
            "state" => state.as_str()
        )
        .record(elapsed.as_secs_f64());
    }

    /// A response classified as ERROR.
    pub fn incr_server_error(&self, opcode: u8, state: FrameKind) {
        if !self.enabled {
            return;
        }
        counter!(
            SERVER_ERROR_COUNT,
            "opcode" => opcode.to_string(),
            "state" => state.as_str()
        )
        .increment(1);
    }

    /// Source and target response bytes differ.
    pub fn incr_different_result(&self, opcode: u8, state: FrameKind) {
        if !self.enabled {
            return;
        }
        counter!(
            DIFFERENT_RESULT_COUNT,
            "opcode" => opcode.to_string(),
            "state" => state.as_str()
        )
        .increment(1);
    }

    /// Duration of one backpressure pause on the client socket.
    pub fn record_client_pause(&self, client_address: &str, wait: bool, elapsed: Duration) {
        if !self.enabled {
            return;
        }
        histogram!(
            CLIENT_PAUSED,
            "clientAddress" => client_address.to_string(),
            "wait" => wait.to_string()
        )
        .record(elapsed.as_secs_f64());
    }

    /// Duration of one backpressure pause on an upstream socket.
    pub fn record_server_pause(
        &self,
        server_address: &str,
        server_identifier: &str,
        elapsed: Duration,
    ) {
        if !self.enabled {
            return;
        }
        histogram!(
            SERVER_PAUSED,
            "serverAddress" => server_address.to_string(),
            "serverIdentifier" => server_identifier.to_string()
        )
        .record(elapsed.as_secs_f64());
    }
}
