//! Listener and per-connection wiring.
//!
//! For every accepted client connection the proxy opens one socket to
//! each cluster and assembles the per-connection object graph: three
//! writer tasks, two upstream read loops, one client read loop, and
//! the orchestrator tying them together. Backpressure capabilities are
//! handed in at construction, so no component holds a pointer back to
//! its connection:
//!
//! ```text
//! client writer full  ──pauses──► source + target read loops
//! upstream writer full ──pauses──► client read loop
//! ```
//!
//! All state for one connection is owned by that connection's tasks;
//! connections share nothing but the configuration and the metrics
//! recorder.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

use crate::backpressure::{FlowControl, FlowGate, PauseGroup};
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::guard::ProtocolGuard;
use crate::link::{LinkConfig, SupportedOverride, UpstreamLink};
use crate::metrics::ProxyMetrics;
use crate::orchestrate::Orchestrator;
use crate::protocol::FrameSplitter;
use crate::rewrite::QueryRewriter;
use crate::tls::{build_acceptor, BoxedStream};
use crate::writer::{spawn_writer_task, WriterConfig};

/// The dual-write proxy.
pub struct Proxy {
    config: Arc<ProxyConfig>,
    metrics: ProxyMetrics,
}

impl Proxy {
    /// Validate the configuration and build a proxy.
    pub fn new(config: ProxyConfig) -> Result<Self> {
        config.validate()?;
        let metrics = ProxyMetrics::new(config.metrics);
        Ok(Self {
            config: Arc::new(config),
            metrics,
        })
    }

    /// Bind the configured port and serve until the process exits.
    ///
    /// A bind failure is fatal and surfaces to the caller.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.proxy_port))
            .await
            .map_err(|e| {
                error!("Failed to bind port {}!", self.config.proxy_port);
                ProxyError::Io(e)
            })?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let acceptor = match (&self.config.tls_cert, &self.config.tls_key) {
            (Some(cert), Some(key)) => Some(build_acceptor(cert, key)?),
            _ => None,
        };

        info!(
            "Server is now listening on port: {}",
            listener.local_addr()?.port()
        );

        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept failed: {e}");
                    continue;
                }
            };
            info!("New connection from {peer}");

            let config = self.config.clone();
            let metrics = self.metrics.clone();
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                match handle_connection(config, metrics, socket, peer, acceptor).await {
                    Ok(()) => info!("Connection closed: {peer}"),
                    Err(e) => warn!("Connection {peer} ended: {e}"),
                }
            });
        }
    }
}

/// Run one client connection to completion.
async fn handle_connection(
    config: Arc<ProxyConfig>,
    metrics: ProxyMetrics,
    socket: TcpStream,
    peer: SocketAddr,
    acceptor: Option<TlsAcceptor>,
) -> Result<()> {
    socket.set_nodelay(true)?;
    let stream: BoxedStream = match &acceptor {
        Some(acceptor) => Box::new(
            acceptor
                .accept(socket)
                .await
                .map_err(|e| ProxyError::Tls(format!("handshake with {peer} failed: {e}")))?,
        ),
        None => Box::new(socket),
    };
    let (mut client_read, client_write) = tokio::io::split(stream);

    let client_gate = Arc::new(FlowGate::new());
    let source_gate = Arc::new(FlowGate::new());
    let target_gate = Arc::new(FlowGate::new());

    // A full client writer pauses both upstream read loops.
    let client_flow: Arc<dyn FlowControl> = {
        let metrics = metrics.clone();
        let client_address = peer.to_string();
        let wait = config.wait;
        Arc::new(PauseGroup::new(
            vec![source_gate.clone(), target_gate.clone()],
            move |elapsed| metrics.record_client_pause(&client_address, wait, elapsed),
        ))
    };
    let (client_writer, _client_writer_task) =
        spawn_writer_task(client_write, WriterConfig::default(), Some(client_flow));

    let guard = ProtocolGuard::new(config.protocol_versions.clone());
    let supported_override = SupportedOverride {
        protocol_versions: guard.version_labels(),
        cql_versions: config.cql_versions.clone(),
    };

    // Upstream connect failures are fatal for this client connection.
    let source = UpstreamLink::connect(
        LinkConfig {
            host: config.source_host.clone(),
            port: config.source_port,
            identifier: config.source_identifier.clone(),
            tls: config.upstream_tls,
            max_frame_length: config.max_frame_length,
        },
        server_flow(
            metrics.clone(),
            client_gate.clone(),
            config.source_addr(),
            config.source_identifier.clone(),
        ),
        source_gate,
        // wait=false: the source link streams responses clientward
        // itself.
        (!config.wait).then(|| client_writer.clone()),
        Some(supported_override),
    )
    .await?;

    let target = UpstreamLink::connect(
        LinkConfig {
            host: config.target_host.clone(),
            port: config.target_port,
            identifier: config.target_identifier.clone(),
            tls: config.upstream_tls,
            max_frame_length: config.max_frame_length,
        },
        server_flow(
            metrics.clone(),
            client_gate.clone(),
            config.target_addr(),
            config.target_identifier.clone(),
        ),
        target_gate,
        None,
        None,
    )
    .await?;

    info!("Connection to both Cassandra servers up");

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
    let rewriter = config.uuid.then(QueryRewriter::new);
    let orchestrator = Orchestrator::new(
        Arc::new(source),
        Arc::new(target),
        client_writer,
        guard,
        rewriter,
        config.wait,
        metrics,
        shutdown_tx,
    );

    let mut splitter = FrameSplitter::with_max_frame_length(config.max_frame_length);
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = tokio::select! {
            _ = shutdown_rx.recv() => break,
            n = async {
                client_gate.ready().await;
                client_read.read(&mut buf).await
            } => n?,
        };
        if n == 0 {
            break;
        }
        for frame in splitter.push(&buf[..n])? {
            orchestrator.dispatch(frame).await?;
        }
    }

    // Dropping the orchestrator and links aborts their tasks; pending
    // slots fail and any late upstream response is dropped.
    Ok(())
}

/// Flow capability for one upstream writer: pauses the client reader
/// and reports the pause duration under this server's labels.
fn server_flow(
    metrics: ProxyMetrics,
    client_gate: Arc<FlowGate>,
    server_address: String,
    server_identifier: String,
) -> Arc<dyn FlowControl> {
    Arc::new(PauseGroup::new(vec![client_gate], move |elapsed| {
        metrics.record_server_pause(&server_address, &server_identifier, elapsed)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_config() {
        // Missing hosts.
        assert!(Proxy::new(ProxyConfig::default()).is_err());

        let mut config = ProxyConfig::new("src", "tgt");
        config.tls_cert = Some("only-cert.pem".into());
        assert!(Proxy::new(config).is_err());
    }

    #[test]
    fn test_new_accepts_minimal_config() {
        let config = ProxyConfig::new("src.example", "tgt.example");
        assert!(Proxy::new(config).is_ok());
    }
}
