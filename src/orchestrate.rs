//! Per-frame fan-out and join.
//!
//! Each client frame is guarded, optionally rewritten, then written to
//! both upstreams (source first) before anything is awaited. The
//! join of the two completion slots runs on a detached task so that a
//! later request's response can reach the client before an earlier
//! slow one: correlation is by stream id, not arrival order.
//!
//! The source response is authoritative. The target's is compared for
//! the divergence counter and then dropped; nothing from the target
//! ever reaches the client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::guard::ProtocolGuard;
use crate::inspect::{classify, FrameKind};
use crate::link::{CompletionSlot, UpstreamLink};
use crate::metrics::ProxyMetrics;
use crate::protocol::{opcode_of, protocol_version_of};
use crate::rewrite::QueryRewriter;
use crate::writer::WriterHandle;

/// Orchestrates the request side of one client connection.
pub struct Orchestrator {
    source: Arc<UpstreamLink>,
    target: Arc<UpstreamLink>,
    client: WriterHandle,
    guard: ProtocolGuard,
    rewriter: Option<QueryRewriter>,
    wait: bool,
    metrics: ProxyMetrics,
    /// Completion tasks signal here when the connection must die
    /// (upstream gone, client gone mid-delivery).
    shutdown: mpsc::Sender<()>,
}

impl Orchestrator {
    /// Wire up an orchestrator for one connection.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<UpstreamLink>,
        target: Arc<UpstreamLink>,
        client: WriterHandle,
        guard: ProtocolGuard,
        rewriter: Option<QueryRewriter>,
        wait: bool,
        metrics: ProxyMetrics,
        shutdown: mpsc::Sender<()>,
    ) -> Self {
        Self {
            source,
            target,
            client,
            guard,
            rewriter,
            wait,
            metrics,
            shutdown,
        }
    }

    /// Handle one inbound client frame.
    ///
    /// Returns an error when the connection cannot continue (stream id
    /// collision, writer gone); the caller closes the connection.
    pub async fn dispatch(&self, frame: Bytes) -> Result<()> {
        let received = Instant::now();
        let op = opcode_of(&frame);
        let kind = classify(&frame);

        if let Some(rejection) = self.guard.check(&frame) {
            info!(
                "Downgrading protocol from {}",
                protocol_version_of(&frame)
            );
            self.client.send(rejection).await?;
            // Rejections still show up in the operation metrics.
            self.metrics.record_proxy_time(op, kind, received.elapsed());
            self.metrics.record_request_time(op, kind, received.elapsed());
            self.metrics.incr_server_error(op, kind);
            return Ok(());
        }

        let frame = match &self.rewriter {
            Some(rewriter) => rewriter.maybe_rewrite(kind, frame),
            None => frame,
        };
        // Local processing ends here; what follows is network time.
        let proxy_elapsed = received.elapsed();

        // Source first, then target; both enqueued before the join.
        let source_slot = self.source.send(frame.clone()).await?;
        let target_slot = self.target.send(frame).await?;

        let completion = Completion {
            client: self.client.clone(),
            wait: self.wait,
            metrics: self.metrics.clone(),
            source_identifier: self.source.identifier().to_string(),
            target_identifier: self.target.identifier().to_string(),
            shutdown: self.shutdown.clone(),
        };
        tokio::spawn(async move {
            completion
                .run(op, kind, received, proxy_elapsed, source_slot, target_slot)
                .await;
        });

        Ok(())
    }
}

/// State for the detached join of one request's two slots.
struct Completion {
    client: WriterHandle,
    wait: bool,
    metrics: ProxyMetrics,
    source_identifier: String,
    target_identifier: String,
    shutdown: mpsc::Sender<()>,
}

impl Completion {
    async fn run(
        self,
        op: u8,
        kind: FrameKind,
        received: Instant,
        proxy_elapsed: Duration,
        source_slot: CompletionSlot,
        target_slot: CompletionSlot,
    ) {
        let (source, target) = tokio::join!(source_slot, target_slot);

        let source = match source {
            Ok(buffer) => buffer,
            Err(_) => {
                warn!(
                    "{} closed with a request in flight",
                    self.source_identifier
                );
                let _ = self.shutdown.try_send(());
                return;
            }
        };
        let target = match target {
            Ok(buffer) => buffer,
            Err(_) => {
                warn!(
                    "{} closed with a request in flight",
                    self.target_identifier
                );
                let _ = self.shutdown.try_send(());
                return;
            }
        };

        self.metrics.record_proxy_time(op, kind, proxy_elapsed);

        if classify(&source) == FrameKind::Error {
            self.metrics.incr_server_error(op, kind);
        }

        if source != target {
            // Peer and topology queries legitimately diverge, so this
            // stays informational.
            self.metrics.incr_different_result(op, kind);
            info!(
                "Different result from {} and {}",
                self.source_identifier, self.target_identifier
            );
            debug!("Received from {}: {:?}", self.source_identifier, source);
            debug!("Received from {}: {:?}", self.target_identifier, target);
        }

        if self.wait {
            // wait=true: only now does the client get the source's
            // response. (With wait=false the source link already
            // streamed it.)
            if self.client.send(source).await.is_err() {
                debug!("Client gone before response delivery");
                let _ = self.shutdown.try_send(());
                return;
            }
        }

        self.metrics.record_request_time(op, kind, received.elapsed());
    }
}
