//! Upstream link: one outbound socket to one cluster.
//!
//! Owns the write path (through a writer task) and the read path (a
//! demultiplexing loop). Requests are submitted with [`UpstreamLink::send`],
//! which registers a completion slot under the frame's stream id;
//! responses arriving in any order are matched back by reading the
//! stream id out of their headers.
//!
//! The source link additionally:
//! - intercepts SUPPORTED responses to overwrite advertised protocol /
//!   CQL versions when configured
//! - streams every response straight to the client when the proxy runs
//!   with `wait=false` (the completion slot is still fulfilled for
//!   bookkeeping)

use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backpressure::{FlowControl, FlowGate};
use crate::codec::{body_prefix_len, Supported};
use crate::error::{ProxyError, Result};
use crate::inspect::{classify, FrameKind};
use crate::protocol::{stream_id, Frame, FrameSplitter};
use crate::tls::connect_upstream;
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Receives the response buffer for one in-flight request.
///
/// The sender side lives in the link's pending table; if the link
/// closes first, the sender is dropped and the receiver resolves to an
/// error.
pub type CompletionSlot = oneshot::Receiver<Bytes>;

/// Dense stream-id → completion-sender table.
///
/// Stream ids are 16-bit, so the table is a flat array indexed by the
/// id's unsigned form, grown on demand. Keeps the hot path free of
/// hashing; a driver that sticks to small ids keeps it tiny.
struct PendingTable {
    slots: Vec<Option<oneshot::Sender<Bytes>>>,
    in_flight: usize,
}

impl PendingTable {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            in_flight: 0,
        }
    }

    #[inline]
    fn index(stream: i16) -> usize {
        stream as u16 as usize
    }

    fn insert(&mut self, stream: i16, sender: oneshot::Sender<Bytes>) -> Result<()> {
        let index = Self::index(stream);
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }
        if self.slots[index].is_some() {
            return Err(ProxyError::StreamCollision(stream));
        }
        self.slots[index] = Some(sender);
        self.in_flight += 1;
        Ok(())
    }

    fn remove(&mut self, stream: i16) -> Option<oneshot::Sender<Bytes>> {
        let index = Self::index(stream);
        let slot = self.slots.get_mut(index)?.take();
        if slot.is_some() {
            self.in_flight -= 1;
        }
        slot
    }

    /// Drop every outstanding sender, failing the matching receivers.
    fn clear(&mut self) {
        self.slots.clear();
        self.in_flight = 0;
    }

    fn len(&self) -> usize {
        self.in_flight
    }
}

/// Configured overrides applied to SUPPORTED responses.
#[derive(Debug, Clone, Default)]
pub struct SupportedOverride {
    /// Replacement for `PROTOCOL_VERSIONS`, as `N/vN` labels.
    pub protocol_versions: Vec<String>,
    /// Replacement for `CQL_VERSION`.
    pub cql_versions: Vec<String>,
}

impl SupportedOverride {
    /// Whether any override is configured.
    pub fn is_empty(&self) -> bool {
        self.protocol_versions.is_empty() && self.cql_versions.is_empty()
    }

    /// Rewrite a SUPPORTED frame, preserving every untouched option.
    pub fn apply(&self, frame: Bytes) -> Result<Bytes> {
        let parsed = Frame::parse(frame)?;
        let prefix_len = body_prefix_len(&parsed.header, &parsed.body)?;
        let prefix = parsed.body.slice(..prefix_len);

        let mut supported = Supported::decode(parsed.body.slice(prefix_len..))?;
        if !self.protocol_versions.is_empty() {
            supported.set("PROTOCOL_VERSIONS", self.protocol_versions.clone());
        }
        if !self.cql_versions.is_empty() {
            supported.set("CQL_VERSION", self.cql_versions.clone());
        }

        let encoded = supported.encode();
        let mut body = BytesMut::with_capacity(prefix.len() + encoded.len());
        body.extend_from_slice(&prefix);
        body.extend_from_slice(&encoded);

        Ok(Frame::new(parsed.header, body.freeze()).encode())
    }
}

/// Address and behaviour of one upstream connection.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Upstream host.
    pub host: String,
    /// Upstream port.
    pub port: u16,
    /// Label used in logs and metrics.
    pub identifier: String,
    /// Wrap the connection in trust-all TLS.
    pub tls: bool,
    /// Maximum accepted frame body length on the response stream.
    pub max_frame_length: u32,
}

/// One established upstream connection with its demultiplexer.
pub struct UpstreamLink {
    identifier: String,
    writer: WriterHandle,
    pending: Arc<Mutex<PendingTable>>,
    gate: Arc<FlowGate>,
    read_task: JoinHandle<()>,
    writer_task: JoinHandle<Result<()>>,
}

impl UpstreamLink {
    /// Connect and start the read loop.
    ///
    /// `flow` is the capability invoked when this link's write queue
    /// fills (it pauses the client reader). `gate` suspends this link's
    /// own read loop and is flipped by the client writer's capability.
    /// `forward`, when set, streams every response to the client as it
    /// arrives (`wait=false` mode, source link only).
    /// `supported_override` rewrites SUPPORTED responses (source link
    /// only).
    pub async fn connect(
        config: LinkConfig,
        flow: Arc<dyn FlowControl>,
        gate: Arc<FlowGate>,
        forward: Option<WriterHandle>,
        supported_override: Option<SupportedOverride>,
    ) -> Result<Self> {
        let stream = connect_upstream(&config.host, config.port, config.tls)
            .await
            .map_err(|e| {
                warn!(
                    "Couldn't connect to server {} at {}:{}: {e}",
                    config.identifier, config.host, config.port
                );
                e
            })?;
        info!(
            "{} connected to {}:{}",
            config.identifier, config.host, config.port
        );

        let (read_half, write_half) = tokio::io::split(stream);
        let (writer, writer_task) =
            spawn_writer_task(write_half, WriterConfig::default(), Some(flow));

        let pending = Arc::new(Mutex::new(PendingTable::new()));
        let context = ReadContext {
            identifier: config.identifier.clone(),
            pending: pending.clone(),
            gate: gate.clone(),
            forward,
            supported_override: supported_override.filter(|o| !o.is_empty()),
            max_frame_length: config.max_frame_length,
        };
        let read_task = tokio::spawn(read_loop(read_half, context));

        Ok(Self {
            identifier: config.identifier,
            writer,
            pending,
            gate,
            read_task,
            writer_task,
        })
    }

    /// Submit a request frame; returns the slot its response will land
    /// in.
    ///
    /// A stream id already in flight is a client protocol violation and
    /// resets the connection.
    pub async fn send(&self, frame: Bytes) -> Result<CompletionSlot> {
        let stream = stream_id(&frame);
        let (sender, receiver) = oneshot::channel();

        self.pending
            .lock()
            .expect("pending table lock poisoned")
            .insert(stream, sender)?;

        if let Err(e) = self.writer.send(frame).await {
            // Roll the slot back so the table reflects what was
            // actually written.
            self.pending
                .lock()
                .expect("pending table lock poisoned")
                .remove(stream);
            return Err(e);
        }
        Ok(receiver)
    }

    /// Suspend the response read loop.
    pub fn pause(&self) {
        self.gate.pause();
    }

    /// Resume the response read loop.
    pub fn resume(&self) {
        self.gate.resume();
    }

    /// This link's read-loop gate.
    pub fn gate(&self) -> Arc<FlowGate> {
        self.gate.clone()
    }

    /// The configured identifier.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Requests currently awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.pending
            .lock()
            .expect("pending table lock poisoned")
            .len()
    }
}

impl Drop for UpstreamLink {
    fn drop(&mut self) {
        self.read_task.abort();
        self.writer_task.abort();
    }
}

/// Everything the read loop needs, detached from the link struct.
struct ReadContext {
    identifier: String,
    pending: Arc<Mutex<PendingTable>>,
    gate: Arc<FlowGate>,
    forward: Option<WriterHandle>,
    supported_override: Option<SupportedOverride>,
    max_frame_length: u32,
}

async fn read_loop<R>(mut reader: R, context: ReadContext)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut splitter = FrameSplitter::with_max_frame_length(context.max_frame_length);
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        context.gate.ready().await;

        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("{}: read failed: {e}", context.identifier);
                break;
            }
        };

        let frames = match splitter.push(&buf[..n]) {
            Ok(frames) => frames,
            Err(e) => {
                warn!("{}: framing error: {e}", context.identifier);
                break;
            }
        };

        for frame in frames {
            handle_response(&context, frame).await;
        }
    }

    info!("{}: server connection closed", context.identifier);
    // Fail every outstanding slot by dropping its sender.
    context
        .pending
        .lock()
        .expect("pending table lock poisoned")
        .clear();
}

async fn handle_response(context: &ReadContext, frame: Bytes) {
    let kind = classify(&frame);
    let stream = stream_id(&frame);

    let frame = match (&context.supported_override, kind) {
        (Some(supported_override), FrameKind::Supported) => {
            match supported_override.apply(frame.clone()) {
                Ok(rewritten) => {
                    debug!("{}: rewrote SUPPORTED for stream {stream}", context.identifier);
                    rewritten
                }
                Err(e) => {
                    warn!(
                        "{}: SUPPORTED decode failed, forwarding as-is: {e}",
                        context.identifier
                    );
                    frame
                }
            }
        }
        _ => frame,
    };

    if kind == FrameKind::Event || kind == FrameKind::Error {
        debug!("{}: received {kind} for stream {stream}", context.identifier);
    }

    if let Some(forward) = &context.forward {
        // wait=false: the client sees the response as soon as the
        // source produced it.
        if forward.send(frame.clone()).await.is_err() {
            debug!("{}: client gone, response dropped", context.identifier);
        }
    }

    let sender = context
        .pending
        .lock()
        .expect("pending table lock poisoned")
        .remove(stream);
    match sender {
        // A dropped receiver means the client went away; nothing to do.
        Some(sender) => {
            let _ = sender.send(frame);
        }
        None => warn!(
            "{}: stream id {stream} not registered; is TLS enabled on a non-TLS connection?",
            context.identifier
        ),
    }
}
