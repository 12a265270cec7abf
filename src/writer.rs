//! Dedicated writer task per socket.
//!
//! Each of a connection's three sockets gets one writer task fed
//! through an mpsc channel. This eliminates lock contention between the
//! tasks producing frames and enables batching multiple frames into
//! single syscalls via vectored writes.
//!
//! ```text
//! read loop ──┐
//! completions ┼─► mpsc::Sender<Bytes> ─► writer task ─► socket
//! supported ──┘
//! ```
//!
//! The writer also owns queue-full detection: when its pending count
//! crosses the high-water mark it invokes the [`FlowControl`]
//! capability it was built with, and resumes the paused readers once
//! the queue drains to half.

use std::io::IoSlice;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backpressure::FlowControl;
use crate::error::{ProxyError, Result};

/// Default queue depth at which the feeding readers are paused.
pub const DEFAULT_HIGH_WATER_MARK: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Configuration for a writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Pending frames at which [`FlowControl::pause`] fires.
    pub high_water_mark: usize,
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Shared state between a [`WriterHandle`] and its writer loop.
#[derive(Debug, Default)]
struct QueueState {
    /// Frames enqueued but not yet written.
    pending: AtomicUsize,
    /// Whether the flow controller is currently in the paused state.
    paused: AtomicBool,
}

/// Handle for enqueueing frames onto a writer task.
///
/// Cheaply cloneable; shared by everything that writes to one socket.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
    state: Arc<QueueState>,
    high_water_mark: usize,
    flow: Option<Arc<dyn FlowControl>>,
}

impl WriterHandle {
    /// Enqueue a frame for writing.
    ///
    /// Crossing the high-water mark pauses the feeding readers through
    /// the flow controller; the writer loop resumes them on drain.
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        let pending = self.state.pending.fetch_add(1, Ordering::AcqRel) + 1;

        if pending >= self.high_water_mark {
            if let Some(flow) = &self.flow {
                if !self.state.paused.swap(true, Ordering::AcqRel) {
                    tracing::warn!("Write queue full ({pending} pending), pausing");
                    flow.pause();
                }
            }
        }

        self.tx.send(frame).await.map_err(|_| {
            self.state.pending.fetch_sub(1, Ordering::Release);
            ProxyError::ConnectionClosed
        })
    }

    /// Get current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.state.pending.load(Ordering::Acquire)
    }

    /// Check if the queue is at or above the high-water mark.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.pending_count() >= self.high_water_mark
    }
}

/// Spawn the writer task and return a handle for enqueueing frames.
///
/// `flow` is the pause/resume capability for the readers that feed this
/// writer; pass `None` when no cross-socket propagation applies.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
    flow: Option<Arc<dyn FlowControl>>,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let state = Arc::new(QueueState::default());

    let handle = WriterHandle {
        tx,
        state: state.clone(),
        high_water_mark: config.high_water_mark,
        flow: flow.clone(),
    };

    let resume_mark = config.high_water_mark / 2;
    let task = tokio::spawn(writer_loop(rx, writer, state, flow, resume_mark));

    (handle, task)
}

/// Spawn a writer task with default configuration and no flow control.
pub fn spawn_writer_task_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, WriterConfig::default(), None)
}

/// Main writer loop: drains the channel in batches and writes them with
/// vectored I/O.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Bytes>,
    mut writer: W,
    state: Arc<QueueState>,
    flow: Option<Arc<dyn FlowControl>>,
    resume_mark: usize,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(frame) => frame,
            // Channel closed, clean shutdown.
            None => return Ok(()),
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_len = batch.len();
        write_batch(&mut writer, &batch).await?;

        let pending = state.pending.fetch_sub(batch_len, Ordering::AcqRel) - batch_len;
        if pending <= resume_mark && state.paused.swap(false, Ordering::AcqRel) {
            if let Some(flow) = &flow {
                tracing::warn!("Write queue drained ({pending} pending), resuming");
                flow.resume();
            }
        }
    }
}

/// Write a batch of frames with a single vectored write where possible.
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total: usize = batch.iter().map(|frame| frame.len()).sum();
    let slices: Vec<IoSlice<'_>> = batch.iter().map(|frame| IoSlice::new(frame)).collect();

    let written = writer.write_vectored(&slices).await?;
    if written == 0 && total > 0 {
        return Err(ProxyError::Io(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            "write_vectored returned 0",
        )));
    }

    if written < total {
        // Partial write: finish the remainder frame by frame.
        let mut skip = written;
        for frame in batch {
            if skip >= frame.len() {
                skip -= frame.len();
                continue;
            }
            writer.write_all(&frame[skip..]).await?;
            skip = 0;
        }
    }

    writer.flush().await?;
    Ok(())
}
