//! Backpressure primitives.
//!
//! Backpressure propagates across sockets, not within one: when a write
//! queue fills, the *reader feeding it* must stop pulling bytes off its
//! own socket so the kernel buffers (and eventually the peer) absorb
//! the pressure. Two pieces implement this:
//!
//! - [`FlowGate`]: a pause/resume latch a read loop awaits before
//!   every read.
//! - [`FlowControl`]: the abstract pause/resume capability handed to a
//!   writer task at construction. The writer knows *when* to pause;
//!   the capability knows *whom*. This keeps the per-connection object
//!   graph acyclic: no writer holds a pointer back to its connection.
//!
//! [`PauseGroup`] is the standard [`FlowControl`]: it flips a set of
//! gates and reports each pause's duration to a hook (wired to the
//! pause-duration metrics).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::warn;

/// Pause/resume latch for a read loop.
///
/// Readers call [`FlowGate::ready`] before each socket read; it returns
/// immediately while running and parks the task while paused.
#[derive(Debug, Default)]
pub struct FlowGate {
    paused: AtomicBool,
    notify: Notify,
}

impl FlowGate {
    /// Create a gate in the running state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause the reader behind this gate.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Resume the reader behind this gate.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Check if the gate is currently paused.
    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Wait until the gate is open.
    pub async fn ready(&self) {
        while self.paused.load(Ordering::Acquire) {
            let notified = self.notify.notified();
            // Re-check after registering, or a resume between the load
            // and the await would be lost.
            if !self.paused.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}

/// Abstract pause/resume capability handed to a writer task.
///
/// Implementations decide which readers a full write queue suspends.
pub trait FlowControl: Send + Sync {
    /// The writer's queue has filled; suspend the feeding readers.
    fn pause(&self);

    /// The writer's queue has drained; resume the feeding readers.
    fn resume(&self);
}

/// [`FlowControl`] over a set of gates, with a duration hook.
///
/// The hook fires on resume with the length of the pause; callers wire
/// it to the appropriate pause-duration metric.
pub struct PauseGroup {
    gates: Vec<Arc<FlowGate>>,
    pause_started: Mutex<Option<Instant>>,
    on_resume: Box<dyn Fn(Duration) + Send + Sync>,
}

impl PauseGroup {
    /// Create a group over the given gates.
    pub fn new<F>(gates: Vec<Arc<FlowGate>>, on_resume: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        Self {
            gates,
            pause_started: Mutex::new(None),
            on_resume: Box::new(on_resume),
        }
    }
}

impl FlowControl for PauseGroup {
    fn pause(&self) {
        let mut started = self.pause_started.lock().expect("pause clock poisoned");
        if started.is_none() {
            warn!("Pausing processing");
            *started = Some(Instant::now());
        }
        for gate in &self.gates {
            gate.pause();
        }
    }

    fn resume(&self) {
        for gate in &self.gates {
            gate.resume();
        }
        let started = self
            .pause_started
            .lock()
            .expect("pause clock poisoned")
            .take();
        if let Some(started) = started {
            warn!("Resuming processing");
            (self.on_resume)(started.elapsed());
        }
    }
}
