//! Realtime-to-producer notification plumbing
//!
//! Events discovered on the realtime thread cross to the producer side
//! through a bounded lock-free channel; the two backpressure wakes cross
//! through level-triggered notify handles. Nothing on the realtime side
//! ever blocks or allocates unboundedly.

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::format::StreamConfig;
use crate::params::{LatencyInfo, Properties, PropertyUpdate};
use crate::server::StreamState;

/// A discrete event delivered from the realtime thread
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    StateChanged {
        state: StreamState,
        error: Option<String>,
    },
    FormatChanged(StreamConfig),
    LatencyChanged(LatencyInfo),
    PropertiesChanged(Vec<PropertyUpdate>),
    UnknownParameter(u32),
}

/// Wake handles shared between the gates and the realtime callback.
///
/// The wakes are level-triggered: a waiter re-checks actual queue state
/// after waking, so redundant wakes are harmless. `notify_waiters` fans a
/// single wake out to every task currently suspended on the condition.
pub(crate) struct WakeSignals {
    pub(crate) ready: Notify,
    pub(crate) finished: Notify,
    pub(crate) events: Notify,
    pub(crate) ready_waiting: AtomicBool,
    pub(crate) finished_waiting: AtomicBool,
    destroyed: AtomicBool,
}

impl WakeSignals {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            ready: Notify::new(),
            finished: Notify::new(),
            events: Notify::new(),
            ready_waiting: AtomicBool::new(false),
            finished_waiting: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        })
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Mark the stream destroyed and release every pending awaiter.
    /// Idempotent.
    pub(crate) fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        self.ready.notify_waiters();
        self.finished.notify_waiters();
        self.events.notify_waiters();
    }
}

/// Producer-side copies of state discovered on the realtime thread,
/// refreshed as the corresponding events are delivered. Never shared with
/// the realtime side.
pub(crate) struct SharedSnapshots {
    pub(crate) config: parking_lot::Mutex<StreamConfig>,
    pub(crate) properties: parking_lot::Mutex<Properties>,
}

impl SharedSnapshots {
    pub(crate) fn new(config: StreamConfig) -> Arc<Self> {
        Arc::new(Self {
            config: parking_lot::Mutex::new(config),
            properties: parking_lot::Mutex::new(Properties::default()),
        })
    }
}

/// Create the event channel halves.
///
/// `capacity` bounds how many undelivered events may be pending; further
/// events are dropped and counted rather than blocking the realtime side.
pub(crate) fn event_channel(
    capacity: usize,
    signals: Arc<WakeSignals>,
    snapshots: Arc<SharedSnapshots>,
) -> (Notifier, StreamEvents) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let dropped = Arc::new(AtomicUsize::new(0));

    (
        Notifier {
            tx,
            signals: signals.clone(),
            dropped: dropped.clone(),
        },
        StreamEvents {
            rx,
            signals,
            snapshots,
            dropped,
        },
    )
}

/// Realtime-side notification handle
pub(crate) struct Notifier {
    tx: Sender<StreamEvent>,
    signals: Arc<WakeSignals>,
    dropped: Arc<AtomicUsize>,
}

impl Notifier {
    /// Enqueue an event without blocking; full channel drops it.
    pub(crate) fn emit(&self, event: StreamEvent) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.signals.events.notify_one();
    }

    pub(crate) fn ready_pending(&self) -> bool {
        self.signals.ready_waiting.load(Ordering::Acquire)
    }

    pub(crate) fn finished_pending(&self) -> bool {
        self.signals.finished_waiting.load(Ordering::Acquire)
    }

    /// Wake every task awaiting capacity
    pub(crate) fn wake_ready(&self) {
        self.signals.ready_waiting.store(false, Ordering::Release);
        self.signals.ready.notify_waiters();
    }

    /// Wake every task awaiting queue drain-out
    pub(crate) fn wake_finished(&self) {
        self.signals.finished_waiting.store(false, Ordering::Release);
        self.signals.finished.notify_waiters();
    }
}

/// Producer-side event stream
pub struct StreamEvents {
    rx: Receiver<StreamEvent>,
    signals: Arc<WakeSignals>,
    snapshots: Arc<SharedSnapshots>,
    dropped: Arc<AtomicUsize>,
}

impl std::fmt::Debug for StreamEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEvents").finish_non_exhaustive()
    }
}

impl StreamEvents {
    /// Receive the next event, suspending cooperatively until one arrives.
    ///
    /// Returns `None` once the stream has been disposed and all pending
    /// events were delivered.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        loop {
            // Register interest before checking so a wake arriving between
            // the check and the await is not lost.
            let mut notified = pin!(self.signals.events.notified());
            notified.as_mut().enable();

            match self.rx.try_recv() {
                Ok(event) => {
                    match &event {
                        StreamEvent::FormatChanged(config) => {
                            *self.snapshots.config.lock() = *config;
                        }
                        StreamEvent::PropertiesChanged(updates) => {
                            self.snapshots.properties.lock().apply(updates);
                        }
                        _ => {}
                    }

                    let dropped = self.dropped.swap(0, Ordering::Relaxed);
                    if dropped > 0 {
                        tracing::warn!(dropped, "event queue overflowed; notifications lost");
                    }
                    return Some(event);
                }
                Err(TryRecvError::Empty) => {
                    if self.signals.is_destroyed() {
                        return None;
                    }
                    notified.await;
                }
                Err(TryRecvError::Disconnected) => return None,
            }
        }
    }

    /// Events dropped on the realtime side since the last receive
    pub fn dropped_events(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}
