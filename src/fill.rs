//! Realtime fill callback
//!
//! `StreamHandler` is the half of the stream that lives on the audio
//! server's realtime thread. Once per processing quantum the scheduler
//! hands it a destination buffer to fill; everything it does is bounded
//! by the number of buffers consumed in that quantum.

use crate::format::Negotiator;
use crate::notify::{Notifier, StreamEvent};
use crate::params::ParamNotification;
use crate::queue::FrameQueueConsumer;
use crate::server::StreamState;

/// Metadata for the output region handed back to the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillChunk {
    /// Byte offset of valid data in the destination buffer
    pub offset: u32,
    /// Bytes per frame
    pub stride: u32,
    /// Valid bytes written (including substituted silence)
    pub size: u32,
}

/// Realtime-side stream callback, owned by the server after `attach`
pub struct StreamHandler {
    consumer: FrameQueueConsumer,
    notifier: Notifier,
    negotiator: Negotiator,
    /// High-water mark in frames; below it, writers are woken
    buffer_frames: usize,
}

impl StreamHandler {
    pub(crate) fn new(
        consumer: FrameQueueConsumer,
        notifier: Notifier,
        negotiator: Negotiator,
        buffer_frames: usize,
    ) -> Self {
        Self {
            consumer,
            notifier,
            negotiator,
            buffer_frames,
        }
    }

    /// Fill one processing quantum.
    ///
    /// Copies `min(requested_frames, destination capacity)` frames from
    /// the queue, substituting silence for any shortfall, and wakes
    /// pending producer-side awaiters through the notifier. A missing
    /// destination buffer (upstream exhaustion) is recorded and skipped;
    /// it is never fatal on this thread.
    pub fn process(&mut self, dest: Option<&mut [u8]>, requested_frames: usize) -> FillChunk {
        let stride = self.consumer.stride();

        let Some(dest) = dest else {
            tracing::warn!("scheduler offered no destination buffer this cycle");
            return FillChunk {
                offset: 0,
                stride,
                size: 0,
            };
        };

        let capacity_frames = dest.len() / stride as usize;
        let frames = requested_frames.min(capacity_frames);
        let byte_count = frames * stride as usize;

        let real = self.consumer.drain(&mut dest[..byte_count]);

        if self.notifier.ready_pending() && self.consumer.queued_frames() < self.buffer_frames {
            self.notifier.wake_ready();
        }

        if real == 0 && self.consumer.queued_frames() == 0 && self.notifier.finished_pending() {
            self.notifier.wake_finished();
        }

        FillChunk {
            offset: 0,
            stride,
            size: byte_count as u32,
        }
    }

    /// Dispatch a parameter notification from the server.
    pub fn param_notification(&mut self, notification: ParamNotification) {
        match notification {
            ParamNotification::Format(chosen) => {
                // Only a real change updates the stride and reaches the
                // producer side; reconfirmations are dropped here.
                if let Some(config) = self.negotiator.apply(chosen) {
                    self.consumer.set_stride(config.bytes_per_frame());
                    self.notifier.emit(StreamEvent::FormatChanged(config));
                }
            }
            ParamNotification::Props(updates) => {
                self.notifier.emit(StreamEvent::PropertiesChanged(updates));
            }
            ParamNotification::Latency(info) => {
                self.notifier.emit(StreamEvent::LatencyChanged(info));
            }
            ParamNotification::Unknown(id) => {
                self.notifier.emit(StreamEvent::UnknownParameter(id));
            }
        }
    }

    /// Forward a stream state transition from the server.
    pub fn state_changed(&mut self, state: StreamState, error: Option<String>) {
        self.notifier.emit(StreamEvent::StateChanged { state, error });
    }
}
