//! Producer-facing output stream
//!
//! `OutputStream` is the application's handle: it negotiates with the
//! audio server at connect time, accepts pre-encoded buffers, and exposes
//! the awaitable backpressure and completion gates. All of its operations
//! suspend cooperatively; none of them ever blocks the event loop.

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::fill::StreamHandler;
use crate::format::{
    CandidateSet, NegotiationRequest, Negotiator, SampleFormat, StreamConfig,
};
use crate::notify::{event_channel, SharedSnapshots, StreamEvents, WakeSignals};
use crate::params::Properties;
use crate::queue::{frame_queue, FrameQueueProducer};
use crate::server::{clamp_quantum, AudioServer};

/// Construction-time stream options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamOptions {
    /// Stream name shown by the server
    pub name: String,
    /// Format candidates, most preferred first
    pub formats: Vec<SampleFormat>,
    /// Rate candidates, most preferred first
    pub rates: Vec<u32>,
    /// Fixed channel count
    pub channels: u16,
    /// High-water mark in frames; above it writers wait on `is_ready`
    pub buffer_frames: usize,
    /// Frame queue slot capacity
    pub queue_slots: usize,
    /// Free-form stream properties forwarded to the server
    pub props: HashMap<String, String>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            name: "audio-playout".to_string(),
            formats: vec![DEFAULT_FORMAT],
            rates: vec![DEFAULT_SAMPLE_RATE],
            channels: DEFAULT_CHANNELS,
            buffer_frames: DEFAULT_BUFFER_FRAMES,
            queue_slots: DEFAULT_QUEUE_SLOTS,
            props: HashMap::new(),
        }
    }
}

/// Producer-side handle to a connected output stream
pub struct OutputStream<S: AudioServer> {
    server: Mutex<S>,
    producer: FrameQueueProducer,
    signals: Arc<WakeSignals>,
    snapshots: Arc<SharedSnapshots>,
    buffer_frames: usize,
    disposed: AtomicBool,
}

impl<S: AudioServer> std::fmt::Debug for OutputStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream")
            .field("buffer_frames", &self.buffer_frames)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl<S: AudioServer> OutputStream<S> {
    /// Negotiate with the server and attach the realtime callback.
    ///
    /// Returns the connected stream and its event receiver. Any failure
    /// leaves nothing attached: a stream is either fully connected or
    /// not connected at all.
    pub fn connect(mut server: S, options: StreamOptions) -> Result<(Self, StreamEvents)> {
        let candidates = CandidateSet {
            formats: options.formats.clone(),
            rates: options.rates.clone(),
            channels: options.channels,
        };
        let request = NegotiationRequest::from_candidates(
            options.name.clone(),
            options.props.clone(),
            &candidates,
        )?;

        let chosen = server.negotiate(&request)?;
        let config = StreamConfig::new(chosen.format, chosen.rate, chosen.channels);
        tracing::info!(
            format = ?config.format,
            rate = config.rate,
            channels = config.channels,
            stride = config.bytes_per_frame(),
            "stream format negotiated"
        );

        let (producer, consumer) = frame_queue(options.queue_slots, config.bytes_per_frame());
        let signals = WakeSignals::new();
        let snapshots = SharedSnapshots::new(config);
        let (notifier, events) =
            event_channel(EVENT_QUEUE_CAPACITY, signals.clone(), snapshots.clone());

        let handler = StreamHandler::new(
            consumer,
            notifier,
            Negotiator::new(config),
            options.buffer_frames,
        );
        server.attach(handler)?;

        Ok((
            Self {
                server: Mutex::new(server),
                producer,
                signals,
                snapshots,
                buffer_frames: options.buffer_frames,
                disposed: AtomicBool::new(false),
            },
            events,
        ))
    }

    /// Queue a pre-encoded buffer for playback.
    ///
    /// The buffer must already be aligned to the current stride; ownership
    /// moves into the queue until the realtime side has drained it.
    pub fn write(&self, buffer: Bytes) -> Result<()> {
        if self.signals.is_destroyed() {
            return Err(Error::StreamDestroyed);
        }
        self.producer.push(buffer)?;
        Ok(())
    }

    /// Available capacity in bytes, zero when the stream is full
    pub fn available_bytes(&self) -> usize {
        let stride = self.producer.stride() as usize;
        self.buffer_frames.saturating_sub(self.producer.queued_frames()) * stride
    }

    /// Whole frames currently queued and undelivered
    pub fn queued_frames(&self) -> usize {
        self.producer.queued_frames()
    }

    /// Resolve as soon as the stream can accept more data.
    ///
    /// Resolves immediately with the available byte count if capacity is
    /// positive; otherwise suspends until a realtime drain brings the
    /// queue back under the high-water mark. Every concurrent caller is
    /// woken by the same drain.
    pub async fn is_ready(&self) -> Result<usize> {
        loop {
            if self.signals.is_destroyed() {
                return Err(Error::StreamDestroyed);
            }
            let available = self.available_bytes();
            if available > 0 {
                return Ok(available);
            }

            self.signals.ready_waiting.store(true, Ordering::Release);
            let mut notified = pin!(self.signals.ready.notified());
            notified.as_mut().enable();

            // Re-check after registering: a drain or teardown may have
            // slipped in between.
            if self.signals.is_destroyed() {
                return Err(Error::StreamDestroyed);
            }
            let available = self.available_bytes();
            if available > 0 {
                return Ok(available);
            }

            notified.await;
        }
    }

    /// Resolve once every queued frame has been delivered.
    ///
    /// Resolves immediately if nothing is queued; otherwise suspends until
    /// a realtime fill cycle runs dry with the queue empty.
    pub async fn is_finished(&self) -> Result<()> {
        loop {
            if self.signals.is_destroyed() {
                return Err(Error::StreamDestroyed);
            }
            if self.producer.queued_frames() == 0 {
                return Ok(());
            }

            self.signals.finished_waiting.store(true, Ordering::Release);
            let mut notified = pin!(self.signals.finished.notified());
            notified.as_mut().enable();

            if self.signals.is_destroyed() {
                return Err(Error::StreamDestroyed);
            }
            if self.producer.queued_frames() == 0 {
                return Ok(());
            }

            notified.await;
        }
    }

    /// Configuration from the most recent negotiation observed on the
    /// producer side
    pub fn config(&self) -> StreamConfig {
        *self.snapshots.config.lock()
    }

    /// Accumulated property snapshot
    pub fn properties(&self) -> Properties {
        self.snapshots.properties.lock().clone()
    }

    /// Frames the server's scheduler requests per processing cycle
    pub fn frames_per_quantum(&self) -> u32 {
        clamp_quantum(self.server.lock().frames_per_quantum())
    }

    /// Tear the stream down. Idempotent.
    ///
    /// Detaches from the server first so no further realtime callbacks
    /// run, then rejects any pending `is_ready`/`is_finished` awaiters,
    /// then releases every queued buffer.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.server.lock().detach();
        self.signals.destroy();
        self.producer.clear();
        tracing::info!("output stream disposed");
    }
}

impl<S: AudioServer> Drop for OutputStream<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NegotiationError, QueueError};
    use crate::format::ChosenConfig;
    use crate::notify::StreamEvent;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    /// Server stand-in driven directly by the tests: `negotiate` replays a
    /// scripted choice and `attach` parks the handler where the test can
    /// pump it like a scheduler would.
    struct ScriptedServer {
        chosen: std::result::Result<ChosenConfig, String>,
        handler: Arc<Mutex<Option<StreamHandler>>>,
        detach_count: Arc<Mutex<u32>>,
    }

    impl ScriptedServer {
        fn new(chosen: ChosenConfig) -> (Self, Arc<Mutex<Option<StreamHandler>>>) {
            let handler = Arc::new(Mutex::new(None));
            (
                Self {
                    chosen: Ok(chosen),
                    handler: handler.clone(),
                    detach_count: Arc::new(Mutex::new(0)),
                },
                handler,
            )
        }

        fn rejecting(reason: &str) -> Self {
            Self {
                chosen: Err(reason.to_string()),
                handler: Arc::new(Mutex::new(None)),
                detach_count: Arc::new(Mutex::new(0)),
            }
        }
    }

    impl AudioServer for ScriptedServer {
        fn negotiate(
            &mut self,
            _request: &NegotiationRequest,
        ) -> std::result::Result<ChosenConfig, NegotiationError> {
            self.chosen
                .clone()
                .map_err(NegotiationError::Rejected)
        }

        fn attach(&mut self, handler: StreamHandler) -> std::result::Result<(), crate::error::ServerError> {
            *self.handler.lock() = Some(handler);
            Ok(())
        }

        fn detach(&mut self) {
            *self.detach_count.lock() += 1;
            *self.handler.lock() = None;
        }
    }

    fn mono_f64() -> ChosenConfig {
        ChosenConfig {
            format: SampleFormat::F64,
            rate: 48000,
            channels: 1,
        }
    }

    fn small_options() -> StreamOptions {
        StreamOptions {
            formats: vec![SampleFormat::F64, SampleFormat::F32],
            rates: vec![48000],
            channels: 1,
            buffer_frames: 4,
            queue_slots: 16,
            ..Default::default()
        }
    }

    /// Run one fill cycle the way a scheduler would (mono f64, stride 8)
    fn pump(handler: &Arc<Mutex<Option<StreamHandler>>>, frames: usize) {
        let mut guard = handler.lock();
        let handler = guard.as_mut().expect("handler attached");
        let mut dest = vec![0u8; frames * 8];
        handler.process(Some(&mut dest), frames);
    }

    #[tokio::test]
    async fn test_connect_negotiates_and_configures() {
        let (server, _handler) = ScriptedServer::new(ChosenConfig {
            format: SampleFormat::F32,
            rate: 44100,
            channels: 2,
        });
        let (stream, _events) = OutputStream::connect(server, small_options()).unwrap();

        let config = stream.config();
        assert_eq!(config.format, SampleFormat::F32);
        assert_eq!(config.rate, 44100);
        assert_eq!(config.bytes_per_frame(), 8);
    }

    #[tokio::test]
    async fn test_negotiation_failure_fails_connect() {
        let server = ScriptedServer::rejecting("no common format");
        let err = OutputStream::connect(server, small_options()).unwrap_err();
        assert!(matches!(
            err,
            Error::Negotiation(NegotiationError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_candidates_fail_before_server() {
        let server = ScriptedServer::rejecting("never reached");
        let options = StreamOptions {
            formats: vec![],
            ..small_options()
        };
        let err = OutputStream::connect(server, options).unwrap_err();
        assert!(matches!(
            err,
            Error::Negotiation(NegotiationError::NoFormatCandidates)
        ));
    }

    #[tokio::test]
    async fn test_write_misaligned_rejected() {
        let (server, _handler) = ScriptedServer::new(mono_f64());
        let (stream, _events) = OutputStream::connect(server, small_options()).unwrap();

        // stride is 8 (f64 mono)
        let err = stream.write(Bytes::from(vec![0u8; 12])).unwrap_err();
        assert!(matches!(
            err,
            Error::Queue(QueueError::Misaligned { size: 12, stride: 8 })
        ));
    }

    #[tokio::test]
    async fn test_is_ready_immediate_with_capacity() {
        let (server, _handler) = ScriptedServer::new(mono_f64());
        let (stream, _events) = OutputStream::connect(server, small_options()).unwrap();

        // 4-frame buffer, nothing queued: full capacity in bytes
        assert_eq!(stream.is_ready().await.unwrap(), 4 * 8);

        stream.write(Bytes::from(vec![0u8; 8])).unwrap();
        assert_eq!(stream.is_ready().await.unwrap(), 3 * 8);
    }

    #[tokio::test]
    async fn test_is_ready_waits_for_drain() {
        let (server, handler) = ScriptedServer::new(mono_f64());
        let (stream, _events) = OutputStream::connect(server, small_options()).unwrap();

        // Fill to the high-water mark: no capacity left
        stream.write(Bytes::from(vec![1u8; 4 * 8])).unwrap();
        assert_eq!(stream.available_bytes(), 0);

        let (ready, _) = tokio::join!(stream.is_ready(), async {
            sleep(Duration::from_millis(20)).await;
            pump(&handler, 2);
        });

        let available = ready.unwrap();
        assert!(available > 0);
        assert_eq!(stream.queued_frames(), 2);
    }

    #[tokio::test]
    async fn test_is_finished_immediate_when_empty() {
        let (server, _handler) = ScriptedServer::new(mono_f64());
        let (stream, _events) = OutputStream::connect(server, small_options()).unwrap();
        stream.is_finished().await.unwrap();
    }

    #[tokio::test]
    async fn test_is_finished_waits_for_starved_cycle() {
        let (server, handler) = ScriptedServer::new(mono_f64());
        let (stream, _events) = OutputStream::connect(server, small_options()).unwrap();

        stream.write(Bytes::from(vec![1u8; 2 * 8])).unwrap();

        let (finished, _) = tokio::join!(stream.is_finished(), async {
            sleep(Duration::from_millis(20)).await;
            // First cycle drains the data, second runs dry
            pump(&handler, 4);
            pump(&handler, 4);
        });

        finished.unwrap();
        assert_eq!(stream.queued_frames(), 0);
    }

    #[tokio::test]
    async fn test_dispose_rejects_pending_awaiters() {
        let (server, _handler) = ScriptedServer::new(mono_f64());
        let (stream, _events) = OutputStream::connect(server, small_options()).unwrap();

        // Queue full and non-empty: both gates must suspend
        stream.write(Bytes::from(vec![1u8; 4 * 8])).unwrap();

        let (ready, finished, _) = tokio::join!(stream.is_ready(), stream.is_finished(), async {
            sleep(Duration::from_millis(20)).await;
            stream.dispose();
        });

        assert!(matches!(ready.unwrap_err(), Error::StreamDestroyed));
        assert!(matches!(finished.unwrap_err(), Error::StreamDestroyed));
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let handler = Arc::new(Mutex::new(None));
        let detach_count = Arc::new(Mutex::new(0u32));
        let server = ScriptedServer {
            chosen: Ok(mono_f64()),
            handler: handler.clone(),
            detach_count: detach_count.clone(),
        };
        let (stream, _events) = OutputStream::connect(server, small_options()).unwrap();
        stream.write(Bytes::from(vec![1u8; 8])).unwrap();

        stream.dispose();
        stream.dispose();

        assert_eq!(*detach_count.lock(), 1);
        assert!(handler.lock().is_none());
        assert!(matches!(
            stream.write(Bytes::from(vec![1u8; 8])).unwrap_err(),
            Error::StreamDestroyed
        ));
        assert_eq!(stream.queued_frames(), 0);

        // Drop must not detach again
        drop(stream);
        assert_eq!(*detach_count.lock(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_waiters_all_wake() {
        let (server, handler) = ScriptedServer::new(mono_f64());
        let (stream, _events) = OutputStream::connect(server, small_options()).unwrap();

        stream.write(Bytes::from(vec![1u8; 4 * 8])).unwrap();

        let (a, b, _) = tokio::join!(stream.is_ready(), stream.is_ready(), async {
            sleep(Duration::from_millis(20)).await;
            pump(&handler, 4);
        });

        assert!(a.unwrap() > 0);
        assert!(b.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_renegotiation_reaches_producer_copy() {
        let (server, handler) = ScriptedServer::new(mono_f64());
        let (stream, mut events) = OutputStream::connect(server, small_options()).unwrap();

        handler
            .lock()
            .as_mut()
            .unwrap()
            .param_notification(crate::params::ParamNotification::Format(ChosenConfig {
                format: SampleFormat::S16,
                rate: 48000,
                channels: 1,
            }));

        let event = timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(StreamEvent::FormatChanged(_))));

        // The producer-side copy was refreshed at delivery
        assert_eq!(stream.config().format, SampleFormat::S16);
        assert_eq!(stream.config().bytes_per_frame(), 2);
        // New writes validate against the new stride
        stream.write(Bytes::from(vec![0u8; 2])).unwrap();
    }
}
