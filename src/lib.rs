//! Asynchronous audio playout engine
//!
//! Bridges an async producer and a realtime audio consumer:
//!
//! ```text
//! producer task            realtime thread
//! ------------             ---------------
//! write(bytes) ──► frame queue ──► StreamHandler::process ──► device
//! is_ready  ◄──── wake ◄───────────┘
//! is_finished ◄── wake ◄───────────┘
//! events.recv ◄── notifier ◄───────┘
//! ```
//!
//! [`OutputStream::connect`] negotiates a wire format with an
//! [`AudioServer`], attaches the realtime [`fill::StreamHandler`], and
//! hands back the producer handle plus a [`StreamEvents`] receiver.
//! Everything crossing the thread boundary goes through the lock-free
//! frame queue or the bounded event channel; the realtime side never
//! blocks, allocates, or takes a lock.

pub mod error;
pub mod fill;
pub mod format;
pub mod notify;
pub mod params;
pub mod queue;
pub mod server;
pub mod stream;

pub use error::{Error, NegotiationError, QueueError, Result, ServerError};
pub use fill::{FillChunk, StreamHandler};
pub use format::{
    CandidateSet, Choice, ChosenConfig, NegotiationRequest, SampleFormat, StreamConfig,
};
pub use notify::{StreamEvent, StreamEvents};
pub use params::{
    LatencyBound, LatencyDirection, LatencyInfo, ParamNotification, ParamValue, Properties,
    PropertyUpdate,
};
pub use server::{clamp_quantum, AudioServer, StreamState, MAX_QUANTUM, MIN_QUANTUM};
pub use stream::{OutputStream, StreamOptions};

/// Engine-wide defaults
pub mod constants {
    use crate::format::SampleFormat;

    /// Default sample rate offered first during negotiation
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;
    /// Default channel count
    pub const DEFAULT_CHANNELS: u16 = 2;
    /// Default sample format offered first during negotiation
    pub const DEFAULT_FORMAT: SampleFormat = SampleFormat::F64;
    /// Default high-water mark in frames
    pub const DEFAULT_BUFFER_FRAMES: usize = 2048;
    /// Default frame queue slot capacity
    pub const DEFAULT_QUEUE_SLOTS: usize = 256;
    /// Processing block size assumed when the server reports none
    pub const DEFAULT_QUANTUM: u32 = 256;
    /// Bounded capacity of the realtime-to-producer event channel
    pub const EVENT_QUEUE_CAPACITY: usize = 64;
}
