//! Error types for the playout engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("Negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Stream destroyed")]
    StreamDestroyed,
}

/// Format/rate negotiation errors
#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("At least one format candidate is required")]
    NoFormatCandidates,

    #[error("At least one rate candidate is required")]
    NoRateCandidates,

    #[error("Channel count must be non-zero")]
    NoChannels,

    #[error("No offered candidate was accepted: {0}")]
    Rejected(String),
}

/// Frame queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Buffer size {size} must be a positive multiple of frame size {stride}")]
    Misaligned { size: usize, stride: u32 },

    #[error("Frame queue is full ({slots} buffers queued)")]
    Full { slots: usize },
}

/// Audio server / scheduler errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to attach stream: {0}")]
    Attach(String),

    #[error("Server connection lost: {0}")]
    Disconnected(String),
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;
