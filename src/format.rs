//! Wire format negotiation
//!
//! Builds the ranked candidate descriptor offered to the audio server at
//! connect time and interprets the configuration the server picks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::NegotiationError;

/// Sample formats understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    /// 64-bit float
    F64,
    /// 32-bit float
    F32,
    /// 32-bit signed int
    S32,
    /// 32-bit unsigned int
    U32,
    /// 24-bit signed int packed in 32 bits
    S24_32,
    /// 16-bit signed int
    S16,
    /// 16-bit unsigned int
    U16,
    /// Server-specific format the engine does not interpret
    Other(u32),
}

impl SampleFormat {
    /// Bytes per sample for this format.
    ///
    /// Unrecognized formats report 4 bytes, which keeps the stride sane
    /// for every format a real server is likely to pick.
    pub fn bytes_per_sample(self) -> u32 {
        match self {
            SampleFormat::F64 => 8,
            SampleFormat::F32 | SampleFormat::S32 | SampleFormat::U32 | SampleFormat::S24_32 => 4,
            SampleFormat::S16 | SampleFormat::U16 => 2,
            SampleFormat::Other(_) => 4,
        }
    }
}

/// Immutable snapshot of the active stream configuration
///
/// Replaced wholesale by the negotiator on (re)negotiation; never mutated
/// in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub format: SampleFormat,
    pub bytes_per_sample: u32,
    pub rate: u32,
    pub channels: u16,
}

impl StreamConfig {
    pub fn new(format: SampleFormat, rate: u32, channels: u16) -> Self {
        Self {
            format,
            bytes_per_sample: format.bytes_per_sample(),
            rate,
            channels,
        }
    }

    /// Bytes per frame (one sample for every channel)
    pub fn bytes_per_frame(&self) -> u32 {
        self.bytes_per_sample * self.channels as u32
    }
}

/// Ranked candidate lists offered during negotiation; transient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSet {
    /// Acceptable formats, most preferred first
    pub formats: Vec<SampleFormat>,
    /// Acceptable sample rates, most preferred first
    pub rates: Vec<u32>,
    /// Fixed channel count
    pub channels: u16,
}

/// A negotiated value: either fixed or a ranked choice
///
/// A single-element candidate list encodes as `Fixed` rather than a
/// degenerate one-entry choice; some servers treat the two differently
/// and a fixed value is the smaller, safer encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Choice<T> {
    Fixed(T),
    Ranked {
        /// Default the server should fall back to
        preferred: T,
        /// Full candidate list, preference order
        alternatives: Vec<T>,
    },
}

impl<T: Copy> Choice<T> {
    fn from_candidates(candidates: &[T]) -> Self {
        if candidates.len() == 1 {
            Choice::Fixed(candidates[0])
        } else {
            Choice::Ranked {
                preferred: candidates[0],
                alternatives: candidates.to_vec(),
            }
        }
    }

    /// The most preferred value
    pub fn preferred(&self) -> T {
        match self {
            Choice::Fixed(v) => *v,
            Choice::Ranked { preferred, .. } => *preferred,
        }
    }
}

/// Semantic negotiation request handed to the audio server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationRequest {
    /// Stream name shown by the server
    pub name: String,
    /// Free-form stream properties (media role, application name, ...)
    pub props: HashMap<String, String>,
    pub format: Choice<SampleFormat>,
    pub rate: Choice<u32>,
    pub channels: u16,
}

impl NegotiationRequest {
    /// Build a request from a candidate set.
    ///
    /// Empty candidate lists are a caller bug and fail synchronously here;
    /// nothing reaches the server.
    pub fn from_candidates(
        name: String,
        props: HashMap<String, String>,
        candidates: &CandidateSet,
    ) -> Result<Self, NegotiationError> {
        if candidates.formats.is_empty() {
            return Err(NegotiationError::NoFormatCandidates);
        }
        if candidates.rates.is_empty() {
            return Err(NegotiationError::NoRateCandidates);
        }
        if candidates.channels == 0 {
            return Err(NegotiationError::NoChannels);
        }

        Ok(Self {
            name,
            props,
            format: Choice::from_candidates(&candidates.formats),
            rate: Choice::from_candidates(&candidates.rates),
            channels: candidates.channels,
        })
    }
}

/// Configuration chosen by the server, before interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChosenConfig {
    pub format: SampleFormat,
    pub rate: u32,
    pub channels: u16,
}

/// Interprets server-chosen configurations and detects real changes
#[derive(Debug)]
pub struct Negotiator {
    current: StreamConfig,
}

impl Negotiator {
    pub fn new(initial: StreamConfig) -> Self {
        Self { current: initial }
    }

    /// Current configuration snapshot
    pub fn config(&self) -> StreamConfig {
        self.current
    }

    /// Apply a server-chosen configuration.
    ///
    /// Returns the new snapshot only if rate, channels, format tag, or
    /// bytes-per-sample actually differ from the held configuration, so a
    /// server reconfirming an unchanged setup causes no downstream churn.
    pub fn apply(&mut self, chosen: ChosenConfig) -> Option<StreamConfig> {
        let next = StreamConfig::new(chosen.format, chosen.rate, chosen.channels);
        if next == self.current {
            return None;
        }
        self.current = next;
        Some(next)
    }
}
