//! Audio server interface
//!
//! The engine never talks to hardware itself; a server implementation
//! negotiates the wire format, runs the realtime scheduler, and drives
//! the stream handler once per processing quantum.

use serde::{Deserialize, Serialize};

use crate::error::{NegotiationError, ServerError};
use crate::fill::StreamHandler;
use crate::format::{ChosenConfig, NegotiationRequest};

/// Lifecycle states reported by the audio server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    Error,
    Unconnected,
    Connecting,
    Paused,
    Streaming,
}

/// Smallest quantum a server is expected to request
pub const MIN_QUANTUM: u32 = 32;
/// Largest quantum a server is expected to request
pub const MAX_QUANTUM: u32 = 2048;

/// Clamp a server-reported quantum to a sane processing block size
pub fn clamp_quantum(frames: u32) -> u32 {
    frames.clamp(MIN_QUANTUM, MAX_QUANTUM)
}

/// The external audio server / scheduler collaborator.
///
/// Call order is negotiate, then attach. After `attach` the server owns
/// the handler and invokes it from its realtime thread; `detach` must
/// stop those callbacks before returning and must be idempotent.
pub trait AudioServer: Send + 'static {
    /// Offer the candidate descriptor; returns the chosen configuration.
    fn negotiate(
        &mut self,
        request: &NegotiationRequest,
    ) -> Result<ChosenConfig, NegotiationError>;

    /// Hand the realtime callback over to the scheduler.
    fn attach(&mut self, handler: StreamHandler) -> Result<(), ServerError>;

    /// Stop invoking the callback. No fill may run after this returns.
    fn detach(&mut self);

    /// Frames the scheduler requests per processing cycle.
    fn frames_per_quantum(&self) -> u32 {
        clamp_quantum(crate::constants::DEFAULT_QUANTUM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantum_clamping() {
        assert_eq!(clamp_quantum(0), 32);
        assert_eq!(clamp_quantum(31), 32);
        assert_eq!(clamp_quantum(256), 256);
        assert_eq!(clamp_quantum(1 << 20), 2048);
    }
}
