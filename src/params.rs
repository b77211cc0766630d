//! Typed server parameter notifications
//!
//! The server's open-ended tag/value parameter space is narrowed to a
//! closed set of variants; anything outside it surfaces as
//! `Unrecognized` with the raw identifier so callers can still see it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::format::ChosenConfig;

/// A parameter notification delivered by the audio server
#[derive(Debug, Clone, PartialEq)]
pub enum ParamNotification {
    /// Stream format was (re)negotiated
    Format(ChosenConfig),
    /// One or more stream properties changed
    Props(Vec<PropertyUpdate>),
    /// Latency bounds changed
    Latency(LatencyInfo),
    /// A parameter kind the engine does not interpret
    Unknown(u32),
}

/// A single property change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyUpdate {
    Volume(f32),
    Mute(bool),
    SoftMute(bool),
    MonitorMute(bool),
    ChannelVolumes(Vec<f32>),
    ChannelMap(Vec<u32>),
    MonitorVolumes(Vec<f32>),
    SoftVolumes(Vec<f32>),
    /// Server-defined named parameters
    Params(Vec<(String, ParamValue)>),
    /// A property tag the engine does not interpret
    Unrecognized(u32),
}

/// Value of a server-defined named parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Int(i32),
    Float(f32),
    Bool(bool),
    String(String),
}

/// Direction a latency bound applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LatencyDirection {
    Input,
    Output,
}

/// One end of a latency range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LatencyBound {
    pub nanoseconds: u64,
    pub quantum: u32,
    pub rate: u32,
}

/// Latency bounds reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyInfo {
    pub direction: LatencyDirection,
    pub min: LatencyBound,
    pub max: LatencyBound,
}

/// Per-channel properties merged from channel-indexed updates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelProperties {
    pub id: Option<u32>,
    pub volume: Option<f32>,
    pub monitor_volume: Option<f32>,
    pub soft_volume: Option<f32>,
}

/// Accumulated stream property snapshot on the producer side
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    pub volume: Option<f32>,
    pub mute: Option<bool>,
    pub soft_mute: Option<bool>,
    pub monitor_mute: Option<bool>,
    pub channels: Vec<ChannelProperties>,
    pub params: HashMap<String, ParamValue>,
}

impl Properties {
    /// Merge a batch of updates into the snapshot
    pub fn apply(&mut self, updates: &[PropertyUpdate]) {
        for update in updates {
            match update {
                PropertyUpdate::Volume(v) => self.volume = Some(*v),
                PropertyUpdate::Mute(m) => self.mute = Some(*m),
                PropertyUpdate::SoftMute(m) => self.soft_mute = Some(*m),
                PropertyUpdate::MonitorMute(m) => self.monitor_mute = Some(*m),
                PropertyUpdate::ChannelVolumes(volumes) => {
                    for (i, v) in volumes.iter().enumerate() {
                        self.channel_mut(i).volume = Some(*v);
                    }
                }
                PropertyUpdate::ChannelMap(ids) => {
                    for (i, id) in ids.iter().enumerate() {
                        self.channel_mut(i).id = Some(*id);
                    }
                }
                PropertyUpdate::MonitorVolumes(volumes) => {
                    for (i, v) in volumes.iter().enumerate() {
                        self.channel_mut(i).monitor_volume = Some(*v);
                    }
                }
                PropertyUpdate::SoftVolumes(volumes) => {
                    for (i, v) in volumes.iter().enumerate() {
                        self.channel_mut(i).soft_volume = Some(*v);
                    }
                }
                PropertyUpdate::Params(named) => {
                    for (name, value) in named {
                        self.params.insert(name.clone(), value.clone());
                    }
                }
                PropertyUpdate::Unrecognized(tag) => {
                    tracing::debug!(tag, "ignoring unrecognized property");
                }
            }
        }
    }

    fn channel_mut(&mut self, index: usize) -> &mut ChannelProperties {
        if index >= self.channels.len() {
            self.channels.resize_with(index + 1, Default::default);
        }
        &mut self.channels[index]
    }
}
