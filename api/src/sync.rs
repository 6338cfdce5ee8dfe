//! Wire form of the sync pulse taxonomy and the host transport status handed in each block.

use serde::{Deserialize, Serialize};

/// Which tracker produced the pulse.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncSource {
    Host,
    Midi,
    Out,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncEventKind {
    Pulse,
    Start,
    Stop,
    Continue,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PulseType {
    Clock,
    Beat,
    Bar,
    Subcycle,
    Cycle,
    Loop,
}

/// A single sync pulse as it crosses from a tracker into the event scheduler or out to a
/// diagnostic consumer.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub source: SyncSource,
    pub kind: SyncEventKind,
    pub pulse_type: PulseType,
    pub pulse_number: u32,
    pub pulse_frame: u32,
    /// Whether this pulse coincides with the start point of the syncing loop.
    pub sync_start_point: bool,
    /// Whether this pulse originated from the tracker itself (as opposed to being synthesized
    /// by the scheduler for boundary bookkeeping).
    pub sync_tracker_event: bool,
}

/// What a function-ending transport action the host requested this block, if any.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransportEvent {
    None,
    Start,
    Stop,
    Continue,
}

impl Default for TransportEvent {
    fn default() -> Self {
        Self::None
    }
}

/// Host transport status handed to the engine once per block.
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSyncStatus {
    pub running: bool,
    pub tempo: f64,
    pub beat: f64,
    pub beats_per_bar: f64,
    pub transport_event: TransportEvent,
}

impl Default for HostSyncStatus {
    fn default() -> Self {
        Self {
            running: false,
            tempo: 120.0,
            beat: 0.0,
            beats_per_bar: 4.0,
            transport_event: TransportEvent::None,
        }
    }
}
