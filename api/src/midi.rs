//! Wire records for the MIDI streams crossing the block boundary.

use serde::{Deserialize, Serialize};

pub const MIDI_CLOCK: u8 = 0xF8;
pub const MIDI_START: u8 = 0xFA;
pub const MIDI_CONTINUE: u8 = 0xFB;
pub const MIDI_STOP: u8 = 0xFC;

/// A raw incoming MIDI event, timestamped to a frame within the current block so sync tracking
/// stays sample-accurate.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct MidiInputEvent {
    pub status: u8,
    pub channel: u8,
    pub data1: u8,
    pub data2: u8,
    /// Block-relative frame on which the event was received.
    pub frame_offset: u32,
}

/// MIDI transport/clock bytes the engine emits in response to an internal out-tracker's tempo
/// and the sync-master loop's mode transitions.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub enum MidiOutputEvent {
    Clock { frame_offset: u32 },
    Start { frame_offset: u32 },
    Stop { frame_offset: u32 },
    Continue { frame_offset: u32 },
}

impl MidiOutputEvent {
    pub fn status_byte(&self) -> u8 {
        match self {
            MidiOutputEvent::Clock { .. } => MIDI_CLOCK,
            MidiOutputEvent::Start { .. } => MIDI_START,
            MidiOutputEvent::Stop { .. } => MIDI_STOP,
            MidiOutputEvent::Continue { .. } => MIDI_CONTINUE,
        }
    }

    pub fn frame_offset(&self) -> u32 {
        match self {
            MidiOutputEvent::Clock { frame_offset }
            | MidiOutputEvent::Start { frame_offset }
            | MidiOutputEvent::Stop { frame_offset }
            | MidiOutputEvent::Continue { frame_offset } => *frame_offset,
        }
    }
}
