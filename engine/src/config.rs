//! Snapshot-at-block-boundary configuration (ambient stack: spec's control-surface/preset tree is
//! out of scope, but every event still needs a `Preset` snapshot per spec §4.6 step 3, and the
//! block driver needs somewhere to land a swapped config).
//!
//! Grounded in the teacher's config structs (plain serde-derived value types, cloned cheaply, no
//! behavior attached) rather than anything resembling its REAPER-backed `ClipPlayState`/project
//! model, since the project/preset tree itself is explicitly out of scope.

use looper_api::midi::MidiInputEvent;
use serde::{Deserialize, Serialize};

/// The quantization granularity a function's frame is rounded to.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuantizeMode {
    Off,
    Cycle,
    Subcycle,
    Loop,
}

/// Per-track tunables that affect function behavior. Snapshotted onto each scheduled event
/// (spec §4.6: "so scripts can change the preset between scheduling and execution without
/// altering the promised behavior") rather than referenced live.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub quantize_mode: QuantizeMode,
    pub push_forward: bool,
    pub fade_range: usize,
    pub max_sync_drift: i64,
    pub round_mode: bool,
    pub overdub_feedback: f64,
    pub input_latency: i64,
    pub output_latency: i64,
    /// Playback/record speed for this loop's resamplers (spec §4.3), combining the `Speed`/`Rate`
    /// functions' octave/semitone/bend/stretch controls via `resampler::derive_speed`. `1.0`
    /// (the default) makes both of a track's resamplers degenerate to a bit-exact copy.
    pub speed: f64,
}

impl Default for Preset {
    fn default() -> Self {
        Self {
            quantize_mode: QuantizeMode::Off,
            push_forward: false,
            fade_range: crate::fade::DEFAULT_FADE_RANGE,
            max_sync_drift: 16,
            round_mode: true,
            overdub_feedback: 1.0,
            input_latency: 0,
            output_latency: 0,
            speed: 1.0,
        }
    }
}

/// Engine-wide configuration, applied at block boundaries only (spec §1 Non-goals: "no behavior
/// guarantee while reconfiguring; reconfiguration is coalesced at block boundaries").
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub block_size: usize,
    pub track_count: usize,
    pub default_preset: Preset,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            block_size: 256,
            track_count: 1,
            default_preset: Preset::default(),
        }
    }
}

/// Coalesces a pending config swap; applied once per block via [`take`](PendingConfig::take),
/// never mid-block.
#[derive(Default)]
pub struct PendingConfig {
    next: Option<EngineConfig>,
}

impl PendingConfig {
    pub fn request(&mut self, config: EngineConfig) {
        self.next = Some(config);
    }

    pub fn take(&mut self) -> Option<EngineConfig> {
        self.next.take()
    }
}

/// Raw MIDI input, drained from the lock-free queue at block start (spec §5: "a MIDI input thread
/// pushes raw MIDI events into a lock-free queue consumed at block start").
pub type IncomingMidi = Vec<MidiInputEvent>;
