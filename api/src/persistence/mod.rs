//! Persisted state: what gets saved for a project and loaded back.
//!
//! This is intentionally a much smaller surface than the live engine's in-memory graph. A
//! persisted layer keeps just enough to reconstruct the copy-on-write content chain and the
//! loop's playback position at the moment of save; it never captures transient scheduler state
//! (events, in-flight jumps) since those don't survive a save/load cycle by design.

mod serialization;
pub use serialization::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level persisted document for one track.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PersistedTrack {
    pub loops: Vec<PersistedLoop>,
    pub active_loop_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controls: Option<PersistedTrackControls>,
    /// Properties written by a newer version of the engine that this version doesn't understand.
    /// Round-tripped verbatim so an older build doesn't silently drop them on re-save.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub unknown_props: BTreeMap<String, serde_json::Value>,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTrackControls {
    pub input_level: f64,
    pub output_level: f64,
    pub feedback: f64,
    pub pan: f64,
}

impl Default for PersistedTrackControls {
    fn default() -> Self {
        Self {
            input_level: 1.0,
            output_level: 1.0,
            feedback: 1.0,
            pan: 0.0,
        }
    }
}

/// One loop slot's persisted chain of layers plus the bookkeeping needed to resume playback.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PersistedLoop {
    /// The chain of layers from oldest (index 0, the bottom of the undo stack) to the layer
    /// active at save time (the last element).
    pub layers: Vec<PersistedLayer>,
    pub cycles: u32,
    pub frames: u32,
    pub mode_at_save: PersistedMode,
}

impl PersistedLoop {
    /// Layer `number`s must be unique within a chain (spec §3 `Layer`: "`number` (monotonic
    /// id)") — a file with a collision is corrupt or was hand-edited, and loading it would leave
    /// two `Segment`s unable to tell their source layers apart by index.
    pub fn validate(&self) -> Result<(), base::validation_util::ValidationError> {
        base::validation_util::ensure_no_duplicate("layer numbers", self.layers.iter().map(|l| l.number))?;
        for (i, layer) in self.layers.iter().enumerate() {
            for seg in &layer.segments {
                base::validation_util::ensure(
                    (seg.source_layer_index as usize) < i,
                    format!(
                        "layer {} (index {i}) has a segment referencing source_layer_index {}, \
                         which is not a strictly earlier layer in the chain",
                        layer.number, seg.source_layer_index
                    ),
                )?;
            }
        }
        Ok(())
    }
}

/// A frozen snapshot of a [`Layer`](crate) content node: its own recorded audio plus the
/// segments it borrows from earlier layers in the same chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PersistedLayer {
    pub number: u32,
    pub frames: u32,
    pub cycles: u32,
    pub audio: PersistedAudio,
    pub segments: Vec<PersistedSegment>,
    pub fade_left_deferred: bool,
    pub fade_right_deferred: bool,
}

/// A reference from one persisted layer into a frame range of an earlier one, indexed by
/// position within [`PersistedLoop::layers`] rather than by pointer.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PersistedSegment {
    pub source_layer_index: u32,
    pub source_start_frame: u32,
    pub dest_offset: u32,
    pub frames: u32,
    pub fade_left: bool,
    pub fade_right: bool,
    pub local_copy_left: bool,
    pub local_copy_right: bool,
    pub feedback: f64,
}

/// Raw sample content for one layer's local increment. Stored as base64-encoded interleaved
/// float32 rather than a nested array so common serde formats (JSON, MessagePack) stay compact.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PersistedAudio {
    pub frames: u32,
    pub channels: u16,
    #[serde(with = "base64_samples")]
    pub samples: Vec<f32>,
}

impl Default for PersistedAudio {
    fn default() -> Self {
        Self {
            frames: 0,
            channels: 2,
            samples: Vec::new(),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PersistedMode {
    #[default]
    Reset,
    Play,
    Overdub,
    Mute,
    Pause,
}

/// Matches the teacher's own `playtime-api` persistence module: URL-safe, unpadded base64 for
/// binary blobs embedded in an otherwise-textual (JSON/MessagePack) document.
mod base64_samples {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_ENGINE;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(samples: &[f32], serializer: S) -> Result<S::Ok, S::Error> {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        BASE64_ENGINE.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f32>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = BASE64_ENGINE.decode(encoded).map_err(serde::de::Error::custom)?;
        if bytes.len() % 4 != 0 {
            return Err(serde::de::Error::custom(
                "persisted sample payload length not a multiple of 4",
            ));
        }
        let samples = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_round_trips_through_json() {
        let audio = PersistedAudio {
            frames: 4,
            channels: 2,
            samples: vec![0.0, 0.25, -0.5, 1.0, -1.0, 0.125, 0.0, 0.0],
        };
        let json = serde_json::to_string(&audio).unwrap();
        let back: PersistedAudio = serde_json::from_str(&json).unwrap();
        assert_eq!(audio.samples, back.samples);
    }

    #[test]
    fn unknown_props_round_trip() {
        let mut track = PersistedTrack::default();
        track
            .unknown_props
            .insert("futureFlag".to_string(), serde_json::json!(true));
        let json = serde_json::to_string(&track).unwrap();
        let back: PersistedTrack = serde_json::from_str(&json).unwrap();
        assert_eq!(back.unknown_props.get("futureFlag"), Some(&serde_json::json!(true)));
    }
}
