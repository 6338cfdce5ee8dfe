//! Converting a track's live runtime state to/from the wire-level persisted schema (spec §7).
//!
//! The live graph is `Rc<RefCell<Layer>>` nodes linked by `prev`; the persisted schema
//! ([`looper_api::persistence`]) is a flat, index-addressed `Vec<PersistedLayer>` (oldest first)
//! so it round-trips through serde without needing a graph-aware format. Saving walks
//! `Loop::play_layer`'s `prev` chain once to build that list and a pointer-to-index map; loading
//! rebuilds the `Rc` chain from the list in the same order.

use crate::layer::{Layer, LayerRef, Segment};
use crate::loop_machine::{Loop, Mode};
use crate::track::{Track, TrackControls};
use crate::{EngineError, EngineResult};
use looper_api::persistence::{
    check_schema_version, PersistedLayer, PersistedLoop, PersistedMode, PersistedSegment, PersistedTrack,
    PersistedTrackControls, VersionedDocument,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

type LayerIndex = HashMap<*const RefCell<Layer>, u32>;

/// Walks `layer`'s `prev` chain, oldest first. `layer` itself is included last.
fn chain_oldest_first(layer: &LayerRef) -> Vec<LayerRef> {
    let mut chain = Vec::new();
    let mut cursor = Some(layer.clone());
    while let Some(l) = cursor {
        cursor = l.borrow().prev.clone();
        chain.push(l);
    }
    chain.reverse();
    chain
}

fn mode_to_persisted(mode: Mode) -> PersistedMode {
    match mode {
        Mode::Reset | Mode::Threshold | Mode::Synchronize => PersistedMode::Reset,
        Mode::Overdub => PersistedMode::Overdub,
        Mode::Mute => PersistedMode::Mute,
        // Every other mode (Record, Multiply, Insert, Replace, Substitute, Stutter, Rehearse,
        // Switch, Confirm, Run) is a transient or in-flight state a save never happens to land
        // in (this module's doc: "never captures transient scheduler state"); fold it onto Play,
        // the nearest steady-state equivalent.
        _ => PersistedMode::Play,
    }
}

fn persisted_to_mode(mode: PersistedMode) -> Mode {
    match mode {
        PersistedMode::Reset => Mode::Reset,
        PersistedMode::Play => Mode::Play,
        PersistedMode::Overdub => Mode::Overdub,
        PersistedMode::Mute => Mode::Mute,
        // No longer a reachable engine mode (see `loop_machine::Mode`'s removed `Pause` variant).
        // A document written by a build that still emits it loads as Play, the nearest resting
        // equivalent, rather than rejecting the whole document over one stale field.
        PersistedMode::Pause => Mode::Play,
    }
}

fn layer_to_persisted(layer: &LayerRef, index_of: &LayerIndex) -> PersistedLayer {
    let l = layer.borrow();
    PersistedLayer {
        number: l.number,
        frames: l.frames as u32,
        cycles: l.cycles,
        audio: l.local_audio.to_persisted(),
        segments: l.segments.iter().map(|seg| segment_to_persisted(seg, index_of)).collect(),
        fade_left_deferred: l.fade_left_deferred,
        fade_right_deferred: l.fade_right_deferred,
    }
}

fn segment_to_persisted(seg: &Segment, index_of: &LayerIndex) -> PersistedSegment {
    let source_layer_index = *index_of
        .get(&Rc::as_ptr(&seg.source_layer))
        .expect("a segment's source layer is always reachable from the same loop's own chain");
    PersistedSegment {
        source_layer_index,
        source_start_frame: seg.source_start_frame as u32,
        dest_offset: seg.dest_offset as u32,
        frames: seg.frames as u32,
        fade_left: seg.fade_left,
        fade_right: seg.fade_right,
        local_copy_left: seg.local_copy_left,
        local_copy_right: seg.local_copy_right,
        feedback: seg.feedback,
    }
}

/// Flattens `loop_`'s layer chain (spec §3 `Layer.prev`) into save form. Only the committed
/// `play_layer` chain is captured; a layer mid-recording (`Loop::record_layer`, not yet shifted
/// into the chain) isn't part of any loop's committed content yet and is dropped.
pub fn loop_to_persisted(loop_: &Loop) -> PersistedLoop {
    let chain = chain_oldest_first(&loop_.play_layer);
    let index_of: LayerIndex = chain.iter().enumerate().map(|(i, l)| (Rc::as_ptr(l), i as u32)).collect();
    PersistedLoop {
        layers: chain.iter().map(|l| layer_to_persisted(l, &index_of)).collect(),
        cycles: loop_.cycles,
        frames: loop_.frames as u32,
        mode_at_save: mode_to_persisted(loop_.mode),
    }
}

/// Rebuilds a loop's `Rc<RefCell<Layer>>` chain from its persisted, index-addressed form.
/// Validates the document first (spec §3 `Layer.number` uniqueness, segment indices referencing
/// only strictly earlier layers) so a corrupt or hand-edited file is rejected before any `Rc` is
/// built, rather than panicking partway through.
pub fn loop_from_persisted(persisted: &PersistedLoop, channels: u16) -> EngineResult<Loop> {
    persisted.validate().map_err(EngineError::InvalidPersistedLoop)?;
    let mut built: Vec<LayerRef> = Vec::with_capacity(persisted.layers.len());
    for entry in &persisted.layers {
        let layer = Layer::new_silent(channels, entry.number);
        {
            let mut l = layer.borrow_mut();
            l.local_audio = crate::audio::Audio::from_persisted(&entry.audio);
            l.frames = entry.frames as usize;
            l.cycles = entry.cycles;
            l.fade_left_deferred = entry.fade_left_deferred;
            l.fade_right_deferred = entry.fade_right_deferred;
            l.prev = built.last().cloned();
            l.segments = entry
                .segments
                .iter()
                .map(|seg| Segment {
                    // in-bounds and strictly-earlier are both guaranteed by `validate()` above.
                    source_layer: built[seg.source_layer_index as usize].clone(),
                    source_start_frame: seg.source_start_frame as usize,
                    dest_offset: seg.dest_offset as usize,
                    frames: seg.frames as usize,
                    fade_left: seg.fade_left,
                    fade_right: seg.fade_right,
                    local_copy_left: seg.local_copy_left,
                    local_copy_right: seg.local_copy_right,
                    feedback: seg.feedback,
                })
                .collect();
        }
        built.push(layer);
    }
    let play_layer = built.last().cloned().unwrap_or_else(|| Layer::new_silent(channels, 0));
    let next_layer_number = persisted.layers.iter().map(|l| l.number).max().map_or(1, |n| n + 1);
    let mut loop_ = Loop::new_reset(channels);
    loop_.play_layer = play_layer;
    loop_.frames = persisted.frames as usize;
    loop_.cycles = persisted.cycles;
    loop_.mode = persisted_to_mode(persisted.mode_at_save);
    loop_.next_layer_number = next_layer_number;
    Ok(loop_)
}

fn controls_to_persisted(controls: &TrackControls) -> PersistedTrackControls {
    PersistedTrackControls {
        input_level: controls.input_level,
        output_level: controls.output_level,
        feedback: controls.feedback,
        pan: controls.pan,
    }
}

fn controls_from_persisted(persisted: &PersistedTrackControls) -> TrackControls {
    TrackControls {
        input_level: persisted.input_level,
        output_level: persisted.output_level,
        feedback: persisted.feedback,
        pan: persisted.pan,
    }
}

/// Saves one track's current loop and controls as a document ready to serialize (spec §7
/// "Persistence"). A track only ever has one live `Loop` in this build (no loop-slot switching),
/// so `PersistedTrack::loops` always comes back with exactly one entry at index 0.
pub fn save_track(track: &Track) -> VersionedDocument<PersistedTrack> {
    VersionedDocument::new(PersistedTrack {
        loops: vec![loop_to_persisted(&track.loop_)],
        active_loop_index: 0,
        controls: Some(controls_to_persisted(&track.controls)),
        unknown_props: Default::default(),
    })
}

/// Loads a document into a fresh `Track`, checking the schema envelope and the loop content
/// before touching anything (spec §7: an unreadable document must not leave a track half
/// restored).
pub fn load_track(document: &VersionedDocument<PersistedTrack>, channels: u16) -> EngineResult<Track> {
    check_schema_version(document.schema_version)?;
    let persisted = &document.payload;
    let loop_index = persisted.active_loop_index as usize;
    let persisted_loop = persisted
        .loops
        .get(loop_index)
        .ok_or(EngineError::TrackIndexOutOfRange(loop_index))?;
    let loop_ = loop_from_persisted(persisted_loop, channels)?;
    let mut track = Track::new(channels);
    track.loop_ = loop_;
    if let Some(controls) = &persisted.controls {
        track.controls = controls_from_persisted(controls);
    }
    Ok(track)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{Audio, PutOp};
    use crate::buffer::{AudioBuf, OwnedAudioBuffer};

    fn filled_layer(channels: u16, number: u32, samples: &[f32]) -> LayerRef {
        let layer = Layer::new_silent(channels, number);
        {
            let mut l = layer.borrow_mut();
            let buf = AudioBuf::new(samples, channels as usize);
            l.local_audio.put(0, &buf, PutOp::Replace);
            l.frames = buf.frame_count();
        }
        layer
    }

    #[test]
    fn single_layer_loop_round_trips() {
        let mut loop_ = Loop::new_reset(1);
        loop_.play_layer = filled_layer(1, 0, &[1.0, 2.0, 3.0, 4.0]);
        loop_.frames = 4;
        loop_.cycles = 1;
        loop_.mode = Mode::Play;

        let persisted = loop_to_persisted(&loop_);
        assert_eq!(persisted.layers.len(), 1);
        assert_eq!(persisted.mode_at_save, PersistedMode::Play);

        let restored = loop_from_persisted(&persisted, 1).unwrap();
        assert_eq!(restored.frames, 4);
        assert_eq!(restored.mode, Mode::Play);
        let mut out = OwnedAudioBuffer::new(1, 4);
        restored.play_layer.borrow().read_into(0, &mut out.to_buf_mut());
        assert_eq!(out.to_buf().data(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn shifted_chain_preserves_segment_reference_by_index() {
        let base = filled_layer(1, 0, &[1.0, 2.0, 3.0, 4.0]);
        let shifted = Layer::shift(&base, 1.0, 1);
        let mut loop_ = Loop::new_reset(1);
        loop_.play_layer = shifted;
        loop_.frames = 4;
        loop_.cycles = 1;
        loop_.mode = Mode::Overdub;

        let persisted = loop_to_persisted(&loop_);
        assert_eq!(persisted.layers.len(), 2);
        assert_eq!(persisted.layers[1].segments[0].source_layer_index, 0);

        let restored = loop_from_persisted(&persisted, 1).unwrap();
        assert_eq!(restored.mode, Mode::Overdub);
        let mut out = OwnedAudioBuffer::new(1, 4);
        restored.play_layer.borrow().read_into(0, &mut out.to_buf_mut());
        assert_eq!(out.to_buf().data(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(restored.next_layer_number, 2);
    }

    #[test]
    fn corrupt_segment_index_is_rejected_not_panicked() {
        let mut persisted = PersistedLoop {
            layers: vec![PersistedLayer {
                number: 0,
                frames: 2,
                cycles: 1,
                audio: Audio::new(1).to_persisted(),
                segments: vec![PersistedSegment {
                    source_layer_index: 0,
                    source_start_frame: 0,
                    dest_offset: 0,
                    frames: 2,
                    fade_left: false,
                    fade_right: false,
                    local_copy_left: false,
                    local_copy_right: false,
                    feedback: 1.0,
                }],
                fade_left_deferred: false,
                fade_right_deferred: false,
            }],
            cycles: 1,
            frames: 2,
            mode_at_save: PersistedMode::Play,
        };
        assert!(loop_from_persisted(&persisted, 1).is_err());
        persisted.layers[0].segments.clear();
        assert!(loop_from_persisted(&persisted, 1).is_ok());
    }

    #[test]
    fn save_then_load_round_trips_a_track() {
        let mut track = Track::new(1);
        track.loop_.play_layer = filled_layer(1, 0, &[0.5, -0.5]);
        track.loop_.frames = 2;
        track.loop_.cycles = 1;
        track.loop_.mode = Mode::Play;
        track.controls.output_level = 0.5;

        let document = save_track(&track);
        let restored = load_track(&document, 1).unwrap();
        assert_eq!(restored.loop_.frames, 2);
        assert_eq!(restored.controls.output_level, 0.5);
    }
}
