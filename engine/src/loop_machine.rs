//! The loop state machine (spec §4.5): `Mode` and `Loop`.
//!
//! Mirrors the shape of the teacher's own mode-as-sum-type designs (e.g. `ClipPlayState` in the
//! processing layer): a closed enum of mutually exclusive states plus a driver that only ever
//! moves between them in response to named events, never via ad hoc flag-setting from unrelated
//! call sites.

use crate::layer::{Layer, LayerRef};
use base::tracing_warn;

/// A loop's current mode. Variants intentionally match the vocabulary performers and the EDP
/// lineage use, not generic recorder-state names.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Mode {
    Reset,
    Threshold,
    Synchronize,
    Record,
    Play,
    Overdub,
    Multiply,
    Insert,
    Replace,
    Substitute,
    /// Short retrigger of the loop's start, reachable from `Insert`'s undo path on the real
    /// device. No dedicated `Event`/`Function` drives it in this build; kept in the enum because
    /// spec §3 names it as part of `Loop.mode`'s closed set. See `DESIGN.md`.
    Stutter,
    Mute,
    Rehearse,
    Switch,
    /// The brief window where a pending `Switch` waits for `SwitchConfirmEvent`. `apply_event`
    /// still models this window as `Switch` itself (see the `(Switch, SwitchConfirmEvent)` arm);
    /// this variant is reserved for a future split of "waiting to switch" from "confirming".
    Confirm,
    /// Synonym for `Play` entered via host transport in the teacher's EDP lineage. Not
    /// distinguished from `Play` by any `Event` in this build's closed set.
    Run,
}

/// The event vocabulary that drives mode transitions. Every transition in the loop comes through
/// here; nothing reaches into `Loop` and sets `mode` directly.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum LoopEvent {
    RecordEvent,
    RecordStopEvent,
    MultiplyEvent,
    MultiplyEndEvent,
    MultiplyEndUnroundedEvent,
    InsertEvent,
    InsertEndEvent,
    ReplaceEvent,
    ReplaceEndEvent,
    SubstituteEvent,
    SubstituteEndEvent,
    OverdubEvent,
    OverdubEndEvent,
    MuteEvent,
    UnmuteEvent,
    ReverseEvent,
    SwitchEvent,
    SwitchConfirmEvent,
    RehearseEvent,
    RehearseEndEvent,
    /// Relocates the loop's effective frame 0 to the current playback frame (spec §4.4
    /// "Start-point relocation", §6 function `StartPoint`).
    StartPointEvent,
}

/// Destination for a function invocation that ends `Record` (spec table: "Play (or Rehearse,
/// Insert, Switch depending on invoking function)").
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum RecordEndTarget {
    Play,
    Rehearse,
    Insert,
    Switch,
}

impl Default for RecordEndTarget {
    fn default() -> Self {
        RecordEndTarget::Play
    }
}

pub struct Loop {
    pub play_layer: LayerRef,
    pub record_layer: Option<LayerRef>,
    pub mode: Mode,
    pub frame: i64,
    pub mode_start_frame: usize,
    pub frames: usize,
    pub cycles: u32,
    pub reverse: bool,
    pub recording: bool,
    pub muted: bool,
    pub next_layer_number: u32,
}

impl Loop {
    pub fn new_reset(channels: u16) -> Self {
        Self {
            play_layer: Layer::new_silent(channels, 0),
            record_layer: None,
            mode: Mode::Reset,
            frame: 0,
            mode_start_frame: 0,
            frames: 0,
            cycles: 0,
            reverse: false,
            recording: false,
            muted: false,
            next_layer_number: 1,
        }
    }

    fn next_layer(&mut self) -> u32 {
        let n = self.next_layer_number;
        self.next_layer_number += 1;
        n
    }

    /// `playFrame = (frame + outputLatency) mod frames` once steady-state playback is
    /// established (spec §4.5). Before that (frames == 0, still recording the first pass)
    /// `frame` itself is authoritative.
    pub fn play_frame(&self, output_latency: i64) -> i64 {
        if self.frames == 0 {
            return self.frame;
        }
        let frames = self.frames as i64;
        (((self.frame + output_latency) % frames) + frames) % frames
    }

    /// Advances `frame` by `delta` frames, in playback direction. Reversing negates the advance
    /// of both the frame counter and (by construction, since callers read `self.reverse` when
    /// stepping a cursor's fade) the fade direction for the following block.
    pub fn advance_frame(&mut self, delta: i64) {
        let step = if self.reverse { -delta } else { delta };
        self.frame += step;
        if self.frames > 0 {
            let frames = self.frames as i64;
            self.frame = ((self.frame % frames) + frames) % frames;
        }
    }

    fn shift(&mut self, feedback: f64) {
        let number = self.next_layer();
        let record_layer = self
            .record_layer
            .take()
            .unwrap_or_else(|| Layer::shift(&self.play_layer, feedback, number));
        self.play_layer = record_layer;
        self.record_layer = None;
    }

    /// Applies one event to the loop, following the transition table in spec §4.5. Unhandled
    /// event/mode combinations are silently ignored (the scheduler only dispatches events whose
    /// function is valid in the current mode; see `function::dispatch`).
    pub fn apply_event(&mut self, event: LoopEvent, end_target: RecordEndTarget) {
        use Mode::*;
        match (self.mode, event) {
            (Reset, LoopEvent::RecordEvent)
            | (Threshold, LoopEvent::RecordEvent)
            | (Synchronize, LoopEvent::RecordEvent) => {
                let number = self.next_layer();
                let channels = self.play_layer.borrow().channels_hint();
                self.record_layer = Some(Layer::new_silent(channels, number));
                self.frame = 0;
                self.mode_start_frame = 0;
                self.recording = true;
                self.mode = Record;
            }
            (Record, LoopEvent::RecordStopEvent) => {
                self.finalize_record_length();
                self.shift(1.0);
                self.frame = 0;
                self.recording = false;
                self.mode = match end_target {
                    RecordEndTarget::Play => Play,
                    RecordEndTarget::Rehearse => Rehearse,
                    RecordEndTarget::Insert => Insert,
                    RecordEndTarget::Switch => Switch,
                };
            }
            (Play, LoopEvent::MultiplyEvent) | (Overdub, LoopEvent::MultiplyEvent) => {
                self.mode_start_frame = self.frame.max(0) as usize;
                self.recording = true;
                self.mode = Multiply;
            }
            (Multiply, LoopEvent::MultiplyEndEvent) => {
                self.prune_and_shift_multiply(false);
                self.mode = Play;
            }
            (Multiply, LoopEvent::MultiplyEndUnroundedEvent) => {
                self.prune_and_shift_multiply(true);
                self.mode = Play;
            }
            (Play, LoopEvent::InsertEvent) | (Insert, LoopEvent::InsertEvent) => {
                self.mode_start_frame = self.frame.max(0) as usize;
                self.recording = true;
                self.mode = Insert;
            }
            (Insert, LoopEvent::InsertEndEvent) => {
                self.shift(1.0);
                self.recording = false;
                self.mode = Play;
            }
            (Play, LoopEvent::ReplaceEvent) => {
                self.mode_start_frame = self.frame.max(0) as usize;
                self.recording = true;
                self.mode = Replace;
            }
            (Replace, LoopEvent::ReplaceEndEvent) => {
                self.shift(1.0);
                self.recording = false;
                self.mode = Play;
            }
            (Play, LoopEvent::SubstituteEvent) => {
                self.mode_start_frame = self.frame.max(0) as usize;
                self.recording = true;
                self.mode = Substitute;
            }
            (Substitute, LoopEvent::SubstituteEndEvent) => {
                self.shift(1.0);
                self.recording = false;
                self.mode = Play;
            }
            (Play, LoopEvent::OverdubEvent) => {
                self.recording = true;
                self.mode = Overdub;
            }
            (Overdub, LoopEvent::OverdubEndEvent) => {
                self.shift(1.0);
                self.recording = false;
                self.mode = Play;
            }
            (Rehearse, LoopEvent::RehearseEndEvent) => {
                self.mode = Play;
            }
            (_, LoopEvent::MuteEvent) => {
                self.muted = true;
                self.mode = Mute;
            }
            (Mute, LoopEvent::UnmuteEvent) => {
                self.mode = Play;
            }
            (_, LoopEvent::StartPointEvent) => {
                self.apply_start_point();
            }
            (_, LoopEvent::ReverseEvent) => {
                self.reverse = !self.reverse;
            }
            (_, LoopEvent::SwitchEvent) => {
                self.mode = Switch;
            }
            (Switch, LoopEvent::SwitchConfirmEvent) => {
                self.mode = Play;
            }
            (Play, LoopEvent::RehearseEvent) => {
                self.mode = Rehearse;
            }
            _ => {
                tracing_warn!(?event, mode = ?self.mode, "loop event ignored in current mode");
            }
        }
    }

    /// Spec §4.4 "Start-point relocation": pre-shifts, then splits the new layer's single
    /// full-span segment so the current playback frame becomes the new frame 0. A no-op at
    /// frame 0 (spec §4.6 round-trip law "StartPoint at frame 0 is a no-op").
    fn apply_start_point(&mut self) {
        let target = self.frame.max(0) as usize;
        if target == 0 || self.frames == 0 {
            return;
        }
        self.shift(1.0);
        self.play_layer.borrow_mut().relocate_start_point(target);
        self.frame = 0;
    }

    fn finalize_record_length(&mut self) {
        if let Some(record_layer) = &self.record_layer {
            let frames = record_layer.borrow().frames;
            self.frames = frames;
            self.cycles = 1;
        }
    }

    /// Ends `Multiply`, either rounding the new length up to a whole number of cycles (a second
    /// `Multiply` call) or, for an unrounded ending (spec §4.4), trimming the record layer to the
    /// raw elapsed frame count via `Layer::splice` instead.
    fn prune_and_shift_multiply(&mut self, unrounded: bool) {
        let now = self.frame.max(0) as usize;
        let elapsed = now - self.mode_start_frame.min(now);
        if unrounded {
            if let Some(record_layer) = &self.record_layer {
                record_layer.borrow_mut().splice(self.mode_start_frame, elapsed, 1);
            }
            self.frames = elapsed;
            self.cycles = 1;
        } else {
            let cycle_len = if self.cycles > 0 {
                self.frames / self.cycles as usize
            } else {
                self.frames
            };
            if cycle_len > 0 {
                let added_cycles = ((elapsed + cycle_len - 1) / cycle_len).max(1) as u32;
                self.cycles += added_cycles;
                self.frames = self.cycles as usize * cycle_len;
            }
        }
        self.shift(1.0);
        self.recording = false;
    }
}

impl Layer {
    /// Exposes the channel count used to build this layer's local audio, for callers (like the
    /// loop machine allocating a sibling record layer) that only have a `LayerRef` in hand.
    pub fn channels_hint(&self) -> u16 {
        self.local_audio.channels()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_stop_enters_play_with_finalized_length() {
        let mut l = Loop::new_reset(1);
        l.apply_event(LoopEvent::RecordEvent, RecordEndTarget::Play);
        assert_eq!(l.mode, Mode::Record);
        assert!(l.recording);
        // simulate four recorded frames landing in the record layer
        {
            let rl = l.record_layer.as_ref().unwrap();
            let mut layer = rl.borrow_mut();
            let buf = crate::buffer::AudioBuf::new(&[0.1, 0.2, 0.3, 0.4], 1);
            layer.local_audio.put(0, &buf, crate::audio::PutOp::Replace);
            layer.frames = 4;
        }
        l.apply_event(LoopEvent::RecordStopEvent, RecordEndTarget::Play);
        assert_eq!(l.mode, Mode::Play);
        assert_eq!(l.frames, 4);
        assert!(!l.recording);
    }

    /// Spec §8 scenario 4 ("unrounded multiply"): multiplying, then ending via the
    /// alternate-ending function at frame 13000 (multiply started at frame 0), trims to the raw
    /// elapsed length rather than rounding up to the next whole cycle.
    #[test]
    fn unrounded_multiply_trims_to_raw_elapsed_frames() {
        let mut l = Loop::new_reset(1);
        l.frames = 10000;
        l.cycles = 2;
        l.mode = Mode::Play;
        l.frame = 0;
        l.apply_event(LoopEvent::MultiplyEvent, RecordEndTarget::Play);
        assert_eq!(l.mode, Mode::Multiply);
        assert_eq!(l.mode_start_frame, 0);

        l.frame = 13000;
        l.apply_event(LoopEvent::MultiplyEndUnroundedEvent, RecordEndTarget::Play);
        assert_eq!(l.mode, Mode::Play);
        assert_eq!(l.frames, 13000);
        assert_eq!(l.cycles, 1);
        assert!(!l.recording);
    }

    #[test]
    fn reverse_event_toggles_flag_regardless_of_mode() {
        let mut l = Loop::new_reset(1);
        assert!(!l.reverse);
        l.apply_event(LoopEvent::ReverseEvent, RecordEndTarget::Play);
        assert!(l.reverse);
        l.apply_event(LoopEvent::ReverseEvent, RecordEndTarget::Play);
        assert!(!l.reverse);
    }

    #[test]
    fn mute_is_available_from_any_mode() {
        let mut l = Loop::new_reset(1);
        l.apply_event(LoopEvent::MuteEvent, RecordEndTarget::Play);
        assert_eq!(l.mode, Mode::Mute);
    }

    #[test]
    fn play_frame_wraps_with_output_latency() {
        let mut l = Loop::new_reset(1);
        l.frames = 10;
        l.frame = 8;
        assert_eq!(l.play_frame(4), 2);
    }

    #[test]
    fn advance_frame_respects_reverse() {
        let mut l = Loop::new_reset(1);
        l.frames = 10;
        l.frame = 5;
        l.reverse = true;
        l.advance_frame(2);
        assert_eq!(l.frame, 3);
    }
}
