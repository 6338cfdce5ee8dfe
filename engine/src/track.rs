//! A single track (spec §4.8, §5): one [`Loop`], its [`Scheduler`], sync reference, resamplers,
//! and the per-track critical section non-interrupt threads take to mutate the scheduler.
//!
//! Grounded in the teacher's `mutex_util::non_blocking_lock`: spec §5 calls for "a per-track
//! critical section" for scheduler mutation from non-interrupt threads, while the interrupt
//! thread itself never contends for it (single writer for in-block changes). A `try_lock`-based
//! guard that panics on contention is exactly the right tool — the interrupt thread must never
//! block, so if it ever *did* contend here, panicking loudly during development is preferable to
//! silently stalling in production.

use crate::audio::PutOp;
use crate::buffer::{AudioBufMut, OwnedAudioBuffer};
use crate::config::{Preset, QuantizeMode};
use crate::diagnostics::{Diagnostics, Severity};
use crate::function;
use crate::loop_machine::{Loop, Mode};
use crate::mutex_util::non_blocking_lock;
use crate::resampler::Resampler;
use crate::scheduler::{NextEvent, Scheduler};
use crate::synchronizer::TrackSyncState;
use looper_api::action::Action;
use looper_api::sync::SyncEvent;
use std::sync::Mutex;

pub struct TrackControls {
    pub input_level: f64,
    pub output_level: f64,
    pub feedback: f64,
    pub pan: f64,
}

impl Default for TrackControls {
    fn default() -> Self {
        Self {
            input_level: 1.0,
            output_level: 1.0,
            feedback: 1.0,
            pan: 0.0,
        }
    }
}

/// One track's full runtime state. `scheduler` is wrapped in a `Mutex` purely to give
/// non-interrupt threads (control-thread event posting) a critical section; the interrupt thread
/// accesses it through [`Self::scheduler_for_interrupt`], which always succeeds immediately since
/// it is the sole writer during a block.
pub struct Track {
    pub loop_: Loop,
    scheduler: Mutex<Scheduler>,
    pub sync_state: TrackSyncState,
    pub controls: TrackControls,
    pub preset: Preset,
    pub input_resampler: Resampler,
    pub output_resampler: Resampler,
    pub diagnostics: Diagnostics,
    channels: u16,
}

impl Track {
    pub fn new(channels: u16) -> Self {
        Self {
            loop_: Loop::new_reset(channels),
            scheduler: Mutex::new(Scheduler::new()),
            sync_state: TrackSyncState::default(),
            controls: TrackControls::default(),
            preset: Preset::default(),
            input_resampler: Resampler::new(channels as usize),
            output_resampler: Resampler::new(channels as usize),
            diagnostics: Diagnostics::new(),
            channels,
        }
    }

    /// Used by a non-interrupt thread (control surface, script) to post an action. Takes the
    /// per-track critical section.
    pub fn post_action(&mut self, action: Action, now: i64) {
        let mut scheduler = non_blocking_lock(&self.scheduler, "track scheduler (post_action)");
        function::dispatch(&mut self.loop_, &mut scheduler, action, now, self.subcycle_frames(), self.preset.clone());
    }

    fn subcycle_frames(&self) -> usize {
        if self.loop_.cycles == 0 {
            return self.loop_.frames;
        }
        let cycle_frames = self.loop_.frames / self.loop_.cycles as usize;
        // A subcycle defaults to an eighth of a cycle; overridable would require exposing it on
        // `Preset`, which isn't needed by anything implemented here yet.
        (cycle_frames / 8).max(1)
    }

    /// Queues sync events derived earlier in the block for this track's source, if any (spec
    /// §4.8 step 3).
    pub fn push_sync_events(&self, events: impl IntoIterator<Item = SyncEvent>) {
        let mut scheduler = non_blocking_lock(&self.scheduler, "track scheduler (push_sync_events)");
        scheduler.push_sync_events(events);
    }

    /// Runs this track's portion of one audio block: repeatedly selects the next event, advances
    /// playback up to it, and applies its effect (spec §4.8 step 4). Reads `input` and mixes into
    /// `output`, both already resampled to the block's native frame count by the caller.
    pub fn process_block(&mut self, input: &OwnedAudioBuffer, output: &mut AudioBufMut, block_start: i64, len: i64) {
        let loop_frames = self.loop_.frames as i64;
        let cycle_frames = if self.loop_.cycles > 0 {
            loop_frames / self.loop_.cycles as i64
        } else {
            loop_frames
        };
        // Computed once up front so the per-iteration locking below only ever needs disjoint
        // field borrows of `self`, never a whole-`self` method call while a field lock is held.
        let subcycle_frames = self.subcycle_frames();
        let preset = self.preset.clone();
        let mut processed = 0i64;
        while processed < len {
            let remaining = len - processed;
            let next;
            let consume_until;
            {
                let mut scheduler = non_blocking_lock(&self.scheduler, "track scheduler (interrupt)");
                next = scheduler.next_event(
                    block_start + processed,
                    remaining,
                    loop_frames,
                    cycle_frames,
                    subcycle_frames as i64,
                );
                consume_until = match &next {
                    NextEvent::Scheduled(idx) => scheduler
                        .event(*idx)
                        .and_then(|e| e.frame)
                        .map(|f| (f - (block_start + processed)).clamp(0, remaining))
                        .unwrap_or(remaining),
                    _ => remaining,
                };
            }

            // `render_frames` returns how many *source* (loop-domain) frames it actually advanced
            // through, which equals `consume_until` only at unity speed — a speed-shifted
            // resampler consumes source frames faster or slower than the host's block clock, so
            // the loop's own play position must advance by the resampled count, not the host one
            // (spec §4.3; event/scheduler timing stays in host-block-domain, untouched).
            let source_advance = self.render_frames(input, output, processed as usize, consume_until as usize);
            self.loop_.advance_frame(source_advance);
            processed += consume_until;

            match next {
                NextEvent::Scheduled(idx) => {
                    let mut scheduler = non_blocking_lock(&self.scheduler, "track scheduler (interrupt)");
                    apply_scheduled_event(
                        &mut self.loop_,
                        &mut self.diagnostics,
                        preset.clone(),
                        subcycle_frames,
                        &mut scheduler,
                        idx,
                    );
                }
                NextEvent::Boundary(_) | NextEvent::Sync(_) => {
                    // Pseudo/sync events only affect scheduling bookkeeping, already consumed by
                    // `next_event`; nothing further to apply here.
                }
                NextEvent::None => {
                    if consume_until == 0 {
                        break;
                    }
                }
            }
        }
    }

    /// Renders `frames` host-domain (destination) samples into `output`, reading and writing the
    /// loop's layers through this track's resamplers (spec §4.3). Returns how many *source*
    /// (loop-domain) frames were actually consumed from `play_layer` — equal to `frames` only at
    /// unity speed, where both resamplers degenerate to a bit-exact copy.
    fn render_frames(&mut self, input: &OwnedAudioBuffer, output: &mut AudioBufMut, offset: usize, frames: usize) -> i64 {
        if frames == 0 {
            return 0;
        }
        let speed = self.preset.speed;
        self.output_resampler.set_speed(speed);
        self.input_resampler.set_speed(speed);

        let n_src =
            Resampler::scale_to_source_frames(self.output_resampler.speed(), self.output_resampler.threshold(), frames)
                .max(1);
        let mut raw = OwnedAudioBuffer::new(self.channels as usize, n_src);
        self.loop_
            .play_layer
            .borrow()
            .read_into(self.loop_.frame.max(0) as usize, &mut raw.to_buf_mut());
        let mut scratch = OwnedAudioBuffer::new(self.channels as usize, frames);
        self.output_resampler
            .resample(raw.to_buf().data(), n_src, scratch.to_buf_mut().data_mut(), frames);

        let level = if self.loop_.muted { 0.0 } else { self.controls.output_level };
        scratch.to_buf_mut().modify_samples(|_, _, s| s * level as f32);
        output.slice_mut(offset..offset + frames).mix_from(&scratch.to_buf());

        if self.loop_.recording {
            if let Some(record_layer) = &self.loop_.record_layer {
                let mut layer = record_layer.borrow_mut();
                let input_slice = input.to_buf().slice(offset..offset + frames);
                let mut resampled_in = OwnedAudioBuffer::new(self.channels as usize, n_src);
                self.input_resampler
                    .resample(input_slice.data(), frames, resampled_in.to_buf_mut().data_mut(), n_src);
                crate::layer::write_local(&mut layer, self.loop_.frame.max(0) as usize, &resampled_in.to_buf(), PutOp::Add);
            }
        }
        n_src as i64
    }

    pub fn undo(&mut self) {
        let mut scheduler = non_blocking_lock(&self.scheduler, "track scheduler (undo)");
        scheduler.undo();
    }

    pub fn is_sync_eligible_master(&self) -> bool {
        self.loop_.mode != Mode::Reset
    }

    pub fn set_quantize_mode(&mut self, mode: QuantizeMode) {
        self.preset.quantize_mode = mode;
    }
}

/// Applies one already-selected event's effect. A free function rather than a `Track` method so
/// its `loop_`/`diagnostics`/`scheduler` parameters stay disjoint borrows of `Track`'s fields at
/// the call site, instead of an opaque `&mut self` that would conflict with the already-held
/// scheduler lock guard.
fn apply_scheduled_event(
    loop_: &mut Loop,
    diagnostics: &mut Diagnostics,
    preset: Preset,
    subcycle_frames: usize,
    scheduler: &mut Scheduler,
    idx: crate::pool::PoolIndex,
) {
    let Some(event) = scheduler.event(idx) else { return };
    if event.function.is_none() && !event.kind.is_jump() {
        diagnostics.report(
            Severity::Anomaly,
            "track.apply_scheduled_event.null_function",
            "event function was null at execution time, skipping",
        );
        scheduler.mark_processed(idx);
        return;
    }
    let kind = event.kind;
    let end_target = event.end_target;
    scheduler.mark_processed(idx);
    if kind.reschedules() {
        let deferred = scheduler.take_rescheduled();
        for deferred_idx in deferred {
            // Nearest-first reissue: re-run through the same dispatch the original function used,
            // now that the mode-ending event it was waiting behind has executed.
            if let Some(action) = scheduler.event_mut(deferred_idx).and_then(|e| e.action.take()) {
                let now = loop_.frame;
                function::dispatch(loop_, scheduler, action, now, subcycle_frames, preset.clone());
            }
            scheduler.force_free(deferred_idx);
        }
    }
    // The transition itself only happens here, once the event has actually fired at its
    // quantized frame (spec §4.6) — never at schedule time in `function::dispatch`.
    if let Some(loop_event) = function::loop_event_for_kind(kind) {
        loop_.apply_event(loop_event, end_target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use looper_api::action::{Function, Trigger};

    fn action(function: Function) -> Action {
        Action {
            function,
            trigger: Trigger::Internal,
            trigger_id: 0,
            track_target: None,
            down_edge: true,
            sustain_long: false,
            argument: None,
        }
    }

    fn run_block(track: &mut Track, block_start: i64, len: usize) {
        let input = OwnedAudioBuffer::new(1, len);
        let mut output = OwnedAudioBuffer::new(1, len);
        track.process_block(&input, &mut output.to_buf_mut(), block_start, len as i64);
    }

    #[test]
    fn post_action_record_enters_record_mode_once_the_event_fires() {
        let mut track = Track::new(1);
        track.post_action(action(Function::Record), 0);
        // QuantizeMode::Off schedules the event at `now` itself, but the transition only lands
        // once `process_block` actually reaches that frame (spec §4.6) — not at post_action time.
        assert_eq!(track.loop_.mode, Mode::Reset);
        run_block(&mut track, 0, 64);
        assert_eq!(track.loop_.mode, Mode::Record);
    }

    #[test]
    fn undo_removes_last_scheduled_event() {
        let mut track = Track::new(1);
        track.post_action(action(Function::Record), 0);
        run_block(&mut track, 0, 64);
        assert_eq!(track.loop_.mode, Mode::Record);
        track.post_action(action(Function::Record), 64);
        track.undo();
        run_block(&mut track, 64, 64);
        assert_eq!(track.loop_.mode, Mode::Record);
    }

    #[test]
    fn is_sync_eligible_master_false_when_reset() {
        let track = Track::new(1);
        assert!(!track.is_sync_eligible_master());
    }
}
