//! A single sync tracker — host-beat input, MIDI-clock input, or internal output clock (spec
//! §4.7). `Synchronizer` owns three of these.
//!
//! No direct teacher analogue (REAPER supplies its own project-tempo clock and Playtime clips
//! don't track external MIDI/host pulses) — grounded instead in the spec's own derivation
//! ("Why this shape": deriving pulses from `loopFrames / loopPulses` rather than raw
//! floating-point pulse timestamps) and in the teacher's general style of small ring-buffer
//! averagers for jittery measurements (`base::hash_util` aside, this mirrors the shape of a
//! bounded sliding-window average anywhere else in the pack uses one: fixed capacity, no
//! reallocation, oldest sample evicted).

use base::{tracing_warn, AudioF64};
use looper_api::sync::{PulseType, SyncEvent, SyncSource};

const PULSE_WIDTH_WINDOW: usize = 96;

/// A fixed-capacity ring buffer averaging the last [`PULSE_WIDTH_WINDOW`] pulse widths.
#[derive(Clone, Debug)]
struct PulseWidthAverager {
    widths: [f64; PULSE_WIDTH_WINDOW],
    count: usize,
    next: usize,
}

impl PulseWidthAverager {
    fn new() -> Self {
        Self {
            widths: [0.0; PULSE_WIDTH_WINDOW],
            count: 0,
            next: 0,
        }
    }

    fn push(&mut self, width: f64) {
        self.widths[self.next] = width;
        self.next = (self.next + 1) % PULSE_WIDTH_WINDOW;
        self.count = (self.count + 1).min(PULSE_WIDTH_WINDOW);
    }

    fn average(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.widths[..self.count].iter().sum::<f64>() / self.count as f64
    }

    fn reset(&mut self) {
        self.count = 0;
        self.next = 0;
    }
}

/// Where a check for drift correction may fire (spec §4.7 "at each designated check-point").
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum DriftCheckPoint {
    LoopStart,
    ExternalStartPoint,
}

/// Commits this tracker becomes the authoritative timebase for (spec §4.7 "Locked").
#[derive(Clone, Copy, Debug)]
pub struct LockedParams {
    pub loop_frames: i64,
    pub loop_pulses: u32,
    pub beats_per_bar: u32,
    pub pulses_per_beat: u32,
    pub speed: f64,
}

/// One tracker's state: Unlocked (measuring) or Locked (authoritative).
pub struct SyncTracker {
    pub source: SyncSource,
    locked: Option<LockedParams>,
    averager: PulseWidthAverager,
    last_pulse_audio_frame: i64,
    pub audio_frame: i64,
    pulse: u32,
    pending_pulses: u32,
    drift_sum: f64,
    drift_samples: u32,
    pub correction_count: u32,
    stopped: bool,
    resize_pending: Option<LockedParams>,
    check_point: DriftCheckPoint,
}

impl SyncTracker {
    pub fn new(source: SyncSource) -> Self {
        Self {
            source,
            locked: None,
            averager: PulseWidthAverager::new(),
            last_pulse_audio_frame: -1,
            audio_frame: 0,
            pulse: 0,
            pending_pulses: 0,
            drift_sum: 0.0,
            drift_samples: 0,
            correction_count: 0,
            stopped: false,
            resize_pending: None,
            check_point: DriftCheckPoint::LoopStart,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.is_some()
    }

    pub fn locked_params(&self) -> Option<LockedParams> {
        self.locked
    }

    /// Records an incoming raw external pulse at `audio_frame`. While unlocked this only feeds
    /// the width averager; while locked it feeds drift measurement (spec §4.7 "Drift").
    pub fn record_pulse(&mut self, audio_frame: i64) {
        if self.last_pulse_audio_frame >= 0 {
            let width = (audio_frame - self.last_pulse_audio_frame) as f64;
            self.averager.push(width);
        }
        self.last_pulse_audio_frame = audio_frame;

        if let Some(locked) = self.locked {
            let pulse_frame = self.pulse as i64 * locked.loop_frames / locked.loop_pulses.max(1) as i64;
            let drift = signed_shortest_wrap(pulse_frame - self.audio_frame, locked.loop_frames);
            self.drift_sum += drift as f64;
            self.drift_samples += 1;
            self.pulse = (self.pulse + 1) % locked.loop_pulses.max(1);
        } else if self.pending_pulses > 0 {
            self.pending_pulses -= 1;
        }
    }

    /// Rounds `frames` down so each beat is an integer number of frames (spec §4.7 "prepare"),
    /// at most ~200 frames of adjustment.
    pub fn prepare(pulses: u32, frames: i64) -> i64 {
        if pulses == 0 {
            return frames;
        }
        let rounded = (frames / pulses as i64) * pulses as i64;
        if frames - rounded <= 200 {
            rounded
        } else {
            frames
        }
    }

    /// Commits the lock (spec §4.7 "lock"). If `origin_pulse` lands ahead of the last external
    /// pulse seen, the extra pending pulses are counted and ignored as they arrive; if it lands
    /// late, they carry forward into `pulse`.
    pub fn lock(&mut self, origin_pulse: u32, pulses: u32, frames: i64, speed: f64, beats_per_bar: u32) {
        let pulses_per_beat = if beats_per_bar > 0 { pulses / beats_per_bar.max(1) } else { pulses };
        if beats_per_bar > 0 {
            // Spec §7 sync anomaly: "fractional beat width". `pulses` doesn't evenly divide into
            // `beats_per_bar`; the integer `pulses_per_beat` above silently floors it, so flag the
            // loss rather than let bar-boundary detection drift unexplained.
            let exact = AudioF64::new(pulses as f64 / beats_per_bar as f64);
            let floored = AudioF64::new(pulses_per_beat as f64);
            if exact != floored {
                tracing_warn!(
                    pulses,
                    beats_per_bar,
                    source = ?self.source,
                    "fractional beat width: pulses don't evenly divide beats_per_bar, flooring"
                );
            }
        }
        self.locked = Some(LockedParams {
            loop_frames: frames,
            loop_pulses: pulses.max(1),
            beats_per_bar,
            pulses_per_beat: pulses_per_beat.max(1),
            speed,
        });
        self.pulse = origin_pulse % pulses.max(1);
        self.audio_frame = 0;
        self.averager.reset();
    }

    pub fn unlock(&mut self) {
        self.locked = None;
        self.pulse = 0;
        self.pending_pulses = 0;
    }

    pub fn average_pulse_width(&self) -> f64 {
        self.averager.average()
    }

    /// Derived-pulse generation for one block (spec §4.7 "advance"). Emits beat/bar `SyncEvent`s
    /// landing within `[audio_frame, audio_frame + frames)`, then advances `audio_frame` modulo
    /// `loopFrames`.
    pub fn advance(&mut self, frames: i64, out: &mut Vec<SyncEvent>) {
        let Some(locked) = self.locked else { return };
        if locked.loop_pulses == 0 {
            return;
        }
        let pulse_frames = locked.loop_frames as f64 / locked.loop_pulses as f64;
        if pulse_frames <= 0.0 {
            return;
        }
        let start_frame = self.audio_frame;
        let prev_pulse = ((start_frame - 1).max(-1) as f64 / pulse_frames).floor() as i64;
        let origin_pulse = (start_frame as f64 / pulse_frames).floor() as i64;
        let mut pulse_number = if start_frame == 0 || origin_pulse != prev_pulse {
            origin_pulse
        } else {
            prev_pulse
        }
        .max(0) as u32
            % locked.loop_pulses;

        let mut next_pulse_frame = (pulse_number as f64) * pulse_frames;
        while (next_pulse_frame as i64) < start_frame + frames {
            if pulse_number % locked.pulses_per_beat == 0 {
                let beat_number = pulse_number / locked.pulses_per_beat;
                let is_bar = locked.beats_per_bar > 0 && beat_number % locked.beats_per_bar == 0;
                let sync_start_point = pulse_number == 0;
                out.push(SyncEvent {
                    source: self.source,
                    kind: looper_api::sync::SyncEventKind::Pulse,
                    pulse_type: if is_bar { PulseType::Bar } else { PulseType::Beat },
                    pulse_number,
                    pulse_frame: next_pulse_frame.round() as u32,
                    sync_start_point,
                    sync_tracker_event: true,
                });
            }
            pulse_number = (pulse_number + 1) % locked.loop_pulses;
            next_pulse_frame += pulse_frames;
            // Snap the final pulse to loopFrames if float accumulation drifted off by one.
            if pulse_number == 0 && (next_pulse_frame - locked.loop_frames as f64).abs() < 1.0 {
                next_pulse_frame = locked.loop_frames as f64;
            }
        }

        self.audio_frame = (self.audio_frame + frames).rem_euclid(locked.loop_frames.max(1));
        if let Some(resize) = self.resize_pending.take() {
            self.apply_resize(resize);
        }
    }

    /// `START` restarts the tracker at pulse 0; treated as a pulse for recording-while-slaved
    /// cases (spec §4.7).
    pub fn on_start(&mut self) {
        self.pulse = 0;
        self.audio_frame = 0;
        self.last_pulse_audio_frame = -1;
        self.stopped = false;
        self.record_pulse(0);
    }

    /// `CONTINUE` jumps to a specified pulse, modulo `loopPulses`.
    pub fn on_continue(&mut self, pulse: u32) {
        if let Some(locked) = self.locked {
            self.pulse = pulse % locked.loop_pulses.max(1);
            self.audio_frame = (pulse as i64 * locked.loop_frames) / locked.loop_pulses.max(1) as i64;
        }
        self.last_pulse_audio_frame = -1;
        self.stopped = false;
    }

    pub fn on_stop(&mut self) {
        self.stopped = true;
        self.last_pulse_audio_frame = -1;
    }

    /// Requests an output-tracker resize, deferred until the next pulse (spec §4.7 "Output
    /// tracker resize") — a hardware constraint of many MIDI clock generators.
    pub fn request_resize(&mut self, pulses: u32, frames: i64, speed: f64) {
        if let Some(current) = self.locked {
            self.resize_pending = Some(LockedParams {
                loop_frames: frames,
                loop_pulses: pulses.max(1),
                beats_per_bar: current.beats_per_bar,
                pulses_per_beat: if current.beats_per_bar > 0 { pulses / current.beats_per_bar } else { pulses },
                speed,
            });
        }
    }

    fn apply_resize(&mut self, new_params: LockedParams) {
        if let Some(old) = self.locked {
            // Rescale audio_frame to preserve its fractional position, retaining drift.
            let fraction = self.audio_frame as f64 / old.loop_frames.max(1) as f64;
            self.audio_frame = (fraction * new_params.loop_frames as f64).round() as i64;
        }
        self.locked = Some(new_params);
    }

    pub fn average_drift(&self) -> f64 {
        if self.drift_samples == 0 {
            0.0
        } else {
            self.drift_sum / self.drift_samples as f64
        }
    }

    /// Checks accumulated drift against `max_drift` at a designated checkpoint (spec §4.7
    /// "Drift"); corrects `audio_frame` and resets the averager if the threshold is crossed.
    pub fn check_drift(&mut self, max_drift: i64, at: DriftCheckPoint) -> bool {
        if at != self.check_point {
            return false;
        }
        let Some(locked) = self.locked else { return false };
        let drift = self.average_drift().round() as i64;
        if drift.abs() > max_drift {
            self.audio_frame = wrap(self.audio_frame - drift, locked.loop_frames);
            self.drift_sum = 0.0;
            self.drift_samples = 0;
            self.correction_count += 1;
            tracing_warn!(drift, source = ?self.source, "sync tracker corrected drift");
            true
        } else {
            false
        }
    }

    /// Test/diagnostic hook equivalent to the spec's forced-drift test harness: injects a raw
    /// drift sample directly, bypassing `record_pulse`.
    pub fn force_drift(&mut self, drift: i64) {
        self.drift_sum += drift as f64;
        self.drift_samples += 1;
    }
}

fn signed_shortest_wrap(delta: i64, modulus: i64) -> i64 {
    if modulus <= 0 {
        return delta;
    }
    let half = modulus / 2;
    let wrapped = ((delta % modulus) + modulus) % modulus;
    if wrapped > half {
        wrapped - modulus
    } else {
        wrapped
    }
}

fn wrap(value: i64, modulus: i64) -> i64 {
    if modulus <= 0 {
        return value;
    }
    ((value % modulus) + modulus) % modulus
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locking_sets_authoritative_timebase() {
        let mut t = SyncTracker::new(SyncSource::Midi);
        assert!(!t.is_locked());
        t.lock(0, 96, 88200, 1.0, 4);
        assert!(t.is_locked());
        assert_eq!(t.locked_params().unwrap().loop_frames, 88200);
    }

    #[test]
    fn advance_emits_beats_summing_to_loop_frames() {
        let mut t = SyncTracker::new(SyncSource::Midi);
        t.lock(0, 96, 9600, 1.0, 4);
        let mut total_events = 0;
        let mut frame = 0;
        while frame < 9600 {
            let mut out = Vec::new();
            t.advance(100, &mut out);
            total_events += out.len();
            frame += 100;
        }
        // loopPulses / pulsesPerBeat beats over a full traversal (96 pulses / 24 per beat = 4).
        assert_eq!(total_events, 4);
    }

    #[test]
    fn drift_correction_crosses_threshold() {
        let mut t = SyncTracker::new(SyncSource::Out);
        t.lock(0, 96, 88200, 1.0, 4);
        t.audio_frame = 10000;
        t.force_drift(3000);
        let corrected = t.check_drift(16, DriftCheckPoint::LoopStart);
        assert!(corrected);
        assert_eq!(t.audio_frame, wrap(10000 - 3000, 88200));
        assert_eq!(t.correction_count, 1);
        assert_eq!(t.average_drift(), 0.0);
    }

    #[test]
    fn prepare_rounds_down_within_tolerance() {
        assert_eq!(SyncTracker::prepare(96, 88250), 88200);
    }

    #[test]
    fn stop_then_start_does_not_poison_averager() {
        let mut t = SyncTracker::new(SyncSource::Host);
        t.on_stop();
        t.on_start();
        assert_eq!(t.average_pulse_width(), 0.0);
    }
}
