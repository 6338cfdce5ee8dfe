//! Ramp tables and the fade engine (spec §4.1).
//!
//! Grounded in the teacher's `supplier::Fader`/`supplier::looper::calc_volume_factor_at`: a fixed
//! fade length, computed as a fraction of frames traversed. The teacher bakes `FADE_LENGTH` in as
//! a `const`; this generalizes it to a runtime-configurable range (still bounded the way the
//! spec requires) since different presets may want different fade lengths, and caches the
//! computed table per distinct range so repeated loops with the same fade length share one.

use base::hash_util::NonCryptoHashMap;
use std::sync::{Arc, Mutex};

pub const MIN_FADE_RANGE: usize = 32;
pub const MAX_FADE_RANGE: usize = 1024;
pub const DEFAULT_FADE_RANGE: usize = 128;

/// A precomputed `ramp[i] = (i / (range - 1))^2` "squared" curve. Up-fades read it forward,
/// down-fades read it reversed.
#[derive(Clone, Debug)]
pub struct RampTable {
    range: usize,
    values: Arc<[f64]>,
}

static TABLE_CACHE: Mutex<Option<NonCryptoHashMap<usize, Arc<[f64]>>>> = Mutex::new(None);

impl RampTable {
    /// Returns the table for `range`, building and caching it on first use. Clamped into
    /// `[MIN_FADE_RANGE, MAX_FADE_RANGE]`.
    pub fn get(range: usize) -> Self {
        let range = range.clamp(MIN_FADE_RANGE, MAX_FADE_RANGE);
        let mut guard = TABLE_CACHE.lock().unwrap();
        let cache = guard.get_or_insert_with(Default::default);
        let values = cache
            .entry(range)
            .or_insert_with(|| build_table(range))
            .clone();
        Self { range, values }
    }

    pub fn range(&self) -> usize {
        self.range
    }

    /// Reads the curve at `i` (0-based), forward for an up-fade, reversed for a down-fade.
    pub fn read(&self, i: usize, up: bool) -> f64 {
        let i = i.min(self.range - 1);
        if up {
            self.values[i]
        } else {
            self.values[self.range - 1 - i]
        }
    }
}

fn build_table(range: usize) -> Arc<[f64]> {
    (0..range)
        .map(|i| {
            let x = i as f64 / (range - 1) as f64;
            x * x
        })
        .collect()
}

/// Multiplies a single sample by the ramp at `i`, optionally blended with a base level:
/// `adjusted = ramp[i] + (base - base*ramp[i])`. Used when the faded content will later be mixed
/// against a feedback-attenuated copy of itself (so the fade doesn't dip below the base level).
pub fn fade_sample(table: &RampTable, i: usize, up: bool, base_level: f64, sample: f32) -> f32 {
    let r = table.read(i, up);
    let adjusted = r + (base_level - base_level * r);
    sample * adjusted as f32
}

/// Fade lifecycle state, matching spec §4.1: Disabled → Enabled → Active → done.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum FadeState {
    Disabled,
    Enabled,
    Active,
}

/// A single fade in progress (or configured but not yet triggered) on one edge of an audio
/// stream.
#[derive(Clone, Debug)]
pub struct Fade {
    state: FadeState,
    start_frame: i64,
    up: bool,
    processed: usize,
    base_level: f64,
    table: RampTable,
}

impl Fade {
    pub fn disabled(range: usize) -> Self {
        Self {
            state: FadeState::Disabled,
            start_frame: 0,
            up: true,
            processed: 0,
            base_level: 0.0,
            table: RampTable::get(range),
        }
    }

    pub fn enable(&mut self, start_frame: i64, up: bool, base_level: f64) {
        self.state = FadeState::Enabled;
        self.start_frame = start_frame;
        self.up = up;
        self.processed = 0;
        self.base_level = base_level;
    }

    /// Jumps directly to `Active` with a starting offset, skipping the `Enabled` wait.
    pub fn activate(&mut self, offset: usize, up: bool) {
        self.state = FadeState::Active;
        self.up = up;
        self.processed = offset;
    }

    pub fn disable(&mut self) {
        self.state = FadeState::Disabled;
        self.processed = 0;
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.state, FadeState::Disabled)
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, FadeState::Active)
    }

    pub fn is_done(&self) -> bool {
        self.is_active() && self.processed >= self.table.range()
    }

    /// Advances `processed` by one frame in playback direction `reverse`. Transitions
    /// `Enabled` → `Active` the instant `frame` crosses `start_frame`.
    pub fn inc(&mut self, frame: i64, reverse: bool) {
        match self.state {
            FadeState::Disabled => {}
            FadeState::Enabled => {
                let crossed = if reverse {
                    frame <= self.start_frame
                } else {
                    frame >= self.start_frame
                };
                if crossed {
                    self.state = FadeState::Active;
                    self.processed = 0;
                }
            }
            FadeState::Active => {
                self.processed += 1;
                if self.processed >= self.table.range() {
                    self.state = FadeState::Disabled;
                }
            }
        }
    }

    /// Applies the fade to one sample if active, identity otherwise.
    pub fn apply(&self, sample: f32) -> f32 {
        if !self.is_active() {
            return sample;
        }
        fade_sample(&self.table, self.processed, self.up, self.base_level, sample)
    }
}

/// Applies a block fade in-place: an offset into `samples` (frame-major, `channels` wide), a
/// frame count, a direction, and an optional amplitude adjust used when the faded content will
/// later be mixed against a feedback-attenuated copy of itself.
pub fn apply_block_fade(
    table: &RampTable,
    samples: &mut [f32],
    channels: usize,
    offset: usize,
    frames: usize,
    up: bool,
    base_level: f64,
) {
    for f in 0..frames {
        let idx = (offset + f) * channels;
        for ch in 0..channels {
            let s = &mut samples[idx + ch];
            *s = fade_sample(table, f, up, base_level, *s);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_monotonic_and_bounded() {
        let t = RampTable::get(DEFAULT_FADE_RANGE);
        assert_eq!(t.read(0, true), 0.0);
        assert!((t.read(t.range() - 1, true) - 1.0).abs() < 1e-9);
        let mut prev = -1.0;
        for i in 0..t.range() {
            let v = t.read(i, true);
            assert!(v >= prev);
            prev = v;
        }
    }

    #[test]
    fn reversed_mirrors_forward() {
        let t = RampTable::get(64);
        for i in 0..t.range() {
            assert_eq!(t.read(i, false), t.read(t.range() - 1 - i, true));
        }
    }

    #[test]
    fn clamps_range_to_bounds() {
        let t = RampTable::get(4);
        assert_eq!(t.range(), MIN_FADE_RANGE);
        let t = RampTable::get(100_000);
        assert_eq!(t.range(), MAX_FADE_RANGE);
    }

    #[test]
    fn fade_transitions_enabled_to_active_then_finishes() {
        let mut fade = Fade::disabled(32);
        fade.enable(10, true, 0.0);
        assert!(!fade.is_active());
        fade.inc(9, false);
        assert!(!fade.is_active());
        fade.inc(10, false);
        assert!(fade.is_active());
        for _ in 0..32 {
            fade.inc(11, false);
        }
        assert!(!fade.is_enabled());
    }
}
