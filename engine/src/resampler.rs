//! Linear-interpolation speed/pitch resampler with inter-block remainder buffering (spec §4.3).
//!
//! Shaped after the teacher's `processing::supplier::Resampler` (a stateful wrapper around a
//! resampling backend with an `enabled` flag and a `reset` hook) but the backend itself is the
//! plain linear interpolation the spec calls for rather than REAPER's native resampler — this
//! engine has no host resampling facility to delegate to, and the spec is explicit that the
//! remainder buffer (not a native API) is what carries state across blocks.

use base::tracing_warn;

pub const MAX_REMAINDER: usize = 16;

pub const MIN_RATE_SHIFT: f64 = 1.0 / 4.0;
pub const MAX_RATE_SHIFT: f64 = 4.0;

/// Derives a playback speed from independent octave/semitone/bend controls, additively combined
/// per spec §4.3, then clamped into the supported range.
pub fn derive_speed(octave: i32, semitone: i32, bend: f64, stretch: f64) -> f64 {
    let speed = 2f64.powi(octave) * semitone_ratio(semitone) * (bend + stretch).exp2();
    speed.clamp(MIN_RATE_SHIFT, MAX_RATE_SHIFT)
}

fn semitone_ratio(semitone: i32) -> f64 {
    2f64.powf(semitone as f64 / 12.0)
}

/// Stateful linear-interpolation resampler. One instance per audio stream (input or output).
#[derive(Clone, Debug)]
pub struct Resampler {
    speed: f64,
    inverse_speed: f64,
    /// Fractional phase, always in `(0, 1]`: the position between `last_frame` and the next
    /// source frame at which the next output sample falls.
    threshold: f64,
    last_frame: Vec<f32>,
    channels: usize,
    remainder: Vec<f32>,
    remainder_frames: usize,
}

impl Resampler {
    pub fn new(channels: usize) -> Self {
        Self {
            speed: 1.0,
            inverse_speed: 1.0,
            threshold: 1.0,
            last_frame: vec![0.0; channels],
            channels,
            remainder: vec![0.0; MAX_REMAINDER * channels],
            remainder_frames: 0,
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn set_speed(&mut self, speed: f64) {
        let clamped = speed.clamp(MIN_RATE_SHIFT, MAX_RATE_SHIFT);
        if (clamped - speed).abs() > 1e-9 {
            tracing_warn!(requested = speed, clamped, "resampler speed clamped into supported range");
        }
        self.speed = clamped;
        self.inverse_speed = 1.0 / clamped;
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn remainder_slice(&self) -> &[f32] {
        &self.remainder[..self.remainder_frames * self.channels]
    }

    fn add_remainder(&mut self, frame: &[f32]) {
        if self.remainder_frames >= MAX_REMAINDER {
            tracing_warn!("resampler remainder buffer full, dropping overflow frame");
            return;
        }
        let start = self.remainder_frames * self.channels;
        self.remainder[start..start + self.channels].copy_from_slice(frame);
        self.remainder_frames += 1;
    }

    fn pop_remainder_front(&mut self) -> Option<Vec<f32>> {
        if self.remainder_frames == 0 {
            return None;
        }
        let frame = self.remainder[..self.channels].to_vec();
        self.remainder.copy_within(self.channels.., 0);
        self.remainder_frames -= 1;
        Some(frame)
    }

    /// Pulls from `src` (a flat interleaved buffer of `n_src` frames), writes up to `n_dst`
    /// frames into `dst` (unbounded if `n_dst == 0`, in which case `dst` must be sized to
    /// accommodate `scale_to_dest_frames(n_src)`). Returns frames actually written.
    ///
    /// At `speed == 1.0` this degenerates to a copy that still updates `last_frame`/`threshold`,
    /// matching the spec's bit-exact-copy boundary behavior.
    pub fn resample(&mut self, src: &[f32], n_src: usize, dst: &mut [f32], n_dst: usize) -> usize {
        assert_eq!(src.len(), n_src * self.channels);
        let dst_cap = if n_dst == 0 { dst.len() / self.channels } else { n_dst };
        if (self.speed - 1.0).abs() < f64::EPSILON {
            let to_copy = n_src.min(dst_cap);
            dst[..to_copy * self.channels].copy_from_slice(&src[..to_copy * self.channels]);
            if to_copy > 0 {
                let last = &src[(to_copy - 1) * self.channels..to_copy * self.channels];
                self.last_frame.copy_from_slice(last);
            }
            return to_copy;
        }

        let mut written = 0usize;
        let mut src_pos = 0usize;
        // Drain remainder frames first (frames produced past the destination on a prior call).
        while written < dst_cap {
            match self.pop_remainder_front() {
                Some(frame) => {
                    dst[written * self.channels..(written + 1) * self.channels].copy_from_slice(&frame);
                    written += 1;
                }
                None => break,
            }
        }

        let prev_frame_storage = self.last_frame.clone();
        let mut prev_frame: &[f32] = &prev_frame_storage;
        let mut have_prev = true;

        while written < dst_cap || (n_dst == 0 && src_pos < n_src) {
            while self.threshold > 1.0 {
                self.threshold -= 1.0;
                src_pos += 1;
            }
            if src_pos >= n_src {
                break;
            }
            let cur = &src[src_pos * self.channels..(src_pos + 1) * self.channels];
            let interpolated: Vec<f32> = if have_prev {
                (0..self.channels)
                    .map(|c| {
                        let a = prev_frame[c] as f64;
                        let b = cur[c] as f64;
                        (a + (b - a) * self.threshold) as f32
                    })
                    .collect()
            } else {
                cur.to_vec()
            };
            if written < dst_cap {
                dst[written * self.channels..(written + 1) * self.channels].copy_from_slice(&interpolated);
            } else {
                self.add_remainder(&interpolated);
            }
            written += 1;
            self.threshold += self.inverse_speed;
            if self.threshold > 1.0 {
                prev_frame = cur;
                have_prev = true;
            }
        }
        if src_pos > 0 {
            let last = &src[(src_pos.min(n_src) - 1).max(0) * self.channels..];
            self.last_frame.copy_from_slice(&last[..self.channels]);
        }
        written
    }

    /// Simulates `resample` without producing samples: given a `speed`/`threshold` starting
    /// point and a desired destination frame count, returns how many source frames it would
    /// consume. Used by streams to reserve buffers deterministically.
    pub fn scale_to_source_frames(speed: f64, mut threshold: f64, n_dst: usize) -> usize {
        if (speed - 1.0).abs() < f64::EPSILON {
            return n_dst;
        }
        let inverse_speed = 1.0 / speed;
        let mut src = 0usize;
        for _ in 0..n_dst {
            while threshold > 1.0 {
                threshold -= 1.0;
                src += 1;
            }
            threshold += inverse_speed;
        }
        src + 1
    }

    /// Simulates the same advance loop to predict how many destination frames `n_src` source
    /// frames would produce.
    pub fn scale_to_dest_frames(speed: f64, mut threshold: f64, n_src: usize) -> usize {
        if (speed - 1.0).abs() < f64::EPSILON {
            return n_src;
        }
        let inverse_speed = 1.0 / speed;
        let mut src_consumed = 0usize;
        let mut dst = 0usize;
        loop {
            while threshold > 1.0 {
                threshold -= 1.0;
                src_consumed += 1;
            }
            if src_consumed >= n_src {
                break;
            }
            dst += 1;
            threshold += inverse_speed;
        }
        dst
    }

    pub fn remainder_len(&self) -> usize {
        self.remainder_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_one_is_bit_exact_copy() {
        let mut r = Resampler::new(1);
        let src = [0.1f32, 0.2, 0.3, 0.4];
        let mut dst = [0.0f32; 4];
        let n = r.resample(&src, 4, &mut dst, 4);
        assert_eq!(n, 4);
        assert_eq!(dst, src);
        assert_eq!(r.last_frame, vec![0.4]);
    }

    #[test]
    fn half_speed_produces_more_dest_frames_than_source() {
        let mut r = Resampler::new(1);
        r.set_speed(0.5);
        let src = [0.0f32, 1.0, 2.0, 3.0];
        let mut dst = [0.0f32; 8];
        let n = r.resample(&src, 4, &mut dst, 8);
        assert!(n >= 6, "expected roughly double frames, got {n}");
    }

    #[test]
    fn speed_clamped_into_range() {
        let mut r = Resampler::new(1);
        r.set_speed(100.0);
        assert_eq!(r.speed(), MAX_RATE_SHIFT);
        r.set_speed(0.001);
        assert_eq!(r.speed(), MIN_RATE_SHIFT);
    }

    #[test]
    fn derive_speed_matches_additive_formula() {
        let s = derive_speed(1, 0, 0.0, 0.0);
        assert!((s - 2.0).abs() < 1e-9);
        let s = derive_speed(0, 12, 0.0, 0.0);
        assert!((s - 2.0).abs() < 1e-6);
    }

    #[test]
    fn scale_helpers_are_consistent_at_unit_speed() {
        assert_eq!(Resampler::scale_to_source_frames(1.0, 1.0, 100), 100);
        assert_eq!(Resampler::scale_to_dest_frames(1.0, 1.0, 100), 100);
    }
}
