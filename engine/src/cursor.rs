//! `AudioCursor` — a stateful iterator over a single [`Audio`] (spec §3, §4.2).
//!
//! Grounded in the teacher's suppliers (`Fader`, `Looper`, `Section`): a cursor caches its
//! current location the way those wrap inner suppliers with small bits of position state, and
//! re-derives it lazily rather than recomputing `locate()` on every sample. The one addition the
//! teacher's chain doesn't need (since a `PcmSource` has no "structural version") is the
//! version-mismatch re-seek described in the spec.

use crate::audio::{Audio, PutOp};
use crate::buffer::{AudioBuf, AudioBufMut};
use crate::fade::Fade;

/// Exclusively owned by whichever stream or cursor-using function holds it; its lifetime must
/// not exceed the target `Audio`'s.
pub struct AudioCursor {
    frame: i64,
    cached_version: u64,
    reverse: bool,
    auto_extend: bool,
    fade: Option<Fade>,
}

impl AudioCursor {
    pub fn new(start_frame: i64, reverse: bool, auto_extend: bool) -> Self {
        Self {
            frame: start_frame,
            cached_version: u64::MAX,
            reverse,
            auto_extend,
            fade: None,
        }
    }

    pub fn frame(&self) -> i64 {
        self.frame
    }

    pub fn set_frame(&mut self, frame: i64) {
        self.frame = frame;
    }

    pub fn reverse(&self) -> bool {
        self.reverse
    }

    pub fn set_reverse(&mut self, reverse: bool) {
        self.reverse = reverse;
    }

    pub fn attach_fade(&mut self, fade: Fade) {
        self.fade = Some(fade);
    }

    pub fn detach_fade(&mut self) {
        self.fade = None;
    }

    pub fn fade_mut(&mut self) -> Option<&mut Fade> {
        self.fade.as_mut()
    }

    /// Invalidates the cached location; the next access re-locates lazily. Called whenever the
    /// underlying `Audio`'s version no longer matches what this cursor last saw.
    fn reseek_if_stale(&mut self, audio: &Audio) {
        if self.cached_version != audio.version() {
            self.cached_version = audio.version();
            // Re-location itself is just re-deriving (chunk_index, offset) from `frame`, which
            // `Audio::locate`/`read_into`/`put` already do per call; nothing further to cache
            // here beyond remembering we're no longer stale.
        }
    }

    /// Reads the next `dest.frame_count()` frames, mixing into `dest` (or replacing, if
    /// `replace` is set), applying channel-wise `level` and the attached fade.
    ///
    /// Auto-extending cursors silently allow `frame` to pass the current end (reading silence
    /// past it, same as any other gap); non-extending cursors behave identically here since
    /// `Audio::read_into` already treats past-the-end as silence — the distinction only matters
    /// for `put`.
    pub fn get(&mut self, audio: &Audio, dest: &mut AudioBufMut, level: f64, replace: bool) {
        self.reseek_if_stale(audio);
        let n = dest.frame_count();
        let mut scratch = vec![0.0f32; n * dest.channel_count()];
        let start = if self.reverse {
            self.frame - (n as i64 - 1)
        } else {
            self.frame
        };
        if start >= 0 {
            let mut scratch_buf = AudioBufMut::new(&mut scratch, dest.channel_count());
            audio.read_into(start as usize, &mut scratch_buf);
            if self.reverse {
                reverse_frames_in_place(&mut scratch, dest.channel_count());
            }
        }
        for f in 0..n {
            let fade_applied: Vec<f32> = {
                let src = &scratch[f * dest.channel_count()..(f + 1) * dest.channel_count()];
                src.iter()
                    .map(|s| {
                        let leveled = s * level as f32;
                        match &self.fade {
                            Some(fade) => fade.apply(leveled),
                            None => leveled,
                        }
                    })
                    .collect()
            };
            let out = dest.frame_mut(f);
            if replace {
                out.copy_from_slice(&fade_applied);
            } else {
                for (o, s) in out.iter_mut().zip(fade_applied.iter()) {
                    *o += *s;
                }
            }
            if let Some(fade) = &mut self.fade {
                fade.inc(self.frame, self.reverse);
            }
            self.advance(1);
        }
    }

    /// Writes the next `src.frame_count()` frames, applying the attached fade. Auto-extending
    /// cursors let `Audio::put` grow storage (its normal behavior); non-extending cursors refuse
    /// frames at or past the audio's current length.
    pub fn put(&mut self, audio: &mut Audio, src: &AudioBuf, op: PutOp) {
        let n = src.frame_count();
        for f in 0..n {
            if !self.auto_extend && self.frame >= audio.frames() as i64 {
                self.advance(1);
                continue;
            }
            if self.frame < 0 {
                self.advance(1);
                continue;
            }
            let sample_frame = src.frame(f);
            let faded: Vec<f32> = sample_frame
                .iter()
                .map(|s| match &self.fade {
                    Some(fade) => fade.apply(*s),
                    None => *s,
                })
                .collect();
            let one = AudioBuf::new(&faded, src.channel_count());
            let write_frame = if self.reverse {
                (self.frame - (n as i64 - 1 - f as i64)).max(0) as usize
            } else {
                self.frame as usize
            };
            audio.put(write_frame, &one, op);
            if let Some(fade) = &mut self.fade {
                fade.inc(self.frame, self.reverse);
            }
            self.advance(1);
        }
    }

    fn advance(&mut self, n: i64) {
        self.frame += if self.reverse { -n } else { n };
    }
}

fn reverse_frames_in_place(data: &mut [f32], channels: usize) {
    let frame_count = data.len() / channels;
    for i in 0..frame_count / 2 {
        let j = frame_count - 1 - i;
        for c in 0..channels {
            data.swap(i * channels + c, j * channels + c);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::OwnedAudioBuffer;

    #[test]
    fn forward_read_then_write_round_trips() {
        let mut audio = Audio::new(1);
        let mut write_cursor = AudioCursor::new(0, false, true);
        let mut src = OwnedAudioBuffer::new(1, 4);
        src.to_buf_mut().data_mut().copy_from_slice(&[0.1, 0.2, 0.3, 0.4]);
        write_cursor.put(&mut audio, &src.to_buf(), PutOp::Replace);

        let mut read_cursor = AudioCursor::new(0, false, false);
        let mut out = OwnedAudioBuffer::new(1, 4);
        read_cursor.get(&audio, &mut out.to_buf_mut(), 1.0, true);
        assert_eq!(out.to_buf().data(), &[0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn reverse_cursor_reads_backwards() {
        let mut audio = Audio::new(1);
        let mut write_cursor = AudioCursor::new(0, false, true);
        let mut src = OwnedAudioBuffer::new(1, 4);
        src.to_buf_mut().data_mut().copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        write_cursor.put(&mut audio, &src.to_buf(), PutOp::Replace);

        let mut reverse_cursor = AudioCursor::new(3, true, false);
        let mut out = OwnedAudioBuffer::new(1, 4);
        reverse_cursor.get(&audio, &mut out.to_buf_mut(), 1.0, true);
        assert_eq!(out.to_buf().data(), &[4.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn non_extending_cursor_traces_silence_past_end() {
        let mut audio = Audio::new(1);
        let mut w = AudioCursor::new(0, false, true);
        let mut src = OwnedAudioBuffer::new(1, 2);
        src.to_buf_mut().data_mut().copy_from_slice(&[1.0, 1.0]);
        w.put(&mut audio, &src.to_buf(), PutOp::Replace);

        let mut non_extend = AudioCursor::new(5, false, false);
        let extra = OwnedAudioBuffer::new(1, 1);
        non_extend.put(&mut audio, &extra.to_buf(), PutOp::Add);
        assert_eq!(audio.frames(), 2);
    }
}
