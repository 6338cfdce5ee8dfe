//! Sparse, block-chunked audio storage (spec §3 `Audio`, §4.2).
//!
//! Grounded in the teacher's `OwnedAudioBuffer`, generalized from one contiguous `Vec<f32>` into
//! a vector of fixed-size chunks, any of which may be `None` and is then read as silence — the
//! "sparse" storage the spec calls for, so a loop with long silent stretches (e.g. a `Reset`
//! loop, or the untouched tail after a `Record` ended early) doesn't cost memory for it.

use crate::buffer::{AudioBuf, AudioBufMut, OwnedAudioBuffer};
use looper_api::persistence::PersistedAudio;

/// Frames per storage chunk. Chosen well above typical audio block sizes (128-1024) so a single
/// block read/write rarely crosses more than one chunk boundary.
pub const CHUNK_FRAMES: usize = 8192;

/// How [`Audio::put`] combines incoming samples with existing content.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PutOp {
    /// Mixes the incoming samples into whatever is already there (overdub).
    Add,
    /// Overwrites whatever is already there (replace/record).
    Replace,
    /// Clears the destination range back to silence (undo of a local copy, trim).
    Remove,
}

/// A sparse ordered sequence of frames, stored as a vector of fixed-size chunks.
#[derive(Clone, Debug)]
pub struct Audio {
    frames: usize,
    channels: u16,
    start_frame: usize,
    chunks: Vec<Option<Box<[f32]>>>,
    version: u64,
}

impl Audio {
    pub fn new(channels: u16) -> Self {
        Self {
            frames: 0,
            channels,
            start_frame: 0,
            chunks: Vec::new(),
            version: 0,
        }
    }

    pub fn with_capacity(channels: u16, frames: usize) -> Self {
        let mut audio = Self::new(channels);
        audio.reserve_through(frames);
        audio.frames = frames;
        audio
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn start_frame(&self) -> usize {
        self.start_frame
    }

    fn bump_version(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    /// Maps an absolute frame to `(chunk_index, offset_within_chunk)`, accounting for
    /// `start_frame`.
    pub fn locate(&self, frame: usize) -> (usize, usize) {
        let absolute = frame + self.start_frame;
        (absolute / CHUNK_FRAMES, absolute % CHUNK_FRAMES)
    }

    fn reserve_through(&mut self, frame: usize) {
        let (chunk_idx, _) = self.locate(frame.saturating_sub(1).max(0));
        if self.chunks.len() <= chunk_idx {
            self.chunks.resize(chunk_idx + 1, None);
        }
    }

    /// Ensures a writable chunk exists for `frame`, allocating (and extending `frames` if
    /// needed) as it goes.
    pub fn prepare_frame(&mut self, frame: usize) -> (usize, usize) {
        let (chunk_idx, offset) = self.locate(frame);
        if self.chunks.len() <= chunk_idx {
            self.chunks.resize(chunk_idx + 1, None);
        }
        if self.chunks[chunk_idx].is_none() {
            self.chunks[chunk_idx] = Some(vec![0.0f32; CHUNK_FRAMES * self.channels as usize].into_boxed_slice());
        }
        if frame >= self.frames {
            self.frames = frame + 1;
        }
        (chunk_idx, offset)
    }

    /// Reads `dest.frame_count()` frames starting at `frame` into `dest`, silence for any gap
    /// (null chunk) or past-the-end region.
    pub fn read_into(&self, frame: usize, dest: &mut AudioBufMut) {
        assert_eq!(dest.channel_count(), self.channels as usize);
        let ch = self.channels as usize;
        for f in 0..dest.frame_count() {
            let src_frame = frame + f;
            let out = dest.frame_mut(f);
            if src_frame >= self.frames {
                out.fill(0.0);
                continue;
            }
            let (chunk_idx, offset) = self.locate(src_frame);
            match self.chunks.get(chunk_idx).and_then(|c| c.as_ref()) {
                None => out.fill(0.0),
                Some(chunk) => {
                    let start = offset * ch;
                    out.copy_from_slice(&chunk[start..start + ch]);
                }
            }
        }
    }

    /// Writes `src` starting at `frame`, per `op`. Always extends storage (and `frames`) via
    /// [`Self::prepare_frame`]; non-extending callers should check bounds themselves first.
    pub fn put(&mut self, frame: usize, src: &AudioBuf, op: PutOp) {
        assert_eq!(src.channel_count(), self.channels as usize);
        let ch = self.channels as usize;
        for f in 0..src.frame_count() {
            let dst_frame = frame + f;
            let (chunk_idx, offset) = self.prepare_frame(dst_frame);
            let chunk = self.chunks[chunk_idx].as_mut().unwrap();
            let start = offset * ch;
            let src_frame = src.frame(f);
            match op {
                PutOp::Add => {
                    for c in 0..ch {
                        chunk[start + c] += src_frame[c];
                    }
                }
                PutOp::Replace => {
                    chunk[start..start + ch].copy_from_slice(src_frame);
                }
                PutOp::Remove => {
                    chunk[start..start + ch].fill(0.0);
                }
            }
        }
        self.bump_version();
    }

    /// Truncates/repositions storage so the audio's frame 0 becomes `new_start_frame` frames
    /// into the previous content, and its new length is `new_frames`. Used by layer splice
    /// operations (start-point relocation, unrounded multiply/trim).
    pub fn rebase(&mut self, new_origin_frame: usize, new_frames: usize) {
        let mut rebased = Audio::with_capacity(self.channels, new_frames);
        let mut scratch = OwnedAudioBuffer::new(self.channels as usize, new_frames.max(1));
        let mut buf = scratch.to_buf_mut();
        self.read_into(new_origin_frame, &mut buf.slice_mut(0..new_frames));
        rebased.put(0, &buf.as_const().slice(0..new_frames), PutOp::Replace);
        *self = rebased;
    }

    pub fn reset(&mut self) {
        self.frames = 0;
        self.start_frame = 0;
        self.chunks.clear();
        self.bump_version();
    }

    pub fn to_persisted(&self) -> PersistedAudio {
        let mut samples = vec![0.0f32; self.frames * self.channels as usize];
        if self.frames > 0 {
            let mut owned = OwnedAudioBuffer::new(self.channels as usize, self.frames);
            self.read_into(0, &mut owned.to_buf_mut());
            samples.copy_from_slice(owned.to_buf().data());
        }
        PersistedAudio {
            frames: self.frames as u32,
            channels: self.channels,
            samples,
        }
    }

    pub fn from_persisted(persisted: &PersistedAudio) -> Self {
        let mut audio = Audio::new(persisted.channels);
        if persisted.frames > 0 {
            let buf = AudioBuf::new(&persisted.samples, persisted.channels as usize);
            audio.put(0, &buf, PutOp::Replace);
        }
        audio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_gap_reads_as_silence() {
        let mut audio = Audio::new(1);
        let mut scratch = OwnedAudioBuffer::new(1, 4);
        scratch.to_buf_mut().data_mut().copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        audio.put(CHUNK_FRAMES * 2, &scratch.to_buf(), PutOp::Replace);
        assert!(audio.frames() > CHUNK_FRAMES * 2);
        let mut read_back = OwnedAudioBuffer::new(1, 4);
        audio.read_into(0, &mut read_back.to_buf_mut());
        assert_eq!(read_back.to_buf().data(), &[0.0, 0.0, 0.0, 0.0]);
        let mut read_back2 = OwnedAudioBuffer::new(1, 4);
        audio.read_into(CHUNK_FRAMES * 2, &mut read_back2.to_buf_mut());
        assert_eq!(read_back2.to_buf().data(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn version_bumps_on_mutation() {
        let mut audio = Audio::new(2);
        let v0 = audio.version();
        let scratch = OwnedAudioBuffer::new(2, 2);
        audio.put(0, &scratch.to_buf(), PutOp::Add);
        assert_ne!(audio.version(), v0);
    }

    #[test]
    fn add_mixes_replace_overwrites() {
        let mut audio = Audio::new(1);
        let mut one = OwnedAudioBuffer::new(1, 2);
        one.to_buf_mut().data_mut().copy_from_slice(&[1.0, 1.0]);
        audio.put(0, &one.to_buf(), PutOp::Add);
        audio.put(0, &one.to_buf(), PutOp::Add);
        let mut out = OwnedAudioBuffer::new(1, 2);
        audio.read_into(0, &mut out.to_buf_mut());
        assert_eq!(out.to_buf().data(), &[2.0, 2.0]);
        audio.put(0, &one.to_buf(), PutOp::Replace);
        let mut out2 = OwnedAudioBuffer::new(1, 2);
        audio.read_into(0, &mut out2.to_buf_mut());
        assert_eq!(out2.to_buf().data(), &[1.0, 1.0]);
    }

    #[test]
    fn persisted_round_trip() {
        let mut audio = Audio::new(2);
        let mut scratch = OwnedAudioBuffer::new(2, 3);
        scratch
            .to_buf_mut()
            .data_mut()
            .copy_from_slice(&[0.1, -0.1, 0.2, -0.2, 0.3, -0.3]);
        audio.put(0, &scratch.to_buf(), PutOp::Replace);
        let persisted = audio.to_persisted();
        let back = Audio::from_persisted(&persisted);
        assert_eq!(back.frames(), audio.frames());
        let mut a = OwnedAudioBuffer::new(2, 3);
        let mut b = OwnedAudioBuffer::new(2, 3);
        audio.read_into(0, &mut a.to_buf_mut());
        back.read_into(0, &mut b.to_buf_mut());
        assert_eq!(a.to_buf().data(), b.to_buf().data());
    }
}
