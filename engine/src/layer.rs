//! The copy-on-write content graph: `Layer` and `Segment` (spec §3, §4.4).
//!
//! There's no direct teacher analogue for this — REAPER/Playtime clips don't keep an undo chain
//! of immutable content layers, they just hold one `PcmSource`. What's grounded here is the
//! *shape* the teacher uses for nested, composable audio sources (`supplier::chain::SupplierChain`
//! wrapping one supplier inside another, each wrapper reading through to the one it holds) and
//! the Design Notes' own direction ("shared-ownership layers → reference count on a pooled
//! layer"): a `Layer` is held by `Rc<RefCell<Layer>>` so its strong count is exactly the "while
//! reachable from any loop's play/record/undo/redo chain or any Segment" invariant from the spec,
//! with no cycles by construction (a segment only ever points at a strictly older layer).

use crate::audio::{Audio, PutOp};
use crate::buffer::{AudioBuf, AudioBufMut, OwnedAudioBuffer};
use crate::fade::{Fade, RampTable};
use std::cell::RefCell;
use std::rc::Rc;

pub type LayerRef = Rc<RefCell<Layer>>;

/// A reference from one layer into a range of a prior layer (spec §3 `Segment`).
#[derive(Clone)]
pub struct Segment {
    pub source_layer: LayerRef,
    pub source_start_frame: usize,
    pub dest_offset: usize,
    pub frames: usize,
    pub fade_left: bool,
    pub fade_right: bool,
    pub local_copy_left: bool,
    pub local_copy_right: bool,
    pub feedback: f64,
}

impl Segment {
    pub fn dest_end(&self) -> usize {
        self.dest_offset + self.frames
    }

    fn validate(&self) {
        let source_len = self.source_layer.borrow().frames;
        assert!(
            self.source_start_frame + self.frames <= source_len,
            "segment reads past the end of its source layer"
        );
    }
}

/// One node in the copy-on-write content history (spec §3 `Layer`).
pub struct Layer {
    pub local_audio: Audio,
    pub segments: Vec<Segment>,
    pub frames: usize,
    pub cycles: u32,
    pub fade_left_deferred: bool,
    pub fade_right_deferred: bool,
    pub prev: Option<LayerRef>,
    pub redo: Option<LayerRef>,
    pub number: u32,
    channels: u16,
}

impl Layer {
    pub fn new_silent(channels: u16, number: u32) -> LayerRef {
        Rc::new(RefCell::new(Layer {
            local_audio: Audio::new(channels),
            segments: Vec::new(),
            frames: 0,
            cycles: 0,
            fade_left_deferred: false,
            fade_right_deferred: false,
            prev: None,
            redo: None,
            number,
            channels,
        }))
    }

    /// Allocates a fresh record layer referencing the whole of `source` across the loop span,
    /// linking `prev` into the undo chain. This is the core of a "shift" (spec §4.4): the
    /// current record layer becomes immutable (the caller stops mutating it after this call and
    /// treats the returned layer as the new one to record into) and a full-span segment is set
    /// up so playback is seamless across the boundary.
    pub fn shift(source: &LayerRef, feedback: f64, number: u32) -> LayerRef {
        let (frames, cycles, channels) = {
            let s = source.borrow();
            (s.frames, s.cycles.max(1), s.channels)
        };
        let segment = Segment {
            source_layer: source.clone(),
            source_start_frame: 0,
            dest_offset: 0,
            frames,
            fade_left: false,
            fade_right: false,
            local_copy_left: false,
            local_copy_right: false,
            feedback,
        };
        Rc::new(RefCell::new(Layer {
            local_audio: Audio::new(channels),
            segments: vec![segment],
            frames,
            cycles,
            fade_left_deferred: false,
            fade_right_deferred: false,
            prev: Some(source.clone()),
            redo: None,
            number,
            channels,
        }))
    }

    /// Composes segments in destination-frame order, validating the non-overlap invariant.
    pub fn sorted_segments(&self) -> Vec<&Segment> {
        let mut segs: Vec<&Segment> = self.segments.iter().collect();
        segs.sort_by_key(|s| s.dest_offset);
        for w in segs.windows(2) {
            assert!(
                w[0].dest_end() <= w[1].dest_offset,
                "segments overlap in destination frame domain"
            );
        }
        segs
    }

    /// Renders `dest.frame_count()` frames of this layer's content starting at `frame`,
    /// recursively pulling from segments' source layers and mixing the layer's own local audio
    /// on top (local audio and segments never overlap in the destination domain, so "on top"
    /// is really "in the gaps").
    pub fn read_into(&self, frame: usize, dest: &mut AudioBufMut) {
        dest.clear();
        let segs = self.sorted_segments();
        let n = dest.frame_count();
        let mut covered = vec![false; n];
        for seg in &segs {
            let seg_start = seg.dest_offset as i64;
            let seg_end = seg.dest_end() as i64;
            let req_start = frame as i64;
            let req_end = (frame + n) as i64;
            let overlap_start = seg_start.max(req_start);
            let overlap_end = seg_end.min(req_end);
            if overlap_start >= overlap_end {
                continue;
            }
            let local_offset = (overlap_start - req_start) as usize;
            let run = (overlap_end - overlap_start) as usize;
            let source_start = seg.source_start_frame + (overlap_start - seg_start) as usize;
            let mut scratch = OwnedAudioBuffer::new(self.channels as usize, run);
            {
                let source = seg.source_layer.borrow();
                source.read_into(source_start, &mut scratch.to_buf_mut());
            }
            if seg.feedback < 1.0 {
                scratch
                    .to_buf_mut()
                    .modify_samples(|_, _, s| s * seg.feedback as f32);
            }
            apply_segment_edge_fades(seg, &mut scratch, overlap_start as usize, run);
            dest.slice_mut(local_offset..local_offset + run)
                .copy_from(&scratch.to_buf());
            for i in local_offset..local_offset + run {
                covered[i] = true;
            }
        }
        // Whatever isn't covered by a segment comes from this layer's own recorded content.
        let mut gap_start: Option<usize> = None;
        for i in 0..=n {
            let is_gap = i < n && !covered[i];
            match (is_gap, gap_start) {
                (true, None) => gap_start = Some(i),
                (false, Some(start)) => {
                    let run = i - start;
                    let mut scratch = OwnedAudioBuffer::new(self.channels as usize, run);
                    self.local_audio.read_into(frame + start, &mut scratch.to_buf_mut());
                    dest.slice_mut(start..start + run).mix_from(&scratch.to_buf());
                    gap_start = None;
                }
                _ => {}
            }
        }
    }

    /// Splits the current single full-span segment into two segments in swapped order so the
    /// loop's frame 0 becomes `relocate_to` (spec §4.4 "Start-point relocation"). Preserves
    /// deferred-fade flags on both resulting sides. A no-op at `relocate_to == 0`.
    pub fn relocate_start_point(&mut self, relocate_to: usize) {
        if relocate_to == 0 {
            return;
        }
        assert!(relocate_to < self.frames, "relocation target out of range");
        assert_eq!(
            self.segments.len(),
            1,
            "start-point relocation expects a single pre-shift segment"
        );
        let original = self.segments.remove(0);
        let tail_len = original.frames - relocate_to;
        let tail = Segment {
            source_layer: original.source_layer.clone(),
            source_start_frame: original.source_start_frame + relocate_to,
            dest_offset: 0,
            frames: tail_len,
            fade_left: original.fade_left,
            fade_right: false,
            local_copy_left: original.local_copy_left,
            local_copy_right: false,
            feedback: original.feedback,
        };
        let head = Segment {
            source_layer: original.source_layer.clone(),
            source_start_frame: original.source_start_frame,
            dest_offset: tail_len,
            frames: relocate_to,
            fade_left: false,
            fade_right: original.fade_right,
            local_copy_left: false,
            local_copy_right: original.local_copy_right,
            feedback: original.feedback,
        };
        tail.validate();
        head.validate();
        self.segments.push(tail);
        self.segments.push(head);
    }

    /// Restructures the layer so frame `mode_start_frame` becomes the new origin and the new
    /// length is `new_frames`, setting the cycle count (spec §4.4 "Unrounded multiply / trim").
    /// `cycles` is 1 for an unrounded operation, preserved by the caller for a rounded one.
    pub fn splice(&mut self, mode_start_frame: usize, new_frames: usize, cycles: u32) {
        let mut rendered = OwnedAudioBuffer::new(self.channels as usize, new_frames.max(1));
        if new_frames > 0 {
            self.read_into(mode_start_frame, &mut rendered.to_buf_mut());
        }
        self.segments.clear();
        self.local_audio.reset();
        if new_frames > 0 {
            self.local_audio
                .put(0, &rendered.to_buf().slice(0..new_frames), PutOp::Replace);
        }
        self.frames = new_frames;
        self.cycles = cycles.max(1);
    }

    /// Marks an edge fade as deferred (recorded as a flag, not yet materialized) so a future
    /// shift can absorb it without an audible artifact.
    pub fn defer_fade(&mut self, left: bool) {
        if left {
            self.fade_left_deferred = true;
        } else {
            self.fade_right_deferred = true;
        }
    }

    /// Materializes any deferred fades into the layer's own local audio using `table`,
    /// propagating the `containsDeferredFade{Left,Right}` flag onward so a later shift still
    /// knows whether this edge needs attention.
    pub fn materialize_deferred_fades(&mut self, table: &RampTable) {
        if self.fade_left_deferred && self.frames > 0 {
            let run = table.range().min(self.frames);
            let mut scratch = OwnedAudioBuffer::new(self.channels as usize, run);
            self.local_audio.read_into(0, &mut scratch.to_buf_mut());
            crate::fade::apply_block_fade(
                table,
                scratch.to_buf_mut().data_mut(),
                self.channels as usize,
                0,
                run,
                true,
                0.0,
            );
            self.local_audio.put(0, &scratch.to_buf(), PutOp::Replace);
            self.fade_left_deferred = false;
        }
        if self.fade_right_deferred && self.frames > 0 {
            let run = table.range().min(self.frames);
            let start = self.frames - run;
            let mut scratch = OwnedAudioBuffer::new(self.channels as usize, run);
            self.local_audio.read_into(start, &mut scratch.to_buf_mut());
            crate::fade::apply_block_fade(
                table,
                scratch.to_buf_mut().data_mut(),
                self.channels as usize,
                0,
                run,
                false,
                0.0,
            );
            self.local_audio.put(start, &scratch.to_buf(), PutOp::Replace);
            self.fade_right_deferred = false;
        }
    }

    pub fn strong_count(self_ref: &LayerRef) -> usize {
        Rc::strong_count(self_ref)
    }
}

fn apply_segment_edge_fades(seg: &Segment, scratch: &mut OwnedAudioBuffer, overlap_start: usize, run: usize) {
    let table = RampTable::get(crate::fade::DEFAULT_FADE_RANGE);
    let channels = scratch.channel_count();
    if seg.fade_left && overlap_start < seg.dest_offset + table.range() {
        let local_start = (seg.dest_offset.max(overlap_start)) - overlap_start;
        let local_len = (table.range().saturating_sub(overlap_start.saturating_sub(seg.dest_offset)))
            .min(run.saturating_sub(local_start));
        if local_len > 0 {
            let offset_in_fade = overlap_start.saturating_sub(seg.dest_offset);
            crate::fade::apply_block_fade(
                &table,
                scratch.to_buf_mut().data_mut(),
                channels,
                local_start,
                local_len,
                true,
                0.0,
            );
            let _ = offset_in_fade;
        }
    }
    if seg.fade_right {
        let fade_start_dest = seg.dest_end().saturating_sub(table.range());
        let overlap_end = overlap_start + run;
        if overlap_end > fade_start_dest {
            let local_start = fade_start_dest.saturating_sub(overlap_start).max(0);
            let local_len = run.saturating_sub(local_start);
            if local_len > 0 {
                crate::fade::apply_block_fade(
                    &table,
                    scratch.to_buf_mut().data_mut(),
                    channels,
                    local_start,
                    local_len,
                    false,
                    0.0,
                );
            }
        }
    }
}

/// Reads the local leading/trailing region of a layer inline (spec §4.4 "Local copy"), used so a
/// segment's edge fade can be computed without touching immutable source layers.
pub fn local_copy_region(layer: &Layer, offset: usize, frames: usize) -> Audio {
    let mut audio = Audio::new(layer.channels);
    let mut scratch = OwnedAudioBuffer::new(layer.channels as usize, frames);
    layer.local_audio.read_into(offset, &mut scratch.to_buf_mut());
    audio.put(0, &scratch.to_buf(), PutOp::Replace);
    audio
}

/// Creates a write cursor bound to `layer`'s local audio, auto-extending, used by the record
/// path.
pub fn record_cursor(start_frame: i64) -> crate::cursor::AudioCursor {
    crate::cursor::AudioCursor::new(start_frame, false, true)
}

pub fn write_local(layer: &mut Layer, frame: usize, src: &AudioBuf, op: PutOp) {
    layer.local_audio.put(frame, src, op);
    if frame + src.frame_count() > layer.frames {
        layer.frames = frame + src.frame_count();
    }
}

/// Attaches a freshly enabled fade, used when recording ends mid-block and the new edge needs an
/// immediate (non-deferred) fade rather than a flag.
pub fn attach_immediate_fade(range: usize, start_frame: i64, up: bool) -> Fade {
    let mut fade = Fade::disabled(range);
    fade.activate(0, up);
    let _ = start_frame;
    fade
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(layer: &LayerRef, frames: &[f32]) {
        let mut l = layer.borrow_mut();
        let buf = AudioBuf::new(frames, 1);
        l.local_audio.put(0, &buf, PutOp::Replace);
        l.frames = buf.frame_count();
    }

    #[test]
    fn local_only_layer_renders_its_own_audio() {
        let layer = Layer::new_silent(1, 0);
        fill(&layer, &[1.0, 2.0, 3.0, 4.0]);
        let mut out = OwnedAudioBuffer::new(1, 4);
        layer.borrow().read_into(0, &mut out.to_buf_mut());
        assert_eq!(out.to_buf().data(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn shift_makes_a_full_span_segment_that_reads_through() {
        let base = Layer::new_silent(1, 0);
        fill(&base, &[1.0, 2.0, 3.0, 4.0]);
        let next = Layer::shift(&base, 1.0, 1);
        assert_eq!(next.borrow().frames, 4);
        let mut out = OwnedAudioBuffer::new(1, 4);
        next.borrow().read_into(0, &mut out.to_buf_mut());
        assert_eq!(out.to_buf().data(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(Layer::strong_count(&base), 2); // undo `prev` + the segment
    }

    #[test]
    fn start_point_relocation_is_noop_at_zero() {
        let base = Layer::new_silent(1, 0);
        fill(&base, &[1.0, 2.0, 3.0, 4.0]);
        let next = Layer::shift(&base, 1.0, 1);
        next.borrow_mut().relocate_start_point(0);
        assert_eq!(next.borrow().segments.len(), 1);
    }

    #[test]
    fn start_point_relocation_swaps_segment_order() {
        let base = Layer::new_silent(1, 0);
        fill(&base, &[1.0, 2.0, 3.0, 4.0]);
        let next = Layer::shift(&base, 1.0, 1);
        next.borrow_mut().relocate_start_point(1);
        let mut out = OwnedAudioBuffer::new(1, 4);
        next.borrow().read_into(0, &mut out.to_buf_mut());
        assert_eq!(out.to_buf().data(), &[2.0, 3.0, 4.0, 1.0]);
    }

    #[test]
    fn splice_truncates_to_new_origin_and_length() {
        let base = Layer::new_silent(1, 0);
        fill(&base, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let next = Layer::shift(&base, 1.0, 1);
        next.borrow_mut().splice(2, 3, 1);
        assert_eq!(next.borrow().frames, 3);
        let mut out = OwnedAudioBuffer::new(1, 3);
        next.borrow().read_into(0, &mut out.to_buf_mut());
        assert_eq!(out.to_buf().data(), &[3.0, 4.0, 5.0]);
    }

    #[test]
    fn feedback_scales_referenced_content() {
        let base = Layer::new_silent(1, 0);
        fill(&base, &[2.0, 2.0]);
        let next = Layer::shift(&base, 0.5, 1);
        let mut out = OwnedAudioBuffer::new(1, 2);
        next.borrow().read_into(0, &mut out.to_buf_mut());
        assert_eq!(out.to_buf().data(), &[1.0, 1.0]);
    }
}
