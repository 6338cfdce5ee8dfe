//! Per-track event scheduler (spec §4.6) — the hardest part of the system.
//!
//! There's no single teacher file this is grounded on function-for-function; the teacher doesn't
//! have a quantized, undo-able, frame-driven event list at all. What's carried over is its
//! *texture*: pool-backed storage (`pool::Pool`, itself grounded in the `rt_allocator` no-alloc
//! discipline), `tracing_warn!`-based recoverable-error reporting instead of `Result`/`panic!`
//! on the hot path, and small, named, single-purpose methods rather than one large dispatch
//! function.

use crate::config::{Preset, QuantizeMode};
use crate::event::{Event, EventKind};
use crate::pool::{Pool, PoolIndex};
use base::tracing_warn;
use looper_api::action::Action;
use looper_api::sync::SyncEvent;

const DEFAULT_POOL_CAPACITY: usize = 256;

/// Rounds `now` up to the next quantize boundary (spec §4.6 step 1). `cycle_frames` is the
/// current loop's cycle length (or the whole loop, for `QuantizeMode::Loop`); `subcycle_frames`
/// likewise for subcycles. `push_forward` forces rounding strictly past `now` even when `now`
/// already sits on a boundary (used when two events would otherwise land on the same frame).
pub fn get_quantized_frame(
    loop_frames: usize,
    cycle_frames: usize,
    subcycle_frames: usize,
    now: i64,
    mode: QuantizeMode,
    push_forward: bool,
) -> i64 {
    let unit = match mode {
        QuantizeMode::Off => return now,
        QuantizeMode::Cycle => cycle_frames,
        QuantizeMode::Subcycle => subcycle_frames,
        QuantizeMode::Loop => loop_frames,
    };
    if unit == 0 {
        return now;
    }
    let unit = unit as i64;
    let remainder = now.rem_euclid(unit);
    if remainder == 0 && !push_forward {
        now
    } else {
        now - remainder + unit
    }
}

/// Smallest positive multiple of `unit` that is `>= start`.
fn next_multiple_at_or_after(start: i64, unit: i64) -> i64 {
    let remainder = start.rem_euclid(unit);
    if remainder == 0 {
        start
    } else {
        start + (unit - remainder)
    }
}

/// The next `unit` boundary at or after `block_start`, if it falls before `window_end` and
/// wasn't already the last one reported for this unit (the debounce).
fn boundary_in_window(block_start: i64, window_end: i64, unit: i64, last: Option<i64>) -> Option<i64> {
    if unit <= 0 {
        return None;
    }
    let boundary = next_multiple_at_or_after(block_start.max(1), unit);
    if boundary >= window_end || last == Some(boundary) {
        return None;
    }
    Some(boundary)
}

fn rank(pulse_type: looper_api::sync::PulseType) -> u8 {
    use looper_api::sync::PulseType::*;
    match pulse_type {
        Loop => 0,
        Cycle => 1,
        Subcycle => 2,
        Bar => 3,
        Beat => 4,
        Clock => 5,
    }
}

/// The outcome of [`Scheduler::next_event`]: either a concrete event to process, a synthetic
/// boundary pseudo-event, or nothing left in the block.
pub enum NextEvent {
    Scheduled(PoolIndex),
    Boundary(looper_api::sync::PulseType),
    Sync(SyncEvent),
    None,
}

/// Per-track event list plus the bookkeeping spec §4.6 describes: parent/child tree, pending
/// switch, debounced boundary emission, and the reusable `syncEvent` slot.
pub struct Scheduler {
    events: Pool<Event>,
    /// Primary (non-child) events, in insertion order — "insertion order is the correct order
    /// for undo" (spec §4.6).
    primary_order: Vec<PoolIndex>,
    switch_event: Option<PoolIndex>,
    last_loop_boundary_frame: Option<i64>,
    last_cycle_boundary_frame: Option<i64>,
    last_subcycle_boundary_frame: Option<i64>,
    pending_sync_events: Vec<SyncEvent>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            events: Pool::with_capacity(DEFAULT_POOL_CAPACITY),
            primary_order: Vec::new(),
            switch_event: None,
            last_loop_boundary_frame: None,
            last_cycle_boundary_frame: None,
            last_subcycle_boundary_frame: None,
            pending_sync_events: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Schedules a new primary event for `action`, quantizing its frame and applying the
    /// reschedule rule (spec §4.6 "Scheduling an event").
    pub fn schedule(
        &mut self,
        kind: EventKind,
        action: Action,
        now: i64,
        loop_frames: usize,
        cycle_frames: usize,
        subcycle_frames: usize,
        preset: Preset,
    ) -> Option<PoolIndex> {
        let mode = preset.quantize_mode;
        let mut frame = get_quantized_frame(loop_frames, cycle_frames, subcycle_frames, now, mode, preset.push_forward);
        // "if two events would land on the same frame and stacking is forbidden, advance to the
        // next quantize boundary iteratively."
        while self.primary_order.iter().any(|&idx| self.events.get(idx).and_then(|e| e.frame) == Some(frame)) {
            frame = get_quantized_frame(loop_frames, cycle_frames, subcycle_frames, frame, mode, true);
            if mode == QuantizeMode::Off {
                break;
            }
        }
        let reschedule = self
            .primary_order
            .iter()
            .filter_map(|&idx| self.events.get(idx))
            .any(|e| e.kind.reschedules() && !e.processed);
        let mut event = Event::new(kind, preset).with_action(action).at_frame(frame);
        event.reschedule = reschedule;
        let idx = self.events.take(event)?;
        self.primary_order.push(idx);
        if kind == EventKind::Switch {
            self.switch_event = Some(idx);
        }
        Some(idx)
    }

    /// Schedules a `JumpPlay`/`ReversePlay` child compensating for input+output latency (spec
    /// §4.6 "Play-jump scheduling"). If the computed frame would land before `current_frame`, the
    /// jump's distance is shortened and the loss recorded.
    pub fn schedule_jump(
        &mut self,
        parent: PoolIndex,
        parent_frame: i64,
        in_latency: i64,
        out_latency: i64,
        current_frame: i64,
        reverse: bool,
        preset: Preset,
    ) -> Option<PoolIndex> {
        if self.events.get(parent)?.reschedule {
            // Deferred until the earlier mode-ending event runs and reschedules this one.
            return None;
        }
        let ideal = parent_frame - in_latency - out_latency;
        let (frame, loss) = if ideal < current_frame {
            (current_frame, current_frame - ideal)
        } else {
            (ideal, 0)
        };
        let kind = if reverse { EventKind::ReversePlay } else { EventKind::JumpPlay };
        let mut child = Event::new(kind, preset).at_frame(frame);
        child.parent = Some(parent);
        child.latency_loss = loss;
        let child_idx = self.events.take(child)?;
        self.link_child(parent, child_idx);
        Some(child_idx)
    }

    fn link_child(&mut self, parent: PoolIndex, child: PoolIndex) {
        let first_child = self.events.get(parent).and_then(|p| p.first_child);
        if let Some(child_event) = self.events.get_mut(child) {
            child_event.next_sibling = first_child;
        }
        if let Some(parent_event) = self.events.get_mut(parent) {
            parent_event.first_child = Some(child);
        }
    }

    /// Runs after a mode-ending event completes: walks the remaining `reschedule` events in
    /// insertion order, removes them, and returns them (nearest frame first) so the caller can
    /// replay each through its function's reschedule hook (spec §4.6 "Rescheduling").
    pub fn take_rescheduled(&mut self) -> Vec<PoolIndex> {
        let mut deferred: Vec<PoolIndex> = self
            .primary_order
            .iter()
            .copied()
            .filter(|&idx| self.events.get(idx).map(|e| e.reschedule).unwrap_or(false))
            .collect();
        deferred.sort_by_key(|&idx| self.events.get(idx).and_then(|e| e.frame).unwrap_or(i64::MAX));
        self.primary_order.retain(|idx| !deferred.contains(idx));
        for &idx in &deferred {
            if let Some(event) = self.events.get_mut(idx) {
                event.reschedule = false;
            }
        }
        deferred
    }

    /// Finds the next event or pseudo-event to process in `[block_start, block_start + len)`
    /// (spec §4.6 "Next-event selection"). Immediate events preempt everything; otherwise the
    /// nearest scheduled event wins, preferring a same-frame jump child over its parent; failing
    /// that, the next injected `SyncEvent` if it precedes the scheduled candidate; failing that,
    /// a debounced loop/cycle/subcycle boundary — whichever of the three the block crosses first.
    pub fn next_event(
        &mut self,
        block_start: i64,
        len: i64,
        loop_frames: i64,
        cycle_frames: i64,
        subcycle_frames: i64,
    ) -> NextEvent {
        if let Some(&idx) = self
            .primary_order
            .iter()
            .chain(self.all_children().iter())
            .find(|&&idx| self.events.get(idx).map(|e| e.immediate && !e.processed).unwrap_or(false))
        {
            return NextEvent::Scheduled(idx);
        }

        let window_end = block_start + len;
        let mut candidate: Option<(i64, PoolIndex)> = None;
        for &idx in self.primary_order.iter().chain(self.all_children().iter()) {
            let Some(event) = self.events.get(idx) else { continue };
            if event.processed || event.reschedule {
                continue;
            }
            let Some(frame) = event.frame else { continue };
            if frame < block_start || frame >= window_end {
                continue;
            }
            let better = match candidate {
                None => true,
                Some((best_frame, best_idx)) => {
                    frame < best_frame
                        || (frame == best_frame
                            && event.kind.is_jump()
                            && !self.events.get(best_idx).map(|e| e.kind.is_jump()).unwrap_or(false))
                }
            };
            if better {
                candidate = Some((frame, idx));
            }
        }

        if let Some(sync) = self.pending_sync_events.first() {
            if let Some((frame, _)) = candidate {
                if (sync.pulse_frame as i64) >= frame {
                    return NextEvent::Scheduled(candidate.unwrap().1);
                }
            }
            return NextEvent::Sync(self.pending_sync_events.remove(0));
        }

        if let Some((_, idx)) = candidate {
            return NextEvent::Scheduled(idx);
        }

        // Debounced loop/cycle/subcycle boundary pseudo-events (spec §4.6 step 4: "Interleave
        // pseudo events at loop start, cycle, and subcycle boundaries using a debounced
        // lastSyncEventFrame"). Each unit is checked against its own debounce so a loop boundary
        // (which is also a cycle and subcycle boundary) doesn't suppress the finer-grained ones
        // on a later call; when more than one boundary falls in-window, the nearest wins, ties
        // broken coarsest-first (Loop, then Cycle, then Subcycle).
        use looper_api::sync::PulseType;
        let window_end = block_start + len;

        let loop_boundary = boundary_in_window(block_start, window_end, loop_frames, self.last_loop_boundary_frame);
        let cycle_boundary = boundary_in_window(block_start, window_end, cycle_frames, self.last_cycle_boundary_frame);
        let subcycle_boundary =
            boundary_in_window(block_start, window_end, subcycle_frames, self.last_subcycle_boundary_frame);

        let candidates = [
            (loop_boundary, PulseType::Loop),
            (cycle_boundary, PulseType::Cycle),
            (subcycle_boundary, PulseType::Subcycle),
        ];
        let winner = candidates
            .into_iter()
            .filter_map(|(frame, pulse_type)| frame.map(|f| (f, pulse_type)))
            .min_by_key(|&(frame, pulse_type)| (frame, rank(pulse_type)));

        if let Some((frame, pulse_type)) = winner {
            match pulse_type {
                PulseType::Loop => self.last_loop_boundary_frame = Some(frame),
                PulseType::Cycle => self.last_cycle_boundary_frame = Some(frame),
                PulseType::Subcycle => self.last_subcycle_boundary_frame = Some(frame),
                _ => {}
            }
            return NextEvent::Boundary(pulse_type);
        }
        NextEvent::None
    }

    fn all_children(&self) -> Vec<PoolIndex> {
        let mut out = Vec::new();
        for &primary in &self.primary_order {
            let mut cursor = self.events.get(primary).and_then(|e| e.first_child);
            while let Some(idx) = cursor {
                out.push(idx);
                cursor = self.events.get(idx).and_then(|e| e.next_sibling);
            }
        }
        out
    }

    /// Queues derived sync events for interleaving, generated earlier in the block by a
    /// `SyncTracker::advance` call (spec §4.8 step 3).
    pub fn push_sync_events(&mut self, events: impl IntoIterator<Item = SyncEvent>) {
        self.pending_sync_events.extend(events);
    }

    pub fn mark_processed(&mut self, idx: PoolIndex) {
        if let Some(event) = self.events.get_mut(idx) {
            event.processed = true;
        }
    }

    pub fn event(&self, idx: PoolIndex) -> Option<&Event> {
        self.events.get(idx)
    }

    pub fn event_mut(&mut self, idx: PoolIndex) -> Option<&mut Event> {
        self.events.get_mut(idx)
    }

    /// Frees an event still referenced on the primary/child lists: spec §7 treats this as a
    /// contract violation ("warn, force-remove, continue"), not an error return.
    pub fn force_free(&mut self, idx: PoolIndex) {
        if self.primary_order.contains(&idx) {
            tracing_warn!(?idx, "freeing an event still on the primary list, force-removing");
        }
        self.primary_order.retain(|&i| i != idx);
        if self.switch_event == Some(idx) {
            self.switch_event = None;
        }
        self.events.give(idx);
    }

    /// Undo: removes the last quantized parent event without `no_undo`, undoing any processed
    /// children in reverse order first (spec §4.6 "Undo"). Undoing a pending switch pops its
    /// stacked child first; the switch itself only cancels once its stack is empty.
    pub fn undo(&mut self) -> Option<Action> {
        if let Some(switch_idx) = self.switch_event {
            if let Some(child) = self.events.get(switch_idx).and_then(|e| e.first_child) {
                let next_sibling = self.events.get(child).and_then(|e| e.next_sibling);
                if let Some(parent) = self.events.get_mut(switch_idx) {
                    parent.first_child = next_sibling;
                }
                let action = self.events.get_mut(child).and_then(|e| e.action.take());
                self.events.give(child);
                return action;
            }
            // Stack empty: the switch itself cancels.
            let action = self.events.get_mut(switch_idx).and_then(|e| e.action.take());
            self.primary_order.retain(|&i| i != switch_idx);
            self.events.give(switch_idx);
            self.switch_event = None;
            return action;
        }

        let target = self
            .primary_order
            .iter()
            .rev()
            .copied()
            .find(|&idx| self.events.get(idx).map(|e| !e.no_undo).unwrap_or(false))?;

        let mut child = self.events.get(target).and_then(|e| e.first_child);
        let mut to_undo = Vec::new();
        while let Some(idx) = child {
            if self.events.get(idx).map(|e| e.processed).unwrap_or(false) {
                to_undo.push(idx);
            }
            child = self.events.get(idx).and_then(|e| e.next_sibling);
        }
        // Processed children undo in reverse (most-recently-processed first); `to_undo` was
        // collected oldest-to-newest via the sibling chain, so reverse it here.
        for idx in to_undo.into_iter().rev() {
            self.events.give(idx);
        }
        let action = self.events.get_mut(target).and_then(|e| e.action.take());
        self.primary_order.retain(|&i| i != target);
        self.events.give(target);
        action
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
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

    #[test]
    fn quantize_off_passes_frame_through() {
        assert_eq!(
            get_quantized_frame(1000, 500, 100, 733, QuantizeMode::Off, false),
            733
        );
    }

    #[test]
    fn quantize_cycle_rounds_up() {
        assert_eq!(
            get_quantized_frame(1000, 500, 100, 733, QuantizeMode::Cycle, false),
            1000
        );
        assert_eq!(
            get_quantized_frame(1000, 500, 100, 500, QuantizeMode::Cycle, false),
            500
        );
        assert_eq!(
            get_quantized_frame(1000, 500, 100, 500, QuantizeMode::Cycle, true),
            1000
        );
    }

    #[test]
    fn schedule_and_undo_round_trips() {
        let mut s = Scheduler::new();
        let preset = Preset::default();
        let idx = s
            .schedule(EventKind::Multiply, action(Function::Multiply), 10, 1000, 500, 100, preset)
            .unwrap();
        assert!(s.event(idx).is_some());
        assert!(!s.is_empty());
        let undone = s.undo();
        assert_eq!(undone.unwrap().function, Function::Multiply);
        assert!(s.is_empty());
    }

    #[test]
    fn jump_scheduling_shortens_distance_past_current_frame() {
        let mut s = Scheduler::new();
        let preset = Preset::default();
        let parent = s
            .schedule(EventKind::Multiply, action(Function::Multiply), 0, 1000, 500, 100, preset.clone())
            .unwrap();
        let child = s.schedule_jump(parent, 10, 100, 100, 50, false, preset).unwrap();
        let event = s.event(child).unwrap();
        assert_eq!(event.frame, Some(50));
        assert!(event.latency_loss > 0);
    }

    #[test]
    fn same_frame_collision_advances_to_next_boundary() {
        let mut s = Scheduler::new();
        let mut preset = Preset::default();
        preset.quantize_mode = QuantizeMode::Cycle;
        let _a = s
            .schedule(EventKind::Multiply, action(Function::Multiply), 500, 1000, 500, 100, preset.clone())
            .unwrap();
        let b = s
            .schedule(EventKind::Insert, action(Function::Insert), 500, 1000, 500, 100, preset)
            .unwrap();
        assert_ne!(s.event(_a).unwrap().frame, s.event(b).unwrap().frame);
    }
}
