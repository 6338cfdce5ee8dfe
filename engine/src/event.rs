//! The event type and its arena-indexed parent/child linkage (spec §4.6).
//!
//! The spec's own Design Notes point at "arena + indices" for exactly this: a primary event may
//! own child events (`JumpPlay`, `ReversePlay`, switch-stack entries) and a naive `Box`-based tree
//! would need `Rc<RefCell<>>` or unsafe self-reference to let a child point back at its parent.
//! Indices into a [`Pool`](crate::pool::Pool) sidestep that the way the teacher's own supplier
//! chain sidesteps ownership cycles by holding children, never siblings-of-parents, directly.

use crate::config::Preset;
use crate::loop_machine::RecordEndTarget;
use crate::pool::PoolIndex;
use looper_api::action::{Action, Function};

/// The closed set of event kinds the scheduler understands. Distinct from [`Function`] (the
/// wire-level action vocabulary): one `Function` invocation can produce several of these (a
/// `Multiply` action produces a primary `Multiply` event plus a child `JumpPlay`).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum EventKind {
    Record,
    RecordStop,
    Multiply,
    MultiplyEnd,
    Insert,
    InsertEnd,
    Replace,
    ReplaceEnd,
    Substitute,
    SubstituteEnd,
    Overdub,
    OverdubEnd,
    Mute,
    Unmute,
    Reverse,
    JumpPlay,
    ReversePlay,
    Switch,
    SwitchConfirm,
    Undo,
    Redo,
    Rehearse,
    RehearseEnd,
    /// Multiply ended by an unrounded-ending function (spec §4.4 "unrounded multiply") rather
    /// than a second `Multiply` call: the new length is the raw elapsed frame count, not rounded
    /// up to the next whole cycle, and the record layer is trimmed in place via `Layer::splice`.
    MultiplyEndUnrounded,
    /// A synthetic boundary pseudo-event (loop/cycle/subcycle) or an injected `SyncEvent`,
    /// interleaved into the next-event stream per spec §4.6 step 4 rather than scheduled by a
    /// function invocation.
    Sync,
    /// Relocates the loop's effective frame 0 to the current playback frame (spec §4.4
    /// "Start-point relocation", §6 function `StartPoint`).
    StartPoint,
}

impl EventKind {
    /// Mode-ending events that cause later-scheduled events to be marked `reschedule` (spec
    /// §4.6 step 2: "Record, Multiply, Insert, Switch, RecordStop, loop boundary").
    pub fn reschedules(self) -> bool {
        matches!(
            self,
            EventKind::Record
                | EventKind::Multiply
                | EventKind::Insert
                | EventKind::Switch
                | EventKind::RecordStop
        )
    }

    pub fn is_jump(self) -> bool {
        matches!(self, EventKind::JumpPlay | EventKind::ReversePlay)
    }
}

/// One scheduled (or pending) event. Lives in a [`Pool`](crate::pool::Pool) owned by the track's
/// scheduler; `parent`/`first_child`/`next_sibling` are indices into that same pool.
pub struct Event {
    pub kind: EventKind,
    pub function: Option<Function>,
    /// Target frame, once known. `None` while still waiting on a quantize boundary or a sync
    /// pulse.
    pub frame: Option<i64>,
    pub parent: Option<PoolIndex>,
    pub first_child: Option<PoolIndex>,
    pub next_sibling: Option<PoolIndex>,
    /// Set when an earlier event in the list reschedules this one (spec §4.6 step 2); its
    /// play-jump scheduling is deferred until the earlier event runs.
    pub reschedule: bool,
    /// Exempt from undo (spec §4.6 "the last quantized parent event without the `noUndo` flag").
    pub no_undo: bool,
    /// Preempts all other pending events for the block (spec §4.6 step 4).
    pub immediate: bool,
    /// `afterLoop` events run after the loop-boundary pseudo event even when scheduled for the
    /// same frame (spec §5 ordering guarantees).
    pub after_loop: bool,
    /// Frames the jump's distance was shortened by when it would otherwise land before the
    /// current frame (spec §4.6 "Play-jump scheduling").
    pub latency_loss: i64,
    pub preset: Preset,
    pub action: Option<Action>,
    pub processed: bool,
    /// Where a `RecordStopEvent` lands the loop (Play/Rehearse/Insert/Switch), decided by the
    /// ending function at schedule time but only applied to `Loop` when this event actually
    /// fires (spec §4.6 "events act at accurately quantized frames, not at post time").
    pub end_target: RecordEndTarget,
}

impl Event {
    pub fn new(kind: EventKind, preset: Preset) -> Self {
        Self {
            kind,
            function: None,
            frame: None,
            parent: None,
            first_child: None,
            next_sibling: None,
            reschedule: false,
            no_undo: false,
            immediate: false,
            after_loop: false,
            latency_loss: 0,
            preset,
            action: None,
            processed: false,
            end_target: RecordEndTarget::Play,
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.function = Some(action.function);
        self.action = Some(action);
        self
    }

    pub fn at_frame(mut self, frame: i64) -> Self {
        self.frame = Some(frame);
        self
    }

    pub fn with_end_target(mut self, end_target: RecordEndTarget) -> Self {
        self.end_target = end_target;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reschedules_matches_mode_ending_events() {
        assert!(EventKind::Record.reschedules());
        assert!(EventKind::Switch.reschedules());
        assert!(!EventKind::JumpPlay.reschedules());
        assert!(!EventKind::Sync.reschedules());
    }

    #[test]
    fn jump_kinds_are_identified() {
        assert!(EventKind::JumpPlay.is_jump());
        assert!(EventKind::ReversePlay.is_jump());
        assert!(!EventKind::Multiply.is_jump());
    }

    #[test]
    fn builder_sets_frame_and_action_function() {
        let action = Action {
            function: Function::Multiply,
            trigger: looper_api::action::Trigger::Internal,
            trigger_id: 0,
            track_target: None,
            down_edge: true,
            sustain_long: false,
            argument: None,
        };
        let event = Event::new(EventKind::Multiply, Preset::default())
            .with_action(action)
            .at_frame(128);
        assert_eq!(event.frame, Some(128));
        assert_eq!(event.function, Some(Function::Multiply));
    }
}
