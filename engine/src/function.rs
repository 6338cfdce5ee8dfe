//! Dispatches a wire-level [`Function`] to the loop state machine and scheduler, honoring the
//! "silently ignore on mode conflict" rule (spec §7 "User-visible failure": "A failed function
//! invocation due to mode conflict is silently ignored (the EDP tradition); scripts may detect
//! this by observing state variables").

use crate::config::Preset;
use crate::event::EventKind;
use crate::loop_machine::{Loop, LoopEvent, Mode, RecordEndTarget};
use crate::scheduler::Scheduler;
use looper_api::action::{Action, Function};

/// Resolves which [`LoopEvent`] (and, for `RecordStop`, which end target) a `Function`
/// invocation produces in the loop's *current* mode. Returns `None` when the function has no
/// effect in this mode — the caller drops the action silently rather than surfacing an error.
pub fn resolve(function: Function, mode: Mode) -> Option<(LoopEvent, RecordEndTarget)> {
    use Mode::*;
    let event = match (function, mode) {
        (Function::Record, Reset) | (Function::Record, Threshold) | (Function::Record, Synchronize) => {
            LoopEvent::RecordEvent
        }
        (Function::Record, Record) => LoopEvent::RecordStopEvent,
        (Function::Rehearse, Record) => LoopEvent::RecordStopEvent,
        (Function::Overdub, Play) => LoopEvent::OverdubEvent,
        (Function::Overdub, Overdub) => LoopEvent::OverdubEndEvent,
        (Function::Multiply, Play) | (Function::Multiply, Overdub) => LoopEvent::MultiplyEvent,
        (Function::Multiply, Multiply) => LoopEvent::MultiplyEndEvent,
        (Function::Record, Multiply) => {
            // Unrounded multiply ending (spec §4.4): `Record` called mid-`Multiply` truncates to
            // the raw elapsed length instead of rounding up to the next whole cycle (cross-checked
            // against `MultiplyFunction::isUnroundedEnding` in the original: `f == Record`).
            LoopEvent::MultiplyEndUnroundedEvent
        }
        (Function::Insert, Play) => LoopEvent::InsertEvent,
        (Function::Insert, Insert) => LoopEvent::InsertEndEvent,
        (Function::Replace, Play) => LoopEvent::ReplaceEvent,
        (Function::Replace, Replace) => LoopEvent::ReplaceEndEvent,
        (Function::Substitute, Play) => LoopEvent::SubstituteEvent,
        (Function::Substitute, Substitute) => LoopEvent::SubstituteEndEvent,
        (Function::Mute, _) if mode != Mute => LoopEvent::MuteEvent,
        (Function::Mute, Mute) => LoopEvent::UnmuteEvent,
        (Function::Reverse, _) => LoopEvent::ReverseEvent,
        (Function::Switch, _) if mode != Switch => LoopEvent::SwitchEvent,
        (Function::Switch, Switch) => LoopEvent::SwitchConfirmEvent,
        (Function::StartPoint, _) => LoopEvent::StartPointEvent,
        _ => return None,
    };
    let target = match (function, mode) {
        (Function::Rehearse, Record) => RecordEndTarget::Rehearse,
        _ => RecordEndTarget::Play,
    };
    Some((event, target))
}

/// Applies an accepted action: resolves it against the loop's current mode to check whether the
/// transition is valid, then schedules the corresponding event. The transition itself is *not*
/// applied to `loop_` here — per spec §4.6 "events act at accurately quantized frames, not at
/// post time", `loop_.apply_event` only runs once the scheduler actually fires this event (see
/// `track::apply_scheduled_event`), carried forward via the scheduled `Event`'s `kind`/
/// `end_target`. Mode conflicts (no transition exists) are dropped without diagnostics, matching
/// spec §7's EDP-tradition rule — this is normal, expected behavior, not an anomaly.
pub fn dispatch(
    loop_: &mut Loop,
    scheduler: &mut Scheduler,
    action: Action,
    now: i64,
    subcycle_frames: usize,
    preset: Preset,
) {
    let Some((_, end_target)) = resolve(action.function, loop_.mode) else {
        return;
    };
    let kind = event_kind_for(action.function, loop_.mode);
    let cycle_frames = if loop_.cycles > 0 {
        loop_.frames / loop_.cycles as usize
    } else {
        loop_.frames
    };
    if let Some(idx) = scheduler.schedule(kind, action, now, loop_.frames, cycle_frames, subcycle_frames, preset) {
        if let Some(event) = scheduler.event_mut(idx) {
            event.end_target = end_target;
        }
    }
}

/// Maps a scheduled event's `kind` back to the `LoopEvent` (and, via the event's own
/// `end_target`) that `Loop::apply_event` should run once the event fires. `None` for event kinds
/// that never drive a mode transition directly (play-jump children, undo/redo, sync/boundary
/// pseudo-events).
pub fn loop_event_for_kind(kind: EventKind) -> Option<LoopEvent> {
    use EventKind::*;
    Some(match kind {
        Record => LoopEvent::RecordEvent,
        RecordStop => LoopEvent::RecordStopEvent,
        Multiply => LoopEvent::MultiplyEvent,
        MultiplyEnd => LoopEvent::MultiplyEndEvent,
        MultiplyEndUnrounded => LoopEvent::MultiplyEndUnroundedEvent,
        Insert => LoopEvent::InsertEvent,
        InsertEnd => LoopEvent::InsertEndEvent,
        Replace => LoopEvent::ReplaceEvent,
        ReplaceEnd => LoopEvent::ReplaceEndEvent,
        Substitute => LoopEvent::SubstituteEvent,
        SubstituteEnd => LoopEvent::SubstituteEndEvent,
        Overdub => LoopEvent::OverdubEvent,
        OverdubEnd => LoopEvent::OverdubEndEvent,
        Mute => LoopEvent::MuteEvent,
        Unmute => LoopEvent::UnmuteEvent,
        Reverse => LoopEvent::ReverseEvent,
        Switch => LoopEvent::SwitchEvent,
        SwitchConfirm => LoopEvent::SwitchConfirmEvent,
        Rehearse => LoopEvent::RehearseEvent,
        RehearseEnd => LoopEvent::RehearseEndEvent,
        StartPoint => LoopEvent::StartPointEvent,
        JumpPlay | ReversePlay | Undo | Redo | Sync => return None,
    })
}

fn event_kind_for(function: Function, mode: Mode) -> EventKind {
    match (function, mode) {
        (Function::Record, Mode::Record) => EventKind::RecordStop,
        (Function::Record, Mode::Multiply) => EventKind::MultiplyEndUnrounded,
        (Function::Record, _) => EventKind::Record,
        (Function::Rehearse, Mode::Record) => EventKind::RecordStop,
        (Function::Rehearse, _) => EventKind::Rehearse,
        (Function::Overdub, Mode::Overdub) => EventKind::OverdubEnd,
        (Function::Overdub, _) => EventKind::Overdub,
        (Function::Multiply, Mode::Multiply) => EventKind::MultiplyEnd,
        (Function::Multiply, _) => EventKind::Multiply,
        (Function::Insert, Mode::Insert) => EventKind::InsertEnd,
        (Function::Insert, _) => EventKind::Insert,
        (Function::Replace, Mode::Replace) => EventKind::ReplaceEnd,
        (Function::Replace, _) => EventKind::Replace,
        (Function::Substitute, Mode::Substitute) => EventKind::SubstituteEnd,
        (Function::Substitute, _) => EventKind::Substitute,
        (Function::Mute, Mode::Mute) => EventKind::Unmute,
        (Function::Mute, _) => EventKind::Mute,
        (Function::Reverse, _) => EventKind::Reverse,
        (Function::Switch, Mode::Switch) => EventKind::SwitchConfirm,
        (Function::Switch, _) => EventKind::Switch,
        (Function::StartPoint, _) => EventKind::StartPoint,
        (Function::Undo, _) => EventKind::Undo,
        (Function::Redo, _) => EventKind::Redo,
        (Function::NextLoop, _) | (Function::PrevLoop, _) | (Function::Reset, _) => EventKind::Sync,
        (Function::Move, _)
        | (Function::Slip, _)
        | (Function::Speed, _)
        | (Function::Rate, _)
        | (Function::Realign, _)
        | (Function::Return, _)
        | (Function::Track, _)
        | (Function::Script, _) => EventKind::Sync,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_in_reset_resolves_to_record_event() {
        let (event, _) = resolve(Function::Record, Mode::Reset).unwrap();
        assert_eq!(event, LoopEvent::RecordEvent);
    }

    #[test]
    fn record_in_record_resolves_to_stop() {
        let (event, target) = resolve(Function::Record, Mode::Record).unwrap();
        assert_eq!(event, LoopEvent::RecordStopEvent);
        assert_eq!(target, RecordEndTarget::Play);
    }

    #[test]
    fn mute_in_play_then_unmute_in_mute() {
        assert_eq!(resolve(Function::Mute, Mode::Play).unwrap().0, LoopEvent::MuteEvent);
        assert_eq!(resolve(Function::Mute, Mode::Mute).unwrap().0, LoopEvent::UnmuteEvent);
    }

    #[test]
    fn mode_conflict_resolves_to_none() {
        assert!(resolve(Function::Overdub, Mode::Reset).is_none());
        assert!(resolve(Function::Multiply, Mode::Record).is_none());
    }

    #[test]
    fn reverse_is_available_everywhere() {
        for mode in [Mode::Reset, Mode::Play, Mode::Record, Mode::Mute] {
            assert_eq!(resolve(Function::Reverse, mode).unwrap().0, LoopEvent::ReverseEvent);
        }
    }
}
