//! Records produced by an external binding layer (control surface, host automation, scripting)
//! and handed to the engine for dispatch into the event system.
//!
//! The engine owns an accepted [`Action`] until the event it spawned completes, at which point
//! it's returned to a pool. Nothing here is real-time code; these are just the records crossing
//! the boundary.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// What the user wants to happen. The core dispatches purely on this value; it never interprets
/// `trigger`/`trigger_id`/focus-lock style attributes, which remain opaque to it.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Function {
    Record,
    Overdub,
    Multiply,
    Insert,
    Replace,
    Substitute,
    Mute,
    Reverse,
    Switch,
    Undo,
    Redo,
    NextLoop,
    PrevLoop,
    Reset,
    /// Ends `Record` into `Rehearse` instead of `Play` (spec §4.5 "RecordStop ... Rehearse ...
    /// depending on invoking function").
    Rehearse,
    /// Relocates the loop's effective frame 0 to the current playback frame (spec §4.4
    /// "Start-point relocation", §6 function `StartPoint`).
    StartPoint,
    /// Named in spec §3's closed event-type vocabulary as a distinct function/event kind. No
    /// module in this build implements the multi-loop-per-track, script-interpreter, or
    /// rate-control machinery these depend on; accepted here for wire/persistence completeness
    /// (see `DESIGN.md`) but `engine::function::resolve` does not yet dispatch them to any
    /// `LoopEvent` — they fall through the same silent "no effect in this mode" path as a
    /// genuine mode conflict.
    Move,
    Slip,
    Speed,
    Rate,
    Realign,
    Return,
    Track,
    Script,
}

/// The physical or logical source that produced the trigger (button down, MIDI note, OSC
/// message, script call, ...). Opaque to the core beyond being copied onto the resulting event
/// for diagnostics.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Trigger {
    Midi,
    Osc,
    Key,
    Script,
    Internal,
}

/// Which track the action targets. `None` means "the currently focused track", resolved by the
/// binding layer before the action reaches the engine in most cases, but kept optional here since
/// some bindings (e.g. "all tracks") hand that resolution to the engine.
pub type TrackTarget = Option<u32>;

/// A dispatched trigger describing what the user wants and where.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub function: Function,
    pub trigger: Trigger,
    /// Identifies the physical control that produced this action, for sustain-edge tracking by
    /// the binding layer. The core treats it as an opaque token.
    pub trigger_id: u32,
    pub track_target: TrackTarget,
    /// `true` on press, `false` on release. Functions that only care about down-edges ignore
    /// release actions entirely.
    pub down_edge: bool,
    /// Set by the binding layer once a press has been held past the "long press" threshold.
    pub sustain_long: bool,
    /// Extra payload a function may interpret, e.g. a target loop index for `NextLoop`/`PrevLoop`
    /// shortcuts, or a quantize override.
    pub argument: Option<ActionArgument>,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ActionArgument {
    LoopIndex { index: u32 },
    Amount { value: f64 },
}
