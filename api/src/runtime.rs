//! Process-wide runtime flags consulted by test harnesses and diagnostic tooling.
//!
//! These are intentionally coarse and global: they exist so an integration test can force a
//! deterministic corner (e.g. "the next block must drift-correct") without threading a parameter
//! through every call in the audio path.

use std::sync::atomic::{AtomicBool, Ordering};

/// Suppresses live input entirely; the engine behaves as if every input sample were silence.
/// Used by harnesses that want to drive recording purely from pre-rendered material.
static NO_EXTERNAL_AUDIO: AtomicBool = AtomicBool::new(false);

/// Requests a one-shot drift correction on the next block regardless of the tracker's own
/// threshold, then clears itself.
static FORCE_DRIFT_CORRECT: AtomicBool = AtomicBool::new(false);

pub fn no_external_audio() -> bool {
    NO_EXTERNAL_AUDIO.load(Ordering::Relaxed)
}

pub fn set_no_external_audio(value: bool) {
    NO_EXTERNAL_AUDIO.store(value, Ordering::Relaxed);
}

/// Consumes the pending one-shot drift-correct request, if any.
pub fn take_force_drift_correct() -> bool {
    FORCE_DRIFT_CORRECT.swap(false, Ordering::Relaxed)
}

pub fn request_force_drift_correct() {
    FORCE_DRIFT_CORRECT.store(true, Ordering::Relaxed);
}
