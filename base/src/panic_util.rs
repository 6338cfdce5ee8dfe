use std::panic::AssertUnwindSafe;

/// Executes `f`, catching any panic instead of letting it unwind past the caller, and
/// temporarily silencing the panic hook so a bug on the audio thread doesn't print to stderr
/// mid-block. Returns `None` if `f` panicked.
///
/// Should be used **very** sparingly: this is the last-resort boundary for a real-time callback
/// that must keep producing audio no matter what (spec §7 "the engine continues producing
/// audio"), not a substitute for handling errors where they occur.
pub fn catch_panics<R>(f: impl FnOnce() -> R) -> Option<R> {
    let old_panic_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(|_| {}));
    let result = std::panic::catch_unwind(AssertUnwindSafe(f)).ok();
    std::panic::set_hook(old_panic_hook);
    result
}
