//! The real-time looping engine core (spec §1-§6): ramp/fade, audio buffer/cursor, resampler,
//! layer/segment content graph, loop state machine, event scheduler, sync trackers, track, and
//! the top-level block driver.
//!
//! Nothing in this crate allocates on the interrupt path after [`Engine::new`] returns; pools
//! (`pool::Pool`) are sized up front and `rt_allocator` enforces the no-alloc discipline in debug
//! builds the same way it does in the teacher's own real-time matrix.

pub mod audio;
pub mod buffer;
pub mod config;
pub mod cursor;
pub mod diagnostics;
pub mod engine_driver;
pub mod event;
pub mod fade;
pub mod function;
pub mod layer;
pub mod loop_machine;
pub mod midi_queue;
pub mod mutex_util;
pub mod persistence;
pub mod pool;
pub mod resampler;
pub mod scheduler;
pub mod sync_tracker;
pub mod synchronizer;
pub mod track;

#[cfg(test)]
pub mod test_support;

pub use engine_driver::{BlockInput, BlockOutput, Engine};

/// Non-real-time, caller-facing error type (persistence load/save, setup/project validation,
/// control-surface dispatch from the control thread). The interrupt path never returns this —
/// per spec §7 "Propagation policy" it logs through [`diagnostics::Diagnostics`] and substitutes
/// silence/skips the offending event instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("schema version mismatch: {0}")]
    SchemaMismatch(#[from] looper_api::persistence::SchemaMismatch),
    #[error("persisted loop is invalid: {0}")]
    InvalidPersistedLoop(#[from] base::validation_util::ValidationError),
    #[error("track index {0} out of range")]
    TrackIndexOutOfRange(usize),
}

pub type EngineResult<T> = Result<T, EngineError>;
