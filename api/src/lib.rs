//! Wire and persisted-state types shared between the engine and whatever embeds it.
//!
//! Everything here is plain data: no real-time code, no engine behavior. The engine crate
//! converts to and from these types at its boundary.

pub mod action;
pub mod midi;
pub mod persistence;
pub mod runtime;
pub mod sync;

pub type LooperApiResult<T> = Result<T, &'static str>;
