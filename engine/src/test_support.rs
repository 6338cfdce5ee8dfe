//! Deterministic block-stepping helpers for the end-to-end scenario tests named in spec §8.
//!
//! Grounded in the teacher's own integration-test harnesses (small, crate-internal helpers
//! colocated with the code they exercise) rather than a full mock host: the engine's block
//! contract is narrow enough that a harness only needs to step silence and post actions at
//! chosen block indices. Declared `#[cfg(test)] pub mod test_support;` in `lib.rs`, so it only
//! exists in test builds of this crate — not a shared, always-compiled harness other crates could
//! depend on.
//!
//! Scenario coverage (spec §8 "End-to-end scenarios", six numbered cases): scenario 1 (simple
//! record-play) is exercised here via [`TestHarness`] in `engine_driver.rs`'s
//! `simple_record_play_reaches_play_mode`. Scenario 6 (drift correction) is exercised directly
//! against `SyncTracker` in `sync_tracker.rs`'s `drift_correction_crosses_threshold` rather than
//! through this harness, since it needs no block-stepping. Scenario 4 (unrounded multiply) has
//! bookkeeping coverage in `loop_machine.rs`'s `unrounded_multiply_trims_to_raw_elapsed_frames`.
//! Scenarios 2 (sync-record to MIDI bar), 3 (rounded multiply), and 5 (undo through a switch
//! stack) have no test at any level yet: 2 needs a bar-quantized record-stop wired through
//! `Preset::quantize_mode`/`Synchronizer` that nothing in this harness drives today; 3's expected
//! numbers hinge on which frame unit "multiply cycles" round to, which this build doesn't resolve
//! unambiguously; 5's stacked-undo mechanics exist in `Scheduler::undo`'s switch-child-popping
//! path, but `function::dispatch` never attaches an `Overdub`/`Reverse` event as a child of a
//! pending `Switch` event, so there is no call path to stack onto in the first place.

use crate::buffer::OwnedAudioBuffer;
use crate::config::EngineConfig;
use crate::engine_driver::{BlockInput, BlockOutput, Engine};
use looper_api::action::Action;
use looper_api::sync::{HostSyncStatus, TransportEvent};

/// A single-track (unless configured otherwise) engine stepped block-by-block with silence,
/// posting actions at chosen block indices. Scenario tests build one, call [`Self::run_blocks`]
/// or [`Self::step`] repeatedly, then assert on `harness.engine.tracks[..]`.
pub struct TestHarness {
    pub engine: Engine,
    channels: usize,
    block_size: usize,
    block_index: i64,
}

impl TestHarness {
    pub fn new(config: EngineConfig) -> Self {
        let channels = config.channels as usize;
        let block_size = config.block_size;
        Self {
            engine: Engine::new(config),
            channels,
            block_size,
            block_index: 0,
        }
    }

    /// Posts `action` for `track_index`, to be dispatched at the start of the next block this
    /// harness steps.
    pub fn post(&mut self, track_index: usize, action: Action) {
        let now = self.block_index * self.block_size as i64;
        self.engine.post_action(track_index, action, now);
    }

    /// Steps one silent block (no host transport activity, no MIDI input), returning the
    /// block's MIDI output.
    pub fn step(&mut self) -> BlockOutput {
        self.step_with_host_sync(HostSyncStatus {
            transport_event: TransportEvent::None,
            ..Default::default()
        })
    }

    /// Steps one silent block with a specific host transport status. Intended for sync-to-host
    /// scenarios (spec §8 scenario 2); no test exercises this yet (see this module's scenario
    /// coverage note above).
    pub fn step_with_host_sync(&mut self, host_sync: HostSyncStatus) -> BlockOutput {
        let silence = vec![0.0f32; self.block_size * self.channels];
        let input = BlockInput {
            input: &silence,
            frames: self.block_size,
            host_sync,
            midi_in: &[],
        };
        let mut output = OwnedAudioBuffer::new(self.channels, self.block_size);
        let result = self.engine.process_block(&input, &mut output);
        self.block_index += 1;
        result
    }

    /// Steps `count` silent blocks in a row.
    pub fn run_blocks(&mut self, count: usize) {
        for _ in 0..count {
            self.step();
        }
    }

    pub fn block_index(&self) -> i64 {
        self.block_index
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
    fn harness_steps_blocks_and_advances_frame_counter() {
        let mut h = TestHarness::new(EngineConfig {
            channels: 1,
            track_count: 1,
            block_size: 64,
            ..EngineConfig::default()
        });
        h.run_blocks(5);
        assert_eq!(h.block_index(), 5);
    }

    #[test]
    fn harness_post_then_step_enters_record_mode() {
        let mut h = TestHarness::new(EngineConfig {
            channels: 1,
            track_count: 1,
            block_size: 64,
            ..EngineConfig::default()
        });
        h.post(0, action(Function::Record));
        h.step();
        assert_eq!(h.engine.tracks[0].loop_.mode, crate::loop_machine::Mode::Record);
    }
}
