//! Owns the three sync trackers (spec §4.7: "one each for host-beat input, MIDI clock input, and
//! the internal clock used to drive output MIDI clocks") and the per-track reference a track
//! holds into whichever source it follows.

use crate::sync_tracker::{DriftCheckPoint, SyncTracker};
use looper_api::sync::{HostSyncStatus, SyncEvent, SyncSource, TransportEvent};

/// Which sync source (if any) a track follows, and whether it is the elected master for that
/// role (spec §4.8 "Sync masters").
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct TrackSyncState {
    pub source: Option<SyncSource>,
    pub is_track_sync_master: bool,
    pub is_out_sync_master: bool,
}

/// Bundles the host-input, MIDI-input, and internal-output trackers and drives all three once
/// per block (spec §4.8 step 3: "Advances each sync tracker by the block length... before any
/// slave's event loop runs, so all slaves see the identical pulse schedule").
pub struct Synchronizer {
    pub host: SyncTracker,
    pub midi_in: SyncTracker,
    pub out: SyncTracker,
}

impl Synchronizer {
    pub fn new() -> Self {
        Self {
            host: SyncTracker::new(SyncSource::Host),
            midi_in: SyncTracker::new(SyncSource::Midi),
            out: SyncTracker::new(SyncSource::Out),
        }
    }

    pub fn tracker(&self, source: SyncSource) -> &SyncTracker {
        match source {
            SyncSource::Host => &self.host,
            SyncSource::Midi => &self.midi_in,
            SyncSource::Out => &self.out,
        }
    }

    pub fn tracker_mut(&mut self, source: SyncSource) -> &mut SyncTracker {
        match source {
            SyncSource::Host => &mut self.host,
            SyncSource::Midi => &mut self.midi_in,
            SyncSource::Out => &mut self.out,
        }
    }

    /// Applies the block's host transport status to the host tracker (spec §4.7 "Host transport,
    /// START/CONTINUE").
    pub fn apply_host_status(&mut self, status: &HostSyncStatus) {
        match status.transport_event {
            TransportEvent::Start => self.host.on_start(),
            TransportEvent::Stop => self.host.on_stop(),
            TransportEvent::Continue => {
                let pulse = status.beat.floor().max(0.0) as u32;
                self.host.on_continue(pulse);
            }
            TransportEvent::None => {}
        }
    }

    /// Advances all three trackers by one block, producing each one's derived pulses. Must run
    /// before any track's scheduler consumes them, per the ordering guarantee above.
    pub fn advance_all(&mut self, frames: i64) -> [Vec<SyncEvent>; 3] {
        let mut host_events = Vec::new();
        let mut midi_events = Vec::new();
        let mut out_events = Vec::new();
        self.host.advance(frames, &mut host_events);
        self.midi_in.advance(frames, &mut midi_events);
        self.out.advance(frames, &mut out_events);
        [host_events, midi_events, out_events]
    }

    /// Runs the drift check for every locked tracker (spec §4.7 "Drift"), called once per block
    /// at the configured checkpoint.
    pub fn check_all_drift(&mut self, max_drift: i64, at: DriftCheckPoint) {
        self.host.check_drift(max_drift, at);
        self.midi_in.check_drift(max_drift, at);
        self.out.check_drift(max_drift, at);
    }

    /// Honors the process-wide `forceDriftCorrect` test hook (spec §6 "Process-wide runtime
    /// flags"): injects a large synthetic drift on the out tracker so the next check corrects it
    /// unconditionally.
    pub fn force_drift_correct_if_requested(&mut self) {
        if looper_api::runtime::take_force_drift_correct() {
            self.out.force_drift(i64::MAX / 4);
        }
    }

    /// Elects a new sync master from `candidates` (in track order) after the current one resets
    /// (spec §4.8 "On reset of the current master, the engine scans remaining tracks... to elect
    /// a successor"). Returns the index of the newly elected track, if any remain.
    pub fn elect_successor(candidates: &[bool]) -> Option<usize> {
        candidates.iter().position(|&eligible| eligible)
    }
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_all_drives_all_three_trackers() {
        let mut sync = Synchronizer::new();
        sync.host.lock(0, 24, 9600, 1.0, 4);
        let [host_events, midi_events, out_events] = sync.advance_all(100);
        assert!(!host_events.is_empty() || !midi_events.is_empty() || out_events.is_empty());
    }

    #[test]
    fn elect_successor_picks_first_eligible_track() {
        assert_eq!(Synchronizer::elect_successor(&[false, false, true, true]), Some(2));
        assert_eq!(Synchronizer::elect_successor(&[false, false]), None);
    }

    #[test]
    fn host_start_resets_tracker() {
        let mut sync = Synchronizer::new();
        sync.host.lock(0, 96, 88200, 1.0, 4);
        let status = HostSyncStatus {
            transport_event: TransportEvent::Start,
            ..Default::default()
        };
        sync.apply_host_status(&status);
        assert_eq!(sync.host.audio_frame, 0);
    }
}
