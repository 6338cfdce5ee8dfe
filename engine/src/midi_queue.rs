//! The lock-free queue a MIDI input thread uses to hand raw events to the block driver (spec §5
//! "A MIDI input thread pushes raw MIDI events into a lock-free queue consumed at block start").
//!
//! Grounded in the teacher's own `rtrb` usage for its pre-buffering ring
//! (`clip-engine/src/supplier/pre_buffer.rs`): a bounded SPSC ring buffer, producer on the
//! non-interrupt side, consumer drained at the top of the block on the interrupt side.

use looper_api::midi::MidiInputEvent;
use rtrb::{Consumer, Producer, RingBuffer};

/// Capacity generous enough that a block's worth of MIDI traffic (clock at 24 ppqn plus a
/// handful of note/CC events) never fills it between two consecutive block callbacks.
const DEFAULT_CAPACITY: usize = 1024;

/// Producer half, owned by the MIDI input thread.
pub struct MidiInputProducer {
    producer: Producer<MidiInputEvent>,
}

impl MidiInputProducer {
    /// Pushes one event. Drops it (and reports via the caller's own diagnostics, if any) rather
    /// than blocking if the queue is full — a stalled interrupt thread must never back-pressure
    /// onto the MIDI thread.
    pub fn push(&mut self, event: MidiInputEvent) -> bool {
        self.producer.push(event).is_ok()
    }
}

/// Consumer half, drained once per block on the interrupt thread before any track processes its
/// audio (spec §4.8 step "Applies queued MIDI input").
pub struct MidiInputConsumer {
    consumer: Consumer<MidiInputEvent>,
}

impl MidiInputConsumer {
    /// Drains everything currently queued into `out`, in arrival order. Never allocates: `out` is
    /// a caller-owned, pre-sized buffer reused block to block.
    pub fn drain_into(&mut self, out: &mut Vec<MidiInputEvent>) {
        while let Ok(event) = self.consumer.pop() {
            out.push(event);
        }
    }
}

/// Builds a connected producer/consumer pair sized for one engine's MIDI input stream.
pub fn midi_input_queue() -> (MidiInputProducer, MidiInputConsumer) {
    midi_input_queue_with_capacity(DEFAULT_CAPACITY)
}

pub fn midi_input_queue_with_capacity(capacity: usize) -> (MidiInputProducer, MidiInputConsumer) {
    let (producer, consumer) = RingBuffer::new(capacity);
    (
        MidiInputProducer { producer },
        MidiInputConsumer { consumer },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(data1: u8) -> MidiInputEvent {
        MidiInputEvent {
            status: looper_api::midi::MIDI_CLOCK,
            channel: 0,
            data1,
            data2: 0,
            frame_offset: 0,
        }
    }

    #[test]
    fn drains_in_arrival_order() {
        let (mut producer, mut consumer) = midi_input_queue_with_capacity(4);
        assert!(producer.push(event(1)));
        assert!(producer.push(event(2)));
        let mut out = Vec::new();
        consumer.drain_into(&mut out);
        assert_eq!(out.iter().map(|e| e.data1).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn push_fails_once_full_instead_of_blocking() {
        let (mut producer, _consumer) = midi_input_queue_with_capacity(1);
        assert!(producer.push(event(1)));
        assert!(!producer.push(event(2)));
    }
}
