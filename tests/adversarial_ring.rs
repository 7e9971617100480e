//! Adversarial Property-Based Tests for the Jitter Ring
//!
//! # Attack Plan
//!
//! 1. **Sequence Floods**: Huge forward jumps that ask for more concealment
//!    than the ring can hold; the gap must be truncated, never overrun.
//!
//! 2. **Replay Storms**: Late and duplicate packets for sequence numbers that
//!    were consumed long ago, never sent, or sit unread in the ring.
//!
//! 3. **Chunking Attacks**: Pathological dequeue sizes, zero included, that
//!    try to desynchronise the partial-read header rewrite.
//!
//! 4. **Destination Starvation**: Undersized destination buffers must fail
//!    cleanly without touching ring state.
//!
//! 5. **Placeholder Neglect**: Concealment generators that ignore their
//!    slots; the ring must hand out zeroed payloads, not stale bytes.
//!
//! 6. **Capacity Pressure**: Single-slot rings where every enqueue races the
//!    admission check.
//!
//! # Invariants
//!
//! - No operation panics for any interleaving
//! - Stored bytes never exceed the ring capacity
//! - Dequeued bytes reproduce enqueued or synthesised payloads exactly
//! - Invalid arguments leave the buffer untouched

use proptest::prelude::*;

use jitterbuf::{JitterBuffer, JitterBufferConfig, Packet, SplitRegion};

fn tiny_config() -> JitterBufferConfig {
    JitterBufferConfig {
        element_size: 2,
        packet_elements: 8,
        clock_rate_hz: 8_000,
        max_length_ms: 10_000,
        min_length_ms: 0,
    }
}

fn tiny_buffer(slots: usize) -> (jitterbuf::Producer, jitterbuf::Consumer) {
    let config = tiny_config();
    let storage = SplitRegion::new(slots * config.slot_bytes());
    JitterBuffer::with_storage(config, Box::new(storage)).expect("buffer construction")
}

// ============================================================================
// ADVERSARIAL GENERATORS
// ============================================================================

/// Operations a hostile caller pair can throw at the buffer.
#[derive(Debug, Clone)]
enum Op {
    EnqueueNext,
    EnqueueJump(u64),
    Replay(u64),
    Dequeue(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::EnqueueNext),
        (2u64..5_000).prop_map(Op::EnqueueJump),
        (0u64..64).prop_map(Op::Replay),
        (0usize..40).prop_map(Op::Dequeue),
    ]
}

proptest! {
    /// A huge sequence jump conceals at most what fits; the ring never
    /// overruns and the concealed prefix dequeues in order.
    #[test]
    fn sequence_flood_is_truncated(jump in 2u64..100_000) {
        let config = tiny_config();
        let (mut producer, mut consumer) = tiny_buffer(4);

        let data = vec![0x11u8; config.packet_bytes()];
        producer.enqueue(&[Packet::new(0, &data, 8)], |_| {}).unwrap();

        let far = vec![0x22u8; config.packet_bytes()];
        producer.enqueue(&[Packet::new(jump, &far, 8)], |slots| {
            for slot in slots.iter_mut() {
                slot.data.fill(0xCC);
            }
        }).unwrap();

        prop_assert!(consumer.written_bytes() <= 4 * config.slot_bytes());

        // Whatever was admitted comes out in strictly increasing sequence
        // order, starting with the real packet 0.
        let mut sequences = Vec::new();
        let mut index = 0;
        while let Ok(header) = consumer.peek_header(index) {
            sequences.push(header.sequence_number);
            index += 1;
        }
        prop_assert!(sequences.windows(2).all(|w| w[0] < w[1]));
        prop_assert_eq!(sequences[0], 0);
    }

    /// Replayed sequence numbers are at most concealment updates; they can
    /// never grow the ring or panic.
    #[test]
    fn replay_storm_is_harmless(replays in proptest::collection::vec(0u64..16, 1..50)) {
        let config = tiny_config();
        let (mut producer, mut consumer) = tiny_buffer(4);

        for sequence in 0u64..4 {
            let data = vec![sequence as u8; config.packet_bytes()];
            producer.enqueue(&[Packet::new(sequence, &data, 8)], |_| {}).unwrap();
        }
        let occupied = consumer.written_bytes();

        for sequence in replays {
            let replayed = sequence.min(3);
            let data = vec![0xBB; config.packet_bytes()];
            let enqueued = producer.enqueue(&[Packet::new(replayed, &data, 8)], |_| {}).unwrap();
            // Nothing here was concealed, so every replay is a no-op.
            prop_assert_eq!(enqueued, 0);
            prop_assert_eq!(consumer.written_bytes(), occupied);
        }

        let mut dest = vec![0u8; 4 * config.packet_bytes()];
        prop_assert_eq!(consumer.dequeue(&mut dest, 32).unwrap(), 32);
    }

    /// Any dequeue chunking, zero included, reassembles the byte stream.
    #[test]
    fn hostile_chunking_preserves_stream(chunks in proptest::collection::vec(0usize..24, 1..60)) {
        let config = tiny_config();
        let (mut producer, mut consumer) = tiny_buffer(6);

        let mut expected = Vec::new();
        for sequence in 0u64..5 {
            let data: Vec<u8> = (0..config.packet_bytes())
                .map(|i| (sequence as u8).wrapping_mul(31).wrapping_add(i as u8))
                .collect();
            producer.enqueue(&[Packet::new(sequence, &data, 8)], |_| {}).unwrap();
            expected.extend_from_slice(&data);
        }

        let mut collected = Vec::new();
        for chunk in chunks {
            let mut dest = vec![0u8; chunk * 2];
            let got = consumer.dequeue(&mut dest, chunk).unwrap();
            prop_assert!(got <= chunk);
            collected.extend_from_slice(&dest[..got * 2]);
        }
        loop {
            let mut dest = vec![0u8; config.packet_bytes()];
            let got = consumer.dequeue(&mut dest, 8).unwrap();
            if got == 0 {
                break;
            }
            collected.extend_from_slice(&dest[..got * 2]);
        }
        prop_assert_eq!(collected, expected);
    }

    /// Undersized destinations fail without consuming anything.
    #[test]
    fn starved_destination_changes_nothing(shortfall in 1usize..16) {
        let config = tiny_config();
        let (mut producer, mut consumer) = tiny_buffer(4);

        let data = vec![0x55u8; config.packet_bytes()];
        producer.enqueue(&[Packet::new(1, &data, 8)], |_| {}).unwrap();
        let occupied = consumer.written_bytes();

        let len = config.packet_bytes().saturating_sub(shortfall);
        let mut dest = vec![0u8; len];
        prop_assert!(consumer.dequeue(&mut dest, 8).is_err());
        prop_assert_eq!(consumer.written_bytes(), occupied);

        let mut full = vec![0u8; config.packet_bytes()];
        prop_assert_eq!(consumer.dequeue(&mut full, 8).unwrap(), 8);
        prop_assert_eq!(full, data);
    }

    /// A generator that never writes leaves zeroed placeholders, whatever
    /// garbage previously occupied those ring bytes.
    #[test]
    fn neglected_placeholders_are_zeroed(laps in 1usize..6) {
        let config = tiny_config();
        let (mut producer, mut consumer) = tiny_buffer(3);

        // Dirty the ring with real traffic first.
        let mut sequence = 0u64;
        let mut dest = vec![0u8; config.packet_bytes()];
        for _ in 0..laps * 3 {
            let data = vec![0xFF; config.packet_bytes()];
            producer.enqueue(&[Packet::new(sequence, &data, 8)], |_| {}).unwrap();
            consumer.dequeue(&mut dest, 8).unwrap();
            sequence += 1;
        }

        // Now open a gap and decline to fill it.
        sequence += 1;
        let data = vec![0x77; config.packet_bytes()];
        producer.enqueue(&[Packet::new(sequence, &data, 8)], |_| {}).unwrap();

        consumer.dequeue(&mut dest, 8).unwrap();
        prop_assert!(dest.iter().all(|&b| b == 0), "placeholder leaked old bytes");
        consumer.dequeue(&mut dest, 8).unwrap();
        prop_assert_eq!(dest, data);
    }

    /// Arbitrary operation interleavings on a single-slot ring never panic
    /// and never exceed capacity.
    #[test]
    fn single_slot_ring_survives_anything(ops in proptest::collection::vec(op_strategy(), 1..80)) {
        let config = tiny_config();
        let (mut producer, mut consumer) = tiny_buffer(1);
        let mut next = 0u64;

        for op in ops {
            match op {
                Op::EnqueueNext => {
                    let data = vec![next as u8; config.packet_bytes()];
                    producer.enqueue(&[Packet::new(next, &data, 8)], |slots| {
                        for slot in slots.iter_mut() {
                            slot.data.fill(0xCC);
                        }
                    }).unwrap();
                    next += 1;
                }
                Op::EnqueueJump(jump) => {
                    next += jump;
                    let data = vec![next as u8; config.packet_bytes()];
                    producer.enqueue(&[Packet::new(next, &data, 8)], |slots| {
                        for slot in slots.iter_mut() {
                            slot.data.fill(0xCC);
                        }
                    }).unwrap();
                    next += 1;
                }
                Op::Replay(back) => {
                    let sequence = next.saturating_sub(back + 1);
                    let data = vec![0xBB; config.packet_bytes()];
                    producer.enqueue(&[Packet::new(sequence, &data, 8)], |_| {}).unwrap();
                }
                Op::Dequeue(amount) => {
                    let mut dest = vec![0u8; amount * 2];
                    let got = consumer.dequeue(&mut dest, amount).unwrap();
                    prop_assert!(got <= amount);
                }
            }
            prop_assert!(consumer.written_bytes() <= config.slot_bytes());
        }
    }
}
