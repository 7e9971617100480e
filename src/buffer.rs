//! The jitter buffer engine.
//!
//! Construction hands back a split pair of handles: a [`Producer`] for the
//! single enqueue thread and a [`Consumer`] for the single dequeue thread.
//! The shared core behind them is lock-free on the packet path: the only
//! state crossing threads is a pair of atomic occupancy counters and the
//! per-slot concealment batons.
//!
//! Enqueue detects sequence discontinuities and synthesises concealment
//! slots for the gap via a caller-supplied generator; a late copy of a
//! missing packet can still overwrite its placeholder in place until the
//! consumer has read it. Dequeue hands out elements at packet granularity
//! or below, holding slots back until they are old enough and silently
//! discarding slots that have grown too old.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, trace, warn};

use crate::config::JitterBufferConfig;
use crate::error::JitterError;
use crate::packet::{ConcealedPacket, Packet};
use crate::ring::conceal::ConcealmentMap;
use crate::ring::header::{SlotHeader, METADATA_SIZE};
use crate::ring::index::RingIndex;
use crate::ring::mirror::{MirrorRegion, RingStorage};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Shared core of a split jitter buffer.
///
/// Owned jointly by the [`Producer`] and [`Consumer`] handles; not usable
/// directly.
pub struct JitterBuffer {
    config: JitterBufferConfig,
    storage: Box<dyn RingStorage>,
    index: RingIndex,
    /// Elements visible to the consumer. The producer adds on enqueue, the
    /// consumer subtracts for everything it takes out of the ring,
    /// discarded slots included.
    written_elements: AtomicU64,
    conceal: ConcealmentMap,
}

impl JitterBuffer {
    /// Build over a mirrored ring sized from the configuration.
    ///
    /// Fails if the configuration is invalid or the platform cannot
    /// establish the mirror mapping; construction never partially succeeds.
    pub fn new(config: JitterBufferConfig) -> Result<(Producer, Consumer), JitterError> {
        config.validate()?;
        let storage = MirrorRegion::allocate(config.max_size_bytes())?;
        Ok(Self::split(config, Box::new(storage)))
    }

    /// Build over caller-supplied storage.
    ///
    /// Lets the algorithm run against [`crate::ring::mirror::SplitRegion`]
    /// in tests, with exact capacities and no privileged mappings.
    pub fn with_storage(
        config: JitterBufferConfig,
        storage: Box<dyn RingStorage>,
    ) -> Result<(Producer, Consumer), JitterError> {
        config.validate()?;
        if storage.capacity() < config.slot_bytes() {
            return Err(JitterError::InvalidConfig(format!(
                "storage of {} bytes cannot hold a single {}-byte packet slot",
                storage.capacity(),
                config.slot_bytes()
            )));
        }
        Ok(Self::split(config, storage))
    }

    fn split(config: JitterBufferConfig, storage: Box<dyn RingStorage>) -> (Producer, Consumer) {
        let capacity = storage.capacity();
        let shared = Arc::new(JitterBuffer {
            config,
            storage,
            index: RingIndex::new(capacity),
            written_elements: AtomicU64::new(0),
            conceal: ConcealmentMap::new(),
        });
        (
            Producer {
                shared: Arc::clone(&shared),
                write_offset: 0,
                last_written_sequence_number: None,
            },
            Consumer {
                shared,
                read_offset: 0,
            },
        )
    }

    fn read_header_at(&self, offset: usize) -> SlotHeader {
        let mut bytes = [0u8; METADATA_SIZE];
        self.storage.read(offset, &mut bytes);
        SlotHeader::decode(&bytes)
    }

    fn current_depth_ms(&self) -> u64 {
        self.written_elements.load(Ordering::Acquire) * 1000 / self.config.clock_rate_hz as u64
    }

    fn add_elements(&self, n: u64) {
        self.written_elements.fetch_add(n, Ordering::Release);
    }

    fn retire_elements(&self, n: u64) {
        self.written_elements.fetch_sub(n, Ordering::Release);
    }
}

/// Enqueue handle. Must stay on a single producer thread.
pub struct Producer {
    shared: Arc<JitterBuffer>,
    write_offset: usize,
    last_written_sequence_number: Option<u64>,
}

impl Producer {
    /// Enqueue a batch of packets.
    ///
    /// Packets newer than everything seen so far are appended; a sequence
    /// gap first synthesises concealment slots through
    /// `concealment_callback`, which receives borrowed in-ring payloads to
    /// fill and may not retain them past its return. A packet at or below
    /// the last written sequence number is treated as a late copy and
    /// overwrites its concealment slot if one is still unread.
    ///
    /// Returns the total elements enqueued across the call: concealment,
    /// late updates and real packets combined. When a packet does not fit,
    /// it and the remainder of the batch are dropped and the count so far
    /// is returned; running out of space is backpressure, not an error.
    pub fn enqueue<F>(
        &mut self,
        packets: &[Packet<'_>],
        mut concealment_callback: F,
    ) -> Result<usize, JitterError>
    where
        F: FnMut(&mut [ConcealedPacket<'_>]),
    {
        let config = self.shared.config;

        // Validate the whole batch before touching the ring so an invalid
        // argument leaves the buffer unchanged.
        for packet in packets {
            if packet.elements != config.packet_elements {
                return Err(JitterError::ElementCountMismatch {
                    got: packet.elements,
                    want: config.packet_elements,
                });
            }
            if packet.data.len() != packet.elements * config.element_size {
                return Err(JitterError::PayloadLengthMismatch {
                    got: packet.data.len(),
                    want: packet.elements * config.element_size,
                });
            }
        }

        // Reclaim map rows for concealment slots the consumer has finished.
        self.shared.conceal.sweep_stale();

        let mut enqueued = 0usize;
        for (position, packet) in packets.iter().enumerate() {
            if let Some(last) = self.last_written_sequence_number {
                if packet.sequence_number <= last {
                    enqueued += self.update(packet);
                    continue;
                }
                let missing = packet.sequence_number - last - 1;
                if missing > 0 {
                    enqueued += self.conceal_gap(last, missing, &mut concealment_callback);
                }
            }
            if !self.write_packet(packet) {
                warn!(
                    sequence = packet.sequence_number,
                    dropped = packets.len() - position,
                    "ring full, dropping remainder of enqueue batch"
                );
                break;
            }
            self.last_written_sequence_number = Some(packet.sequence_number);
            enqueued += packet.elements;
        }
        Ok(enqueued)
    }

    /// Total elements currently buffered, expressed in milliseconds of
    /// media. Readable from either thread.
    pub fn current_depth_ms(&self) -> u64 {
        self.shared.current_depth_ms()
    }

    /// Sequence number of the newest slot ever written, if any.
    pub fn last_written_sequence_number(&self) -> Option<u64> {
        self.last_written_sequence_number
    }

    /// Copy one real packet into the ring. Payload first, header last, then
    /// a single release-commit publishes the slot to the consumer.
    fn write_packet(&mut self, packet: &Packet<'_>) -> bool {
        let shared = Arc::clone(&self.shared);
        let slot_bytes = shared.config.slot_bytes();
        if shared.index.free_bytes() < slot_bytes {
            return false;
        }

        let payload_offset = shared.index.wrap_add(self.write_offset, METADATA_SIZE);
        shared.storage.write(payload_offset, packet.data);
        let header = SlotHeader {
            sequence_number: packet.sequence_number,
            elements: packet.elements,
            timestamp_ms: now_ms(),
            concealment: false,
        };
        shared.storage.write(self.write_offset, &header.encode());

        self.write_offset = shared.index.wrap_add(self.write_offset, slot_bytes);
        shared.index.commit(slot_bytes);
        shared.add_elements(packet.elements as u64);
        trace!(
            sequence = packet.sequence_number,
            elements = packet.elements,
            "enqueued packet"
        );
        true
    }

    /// Synthesise slots for a sequence gap, as many as fit.
    ///
    /// Headers and map rows go down first; the generator then fills the
    /// zeroed payloads in place, and only afterwards is the whole block
    /// committed, so the consumer can never observe a placeholder while the
    /// generator still borrows it.
    fn conceal_gap<F>(&mut self, last: u64, missing: u64, concealment_callback: &mut F) -> usize
    where
        F: FnMut(&mut [ConcealedPacket<'_>]),
    {
        let shared = Arc::clone(&self.shared);
        let config = shared.config;
        let slot_bytes = config.slot_bytes();
        let payload_len = config.packet_bytes();

        let space_slots = (shared.index.free_bytes() / slot_bytes) as u64;
        let to_conceal = missing.min(space_slots) as usize;
        if (to_conceal as u64) < missing {
            warn!(
                missing,
                concealed = to_conceal,
                "insufficient space to conceal entire sequence gap"
            );
        }
        if to_conceal == 0 {
            return 0;
        }

        let now = now_ms();
        let mut placeholders = Vec::with_capacity(to_conceal);
        for gap_index in 0..to_conceal {
            let sequence_number = last + 1 + gap_index as u64;
            let header = SlotHeader {
                sequence_number,
                elements: config.packet_elements,
                timestamp_ms: now,
                concealment: true,
            };
            shared.storage.write(self.write_offset, &header.encode());
            shared.conceal.insert(sequence_number, self.write_offset);
            let payload_offset = shared.index.wrap_add(self.write_offset, METADATA_SIZE);
            placeholders.push((sequence_number, payload_offset));
            self.write_offset = shared.index.wrap_add(self.write_offset, slot_bytes);
        }

        // Scratch buffers stand in where the backing cannot lend a
        // contiguous slice; they get copied into the ring afterwards.
        let mut scratch: Vec<Option<Vec<u8>>> = placeholders
            .iter()
            .map(|&(_, offset)| {
                if shared.storage.contiguous_mut(offset, payload_len).is_some() {
                    None
                } else {
                    Some(vec![0u8; payload_len])
                }
            })
            .collect();

        let mut slots: Vec<ConcealedPacket<'_>> = placeholders
            .iter()
            .zip(scratch.iter_mut())
            .map(|(&(sequence_number, offset), scratch)| {
                let data: &mut [u8] = match scratch {
                    Some(buffer) => buffer.as_mut_slice(),
                    // Safety: the block is not yet committed, so the
                    // consumer cannot touch these bytes; the producer
                    // thread holds the only reference.
                    None => unsafe {
                        let ptr = shared.storage.contiguous_mut(offset, payload_len).unwrap();
                        std::slice::from_raw_parts_mut(ptr, payload_len)
                    },
                };
                data.fill(0);
                ConcealedPacket {
                    sequence_number,
                    elements: config.packet_elements,
                    data,
                }
            })
            .collect();

        debug!(
            first = last + 1,
            count = to_conceal,
            "synthesising concealment for sequence gap"
        );
        concealment_callback(&mut slots);
        drop(slots);

        for (&(_, offset), scratch) in placeholders.iter().zip(scratch.iter()) {
            if let Some(buffer) = scratch {
                shared.storage.write(offset, buffer);
            }
        }

        shared.index.commit(to_conceal * slot_bytes);
        shared.add_elements((to_conceal * config.packet_elements) as u64);
        self.last_written_sequence_number = Some(last + to_conceal as u64);
        to_conceal * config.packet_elements
    }

    /// Late-update path: overwrite a concealment slot's payload with the
    /// real packet, if the slot is still unread.
    fn update(&mut self, packet: &Packet<'_>) -> usize {
        let shared = Arc::clone(&self.shared);
        let config = shared.config;

        let Some(entry) = shared.conceal.find(packet.sequence_number) else {
            debug!(
                sequence = packet.sequence_number,
                "late packet has no concealment slot, dropping"
            );
            return 0;
        };
        if !entry.acquire() {
            // The consumer is mid-read of this slot; the synthesised data
            // it is copying wins.
            debug!(
                sequence = packet.sequence_number,
                "concealment slot busy with the consumer, dropping update"
            );
            return 0;
        }
        if entry.is_stale() {
            entry.release();
            shared.conceal.remove(packet.sequence_number);
            debug!(
                sequence = packet.sequence_number,
                "concealment slot already consumed, dropping update"
            );
            return 0;
        }

        let offset = entry.offset();
        let mut header = shared.read_header_at(offset);
        if header.sequence_number != packet.sequence_number || !header.concealment {
            // The slot was recycled under the entry's feet.
            shared.conceal.remove(packet.sequence_number);
            entry.release();
            warn!(
                sequence = packet.sequence_number,
                found = header.sequence_number,
                "concealment entry no longer matches its slot"
            );
            return 0;
        }

        // Partial prior reads shrink the slot; only the unread tail of the
        // packet is copied in.
        let Some(already_read) = packet.elements.checked_sub(header.elements) else {
            entry.release();
            warn!(
                sequence = packet.sequence_number,
                slot_elements = header.elements,
                packet_elements = packet.elements,
                "concealment slot larger than its update packet"
            );
            return 0;
        };
        let tail = &packet.data[already_read * config.element_size..];
        let payload_offset = shared.index.wrap_add(offset, METADATA_SIZE);
        shared.storage.write(payload_offset, tail);

        // Timestamp stays untouched so the age gates keep counting from
        // when the slot first became visible.
        header.concealment = false;
        shared.storage.write(offset, &header.encode());
        shared.conceal.remove(packet.sequence_number);
        entry.release();
        debug!(
            sequence = packet.sequence_number,
            elements = header.elements,
            "replaced concealment with real data"
        );
        header.elements
    }
}

/// Dequeue handle. Must stay on a single consumer thread.
pub struct Consumer {
    shared: Arc<JitterBuffer>,
    read_offset: usize,
}

impl Consumer {
    /// Dequeue up to `elements` elements into `destination`.
    ///
    /// Walks slots in sequence order, refusing slots younger than the
    /// configured minimum age and silently discarding slots older than the
    /// maximum. A slot larger than the remaining request is read partially
    /// and its header rewritten over the unread tail. Returns the element
    /// count actually produced; a short count means the buffer blocked and
    /// the caller should come back on its next cadence.
    pub fn dequeue(
        &mut self,
        destination: &mut [u8],
        elements: usize,
    ) -> Result<usize, JitterError> {
        let shared = Arc::clone(&self.shared);
        let config = shared.config;
        let element_size = config.element_size;
        let required = elements * element_size;
        if destination.len() < required {
            return Err(JitterError::DestinationTooSmall {
                len: destination.len(),
                required,
            });
        }

        let mut produced = 0usize;
        let mut consumed = 0u64;
        let mut repeeked = false;

        while produced < elements {
            if shared.index.written() < METADATA_SIZE {
                break;
            }
            // Peek in place; read state only moves once the slot (or its
            // prefix) is genuinely consumed.
            let header = shared.read_header_at(self.read_offset);

            let entry = if header.concealment {
                match shared.conceal.find(header.sequence_number) {
                    Some(entry) => {
                        if !entry.acquire() {
                            // The update path owns the slot: drop the
                            // synthesised data, real data is taking its
                            // place.
                            trace!(
                                sequence = header.sequence_number,
                                "skipping concealment slot busy with update"
                            );
                            self.forward_read(header.slot_bytes(element_size));
                            consumed += header.elements as u64;
                            continue;
                        }
                        repeeked = false;
                        Some(entry)
                    }
                    None => {
                        if !repeeked {
                            // A just-completed update races the peek
                            // benignly; one fresh read of the header
                            // resolves it.
                            repeeked = true;
                            continue;
                        }
                        error!(
                            sequence = header.sequence_number,
                            "concealment slot missing from map"
                        );
                        break;
                    }
                }
            } else {
                repeeked = false;
                None
            };

            let age_ms = now_ms().saturating_sub(header.timestamp_ms);
            if age_ms < config.min_length_ms {
                if let Some(entry) = entry.as_ref() {
                    entry.release();
                }
                trace!(
                    sequence = header.sequence_number,
                    age_ms,
                    "slot not old enough to dequeue"
                );
                break;
            }
            if age_ms >= config.max_length_ms {
                debug!(
                    sequence = header.sequence_number,
                    age_ms, "discarding slot past maximum age"
                );
                self.forward_read(header.slot_bytes(element_size));
                consumed += header.elements as u64;
                if let Some(entry) = entry.as_ref() {
                    entry.mark_stale();
                    entry.release();
                }
                continue;
            }

            let available = header.payload_bytes(element_size);
            let remaining = (elements - produced) * element_size;
            let to_copy = available.min(remaining);
            let payload_offset = shared.index.wrap_add(self.read_offset, METADATA_SIZE);
            shared.storage.read(
                payload_offset,
                &mut destination[produced * element_size..produced * element_size + to_copy],
            );
            produced += to_copy / element_size;
            consumed += (to_copy / element_size) as u64;

            if to_copy < available {
                // Partial read: rewrite the header over the unread tail,
                // then release only the bytes actually copied out.
                let mut rewritten = header;
                rewritten.elements = (available - to_copy) / element_size;
                let new_header_offset = shared.index.wrap_add(self.read_offset, to_copy);
                shared.storage.write(new_header_offset, &rewritten.encode());
                if let Some(entry) = entry.as_ref() {
                    entry.set_offset(new_header_offset);
                    entry.release();
                }
                self.forward_read(to_copy);
                trace!(
                    sequence = header.sequence_number,
                    remaining = rewritten.elements,
                    "partial read"
                );
                break;
            }

            self.forward_read(METADATA_SIZE + available);
            if let Some(entry) = entry.as_ref() {
                entry.mark_stale();
                entry.release();
            }
            trace!(sequence = header.sequence_number, "dequeued whole slot");
        }

        if consumed > 0 {
            shared.retire_elements(consumed);
        }
        Ok(produced)
    }

    /// Total elements currently buffered, expressed in milliseconds of
    /// media. Readable from either thread.
    pub fn current_depth_ms(&self) -> u64 {
        self.shared.current_depth_ms()
    }

    /// Bytes currently stored in the ring.
    pub fn written_bytes(&self) -> usize {
        self.shared.index.written()
    }

    /// Elements currently visible to this consumer.
    pub fn written_elements(&self) -> u64 {
        self.shared.written_elements.load(Ordering::Acquire)
    }

    /// Header of the n-th buffered slot, counted from the read side,
    /// without consuming anything.
    pub fn peek_header(&self, packet_index: usize) -> Result<SlotHeader, JitterError> {
        self.slot_location(packet_index).map(|(_, header)| header)
    }

    /// Payload copy of the n-th buffered slot, without consuming anything.
    pub fn peek_payload(&self, packet_index: usize) -> Result<Vec<u8>, JitterError> {
        let (offset, header) = self.slot_location(packet_index)?;
        let shared = &self.shared;
        let mut payload = vec![0u8; header.payload_bytes(shared.config.element_size)];
        let payload_offset = shared.index.wrap_add(offset, METADATA_SIZE);
        shared.storage.read(payload_offset, &mut payload);
        Ok(payload)
    }

    fn slot_location(&self, packet_index: usize) -> Result<(usize, SlotHeader), JitterError> {
        let shared = &self.shared;
        let element_size = shared.config.element_size;
        let written = shared.index.written();
        let mut offset = self.read_offset;
        let mut walked = 0usize;
        let mut index = 0usize;
        loop {
            if walked + METADATA_SIZE > written {
                return Err(JitterError::PacketOffsetOutOfRange {
                    index: packet_index,
                });
            }
            let header = shared.read_header_at(offset);
            let slot = header.slot_bytes(element_size);
            if walked + slot > written {
                return Err(JitterError::PacketOffsetOutOfRange {
                    index: packet_index,
                });
            }
            if index == packet_index {
                return Ok((offset, header));
            }
            offset = shared.index.wrap_add(offset, slot);
            walked += slot;
            index += 1;
        }
    }

    fn forward_read(&mut self, k: usize) {
        self.read_offset = self.shared.index.wrap_add(self.read_offset, k);
        self.shared.index.consume(k);
    }
}
