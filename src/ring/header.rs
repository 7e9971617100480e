//! In-ring slot metadata.
//!
//! Every record in the ring is laid out as `[header | payload]`, with the
//! payload tightly packed as `elements * element_size` bytes. The header is
//! a fixed 32-byte little-endian block so a slot's total length can always
//! be computed from the header alone.

/// Size of the fixed slot header in bytes.
pub const METADATA_SIZE: usize = 32;

const FLAG_CONCEALMENT: u64 = 1;

/// Metadata written ahead of each payload in the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHeader {
    /// Sequence number of the packet held in this slot.
    pub sequence_number: u64,
    /// Elements currently present. Shrinks when the consumer performs a
    /// partial read and rewrites the header over the unread tail.
    pub elements: usize,
    /// Milliseconds since the Unix epoch at the moment the slot was
    /// written. Age gating runs against this, and it survives a late
    /// concealment update so the slot's age keeps counting from first
    /// visibility.
    pub timestamp_ms: u64,
    /// Whether this slot is tracked in the concealment map.
    pub concealment: bool,
}

impl SlotHeader {
    /// Payload length in bytes for the given element size.
    pub fn payload_bytes(&self, element_size: usize) -> usize {
        self.elements * element_size
    }

    /// Total slot length: header plus payload.
    pub fn slot_bytes(&self, element_size: usize) -> usize {
        METADATA_SIZE + self.payload_bytes(element_size)
    }

    pub fn encode(&self) -> [u8; METADATA_SIZE] {
        let mut out = [0u8; METADATA_SIZE];
        out[0..8].copy_from_slice(&self.sequence_number.to_le_bytes());
        out[8..16].copy_from_slice(&(self.elements as u64).to_le_bytes());
        out[16..24].copy_from_slice(&self.timestamp_ms.to_le_bytes());
        let flags = if self.concealment { FLAG_CONCEALMENT } else { 0 };
        out[24..32].copy_from_slice(&flags.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; METADATA_SIZE]) -> Self {
        let sequence_number = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let elements = u64::from_le_bytes(bytes[8..16].try_into().unwrap()) as usize;
        let timestamp_ms = u64::from_le_bytes(bytes[16..24].try_into().unwrap());
        let flags = u64::from_le_bytes(bytes[24..32].try_into().unwrap());
        Self {
            sequence_number,
            elements,
            timestamp_ms,
            concealment: flags & FLAG_CONCEALMENT != 0,
        }
    }
}



/// Kani formal verification proofs
#[cfg(kani)]
mod kani_proofs {
    use super::*;

    /// Proves: encode/decode round-trips every representable header.
    #[kani::proof]
    fn roundtrip_exact() {
        let header = SlotHeader {
            sequence_number: kani::any(),
            elements: kani::any::<u32>() as usize,
            timestamp_ms: kani::any(),
            concealment: kani::any(),
        };
        let decoded = SlotHeader::decode(&header.encode());
        kani::assert(decoded == header, "header codec must round-trip");
    }

    /// Proves: decode never panics for any 32-byte block.
    #[kani::proof]
    fn decode_total() {
        let bytes: [u8; METADATA_SIZE] = kani::any();
        let _ = SlotHeader::decode(&bytes);
    }
}
