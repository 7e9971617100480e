/// A sequence-numbered media packet handed to the producer.
///
/// The payload stays owned by the caller; the buffer copies it into the
/// ring during enqueue.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    /// Monotonically increasing sequence number. Wraparound is not handled.
    pub sequence_number: u64,
    /// Payload bytes, exactly `elements * element_size` long.
    pub data: &'a [u8],
    /// Element count carried by this packet. Must equal the configured
    /// `packet_elements`.
    pub elements: usize,
}

impl<'a> Packet<'a> {
    pub fn new(sequence_number: u64, data: &'a [u8], elements: usize) -> Self {
        Self {
            sequence_number,
            data,
            elements,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A placeholder slot handed to the concealment generator.
///
/// `data` is a borrowed view of the slot's in-ring payload, valid only for
/// the duration of the callback; the generator fills it with synthesised
/// samples and must not retain it. Placeholders left untouched stay
/// zero-filled but are admitted to the ring all the same.
#[derive(Debug)]
pub struct ConcealedPacket<'a> {
    /// Sequence number of the missing packet this slot stands in for.
    pub sequence_number: u64,
    /// Element count of the placeholder, always the configured
    /// `packet_elements`.
    pub elements: usize,
    /// Payload bytes to synthesise, `elements * element_size` long.
    pub data: &'a mut [u8],
}
