use crate::error::JitterError;
use crate::ring::header::METADATA_SIZE;

/// Configuration for a jitter buffer.
#[derive(Debug, Clone, Copy)]
pub struct JitterBufferConfig {
    /// Size of one media element in bytes (e.g. a stereo 16-bit PCM frame
    /// is 4 bytes).
    pub element_size: usize,
    /// Required element count per packet. Every enqueued packet must carry
    /// exactly this many elements.
    pub packet_elements: usize,
    /// Clock rate of the contained elements in Hz. 48 kHz audio is 48000.
    pub clock_rate_hz: u32,
    /// Maximum buffer length in milliseconds. Doubles as the max-age gate:
    /// slots older than this are silently discarded at dequeue.
    pub max_length_ms: u64,
    /// Minimum age in milliseconds before a slot is eligible for dequeue.
    pub min_length_ms: u64,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        Self {
            element_size: 4,
            packet_elements: 480,
            clock_rate_hz: 48_000,
            max_length_ms: 500,
            min_length_ms: 0,
        }
    }
}

impl JitterBufferConfig {
    /// Ring capacity in bytes before page rounding.
    ///
    /// Sized as one metadata header per element rather than per packet,
    /// which leaves headroom for the slots shrinking through partial reads.
    pub fn max_size_bytes(&self) -> usize {
        self.max_length_ms as usize
            * (self.clock_rate_hz as usize / 1000)
            * (self.element_size + METADATA_SIZE)
    }

    /// Total bytes of one full packet slot: header plus payload.
    pub fn slot_bytes(&self) -> usize {
        METADATA_SIZE + self.packet_elements * self.element_size
    }

    /// Payload bytes of one full packet.
    pub fn packet_bytes(&self) -> usize {
        self.packet_elements * self.element_size
    }

    /// Validate configuration values at construction.
    /// Returns Ok(()) if all validations pass, or Err with details of what failed.
    pub fn validate(&self) -> Result<(), JitterError> {
        let mut errors: Vec<String> = Vec::new();

        if self.element_size == 0 {
            errors.push("element_size must be greater than 0".to_string());
        }
        if self.packet_elements == 0 {
            errors.push("packet_elements must be greater than 0".to_string());
        }
        if self.clock_rate_hz < 1000 {
            errors.push(format!(
                "clock_rate_hz {} too low; at least 1000 Hz required",
                self.clock_rate_hz
            ));
        }
        if self.max_length_ms == 0 {
            errors.push("max_length_ms must be greater than 0".to_string());
        }
        if self.min_length_ms > self.max_length_ms {
            errors.push(format!(
                "min_length_ms {} exceeds max_length_ms {}",
                self.min_length_ms, self.max_length_ms
            ));
        }
        if errors.is_empty() && self.max_size_bytes() < self.slot_bytes() {
            errors.push(format!(
                "capacity of {} bytes cannot hold a single {}-byte packet slot",
                self.max_size_bytes(),
                self.slot_bytes()
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(JitterError::InvalidConfig(errors.join("; ")))
        }
    }
}
