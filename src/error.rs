use thiserror::Error;

/// Errors surfaced by the jitter buffer.
///
/// Running out of ring space is deliberately not represented here: admission
/// refusal is the backpressure mechanism, so enqueue reports it through its
/// return count and a log event rather than a failure.
#[derive(Debug, Error)]
pub enum JitterError {
    /// A packet's element count disagrees with the configured
    /// `packet_elements`, or its payload length is not `elements *
    /// element_size`. The buffer state is unchanged.
    #[error("packet carries {got} elements, buffer requires {want}")]
    ElementCountMismatch { got: usize, want: usize },

    /// A packet's payload length disagrees with its declared element count.
    /// The buffer state is unchanged.
    #[error("payload of {got} bytes does not match the declared {want} bytes")]
    PayloadLengthMismatch { got: usize, want: usize },

    /// The dequeue destination cannot hold the requested element count.
    #[error("destination holds {len} bytes, {required} required")]
    DestinationTooSmall { len: usize, required: usize },

    /// A slot-inspection request addressed a packet beyond the buffered
    /// region.
    #[error("packet offset {index} is past the buffered data")]
    PacketOffsetOutOfRange { index: usize },

    /// Construction parameters failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The mirror mapping could not be established. Construction never
    /// partially succeeds; anything mapped before the failure is torn down.
    #[error("mirror allocation failed: {0}")]
    MirrorAllocation(#[from] std::io::Error),

    /// No mirror implementation exists for this platform.
    #[error("mirrored ring allocation is not supported on this platform")]
    UnsupportedPlatform,
}
