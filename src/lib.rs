//! jitterbuf - packet-granular media jitter buffer
//!
//! A bounded, timestamp-ordered SPSC queue that absorbs arrival jitter of
//! sequence-numbered media packets and hands them out at a steady cadence.
//! Gaps in the sequence space are filled with caller-synthesised concealment
//! data, which a late-arriving real packet can still overwrite in place.

pub mod buffer;
pub mod config;
pub mod error;
pub mod packet;
pub mod ring;

pub use buffer::{Consumer, JitterBuffer, Producer};
pub use config::JitterBufferConfig;
pub use error::JitterError;
pub use packet::{ConcealedPacket, Packet};
pub use ring::header::{SlotHeader, METADATA_SIZE};
pub use ring::mirror::{MirrorRegion, RingStorage, SplitRegion};
