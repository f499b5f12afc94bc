//! RTP (Real-time Transport Protocol)
//!
//! Packet encoding for locally payloaded media and sequence tracking for
//! relayed streams.

pub mod packet;
pub mod packetizer;

pub use packet::{RtpError, RtpPacket};
pub use packetizer::{RtpPacketizer, SequenceStatus, SequenceTracker};
