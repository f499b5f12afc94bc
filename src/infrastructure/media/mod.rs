//! Media processing: H.264 RTP framing, RTP packets and audio companding

pub mod codec;
pub mod h264;
pub mod rtp;

pub use h264::{H264Depayloader, H264Payloader, NalUnits, PackagingMode};
pub use rtp::{RtpPacket, RtpPacketizer, SequenceTracker};
