//! H.264 RTP framing (RFC 6184)
//!
//! Annex-B splitting, payloading into single NAL / STAP-A / FU-A packets,
//! and reassembly of received payloads.

pub mod depayloader;
pub mod payloader;
pub mod splitter;

pub use depayloader::{is_partition_head, DepayloadError, H264Depayloader, PackagingMode};
pub use payloader::H264Payloader;
pub use splitter::NalUnits;

/// Single-time aggregation packet
pub const NAL_TYPE_STAP_A: u8 = 24;
/// Fragmentation unit A
pub const NAL_TYPE_FU_A: u8 = 28;
/// Fragmentation unit B (never produced, only recognized)
pub const NAL_TYPE_FU_B: u8 = 29;
pub const NAL_TYPE_IDR: u8 = 5;
pub const NAL_TYPE_SPS: u8 = 7;
pub const NAL_TYPE_PPS: u8 = 8;
pub const NAL_TYPE_AUD: u8 = 9;
pub const NAL_TYPE_FILLER: u8 = 12;

pub const NAL_TYPE_MASK: u8 = 0x1F;
pub const NAL_REF_IDC_MASK: u8 = 0x60;
pub const NAL_FORBIDDEN_MASK: u8 = 0x80;
pub const FU_START_MASK: u8 = 0x80;
pub const FU_END_MASK: u8 = 0x40;

pub const FU_A_HEADER_SIZE: usize = 2;
pub const STAP_A_HEADER_SIZE: usize = 1;
pub const STAP_A_LENGTH_SIZE: usize = 2;

/// Annex-B start code emitted by the depayloader
pub const ANNEX_B_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// NAL unit type of the first byte
#[inline]
pub fn nal_type(header: u8) -> u8 {
    header & NAL_TYPE_MASK
}
