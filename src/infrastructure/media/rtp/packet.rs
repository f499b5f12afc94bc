//! RTP packet (RFC 3550)

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// RTP Packet Structure
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       sequence number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           synchronization source (SSRC) identifier            |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// ```
///
/// Only what the bridge produces is modelled: no CSRC list, no header
/// extension, no padding. Parsing skips those parts of received packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Bytes,
}

impl RtpPacket {
    /// Fixed header size
    pub const HEADER_SIZE: usize = 12;

    pub fn new(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32, payload: Bytes) -> Self {
        Self {
            marker: false,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            payload,
        }
    }

    /// Parse RTP packet from bytes
    pub fn parse(data: &[u8]) -> Result<Self, RtpError> {
        if data.len() < Self::HEADER_SIZE {
            return Err(RtpError::PacketTooShort);
        }

        let mut buf = data;

        // Byte 0: V(2), P(1), X(1), CC(4)
        let byte0 = buf.get_u8();
        let version = (byte0 >> 6) & 0x03;
        if version != 2 {
            return Err(RtpError::InvalidVersion(version));
        }
        let padding = (byte0 & 0x20) != 0;
        let extension = (byte0 & 0x10) != 0;
        let csrc_count = (byte0 & 0x0F) as usize;

        // Byte 1: M(1), PT(7)
        let byte1 = buf.get_u8();
        let marker = (byte1 & 0x80) != 0;
        let payload_type = byte1 & 0x7F;

        let sequence = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        if buf.remaining() < csrc_count * 4 {
            return Err(RtpError::PacketTooShort);
        }
        buf.advance(csrc_count * 4);

        if extension {
            if buf.remaining() < 4 {
                return Err(RtpError::PacketTooShort);
            }
            let _profile = buf.get_u16();
            let length = buf.get_u16() as usize * 4;
            if buf.remaining() < length {
                return Err(RtpError::PacketTooShort);
            }
            buf.advance(length);
        }

        let mut payload_len = buf.remaining();
        if padding {
            let padding_len = *buf.last().ok_or(RtpError::InvalidPadding)? as usize;
            if padding_len == 0 || padding_len > payload_len {
                return Err(RtpError::InvalidPadding);
            }
            payload_len -= padding_len;
        }

        Ok(Self {
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            payload: Bytes::copy_from_slice(&buf[..payload_len]),
        })
    }

    /// Serialize RTP packet to bytes
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::HEADER_SIZE + self.payload.len());

        buf.put_u8(2 << 6);
        buf.put_u8(((self.marker as u8) << 7) | (self.payload_type & 0x7F));
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        buf.put_slice(&self.payload);

        buf.freeze()
    }
}

impl fmt::Display for RtpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RTP[PT={}, Seq={}, TS={}, SSRC={:08x}, Marker={}, Payload={}]",
            self.payload_type,
            self.sequence,
            self.timestamp,
            self.ssrc,
            self.marker,
            self.payload.len()
        )
    }
}

/// RTP errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RtpError {
    #[error("Packet too short")]
    PacketTooShort,
    #[error("Invalid version: {0}")]
    InvalidVersion(u8),
    #[error("Invalid padding")]
    InvalidPadding,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtp_packet_serialize_parse() {
        let payload = Bytes::from_static(b"\x65\x88\x84");
        let mut packet = RtpPacket::new(96, 1234, 567890, 0x12345678, payload.clone());
        packet.marker = true;

        let parsed = RtpPacket::parse(&packet.serialize()).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_rtp_skips_csrc_extension_and_padding() {
        let mut data = vec![
            0x80 | 0x20 | 0x10 | 0x01, // V=2, P, X, CC=1
            0x60,                      // PT=96
            0x00, 0x07,                // seq
            0x00, 0x00, 0x00, 0x10,    // ts
            0x00, 0x00, 0x00, 0x01,    // ssrc
            0xAA, 0xAA, 0xAA, 0xAA,    // csrc
            0xBE, 0xDE, 0x00, 0x01,    // extension header, one word
            0x10, 0x20, 0x30, 0x40,
        ];
        data.extend_from_slice(&[0x41, 0x42]);
        data.extend_from_slice(&[0x00, 0x02]); // padding

        let parsed = RtpPacket::parse(&data).unwrap();
        assert_eq!(parsed.sequence, 7);
        assert_eq!(parsed.payload_type, 96);
        assert_eq!(&parsed.payload[..], &[0x41, 0x42]);
    }

    #[test]
    fn test_rtp_min_size() {
        let data = vec![0u8; 11];
        assert_eq!(RtpPacket::parse(&data), Err(RtpError::PacketTooShort));
    }

    #[test]
    fn test_rtp_invalid_version() {
        let mut data = vec![0u8; 12];
        data[0] = 0x40;
        assert_eq!(RtpPacket::parse(&data), Err(RtpError::InvalidVersion(1)));
    }
}
