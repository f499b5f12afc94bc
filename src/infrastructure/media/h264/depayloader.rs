//! H.264 RTP depayloader

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DepayloadError {
    #[error("short packet: {0} <= 2")]
    ShortPacket(usize),

    #[error("STAP-A declared size({declared}) is larger than buffer({remaining})")]
    StapATruncated { declared: usize, remaining: usize },

    #[error("unhandled NAL unit type: {0}")]
    UnhandledNaluType(u8),
}

/// How reassembled NAL units are prefixed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackagingMode {
    /// 4-byte big-endian length prefix (AVCC)
    Avc,
    /// 4-byte Annex-B start code
    AnnexB,
}

/// Reassembles NAL units from RTP payloads received in order
#[derive(Debug)]
pub struct H264Depayloader {
    mode: PackagingMode,
    fua_buffer: Option<BytesMut>,
    last_sequence: Option<u16>,
}

impl H264Depayloader {
    pub fn new(mode: PackagingMode) -> Self {
        Self {
            mode,
            fua_buffer: None,
            last_sequence: None,
        }
    }

    /// Depayload one RTP payload.
    ///
    /// Returns the packaged NAL units it completes; an empty buffer means a
    /// fragment was stored and the unit is not finished yet.
    pub fn depayload(&mut self, payload: &[u8]) -> Result<Bytes, DepayloadError> {
        let result = self.unpack(payload);
        if result.is_err() {
            self.fua_buffer = None;
        }
        result
    }

    /// Depayload with loss detection on the RTP sequence number.
    ///
    /// A gap since the previous packet drops any partial fragment, and a
    /// start-marked FU-A always begins a fresh unit. Continuation and end
    /// fragments without a stored start are dropped, returning an empty
    /// buffer, until the next start fragment.
    pub fn depayload_sequenced(&mut self, sequence: u16, payload: &[u8]) -> Result<Bytes, DepayloadError> {
        if let Some(last) = self.last_sequence {
            if sequence != last.wrapping_add(1) {
                self.fua_buffer = None;
            }
        }
        self.last_sequence = Some(sequence);

        if payload.len() > 2 && nal_type(payload[0]) == NAL_TYPE_FU_A {
            if payload[1] & FU_START_MASK != 0 {
                self.fua_buffer = None;
            } else if self.fua_buffer.is_none() {
                return Ok(Bytes::new());
            }
        }

        self.depayload(payload)
    }

    /// Whether a fragment is waiting for its end
    pub fn has_partial(&self) -> bool {
        self.fua_buffer.is_some()
    }

    fn unpack(&mut self, payload: &[u8]) -> Result<Bytes, DepayloadError> {
        if payload.len() <= 2 {
            return Err(DepayloadError::ShortPacket(payload.len()));
        }

        match nal_type(payload[0]) {
            1..=23 => Ok(self.package(payload).freeze()),
            NAL_TYPE_STAP_A => {
                let mut out = BytesMut::new();
                let mut offset = STAP_A_HEADER_SIZE;
                while offset < payload.len() {
                    if offset + STAP_A_LENGTH_SIZE > payload.len() {
                        return Err(DepayloadError::StapATruncated {
                            declared: STAP_A_LENGTH_SIZE,
                            remaining: payload.len() - offset,
                        });
                    }
                    let size = u16::from_be_bytes([payload[offset], payload[offset + 1]]) as usize;
                    offset += STAP_A_LENGTH_SIZE;

                    if payload.len() < offset + size {
                        return Err(DepayloadError::StapATruncated {
                            declared: size,
                            remaining: payload.len() - offset,
                        });
                    }
                    out.unsplit(self.package(&payload[offset..offset + size]));
                    offset += size;
                }
                Ok(out.freeze())
            }
            NAL_TYPE_FU_A => {
                let buffer = self.fua_buffer.get_or_insert_with(BytesMut::new);
                buffer.put_slice(&payload[FU_A_HEADER_SIZE..]);

                if payload[1] & FU_END_MASK == 0 {
                    return Ok(Bytes::new());
                }

                let fragments = self.fua_buffer.take().unwrap_or_default();
                let mut nal = BytesMut::with_capacity(1 + fragments.len());
                nal.put_u8((payload[0] & NAL_REF_IDC_MASK) | nal_type(payload[1]));
                nal.put_slice(&fragments);
                Ok(self.package(&nal).freeze())
            }
            other => Err(DepayloadError::UnhandledNaluType(other)),
        }
    }

    fn package(&self, nal: &[u8]) -> BytesMut {
        let mut out = BytesMut::with_capacity(4 + nal.len());
        match self.mode {
            PackagingMode::Avc => out.put_u32(nal.len() as u32),
            PackagingMode::AnnexB => out.put_slice(&ANNEX_B_START_CODE),
        }
        out.put_slice(nal);
        out
    }
}

/// Whether a payload begins a NAL unit, so a receiver may resync on it
pub fn is_partition_head(payload: &[u8]) -> bool {
    if payload.len() < 2 {
        return false;
    }
    match nal_type(payload[0]) {
        NAL_TYPE_FU_A | NAL_TYPE_FU_B => payload[1] & FU_START_MASK != 0,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_packet() {
        let mut depayloader = H264Depayloader::new(PackagingMode::AnnexB);
        assert_eq!(depayloader.depayload(&[0x41]), Err(DepayloadError::ShortPacket(1)));
        assert_eq!(depayloader.depayload(&[]), Err(DepayloadError::ShortPacket(0)));
        assert_eq!(depayloader.depayload(&[0x41, 0x00]), Err(DepayloadError::ShortPacket(2)));
    }

    #[test]
    fn test_single_nal_packaging() {
        let nal = [0x41, 0x9A, 0x02];

        let mut annex_b = H264Depayloader::new(PackagingMode::AnnexB);
        assert_eq!(&annex_b.depayload(&nal).unwrap()[..], &[0, 0, 0, 1, 0x41, 0x9A, 0x02]);

        let mut avc = H264Depayloader::new(PackagingMode::Avc);
        assert_eq!(&avc.depayload(&nal).unwrap()[..], &[0, 0, 0, 3, 0x41, 0x9A, 0x02]);
    }

    #[test]
    fn test_stap_a() {
        let stap = [0x78, 0x00, 0x02, 0x67, 0x42, 0x00, 0x01, 0x68];
        let mut depayloader = H264Depayloader::new(PackagingMode::AnnexB);
        let out = depayloader.depayload(&stap).unwrap();
        assert_eq!(&out[..], &[0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68]);
    }

    #[test]
    fn test_stap_a_truncated() {
        let stap = [0x78, 0x00, 0x05, 0x67, 0x42];
        let mut depayloader = H264Depayloader::new(PackagingMode::AnnexB);
        assert_eq!(
            depayloader.depayload(&stap),
            Err(DepayloadError::StapATruncated { declared: 5, remaining: 2 })
        );
    }

    #[test]
    fn test_fu_a_reassembly() {
        let mut depayloader = H264Depayloader::new(PackagingMode::Avc);
        assert!(depayloader.depayload(&[0x7C, 0x85, 0x01, 0x02]).unwrap().is_empty());
        assert!(depayloader.has_partial());
        assert!(depayloader.depayload(&[0x7C, 0x05, 0x03]).unwrap().is_empty());
        let out = depayloader.depayload(&[0x7C, 0x45, 0x04, 0x05]).unwrap();
        assert_eq!(&out[..], &[0, 0, 0, 6, 0x65, 0x01, 0x02, 0x03, 0x04, 0x05]);
        assert!(!depayloader.has_partial());
    }

    #[test]
    fn test_unhandled_types() {
        let mut depayloader = H264Depayloader::new(PackagingMode::AnnexB);
        assert_eq!(depayloader.depayload(&[0x00, 0x01, 0x02]), Err(DepayloadError::UnhandledNaluType(0)));
        assert_eq!(depayloader.depayload(&[0x7D, 0x85, 0x02]), Err(DepayloadError::UnhandledNaluType(29)));
        assert_eq!(depayloader.depayload(&[0x7E, 0x85, 0x02]), Err(DepayloadError::UnhandledNaluType(30)));
    }

    #[test]
    fn test_sequence_gap_drops_partial() {
        let mut depayloader = H264Depayloader::new(PackagingMode::AnnexB);
        assert!(depayloader.depayload_sequenced(10, &[0x7C, 0x85, 0xAA, 0xAA]).unwrap().is_empty());
        // 11 lost
        assert!(depayloader.depayload_sequenced(12, &[0x7C, 0x45, 0xBB]).unwrap().is_empty());
        assert!(!depayloader.has_partial());
    }

    #[test]
    fn test_orphan_fragments_dropped_until_start() {
        let mut depayloader = H264Depayloader::new(PackagingMode::AnnexB);
        assert!(depayloader.depayload_sequenced(5, &[0x7C, 0x05, 0x01]).unwrap().is_empty());
        assert!(depayloader.depayload_sequenced(6, &[0x7C, 0x45, 0x02]).unwrap().is_empty());
        assert!(!depayloader.has_partial());

        depayloader.depayload_sequenced(7, &[0x7C, 0x85, 0x10, 0x11]).unwrap();
        let out = depayloader.depayload_sequenced(8, &[0x7C, 0x45, 0x12]).unwrap();
        assert_eq!(&out[..], &[0, 0, 0, 1, 0x65, 0x10, 0x11, 0x12]);
    }

    #[test]
    fn test_start_fragment_discards_stale_buffer() {
        let mut depayloader = H264Depayloader::new(PackagingMode::AnnexB);
        depayloader.depayload_sequenced(1, &[0x7C, 0x85, 0xAA, 0xAA]).unwrap();
        // End of the first unit never arrives; a new one starts
        depayloader.depayload_sequenced(2, &[0x7C, 0x81, 0x11, 0x22]).unwrap();
        let out = depayloader.depayload_sequenced(3, &[0x7C, 0x41, 0x33]).unwrap();
        assert_eq!(&out[..], &[0, 0, 0, 1, 0x61, 0x11, 0x22, 0x33]);
    }

    #[test]
    fn test_sequence_wraps() {
        let mut depayloader = H264Depayloader::new(PackagingMode::AnnexB);
        depayloader.depayload_sequenced(u16::MAX, &[0x7C, 0x85, 0x01, 0x02]).unwrap();
        let out = depayloader.depayload_sequenced(0, &[0x7C, 0x45, 0x03]).unwrap();
        assert_eq!(&out[..], &[0, 0, 0, 1, 0x65, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_partition_head() {
        assert!(is_partition_head(&[0x41, 0x00]));
        assert!(is_partition_head(&[0x78, 0x00, 0x02]));
        assert!(is_partition_head(&[0x7C, 0x85]));
        assert!(!is_partition_head(&[0x7C, 0x05]));
        assert!(!is_partition_head(&[0x7C, 0x45]));
        assert!(!is_partition_head(&[0x41]));
    }
}
