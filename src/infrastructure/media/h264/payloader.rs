//! H.264 RTP payloader

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use super::splitter::NalUnits;
use super::*;

/// Most NAL units carried by one STAP-A
const STAP_A_MAX_UNITS: usize = 9;
/// Unit sizes in an aggregate are 16-bit
const STAP_A_MAX_SIZE: usize = u16::MAX as usize;

/// Turns Annex-B access units into RTP payloads no larger than the MTU.
///
/// SPS and PPS are held back and sent together with the next emittable
/// unit, aggregated into a STAP-A when both are pending.
#[derive(Debug, Default)]
pub struct H264Payloader {
    sps: Option<Bytes>,
    pps: Option<Bytes>,
}

impl H264Payloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload every NAL unit found in `data`
    pub fn payload(&mut self, mtu: usize, data: &[u8]) -> Vec<Bytes> {
        let units: Vec<&[u8]> = NalUnits::new(data).filter(|nal| !nal.is_empty()).collect();
        let mut payloads = Vec::new();

        let mut index = 0;
        while index < units.len() {
            let nal = units[index];
            match nal_type(nal[0]) {
                NAL_TYPE_AUD | NAL_TYPE_FILLER => {
                    index += 1;
                    continue;
                }
                NAL_TYPE_SPS => {
                    self.sps = Some(Bytes::copy_from_slice(nal));
                    index += 1;
                    continue;
                }
                NAL_TYPE_PPS => {
                    self.pps = Some(Bytes::copy_from_slice(nal));
                    index += 1;
                    continue;
                }
                _ => {}
            }

            if let (Some(sps), Some(pps)) = (self.sps.take(), self.pps.take()) {
                let consumed = aggregate(mtu, &sps, &pps, &units[index..], &mut payloads);
                if consumed > 0 {
                    index += consumed;
                    continue;
                }
            }

            emit_unit(mtu, nal, &mut payloads);
            index += 1;
        }

        payloads
    }
}

/// Build a STAP-A of SPS, PPS and the following units that still fit.
///
/// Returns how many of `rest` were carried. When SPS and PPS alone do not
/// fit they are emitted on their own and nothing from `rest` is consumed.
fn aggregate(
    mtu: usize,
    sps: &[u8],
    pps: &[u8],
    rest: &[&[u8]],
    payloads: &mut Vec<Bytes>,
) -> usize {
    let budget = mtu.min(STAP_A_MAX_SIZE);
    let mut size = STAP_A_HEADER_SIZE + 2 * STAP_A_LENGTH_SIZE + sps.len() + pps.len();
    if size > budget {
        emit_unit(mtu, sps, payloads);
        emit_unit(mtu, pps, payloads);
        return 0;
    }

    let mut carried: Vec<&[u8]> = vec![sps, pps];
    let mut consumed = 0;
    for nal in rest {
        if carried.len() >= STAP_A_MAX_UNITS {
            break;
        }
        match nal_type(nal[0]) {
            NAL_TYPE_AUD | NAL_TYPE_FILLER => {
                consumed += 1;
                continue;
            }
            // A new parameter set starts a new aggregate
            NAL_TYPE_SPS | NAL_TYPE_PPS => break,
            _ => {}
        }
        if size + STAP_A_LENGTH_SIZE + nal.len() > budget {
            break;
        }
        size += STAP_A_LENGTH_SIZE + nal.len();
        carried.push(nal);
        consumed += 1;
    }

    let mut header = NAL_TYPE_STAP_A;
    let mut ref_idc = 0u8;
    for nal in &carried {
        header |= nal[0] & NAL_FORBIDDEN_MASK;
        ref_idc = ref_idc.max(nal[0] & NAL_REF_IDC_MASK);
    }
    header |= ref_idc;

    let mut out = BytesMut::with_capacity(size);
    out.put_u8(header);
    for nal in &carried {
        out.put_u16(nal.len() as u16);
        out.put_slice(nal);
    }
    trace!("STAP-A with {} units, {} bytes", carried.len(), out.len());
    payloads.push(out.freeze());

    consumed
}

fn emit_unit(mtu: usize, nal: &[u8], payloads: &mut Vec<Bytes>) {
    if nal.len() <= mtu {
        payloads.push(Bytes::copy_from_slice(nal));
    } else {
        fragment(mtu, nal, payloads);
    }
}

/// FU-A fragmentation with fragment sizes differing by at most one byte
fn fragment(mtu: usize, nal: &[u8], payloads: &mut Vec<Bytes>) {
    let available = mtu.saturating_sub(FU_A_HEADER_SIZE);
    let data = &nal[1..];
    if available == 0 || data.is_empty() {
        return;
    }

    let count = data.len().div_ceil(available);
    let base = data.len() / count;
    let mut larger = data.len() % count;

    let indicator = (nal[0] & (NAL_FORBIDDEN_MASK | NAL_REF_IDC_MASK)) | NAL_TYPE_FU_A;
    let kind = nal_type(nal[0]);

    let mut offset = 0;
    for i in 0..count {
        let size = if larger > 0 {
            larger -= 1;
            base + 1
        } else {
            base
        };

        let mut header = kind;
        if i == 0 {
            header |= FU_START_MASK;
        }
        if i == count - 1 {
            header |= FU_END_MASK;
        }

        let mut out = BytesMut::with_capacity(FU_A_HEADER_SIZE + size);
        out.put_u8(indicator);
        out.put_u8(header);
        out.put_slice(&data[offset..offset + size]);
        payloads.push(out.freeze());
        offset += size;
    }
    trace!("FU-A fragmented {} bytes into {} packets", nal.len(), count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::media::h264::depayloader::{H264Depayloader, PackagingMode};

    fn annex_b(units: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for unit in units {
            out.extend_from_slice(&ANNEX_B_START_CODE);
            out.extend_from_slice(unit);
        }
        out
    }

    #[test]
    fn test_empty_input() {
        let mut payloader = H264Payloader::new();
        assert!(payloader.payload(1200, &[]).is_empty());
    }

    #[test]
    fn test_single_nal_verbatim() {
        let nal = [0x41, 0x9A, 0x02, 0x03];
        let mut payloader = H264Payloader::new();
        let out = payloader.payload(1200, &nal);
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..], &nal[..]);
    }

    #[test]
    fn test_aud_and_filler_dropped() {
        let mut payloader = H264Payloader::new();
        let data = annex_b(&[&[0x09, 0xF0], &[0x0C, 0xFF, 0xFF], &[0x41, 0x01]]);
        let out = payloader.payload(1200, &data);
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..], &[0x41, 0x01]);
    }

    #[test]
    fn test_sps_pps_held_until_next_unit() {
        let mut payloader = H264Payloader::new();
        assert!(payloader.payload(1200, &annex_b(&[&[0x67, 0x42, 0x00]])).is_empty());
        assert!(payloader.payload(1200, &annex_b(&[&[0x68, 0xCE]])).is_empty());

        let out = payloader.payload(1200, &annex_b(&[&[0x65, 0x88, 0x84]]));
        assert_eq!(out.len(), 1);
        let stap = &out[0];
        assert_eq!(nal_type(stap[0]), NAL_TYPE_STAP_A);
        assert_eq!(stap[0] & NAL_REF_IDC_MASK, 0x60);
        assert_eq!(
            &stap[..],
            &[0x78, 0x00, 0x03, 0x67, 0x42, 0x00, 0x00, 0x02, 0x68, 0xCE, 0x00, 0x03, 0x65, 0x88, 0x84]
        );
    }

    #[test]
    fn test_stap_a_bounds() {
        let sps: &[u8] = &[0x67, 0x42];
        let pps: &[u8] = &[0x68, 0xCE];
        let slices: Vec<Vec<u8>> = (0..12).map(|i| vec![0x41, i as u8, 0xAB]).collect();
        let mut units: Vec<&[u8]> = vec![sps, pps];
        units.extend(slices.iter().map(|s| s.as_slice()));

        let mut payloader = H264Payloader::new();
        let out = payloader.payload(1200, &annex_b(&units));

        let stap = &out[0];
        assert_eq!(nal_type(stap[0]), NAL_TYPE_STAP_A);
        assert!(stap.len() <= 1200);

        let mut depayloader = H264Depayloader::new(PackagingMode::Avc);
        let avc = depayloader.depayload(stap).unwrap();
        let mut count = 0;
        let mut offset = 0;
        while offset < avc.len() {
            let len = u32::from_be_bytes([avc[offset], avc[offset + 1], avc[offset + 2], avc[offset + 3]]) as usize;
            offset += 4 + len;
            count += 1;
        }
        assert_eq!(count, 9);
        // 7 slices went into the aggregate, the other 5 follow as single NALs
        assert_eq!(out.len(), 1 + 5);
    }

    #[test]
    fn test_stap_a_respects_mtu() {
        let sps: &[u8] = &[0x67, 0x42, 0x00, 0x1F];
        let pps: &[u8] = &[0x68, 0xCE, 0x3C];
        let slice = vec![0x21u8; 20];
        let mut payloader = H264Payloader::new();
        let out = payloader.payload(24, &annex_b(&[sps, pps, &slice]));

        // SPS + PPS fit (12 bytes) but the slice does not join them
        assert_eq!(out.len(), 1 + 1);
        assert_eq!(nal_type(out[0][0]), NAL_TYPE_STAP_A);
        assert!(out[0].len() <= 24);
        assert_eq!(&out[1][..], &slice[..]);
    }

    #[test]
    fn test_parameter_sets_too_large_sent_alone() {
        let sps = vec![0x67u8; 10];
        let pps = vec![0x68u8; 10];
        let mut payloader = H264Payloader::new();
        let out = payloader.payload(16, &annex_b(&[&sps, &pps, &[0x41, 0x01]]));
        assert_eq!(out.len(), 3);
        assert_eq!(&out[0][..], &sps[..]);
        assert_eq!(&out[1][..], &pps[..]);
        assert_eq!(&out[2][..], &[0x41, 0x01]);
    }

    #[test]
    fn test_stap_a_capped_at_16_bit_sizes() {
        let sps = [0x67, 0x42, 0x00];
        let pps = [0x68, 0xCE, 0x3C];
        let mut idr = vec![0x65u8; 70_000];
        idr[1] = 0x88;
        let mut payloader = H264Payloader::new();
        let out = payloader.payload(200_000, &annex_b(&[&sps[..], &pps[..], &idr[..]]));

        assert_eq!(out.len(), 2);
        assert_eq!(nal_type(out[0][0]), NAL_TYPE_STAP_A);
        assert_eq!(out[0].len(), 1 + 2 + 3 + 2 + 3);
        assert_eq!(&out[1][..], &idr[..]);
    }

    #[test]
    fn test_fragmentation_sizes() {
        let mut nal = vec![0x65u8];
        nal.extend((0..1000).map(|i| (i % 251) as u8));
        let mtu = 100;

        let mut payloader = H264Payloader::new();
        let out = payloader.payload(mtu, &nal);

        assert!(out.len() > 1);
        let sizes: Vec<usize> = out.iter().map(|p| p.len()).collect();
        assert!(sizes.iter().all(|&s| s <= mtu));
        let max = *sizes.iter().max().unwrap();
        let min = *sizes.iter().min().unwrap();
        assert!(max - min <= 1);
        // Larger fragments come first
        assert!(sizes.windows(2).all(|w| w[0] >= w[1]));

        assert_eq!(out[0][0], 0x60 | NAL_TYPE_FU_A);
        assert_eq!(out[0][1], FU_START_MASK | 5);
        assert_eq!(out[1][1], 5);
        assert_eq!(out[out.len() - 1][1], FU_END_MASK | 5);

        let rebuilt: Vec<u8> = out.iter().flat_map(|p| p[2..].to_vec()).collect();
        assert_eq!(rebuilt, nal[1..]);
    }

    #[test]
    fn test_fragment_guard_mtu_one() {
        let mut payloader = H264Payloader::new();
        assert!(payloader.payload(1, &[0x65, 0x01]).is_empty());
    }

    #[test]
    fn test_fragment_roundtrip_through_depayloader() {
        let mut nal = vec![0x45u8];
        nal.extend(std::iter::repeat(0x5A).take(3000));

        let mut payloader = H264Payloader::new();
        let mut depayloader = H264Depayloader::new(PackagingMode::AnnexB);

        let mut result = Bytes::new();
        for payload in payloader.payload(1200, &nal) {
            let out = depayloader.depayload(&payload).unwrap();
            if !out.is_empty() {
                result = out;
            }
        }
        assert_eq!(&result[..4], &ANNEX_B_START_CODE);
        assert_eq!(&result[4..], &nal[..]);
    }
}
