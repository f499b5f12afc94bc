//! G.711 μ-law (PCMU) companding
//!
//! Captured microphone audio is sent as PCMU, which every videoroom
//! deployment accepts without transcoding.

use bytes::{BufMut, Bytes, BytesMut};

/// RTP payload type of PCMU
pub const PCMU_PAYLOAD_TYPE: u8 = 0;
/// G.711 sample rate
pub const G711_CLOCK_RATE: u32 = 8000;

const BIAS: i32 = 0x84;
const CLIP: i32 = 32635;

/// μ-law encode one linear sample
pub fn ulaw_encode(sample: i16) -> u8 {
    // Widen first so that i16::MIN can be negated
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0x00
    };

    pcm = pcm.min(CLIP) + BIAS;

    // Segment is the position of the highest set bit above bit 7
    let exponent = match pcm >> 7 {
        0 => 0,
        high => (31 - (high as u32).leading_zeros()).min(7) as i32,
    };
    let mantissa = (pcm >> (exponent + 3)) & 0x0F;

    !(sign | ((exponent as u8) << 4) | mantissa as u8)
}

/// μ-law decode one byte
pub fn ulaw_decode(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = ((byte >> 4) & 0x07) as i32;
    let mantissa = (byte & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Encode 16-bit PCM to μ-law
pub fn encode_pcmu(pcm: &[i16]) -> Bytes {
    let mut out = BytesMut::with_capacity(pcm.len());
    for &sample in pcm {
        out.put_u8(ulaw_encode(sample));
    }
    out.freeze()
}

/// Decode μ-law to 16-bit PCM
pub fn decode_pcmu(ulaw: &[u8]) -> Vec<i16> {
    ulaw.iter().map(|&b| ulaw_decode(b)).collect()
}
