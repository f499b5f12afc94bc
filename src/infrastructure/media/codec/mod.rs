//! Audio codec helpers for captured microphone audio

pub mod g711;
pub mod pcm;

pub use g711::{decode_pcmu, encode_pcmu, G711_CLOCK_RATE, PCMU_PAYLOAD_TYPE};
pub use pcm::{downmix, Decimator};
