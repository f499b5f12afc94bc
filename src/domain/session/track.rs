//! Outbound track description

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// Codec carried by one track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecKind {
    H264,
    H265,
    Pcmu,
    Pcma,
    Opus,
}

impl CodecKind {
    pub fn kind(&self) -> MediaKind {
        match self {
            CodecKind::H264 | CodecKind::H265 => MediaKind::Video,
            CodecKind::Pcmu | CodecKind::Pcma | CodecKind::Opus => MediaKind::Audio,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            CodecKind::H264 => "video/H264",
            CodecKind::H265 => "video/H265",
            CodecKind::Pcmu => "audio/PCMU",
            CodecKind::Pcma => "audio/PCMA",
            CodecKind::Opus => "audio/opus",
        }
    }

    /// Map an RTP encoding name (case-insensitive) to a supported codec
    pub fn from_encoding_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "h264" => Some(CodecKind::H264),
            "h265" | "hevc" => Some(CodecKind::H265),
            "pcmu" => Some(CodecKind::Pcmu),
            "pcma" => Some(CodecKind::Pcma),
            "opus" => Some(CodecKind::Opus),
            _ => None,
        }
    }
}

/// Codec type, clock rate and channel count of one track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodecDescriptor {
    pub codec: CodecKind,
    pub clock_rate: u32,
    pub channels: u16,
}

impl CodecDescriptor {
    pub fn new(codec: CodecKind, clock_rate: u32, channels: u16) -> Self {
        Self {
            codec,
            clock_rate,
            channels,
        }
    }

    pub fn h264() -> Self {
        Self::new(CodecKind::H264, 90_000, 0)
    }

    pub fn pcmu() -> Self {
        Self::new(CodecKind::Pcmu, 8_000, 1)
    }

    pub fn kind(&self) -> MediaKind {
        self.codec.kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackDirection {
    SendOnly,
    SendRecv,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_names() {
        assert_eq!(CodecKind::from_encoding_name("H264"), Some(CodecKind::H264));
        assert_eq!(CodecKind::from_encoding_name("h265"), Some(CodecKind::H265));
        assert_eq!(CodecKind::from_encoding_name("PCMA"), Some(CodecKind::Pcma));
        assert_eq!(CodecKind::from_encoding_name("mpeg4-generic"), None);
    }

    #[test]
    fn test_media_kind() {
        assert_eq!(CodecDescriptor::h264().kind(), MediaKind::Video);
        assert_eq!(CodecDescriptor::pcmu().kind(), MediaKind::Audio);
    }
}
