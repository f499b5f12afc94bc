//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - Protocol implementations (Janus signaling, WebRTC transport)
//! - H.264 and RTP media framing
//! - Media source adapters and audio capture devices

pub mod audio;
pub mod media;
pub mod protocols;
pub mod source;
