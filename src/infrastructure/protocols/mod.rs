//! Protocol seams: the WebRTC transport engine and the signaling gateway

pub mod janus;
pub mod webrtc;
