//! Transport engine seam
//!
//! The session state machine only talks to these traits. `WebRtcEngine`
//! implements them on top of the `webrtc` crate; tests use in-memory fakes.

pub mod engine;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::session::{CodecDescriptor, IceSettings, TrackDirection};

pub use engine::{EngineSettings, WebRtcEngine};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("peer connection: {0}")]
    PeerConnection(String),

    #[error("add track: {0}")]
    Track(String),

    #[error("negotiation: {0}")]
    Negotiation(String),

    #[error("write: {0}")]
    Write(String),

    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
}

/// ICE connection state as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
    Unknown,
}

impl fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub type IceStateHandler = Box<dyn Fn(IceConnectionState) + Send + Sync>;

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, ice: &IceSettings) -> Result<Arc<dyn PeerConnection>, EngineError>;
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Add an outbound track on its own transceiver
    async fn add_track(
        &self,
        codec: CodecDescriptor,
        direction: TrackDirection,
    ) -> Result<Arc<dyn OutboundTrack>, EngineError>;

    fn on_ice_connection_state_change(&self, handler: IceStateHandler);

    /// Resolves once ICE gathering is complete; must be taken before the offer
    async fn gathering_complete_promise(&self) -> mpsc::Receiver<()>;

    /// Create an offer and set it as the local description
    async fn create_offer(&self) -> Result<String, EngineError>;

    /// Current local SDP, including gathered candidates
    async fn local_description(&self) -> Option<String>;

    async fn set_remote_answer(&self, sdp: &str) -> Result<(), EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}

/// One outbound media leg
#[async_trait]
pub trait OutboundTrack: Send + Sync {
    fn codec(&self) -> CodecDescriptor;

    /// Relay a complete RTP packet
    async fn write_rtp(&self, packet: &[u8]) -> Result<(), EngineError>;

    /// Payload and send one encoded media sample
    async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<(), EngineError>;
}
