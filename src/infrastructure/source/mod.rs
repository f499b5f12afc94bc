//! Media source adapters
//!
//! A source describes the tracks it will feed, then forwards media into the
//! outbound tracks until closed. Recoverable failures are retried against
//! the session's retry budget; exhausting it reports a fatal error.

pub mod device;
pub mod factory;
pub mod file;
pub mod rtsp;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::domain::session::{CodecDescriptor, MediaKind, RetryBudget};
use crate::infrastructure::audio::{AudioCapture, DeviceError};
use crate::infrastructure::protocols::webrtc::{EngineError, OutboundTrack};

pub use device::DeviceSource;
pub use factory::{DefaultSourceFactory, SourceFactory};
pub use file::FileSource;
pub use rtsp::RtspSource;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("invalid source location: {0}")]
    InvalidLocation(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("describe failed: {0}")]
    Describe(String),

    #[error("no usable video track")]
    NoVideoTrack,

    #[error("read failed: {0}")]
    Read(String),

    #[error("source ended")]
    Ended,

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Write(#[from] EngineError),
}

impl SourceError {
    /// Whether reconnecting can help
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            SourceError::Connect(_) | SourceError::Describe(_) | SourceError::Read(_) | SourceError::Ended
        )
    }
}

pub type FatalHandler = Arc<dyn Fn(SourceError) + Send + Sync>;

/// What a started source writes into and reports to
#[derive(Clone)]
pub struct SourceContext {
    /// Tracks created for the described codecs, in the same order
    pub tracks: Vec<Arc<dyn OutboundTrack>>,
    pub retries: Arc<RetryBudget>,
    pub retry_delay: Duration,
    pub on_fatal: FatalHandler,
}

impl SourceContext {
    pub fn track(&self, kind: MediaKind) -> Option<Arc<dyn OutboundTrack>> {
        self.tracks.iter().find(|t| t.codec().kind() == kind).cloned()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Codecs of the tracks this source will feed
    async fn describe(&self) -> Result<Vec<CodecDescriptor>, SourceError>;

    /// Begin forwarding in the background
    async fn start(&self, ctx: SourceContext) -> Result<(), SourceError>;

    /// Stop forwarding; unblocks the background task
    async fn close(&self);

    /// Capture device this source reads from, if it is a microphone
    async fn capture(&self) -> Option<Arc<dyn AudioCapture>> {
        None
    }
}
