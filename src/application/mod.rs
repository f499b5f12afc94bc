//! Application layer - Use cases and application services
//!
//! The session state machine, its signaling conversation and the bridge
//! service that the front door drives.

pub mod bridge;
pub mod error;
pub mod muxer;
pub mod signaling;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use bridge::BridgeService;
pub use error::{BridgeError, StartFailure, StartStep};
pub use muxer::{BridgeDeps, CloseReason, Muxer, MuxerSettings};
pub use signaling::{ConversationEvents, PublishCapabilities, SignalingConversation};
