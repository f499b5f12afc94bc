//! Signaling gateway seam and its Janus implementation
//!
//! A gateway hosts sessions; a session attaches plugin handles. Each handle
//! carries a queue of typed events pushed by the gateway and a messenger for
//! plugin requests.

pub mod client;
pub mod message;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::session::MediaKind;

pub use client::JanusConnector;

/// Plugin that hosts publishers in rooms
pub const VIDEOROOM_PLUGIN: &str = "janus.plugin.videoroom";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("gateway error {code}: {reason}")]
    Janus { code: i64, reason: String },

    #[error("unexpected reply: {0}")]
    Protocol(String),

    #[error("gateway connection closed")]
    Closed,
}

/// SDP payload exchanged through the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jsep {
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trickle: Option<bool>,
}

impl Jsep {
    /// Non-trickle offer carrying every gathered candidate
    pub fn offer(sdp: String) -> Self {
        Self {
            kind: "offer".to_string(),
            sdp,
            trickle: Some(false),
        }
    }
}

/// Plugin response to a handle message
#[derive(Debug, Clone, PartialEq)]
pub struct PluginReply {
    pub data: Value,
    /// Plugin-level error, if the request was rejected
    pub error: Option<String>,
    pub jsep: Option<Jsep>,
}

/// Notifications pushed by the gateway for one handle
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    SlowLink { uplink: bool, lost: u64 },
    Media { kind: MediaKind, receiving: bool },
    WebRtcUp,
    /// `subject` is the identity the handle was attached for
    Hangup { reason: String, subject: String },
    Event { data: Value },
}

#[async_trait]
pub trait GatewayConnector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Gateway>, GatewayError>;
}

#[async_trait]
pub trait Gateway: Send + Sync {
    async fn create_session(&self) -> Result<Arc<dyn GatewaySession>, GatewayError>;

    /// Destroy sessions, close the connection and end every event queue
    async fn close(&self) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait GatewaySession: Send + Sync {
    fn id(&self) -> u64;

    async fn attach(&self, plugin: &str, opaque_id: &str) -> Result<PluginHandle, GatewayError>;

    async fn keep_alive(&self) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait HandleMessenger: Send + Sync {
    async fn message(&self, body: Value, jsep: Option<Jsep>) -> Result<PluginReply, GatewayError>;
}

/// One plugin attachment
pub struct PluginHandle {
    pub id: u64,
    /// Identity hangups are matched against
    pub owner: String,
    pub events: mpsc::UnboundedReceiver<GatewayEvent>,
    pub messenger: Arc<dyn HandleMessenger>,
}

impl std::fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHandle")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .finish()
    }
}
