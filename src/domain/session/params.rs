//! Start request parameters and their validation

use serde::{Deserialize, Serialize};

use crate::domain::shared::{DomainError, IdPolicy, PublisherId, Result, RoomNumber, SessionKey};

/// Microphone selector meaning "no microphone"
pub const MUTED_MICROPHONE: &str = "mute";

/// ICE servers and credentials handed to the transport engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceSettings {
    pub servers: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// Everything a caller supplies to start one session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartParams {
    pub room: String,
    pub id: String,
    pub display: String,
    pub pin: String,
    /// Capture device name; empty or "mute" disables the microphone
    pub mic: Option<String>,
    /// Media source location (rtsp:// url, file path, or empty for device-only)
    pub url: String,
    /// Signaling gateway address
    pub gateway: String,
    pub ice: IceSettings,
}

/// Validated identity of a publisher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherIdentity {
    pub key: SessionKey,
    pub room: RoomNumber,
    pub publisher: PublisherId,
    pub display: String,
    pub pin: String,
}

impl StartParams {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(&self.room, &self.id)
    }

    /// Selected microphone, if any
    pub fn microphone(&self) -> Option<&str> {
        self.mic
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty() && *name != MUTED_MICROPHONE)
    }

    /// Validate before any resource is acquired
    pub fn validate(&self, policy: IdPolicy) -> Result<PublisherIdentity> {
        if self.room.trim().is_empty() {
            return Err(DomainError::ValidationError("room is empty".to_string()));
        }
        if self.id.trim().is_empty() {
            return Err(DomainError::ValidationError("id is empty".to_string()));
        }
        if self.display.trim().is_empty() {
            return Err(DomainError::ValidationError("display is empty".to_string()));
        }

        let room = RoomNumber::parse(&self.room, policy)?;
        let publisher = PublisherId::parse(&self.id, policy)?;

        Ok(PublisherIdentity {
            key: self.key(),
            room,
            publisher,
            display: self.display.clone(),
            pin: self.pin.clone(),
        })
    }
}
