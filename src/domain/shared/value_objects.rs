//! Shared value objects

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;
use uuid::Uuid;

use super::error::DomainError;

/// Room number used when a room string is not numeric and the policy tolerates it
pub const DEFAULT_FALLBACK_ROOM: u64 = 1234;

/// Identity of one bridging attempt inside the process (`{room}_{id}`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(room: &str, id: &str) -> Self {
        Self(format!("{}_{}", room, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Per-muxer instance identifier, distinct across restarts of the same key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How non-numeric room/publisher identifiers are treated before they reach the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdPolicy {
    /// Reject non-numeric identifiers as validation errors
    Strict,
    /// Substitute the given room number (publisher id falls back to 0)
    Fallback(u64),
}

impl Default for IdPolicy {
    fn default() -> Self {
        IdPolicy::Fallback(DEFAULT_FALLBACK_ROOM)
    }
}

/// Numeric room identifier as transmitted to the videoroom plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomNumber(u64);

impl RoomNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn parse(raw: &str, policy: IdPolicy) -> Result<Self, DomainError> {
        match raw.trim().parse::<u64>() {
            Ok(value) => Ok(Self(value)),
            Err(e) => match policy {
                IdPolicy::Strict => Err(DomainError::ValidationError(format!(
                    "room '{}' is not numeric",
                    raw
                ))),
                IdPolicy::Fallback(room) => {
                    warn!("Room number invalid {}: {}, using {}", raw, e, room);
                    Ok(Self(room))
                }
            },
        }
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RoomNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric publisher identifier; 0 asks the gateway to assign one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublisherId(u64);

impl PublisherId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn parse(raw: &str, policy: IdPolicy) -> Result<Self, DomainError> {
        match raw.trim().parse::<u64>() {
            Ok(value) => Ok(Self(value)),
            Err(e) => match policy {
                IdPolicy::Strict => Err(DomainError::ValidationError(format!(
                    "publisher id '{}' is not numeric",
                    raw
                ))),
                IdPolicy::Fallback(_) => {
                    warn!("Publisher id invalid {}: {}, gateway will assign one", raw, e);
                    Ok(Self(0))
                }
            },
        }
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PublisherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
