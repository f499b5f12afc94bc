//! Front door request and response shapes

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::session::{IceSettings, StartParams};

/// The JSON object carried in the `configs` form field of a start request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfigs {
    pub id: String,
    pub room: String,
    pub pin: String,
    pub display: String,
    pub mic: String,
    pub url: String,
    /// Gateway address; empty uses the configured one
    pub janus: String,
    pub ice_servers: Vec<String>,
    pub ice_username: String,
    pub ice_credential: String,
}

impl PushConfigs {
    /// Build start parameters, falling back to `default_ice` when the
    /// request names no ICE servers
    pub fn into_params(self, default_ice: &IceSettings) -> StartParams {
        let ice = if self.ice_servers.is_empty() {
            default_ice.clone()
        } else {
            IceSettings {
                servers: self.ice_servers,
                username: non_empty(self.ice_username),
                credential: non_empty(self.ice_credential),
            }
        };

        StartParams {
            room: self.room,
            id: self.id,
            display: self.display,
            pin: self.pin,
            mic: non_empty(self.mic),
            url: self.url,
            gateway: self.janus,
            ice,
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartForm {
    pub configs: Option<String>,
}

/// Form naming one session
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeyForm {
    pub id: Option<String>,
    pub room: Option<String>,
}

/// Response body kept compatible with existing clients: `state` is 1 on
/// success or the negative error code, `code` the message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    pub state: i32,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl PushResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            state: 1,
            code: message.into(),
            data: None,
        }
    }

    pub fn fail(code: i32, message: impl Into<String>) -> Self {
        Self {
            state: code,
            code: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}
