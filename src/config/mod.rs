//! Configuration management
//!
//! Layered with the `config` crate: built-in defaults, an optional TOML file,
//! then `ROOMCAST__SECTION__KEY` environment overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::domain::session::IceSettings;
use crate::domain::shared::{IdPolicy, DEFAULT_FALLBACK_ROOM};

/// File looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "roomcast.toml";
pub const ENV_PREFIX: &str = "ROOMCAST";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub ice: IceConfig,
    pub session: SessionConfig,
    pub rtp: RtpConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Used when a start request names no gateway
    pub address: String,
    pub request_timeout_secs: u64,
    pub keepalive_interval_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    pub servers: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
    /// Ephemeral UDP range, applied only when 0 < port_min < port_max
    pub port_min: u16,
    pub port_max: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ice_gather_timeout_secs: u64,
    pub source_retries: u32,
    pub source_retry_delay_ms: u64,
    pub mic_release_grace_secs: u64,
    pub fallback_room: u64,
    /// Reject non-numeric room and publisher ids instead of falling back
    pub strict_ids: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtpConfig {
    pub mtu: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9981,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            address: "ws://127.0.0.1:8188".to_string(),
            request_timeout_secs: 10,
            keepalive_interval_secs: 30,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_gather_timeout_secs: 10,
            source_retries: 3,
            source_retry_delay_ms: 1000,
            mic_release_grace_secs: 3,
            fallback_room: DEFAULT_FALLBACK_ROOM,
            strict_ids: false,
        }
    }
}

impl Default for RtpConfig {
    fn default() -> Self {
        Self { mtu: 1200 }
    }
}

impl Config {
    /// Load defaults, then the TOML file, then environment overrides.
    ///
    /// An explicit `path` must exist; without one `roomcast.toml` is read
    /// if present.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("ice.servers")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn id_policy(&self) -> IdPolicy {
        if self.session.strict_ids {
            IdPolicy::Strict
        } else {
            IdPolicy::Fallback(self.session.fallback_room)
        }
    }

    /// ICE settings used when a request carries none
    pub fn ice_settings(&self) -> IceSettings {
        IceSettings {
            servers: self.ice.servers.clone(),
            username: self.ice.username.clone(),
            credential: self.ice.credential.clone(),
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

impl SessionConfig {
    pub fn ice_gather_timeout(&self) -> Duration {
        Duration::from_secs(self.ice_gather_timeout_secs)
    }

    pub fn source_retry_delay(&self) -> Duration {
        Duration::from_millis(self.source_retry_delay_ms)
    }

    pub fn mic_release_grace(&self) -> Duration {
        Duration::from_secs(self.mic_release_grace_secs)
    }
}
