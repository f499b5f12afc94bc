//! Audio device layer
//!
//! Capture devices are a process-wide resource. Sessions open captures that
//! feed their audio track and release the device through `close_if_idle`,
//! which only stops it once no capture on that device remains.

#[cfg(feature = "device-audio")]
pub mod cpal_device;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::infrastructure::protocols::webrtc::OutboundTrack;

#[cfg(feature = "device-audio")]
pub use cpal_device::CpalAudioDevices;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("audio device not found: {0}")]
    NotFound(String),

    #[error("failed to open audio device {device}: {reason}")]
    Open { device: String, reason: String },

    #[error("audio stream error: {0}")]
    Stream(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    AudioInput,
    AudioOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub kind: DeviceKind,
    pub name: String,
    pub id: String,
}

#[async_trait]
pub trait AudioDevices: Send + Sync {
    fn enumerate(&self) -> Vec<DeviceInfo>;

    /// Find an input device by name or id
    fn resolve(&self, selector: &str) -> Option<DeviceInfo> {
        self.enumerate()
            .into_iter()
            .find(|d| d.kind == DeviceKind::AudioInput && (d.name == selector || d.id == selector))
    }

    /// Start feeding PCMU frames from the device into `track`
    async fn open_capture(
        &self,
        device: &str,
        track: Arc<dyn OutboundTrack>,
    ) -> Result<Arc<dyn AudioCapture>, DeviceError>;

    /// Stop the device if no capture uses it any more
    async fn close_if_idle(&self, name: &str);
}

/// One session's use of a capture device
#[async_trait]
pub trait AudioCapture: Send + Sync {
    fn device_name(&self) -> &str;

    async fn mute(&self) -> Result<(), DeviceError>;

    async fn unmute(&self) -> Result<(), DeviceError>;

    async fn close(&self);
}

/// Backend for builds without audio device support
#[derive(Debug, Default, Clone)]
pub struct NoAudioDevices;

#[async_trait]
impl AudioDevices for NoAudioDevices {
    fn enumerate(&self) -> Vec<DeviceInfo> {
        Vec::new()
    }

    async fn open_capture(
        &self,
        device: &str,
        _track: Arc<dyn OutboundTrack>,
    ) -> Result<Arc<dyn AudioCapture>, DeviceError> {
        Err(DeviceError::NotFound(device.to_string()))
    }

    async fn close_if_idle(&self, _name: &str) {}
}

/// Default backend for this build
pub fn default_devices() -> Arc<dyn AudioDevices> {
    #[cfg(feature = "device-audio")]
    {
        Arc::new(CpalAudioDevices::new())
    }
    #[cfg(not(feature = "device-audio"))]
    {
        Arc::new(NoAudioDevices)
    }
}
