//! Microphone-only source, used when the request carries no media url

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use super::{SourceAdapter, SourceContext, SourceError};
use crate::domain::session::{CodecDescriptor, MediaKind};
use crate::infrastructure::audio::{AudioCapture, AudioDevices, DeviceError};

pub struct DeviceSource {
    devices: Arc<dyn AudioDevices>,
    selector: String,
    capture: Mutex<Option<Arc<dyn AudioCapture>>>,
}

impl DeviceSource {
    pub fn new(devices: Arc<dyn AudioDevices>, selector: &str) -> Self {
        Self {
            devices,
            selector: selector.to_string(),
            capture: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SourceAdapter for DeviceSource {
    async fn describe(&self) -> Result<Vec<CodecDescriptor>, SourceError> {
        self.devices
            .resolve(&self.selector)
            .ok_or_else(|| DeviceError::NotFound(self.selector.clone()))?;
        Ok(vec![CodecDescriptor::pcmu()])
    }

    async fn start(&self, ctx: SourceContext) -> Result<(), SourceError> {
        let device = self
            .devices
            .resolve(&self.selector)
            .ok_or_else(|| DeviceError::NotFound(self.selector.clone()))?;
        let track = ctx
            .track(MediaKind::Audio)
            .ok_or_else(|| DeviceError::Stream("no audio track".to_string()))?;

        let capture = self.devices.open_capture(&device.name, track).await?;
        info!("Capturing from {}", device.name);
        *self.capture.lock().await = Some(capture);
        Ok(())
    }

    async fn capture(&self) -> Option<Arc<dyn AudioCapture>> {
        self.capture.lock().await.clone()
    }

    async fn close(&self) {
        if let Some(capture) = self.capture.lock().await.take() {
            let name = capture.device_name().to_string();
            capture.close().await;
            self.devices.close_if_idle(&name).await;
        }
    }
}
