//! Source selection from the start request

use std::path::PathBuf;
use std::sync::Arc;

use super::{DeviceSource, FileSource, RtspSource, SourceAdapter, SourceError};
use crate::domain::session::StartParams;
use crate::infrastructure::audio::AudioDevices;

pub trait SourceFactory: Send + Sync {
    fn create(&self, params: &StartParams) -> Result<Arc<dyn SourceAdapter>, SourceError>;
}

/// Picks RTSP, file or device source by the request's url and microphone
pub struct DefaultSourceFactory {
    devices: Arc<dyn AudioDevices>,
}

impl DefaultSourceFactory {
    pub fn new(devices: Arc<dyn AudioDevices>) -> Self {
        Self { devices }
    }
}

impl SourceFactory for DefaultSourceFactory {
    fn create(&self, params: &StartParams) -> Result<Arc<dyn SourceAdapter>, SourceError> {
        let location = params.url.trim();

        if location.is_empty() {
            let mic = params
                .microphone()
                .ok_or_else(|| SourceError::InvalidLocation("no url and no microphone".to_string()))?;
            return Ok(Arc::new(DeviceSource::new(self.devices.clone(), mic)));
        }

        let lower = location.to_ascii_lowercase();
        if lower.starts_with("rtsp://") || lower.starts_with("rtsps://") {
            return Ok(Arc::new(RtspSource::new(location)?));
        }
        if let Some(path) = location.strip_prefix("file://") {
            return Ok(Arc::new(FileSource::new(PathBuf::from(path))));
        }
        if lower.ends_with(".h264") || lower.ends_with(".264") {
            return Ok(Arc::new(FileSource::new(PathBuf::from(location))));
        }

        Err(SourceError::InvalidLocation(location.to_string()))
    }
}
