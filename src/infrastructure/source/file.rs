//! Annex-B H.264 file source
//!
//! Reads an elementary stream from disk, splits it into access units and
//! plays them as samples at a fixed frame rate, looping at end of file.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{SourceAdapter, SourceContext, SourceError};
use crate::domain::session::{CodecDescriptor, MediaKind};
use crate::infrastructure::media::h264::{nal_type, NalUnits, ANNEX_B_START_CODE, NAL_TYPE_AUD, NAL_TYPE_PPS, NAL_TYPE_SPS};

pub const DEFAULT_FRAME_RATE: u32 = 30;

const NAL_TYPE_SEI: u8 = 6;

pub struct FileSource {
    path: PathBuf,
    frame_rate: u32,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FileSource {
    pub fn new(path: PathBuf) -> Self {
        Self::with_frame_rate(path, DEFAULT_FRAME_RATE)
    }

    pub fn with_frame_rate(path: PathBuf, frame_rate: u32) -> Self {
        Self {
            path,
            frame_rate: frame_rate.max(1),
            task: Mutex::new(None),
        }
    }
}

/// Group NAL units into access units, each re-framed as Annex-B
pub fn access_units(data: &[u8]) -> Vec<Bytes> {
    let mut units = Vec::new();
    let mut current = BytesMut::new();
    let mut has_slice = false;

    for nal in NalUnits::new(data).filter(|n| !n.is_empty()) {
        let kind = nal_type(nal[0]);
        let starts_new = match kind {
            NAL_TYPE_AUD => true,
            NAL_TYPE_SPS | NAL_TYPE_PPS | NAL_TYPE_SEI => has_slice,
            // first_mb_in_slice == 0 begins a new picture
            1..=5 => has_slice && nal.len() > 1 && nal[1] & 0x80 != 0,
            _ => false,
        };
        if starts_new && !current.is_empty() {
            units.push(current.split().freeze());
            has_slice = false;
        }

        current.put_slice(&ANNEX_B_START_CODE);
        current.put_slice(nal);
        if (1..=5).contains(&kind) {
            has_slice = true;
        }
    }

    if !current.is_empty() {
        units.push(current.freeze());
    }
    units
}

#[async_trait]
impl SourceAdapter for FileSource {
    async fn describe(&self) -> Result<Vec<CodecDescriptor>, SourceError> {
        let meta = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| SourceError::Read(format!("{}: {}", self.path.display(), e)))?;
        if !meta.is_file() {
            return Err(SourceError::InvalidLocation(self.path.display().to_string()));
        }
        Ok(vec![CodecDescriptor::h264()])
    }

    async fn start(&self, ctx: SourceContext) -> Result<(), SourceError> {
        let data = tokio::fs::read(&self.path)
            .await
            .map_err(|e| SourceError::Read(format!("{}: {}", self.path.display(), e)))?;
        let units = access_units(&data);
        if units.is_empty() {
            return Err(SourceError::Read(format!("{}: no NAL units", self.path.display())));
        }
        let track = ctx.track(MediaKind::Video).ok_or(SourceError::NoVideoTrack)?;

        let frame = Duration::from_secs(1) / self.frame_rate;
        info!(
            "Playing {} ({} access units at {} fps)",
            self.path.display(),
            units.len(),
            self.frame_rate
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            for unit in units.iter().cycle() {
                ticker.tick().await;
                if let Err(e) = track.write_sample(unit.clone(), frame).await {
                    error!("File source write failed: {}", e);
                    (ctx.on_fatal)(e.into());
                    break;
                }
            }
            debug!("File source stopped");
        });

        *self.task.lock().await = Some(handle);
        Ok(())
    }

    async fn close(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
    }
}
