//! `cpal` capture backend
//!
//! cpal streams are not `Send`, so each opened device lives on its own
//! thread. The thread downmixes, decimates to 8 kHz and μ-law encodes 20 ms
//! frames; an async pump fans them out to every subscribed track.

use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::{AudioCapture, AudioDevices, DeviceError, DeviceInfo, DeviceKind};
use crate::infrastructure::media::codec::{downmix, encode_pcmu, Decimator, G711_CLOCK_RATE};
use crate::infrastructure::protocols::webrtc::OutboundTrack;

const FRAME_DURATION: Duration = Duration::from_millis(20);
const FRAME_SAMPLES: usize = (G711_CLOCK_RATE / 50) as usize;
const MAX_BUFFER_FRAMES: usize = 64;

struct Subscriber {
    id: u64,
    track: Arc<dyn OutboundTrack>,
    muted: Arc<AtomicBool>,
}

type Subscribers = Arc<RwLock<Vec<Subscriber>>>;

struct DeviceStream {
    subscribers: Subscribers,
    stop: crossbeam_channel::Sender<()>,
}

/// Input devices through the default cpal host
pub struct CpalAudioDevices {
    streams: Arc<Mutex<HashMap<String, DeviceStream>>>,
    next_id: AtomicU64,
}

impl CpalAudioDevices {
    pub fn new() -> Self {
        Self {
            streams: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for CpalAudioDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioDevices for CpalAudioDevices {
    fn enumerate(&self) -> Vec<DeviceInfo> {
        let host = cpal::default_host();
        let devices = match host.input_devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Failed to enumerate audio devices: {}", e);
                return Vec::new();
            }
        };

        let mut found: Vec<DeviceInfo> = devices
            .filter_map(|device| device.name().ok())
            .map(|name| DeviceInfo {
                kind: DeviceKind::AudioInput,
                id: name.clone(),
                name,
            })
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    async fn open_capture(
        &self,
        device: &str,
        track: Arc<dyn OutboundTrack>,
    ) -> Result<Arc<dyn AudioCapture>, DeviceError> {
        let mut streams = self.streams.lock().await;

        if !streams.contains_key(device) {
            let stream = start_device(device).await?;
            streams.insert(device.to_string(), stream);
        }
        let Some(stream) = streams.get(device) else {
            return Err(DeviceError::NotFound(device.to_string()));
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let muted = Arc::new(AtomicBool::new(false));
        stream.subscribers.write().await.push(Subscriber {
            id,
            track,
            muted: muted.clone(),
        });
        debug!("Capture {} subscribed to {}", id, device);

        Ok(Arc::new(CpalCapture {
            id,
            device: device.to_string(),
            muted,
            subscribers: stream.subscribers.clone(),
        }))
    }

    async fn close_if_idle(&self, name: &str) {
        let mut streams = self.streams.lock().await;
        let idle = match streams.get(name) {
            Some(stream) => stream.subscribers.read().await.is_empty(),
            None => false,
        };
        if idle {
            if let Some(stream) = streams.remove(name) {
                let _ = stream.stop.send(());
                info!("Closed idle audio device {}", name);
            }
        }
    }
}

/// Spawn the capture thread and the async pump for one device
async fn start_device(name: &str) -> Result<DeviceStream, DeviceError> {
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Bytes>();
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), DeviceError>>();

    let device_name = name.to_string();
    std::thread::Builder::new()
        .name(format!("capture-{}", name))
        .spawn(move || capture_thread(device_name, frames_tx, stop_rx, ready_tx))
        .map_err(|e| DeviceError::Open {
            device: name.to_string(),
            reason: e.to_string(),
        })?;

    ready_rx.await.map_err(|_| DeviceError::Stream("capture thread exited".to_string()))??;

    let subscribers: Subscribers = Arc::new(RwLock::new(Vec::new()));
    let pump_subscribers = subscribers.clone();
    tokio::spawn(async move {
        while let Some(frame) = frames_rx.recv().await {
            let subscribers = pump_subscribers.read().await;
            for subscriber in subscribers.iter() {
                if subscriber.muted.load(Ordering::Acquire) {
                    continue;
                }
                if let Err(e) = subscriber.track.write_sample(frame.clone(), FRAME_DURATION).await {
                    debug!("Capture {} write failed: {}", subscriber.id, e);
                }
            }
        }
    });

    Ok(DeviceStream {
        subscribers,
        stop: stop_tx,
    })
}

fn capture_thread(
    name: String,
    frames: mpsc::UnboundedSender<Bytes>,
    stop: crossbeam_channel::Receiver<()>,
    ready: oneshot::Sender<Result<(), DeviceError>>,
) {
    let open_error = |reason: String| DeviceError::Open {
        device: name.clone(),
        reason,
    };

    let host = cpal::default_host();
    let device = match host
        .input_devices()
        .map_err(|e| open_error(e.to_string()))
        .and_then(|mut devices| {
            devices
                .find(|d| d.name().ok().as_deref() == Some(name.as_str()))
                .ok_or_else(|| DeviceError::NotFound(name.clone()))
        }) {
        Ok(device) => device,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let config = match device.default_input_config() {
        Ok(config) => config.config(),
        Err(e) => {
            let _ = ready.send(Err(open_error(e.to_string())));
            return;
        }
    };
    let channels = config.channels as usize;

    let (raw_tx, raw_rx) = crossbeam_channel::bounded::<Vec<f32>>(MAX_BUFFER_FRAMES);
    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            // Drop on overflow rather than block the audio callback
            let _ = raw_tx.try_send(data.to_vec());
        },
        |err| error!("Audio capture error: {}", err),
        None,
    );
    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(open_error(e.to_string())));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(DeviceError::Stream(e.to_string())));
        return;
    }
    let _ = ready.send(Ok(()));
    info!(
        "Capturing from {} at {} Hz, {} channels",
        name, config.sample_rate.0, channels
    );

    let mut decimator = Decimator::new(config.sample_rate.0, G711_CLOCK_RATE);
    let mut pending: Vec<i16> = Vec::with_capacity(FRAME_SAMPLES * 2);
    loop {
        crossbeam_channel::select! {
            recv(raw_rx) -> data => {
                let Ok(data) = data else { break };
                decimator.process(&downmix(&data, channels), &mut pending);
                while pending.len() >= FRAME_SAMPLES {
                    let frame: Vec<i16> = pending.drain(..FRAME_SAMPLES).collect();
                    if frames.send(encode_pcmu(&frame)).is_err() {
                        return;
                    }
                }
            }
            recv(stop) -> _ => break,
        }
    }
    drop(stream);
    debug!("Capture thread for {} stopped", name);
}

struct CpalCapture {
    id: u64,
    device: String,
    muted: Arc<AtomicBool>,
    subscribers: Subscribers,
}

#[async_trait]
impl AudioCapture for CpalCapture {
    fn device_name(&self) -> &str {
        &self.device
    }

    async fn mute(&self) -> Result<(), DeviceError> {
        self.muted.store(true, Ordering::Release);
        Ok(())
    }

    async fn unmute(&self) -> Result<(), DeviceError> {
        self.muted.store(false, Ordering::Release);
        Ok(())
    }

    async fn close(&self) {
        self.subscribers.write().await.retain(|s| s.id != self.id);
        debug!("Capture {} released {}", self.id, self.device);
    }
}
