//! In-memory collaborators for exercising sessions without network or devices

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use super::bridge::BridgeService;
use super::muxer::{BridgeDeps, MuxerSettings};
use crate::domain::session::{CodecDescriptor, CodecKind, IceSettings, MediaKind, StartParams, TrackDirection};
use crate::infrastructure::audio::{AudioCapture, AudioDevices, DeviceError, DeviceInfo, DeviceKind};
use crate::infrastructure::protocols::janus::{
    Gateway, GatewayConnector, GatewayError, GatewayEvent, GatewaySession, HandleMessenger, Jsep,
    PluginHandle, PluginReply,
};
use crate::infrastructure::protocols::webrtc::{
    EngineError, IceConnectionState, IceStateHandler, OutboundTrack, PeerConnection, PeerConnectionFactory,
};
use crate::infrastructure::source::{SourceAdapter, SourceContext, SourceError, SourceFactory};

pub const FAKE_OFFER: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=offer\r\n";
pub const FAKE_ANSWER: &str = "v=0\r\no=- 2 2 IN IP4 127.0.0.1\r\ns=answer\r\n";

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---- transport engine ----

#[derive(Debug, Clone, Default)]
pub struct EngineBehavior {
    pub fail_create: bool,
    pub fail_add_track: bool,
    /// Gathering never completes
    pub stall_gathering: bool,
    pub fail_remote_answer: bool,
}

#[derive(Default)]
pub struct FakeEngine {
    behavior: Mutex<EngineBehavior>,
    peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_behavior(&self, behavior: EngineBehavior) {
        *lock(&self.behavior) = behavior;
    }

    pub fn peers(&self) -> Vec<Arc<FakePeer>> {
        lock(&self.peers).clone()
    }

    pub fn last_peer(&self) -> Option<Arc<FakePeer>> {
        lock(&self.peers).last().cloned()
    }
}

#[async_trait]
impl PeerConnectionFactory for FakeEngine {
    async fn create(&self, ice: &IceSettings) -> Result<Arc<dyn PeerConnection>, EngineError> {
        let behavior = lock(&self.behavior).clone();
        if behavior.fail_create {
            return Err(EngineError::PeerConnection("refused".to_string()));
        }
        let peer = Arc::new(FakePeer {
            behavior,
            ice: ice.clone(),
            tracks: Mutex::new(Vec::new()),
            ice_handler: Mutex::new(None),
            gather_tx: Mutex::new(None),
            offered: AtomicBool::new(false),
            remote: Mutex::new(None),
            closes: AtomicUsize::new(0),
        });
        lock(&self.peers).push(peer.clone());
        Ok(peer)
    }
}

pub struct FakePeer {
    behavior: EngineBehavior,
    ice: IceSettings,
    tracks: Mutex<Vec<Arc<FakeTrack>>>,
    ice_handler: Mutex<Option<IceStateHandler>>,
    gather_tx: Mutex<Option<mpsc::Sender<()>>>,
    offered: AtomicBool,
    remote: Mutex<Option<String>>,
    closes: AtomicUsize,
}

impl FakePeer {
    pub fn ice(&self) -> &IceSettings {
        &self.ice
    }

    pub fn tracks(&self) -> Vec<Arc<FakeTrack>> {
        lock(&self.tracks).clone()
    }

    pub fn remote_answer(&self) -> Option<String> {
        lock(&self.remote).clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Report an ICE state change as the engine would
    pub fn emit_ice(&self, state: IceConnectionState) {
        if let Some(handler) = lock(&self.ice_handler).as_ref() {
            handler(state);
        }
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_track(
        &self,
        codec: CodecDescriptor,
        direction: TrackDirection,
    ) -> Result<Arc<dyn OutboundTrack>, EngineError> {
        if self.behavior.fail_add_track {
            return Err(EngineError::Track("refused".to_string()));
        }
        let track = Arc::new(FakeTrack::new(codec, direction));
        lock(&self.tracks).push(track.clone());
        Ok(track)
    }

    fn on_ice_connection_state_change(&self, handler: IceStateHandler) {
        *lock(&self.ice_handler) = Some(handler);
    }

    async fn gathering_complete_promise(&self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        if !self.behavior.stall_gathering {
            let _ = tx.try_send(());
        }
        *lock(&self.gather_tx) = Some(tx);
        rx
    }

    async fn create_offer(&self) -> Result<String, EngineError> {
        self.offered.store(true, Ordering::SeqCst);
        Ok(FAKE_OFFER.to_string())
    }

    async fn local_description(&self) -> Option<String> {
        self.offered
            .load(Ordering::SeqCst)
            .then(|| FAKE_OFFER.to_string())
    }

    async fn set_remote_answer(&self, sdp: &str) -> Result<(), EngineError> {
        if self.behavior.fail_remote_answer {
            return Err(EngineError::Negotiation("bad answer".to_string()));
        }
        *lock(&self.remote) = Some(sdp.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        lock(&self.gather_tx).take();
        Ok(())
    }
}

pub struct FakeTrack {
    codec: CodecDescriptor,
    direction: TrackDirection,
    rtp: Mutex<Vec<Vec<u8>>>,
    samples: Mutex<Vec<Bytes>>,
}

impl FakeTrack {
    pub fn new(codec: CodecDescriptor, direction: TrackDirection) -> Self {
        Self {
            codec,
            direction,
            rtp: Mutex::new(Vec::new()),
            samples: Mutex::new(Vec::new()),
        }
    }

    pub fn direction(&self) -> TrackDirection {
        self.direction
    }

    pub fn rtp_packets(&self) -> Vec<Vec<u8>> {
        lock(&self.rtp).clone()
    }

    pub fn samples(&self) -> Vec<Bytes> {
        lock(&self.samples).clone()
    }
}

#[async_trait]
impl OutboundTrack for FakeTrack {
    fn codec(&self) -> CodecDescriptor {
        self.codec
    }

    async fn write_rtp(&self, packet: &[u8]) -> Result<(), EngineError> {
        lock(&self.rtp).push(packet.to_vec());
        Ok(())
    }

    async fn write_sample(&self, data: Bytes, _duration: Duration) -> Result<(), EngineError> {
        // Same rule as the engine: no sample payloader for H.265
        if self.codec.codec == CodecKind::H265 {
            return Err(EngineError::UnsupportedCodec(self.codec.codec.mime_type().to_string()));
        }
        lock(&self.samples).push(data);
        Ok(())
    }
}

// ---- signaling gateway ----

/// How the fake gateway answers
#[derive(Debug, Clone)]
pub struct GatewayScript {
    pub fail_connect: bool,
    pub fail_attach: bool,
    pub join_error: Option<String>,
    pub publish_error: Option<String>,
    /// Every keepalive fails with this transport error
    pub keepalive_error: Option<String>,
    /// Answer SDP returned by publish; `None` omits the jsep
    pub answer: Option<String>,
}

impl Default for GatewayScript {
    fn default() -> Self {
        Self {
            fail_connect: false,
            fail_attach: false,
            join_error: None,
            publish_error: None,
            keepalive_error: None,
            answer: Some(FAKE_ANSWER.to_string()),
        }
    }
}

#[derive(Default)]
pub struct GatewayState {
    script: Mutex<GatewayScript>,
    handles: Mutex<Vec<(String, mpsc::UnboundedSender<GatewayEvent>)>>,
    messages: Mutex<Vec<(Value, Option<Jsep>)>>,
    keepalives: AtomicUsize,
    closes: AtomicUsize,
}

impl GatewayState {
    /// Bodies and jseps of every plugin message, in order
    pub fn messages(&self) -> Vec<(Value, Option<Jsep>)> {
        lock(&self.messages).clone()
    }

    pub fn keepalive_count(&self) -> usize {
        self.keepalives.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Whether any handle still has an open event queue
    pub fn has_open_handles(&self) -> bool {
        !lock(&self.handles).is_empty()
    }

    /// Push an event to every attached handle
    pub fn push(&self, event: GatewayEvent) {
        for (_, tx) in lock(&self.handles).iter() {
            let _ = tx.send(event.clone());
        }
    }

    /// Hang up the handle attached for `owner`
    pub fn hangup(&self, owner: &str) {
        for (handle_owner, tx) in lock(&self.handles).iter() {
            if handle_owner == owner {
                let _ = tx.send(GatewayEvent::Hangup {
                    reason: "Close PC".to_string(),
                    subject: owner.to_string(),
                });
            }
        }
    }
}

#[derive(Default)]
pub struct FakeConnector {
    script: Mutex<GatewayScript>,
    gateways: Mutex<Vec<Arc<GatewayState>>>,
    addresses: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_script(&self, script: GatewayScript) {
        *lock(&self.script) = script;
    }

    pub fn last_gateway(&self) -> Option<Arc<GatewayState>> {
        lock(&self.gateways).last().cloned()
    }

    pub fn addresses(&self) -> Vec<String> {
        lock(&self.addresses).clone()
    }
}

#[async_trait]
impl GatewayConnector for FakeConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Gateway>, GatewayError> {
        lock(&self.addresses).push(address.to_string());
        let script = lock(&self.script).clone();
        if script.fail_connect {
            return Err(GatewayError::Connect(format!("{} unreachable", address)));
        }
        let state = Arc::new(GatewayState {
            script: Mutex::new(script),
            ..Default::default()
        });
        lock(&self.gateways).push(state.clone());
        Ok(Arc::new(FakeGateway { state }))
    }
}

struct FakeGateway {
    state: Arc<GatewayState>,
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn create_session(&self) -> Result<Arc<dyn GatewaySession>, GatewayError> {
        Ok(Arc::new(FakeGatewaySession {
            state: self.state.clone(),
        }))
    }

    async fn close(&self) -> Result<(), GatewayError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.handles).clear();
        Ok(())
    }
}

struct FakeGatewaySession {
    state: Arc<GatewayState>,
}

#[async_trait]
impl GatewaySession for FakeGatewaySession {
    fn id(&self) -> u64 {
        1
    }

    async fn attach(&self, _plugin: &str, opaque_id: &str) -> Result<PluginHandle, GatewayError> {
        if lock(&self.state.script).fail_attach {
            return Err(GatewayError::Janus {
                code: 460,
                reason: "No such session".to_string(),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.state.handles).push((opaque_id.to_string(), tx));
        Ok(PluginHandle {
            id: 2,
            owner: opaque_id.to_string(),
            events: rx,
            messenger: Arc::new(FakeMessenger {
                state: self.state.clone(),
            }),
        })
    }

    async fn keep_alive(&self) -> Result<(), GatewayError> {
        self.state.keepalives.fetch_add(1, Ordering::SeqCst);
        match lock(&self.state.script).keepalive_error.clone() {
            Some(error) => Err(GatewayError::Transport(error)),
            None => Ok(()),
        }
    }
}

struct FakeMessenger {
    state: Arc<GatewayState>,
}

#[async_trait]
impl HandleMessenger for FakeMessenger {
    async fn message(&self, body: Value, jsep: Option<Jsep>) -> Result<PluginReply, GatewayError> {
        lock(&self.state.messages).push((body.clone(), jsep));
        let script = lock(&self.state.script).clone();
        let request = body.get("request").and_then(Value::as_str).unwrap_or_default();

        let (error, answer) = match request {
            "join" => (script.join_error, None),
            "publish" => match script.publish_error {
                Some(error) => (Some(error), None),
                None => (None, script.answer),
            },
            _ => (None, None),
        };

        Ok(PluginReply {
            data: serde_json::json!({ "videoroom": request }),
            error,
            jsep: answer.map(|sdp| Jsep {
                kind: "answer".to_string(),
                sdp,
                trickle: None,
            }),
        })
    }
}

// ---- sources ----

/// What new fake sources describe and how they fail
#[derive(Debug, Clone)]
pub struct SourceScript {
    pub codecs: Vec<CodecDescriptor>,
    pub describe_error: Option<SourceError>,
    pub start_error: Option<SourceError>,
}

impl Default for SourceScript {
    fn default() -> Self {
        Self {
            codecs: vec![CodecDescriptor::h264()],
            describe_error: None,
            start_error: None,
        }
    }
}

pub struct FakeSource {
    script: SourceScript,
    context: Mutex<Option<SourceContext>>,
    starts: AtomicUsize,
    closes: AtomicUsize,
}

impl FakeSource {
    pub fn new(script: SourceScript) -> Self {
        Self {
            script,
            context: Mutex::new(None),
            starts: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn context(&self) -> Option<SourceContext> {
        lock(&self.context).clone()
    }

    /// Write one video sample the way the file source does; a failed write
    /// is fatal. Returns whether the write went through.
    pub async fn write_video(&self, data: Bytes) -> bool {
        let Some(ctx) = self.context() else {
            return false;
        };
        let Some(track) = ctx.track(MediaKind::Video) else {
            return false;
        };
        match track.write_sample(data, Duration::from_millis(33)).await {
            Ok(()) => true,
            Err(e) => {
                (ctx.on_fatal)(e.into());
                false
            }
        }
    }

    /// Report a failure the way a forwarder does: consume a retry or go fatal
    pub fn fail(&self, err: SourceError) -> bool {
        let Some(ctx) = self.context() else {
            return false;
        };
        if ctx.retries.try_consume() {
            return true;
        }
        (ctx.on_fatal)(err);
        false
    }
}

#[async_trait]
impl SourceAdapter for FakeSource {
    async fn describe(&self) -> Result<Vec<CodecDescriptor>, SourceError> {
        match &self.script.describe_error {
            Some(err) => Err(err.clone()),
            None => Ok(self.script.codecs.clone()),
        }
    }

    async fn start(&self, ctx: SourceContext) -> Result<(), SourceError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.script.start_error {
            return Err(err.clone());
        }
        *lock(&self.context) = Some(ctx);
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        lock(&self.context).take();
    }
}

#[derive(Default)]
pub struct FakeSourceFactory {
    script: Mutex<SourceScript>,
    created: Mutex<Vec<Arc<FakeSource>>>,
}

impl FakeSourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_script(&self, script: SourceScript) {
        *lock(&self.script) = script;
    }

    pub fn last(&self) -> Option<Arc<FakeSource>> {
        lock(&self.created).last().cloned()
    }

    pub fn created(&self) -> Vec<Arc<FakeSource>> {
        lock(&self.created).clone()
    }
}

impl SourceFactory for FakeSourceFactory {
    fn create(&self, _params: &StartParams) -> Result<Arc<dyn SourceAdapter>, SourceError> {
        let source = Arc::new(FakeSource::new(lock(&self.script).clone()));
        lock(&self.created).push(source.clone());
        Ok(source)
    }
}

// ---- audio devices ----

#[derive(Default)]
pub struct FakeAudioDevices {
    names: Vec<String>,
    captures: Mutex<Vec<Arc<FakeCapture>>>,
    idle_checks: Mutex<Vec<String>>,
}

impl FakeAudioDevices {
    pub fn with_inputs(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn captures(&self) -> Vec<Arc<FakeCapture>> {
        lock(&self.captures).clone()
    }

    pub fn idle_checks(&self) -> Vec<String> {
        lock(&self.idle_checks).clone()
    }
}

#[async_trait]
impl AudioDevices for FakeAudioDevices {
    fn enumerate(&self) -> Vec<DeviceInfo> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, name)| DeviceInfo {
                kind: DeviceKind::AudioInput,
                name: name.clone(),
                id: format!("input-{}", i),
            })
            .collect()
    }

    async fn open_capture(
        &self,
        device: &str,
        track: Arc<dyn OutboundTrack>,
    ) -> Result<Arc<dyn AudioCapture>, DeviceError> {
        if !self.names.iter().any(|n| n == device) {
            return Err(DeviceError::NotFound(device.to_string()));
        }
        let capture = Arc::new(FakeCapture {
            device: device.to_string(),
            track,
            muted: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
        });
        lock(&self.captures).push(capture.clone());
        Ok(capture)
    }

    async fn close_if_idle(&self, name: &str) {
        lock(&self.idle_checks).push(name.to_string());
    }
}

pub struct FakeCapture {
    device: String,
    track: Arc<dyn OutboundTrack>,
    muted: AtomicBool,
    closes: AtomicUsize,
}

impl FakeCapture {
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn track(&self) -> Arc<dyn OutboundTrack> {
        self.track.clone()
    }
}

#[async_trait]
impl AudioCapture for FakeCapture {
    fn device_name(&self) -> &str {
        &self.device
    }

    async fn mute(&self) -> Result<(), DeviceError> {
        self.muted.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unmute(&self) -> Result<(), DeviceError> {
        self.muted.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ---- wiring ----

/// Every fake wired together
pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub gateways: Arc<FakeConnector>,
    pub sources: Arc<FakeSourceFactory>,
    pub devices: Arc<FakeAudioDevices>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_devices(FakeAudioDevices::default())
    }

    pub fn with_devices(devices: FakeAudioDevices) -> Self {
        Self {
            engine: Arc::new(FakeEngine::new()),
            gateways: Arc::new(FakeConnector::new()),
            sources: Arc::new(FakeSourceFactory::new()),
            devices: Arc::new(devices),
        }
    }

    pub fn deps(&self) -> BridgeDeps {
        BridgeDeps {
            peers: self.engine.clone(),
            gateways: self.gateways.clone(),
            sources: self.sources.clone(),
            devices: self.devices.clone(),
        }
    }

    pub fn settings() -> MuxerSettings {
        MuxerSettings {
            source_retry_delay: Duration::from_millis(10),
            ..MuxerSettings::default()
        }
    }

    pub fn service(&self) -> BridgeService {
        BridgeService::new(self.deps(), Self::settings(), "ws://gateway.test:8188")
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Start parameters for a camera publishing into `room` as `id`
pub fn camera_params(room: &str, id: &str) -> StartParams {
    StartParams {
        room: room.to_string(),
        id: id.to_string(),
        display: format!("Cam{}", id),
        url: "rtsp://cam/1".to_string(),
        ..Default::default()
    }
}
