//! Session state machine
//!
//! A `Muxer` owns one peer connection, its outbound tracks, the source
//! adapter and the signaling conversation of a single session. `start`
//! walks Idle → Negotiating → Signaling → Live and unwinds everything it
//! acquired on failure. `close` is the only cancellation primitive: it
//! releases resources in an order that unblocks every background task
//! and runs at most once.

use async_trait::async_trait;
use metrics::{counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::{BridgeError, StartFailure, StartStep};
use super::signaling::{ConversationEvents, PublishCapabilities, SignalingConversation};
use crate::config::Config;
use crate::domain::session::{
    CodecDescriptor, MediaKind, PublisherIdentity, RetryBudget, SessionRegistry, SessionState, StartParams,
    TrackDirection,
};
use crate::domain::shared::{IdPolicy, InstanceId, SessionKey};
use crate::infrastructure::audio::{AudioCapture, AudioDevices};
use crate::infrastructure::protocols::janus::GatewayConnector;
use crate::infrastructure::protocols::webrtc::{
    EngineError, IceConnectionState, OutboundTrack, PeerConnection, PeerConnectionFactory,
};
use crate::infrastructure::source::{FatalHandler, SourceAdapter, SourceContext, SourceFactory};

/// Timing and policy knobs of a session
#[derive(Debug, Clone, PartialEq)]
pub struct MuxerSettings {
    pub ice_gather_timeout: Duration,
    pub keepalive_interval: Duration,
    pub mic_release_grace: Duration,
    pub source_retries: u32,
    pub source_retry_delay: Duration,
    pub id_policy: IdPolicy,
}

impl Default for MuxerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl MuxerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ice_gather_timeout: config.session.ice_gather_timeout(),
            keepalive_interval: config.gateway.keepalive_interval(),
            mic_release_grace: config.session.mic_release_grace(),
            source_retries: config.session.source_retries,
            source_retry_delay: config.session.source_retry_delay(),
            id_policy: config.id_policy(),
        }
    }
}

/// External collaborators a session is built from
#[derive(Clone)]
pub struct BridgeDeps {
    pub peers: Arc<dyn PeerConnectionFactory>,
    pub gateways: Arc<dyn GatewayConnector>,
    pub sources: Arc<dyn SourceFactory>,
    pub devices: Arc<dyn AudioDevices>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Requested,
    StartFailed,
    IceDisconnected,
    Hangup,
    SourceFailed,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Requested => "requested",
            CloseReason::StartFailed => "start_failed",
            CloseReason::IceDisconnected => "ice_disconnected",
            CloseReason::Hangup => "hangup",
            CloseReason::SourceFailed => "source_failed",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

#[derive(Default)]
struct Resources {
    signaling: Option<Arc<SignalingConversation>>,
    source: Option<Arc<dyn SourceAdapter>>,
    capture: Option<Arc<dyn AudioCapture>>,
    peer: Option<Arc<dyn PeerConnection>>,
}

struct MuxerInner {
    key: SessionKey,
    instance: InstanceId,
    deps: BridgeDeps,
    settings: MuxerSettings,
    registry: SessionRegistry<Muxer>,
    state: RwLock<SessionState>,
    stopping: AtomicBool,
    hung_up: AtomicBool,
    caps: RwLock<PublishCapabilities>,
    resources: Mutex<Resources>,
    retries: Arc<RetryBudget>,
    mic_timer: Mutex<Option<JoinHandle<()>>>,
}

/// One bridged session; cheap to clone
#[derive(Clone)]
pub struct Muxer {
    inner: Arc<MuxerInner>,
}

impl Muxer {
    pub fn new(
        key: SessionKey,
        instance: InstanceId,
        deps: BridgeDeps,
        settings: MuxerSettings,
        registry: SessionRegistry<Muxer>,
    ) -> Self {
        let retries = Arc::new(RetryBudget::new(settings.source_retries));
        Self {
            inner: Arc::new(MuxerInner {
                key,
                instance,
                deps,
                settings,
                registry,
                state: RwLock::new(SessionState::Idle),
                stopping: AtomicBool::new(false),
                hung_up: AtomicBool::new(false),
                caps: RwLock::new(PublishCapabilities {
                    audio: false,
                    video: false,
                }),
                resources: Mutex::new(Resources::default()),
                retries,
                mic_timer: Mutex::new(None),
            }),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.inner.key
    }

    pub fn instance(&self) -> InstanceId {
        self.inner.instance
    }

    pub async fn state(&self) -> SessionState {
        *self.inner.state.read().await
    }

    /// Media actually published
    pub async fn capabilities(&self) -> PublishCapabilities {
        *self.inner.caps.read().await
    }

    /// Whether the gateway ended this session
    pub fn is_hung_up(&self) -> bool {
        self.inner.hung_up.load(Ordering::SeqCst)
    }

    pub fn retries(&self) -> &RetryBudget {
        &self.inner.retries
    }

    /// Run the start sequence. On failure every acquired resource has been
    /// released by the time this returns.
    pub async fn start(
        &self,
        params: &StartParams,
        identity: &PublisherIdentity,
        gateway: &str,
    ) -> Result<(), StartFailure> {
        info!(session = %self.inner.key, "Starting session");
        match self.run_start(params, identity, gateway).await {
            Ok(()) => {
                info!(session = %self.inner.key, "Session live");
                Ok(())
            }
            Err(failure) => {
                error!(session = %self.inner.key, "Start failed: {}", failure);
                if !self.shutdown(CloseReason::StartFailed).await {
                    // Closed concurrently; drop whatever was acquired since
                    self.release_resources().await;
                }
                Err(failure)
            }
        }
    }

    /// Idempotent close; returns false if a close already ran
    pub async fn close(&self) -> bool {
        self.shutdown(CloseReason::Requested).await
    }

    pub async fn close_with(&self, reason: CloseReason) -> bool {
        self.shutdown(reason).await
    }

    pub async fn mute(&self) -> bool {
        self.toggle_capture(true).await
    }

    pub async fn unmute(&self) -> bool {
        self.toggle_capture(false).await
    }

    async fn run_start(
        &self,
        params: &StartParams,
        identity: &PublisherIdentity,
        gateway: &str,
    ) -> Result<(), StartFailure> {
        let inner = &self.inner;
        self.transition(SessionState::Negotiating).await;

        let peer = inner
            .deps
            .peers
            .create(&params.ice)
            .await
            .map_err(|e| StartFailure::new(StartStep::Negotiate, "Create pc failed", e))?;
        inner.resources.lock().await.peer = Some(peer.clone());

        let source = inner
            .deps
            .sources
            .create(params)
            .map_err(|e| StartFailure::new(StartStep::Source, "Create source failed", e))?;
        inner.resources.lock().await.source = Some(source.clone());

        let codecs = source
            .describe()
            .await
            .map_err(|e| StartFailure::new(StartStep::Source, "No stream found", e))?;
        if codecs.is_empty() {
            return Err(StartFailure::new(
                StartStep::Source,
                "No stream found",
                BridgeError::NoTrackAvailable,
            ));
        }

        let tracks = self.add_tracks(peer.as_ref(), codecs).await?;
        let mut caps = PublishCapabilities {
            audio: tracks.iter().any(|t| t.codec().kind() == MediaKind::Audio),
            video: tracks.iter().any(|t| t.codec().kind() == MediaKind::Video),
        };

        if let Some(mic) = params.microphone() {
            if caps.audio {
                debug!(session = %inner.key, "Source carries audio, microphone {} not attached", mic);
            } else {
                caps.audio = self.attach_microphone(peer.as_ref(), mic).await?;
            }
        }
        if !caps.audio && !caps.video {
            return Err(StartFailure::new(StartStep::Negotiate, "", BridgeError::NoTrackAvailable));
        }
        *inner.caps.write().await = caps;

        self.observe_ice(peer.as_ref());

        let ctx = SourceContext {
            tracks,
            retries: inner.retries.clone(),
            retry_delay: inner.settings.source_retry_delay,
            on_fatal: self.fatal_handler(),
        };
        source
            .start(ctx)
            .await
            .map_err(|e| StartFailure::new(StartStep::Source, "Start source failed", e))?;

        let offer = self.negotiate(peer.as_ref()).await?;

        self.transition(SessionState::Signaling).await;
        let events: Arc<dyn ConversationEvents> = Arc::new(MuxerEvents {
            inner: Arc::downgrade(&self.inner),
        });
        let conversation = Arc::new(
            SignalingConversation::open(
                inner.deps.gateways.as_ref(),
                gateway,
                inner.key.as_str(),
                inner.settings.keepalive_interval,
                events,
            )
            .await?,
        );
        inner.resources.lock().await.signaling = Some(conversation.clone());

        conversation.join(identity, &params.room).await?;
        let answer = conversation.publish(&params.room, offer, caps).await?;
        peer.set_remote_answer(&answer).await.map_err(|e| {
            StartFailure::new(
                StartStep::Signal,
                format!("No remote sdp found {} error", params.room),
                e,
            )
        })?;

        if inner.stopping.load(Ordering::SeqCst) {
            return Err(StartFailure::new(StartStep::Signal, "", BridgeError::Closed));
        }
        self.transition(SessionState::Live).await;
        gauge!("bridge_live_sessions").increment(1.0);
        Ok(())
    }

    async fn add_tracks(
        &self,
        peer: &dyn PeerConnection,
        codecs: Vec<CodecDescriptor>,
    ) -> Result<Vec<Arc<dyn OutboundTrack>>, StartFailure> {
        let mut tracks = Vec::with_capacity(codecs.len());
        for codec in codecs {
            let message = match codec.kind() {
                MediaKind::Video => "Add video track failed",
                MediaKind::Audio => "Add audio track failed",
            };
            let track = peer
                .add_track(codec, TrackDirection::SendOnly)
                .await
                .map_err(|e| StartFailure::new(StartStep::Negotiate, message, e))?;
            debug!(session = %self.inner.key, "Added {} track", codec.codec.mime_type());
            tracks.push(track);
        }
        Ok(tracks)
    }

    /// Add a send-only microphone track; a missing device is not fatal
    async fn attach_microphone(&self, peer: &dyn PeerConnection, selector: &str) -> Result<bool, StartFailure> {
        let inner = &self.inner;
        let Some(device) = inner.deps.devices.resolve(selector) else {
            warn!(session = %inner.key, "Microphone {} not found, publishing without audio", selector);
            return Ok(false);
        };

        let track = peer
            .add_track(CodecDescriptor::pcmu(), TrackDirection::SendOnly)
            .await
            .map_err(|e| StartFailure::new(StartStep::Negotiate, "Add audio track create failed", e))?;
        let capture = inner
            .deps
            .devices
            .open_capture(&device.name, track)
            .await
            .map_err(|e| StartFailure::new(StartStep::Negotiate, "Audio track create failed", e))?;
        inner.resources.lock().await.capture = Some(capture);

        info!(session = %inner.key, "Microphone {} attached", device.name);
        Ok(true)
    }

    /// Create the offer and wait for ICE gathering; returns the local SDP
    async fn negotiate(&self, peer: &dyn PeerConnection) -> Result<String, StartFailure> {
        let mut gathered = peer.gathering_complete_promise().await;
        peer.create_offer()
            .await
            .map_err(|e| StartFailure::new(StartStep::Negotiate, "Create offer failed", e))?;

        if tokio::time::timeout(self.inner.settings.ice_gather_timeout, gathered.recv())
            .await
            .is_err()
        {
            return Err(StartFailure::new(StartStep::Negotiate, "", BridgeError::GatherTimeout));
        }

        peer.local_description().await.ok_or_else(|| {
            StartFailure::new(
                StartStep::Negotiate,
                "Set local sdp failed",
                EngineError::Negotiation("no local description".to_string()),
            )
        })
    }

    fn observe_ice(&self, peer: &dyn PeerConnection) {
        let weak = Arc::downgrade(&self.inner);
        let key = self.inner.key.clone();
        peer.on_ice_connection_state_change(Box::new(move |state| {
            info!(session = %key, "ICE connection state {}", state);
            if matches!(state, IceConnectionState::Disconnected | IceConnectionState::Failed) {
                if let Some(inner) = weak.upgrade() {
                    let muxer = Muxer { inner };
                    tokio::spawn(async move {
                        muxer.shutdown(CloseReason::IceDisconnected).await;
                    });
                }
            }
        }));
    }

    fn fatal_handler(&self) -> FatalHandler {
        let weak = Arc::downgrade(&self.inner);
        Arc::new(move |err| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            warn!(session = %inner.key, "Source failed: {}", err);
            let muxer = Muxer { inner };
            // The forwarder is stopped by the close, so close from elsewhere
            tokio::spawn(async move {
                muxer.shutdown(CloseReason::SourceFailed).await;
            });
        })
    }

    async fn transition(&self, next: SessionState) {
        let mut state = self.inner.state.write().await;
        if state.can_transition_to(next) {
            debug!(session = %self.inner.key, "{} -> {}", *state, next);
            *state = next;
        } else {
            warn!(session = %self.inner.key, "Ignoring transition {} -> {}", *state, next);
        }
    }

    async fn shutdown(&self, reason: CloseReason) -> bool {
        let inner = &self.inner;
        if inner.stopping.swap(true, Ordering::SeqCst) {
            info!(session = %inner.key, "Close already in progress");
            return false;
        }

        let was_live = self.state().await == SessionState::Live;
        self.transition(SessionState::Closing).await;
        self.release_resources().await;
        self.transition(SessionState::Closed).await;

        inner.registry.remove_instance(&inner.key, inner.instance).await;
        if was_live {
            gauge!("bridge_live_sessions").decrement(1.0);
        }
        counter!("bridge_sessions_closed_total", "reason" => reason.as_str()).increment(1);
        info!(session = %inner.key, "Session closed ({})", reason.as_str());
        true
    }

    /// Release in an order that unblocks every task: signaling ends the
    /// listener, the source ends the forwarder.
    async fn release_resources(&self) {
        let inner = &self.inner;
        if let Some(timer) = inner.mic_timer.lock().await.take() {
            timer.abort();
        }
        let taken = std::mem::take(&mut *inner.resources.lock().await);

        if let Some(signaling) = taken.signaling {
            signaling.close().await;
        }
        if let Some(source) = taken.source {
            source.close().await;
        }
        if let Some(capture) = taken.capture {
            self.release_capture(capture).await;
        }
        if let Some(peer) = taken.peer {
            if let Err(e) = peer.close().await {
                warn!(session = %inner.key, "Closing peer connection failed: {}", e);
            }
        }
    }

    async fn release_capture(&self, capture: Arc<dyn AudioCapture>) {
        let name = capture.device_name().to_string();
        capture.close().await;
        self.inner.deps.devices.close_if_idle(&name).await;
        debug!(session = %self.inner.key, "Released microphone {}", name);
    }

    /// The session's microphone, whether attached here or by the source
    async fn current_capture(&self) -> Option<Arc<dyn AudioCapture>> {
        let (capture, source) = {
            let resources = self.inner.resources.lock().await;
            (resources.capture.clone(), resources.source.clone())
        };
        match (capture, source) {
            (Some(capture), _) => Some(capture),
            (None, Some(source)) => source.capture().await,
            (None, None) => None,
        }
    }

    async fn toggle_capture(&self, mute: bool) -> bool {
        let Some(capture) = self.current_capture().await else {
            warn!(session = %self.inner.key, "No microphone to {}", if mute { "mute" } else { "unmute" });
            return false;
        };
        let outcome = if mute {
            capture.mute().await
        } else {
            capture.unmute().await
        };
        match outcome {
            Ok(()) => true,
            Err(e) => {
                warn!(session = %self.inner.key, "Microphone toggle failed: {}", e);
                false
            }
        }
    }

    /// Release the microphone once audio stays inactive for the grace period
    async fn arm_mic_release(&self) {
        if self.current_capture().await.is_none() {
            return;
        }
        let mut timer = self.inner.mic_timer.lock().await;
        if timer.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let grace = self.inner.settings.mic_release_grace;
        debug!(session = %self.inner.key, "Audio inactive, releasing microphone in {:?}", grace);
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(inner) = weak.upgrade() {
                Muxer { inner }.release_microphone().await;
            }
        }));
    }

    async fn cancel_mic_release(&self) {
        if let Some(timer) = self.inner.mic_timer.lock().await.take() {
            if !timer.is_finished() {
                debug!(session = %self.inner.key, "Audio resumed, keeping microphone");
            }
            timer.abort();
        }
    }

    async fn release_microphone(&self) {
        let capture = self.inner.resources.lock().await.capture.take();
        let capture = match capture {
            Some(capture) => Some(capture),
            None => {
                let source = self.inner.resources.lock().await.source.clone();
                match source {
                    Some(source) => source.capture().await,
                    None => None,
                }
            }
        };
        if let Some(capture) = capture {
            info!(session = %self.inner.key, "Audio inactive, releasing microphone {}", capture.device_name());
            self.release_capture(capture).await;
        }
    }
}

/// Routes gateway notifications back to the session without keeping it alive
struct MuxerEvents {
    inner: Weak<MuxerInner>,
}

#[async_trait]
impl ConversationEvents for MuxerEvents {
    async fn on_media(&self, kind: MediaKind, receiving: bool) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let muxer = Muxer { inner };
        match (kind, receiving) {
            (MediaKind::Video, true) => {
                muxer.inner.retries.reset();
                debug!(session = %muxer.inner.key, "Video flowing, retry budget reset");
            }
            (MediaKind::Audio, false) => muxer.arm_mic_release().await,
            (MediaKind::Audio, true) => muxer.cancel_mic_release().await,
            (MediaKind::Video, false) => {}
        }
    }

    async fn on_hangup(&self, reason: String) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        inner.hung_up.store(true, Ordering::SeqCst);
        let muxer = Muxer { inner };
        info!(session = %muxer.inner.key, "Gateway hung up: {}", reason);
        tokio::spawn(async move {
            muxer.shutdown(CloseReason::Hangup).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{
        camera_params, EngineBehavior, FakeAudioDevices, GatewayScript, Harness, SourceScript, FAKE_ANSWER,
        FAKE_OFFER,
    };
    use crate::domain::session::CodecKind;
    use crate::infrastructure::protocols::janus::GatewayEvent;
    use crate::infrastructure::source::{MockSourceAdapter, SourceError};
    use bytes::Bytes;

    const GATEWAY: &str = "ws://gateway.test:8188";

    async fn start_with(
        deps: BridgeDeps,
        params: StartParams,
    ) -> (Muxer, SessionRegistry<Muxer>, Result<(), StartFailure>) {
        let registry = SessionRegistry::new();
        let identity = params.validate(IdPolicy::default()).unwrap();
        let reservation = registry.reserve(identity.key.clone()).await.unwrap();
        let muxer = Muxer::new(
            identity.key.clone(),
            reservation.instance(),
            deps,
            Harness::settings(),
            registry.clone(),
        );
        let result = muxer.start(&params, &identity, GATEWAY).await;
        match result {
            Ok(()) => reservation.commit(muxer.clone()).await.unwrap(),
            Err(_) => reservation.release().await,
        }
        (muxer, registry, result)
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_start_reaches_live() {
        let harness = Harness::new();
        let (muxer, registry, result) = start_with(harness.deps(), camera_params("42", "7")).await;

        assert!(result.is_ok());
        assert_eq!(muxer.state().await, SessionState::Live);
        assert!(registry.exists(&SessionKey::from("42_7")).await);

        let peer = harness.engine.last_peer().unwrap();
        assert_eq!(peer.tracks().len(), 1);
        assert_eq!(peer.tracks()[0].direction(), TrackDirection::SendOnly);
        assert_eq!(peer.remote_answer().as_deref(), Some(FAKE_ANSWER));

        let gateway = harness.gateways.last_gateway().unwrap();
        let messages = gateway.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0["request"], "join");
        assert_eq!(messages[0].0["room"], 42);
        assert_eq!(messages[0].0["id"], 7);
        assert_eq!(messages[0].0["display"], "Cam7");
        assert_eq!(messages[1].0["request"], "publish");
        assert_eq!(messages[1].0["video"], true);
        assert_eq!(messages[1].0["audio"], false);
        assert_eq!(messages[1].1.as_ref().unwrap().sdp, FAKE_OFFER);

        let source = harness.sources.last().unwrap();
        assert_eq!(source.start_count(), 1);
        assert_eq!(source.context().unwrap().tracks.len(), 1);
    }

    #[tokio::test]
    async fn test_close_twice_releases_once() {
        let harness = Harness::new();
        let (muxer, registry, _) = start_with(harness.deps(), camera_params("42", "7")).await;

        assert!(muxer.close().await);
        assert!(!muxer.close().await);

        assert_eq!(muxer.state().await, SessionState::Closed);
        assert_eq!(harness.sources.last().unwrap().close_count(), 1);
        assert_eq!(harness.engine.last_peer().unwrap().close_count(), 1);
        assert_eq!(harness.gateways.last_gateway().unwrap().close_count(), 1);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_close_releases_once() {
        let harness = Harness::new();
        let (muxer, _, _) = start_with(harness.deps(), camera_params("42", "7")).await;

        let (a, b) = tokio::join!(muxer.close(), muxer.close());
        assert!(a ^ b);
        assert_eq!(harness.sources.last().unwrap().close_count(), 1);
        assert_eq!(harness.engine.last_peer().unwrap().close_count(), 1);
    }

    struct SingleSource(std::sync::Mutex<Option<Arc<dyn SourceAdapter>>>);

    impl SourceFactory for SingleSource {
        fn create(&self, _params: &StartParams) -> Result<Arc<dyn SourceAdapter>, SourceError> {
            self.0
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| SourceError::InvalidLocation("used".to_string()))
        }
    }

    #[tokio::test]
    async fn test_join_rejected_closes_source_once() {
        let harness = Harness::new();
        harness.gateways.set_script(GatewayScript {
            join_error: Some("Unauthorized (433)".to_string()),
            ..Default::default()
        });

        let mut source = MockSourceAdapter::new();
        source
            .expect_describe()
            .returning(|| Ok(vec![CodecDescriptor::h264()]));
        source.expect_start().times(1).returning(|_| Ok(()));
        source.expect_close().times(1).returning(|| ());

        let mut deps = harness.deps();
        deps.sources = Arc::new(SingleSource(std::sync::Mutex::new(Some(Arc::new(source)))));

        let (muxer, registry, result) = start_with(deps, camera_params("42", "7")).await;
        let failure = result.unwrap_err();
        assert_eq!(failure.message, "Join room 42 failed");
        assert_eq!(failure.to_string(), "Join room 42 failed: Unauthorized (433)");
        assert_eq!(muxer.state().await, SessionState::Closed);
        assert!(!registry.exists(&SessionKey::from("42_7")).await);
        assert_eq!(harness.engine.last_peer().unwrap().close_count(), 1);
        assert_eq!(harness.gateways.last_gateway().unwrap().close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gather_timeout_fails_start() {
        let harness = Harness::new();
        harness.engine.set_behavior(EngineBehavior {
            stall_gathering: true,
            ..Default::default()
        });

        let (_, registry, result) = start_with(harness.deps(), camera_params("42", "7")).await;
        let failure = result.unwrap_err();
        assert!(failure.to_string().contains("gatherCompletePromise wait"));
        assert!(registry.is_empty().await);
        assert_eq!(harness.engine.last_peer().unwrap().close_count(), 1);
        assert_eq!(harness.sources.last().unwrap().close_count(), 1);
        assert!(harness.gateways.last_gateway().is_none());
    }

    #[tokio::test]
    async fn test_missing_jsep_fails_start() {
        let harness = Harness::new();
        harness.gateways.set_script(GatewayScript {
            answer: None,
            ..Default::default()
        });

        let (_, _, result) = start_with(harness.deps(), camera_params("42", "7")).await;
        let failure = result.unwrap_err();
        assert_eq!(failure.message, "No JSEP found 42 error");
        assert_eq!(failure.cause, BridgeError::MissingJsep);
    }

    #[tokio::test]
    async fn test_create_pc_failure() {
        let harness = Harness::new();
        harness.engine.set_behavior(EngineBehavior {
            fail_create: true,
            ..Default::default()
        });

        let (muxer, _, result) = start_with(harness.deps(), camera_params("42", "7")).await;
        assert_eq!(result.unwrap_err().message, "Create pc failed");
        assert!(harness.sources.last().is_none());
        assert_eq!(muxer.state().await, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_describe_failure() {
        let harness = Harness::new();
        harness.sources.set_script(SourceScript {
            describe_error: Some(SourceError::Connect("refused".to_string())),
            ..Default::default()
        });

        let (_, _, result) = start_with(harness.deps(), camera_params("42", "7")).await;
        let failure = result.unwrap_err();
        assert_eq!(failure.message, "No stream found");
        assert_eq!(failure.step, StartStep::Source);
        assert_eq!(harness.sources.last().unwrap().close_count(), 1);
        assert_eq!(harness.engine.last_peer().unwrap().close_count(), 1);
    }

    #[tokio::test]
    async fn test_ice_disconnect_closes_session() {
        let harness = Harness::new();
        let (muxer, registry, _) = start_with(harness.deps(), camera_params("42", "7")).await;

        let peer = harness.engine.last_peer().unwrap();
        peer.emit_ice(IceConnectionState::Connected);
        settle().await;
        assert_eq!(muxer.state().await, SessionState::Live);

        peer.emit_ice(IceConnectionState::Disconnected);
        settle().await;
        assert_eq!(muxer.state().await, SessionState::Closed);
        assert!(registry.is_empty().await);
        assert_eq!(peer.close_count(), 1);
    }

    #[tokio::test]
    async fn test_matching_hangup_closes_session() {
        let harness = Harness::new();
        let (muxer, registry, _) = start_with(harness.deps(), camera_params("42", "7")).await;
        let gateway = harness.gateways.last_gateway().unwrap();

        gateway.push(GatewayEvent::Hangup {
            reason: "Close PC".to_string(),
            subject: "42_8".to_string(),
        });
        settle().await;
        assert_eq!(muxer.state().await, SessionState::Live);

        gateway.hangup("42_7");
        settle().await;
        assert!(muxer.is_hung_up());
        assert_eq!(muxer.state().await, SessionState::Closed);
        assert!(registry.is_empty().await);
        assert!(!gateway.has_open_handles());
    }

    #[tokio::test]
    async fn test_video_flowing_refills_retries() {
        let harness = Harness::new();
        let (muxer, _, _) = start_with(harness.deps(), camera_params("42", "7")).await;
        let source = harness.sources.last().unwrap();

        assert!(source.fail(SourceError::Read("eof".to_string())));
        assert!(source.fail(SourceError::Read("eof".to_string())));
        assert_eq!(muxer.retries().remaining(), 1);

        harness.gateways.last_gateway().unwrap().push(GatewayEvent::Media {
            kind: MediaKind::Video,
            receiving: true,
        });
        settle().await;
        assert_eq!(muxer.retries().remaining(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_close_session() {
        let harness = Harness::new();
        let (muxer, registry, _) = start_with(harness.deps(), camera_params("42", "7")).await;
        let source = harness.sources.last().unwrap();

        for _ in 0..3 {
            assert!(source.fail(SourceError::Read("eof".to_string())));
        }
        assert!(!source.fail(SourceError::Read("eof".to_string())));
        settle().await;

        assert_eq!(muxer.state().await, SessionState::Closed);
        assert!(registry.is_empty().await);
        assert_eq!(source.close_count(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_codec_write_closes_session() {
        let harness = Harness::new();
        harness.sources.set_script(SourceScript {
            codecs: vec![CodecDescriptor::new(CodecKind::H265, 90_000, 0)],
            ..Default::default()
        });
        let (muxer, registry, result) = start_with(harness.deps(), camera_params("42", "7")).await;
        result.unwrap();
        let source = harness.sources.last().unwrap();

        assert!(!source.write_video(Bytes::from_static(&[0, 0, 0, 1, 0x26, 0x01])).await);
        settle().await;

        assert_eq!(muxer.state().await, SessionState::Closed);
        assert!(registry.is_empty().await);
        assert_eq!(source.close_count(), 1);
        assert_eq!(harness.engine.last_peer().unwrap().close_count(), 1);
    }

    fn mic_params() -> StartParams {
        StartParams {
            mic: Some("USB Mic".to_string()),
            ..camera_params("42", "7")
        }
    }

    #[tokio::test]
    async fn test_microphone_attached_and_muted() {
        let harness = Harness::with_devices(FakeAudioDevices::with_inputs(&["USB Mic"]));
        let (muxer, _, result) = start_with(harness.deps(), mic_params()).await;
        assert!(result.is_ok());

        assert!(muxer.capabilities().await.audio);
        let tracks = harness.engine.last_peer().unwrap().tracks();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[1].codec(), CodecDescriptor::pcmu());

        let capture = harness.devices.captures()[0].clone();
        assert!(muxer.mute().await);
        assert!(capture.is_muted());
        assert!(muxer.unmute().await);
        assert!(!capture.is_muted());

        muxer.close().await;
        assert_eq!(capture.close_count(), 1);
        assert_eq!(harness.devices.idle_checks(), vec!["USB Mic".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_microphone_is_not_fatal() {
        let harness = Harness::new();
        let (muxer, _, result) = start_with(harness.deps(), mic_params()).await;

        assert!(result.is_ok());
        assert!(!muxer.capabilities().await.audio);
        assert!(!muxer.mute().await);
        let messages = harness.gateways.last_gateway().unwrap().messages();
        assert_eq!(messages[1].0["audio"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_audio_releases_microphone_after_grace() {
        let harness = Harness::with_devices(FakeAudioDevices::with_inputs(&["USB Mic"]));
        let (muxer, _, _) = start_with(harness.deps(), mic_params()).await;
        let gateway = harness.gateways.last_gateway().unwrap();
        let capture = harness.devices.captures()[0].clone();

        gateway.push(GatewayEvent::Media {
            kind: MediaKind::Audio,
            receiving: false,
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(capture.close_count(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(capture.close_count(), 1);
        assert_eq!(muxer.state().await, SessionState::Live);
        assert!(!muxer.mute().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumed_audio_keeps_microphone() {
        let harness = Harness::with_devices(FakeAudioDevices::with_inputs(&["USB Mic"]));
        let (_muxer, _, _) = start_with(harness.deps(), mic_params()).await;
        let gateway = harness.gateways.last_gateway().unwrap();
        let capture = harness.devices.captures()[0].clone();

        gateway.push(GatewayEvent::Media {
            kind: MediaKind::Audio,
            receiving: false,
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        gateway.push(GatewayEvent::Media {
            kind: MediaKind::Audio,
            receiving: true,
        });
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(capture.close_count(), 0);
    }

    #[tokio::test]
    async fn test_keepalive_sent_after_attach() {
        let harness = Harness::new();
        let (_muxer, _, _) = start_with(harness.deps(), camera_params("42", "7")).await;
        settle().await;
        assert!(harness.gateways.last_gateway().unwrap().keepalive_count() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_failure_keeps_session_live() {
        let harness = Harness::new();
        harness.gateways.set_script(GatewayScript {
            keepalive_error: Some("socket closed".to_string()),
            ..Default::default()
        });
        let (muxer, registry, result) = start_with(harness.deps(), camera_params("42", "7")).await;
        result.unwrap();
        let gateway = harness.gateways.last_gateway().unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(gateway.keepalive_count(), 1);

        tokio::time::sleep(Harness::settings().keepalive_interval * 4).await;
        assert_eq!(gateway.keepalive_count(), 1);
        assert_eq!(muxer.state().await, SessionState::Live);
        assert!(registry.exists(muxer.key()).await);
        assert_eq!(gateway.close_count(), 0);
    }
}
