//! Signaling conversation with the gateway
//!
//! Connect, create a gateway session, attach the videoroom plugin, keep the
//! session alive, listen for pushed events, then join the room and publish
//! the local offer. The reply to `publish` carries the answer SDP.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::{BridgeError, StartFailure, StartStep};
use crate::domain::session::{MediaKind, PublisherIdentity};
use crate::infrastructure::protocols::janus::{
    Gateway, GatewayConnector, GatewayEvent, GatewaySession, HandleMessenger, Jsep, VIDEOROOM_PLUGIN,
};

/// Reactions to gateway notifications that concern the session
#[async_trait]
pub trait ConversationEvents: Send + Sync {
    async fn on_media(&self, kind: MediaKind, receiving: bool);

    /// The gateway hung up the handle owned by this session
    async fn on_hangup(&self, reason: String);
}

/// Media the publisher actually sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishCapabilities {
    pub audio: bool,
    pub video: bool,
}

pub struct SignalingConversation {
    gateway: Arc<dyn Gateway>,
    session: Arc<dyn GatewaySession>,
    messenger: Arc<dyn HandleMessenger>,
    handle_id: u64,
    owner: String,
    keepalive: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SignalingConversation {
    /// Connect, create the session, attach the plugin and start the
    /// keepalive and listener tasks. A failure after connecting closes the
    /// gateway before returning.
    pub async fn open(
        connector: &dyn GatewayConnector,
        address: &str,
        owner: &str,
        keepalive_interval: Duration,
        events: Arc<dyn ConversationEvents>,
    ) -> Result<Self, StartFailure> {
        let gateway = connector
            .connect(address)
            .await
            .map_err(|e| StartFailure::new(StartStep::Signal, "Connect janus server error", e))?;

        let session = match gateway.create_session().await {
            Ok(session) => session,
            Err(e) => {
                if let Err(close_err) = gateway.close().await {
                    warn!("Closing gateway after failed open: {}", close_err);
                }
                return Err(StartFailure::new(StartStep::Signal, "Create janus session error", e));
            }
        };

        let handle = match session.attach(VIDEOROOM_PLUGIN, owner).await {
            Ok(handle) => handle,
            Err(e) => {
                if let Err(close_err) = gateway.close().await {
                    warn!("Closing gateway after failed open: {}", close_err);
                }
                return Err(StartFailure::new(StartStep::Signal, "Attach janus session error", e));
            }
        };
        info!(session = session.id(), handle_id = handle.id, "Attached {}", VIDEOROOM_PLUGIN);

        let keepalive = tokio::spawn(keep_alive(session.clone(), keepalive_interval));
        let listener = tokio::spawn(listen(handle.id, handle.owner.clone(), handle.events, events));

        Ok(Self {
            gateway,
            session,
            messenger: handle.messenger,
            handle_id: handle.id,
            owner: handle.owner,
            keepalive: Mutex::new(Some(keepalive)),
            listener: Mutex::new(Some(listener)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn handle_id(&self) -> u64 {
        self.handle_id
    }

    pub fn session_id(&self) -> u64 {
        self.session.id()
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Join the room as a publisher
    pub async fn join(&self, identity: &PublisherIdentity, room_label: &str) -> Result<(), StartFailure> {
        let message = format!("Join room {} failed", room_label);
        let body = json!({
            "request": "join",
            "ptype": "publisher",
            "room": identity.room.value(),
            "id": identity.publisher.value(),
            "display": identity.display,
            "pin": identity.pin,
        });

        let reply = self
            .messenger
            .message(body, None)
            .await
            .map_err(|e| StartFailure::new(StartStep::Signal, message.clone(), e))?;
        if let Some(error) = reply.error {
            return Err(StartFailure::new(StartStep::Signal, message, BridgeError::Rejected(error)));
        }

        debug!(handle_id = self.handle_id, "Joined room {}", identity.room);
        Ok(())
    }

    /// Publish the offer; returns the answer SDP
    pub async fn publish(
        &self,
        room_label: &str,
        offer: String,
        caps: PublishCapabilities,
    ) -> Result<String, StartFailure> {
        let message = format!("Publish to room {} failed", room_label);
        let body = json!({
            "request": "publish",
            "audio": caps.audio,
            "video": caps.video,
            "data": false,
        });

        let reply = self
            .messenger
            .message(body, Some(Jsep::offer(offer)))
            .await
            .map_err(|e| StartFailure::new(StartStep::Signal, message.clone(), e))?;
        if let Some(error) = reply.error {
            return Err(StartFailure::new(StartStep::Signal, message, BridgeError::Rejected(error)));
        }

        match reply.jsep {
            Some(jsep) => Ok(jsep.sdp),
            None => Err(StartFailure::new(
                StartStep::Signal,
                format!("No JSEP found {} error", room_label),
                BridgeError::MissingJsep,
            )),
        }
    }

    /// Stop keepalives and close the gateway, which ends the listener.
    /// Repeated calls do nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.keepalive.lock().await.take() {
            task.abort();
        }
        if let Err(e) = self.gateway.close().await {
            warn!(handle_id = self.handle_id, "Closing gateway failed: {}", e);
        }
        // Listener ends once the event queue closes
        self.listener.lock().await.take();
        debug!(handle_id = self.handle_id, "Signaling closed");
    }
}

async fn keep_alive(session: Arc<dyn GatewaySession>, interval: Duration) {
    loop {
        if let Err(e) = session.keep_alive().await {
            warn!(session = session.id(), "Can not send keep-alive msg to janus: {}", e);
            return;
        }
        tokio::time::sleep(interval).await;
    }
}

async fn listen(
    handle_id: u64,
    owner: String,
    mut queue: mpsc::UnboundedReceiver<GatewayEvent>,
    events: Arc<dyn ConversationEvents>,
) {
    while let Some(event) = queue.recv().await {
        match event {
            GatewayEvent::SlowLink { uplink, lost } => {
                warn!(handle_id, uplink, lost, "Slow link");
            }
            GatewayEvent::Media { kind, receiving } => {
                info!(handle_id, "Media {} receiving {}", kind, receiving);
                events.on_media(kind, receiving).await;
            }
            GatewayEvent::WebRtcUp => {
                info!(handle_id, "WebRTC up");
            }
            GatewayEvent::Hangup { reason, subject } => {
                if subject == owner {
                    info!(handle_id, "Hangup: {}", reason);
                    events.on_hangup(reason).await;
                    break;
                }
                debug!(handle_id, "Ignoring hangup for {}", subject);
            }
            GatewayEvent::Event { data } => {
                debug!(handle_id, "Event {}", data);
            }
        }
    }
    debug!(handle_id, "Event listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{FakeConnector, GatewayScript, FAKE_ANSWER};
    use crate::domain::session::StartParams;
    use crate::domain::shared::IdPolicy;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        media: StdMutex<Vec<(MediaKind, bool)>>,
        hangups: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ConversationEvents for Recorder {
        async fn on_media(&self, kind: MediaKind, receiving: bool) {
            self.media.lock().unwrap().push((kind, receiving));
        }

        async fn on_hangup(&self, reason: String) {
            self.hangups.lock().unwrap().push(reason);
        }
    }

    fn identity() -> PublisherIdentity {
        StartParams {
            room: "42".to_string(),
            id: "7".to_string(),
            display: "Cam7".to_string(),
            pin: "secret".to_string(),
            ..Default::default()
        }
        .validate(IdPolicy::default())
        .unwrap()
    }

    async fn open(connector: &FakeConnector, recorder: Arc<Recorder>) -> Result<SignalingConversation, StartFailure> {
        SignalingConversation::open(connector, "ws://gw", "42_7", Duration::from_secs(30), recorder).await
    }

    #[tokio::test]
    async fn test_join_and_publish() {
        let connector = FakeConnector::new();
        let conversation = open(&connector, Arc::new(Recorder::default())).await.unwrap();
        assert_eq!(conversation.owner(), "42_7");

        conversation.join(&identity(), "42").await.unwrap();
        let answer = conversation
            .publish("42", "offer-sdp".to_string(), PublishCapabilities { audio: true, video: true })
            .await
            .unwrap();
        assert_eq!(answer, FAKE_ANSWER);

        let messages = connector.last_gateway().unwrap().messages();
        assert_eq!(messages[0].0["ptype"], "publisher");
        assert_eq!(messages[0].0["pin"], "secret");
        assert!(messages[0].1.is_none());
        assert_eq!(messages[1].0["audio"], true);
        let jsep = messages[1].1.clone().unwrap();
        assert_eq!(jsep.kind, "offer");
        assert_eq!(jsep.trickle, Some(false));
    }

    #[tokio::test]
    async fn test_connect_failure_message() {
        let connector = FakeConnector::new();
        connector.set_script(GatewayScript {
            fail_connect: true,
            ..Default::default()
        });
        let failure = open(&connector, Arc::new(Recorder::default())).await.err().unwrap();
        assert_eq!(failure.message, "Connect janus server error");
        assert_eq!(failure.step, StartStep::Signal);
    }

    #[tokio::test]
    async fn test_attach_failure_closes_gateway() {
        let connector = FakeConnector::new();
        connector.set_script(GatewayScript {
            fail_attach: true,
            ..Default::default()
        });
        let failure = open(&connector, Arc::new(Recorder::default())).await.err().unwrap();
        assert_eq!(failure.message, "Attach janus session error");

        let gateway = connector.last_gateway().unwrap();
        assert_eq!(gateway.close_count(), 1);
        assert_eq!(gateway.keepalive_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_error_field() {
        let connector = FakeConnector::new();
        connector.set_script(GatewayScript {
            publish_error: Some("No such room (426)".to_string()),
            ..Default::default()
        });
        let conversation = open(&connector, Arc::new(Recorder::default())).await.unwrap();
        let failure = conversation
            .publish("42", "offer".to_string(), PublishCapabilities { audio: false, video: true })
            .await
            .unwrap_err();
        assert_eq!(failure.to_string(), "Publish to room 42 failed: No such room (426)");
    }

    #[tokio::test]
    async fn test_listener_dispatches_events() {
        let connector = FakeConnector::new();
        let recorder = Arc::new(Recorder::default());
        let conversation = open(&connector, recorder.clone()).await.unwrap();
        let gateway = connector.last_gateway().unwrap();

        gateway.push(GatewayEvent::SlowLink { uplink: true, lost: 12 });
        gateway.push(GatewayEvent::Media {
            kind: MediaKind::Audio,
            receiving: false,
        });
        gateway.push(GatewayEvent::WebRtcUp);
        gateway.push(GatewayEvent::Hangup {
            reason: "other".to_string(),
            subject: "1_1".to_string(),
        });
        gateway.hangup("42_7");
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*recorder.media.lock().unwrap(), vec![(MediaKind::Audio, false)]);
        assert_eq!(*recorder.hangups.lock().unwrap(), vec!["Close PC".to_string()]);
        conversation.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let connector = FakeConnector::new();
        let conversation = open(&connector, Arc::new(Recorder::default())).await.unwrap();
        conversation.close().await;
        conversation.close().await;

        let gateway = connector.last_gateway().unwrap();
        assert_eq!(gateway.close_count(), 1);
        assert!(!gateway.has_open_handles());
    }
}
