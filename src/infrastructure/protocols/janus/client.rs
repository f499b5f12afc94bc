//! Janus WebSocket client

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::message::{self, IncomingFrame};
use super::{
    Gateway, GatewayConnector, GatewayError, GatewayEvent, GatewaySession, HandleMessenger, Jsep,
    PluginHandle, PluginReply,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SUBPROTOCOL: &str = "janus-protocol";

/// Opens Janus gateway connections over WebSocket
#[derive(Debug, Clone)]
pub struct JanusConnector {
    request_timeout: Duration,
}

impl JanusConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Default for JanusConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl GatewayConnector for JanusConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Gateway>, GatewayError> {
        let mut request = address
            .into_client_request()
            .map_err(|e| GatewayError::Connect(e.to_string()))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| GatewayError::Connect(format!("{}: {}", address, e)))?;
        info!("Connected to gateway {}", address);

        let (write, read) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            tx,
            pending: Mutex::new(HashMap::new()),
            routes: Mutex::new(HashMap::new()),
            sessions: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            timeout: self.request_timeout,
        });

        tokio::spawn(sender_task(write, rx));
        tokio::spawn(receiver_task(read, Arc::downgrade(&shared)));

        Ok(Arc::new(JanusGateway { shared }))
    }
}

struct Pending {
    /// `message` requests are acked first and answered by a later event
    skip_ack: bool,
    reply: oneshot::Sender<IncomingFrame>,
}

struct Route {
    owner: String,
    events: mpsc::UnboundedSender<GatewayEvent>,
}

struct Shared {
    tx: mpsc::UnboundedSender<Message>,
    pending: Mutex<HashMap<String, Pending>>,
    routes: Mutex<HashMap<u64, Route>>,
    sessions: Mutex<Vec<u64>>,
    closed: AtomicBool,
    timeout: Duration,
}

impl Shared {
    async fn request(
        &self,
        build: impl FnOnce(&str) -> Value,
        skip_ack: bool,
    ) -> Result<IncomingFrame, GatewayError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GatewayError::Closed);
        }

        let transaction = message::new_transaction();
        let frame = build(&transaction);
        let name = frame["janus"].as_str().unwrap_or("request").to_string();

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(
            transaction.clone(),
            Pending {
                skip_ack,
                reply: reply_tx,
            },
        );

        debug!("-> {} ({})", name, transaction);
        if self.tx.send(Message::Text(frame.to_string())).is_err() {
            self.pending.lock().await.remove(&transaction);
            return Err(GatewayError::Closed);
        }

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(frame)) => frame.into_result(),
            Ok(Err(_)) => Err(GatewayError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&transaction);
                Err(GatewayError::Timeout(name))
            }
        }
    }

    async fn dispatch(&self, frame: IncomingFrame) {
        if let Some(transaction) = frame.transaction.clone() {
            let mut pending = self.pending.lock().await;
            if let Some(entry) = pending.get(&transaction) {
                if entry.skip_ack && frame.is_ack() {
                    return;
                }
                if let Some(entry) = pending.remove(&transaction) {
                    let _ = entry.reply.send(frame);
                }
                return;
            }
        }

        let Some(sender) = frame.sender else {
            debug!("Dropping frame without sender: {}", frame.janus);
            return;
        };

        let routes = self.routes.lock().await;
        match routes.get(&sender) {
            Some(route) => {
                if let Some(event) = frame.into_event(&route.owner) {
                    let _ = route.events.send(event);
                }
            }
            None => debug!("Frame for unknown handle {}", sender),
        }
    }

    /// End every event queue and fail every pending request
    async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.routes.lock().await.clear();
        self.pending.lock().await.clear();
    }
}

async fn sender_task(
    mut write: futures::stream::SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if let Err(e) = write.send(msg).await {
            error!("Failed to send gateway frame: {}", e);
            break;
        }
        if closing {
            break;
        }
    }
    debug!("Gateway sender task terminated");
}

async fn receiver_task(mut read: futures::stream::SplitStream<WsStream>, shared: Weak<Shared>) {
    while let Some(msg) = read.next().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        match msg {
            Ok(Message::Text(text)) => match IncomingFrame::parse(&text) {
                Ok(frame) => shared.dispatch(frame).await,
                Err(e) => warn!("Undecodable gateway frame: {}", e),
            },
            Ok(Message::Close(_)) => {
                info!("Gateway closed the connection");
                break;
            }
            Err(e) => {
                warn!("Gateway connection error: {}", e);
                break;
            }
            _ => {}
        }
    }

    if let Some(shared) = shared.upgrade() {
        shared.shutdown().await;
    }
    debug!("Gateway receiver task terminated");
}

struct JanusGateway {
    shared: Arc<Shared>,
}

#[async_trait]
impl Gateway for JanusGateway {
    async fn create_session(&self) -> Result<Arc<dyn GatewaySession>, GatewayError> {
        let reply = self.shared.request(message::create, false).await?;
        let id = reply.created_id()?;
        self.shared.sessions.lock().await.push(id);
        debug!("Gateway session {} created", id);

        Ok(Arc::new(JanusSession {
            shared: self.shared.clone(),
            id,
        }))
    }

    async fn close(&self) -> Result<(), GatewayError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Ok(());
        }

        let sessions: Vec<u64> = self.shared.sessions.lock().await.drain(..).collect();
        let mut result = Ok(());
        for id in sessions {
            if let Err(e) = self
                .shared
                .request(|t| message::destroy(t, id), false)
                .await
            {
                warn!("Failed to destroy gateway session {}: {}", id, e);
                result = Err(e);
            }
        }

        let _ = self.shared.tx.send(Message::Close(None));
        self.shared.shutdown().await;
        result
    }
}

struct JanusSession {
    shared: Arc<Shared>,
    id: u64,
}

#[async_trait]
impl GatewaySession for JanusSession {
    fn id(&self) -> u64 {
        self.id
    }

    async fn attach(&self, plugin: &str, opaque_id: &str) -> Result<PluginHandle, GatewayError> {
        let session_id = self.id;
        let reply = self
            .shared
            .request(|t| message::attach(t, session_id, plugin, opaque_id), false)
            .await?;
        let id = reply.created_id()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.shared.routes.lock().await.insert(
            id,
            Route {
                owner: opaque_id.to_string(),
                events: events_tx,
            },
        );
        debug!("Attached {} as handle {}", plugin, id);

        Ok(PluginHandle {
            id,
            owner: opaque_id.to_string(),
            events: events_rx,
            messenger: Arc::new(JanusHandle {
                shared: self.shared.clone(),
                session_id,
                handle_id: id,
            }),
        })
    }

    async fn keep_alive(&self) -> Result<(), GatewayError> {
        let session_id = self.id;
        self.shared
            .request(|t| message::keepalive(t, session_id), false)
            .await
            .map(|_| ())
    }
}

struct JanusHandle {
    shared: Arc<Shared>,
    session_id: u64,
    handle_id: u64,
}

#[async_trait]
impl HandleMessenger for JanusHandle {
    async fn message(&self, body: Value, jsep: Option<Jsep>) -> Result<PluginReply, GatewayError> {
        let (session_id, handle_id) = (self.session_id, self.handle_id);
        let reply = self
            .shared
            .request(
                |t| message::message(t, session_id, handle_id, body, jsep.as_ref()),
                true,
            )
            .await?;
        reply.into_plugin_reply()
    }
}
