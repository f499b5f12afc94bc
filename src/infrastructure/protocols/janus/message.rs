//! Janus JSON frames

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{GatewayError, GatewayEvent, Jsep, PluginReply};
use crate::domain::session::MediaKind;

const TRANSACTION_LEN: usize = 12;

pub fn new_transaction() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TRANSACTION_LEN)
        .map(char::from)
        .collect()
}

pub fn create(transaction: &str) -> Value {
    json!({ "janus": "create", "transaction": transaction })
}

pub fn attach(transaction: &str, session_id: u64, plugin: &str, opaque_id: &str) -> Value {
    json!({
        "janus": "attach",
        "transaction": transaction,
        "session_id": session_id,
        "plugin": plugin,
        "opaque_id": opaque_id,
    })
}

pub fn keepalive(transaction: &str, session_id: u64) -> Value {
    json!({ "janus": "keepalive", "transaction": transaction, "session_id": session_id })
}

pub fn message(transaction: &str, session_id: u64, handle_id: u64, body: Value, jsep: Option<&Jsep>) -> Value {
    let mut frame = json!({
        "janus": "message",
        "transaction": transaction,
        "session_id": session_id,
        "handle_id": handle_id,
        "body": body,
    });
    if let Some(jsep) = jsep {
        frame["jsep"] = json!(jsep);
    }
    frame
}

pub fn destroy(transaction: &str, session_id: u64) -> Value {
    json!({ "janus": "destroy", "transaction": transaction, "session_id": session_id })
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginData {
    #[serde(default)]
    pub plugin: String,
    #[serde(default)]
    pub data: Value,
}

/// Any frame the gateway sends
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingFrame {
    pub janus: String,
    pub transaction: Option<String>,
    pub session_id: Option<u64>,
    pub sender: Option<u64>,
    pub data: Option<Value>,
    pub error: Option<ErrorBody>,
    pub plugindata: Option<PluginData>,
    pub jsep: Option<Jsep>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub receiving: Option<bool>,
    pub uplink: Option<bool>,
    pub lost: Option<u64>,
    pub reason: Option<String>,
}

impl IncomingFrame {
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        serde_json::from_str(text).map_err(|e| GatewayError::Protocol(e.to_string()))
    }

    pub fn is_ack(&self) -> bool {
        self.janus == "ack"
    }

    /// Turn a `janus: error` frame into an error, pass others through
    pub fn into_result(self) -> Result<Self, GatewayError> {
        if self.janus == "error" {
            let body = self.error.unwrap_or(ErrorBody {
                code: 0,
                reason: "unknown".to_string(),
            });
            return Err(GatewayError::Janus {
                code: body.code,
                reason: body.reason,
            });
        }
        Ok(self)
    }

    /// Id carried by a `success` reply to create/attach
    pub fn created_id(&self) -> Result<u64, GatewayError> {
        let id = self
            .data
            .as_ref()
            .and_then(|data| data.get("id"))
            .and_then(Value::as_u64);
        match (self.janus.as_str(), id) {
            ("success", Some(id)) => Ok(id),
            _ => Err(GatewayError::Protocol(format!("expected success with id, got {}", self.janus))),
        }
    }

    /// Plugin reply carried by an `event` frame
    pub fn into_plugin_reply(self) -> Result<PluginReply, GatewayError> {
        if self.janus != "event" && self.janus != "success" {
            return Err(GatewayError::Protocol(format!("expected event, got {}", self.janus)));
        }
        let data = self.plugindata.map(|p| p.data).unwrap_or(Value::Null);
        let error = plugin_error(&data);
        Ok(PluginReply {
            data,
            error,
            jsep: self.jsep,
        })
    }

    /// Decode an unsolicited frame; `subject` is the owner of the target handle
    pub fn into_event(self, subject: &str) -> Option<GatewayEvent> {
        match self.janus.as_str() {
            "webrtcup" => Some(GatewayEvent::WebRtcUp),
            "media" => {
                let kind = match self.media_type.as_deref() {
                    Some("audio") => MediaKind::Audio,
                    Some("video") => MediaKind::Video,
                    _ => return None,
                };
                Some(GatewayEvent::Media {
                    kind,
                    receiving: self.receiving.unwrap_or(false),
                })
            }
            "slowlink" => Some(GatewayEvent::SlowLink {
                uplink: self.uplink.unwrap_or(false),
                lost: self.lost.unwrap_or(0),
            }),
            "hangup" => Some(GatewayEvent::Hangup {
                reason: self.reason.unwrap_or_default(),
                subject: subject.to_string(),
            }),
            "event" => Some(GatewayEvent::Event {
                data: self.plugindata.map(|p| p.data).unwrap_or(Value::Null),
            }),
            _ => None,
        }
    }
}

/// Plugin-level error: `error` text, or an `error_code` without text
fn plugin_error(data: &Value) -> Option<String> {
    if let Some(error) = data.get("error").and_then(Value::as_str) {
        return Some(match data.get("error_code").and_then(Value::as_i64) {
            Some(code) => format!("{} ({})", error, code),
            None => error.to_string(),
        });
    }
    data.get("error_code")
        .and_then(Value::as_i64)
        .map(|code| format!("error code {}", code))
}
