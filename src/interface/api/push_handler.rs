//! Camera push handlers

use axum::{extract::State, Form, Json};
use serde_json::json;
use tracing::{info, warn};

use super::dto::{KeyForm, PushConfigs, PushResponse, StartForm};
use crate::application::BridgeService;
use crate::domain::session::IceSettings;
use crate::domain::shared::SessionKey;

#[derive(Clone)]
pub struct AppState {
    pub bridge: BridgeService,
    /// ICE servers used when a request carries none
    pub default_ice: IceSettings,
}

fn respond(response: PushResponse) -> Json<PushResponse> {
    info!("Response state {} msg {}", response.state, response.code);
    Json(response)
}

/// Start publishing a camera into a room
pub async fn start_push(State(state): State<AppState>, form: Option<Form<StartForm>>) -> Json<PushResponse> {
    let configs = match form.and_then(|Form(f)| f.configs).filter(|c| !c.is_empty()) {
        Some(configs) => configs,
        None => return respond(PushResponse::fail(-1, "Missing mandatory field `configs`!")),
    };
    info!("Configure request, params: {}", configs);

    let configs: PushConfigs = match serde_json::from_str(&configs) {
        Ok(configs) => configs,
        Err(e) => {
            warn!("Decode configs failed: {}", e);
            return respond(PushResponse::fail(-2, "Decode JSON object failed!"));
        }
    };

    if configs.room.is_empty() {
        return respond(PushResponse::fail(-5, "Please input room number"));
    }
    if configs.id.is_empty() {
        return respond(PushResponse::fail(-5, "Please input camera ID"));
    }
    let key = SessionKey::new(&configs.room, &configs.id);
    if state.bridge.exists(&key).await {
        return respond(PushResponse::fail(
            -8,
            format!("Camera ID {} is currently publishing!", configs.id),
        ));
    }
    if configs.display.is_empty() {
        return respond(PushResponse::fail(-4, "Please input display name"));
    }

    let params = configs.into_params(&state.default_ice);
    // Only a backend that lists devices can reject a name; otherwise the
    // session reports the missing microphone and publishes without audio
    if let Some(mic) = params.microphone() {
        let devices = &state.bridge.deps().devices;
        if !devices.enumerate().is_empty() && devices.resolve(mic).is_none() {
            return respond(PushResponse::fail(-7, "Invalidate microphone device name!"));
        }
    }

    let (id, room) = (params.id.clone(), params.room.clone());
    match state.bridge.start(params).await {
        Ok(_) => respond(PushResponse::ok(format!(
            "Publish camera {} in Room {} successfully!",
            id, room
        ))),
        Err(failure) => {
            let message = if failure.message.is_empty() {
                format!("janus error: {}", failure)
            } else {
                failure.to_string()
            };
            respond(PushResponse::fail(-9, message))
        }
    }
}

fn key_from(form: Option<Form<KeyForm>>) -> Option<(String, SessionKey)> {
    let Form(form) = form?;
    let id = form.id.filter(|v| !v.is_empty())?;
    let room = form.room.filter(|v| !v.is_empty())?;
    let key = SessionKey::new(&room, &id);
    Some((id, key))
}

/// Stop a publishing camera
pub async fn stop_push(State(state): State<AppState>, form: Option<Form<KeyForm>>) -> Json<PushResponse> {
    let Some((id, key)) = key_from(form) else {
        return respond(PushResponse::fail(-5, "Please input room number and Camera ID"));
    };

    match state.bridge.stop(&key).await {
        Ok(()) => respond(PushResponse::ok(format!("Stop ID {} successfully!", id))),
        Err(_) => respond(PushResponse::fail(-1, format!("Camera ID {} not exist!", id))),
    }
}

pub async fn mute_push(State(state): State<AppState>, form: Option<Form<KeyForm>>) -> Json<PushResponse> {
    toggle(state, form, true).await
}

pub async fn unmute_push(State(state): State<AppState>, form: Option<Form<KeyForm>>) -> Json<PushResponse> {
    toggle(state, form, false).await
}

async fn toggle(state: AppState, form: Option<Form<KeyForm>>, mute: bool) -> Json<PushResponse> {
    let Some((id, key)) = key_from(form) else {
        return respond(PushResponse::fail(-5, "Please input room number and Camera ID"));
    };

    let outcome = if mute {
        state.bridge.mute(&key).await
    } else {
        state.bridge.unmute(&key).await
    };
    match outcome {
        Ok(done) => {
            let verb = if mute { "Mute" } else { "Unmute" };
            respond(PushResponse::ok(format!("{} ID {}", verb, id)).with_data(json!(done)))
        }
        Err(_) => respond(PushResponse::fail(-1, format!("Camera ID {} not exist!", id))),
    }
}

/// Keys of every publishing session
pub async fn list_push(State(state): State<AppState>) -> Json<PushResponse> {
    let keys: Vec<String> = state
        .bridge
        .list()
        .await
        .into_iter()
        .map(|k| k.as_str().to_string())
        .collect();
    Json(PushResponse::ok(format!("{} sessions", keys.len())).with_data(json!(keys)))
}

pub async fn health_check() -> Json<PushResponse> {
    Json(PushResponse::ok("OK"))
}
