//! Camera push API Integration Tests

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use roomcast::application::testing::{FakeAudioDevices, GatewayScript, Harness};
use roomcast::domain::session::IceSettings;
use roomcast::interface::api::{build_router, AppState};
use serde_json::{json, Value};
use tower::ServiceExt; // For `oneshot`

fn setup(harness: &Harness) -> Router {
    let state = AppState {
        bridge: harness.service(),
        default_ice: IceSettings {
            servers: vec!["stun:stun.test:3478".to_string()],
            ..Default::default()
        },
    };
    let prometheus_handle = PrometheusBuilder::new().build_recorder().handle();
    build_router(state, prometheus_handle)
}

fn form(pairs: &[(&str, &str)]) -> Request<Body> {
    let body = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    Request::builder()
        .method("POST")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

async fn call(app: &Router, uri: &str, pairs: &[(&str, &str)]) -> Value {
    let mut request = form(pairs);
    *request.uri_mut() = uri.parse().unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn configs(value: Value) -> String {
    value.to_string()
}

fn camera() -> Value {
    json!({"id": "7", "room": "42", "display": "Cam7", "url": "rtsp://cam/1"})
}

#[tokio::test]
async fn test_start_and_stop() {
    let harness = Harness::new();
    let app = setup(&harness);

    let body = call(&app, "/camera/push/start", &[("configs", &configs(camera()))]).await;
    assert_eq!(body["state"], 1);
    assert_eq!(body["code"], "Publish camera 7 in Room 42 successfully!");
    assert_eq!(
        harness.engine.last_peer().unwrap().ice().servers,
        vec!["stun:stun.test:3478".to_string()]
    );

    let body = call(&app, "/camera/push/stop", &[("id", "7"), ("room", "42")]).await;
    assert_eq!(body, json!({"state": 1, "code": "Stop ID 7 successfully!"}));

    let body = call(&app, "/camera/push/stop", &[("id", "7"), ("room", "42")]).await;
    assert_eq!(body, json!({"state": -1, "code": "Camera ID 7 not exist!"}));
}

#[tokio::test]
async fn test_start_validation_codes() {
    let harness = Harness::new();
    let app = setup(&harness);

    let body = call(&app, "/camera/push/start", &[]).await;
    assert_eq!(body["state"], -1);
    assert_eq!(body["code"], "Missing mandatory field `configs`!");

    let body = call(&app, "/camera/push/start", &[("configs", "{not json")]).await;
    assert_eq!(body["state"], -2);

    let body = call(&app, "/camera/push/start", &[("configs", &configs(json!({"id": "7"})))]).await;
    assert_eq!(body, json!({"state": -5, "code": "Please input room number"}));

    let body = call(&app, "/camera/push/start", &[("configs", &configs(json!({"room": "42"})))]).await;
    assert_eq!(body, json!({"state": -5, "code": "Please input camera ID"}));

    let body = call(
        &app,
        "/camera/push/start",
        &[("configs", &configs(json!({"room": "42", "id": "7"})))],
    )
    .await;
    assert_eq!(body, json!({"state": -4, "code": "Please input display name"}));

    assert!(harness.engine.peers().is_empty());
}

#[tokio::test]
async fn test_unknown_microphone_rejected_when_devices_listed() {
    let harness = Harness::with_devices(FakeAudioDevices::with_inputs(&["Built-in Microphone"]));
    let app = setup(&harness);

    let mut with_mic = camera();
    with_mic["mic"] = json!("USB Mic");
    let body = call(&app, "/camera/push/start", &[("configs", &configs(with_mic))]).await;
    assert_eq!(body, json!({"state": -7, "code": "Invalidate microphone device name!"}));
    assert!(harness.engine.peers().is_empty());
}

#[tokio::test]
async fn test_microphone_ignored_without_device_listing() {
    let harness = Harness::new();
    let app = setup(&harness);

    let mut with_mic = camera();
    with_mic["mic"] = json!("USB Mic");
    let body = call(&app, "/camera/push/start", &[("configs", &configs(with_mic))]).await;
    assert_eq!(body["state"], 1);

    let peer = harness.engine.last_peer().unwrap();
    assert_eq!(peer.tracks().len(), 1);
    assert!(harness.devices.captures().is_empty());
}

#[tokio::test]
async fn test_duplicate_start() {
    let harness = Harness::new();
    let app = setup(&harness);

    call(&app, "/camera/push/start", &[("configs", &configs(camera()))]).await;
    let body = call(&app, "/camera/push/start", &[("configs", &configs(camera()))]).await;
    assert_eq!(body, json!({"state": -8, "code": "Camera ID 7 is currently publishing!"}));
}

#[tokio::test]
async fn test_gateway_failure_reported() {
    let harness = Harness::new();
    harness.gateways.set_script(GatewayScript {
        publish_error: Some("No such room (426)".to_string()),
        ..Default::default()
    });
    let app = setup(&harness);

    let body = call(&app, "/camera/push/start", &[("configs", &configs(camera()))]).await;
    assert_eq!(body["state"], -9);
    assert_eq!(body["code"], "Publish to room 42 failed: No such room (426)");
}

#[tokio::test]
async fn test_stop_requires_key() {
    let harness = Harness::new();
    let app = setup(&harness);

    let body = call(&app, "/camera/push/stop", &[("id", "7")]).await;
    assert_eq!(body["state"], -5);
}

#[tokio::test]
async fn test_list_and_health() {
    let harness = Harness::new();
    let app = setup(&harness);
    call(&app, "/camera/push/start", &[("configs", &configs(camera()))]).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/camera/push/list").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["data"], json!(["42_7"]));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
