//! Shared fixtures for the integration suite.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use devicehub_gateway::{routes, state::AppState, GatewayConfig};
use devicehub_plugin_api::{
    names_match, params, CanonicalRequest, CanonicalResponse, PluginDescriptor, PluginMessage,
    ATTRIBUTE_CREATE_CLIENT, ATTRIBUTE_REQUEST_ACCESS_TOKEN, PROFILE_AUTHORIZATION,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::util::ServiceExt;

/// Minimal configuration with an isolated storage directory.
pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        storage_dir: std::env::temp_dir().join(format!("devicehub-it-{}", uuid::Uuid::new_v4())),
        ..Default::default()
    }
}

/// Build a started gateway and its route table.
pub async fn spawn_app(config: GatewayConfig) -> (Router, Arc<AppState>) {
    let state = AppState::new(config).unwrap();
    state.start().await;
    (routes::create_router(state.clone()), state)
}

pub fn descriptor(plugin_id: &str, profiles: &[&str]) -> PluginDescriptor {
    PluginDescriptor {
        plugin_id: plugin_id.to_string(),
        name: format!("{plugin_id} plugin"),
        address: format!("native:{plugin_id}"),
        profiles: profiles.iter().map(|p| p.to_string()).collect(),
    }
}

/// Register a plugin whose requests are answered by `script`. A `None`
/// answer swallows the request. Returns the plugin's inbox so tests can
/// push events through it.
pub fn spawn_scripted_plugin<F>(
    state: &Arc<AppState>,
    plugin_id: &str,
    profiles: &[&str],
    mut script: F,
) -> mpsc::UnboundedSender<PluginMessage>
where
    F: FnMut(CanonicalRequest) -> Option<CanonicalResponse> + Send + 'static,
{
    let mut endpoint = state
        .register_plugin(descriptor(plugin_id, profiles))
        .unwrap();
    let inbox = endpoint.inbox.clone();
    let events = endpoint.inbox.clone();
    tokio::spawn(async move {
        while let Some(message) = endpoint.outbound.recv().await {
            if let PluginMessage::Request(request) = message {
                if let Some(response) = script(request) {
                    if inbox.send(PluginMessage::Response(response)).is_err() {
                        break;
                    }
                }
            }
        }
    });
    events
}

/// Standard answers for the gateway's token handshake against a plugin.
pub fn answer_handshake(request: &CanonicalRequest) -> Option<CanonicalResponse> {
    if !names_match(&request.profile, PROFILE_AUTHORIZATION) {
        return None;
    }
    match request.attribute.as_deref() {
        Some(ATTRIBUTE_CREATE_CLIENT) => Some(
            CanonicalResponse::ok(request.correlation_id)
                .with_field(params::CLIENT_ID, Value::from("client-1")),
        ),
        Some(ATTRIBUTE_REQUEST_ACCESS_TOKEN) => Some(
            CanonicalResponse::ok(request.correlation_id)
                .with_field(params::ACCESS_TOKEN, Value::from("plugin-token")),
        ),
        _ => None,
    }
}

/// Fire a request through the app and decode the JSON envelope.
pub async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 10 * 1024 * 1024)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn get_with_origin(uri: &str, origin: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("origin", origin)
        .body(Body::empty())
        .unwrap()
}
