//! WebSocket adapter: event subscription handshake and delivery.
//!
//! Two endpoints. `/{api}/websocket` is the current handshake: the first
//! text frame carries `{"accessToken": ...}` and the event key becomes the
//! caller's origin. `/websocket` is the legacy handshake: the first frame
//! carries `{"sessionKey": ...}` used directly as the event key. Both
//! answer `{"result":0}` on success or a numbered error frame, and both
//! refuse a second session on an occupied key with code 4.
//!
//! Handshake error codes are wire-stable:
//! 1 missing access token, 2 missing origin, 3 invalid access token,
//! 4 already established, 5 unparsable handshake frame.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::http::extract_origin;
use crate::auth::ANONYMOUS_ORIGIN;
use crate::state::AppState;

const WS_ERROR_NOT_FOUND_ACCESS_TOKEN: u32 = 1;
const WS_ERROR_NOT_FOUND_ORIGIN: u32 = 2;
const WS_ERROR_ACCESS_TOKEN_INVALID: u32 = 3;
const WS_ERROR_ALREADY_ESTABLISHED: u32 = 4;
const WS_ERROR_PARSE: u32 = 5;

/// GET /{api}/websocket
pub async fn handshake(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = extract_origin(&headers);
    ws.on_upgrade(move |socket| run_session(state, socket, origin, false))
}

/// GET /websocket (legacy)
pub async fn legacy_handshake(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = extract_origin(&headers);
    ws.on_upgrade(move |socket| run_session(state, socket, origin, true))
}

async fn run_session(
    state: Arc<AppState>,
    socket: WebSocket,
    origin: Option<String>,
    legacy: bool,
) {
    let (mut sink, mut stream) = socket.split();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<String>();

    // Write half: everything leaving this session goes through one queue.
    let writer = tokio::spawn(async move {
        while let Some(frame) = frames_rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut event_key: Option<String> = None;
    while let Some(Ok(message)) = stream.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        if event_key.is_some() {
            // Post-handshake frames are ignored; events only flow outward.
            continue;
        }
        match establish(&state, &frames_tx, origin.as_deref(), legacy, text.as_str()) {
            Ok(key) => {
                info!(event_key = %key, legacy, "event session established");
                event_key = Some(key);
            }
            Err(fatal) => {
                if fatal {
                    break;
                }
            }
        }
    }

    drop(frames_tx);
    let _ = writer.await;
    if let Some(key) = event_key {
        debug!(event_key = %key, "event session closed");
        state.broker.on_subscriber_lost(&key).await;
    }
}

/// Process the handshake frame. `Err(true)` closes the socket, `Err(false)`
/// leaves it open for another attempt.
fn establish(
    state: &AppState,
    frames: &mpsc::UnboundedSender<String>,
    origin: Option<&str>,
    legacy: bool,
    text: &str,
) -> Result<String, bool> {
    let Ok(frame) = serde_json::from_str::<serde_json::Value>(text) else {
        send_error(frames, WS_ERROR_PARSE, "An unknown error occurred in parsing message.");
        return Err(true);
    };

    let event_key = if legacy {
        match frame.get("sessionKey").and_then(|v| v.as_str()) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => {
                send_error(frames, WS_ERROR_PARSE, "sessionKey is not specified.");
                return Err(true);
            }
        }
    } else {
        let access_token = frame.get("accessToken").and_then(|v| v.as_str());
        let Some(access_token) = access_token.filter(|t| !t.is_empty()) else {
            send_error(frames, WS_ERROR_NOT_FOUND_ACCESS_TOKEN, "accessToken is not specified.");
            return Err(false);
        };
        if state.config.require_origin {
            let Some(origin) = origin else {
                send_error(frames, WS_ERROR_NOT_FOUND_ORIGIN, "origin is not specified.");
                return Err(false);
            };
            if state.config.enable_token_check && !token_matches_origin(state, access_token, origin)
            {
                send_error(frames, WS_ERROR_ACCESS_TOKEN_INVALID, "accessToken is invalid.");
                return Err(false);
            }
            origin.to_string()
        } else {
            origin.unwrap_or(ANONYMOUS_ORIGIN).to_string()
        }
    };

    let uri = origin.unwrap_or(ANONYMOUS_ORIGIN).to_string();
    if state
        .sessions
        .register(event_key.clone(), uri, frames.clone())
        .is_err()
    {
        send_error(frames, WS_ERROR_ALREADY_ESTABLISHED, "already established.");
        return Err(true);
    }

    let _ = frames.send(json!({"result": 0}).to_string());
    Ok(event_key)
}

fn token_matches_origin(state: &AppState, access_token: &str, origin: &str) -> bool {
    match state.store.lookup_token(access_token) {
        Ok(Some(token)) => token.origin == origin,
        _ => false,
    }
}

fn send_error(frames: &mpsc::UnboundedSender<String>, code: u32, message: &str) {
    let _ = frames.send(
        json!({"result": 1, "errorCode": code, "errorMessage": message}).to_string(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    fn state(config: GatewayConfig) -> Arc<AppState> {
        let config = GatewayConfig {
            storage_dir: std::env::temp_dir().join(format!("devicehub-ws-{}", uuid::Uuid::new_v4())),
            ..config
        };
        AppState::new(config).unwrap()
    }

    fn recv_json(rx: &mut mpsc::UnboundedReceiver<String>) -> serde_json::Value {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn handshake_with_token_registers_origin_key() {
        let state = state(GatewayConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let key = establish(
            &state,
            &tx,
            Some("http://app"),
            false,
            r#"{"accessToken":"abc"}"#,
        )
        .unwrap();
        assert_eq!(key, "http://app");
        assert_eq!(recv_json(&mut rx)["result"], 0);
        assert!(state.sessions.contains("http://app"));
    }

    #[tokio::test]
    async fn missing_token_is_code_1_and_retryable() {
        let state = state(GatewayConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let err = establish(&state, &tx, Some("http://app"), false, "{}").unwrap_err();
        assert!(!err);
        let frame = recv_json(&mut rx);
        assert_eq!(frame["errorCode"], WS_ERROR_NOT_FOUND_ACCESS_TOKEN);
    }

    #[tokio::test]
    async fn second_handshake_on_same_key_is_code_4() {
        let state = state(GatewayConfig::default());
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        establish(&state, &tx1, Some("http://app"), false, r#"{"accessToken":"a"}"#).unwrap();
        assert_eq!(recv_json(&mut rx1)["result"], 0);

        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let fatal = establish(&state, &tx2, Some("http://app"), false, r#"{"accessToken":"b"}"#)
            .unwrap_err();
        assert!(fatal);
        let frame = recv_json(&mut rx2);
        assert_eq!(frame["errorCode"], WS_ERROR_ALREADY_ESTABLISHED);
        assert_eq!(frame["errorMessage"], "already established.");
    }

    #[tokio::test]
    async fn legacy_handshake_uses_session_key() {
        let state = state(GatewayConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let key = establish(&state, &tx, None, true, r#"{"sessionKey":"session-1"}"#).unwrap();
        assert_eq!(key, "session-1");
        assert_eq!(recv_json(&mut rx)["result"], 0);
    }

    #[tokio::test]
    async fn unparsable_frame_is_code_5_and_fatal() {
        let state = state(GatewayConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fatal = establish(&state, &tx, None, false, "not json").unwrap_err();
        assert!(fatal);
        assert_eq!(recv_json(&mut rx)["errorCode"], WS_ERROR_PARSE);
    }

    #[tokio::test]
    async fn invalid_token_is_code_3_when_checked() {
        let state = state(GatewayConfig {
            require_origin: true,
            enable_token_check: true,
            ..Default::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let err = establish(
            &state,
            &tx,
            Some("http://app"),
            false,
            r#"{"accessToken":"bogus"}"#,
        )
        .unwrap_err();
        assert!(!err);
        assert_eq!(recv_json(&mut rx)["errorCode"], WS_ERROR_ACCESS_TOKEN_INVALID);
    }
}
