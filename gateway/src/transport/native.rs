//! Native channel: in-process transport for embedded callers.
//!
//! Binds an mpsc pair directly into the router pipeline. Requests get a
//! correlation id and the caller's origin before dispatch, exactly like
//! HTTP traffic, so embedded hosts and tests exercise the same validation
//! path.

use std::sync::Arc;

use devicehub_plugin_api::{CanonicalRequest, CanonicalResponse, ErrorCode};
use tokio::sync::mpsc;
use tracing::debug;

use crate::state::AppState;

pub struct NativeChannel {
    pub requests: mpsc::UnboundedSender<CanonicalRequest>,
    pub responses: mpsc::UnboundedReceiver<CanonicalResponse>,
}

impl NativeChannel {
    /// Bind a channel for a native caller identified by `origin`.
    pub fn bind(state: Arc<AppState>, origin: impl Into<String>) -> Self {
        let origin = origin.into();
        let (requests_tx, mut requests_rx) = mpsc::unbounded_channel::<CanonicalRequest>();
        let (responses_tx, responses_rx) = mpsc::unbounded_channel::<CanonicalResponse>();

        tokio::spawn(async move {
            while let Some(mut request) = requests_rx.recv().await {
                request.correlation_id = state.correlation.next_correlation_id();
                if request.origin.is_none() {
                    request.origin = Some(origin.clone());
                }
                let response = if state.is_running() {
                    state.router.dispatch(request).await
                } else {
                    CanonicalResponse::error_with_default_message(
                        request.correlation_id,
                        ErrorCode::IllegalServerState,
                    )
                };
                if responses_tx.send(response).is_err() {
                    break;
                }
            }
            debug!(%origin, "native channel closed");
        });

        Self {
            requests: requests_tx,
            responses: responses_rx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devicehub_plugin_api::Action;

    use crate::config::GatewayConfig;

    #[tokio::test]
    async fn native_requests_flow_through_the_router() {
        let config = GatewayConfig {
            storage_dir: std::env::temp_dir()
                .join(format!("devicehub-native-{}", uuid::Uuid::new_v4())),
            ..Default::default()
        };
        let state = AppState::new(config).unwrap();
        state.start().await;

        let mut channel = NativeChannel::bind(state, "native-app");
        channel
            .requests
            .send(CanonicalRequest::new(Action::Get, "availability"))
            .unwrap();
        let response = channel.responses.recv().await.unwrap();
        assert!(response.is_success());
        assert_eq!(
            response.payload["running"],
            serde_json::Value::from(true)
        );
    }

    #[tokio::test]
    async fn stopped_gateway_answers_illegal_server_state() {
        let config = GatewayConfig {
            storage_dir: std::env::temp_dir()
                .join(format!("devicehub-native-{}", uuid::Uuid::new_v4())),
            ..Default::default()
        };
        let state = AppState::new(config).unwrap();

        let mut channel = NativeChannel::bind(state, "native-app");
        channel
            .requests
            .send(CanonicalRequest::new(Action::Get, "availability"))
            .unwrap();
        let response = channel.responses.recv().await.unwrap();
        assert_eq!(response.error_code, Some(ErrorCode::IllegalServerState));
    }
}
