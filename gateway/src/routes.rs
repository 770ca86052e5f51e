//! Route table for the gateway server.
//!
//! Only paths under the configured api name are routed; anything else gets
//! axum's 404, which is how a wrong api segment is rejected. The WebSocket
//! endpoints are registered as static paths so they win over the API
//! wildcard.

use std::sync::Arc;

use axum::routing::{any, get};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::transport::{http, ws};

pub fn create_router(state: Arc<AppState>) -> Router {
    let api = state.config.api_name.clone();
    Router::new()
        .route(&format!("/{api}/websocket"), get(ws::handshake))
        .route("/websocket", get(ws::legacy_handshake))
        .route(&format!("/{api}"), any(http::handle))
        .route(&format!("/{api}/{{*path}}"), any(http::handle))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::config::GatewayConfig;

    async fn app() -> Router {
        let config = GatewayConfig {
            storage_dir: std::env::temp_dir()
                .join(format!("devicehub-routes-{}", uuid::Uuid::new_v4())),
            ..Default::default()
        };
        let state = AppState::new(config).unwrap();
        state.start().await;
        create_router(state)
    }

    #[tokio::test]
    async fn unknown_api_name_is_not_found() {
        let app = app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/otherapi/availability")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn availability_is_served_under_the_api_name() {
        let app = app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/gotapi/availability")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["result"], 0);
        assert_eq!(json["running"], true);
    }
}
