//! Availability profile: is the gateway alive.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use devicehub_plugin_api::{Action, CanonicalRequest, CanonicalResponse};
use serde_json::Value;

use crate::config::GatewayConfig;
use crate::errors::GatewayError;
use crate::router::ProfileHandler;

pub struct AvailabilityHandler {
    config: Arc<GatewayConfig>,
    started_at: Instant,
}

impl AvailabilityHandler {
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        Self {
            config,
            started_at: Instant::now(),
        }
    }
}

#[async_trait]
impl ProfileHandler for AvailabilityHandler {
    async fn handle(&self, request: &CanonicalRequest) -> Result<CanonicalResponse, GatewayError> {
        if request.action != Action::Get {
            return Err(GatewayError::NotSupportAction(request.action.to_string()));
        }
        Ok(CanonicalResponse::ok(request.correlation_id)
            .with_field("running", Value::from(true))
            .with_field("name", Value::from(self.config.product_name.clone()))
            .with_field("version", Value::from(env!("CARGO_PKG_VERSION")))
            .with_field(
                "uptime",
                Value::from(self.started_at.elapsed().as_secs()),
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_reports_running() {
        let handler = AvailabilityHandler::new(Arc::new(GatewayConfig::default()));
        let request = CanonicalRequest::new(Action::Get, "availability");
        let response = handler.handle(&request).await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.payload["running"], Value::from(true));
        assert_eq!(response.payload["name"], Value::from("Devicehub"));
    }

    #[tokio::test]
    async fn non_get_is_rejected() {
        let handler = AvailabilityHandler::new(Arc::new(GatewayConfig::default()));
        let request = CanonicalRequest::new(Action::Put, "availability");
        let err = handler.handle(&request).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotSupportAction(_)));
    }
}
