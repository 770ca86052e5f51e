//! Request/response calls over a plugin channel.
//!
//! A call allocates a fresh correlation id, parks a waiter, sends the
//! request, and awaits the response under a deadline. The caller's own
//! correlation id is restored on the returned response so the transport
//! never sees the internal id.

use std::sync::Arc;
use std::time::Duration;

use devicehub_plugin_api::{CanonicalRequest, CanonicalResponse, PluginMessage};
use tracing::warn;

use super::correlation::CorrelationTable;
use crate::errors::GatewayError;
use crate::plugin::RegisteredPlugin;

pub struct PluginCaller {
    correlation: Arc<CorrelationTable>,
    default_timeout: Duration,
}

impl PluginCaller {
    pub fn new(correlation: Arc<CorrelationTable>, default_timeout: Duration) -> Self {
        Self {
            correlation,
            default_timeout,
        }
    }

    pub fn correlation(&self) -> &Arc<CorrelationTable> {
        &self.correlation
    }

    /// Send `request` to `plugin` and await its response under the default
    /// deadline.
    pub async fn call(
        &self,
        plugin: &RegisteredPlugin,
        request: CanonicalRequest,
    ) -> Result<CanonicalResponse, GatewayError> {
        self.call_with_timeout(plugin, request, self.default_timeout)
            .await
    }

    /// Send `request` to `plugin` and await its response under `timeout`.
    ///
    /// On timeout the waiter is removed, so the plugin's late response is
    /// dropped as an orphan instead of leaking.
    pub async fn call_with_timeout(
        &self,
        plugin: &RegisteredPlugin,
        mut request: CanonicalRequest,
        timeout: Duration,
    ) -> Result<CanonicalResponse, GatewayError> {
        let caller_id = request.correlation_id;
        let call_id = self.correlation.next_correlation_id();
        request.correlation_id = call_id;

        let receiver = self.correlation.register(call_id);
        if let Err(err) = plugin.channel.send(PluginMessage::Request(request)).await {
            self.correlation.cancel(call_id);
            return Err(err.into());
        }

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(mut response)) => {
                response.correlation_id = caller_id;
                Ok(response)
            }
            Ok(Err(_)) => {
                // Waiter sender dropped without a response; treat as a dead
                // channel rather than a timeout.
                warn!(
                    plugin_id = %plugin.plugin_id(),
                    correlation_id = call_id,
                    "correlation waiter dropped"
                );
                Err(GatewayError::IllegalDeviceState(
                    "plugin call aborted".into(),
                ))
            }
            Err(_) => {
                self.correlation.cancel(call_id);
                warn!(
                    plugin_id = %plugin.plugin_id(),
                    correlation_id = call_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "plugin response timed out"
                );
                Err(GatewayError::Timeout)
            }
        }
    }
}
