//! Service discovery profile: aggregated fan-out across all plugins.
//!
//! GET asks every registered plugin for its services concurrently, each
//! under its own bounded deadline; a slow or failing plugin costs its own
//! entries, never the whole response. Service ids come back plugin-local and
//! are qualified before aggregation. PUT/DELETE on `onservicechange`
//! subscribe/unsubscribe the caller with every plugin, best effort.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use devicehub_plugin_api::{
    names_match, params, Action, CanonicalRequest, CanonicalResponse,
    ATTRIBUTE_ON_SERVICE_CHANGE, PROFILE_SERVICE_DISCOVERY,
};
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::GatewayError;
use crate::plugin::{PluginRegistry, RegisteredPlugin};
use crate::router::{PluginCaller, ProfileHandler, Provisioner};

pub struct ServiceDiscoveryHandler {
    registry: Arc<PluginRegistry>,
    caller: Arc<PluginCaller>,
    provisioner: Arc<Provisioner>,
    per_plugin_timeout: Duration,
}

impl ServiceDiscoveryHandler {
    pub fn new(
        registry: Arc<PluginRegistry>,
        caller: Arc<PluginCaller>,
        provisioner: Arc<Provisioner>,
        per_plugin_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            caller,
            provisioner,
            per_plugin_timeout,
        }
    }

    /// One plugin's contribution to the aggregate, already qualified.
    async fn collect_from(&self, plugin: &RegisteredPlugin) -> Vec<Value> {
        let token = match self.provisioner.ensure_token(plugin, plugin.plugin_id()).await {
            Ok(token) => token,
            Err(err) => {
                warn!(plugin_id = %plugin.plugin_id(), %err, "discovery provisioning failed");
                return Vec::new();
            }
        };
        let mut request = CanonicalRequest::new(Action::Get, PROFILE_SERVICE_DISCOVERY);
        request.access_token = token;
        let response = match self
            .caller
            .call_with_timeout(plugin, request, self.per_plugin_timeout)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                debug!(plugin_id = %plugin.plugin_id(), %err, "plugin skipped in discovery");
                return Vec::new();
            }
        };
        if !response.is_success() {
            debug!(plugin_id = %plugin.plugin_id(), code = ?response.error_code,
                "plugin answered discovery with an error");
            return Vec::new();
        }
        let Some(Value::Array(services)) = response.payload.get(params::SERVICES).cloned() else {
            return Vec::new();
        };
        services
            .into_iter()
            .map(|mut service| {
                if let Value::Object(fields) = &mut service {
                    if let Some(Value::String(local_id)) = fields.get("id") {
                        let qualified = PluginRegistry::qualify(local_id, plugin.plugin_id());
                        fields.insert("id".into(), Value::from(qualified));
                    }
                    fields
                        .entry("config")
                        .or_insert_with(|| Value::from(plugin.descriptor.name.clone()));
                }
                service
            })
            .collect()
    }

    async fn aggregate(&self, request: &CanonicalRequest) -> CanonicalResponse {
        let plugins = self.registry.all();
        let collected = join_all(plugins.iter().map(|plugin| self.collect_from(plugin))).await;
        let services: Vec<Value> = collected.into_iter().flatten().collect();
        CanonicalResponse::ok(request.correlation_id)
            .with_field(params::SERVICES, Value::Array(services))
    }

    /// Forward an onservicechange (un)subscription to every plugin with the
    /// plugin-local session key. Failures are logged and ignored.
    async fn forward_subscription(&self, request: &CanonicalRequest) -> CanonicalResponse {
        let event_key = request
            .session_key
            .clone()
            .or_else(|| request.origin.clone());
        for plugin in self.registry.all() {
            let token = match self.provisioner.ensure_token(&plugin, plugin.plugin_id()).await {
                Ok(token) => token,
                Err(err) => {
                    warn!(plugin_id = %plugin.plugin_id(), %err, "subscription provisioning failed");
                    continue;
                }
            };
            let mut outbound = CanonicalRequest::new(request.action, PROFILE_SERVICE_DISCOVERY)
                .with_attribute(ATTRIBUTE_ON_SERVICE_CHANGE);
            outbound.access_token = token;
            outbound.session_key = event_key
                .as_deref()
                .map(|key| format!("{key}.{}", plugin.plugin_id()));
            if let Err(err) = self
                .caller
                .call_with_timeout(&plugin, outbound, self.per_plugin_timeout)
                .await
            {
                debug!(plugin_id = %plugin.plugin_id(), %err, "subscription forward failed");
            }
        }
        CanonicalResponse::ok(request.correlation_id)
    }
}

#[async_trait]
impl ProfileHandler for ServiceDiscoveryHandler {
    async fn handle(&self, request: &CanonicalRequest) -> Result<CanonicalResponse, GatewayError> {
        match (request.action, request.attribute.as_deref()) {
            (Action::Get, None) => Ok(self.aggregate(request).await),
            (Action::Put | Action::Delete, Some(attr))
                if names_match(attr, ATTRIBUTE_ON_SERVICE_CHANGE) =>
            {
                Ok(self.forward_subscription(request).await)
            }
            (_, Some(_)) => Err(GatewayError::UnknownAttribute),
            (action, None) => Err(GatewayError::NotSupportAction(action.to_string())),
        }
    }
}
