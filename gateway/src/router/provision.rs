//! Plugin-side token provisioning.
//!
//! The gateway is itself a client of every plugin: before delivering a
//! request for a service it has never talked to, it runs the two-step
//! handshake against the plugin's authorization profile (createClient, then
//! requestAccessToken scoped to the plugin's declared profiles) and persists
//! the result keyed by the qualified service id. Subsequent requests reuse
//! the stored token; an expired token is dropped and re-provisioned. A
//! plugin that answers createClient with NotSupportProfile does not require
//! tokens and is remembered as such.

use std::sync::Arc;

use dashmap::DashSet;
use devicehub_plugin_api::{
    params, Action, CanonicalRequest, ErrorCode, ATTRIBUTE_CREATE_CLIENT,
    ATTRIBUTE_REQUEST_ACCESS_TOKEN, PROFILE_AUTHORIZATION,
};
use tracing::{debug, info};

use super::caller::PluginCaller;
use crate::auth::LocalAuthStore;
use crate::errors::GatewayError;
use crate::plugin::RegisteredPlugin;

/// Package name the gateway identifies itself with when creating clients.
const GATEWAY_PACKAGE: &str = "devicehub";

pub struct Provisioner {
    store: Arc<LocalAuthStore>,
    caller: Arc<PluginCaller>,
    /// Plugin ids known to not require access tokens.
    no_auth: DashSet<String>,
}

impl Provisioner {
    pub fn new(store: Arc<LocalAuthStore>, caller: Arc<PluginCaller>) -> Self {
        Self {
            store,
            caller,
            no_auth: DashSet::new(),
        }
    }

    /// Return a plugin access token for `auth_key` (a qualified service id,
    /// or a bare plugin id for service-less requests), provisioning one if
    /// none is stored. `None` means the plugin does not use tokens.
    pub async fn ensure_token(
        &self,
        plugin: &RegisteredPlugin,
        auth_key: &str,
    ) -> Result<Option<String>, GatewayError> {
        if self.no_auth.contains(plugin.plugin_id()) {
            return Ok(None);
        }
        if let Some(token) = self.store.get_token(auth_key)? {
            return Ok(Some(token));
        }

        let client_id = match self.store.get_client(auth_key)? {
            Some(record) => record.client_id,
            None => match self.create_client(plugin, auth_key).await? {
                Some(client_id) => client_id,
                None => return Ok(None),
            },
        };

        let scope = plugin.descriptor.profiles.join(",");
        let request = CanonicalRequest::new(Action::Get, PROFILE_AUTHORIZATION)
            .with_attribute(ATTRIBUTE_REQUEST_ACCESS_TOKEN)
            .with_parameter(params::CLIENT_ID, client_id)
            .with_parameter(params::SCOPE, scope);
        let response = self.caller.call(plugin, request).await?;
        if !response.is_success() {
            return Err(GatewayError::IllegalDeviceState(format!(
                "plugin {} refused to issue an access token",
                plugin.plugin_id()
            )));
        }
        let token = response
            .field_str(params::ACCESS_TOKEN)
            .ok_or_else(|| {
                GatewayError::IllegalDeviceState(format!(
                    "plugin {} returned no access token",
                    plugin.plugin_id()
                ))
            })?
            .to_string();
        self.store.set_token(auth_key, &token)?;
        info!(plugin_id = %plugin.plugin_id(), %auth_key, "plugin access token provisioned");
        Ok(Some(token))
    }

    /// Drop the stored token for `auth_key` so the next request
    /// re-provisions. Used when a plugin reports the token expired.
    pub fn invalidate_token(&self, auth_key: &str) -> Result<(), GatewayError> {
        debug!(%auth_key, "invalidating stored plugin token");
        self.store.delete_token(auth_key)
    }

    /// Whether delivery to `auth_key` can proceed without another handshake.
    /// The event broker uses this to decide when buffered events may flow.
    pub fn is_provisioned(&self, plugin_id: &str, auth_key: &str) -> Result<bool, GatewayError> {
        if self.no_auth.contains(plugin_id) {
            return Ok(true);
        }
        Ok(self.store.get_token(auth_key)?.is_some())
    }

    /// Forget everything about a removed plugin.
    pub fn forget_plugin(&self, plugin_id: &str) -> Result<(), GatewayError> {
        self.no_auth.remove(plugin_id);
        self.store.delete_all_for_plugin(plugin_id)?;
        Ok(())
    }

    async fn create_client(
        &self,
        plugin: &RegisteredPlugin,
        auth_key: &str,
    ) -> Result<Option<String>, GatewayError> {
        let request = CanonicalRequest::new(Action::Get, PROFILE_AUTHORIZATION)
            .with_attribute(ATTRIBUTE_CREATE_CLIENT)
            .with_parameter(params::PACKAGE, GATEWAY_PACKAGE);
        let response = self.caller.call(plugin, request).await?;
        if !response.is_success() {
            if response.error_code == Some(ErrorCode::NotSupportProfile) {
                info!(plugin_id = %plugin.plugin_id(), "plugin does not use access tokens");
                self.no_auth.insert(plugin.plugin_id().to_string());
                return Ok(None);
            }
            return Err(GatewayError::IllegalDeviceState(format!(
                "plugin {} refused client creation",
                plugin.plugin_id()
            )));
        }
        let client_id = response
            .field_str(params::CLIENT_ID)
            .ok_or_else(|| {
                GatewayError::IllegalDeviceState(format!(
                    "plugin {} returned no client id",
                    plugin.plugin_id()
                ))
            })?
            .to_string();
        self.store.put_client(auth_key, &client_id)?;
        Ok(Some(client_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use devicehub_plugin_api::{CanonicalResponse, PluginDescriptor, PluginMessage};
    use serde_json::Value;

    use crate::plugin::MpscChannel;
    use crate::router::correlation::CorrelationTable;

    fn provisioner() -> (Provisioner, Arc<CorrelationTable>) {
        let correlation = Arc::new(CorrelationTable::new());
        let caller = Arc::new(PluginCaller::new(
            correlation.clone(),
            Duration::from_secs(5),
        ));
        let store = Arc::new(LocalAuthStore::open(None).unwrap());
        (Provisioner::new(store, caller), correlation)
    }

    /// Scripted plugin answering the authorization handshake.
    fn spawn_auth_plugin(
        correlation: Arc<CorrelationTable>,
    ) -> (RegisteredPlugin, tokio::task::JoinHandle<Vec<String>>) {
        let (channel, mut outbound) = MpscChannel::new();
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(PluginMessage::Request(req)) = outbound.recv().await {
                let attribute = req.attribute.clone().unwrap_or_default();
                seen.push(attribute.clone());
                let response = match attribute.as_str() {
                    ATTRIBUTE_CREATE_CLIENT => CanonicalResponse::ok(req.correlation_id)
                        .with_field(params::CLIENT_ID, Value::from("plugin-client-1")),
                    ATTRIBUTE_REQUEST_ACCESS_TOKEN => CanonicalResponse::ok(req.correlation_id)
                        .with_field(params::ACCESS_TOKEN, Value::from("plugin-token-1")),
                    _ => CanonicalResponse::ok(req.correlation_id),
                };
                correlation.complete(response);
            }
            seen
        });
        let plugin = RegisteredPlugin {
            descriptor: PluginDescriptor {
                plugin_id: "pluginA".into(),
                name: "Plugin A".into(),
                address: "native:pluginA".into(),
                profiles: vec!["battery".into(), "light".into()],
            },
            channel: Arc::new(channel),
        };
        (plugin, handle)
    }

    #[tokio::test]
    async fn handshake_runs_once_and_token_is_reused() {
        let (provisioner, correlation) = provisioner();
        let (plugin, handle) = spawn_auth_plugin(correlation);

        let token = provisioner
            .ensure_token(&plugin, "svc1.pluginA")
            .await
            .unwrap();
        assert_eq!(token.as_deref(), Some("plugin-token-1"));
        assert!(provisioner.is_provisioned("pluginA", "svc1.pluginA").unwrap());

        // Second call hits the store, not the plugin.
        let again = provisioner
            .ensure_token(&plugin, "svc1.pluginA")
            .await
            .unwrap();
        assert_eq!(again.as_deref(), Some("plugin-token-1"));

        drop(provisioner);
        drop(plugin);
        let seen = handle.await.unwrap();
        assert_eq!(
            seen,
            vec![
                ATTRIBUTE_CREATE_CLIENT.to_string(),
                ATTRIBUTE_REQUEST_ACCESS_TOKEN.to_string()
            ]
        );
    }

    #[tokio::test]
    async fn invalidation_reprovisions_token_but_keeps_client() {
        let (provisioner, correlation) = provisioner();
        let (plugin, handle) = spawn_auth_plugin(correlation);

        provisioner
            .ensure_token(&plugin, "svc1.pluginA")
            .await
            .unwrap();
        provisioner.invalidate_token("svc1.pluginA").unwrap();
        assert!(!provisioner.is_provisioned("pluginA", "svc1.pluginA").unwrap());

        provisioner
            .ensure_token(&plugin, "svc1.pluginA")
            .await
            .unwrap();

        drop(provisioner);
        drop(plugin);
        let seen = handle.await.unwrap();
        assert_eq!(
            seen,
            vec![
                ATTRIBUTE_CREATE_CLIENT.to_string(),
                ATTRIBUTE_REQUEST_ACCESS_TOKEN.to_string(),
                ATTRIBUTE_REQUEST_ACCESS_TOKEN.to_string()
            ]
        );
    }

    #[tokio::test]
    async fn not_support_profile_means_no_tokens() {
        let (provisioner, correlation) = provisioner();
        let (channel, mut outbound) = MpscChannel::new();
        let plugin = RegisteredPlugin {
            descriptor: PluginDescriptor {
                plugin_id: "plainPlugin".into(),
                name: "Plain".into(),
                address: "native:plainPlugin".into(),
                profiles: vec!["battery".into()],
            },
            channel: Arc::new(channel),
        };
        let responder = tokio::spawn(async move {
            let mut answered = 0u32;
            while let Some(PluginMessage::Request(req)) = outbound.recv().await {
                answered += 1;
                correlation.complete(CanonicalResponse::error_with_default_message(
                    req.correlation_id,
                    ErrorCode::NotSupportProfile,
                ));
            }
            answered
        });

        let token = provisioner.ensure_token(&plugin, "plainPlugin").await.unwrap();
        assert!(token.is_none());
        assert!(provisioner.is_provisioned("plainPlugin", "plainPlugin").unwrap());

        // Remembered; no second handshake.
        let again = provisioner.ensure_token(&plugin, "plainPlugin").await.unwrap();
        assert!(again.is_none());

        drop(provisioner);
        drop(plugin);
        assert_eq!(responder.await.unwrap(), 1);
    }
}
