//! System profile: gateway introspection and event session cleanup.

use std::sync::Arc;

use async_trait::async_trait;
use devicehub_plugin_api::{names_match, Action, CanonicalRequest, CanonicalResponse};
use serde_json::{json, Value};
use tracing::info;

use super::BUILTIN_PROFILES;
use crate::config::GatewayConfig;
use crate::errors::GatewayError;
use crate::event::SessionRegistry;
use crate::plugin::PluginRegistry;
use crate::router::ProfileHandler;

const ATTRIBUTE_EVENTS: &str = "events";

pub struct SystemHandler {
    config: Arc<GatewayConfig>,
    registry: Arc<PluginRegistry>,
    sessions: Arc<SessionRegistry>,
}

impl SystemHandler {
    pub fn new(
        config: Arc<GatewayConfig>,
        registry: Arc<PluginRegistry>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            config,
            registry,
            sessions,
        }
    }

    fn info(&self, request: &CanonicalRequest) -> CanonicalResponse {
        let plugins: Vec<Value> = self
            .registry
            .all()
            .into_iter()
            .map(|plugin| {
                json!({
                    "pluginId": plugin.descriptor.plugin_id,
                    "name": plugin.descriptor.name,
                    "profiles": plugin.descriptor.profiles,
                })
            })
            .collect();
        CanonicalResponse::ok(request.correlation_id)
            .with_field("name", Value::from(self.config.product_name.clone()))
            .with_field("version", Value::from(env!("CARGO_PKG_VERSION")))
            .with_field(
                "supports",
                Value::Array(BUILTIN_PROFILES.iter().map(|p| Value::from(*p)).collect()),
            )
            .with_field("plugins", Value::Array(plugins))
    }

    /// Drop the caller's event sessions (DELETE /system/events).
    fn drop_events(&self, request: &CanonicalRequest) -> Result<CanonicalResponse, GatewayError> {
        let owner = request
            .session_key
            .as_deref()
            .or(request.origin.as_deref())
            .ok_or_else(|| {
                GatewayError::InvalidRequestParameter("no session to remove".into())
            })?;
        // Sessions are keyed by event key but owned by an origin/session uri;
        // remove both direct key matches and uri matches.
        let mut removed = self.sessions.drop_by_uri(owner);
        if self.sessions.unregister(owner) {
            removed.push(owner.to_string());
        }
        info!(%owner, count = removed.len(), "event sessions dropped");
        Ok(CanonicalResponse::ok(request.correlation_id))
    }
}

#[async_trait]
impl ProfileHandler for SystemHandler {
    async fn handle(&self, request: &CanonicalRequest) -> Result<CanonicalResponse, GatewayError> {
        match (request.action, request.attribute.as_deref()) {
            (Action::Get, None) => Ok(self.info(request)),
            (Action::Delete, Some(attr)) if names_match(attr, ATTRIBUTE_EVENTS) => {
                self.drop_events(request)
            }
            (_, Some(_)) => Err(GatewayError::UnknownAttribute),
            (action, None) => Err(GatewayError::NotSupportAction(action.to_string())),
        }
    }
}
