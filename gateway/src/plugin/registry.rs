//! Plugin registry and service id translation.
//!
//! The registry is the single source of truth for which plugins are
//! reachable. It also owns the service id composition rule: a plugin-local
//! id `svc1` registered by `pluginA` is exposed to callers as
//! `svc1.pluginA`, and global ids are split back from the right. Plugin ids
//! may therefore never contain the separator; registration rejects them.

use std::sync::Arc;

use dashmap::DashMap;
use devicehub_plugin_api::PluginDescriptor;
use tracing::info;

use super::channel::PluginChannel;
use crate::errors::GatewayError;

/// Separator between the plugin-local service id and the plugin id.
pub const SERVICE_ID_SEPARATOR: char = '.';

/// A plugin currently reachable through the gateway.
pub struct RegisteredPlugin {
    pub descriptor: PluginDescriptor,
    pub channel: Arc<dyn PluginChannel>,
}

impl RegisteredPlugin {
    pub fn plugin_id(&self) -> &str {
        &self.descriptor.plugin_id
    }
}

/// Concurrent registry of reachable plugins, keyed by plugin id.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: DashMap<String, Arc<RegisteredPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin, replacing any previous registration under the same
    /// id (reinstall). Ids containing the service id separator are rejected,
    /// otherwise qualified service ids would be ambiguous.
    pub fn register(
        &self,
        descriptor: PluginDescriptor,
        channel: Arc<dyn PluginChannel>,
    ) -> Result<(), GatewayError> {
        if descriptor.plugin_id.is_empty() {
            return Err(GatewayError::InvalidRequestParameter(
                "plugin id must not be empty".into(),
            ));
        }
        if descriptor.plugin_id.contains(SERVICE_ID_SEPARATOR) {
            return Err(GatewayError::InvalidRequestParameter(format!(
                "plugin id {:?} must not contain {:?}",
                descriptor.plugin_id, SERVICE_ID_SEPARATOR
            )));
        }
        info!(plugin_id = %descriptor.plugin_id, name = %descriptor.name, "plugin registered");
        self.plugins.insert(
            descriptor.plugin_id.clone(),
            Arc::new(RegisteredPlugin {
                descriptor,
                channel,
            }),
        );
        Ok(())
    }

    /// Remove a plugin. Returns the removed entry so the caller can cascade
    /// (auth records, buffered events) before dropping it.
    pub fn unregister(&self, plugin_id: &str) -> Option<Arc<RegisteredPlugin>> {
        let removed = self.plugins.remove(plugin_id).map(|(_, p)| p);
        if removed.is_some() {
            info!(%plugin_id, "plugin unregistered");
        }
        removed
    }

    pub fn get(&self, plugin_id: &str) -> Option<Arc<RegisteredPlugin>> {
        self.plugins.get(plugin_id).map(|p| p.clone())
    }

    pub fn all(&self) -> Vec<Arc<RegisteredPlugin>> {
        self.plugins.iter().map(|p| p.clone()).collect()
    }

    /// Plugins declaring support for `profile`.
    pub fn list_by_profile(&self, profile: &str) -> Vec<Arc<RegisteredPlugin>> {
        self.plugins
            .iter()
            .filter(|p| p.descriptor.supports_profile(profile))
            .map(|p| p.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Compose the caller-visible service id.
    pub fn qualify(local_id: &str, plugin_id: &str) -> String {
        format!("{local_id}{SERVICE_ID_SEPARATOR}{plugin_id}")
    }

    /// Split a caller-visible service id from the right. A local id
    /// containing the separator still splits correctly because plugin ids
    /// cannot contain it.
    pub fn unqualify(service_id: &str) -> Option<(&str, &str)> {
        service_id.rsplit_once(SERVICE_ID_SEPARATOR)
    }

    /// Resolve a caller-supplied service id to its plugin and the
    /// plugin-local id to forward. A bare plugin id resolves with no local
    /// id, which service-less profile requests use.
    pub fn resolve(
        &self,
        service_id: &str,
    ) -> Result<(Option<String>, Arc<RegisteredPlugin>), GatewayError> {
        if let Some((local_id, plugin_id)) = Self::unqualify(service_id) {
            if let Some(plugin) = self.get(plugin_id) {
                return Ok((Some(local_id.to_string()), plugin));
            }
        }
        if let Some(plugin) = self.get(service_id) {
            return Ok((None, plugin));
        }
        Err(GatewayError::NotFoundService(service_id.to_string()))
    }
}
