//! Event broker: plugin events to subscriber sessions
//!
//! Plugins emit [`CanonicalEvent`]s on the gateway inbox. The broker
//! rewrites plugin-local identifiers into caller-visible ones (service id
//! qualification, session key trimming), then forwards the frame:
//!
//! - service-change events are broadcast to every session, but only once the
//!   changed service is provisioned; events for an unprovisioned service are
//!   buffered and flushed in order after the token handshake completes.
//! - all other events are routed to the single session named by the event's
//!   session key. The plugin-local key is `eventKey.pluginId@receiver`; the
//!   receiver part is cut at `@` and the plugin suffix is stripped.
//!
//! A subscriber that is gone at delivery time is unregistered and every
//! plugin gets a best-effort transmit-disconnect notification so it can stop
//! emitting for that session.

mod session;

use std::sync::Arc;

use dashmap::DashMap;
use devicehub_plugin_api::{CanonicalEvent, PluginMessage, PROFILE_SYSTEM};
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub use session::{AlreadyEstablished, SessionRegistry, SubscriberLost, SubscriberSession};

use crate::plugin::{PluginRegistry, RegisteredPlugin};
use crate::router::Provisioner;

/// Separator between an event key and the destination address in a
/// plugin-local session key.
pub const SESSION_SEPARATOR: char = '@';

/// Attribute of the system profile event telling a plugin a subscriber left.
pub const ATTRIBUTE_ON_TRANSMIT_DISCONNECT: &str = "ontransmitdisconnect";

pub struct EventBroker {
    registry: Arc<PluginRegistry>,
    sessions: Arc<SessionRegistry>,
    provisioner: Arc<Provisioner>,
    /// Service-change events waiting for provisioning, keyed by auth key.
    pending: DashMap<String, Vec<CanonicalEvent>>,
}

impl EventBroker {
    pub fn new(
        registry: Arc<PluginRegistry>,
        sessions: Arc<SessionRegistry>,
        provisioner: Arc<Provisioner>,
    ) -> Self {
        Self {
            registry,
            sessions,
            provisioner,
            pending: DashMap::new(),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Entry point for every event a plugin pushes onto the gateway inbox.
    pub async fn on_plugin_event(self: &Arc<Self>, plugin_id: &str, mut event: CanonicalEvent) {
        if let Some(local_id) = event.service_id.take() {
            event.service_id = Some(PluginRegistry::qualify(&local_id, plugin_id));
        }
        if event.is_service_change() {
            self.on_service_change(plugin_id, event).await;
        } else {
            self.forward(plugin_id, event).await;
        }
    }

    async fn on_service_change(self: &Arc<Self>, plugin_id: &str, event: CanonicalEvent) {
        let auth_key = event
            .service_id
            .clone()
            .unwrap_or_else(|| plugin_id.to_string());

        match self.provisioner.is_provisioned(plugin_id, &auth_key) {
            Ok(true) => self.broadcast(&event).await,
            Ok(false) => self.buffer_and_provision(plugin_id, auth_key, event),
            Err(err) => warn!(%plugin_id, %err, "cannot check provisioning; dropping event"),
        }
    }

    /// Park the event and, if this is the first one for the key, run the
    /// token handshake in the background and flush on success.
    fn buffer_and_provision(self: &Arc<Self>, plugin_id: &str, auth_key: String, event: CanonicalEvent) {
        let first = {
            let mut entry = self.pending.entry(auth_key.clone()).or_default();
            entry.push(event);
            entry.len() == 1
        };
        if !first {
            return;
        }
        let Some(plugin) = self.registry.get(plugin_id) else {
            self.pending.remove(&auth_key);
            return;
        };
        let broker = self.clone();
        tokio::spawn(async move {
            match broker.provisioner.ensure_token(&plugin, &auth_key).await {
                Ok(_) => broker.flush_pending(&auth_key).await,
                Err(err) => {
                    warn!(plugin_id = %plugin.plugin_id(), %auth_key, %err,
                        "provisioning failed; dropping buffered events");
                    broker.pending.remove(&auth_key);
                }
            }
        });
    }

    async fn flush_pending(&self, auth_key: &str) {
        let Some((_, events)) = self.pending.remove(auth_key) else {
            return;
        };
        debug!(%auth_key, count = events.len(), "flushing buffered service-change events");
        for event in events {
            self.broadcast(&event).await;
        }
    }

    /// Service-change events go to every subscriber.
    async fn broadcast(&self, event: &CanonicalEvent) {
        let frame = render_frame(event, event.session_key.as_deref());
        for event_key in self.sessions.broadcast(&frame) {
            self.on_subscriber_lost(&event_key).await;
        }
    }

    /// Regular events go to the one session the plugin-local key names.
    async fn forward(&self, plugin_id: &str, event: CanonicalEvent) {
        let Some(plugin_key) = event.session_key.as_deref() else {
            debug!(%plugin_id, profile = %event.profile, "event without session key dropped");
            return;
        };
        let event_key = trim_session_key(plugin_key, plugin_id);
        let frame = render_frame(&event, Some(event_key));
        if self.sessions.send_to(event_key, frame).is_err() {
            debug!(%event_key, "subscriber gone; cleaning up session");
            self.on_subscriber_lost(event_key).await;
        }
    }

    /// Unregister a lost subscriber and tell every plugin, best effort.
    pub async fn on_subscriber_lost(&self, event_key: &str) {
        self.sessions.unregister(event_key);
        for plugin in self.registry.all() {
            let local_key = format!("{event_key}.{}", plugin.plugin_id());
            let notice = CanonicalEvent::new(PROFILE_SYSTEM)
                .with_attribute(ATTRIBUTE_ON_TRANSMIT_DISCONNECT)
                .with_session_key(local_key);
            if let Err(err) = plugin.channel.send(PluginMessage::Event(notice)).await {
                debug!(plugin_id = %plugin.plugin_id(), %err, "transmit-disconnect not delivered");
            }
        }
    }

    /// Tell one plugin about a lost subscriber (used when a plugin registers
    /// after the loss is already known). Best effort.
    pub async fn notify_disconnect(&self, plugin: &RegisteredPlugin, event_key: &str) {
        let local_key = format!("{event_key}.{}", plugin.plugin_id());
        let notice = CanonicalEvent::new(PROFILE_SYSTEM)
            .with_attribute(ATTRIBUTE_ON_TRANSMIT_DISCONNECT)
            .with_session_key(local_key);
        let _ = plugin.channel.send(PluginMessage::Event(notice)).await;
    }
}

/// Recover the gateway-side event key from a plugin-local session key:
/// cut the receiver address at `@`, then strip the plugin id suffix.
fn trim_session_key<'a>(plugin_key: &'a str, plugin_id: &str) -> &'a str {
    let receiver_trimmed = plugin_key
        .split_once(SESSION_SEPARATOR)
        .map(|(left, _)| left)
        .unwrap_or(plugin_key);
    receiver_trimmed
        .strip_suffix(plugin_id)
        .and_then(|s| s.strip_suffix('.'))
        .unwrap_or(receiver_trimmed)
}

/// Serialize an event as the frame written to subscriber sockets: envelope
/// fields first, payload fields merged on top.
fn render_frame(event: &CanonicalEvent, session_key: Option<&str>) -> String {
    let mut frame = Map::new();
    frame.insert("profile".into(), Value::from(event.profile.clone()));
    if let Some(interface) = &event.interface {
        frame.insert("interface".into(), Value::from(interface.clone()));
    }
    if let Some(attribute) = &event.attribute {
        frame.insert("attribute".into(), Value::from(attribute.clone()));
    }
    if let Some(service_id) = &event.service_id {
        frame.insert("serviceId".into(), Value::from(service_id.clone()));
    }
    if let Some(session_key) = session_key {
        frame.insert("sessionKey".into(), Value::from(session_key));
    }
    for (key, value) in &event.payload {
        frame.insert(key.clone(), value.clone());
    }
    Value::Object(frame).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_is_trimmed_to_gateway_key() {
        assert_eq!(
            trim_session_key("http://app.pluginA@receiver", "pluginA"),
            "http://app"
        );
        assert_eq!(trim_session_key("key.pluginA", "pluginA"), "key");
        // Foreign suffix stays untouched.
        assert_eq!(trim_session_key("key.pluginB", "pluginA"), "key.pluginB");
    }

    #[test]
    fn frame_merges_payload_over_envelope() {
        let mut event = CanonicalEvent::new("battery")
            .with_attribute("onchargingchange")
            .with_service_id("svc1.pluginA");
        event.payload.insert("level".into(), Value::from(42));
        let frame = render_frame(&event, Some("http://app"));
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["profile"], "battery");
        assert_eq!(parsed["serviceId"], "svc1.pluginA");
        assert_eq!(parsed["sessionKey"], "http://app");
        assert_eq!(parsed["level"], 42);
    }
}
