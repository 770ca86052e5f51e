//! Shared application state and gateway lifecycle.
//!
//! `AppState::new` wires every component once at startup around an immutable
//! configuration; handlers receive the state through axum's `State`
//! extractor. Plugin registration hands back a [`PluginEndpoint`]; each
//! registered plugin gets an inbox pump task that completes correlations for
//! responses and feeds events to the broker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use devicehub_plugin_api::{CanonicalEvent, PluginDescriptor, PluginMessage, PROFILE_SYSTEM};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::auth::{AccessValidator, LocalAuthStore};
use crate::config::GatewayConfig;
use crate::errors::GatewayError;
use crate::event::{EventBroker, SessionRegistry};
use crate::plugin::{MpscChannel, PluginEndpoint, PluginRegistry};
use crate::router::{
    AuthorizationHandler, AvailabilityHandler, CorrelationTable, PluginCaller, ProfileHandler,
    Provisioner, Router, ServiceDiscoveryHandler, SystemHandler,
};
use crate::transport::FileStore;

/// System profile event sent to plugins when the gateway starts.
const ATTRIBUTE_ON_MANAGER_LAUNCHED: &str = "onmanagerlaunched";
/// System profile event sent to plugins when the gateway stops.
const ATTRIBUTE_ON_MANAGER_TERMINATED: &str = "onmanagerterminated";

pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub store: Arc<LocalAuthStore>,
    pub validator: Arc<AccessValidator>,
    pub registry: Arc<PluginRegistry>,
    pub correlation: Arc<CorrelationTable>,
    pub caller: Arc<PluginCaller>,
    pub provisioner: Arc<Provisioner>,
    pub router: Arc<Router>,
    pub sessions: Arc<SessionRegistry>,
    pub broker: Arc<EventBroker>,
    pub files: Arc<FileStore>,
    running: AtomicBool,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Result<Arc<Self>, GatewayError> {
        let config = Arc::new(config);
        let store = Arc::new(LocalAuthStore::open(config.db_path.as_deref())?);
        let validator = Arc::new(AccessValidator::new(config.clone(), store.clone()));
        let registry = Arc::new(PluginRegistry::new());
        let correlation = Arc::new(CorrelationTable::new());
        let caller = Arc::new(PluginCaller::new(
            correlation.clone(),
            Duration::from_millis(config.request_timeout_ms),
        ));
        let provisioner = Arc::new(Provisioner::new(store.clone(), caller.clone()));
        let sessions = Arc::new(SessionRegistry::new());
        let broker = Arc::new(EventBroker::new(
            registry.clone(),
            sessions.clone(),
            provisioner.clone(),
        ));
        let files = Arc::new(FileStore::new(config.storage_dir.clone())?);

        let mut builtin: HashMap<&'static str, Arc<dyn ProfileHandler>> = HashMap::new();
        builtin.insert(
            "availability",
            Arc::new(AvailabilityHandler::new(config.clone())),
        );
        builtin.insert(
            "servicediscovery",
            Arc::new(ServiceDiscoveryHandler::new(
                registry.clone(),
                caller.clone(),
                provisioner.clone(),
                Duration::from_millis(config.discovery_timeout_ms),
            )),
        );
        builtin.insert(
            "authorization",
            Arc::new(AuthorizationHandler::new(config.clone(), store.clone())),
        );
        builtin.insert(
            "system",
            Arc::new(SystemHandler::new(
                config.clone(),
                registry.clone(),
                sessions.clone(),
            )),
        );

        let router = Arc::new(Router::new(
            validator.clone(),
            registry.clone(),
            caller.clone(),
            provisioner.clone(),
            builtin,
        ));

        Ok(Arc::new(Self {
            config,
            store,
            validator,
            registry,
            correlation,
            caller,
            provisioner,
            router,
            sessions,
            broker,
            files,
            running: AtomicBool::new(false),
        }))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Mark the gateway as serving and notify every plugin. Idempotent.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("gateway started");
        self.notify_plugins(ATTRIBUTE_ON_MANAGER_LAUNCHED).await;
    }

    /// Stop serving. Refused while subscriber sessions are open unless
    /// `force` is set; forced stop drops the sessions. Idempotent.
    pub async fn stop(&self, force: bool) -> Result<(), GatewayError> {
        if !self.is_running() {
            return Ok(());
        }
        if !self.sessions.is_empty() {
            if !force {
                return Err(GatewayError::IllegalServerState(format!(
                    "{} subscriber session(s) still open",
                    self.sessions.len()
                )));
            }
            warn!(count = self.sessions.len(), "forced stop; dropping subscriber sessions");
            self.sessions.drain();
        }
        self.running.store(false, Ordering::SeqCst);
        info!(forced = force, "gateway stopped");
        self.notify_plugins(ATTRIBUTE_ON_MANAGER_TERMINATED).await;
        Ok(())
    }

    /// Register a plugin and hand back its endpoint. Spawns the inbox pump
    /// for the plugin's responses and events.
    pub fn register_plugin(
        self: &Arc<Self>,
        descriptor: PluginDescriptor,
    ) -> Result<PluginEndpoint, GatewayError> {
        let (channel, outbound) = MpscChannel::new();
        self.registry.register(descriptor.clone(), Arc::new(channel))?;

        let (inbox_tx, mut inbox_rx) = mpsc::unbounded_channel::<PluginMessage>();
        let state = self.clone();
        let plugin_id = descriptor.plugin_id;
        tokio::spawn(async move {
            while let Some(message) = inbox_rx.recv().await {
                match message {
                    PluginMessage::Response(response) => {
                        state.correlation.complete(response);
                    }
                    PluginMessage::Event(event) => {
                        state.broker.on_plugin_event(&plugin_id, event).await;
                    }
                    PluginMessage::Request(_) => {
                        warn!(%plugin_id, "plugin sent a request; dropped");
                    }
                }
            }
            debug!(%plugin_id, "plugin inbox closed");
        });

        Ok(PluginEndpoint {
            outbound,
            inbox: inbox_tx,
        })
    }

    /// Remove a plugin and everything keyed to it: registration, auth
    /// records, stored tokens.
    pub fn unregister_plugin(&self, plugin_id: &str) -> Result<(), GatewayError> {
        if self.registry.unregister(plugin_id).is_some() {
            self.provisioner.forget_plugin(plugin_id)?;
        }
        Ok(())
    }

    async fn notify_plugins(&self, attribute: &str) {
        for plugin in self.registry.all() {
            let event = CanonicalEvent::new(PROFILE_SYSTEM).with_attribute(attribute);
            if let Err(err) = plugin.channel.send(PluginMessage::Event(event)).await {
                debug!(plugin_id = %plugin.plugin_id(), %err, "lifecycle notification failed");
            }
        }
    }
}
