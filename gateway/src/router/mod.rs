//! Request routing: validation, builtin dispatch, plugin delivery
//!
//! Every canonical request, whatever transport produced it, passes through
//! one pipeline: origin validation, then token validation, then either a
//! builtin profile handler or delivery to the owning plugin. The pipeline
//! never panics on caller input; every failure renders the standard error
//! envelope with the caller's correlation id.
//!
//! # Architecture
//!
//! ```text
//! dispatch(request)
//!   ├─ validate_origin ──▶ InvalidOrigin (18) short-circuit
//!   ├─ check_token ──────▶ 11/12/13/14/15 short-circuit
//!   ├─ builtin[profile] ─▶ availability / serviceDiscovery /
//!   │                      authorization / system
//!   └─ deliver ──────────▶ resolve service id, unqualify, ensure plugin
//!                          token, call with deadline
//! ```

mod builtin;
mod caller;
pub(crate) mod correlation;
mod provision;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use devicehub_plugin_api::{CanonicalRequest, CanonicalResponse, ErrorCode};
use tracing::{debug, warn};

pub use builtin::{
    AuthorizationHandler, AvailabilityHandler, ServiceDiscoveryHandler, SystemHandler,
    BUILTIN_PROFILES,
};
pub use caller::PluginCaller;
pub use correlation::CorrelationTable;
pub use provision::Provisioner;

use crate::auth::AccessValidator;
use crate::errors::GatewayError;
use crate::plugin::PluginRegistry;

/// A profile the gateway serves without delivering to a plugin.
#[async_trait]
pub trait ProfileHandler: Send + Sync {
    async fn handle(&self, request: &CanonicalRequest) -> Result<CanonicalResponse, GatewayError>;
}

pub struct Router {
    validator: Arc<AccessValidator>,
    registry: Arc<PluginRegistry>,
    caller: Arc<PluginCaller>,
    provisioner: Arc<Provisioner>,
    /// Built once at startup; keys are lowercase profile names.
    builtin: HashMap<&'static str, Arc<dyn ProfileHandler>>,
}

impl Router {
    pub fn new(
        validator: Arc<AccessValidator>,
        registry: Arc<PluginRegistry>,
        caller: Arc<PluginCaller>,
        provisioner: Arc<Provisioner>,
        builtin: HashMap<&'static str, Arc<dyn ProfileHandler>>,
    ) -> Self {
        Self {
            validator,
            registry,
            caller,
            provisioner,
            builtin,
        }
    }

    /// Run the full pipeline and always produce a response envelope.
    pub async fn dispatch(&self, request: CanonicalRequest) -> CanonicalResponse {
        let correlation_id = request.correlation_id;
        let profile = request.profile.clone();
        match self.route(request).await {
            Ok(response) => response,
            Err(err) => {
                debug!(%profile, code = err.error_code().code(), %err, "request rejected");
                err.to_response(correlation_id)
            }
        }
    }

    async fn route(&self, mut request: CanonicalRequest) -> Result<CanonicalResponse, GatewayError> {
        let origin = self.validator.validate_origin(request.origin.as_deref())?;
        request.origin = Some(origin.clone());
        self.validator
            .check_token(&request.profile, request.access_token.as_deref(), &origin)?;

        if request.profile.is_empty() {
            return Err(GatewayError::NotSupportProfile(String::new()));
        }
        let lowered = request.profile.to_ascii_lowercase();
        if let Some(handler) = self.builtin.get(lowered.as_str()) {
            return handler.handle(&request).await;
        }
        self.deliver(request).await
    }

    /// Deliver to the plugin owning the request's service id.
    async fn deliver(&self, request: CanonicalRequest) -> Result<CanonicalResponse, GatewayError> {
        let service_id = request
            .service_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or(GatewayError::EmptyServiceId)?;
        let (local_id, plugin) = self.registry.resolve(&service_id)?;

        let mut outbound = request.clone();
        outbound.service_id = local_id;
        // Subscription verbs carry the plugin-local session key so the
        // plugin can address its events back to this subscriber.
        if matches!(
            outbound.action,
            devicehub_plugin_api::Action::Put | devicehub_plugin_api::Action::Delete
        ) {
            let event_key = request.session_key.clone().or_else(|| request.origin.clone());
            outbound.session_key =
                event_key.map(|key| format!("{key}.{}", plugin.plugin_id()));
        }

        let token = self.provisioner.ensure_token(&plugin, &service_id).await?;
        outbound.access_token = token.clone();

        let response = self.caller.call(&plugin, outbound.clone()).await?;
        if response.error_code == Some(ErrorCode::ExpiredAccessToken) && token.is_some() {
            // The plugin dropped our grant; re-provision once and retry.
            warn!(plugin_id = %plugin.plugin_id(), %service_id, "plugin token expired; re-provisioning");
            self.provisioner.invalidate_token(&service_id)?;
            outbound.access_token = self.provisioner.ensure_token(&plugin, &service_id).await?;
            return self.caller.call(&plugin, outbound).await;
        }
        Ok(response)
    }
}
