//! Authorization profile: caller-side grants.
//!
//! `grant` registers a client for the request's origin; `accessToken` turns
//! a client id plus a scope list into a bearer token with the configured
//! TTL. Both are exempt from the token check by definition, otherwise no
//! caller could ever bootstrap.

use std::sync::Arc;

use async_trait::async_trait;
use devicehub_plugin_api::{names_match, params, Action, CanonicalRequest, CanonicalResponse};
use serde_json::Value;
use tracing::info;

use crate::auth::LocalAuthStore;
use crate::config::GatewayConfig;
use crate::errors::GatewayError;
use crate::router::ProfileHandler;

const ATTRIBUTE_GRANT: &str = "grant";
const ATTRIBUTE_ACCESS_TOKEN: &str = "accessToken";

pub struct AuthorizationHandler {
    config: Arc<GatewayConfig>,
    store: Arc<LocalAuthStore>,
}

impl AuthorizationHandler {
    pub fn new(config: Arc<GatewayConfig>, store: Arc<LocalAuthStore>) -> Self {
        Self { config, store }
    }

    fn grant(&self, request: &CanonicalRequest) -> Result<CanonicalResponse, GatewayError> {
        let origin = request
            .origin
            .as_deref()
            .ok_or(GatewayError::OriginNotSpecified)?;
        let client_id = self.store.grant_client(origin)?;
        info!(%origin, "caller client registered");
        Ok(CanonicalResponse::ok(request.correlation_id)
            .with_field(params::CLIENT_ID, Value::from(client_id)))
    }

    fn access_token(&self, request: &CanonicalRequest) -> Result<CanonicalResponse, GatewayError> {
        let origin = request
            .origin
            .as_deref()
            .ok_or(GatewayError::OriginNotSpecified)?;
        let client_id = request
            .parameter(params::CLIENT_ID)
            .ok_or_else(|| GatewayError::InvalidRequestParameter("clientId is required".into()))?;
        let scope = request
            .parameter(params::SCOPE)
            .ok_or_else(|| GatewayError::InvalidRequestParameter("scope is required".into()))?;
        let scopes: Vec<String> = scope
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if scopes.is_empty() {
            return Err(GatewayError::InvalidRequestParameter(
                "scope must name at least one profile".into(),
            ));
        }

        // A client id minted for another origin must not be redeemable here.
        match self.store.client_origin(client_id)? {
            Some(client_origin) if client_origin == origin => {}
            _ => return Err(GatewayError::NotFoundClientId),
        }

        let issued = self
            .store
            .issue_token(client_id, &scopes, self.config.token_ttl_seconds)?;
        info!(%origin, scopes = scopes.len(), "caller access token issued");
        Ok(CanonicalResponse::ok(request.correlation_id)
            .with_field(params::ACCESS_TOKEN, Value::from(issued.access_token))
            .with_field(params::EXPIRE, Value::from(issued.expires_at)))
    }
}

#[async_trait]
impl ProfileHandler for AuthorizationHandler {
    async fn handle(&self, request: &CanonicalRequest) -> Result<CanonicalResponse, GatewayError> {
        if request.action != Action::Get {
            return Err(GatewayError::NotSupportAction(request.action.to_string()));
        }
        match request.attribute.as_deref() {
            Some(attr) if names_match(attr, ATTRIBUTE_GRANT) => self.grant(request),
            Some(attr) if names_match(attr, ATTRIBUTE_ACCESS_TOKEN) => self.access_token(request),
            _ => Err(GatewayError::UnknownAttribute),
        }
    }
}
