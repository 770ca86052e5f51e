//! Request security pipeline: origin validation, then token validation.
//!
//! Origin is always resolved before the token is even looked at; a request
//! with a bad origin is rejected with `InvalidOrigin` regardless of its
//! token. Profiles the gateway itself serves before authorization can exist
//! (authorization, availability, system, files) are exempt from the token
//! check, otherwise no caller could ever obtain a token.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::auth::LocalAuthStore;
use crate::config::GatewayConfig;
use crate::errors::GatewayError;

/// Effective origin for requests that did not carry one.
pub const ANONYMOUS_ORIGIN: &str = "<anonymous>";

const TOKEN_EXEMPT_PROFILES: [&str; 4] = ["authorization", "availability", "system", "files"];

/// Applies the configured origin and token policy to incoming requests.
pub struct AccessValidator {
    config: Arc<GatewayConfig>,
    store: Arc<LocalAuthStore>,
}

impl AccessValidator {
    pub fn new(config: Arc<GatewayConfig>, store: Arc<LocalAuthStore>) -> Self {
        Self { config, store }
    }

    /// Profiles served without a caller token.
    pub fn is_exempt(profile: &str) -> bool {
        TOKEN_EXEMPT_PROFILES
            .iter()
            .any(|p| p.eq_ignore_ascii_case(profile))
    }

    /// Resolve the effective origin of a request.
    ///
    /// A missing origin becomes [`ANONYMOUS_ORIGIN`] unless origins are
    /// required. A header value containing more than one token is rejected as
    /// not unique. When origin blocking is enabled, non-anonymous origins
    /// must appear on the whitelist.
    pub fn validate_origin(&self, origin: Option<&str>) -> Result<String, GatewayError> {
        let origin = origin.map(str::trim).filter(|o| !o.is_empty());
        let origin = match origin {
            Some(value) => {
                if value.split_whitespace().count() > 1 {
                    return Err(GatewayError::OriginNotUnique);
                }
                value.to_string()
            }
            None => {
                if self.config.require_origin {
                    return Err(GatewayError::OriginNotSpecified);
                }
                ANONYMOUS_ORIGIN.to_string()
            }
        };

        if self.config.enable_origin_blocking
            && origin != ANONYMOUS_ORIGIN
            && !self.config.origin_whitelist.iter().any(|o| *o == origin)
        {
            debug!(%origin, "origin rejected by whitelist");
            return Err(GatewayError::OriginNotAllowed(origin));
        }
        Ok(origin)
    }

    /// Validate the caller's access token for `profile`.
    ///
    /// No-op when token checking is disabled or the profile is exempt. The
    /// token must exist, belong to a client registered for this origin, be
    /// unexpired, and cover the requested profile in its scopes.
    pub fn check_token(
        &self,
        profile: &str,
        access_token: Option<&str>,
        origin: &str,
    ) -> Result<(), GatewayError> {
        self.check_token_at(profile, access_token, origin, unix_now())
    }

    /// Token check against an explicit clock.
    fn check_token_at(
        &self,
        profile: &str,
        access_token: Option<&str>,
        origin: &str,
        now: u64,
    ) -> Result<(), GatewayError> {
        if !self.config.enable_token_check || Self::is_exempt(profile) {
            return Ok(());
        }
        let access_token = access_token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(GatewayError::EmptyAccessToken)?;
        let token = self
            .store
            .lookup_token(access_token)?
            .ok_or(GatewayError::NotFoundToken)?;
        if token.origin != origin {
            debug!(%origin, token_origin = %token.origin, "token presented from foreign origin");
            return Err(GatewayError::NotFoundToken);
        }
        if token.is_expired(now) {
            return Err(GatewayError::ExpiredAccessToken);
        }
        if !token.covers_profile(profile) {
            return Err(GatewayError::ScopeDenied(profile.to_string()));
        }
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
