//! Gateway error taxonomy
//!
//! Every user-visible failure becomes a [`GatewayError`], which maps onto a
//! wire-stable [`ErrorCode`] and renders as the standard JSON error envelope.
//! Handlers never panic on bad input; they return one of these.

use devicehub_plugin_api::{CanonicalResponse, ChannelError, ErrorCode};

/// Errors produced while validating, routing, or delivering a request.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    // Origin validation
    #[error("origin is required but was not specified")]
    OriginNotSpecified,
    #[error("request carried more than one origin")]
    OriginNotUnique,
    #[error("origin {0} is not allowed")]
    OriginNotAllowed(String),

    // Caller token validation
    #[error("access token is required but was not supplied")]
    EmptyAccessToken,
    #[error("access token has expired")]
    ExpiredAccessToken,
    #[error("access token was not recognized")]
    NotFoundToken,
    #[error("client id was not recognized")]
    NotFoundClientId,
    #[error("access token does not cover profile {0}")]
    ScopeDenied(String),

    // URL and parameter shape
    #[error("invalid request url: {0}")]
    InvalidUrl(String),
    #[error("invalid profile")]
    InvalidProfile,
    #[error("invalid request parameter: {0}")]
    InvalidRequestParameter(String),
    #[error("unsupported http method: {0}")]
    NotSupportAction(String),

    // Service resolution and delivery
    #[error("service id is required but was empty")]
    EmptyServiceId,
    #[error("service {0} was not found")]
    NotFoundService(String),
    #[error("profile {0} is not supported")]
    NotSupportProfile(String),
    #[error("attribute is not recognized")]
    UnknownAttribute,
    #[error("plugin did not respond in time")]
    Timeout,
    #[error("plugin channel failed: {0}")]
    Channel(#[from] ChannelError),

    // Lifecycle and storage
    #[error("gateway is not in a state to serve this request: {0}")]
    IllegalServerState(String),
    #[error("plugin is not in a state to serve this request: {0}")]
    IllegalDeviceState(String),
    #[error("authorization store failed: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    /// The wire error code this failure renders as.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::OriginNotSpecified | Self::OriginNotUnique | Self::OriginNotAllowed(_) => {
                ErrorCode::InvalidOrigin
            }
            Self::EmptyAccessToken => ErrorCode::EmptyAccessToken,
            Self::ExpiredAccessToken => ErrorCode::ExpiredAccessToken,
            Self::NotFoundToken => ErrorCode::Authorization,
            Self::NotFoundClientId => ErrorCode::NotFoundClientId,
            Self::ScopeDenied(_) => ErrorCode::Scope,
            Self::InvalidUrl(_) => ErrorCode::InvalidUrl,
            Self::InvalidProfile => ErrorCode::InvalidProfile,
            Self::InvalidRequestParameter(_) => ErrorCode::InvalidRequestParameter,
            Self::NotSupportAction(_) => ErrorCode::NotSupportAction,
            Self::EmptyServiceId => ErrorCode::EmptyServiceId,
            Self::NotFoundService(_) => ErrorCode::NotFoundService,
            Self::NotSupportProfile(_) => ErrorCode::NotSupportProfile,
            Self::UnknownAttribute => ErrorCode::UnknownAttribute,
            Self::Timeout => ErrorCode::Timeout,
            Self::Channel(_) => ErrorCode::IllegalDeviceState,
            Self::IllegalServerState(_) => ErrorCode::IllegalServerState,
            Self::IllegalDeviceState(_) => ErrorCode::IllegalDeviceState,
            Self::Storage(_) | Self::Internal(_) => ErrorCode::Unknown,
        }
    }

    /// Render as a canonical error response for the given correlation id.
    pub fn to_response(&self, correlation_id: u64) -> CanonicalResponse {
        CanonicalResponse::error(correlation_id, self.error_code(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_wire_stable() {
        assert_eq!(GatewayError::Timeout.error_code().code(), 7);
        assert_eq!(GatewayError::EmptyAccessToken.error_code().code(), 13);
        assert_eq!(
            GatewayError::OriginNotAllowed("http://evil".into())
                .error_code()
                .code(),
            18
        );
        assert_eq!(
            GatewayError::InvalidUrl("bad".into()).error_code().code(),
            19
        );
    }

    #[test]
    fn to_response_carries_code_and_message() {
        let resp = GatewayError::EmptyServiceId.to_response(42);
        assert_eq!(resp.correlation_id, 42);
        assert!(!resp.is_success());
        assert_eq!(resp.error_code, Some(ErrorCode::EmptyServiceId));
    }
}
