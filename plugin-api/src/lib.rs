//! # Devicehub Plugin API
//!
//! This crate provides the canonical message model shared between the
//! devicehub gateway and its plugins. Plugins are independent processes (or
//! in-process hosts) that register with the gateway and exchange messages
//! over an addressable, asynchronous channel; there is no shared memory and
//! no guaranteed ordering or delivery, so every type here is a plain,
//! serializable value.
//!
//! # Architecture
//!
//! The gateway normalizes all transport traffic (HTTP, WebSocket, native
//! channel) into a [`CanonicalRequest`], delivers it as
//! [`PluginMessage::Request`], and matches the plugin's
//! [`PluginMessage::Response`] back to the waiting caller via the
//! correlation id. Plugin-originated [`PluginMessage::Event`]s flow the
//! other way and are fanned out to subscriber sessions by the gateway.
//!
//! # Example
//!
//! ```
//! use devicehub_plugin_api::{Action, CanonicalRequest, CanonicalResponse};
//!
//! let request = CanonicalRequest::new(Action::Get, "battery")
//!     .with_attribute("level")
//!     .with_service_id("svc1");
//! let response = CanonicalResponse::ok(request.correlation_id);
//! assert_eq!(response.result, 0);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Result value for a successful response.
pub const RESULT_OK: u32 = 0;

/// Result value for an error response.
pub const RESULT_ERROR: u32 = 1;

/// Profile handled by the gateway: access token grants.
pub const PROFILE_AUTHORIZATION: &str = "authorization";

/// Profile handled by the gateway: liveness of the gateway itself.
pub const PROFILE_AVAILABILITY: &str = "availability";

/// Profile handled by the gateway: gateway information and event cleanup.
pub const PROFILE_SYSTEM: &str = "system";

/// Profile handled by the transport layer: serving stored binary payloads.
pub const PROFILE_FILES: &str = "files";

/// Profile handled by the gateway: aggregated plugin service discovery.
pub const PROFILE_SERVICE_DISCOVERY: &str = "servicediscovery";

/// Attribute of the discovery profile carrying service change events.
pub const ATTRIBUTE_ON_SERVICE_CHANGE: &str = "onservicechange";

/// Attribute of the plugin-side authorization profile: client registration.
pub const ATTRIBUTE_CREATE_CLIENT: &str = "createClient";

/// Attribute of the plugin-side authorization profile: token issuance.
pub const ATTRIBUTE_REQUEST_ACCESS_TOKEN: &str = "requestAccessToken";

/// Parameter names shared across the protocol.
pub mod params {
    pub const CLIENT_ID: &str = "clientId";
    pub const ACCESS_TOKEN: &str = "accessToken";
    pub const SCOPE: &str = "scope";
    pub const PACKAGE: &str = "package";
    pub const SERVICE_ID: &str = "serviceId";
    pub const SERVICES: &str = "services";
    pub const URI: &str = "uri";
    pub const FILE_NAME: &str = "fileName";
    pub const EXPIRE: &str = "expire";
}

/// Case-insensitive profile/attribute name comparison.
///
/// Path segments of the request URL are matched ignoring case, which is how
/// the protocol defines profile identity.
pub fn names_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Request action, the transport-agnostic equivalent of an HTTP verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Get,
    Put,
    Post,
    Delete,
}

impl Action {
    /// Parse an HTTP method name (case-insensitive) into an action.
    ///
    /// Returns `None` for verbs the protocol does not support (HEAD,
    /// OPTIONS, PATCH, ...).
    pub fn from_method(method: &str) -> Option<Self> {
        if method.eq_ignore_ascii_case("GET") {
            Some(Self::Get)
        } else if method.eq_ignore_ascii_case("PUT") {
            Some(Self::Put)
        } else if method.eq_ignore_ascii_case("POST") {
            Some(Self::Post)
        } else if method.eq_ignore_ascii_case("DELETE") {
            Some(Self::Delete)
        } else {
            None
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire-stable error codes carried in the `errorCode` field of the response
/// envelope. The numeric values are part of the protocol and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Unknown,
    NotSupportProfile,
    NotSupportAction,
    NotSupportAttribute,
    EmptyServiceId,
    NotFoundService,
    Timeout,
    UnknownAttribute,
    InvalidRequestParameter,
    Authorization,
    ExpiredAccessToken,
    EmptyAccessToken,
    Scope,
    NotFoundClientId,
    IllegalDeviceState,
    IllegalServerState,
    InvalidOrigin,
    InvalidUrl,
    InvalidProfile,
}

impl ErrorCode {
    pub const fn code(&self) -> u32 {
        match self {
            Self::Unknown => 1,
            Self::NotSupportProfile => 2,
            Self::NotSupportAction => 3,
            Self::NotSupportAttribute => 4,
            Self::EmptyServiceId => 5,
            Self::NotFoundService => 6,
            Self::Timeout => 7,
            Self::UnknownAttribute => 8,
            Self::InvalidRequestParameter => 10,
            Self::Authorization => 11,
            Self::ExpiredAccessToken => 12,
            Self::EmptyAccessToken => 13,
            Self::Scope => 14,
            Self::NotFoundClientId => 15,
            Self::IllegalDeviceState => 16,
            Self::IllegalServerState => 17,
            Self::InvalidOrigin => 18,
            Self::InvalidUrl => 19,
            Self::InvalidProfile => 20,
        }
    }

    pub const fn default_message(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown error occurred.",
            Self::NotSupportProfile => "Not support profile.",
            Self::NotSupportAction => "Not support action.",
            Self::NotSupportAttribute => "Not support attribute.",
            Self::EmptyServiceId => "Service ID is empty.",
            Self::NotFoundService => "Service is not found.",
            Self::Timeout => "Response timeout.",
            Self::UnknownAttribute => "Unknown attribute.",
            Self::InvalidRequestParameter => "Invalid request parameter.",
            Self::Authorization => "Authorization failed.",
            Self::ExpiredAccessToken => "Access token is expired.",
            Self::EmptyAccessToken => "Access token is empty.",
            Self::Scope => "Request is out of scope.",
            Self::NotFoundClientId => "Client is not found.",
            Self::IllegalDeviceState => "Illegal device state.",
            Self::IllegalServerState => "Illegal server state.",
            Self::InvalidOrigin => "Origin is invalid.",
            Self::InvalidUrl => "URL is invalid.",
            Self::InvalidProfile => "Profile is invalid.",
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.code())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u32::deserialize(deserializer)?;
        Ok(match code {
            2 => Self::NotSupportProfile,
            3 => Self::NotSupportAction,
            4 => Self::NotSupportAttribute,
            5 => Self::EmptyServiceId,
            6 => Self::NotFoundService,
            7 => Self::Timeout,
            8 => Self::UnknownAttribute,
            10 => Self::InvalidRequestParameter,
            11 => Self::Authorization,
            12 => Self::ExpiredAccessToken,
            13 => Self::EmptyAccessToken,
            14 => Self::Scope,
            15 => Self::NotFoundClientId,
            16 => Self::IllegalDeviceState,
            17 => Self::IllegalServerState,
            18 => Self::InvalidOrigin,
            19 => Self::InvalidUrl,
            20 => Self::InvalidProfile,
            _ => Self::Unknown,
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.default_message(), self.code())
    }
}

/// Reference to a binary payload persisted by a transport adapter.
///
/// Multipart file parts are never carried inline through the message
/// channel; the adapter stores them and replaces the bytes with this
/// reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
    /// Opaque URI the `files` profile can serve the payload from.
    pub uri: String,
    /// Original file name as supplied by the client, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// Canonical, transport-agnostic request.
///
/// Built once by a transport adapter and immutable after dispatch; the
/// router clones-and-rewrites rather than mutating a dispatched request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRequest {
    /// Unique per in-flight call; never reused while the call is pending.
    #[serde(rename = "requestCode")]
    pub correlation_id: u64,
    pub action: Action,
    /// Fixed gateway identifier from the first path segment.
    pub api: String,
    pub profile: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(rename = "serviceId", skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(rename = "accessToken", skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(rename = "sessionKey", skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    /// Ordered key/value parameters merged from query string, form body and
    /// non-file multipart parts. Later sources do not overwrite earlier keys.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileReference>,
}

impl CanonicalRequest {
    pub fn new(action: Action, profile: impl Into<String>) -> Self {
        Self {
            correlation_id: 0,
            action,
            api: String::new(),
            profile: profile.into(),
            interface: None,
            attribute: None,
            service_id: None,
            origin: None,
            access_token: None,
            session_key: None,
            parameters: Vec::new(),
            file: None,
        }
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((key.into(), value.into()));
        self
    }

    /// First value recorded for `key`, if any.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Canonical response matched back to a waiting caller by correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalResponse {
    #[serde(rename = "requestCode")]
    pub correlation_id: u64,
    pub result: u32,
    #[serde(rename = "errorCode", skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Profile-specific fields merged into the response envelope.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub payload: Map<String, Value>,
    /// Raw byte body for binary-profile responses, with its content type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<BinaryPayload>,
}

/// Byte payload returned instead of the JSON envelope (e.g. files profile).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryPayload {
    #[serde(rename = "contentType")]
    pub content_type: String,
    pub data: Vec<u8>,
}

impl CanonicalResponse {
    pub fn ok(correlation_id: u64) -> Self {
        Self {
            correlation_id,
            result: RESULT_OK,
            error_code: None,
            error_message: None,
            payload: Map::new(),
            binary: None,
        }
    }

    pub fn error(correlation_id: u64, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            correlation_id,
            result: RESULT_ERROR,
            error_code: Some(code),
            error_message: Some(message.into()),
            payload: Map::new(),
            binary: None,
        }
    }

    pub fn error_with_default_message(correlation_id: u64, code: ErrorCode) -> Self {
        Self::error(correlation_id, code, code.default_message())
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    pub fn is_success(&self) -> bool {
        self.result == RESULT_OK
    }

    /// String field from the payload map, if present.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// Plugin-originated event forwarded to subscriber sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub profile: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    /// Plugin-local service id; the gateway qualifies it before forwarding.
    #[serde(rename = "serviceId", skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    /// Session key as the plugin knows it (receiver key plus appended
    /// destination address).
    #[serde(rename = "sessionKey", skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    /// The plugin-side access token the event was registered under, if any.
    #[serde(rename = "accessToken", skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub payload: Map<String, Value>,
}

impl CanonicalEvent {
    pub fn new(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            interface: None,
            attribute: None,
            service_id: None,
            session_key: None,
            access_token: None,
            payload: Map::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    pub fn with_session_key(mut self, session_key: impl Into<String>) -> Self {
        self.session_key = Some(session_key.into());
        self
    }

    /// True when this is a discovery "service changed" notification.
    pub fn is_service_change(&self) -> bool {
        names_match(&self.profile, PROFILE_SERVICE_DISCOVERY)
            && self
                .attribute
                .as_deref()
                .map(|a| names_match(a, ATTRIBUTE_ON_SERVICE_CHANGE))
                .unwrap_or(false)
    }
}

/// The unit carried over a plugin channel, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PluginMessage {
    Request(CanonicalRequest),
    Response(CanonicalResponse),
    Event(CanonicalEvent),
}

/// Descriptor a plugin registers itself with.
///
/// Immutable while registered; removed on uninstall or loss notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Stable identifier; must not contain the service-id separator (`.`).
    #[serde(rename = "pluginId")]
    pub plugin_id: String,
    /// Human-readable name.
    pub name: String,
    /// Reachable address of the plugin's message channel endpoint.
    pub address: String,
    /// Declared supported profile names.
    pub profiles: Vec<String>,
}

impl PluginDescriptor {
    pub fn supports_profile(&self, profile: &str) -> bool {
        self.profiles.iter().any(|p| names_match(p, profile))
    }
}

/// Failure to hand a message to a plugin channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("plugin channel is closed")]
    Closed,
    #[error("plugin is unreachable: {0}")]
    Unreachable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_from_method_is_case_insensitive() {
        assert_eq!(Action::from_method("get"), Some(Action::Get));
        assert_eq!(Action::from_method("DELETE"), Some(Action::Delete));
        assert_eq!(Action::from_method("PATCH"), None);
    }

    #[test]
    fn error_codes_are_wire_stable() {
        assert_eq!(ErrorCode::Timeout.code(), 7);
        assert_eq!(ErrorCode::ExpiredAccessToken.code(), 12);
        assert_eq!(ErrorCode::EmptyAccessToken.code(), 13);
        assert_eq!(ErrorCode::InvalidOrigin.code(), 18);
        assert_eq!(ErrorCode::InvalidUrl.code(), 19);
    }

    #[test]
    fn response_envelope_serializes_error_code_as_number() {
        let resp = CanonicalResponse::error(1, ErrorCode::InvalidUrl, "URL is invalid.");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["result"], 1);
        assert_eq!(json["errorCode"], 19);
        assert_eq!(json["errorMessage"], "URL is invalid.");
    }

    #[test]
    fn plugin_message_round_trips() {
        let msg = PluginMessage::Request(
            CanonicalRequest::new(Action::Get, "battery").with_service_id("svc1"),
        );
        let json = serde_json::to_string(&msg).unwrap();
        let back: PluginMessage = serde_json::from_str(&json).unwrap();
        match back {
            PluginMessage::Request(req) => {
                assert_eq!(req.profile, "battery");
                assert_eq!(req.service_id.as_deref(), Some("svc1"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn service_change_detection_ignores_case() {
        let event = CanonicalEvent::new("serviceDiscovery").with_attribute("onServiceChange");
        assert!(event.is_service_change());
        let other = CanonicalEvent::new("battery").with_attribute("onChargingChange");
        assert!(!other.is_service_change());
    }
}
