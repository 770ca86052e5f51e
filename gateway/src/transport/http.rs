//! HTTP adapter: URL grammar, parameter merging, envelope rendering.
//!
//! The path grammar is `/{api}[/{method}]/{profile}[/{interface}]/{attribute}`.
//! The optional method segment is only honored when the real HTTP verb is
//! GET; any other verb combined with a method segment is an invalid URL.
//! Query string, form body and multipart parts merge into one ordered
//! parameter list; at most one file part is persisted and replaced by a
//! `uri`/`fileName` pair. The `files` profile is served here directly and
//! never reaches the router.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use devicehub_plugin_api::{
    names_match, params, Action, CanonicalRequest, CanonicalResponse, ErrorCode, FileReference,
    PROFILE_FILES,
};
use serde_json::{Map, Value};
use tracing::debug;

use crate::state::AppState;

/// Upload size cap for form and multipart bodies.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Parsed request target, before parameters.
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedTarget {
    pub action: Action,
    pub profile: String,
    pub interface: Option<String>,
    pub attribute: Option<String>,
}

/// Early rejection with its HTTP status and wire error.
#[derive(Debug)]
pub struct Rejection {
    status: StatusCode,
    code: ErrorCode,
    message: String,
}

impl Rejection {
    fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }
}

/// Apply the segment grammar to the path segments after the api segment.
///
/// `verb` is the actual HTTP verb. Mirrors the original gateway's table:
/// a method segment is recognized only with 3+ total segments, and a
/// profile that itself names a verb is an invalid profile.
pub fn parse_target(verb: Action, segments: &[&str]) -> Result<ParsedTarget, Rejection> {
    let has_method = !segments.is_empty() && Action::from_method(segments[0]).is_some();

    let (method_segment, rest) = if has_method && segments.len() >= 2 {
        (Action::from_method(segments[0]), &segments[1..])
    } else {
        (None, segments)
    };

    let (profile, interface, attribute) = match rest {
        [] => {
            return Err(Rejection::bad_request(
                ErrorCode::InvalidUrl,
                "profile is empty.",
            ))
        }
        [profile] => (*profile, None, None),
        [profile, attribute] => (*profile, None, Some(*attribute)),
        [profile, interface, attribute] => (*profile, Some(*interface), Some(*attribute)),
        _ => {
            return Err(Rejection::bad_request(
                ErrorCode::InvalidUrl,
                "too many path segments.",
            ))
        }
    };

    if Action::from_method(profile).is_some() {
        return Err(Rejection::bad_request(
            ErrorCode::InvalidProfile,
            ErrorCode::InvalidProfile.default_message(),
        ));
    }

    let action = match method_segment {
        Some(method) => {
            if verb != Action::Get {
                return Err(Rejection::bad_request(
                    ErrorCode::InvalidUrl,
                    ErrorCode::InvalidUrl.default_message(),
                ));
            }
            method
        }
        None => verb,
    };

    Ok(ParsedTarget {
        action,
        profile: profile.to_string(),
        interface: interface.map(str::to_string),
        attribute: attribute.map(str::to_string),
    })
}

/// Origin of the request: the native header wins over the web header.
pub fn extract_origin(headers: &header::HeaderMap) -> Option<String> {
    headers
        .get("x-gotapi-origin")
        .or_else(|| headers.get(header::ORIGIN))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Axum handler behind `/{api}` and `/{api}/{*path}`.
pub async fn handle(State(state): State<Arc<AppState>>, request: Request) -> Response {
    match handle_inner(state, request).await {
        Ok(response) => response,
        Err(rejection) => {
            debug!(code = rejection.code.code(), status = %rejection.status, "request rejected at transport");
            error_response(rejection.status, rejection.code, &rejection.message)
        }
    }
}

async fn handle_inner(state: Arc<AppState>, request: Request) -> Result<Response, Rejection> {
    let verb = Action::from_method(request.method().as_str()).ok_or_else(|| {
        Rejection::new(
            StatusCode::NOT_IMPLEMENTED,
            ErrorCode::Unknown,
            "Not implements a http method.",
        )
    })?;

    let path = request.uri().path().to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(Rejection::bad_request(ErrorCode::InvalidUrl, "api is empty."));
    }
    // Routing guarantees the api segment matches the configured name.
    let target = parse_target(verb, &segments[1..])?;

    if !state.is_running() {
        return Ok(envelope_response(
            &state,
            CanonicalResponse::error_with_default_message(0, ErrorCode::IllegalServerState),
        ));
    }

    let query = request.uri().query().map(str::to_string);
    let origin = extract_origin(request.headers());

    let mut parameters: Vec<(String, String)> = Vec::new();
    if let Some(query) = query {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            parameters.push((key.into_owned(), value.into_owned()));
        }
    }
    let file = collect_body(&state, request, &mut parameters).await?;

    // The files profile is served by the adapter, never by the router.
    if names_match(&target.profile, PROFILE_FILES) {
        return serve_file(&state, &target, origin.as_deref(), &parameters).await;
    }

    let mut canonical = CanonicalRequest::new(target.action, target.profile);
    canonical.correlation_id = state.correlation.next_correlation_id();
    canonical.api = state.config.api_name.clone();
    canonical.interface = target.interface;
    canonical.attribute = target.attribute;
    canonical.origin = origin;
    canonical.service_id = first_param(&parameters, params::SERVICE_ID);
    canonical.access_token = first_param(&parameters, params::ACCESS_TOKEN);
    canonical.session_key = first_param(&parameters, "sessionKey");
    canonical.file = file;
    canonical.parameters = parameters;

    let response = state.router.dispatch(canonical).await;
    Ok(envelope_response(&state, response))
}

fn first_param(parameters: &[(String, String)], key: &str) -> Option<String> {
    parameters
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
}

/// Merge the request body into the parameter list; returns the persisted
/// file reference when a multipart file part was present.
async fn collect_body(
    state: &AppState,
    request: Request,
    parameters: &mut Vec<(String, String)>,
) -> Result<Option<FileReference>, Rejection> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let bytes = read_body(request.into_body()).await?;
        for (key, value) in url::form_urlencoded::parse(&bytes) {
            parameters.push((key.into_owned(), value.into_owned()));
        }
        return Ok(None);
    }

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &()).await.map_err(|e| {
            Rejection::bad_request(ErrorCode::InvalidRequestParameter, e.to_string())
        })?;
        let mut file = None;
        while let Some(field) = multipart.next_field().await.map_err(|e| {
            Rejection::bad_request(ErrorCode::InvalidRequestParameter, e.to_string())
        })? {
            let name = field.name().unwrap_or_default().to_string();
            if let Some(file_name) = field.file_name().map(str::to_string) {
                // One file per request; later file parts are ignored.
                if file.is_some() {
                    continue;
                }
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field.bytes().await.map_err(|e| {
                    Rejection::bad_request(ErrorCode::InvalidRequestParameter, e.to_string())
                })?;
                let reference = state
                    .files
                    .save(Some(file_name.clone()), content_type, data)
                    .await
                    .map_err(|e| {
                        Rejection::new(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            ErrorCode::Unknown,
                            e.to_string(),
                        )
                    })?;
                parameters.push((params::URI.to_string(), reference.uri.clone()));
                parameters.push((params::FILE_NAME.to_string(), file_name));
                file = Some(reference);
            } else {
                let value = field.text().await.map_err(|e| {
                    Rejection::bad_request(ErrorCode::InvalidRequestParameter, e.to_string())
                })?;
                parameters.push((name, value));
            }
        }
        return Ok(file);
    }

    Ok(None)
}

async fn read_body(body: Body) -> Result<Bytes, Rejection> {
    axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| Rejection::bad_request(ErrorCode::InvalidRequestParameter, e.to_string()))
}

/// GET files?uri=... returns the stored payload raw; every other verb is an
/// error, matching the original adapter.
async fn serve_file(
    state: &AppState,
    target: &ParsedTarget,
    origin: Option<&str>,
    parameters: &[(String, String)],
) -> Result<Response, Rejection> {
    if target.action != Action::Get {
        return Err(Rejection::bad_request(
            ErrorCode::Unknown,
            "Not implements a method.",
        ));
    }
    if let Err(err) = state.validator.validate_origin(origin) {
        return Ok(envelope_response(state, err.to_response(0)));
    }
    let uri = first_param(parameters, params::URI).ok_or_else(|| {
        Rejection::bad_request(ErrorCode::InvalidRequestParameter, "uri is required")
    })?;
    match state.files.read(&uri).await {
        Ok((content_type, data)) => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type)],
            data,
        )
            .into_response()),
        Err(err) => Ok(envelope_response(state, err.to_response(0))),
    }
}

/// Standard JSON envelope: result, product/version, error fields, payload.
pub fn envelope_response(state: &AppState, response: CanonicalResponse) -> Response {
    if let Some(binary) = response.binary {
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, binary.content_type)],
            binary.data,
        )
            .into_response();
    }
    let mut body = Map::new();
    body.insert("result".into(), Value::from(response.result));
    body.insert(
        "product".into(),
        Value::from(state.config.product_name.clone()),
    );
    body.insert("version".into(), Value::from(env!("CARGO_PKG_VERSION")));
    if let Some(code) = response.error_code {
        body.insert("errorCode".into(), Value::from(code.code()));
        body.insert(
            "errorMessage".into(),
            Value::from(
                response
                    .error_message
                    .unwrap_or_else(|| code.default_message().to_string()),
            ),
        );
    }
    for (key, value) in response.payload {
        body.insert(key, value);
    }
    (StatusCode::OK, Json(Value::Object(body))).into_response()
}

fn error_response(status: StatusCode, code: ErrorCode, message: &str) -> Response {
    let body = serde_json::json!({
        "result": 1,
        "errorCode": code.code(),
        "errorMessage": message,
    });
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_paths_parse_with_the_real_verb() {
        let target = parse_target(Action::Put, &["battery", "onchargingchange"]).unwrap();
        assert_eq!(target.action, Action::Put);
        assert_eq!(target.profile, "battery");
        assert_eq!(target.attribute.as_deref(), Some("onchargingchange"));

        let target = parse_target(Action::Get, &["light", "group", "color"]).unwrap();
        assert_eq!(target.interface.as_deref(), Some("group"));
        assert_eq!(target.attribute.as_deref(), Some("color"));
    }

    #[test]
    fn method_segment_is_honored_on_get() {
        let target = parse_target(Action::Get, &["put", "battery", "onchargingchange"]).unwrap();
        assert_eq!(target.action, Action::Put);
        assert_eq!(target.profile, "battery");
    }

    #[test]
    fn method_segment_with_non_get_verb_is_invalid_url() {
        let err = parse_target(Action::Put, &["put", "battery"]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidUrl);
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn missing_profile_is_invalid_url() {
        let err = parse_target(Action::Get, &[]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidUrl);
    }

    #[test]
    fn verb_named_profile_is_invalid_profile() {
        // Two segments: "get" is the profile position, not a method segment.
        let err = parse_target(Action::Get, &["get"]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidProfile);
    }

    #[test]
    fn method_with_interface_and_attribute_parses_fully() {
        let target =
            parse_target(Action::Get, &["delete", "light", "group", "color"]).unwrap();
        assert_eq!(target.action, Action::Delete);
        assert_eq!(target.profile, "light");
        assert_eq!(target.interface.as_deref(), Some("group"));
        assert_eq!(target.attribute.as_deref(), Some("color"));
    }

    #[test]
    fn native_origin_header_wins() {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ORIGIN, "http://web".parse().unwrap());
        headers.insert("x-gotapi-origin", "native-app".parse().unwrap());
        assert_eq!(extract_origin(&headers).as_deref(), Some("native-app"));
    }
}
