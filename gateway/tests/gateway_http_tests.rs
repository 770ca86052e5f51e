//! End-to-end HTTP tests
//!
//! Drive the full route table with in-memory requests: URL grammar, the
//! response envelope, origin and token enforcement, service id
//! qualification and the aggregated service discovery.

mod support;

use axum::http::StatusCode;
use devicehub_plugin_api::CanonicalResponse;
use serde_json::Value;

use devicehub_gateway::GatewayConfig;

use support::{answer_handshake, call, get, get_with_origin, request, spawn_app, test_config};

/// Battery plugin echoing what the gateway delivered to it.
fn echo_battery(request: devicehub_plugin_api::CanonicalRequest) -> Option<CanonicalResponse> {
    if let Some(response) = answer_handshake(&request) {
        return Some(response);
    }
    Some(
        CanonicalResponse::ok(request.correlation_id)
            .with_field("level", Value::from(72))
            .with_field("seenAction", Value::from(request.action.as_str()))
            .with_field(
                "seenServiceId",
                Value::from(request.service_id.unwrap_or_default()),
            ),
    )
}

#[tokio::test]
async fn availability_envelope_carries_product_and_version() {
    let (app, _state) = spawn_app(test_config()).await;
    let (status, json) = call(&app, get("/gotapi/availability")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], 0);
    assert_eq!(json["product"], "Devicehub");
    assert!(json["version"].is_string());
    assert_eq!(json["running"], true);
}

#[tokio::test]
async fn unknown_profile_falls_through_to_plugin_delivery() {
    let (app, _state) = spawn_app(test_config()).await;

    // Not a builtin, so the service id gates the request before anything else.
    let (status, json) = call(&app, get("/gotapi/teleporter")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], 1);
    assert_eq!(json["errorCode"], 5);

    let (_, json) = call(&app, get("/gotapi/teleporter?serviceId=svc1.ghost")).await;
    assert_eq!(json["errorCode"], 6);
}

#[tokio::test]
async fn plugin_profile_requires_a_service_id() {
    let (app, state) = spawn_app(test_config()).await;
    support::spawn_scripted_plugin(&state, "pluginA", &["battery"], echo_battery);

    let (_, json) = call(&app, get("/gotapi/battery")).await;
    assert_eq!(json["errorCode"], 5);

    let (_, json) = call(&app, get("/gotapi/battery?serviceId=svc1.ghost")).await;
    assert_eq!(json["errorCode"], 6);
}

#[tokio::test]
async fn qualified_service_id_is_unqualified_for_the_plugin() {
    let (app, state) = spawn_app(test_config()).await;
    support::spawn_scripted_plugin(&state, "pluginA", &["battery"], echo_battery);

    let (status, json) = call(&app, get("/gotapi/battery?serviceId=svc1.pluginA")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], 0);
    assert_eq!(json["level"], 72);
    assert_eq!(json["seenServiceId"], "svc1");
}

#[tokio::test]
async fn method_segment_is_honored_for_get_requests() {
    let (app, state) = spawn_app(test_config()).await;
    support::spawn_scripted_plugin(&state, "pluginA", &["battery"], echo_battery);

    let (_, json) = call(
        &app,
        get("/gotapi/put/battery/onchargingchange?serviceId=svc1.pluginA"),
    )
    .await;
    assert_eq!(json["result"], 0);
    assert_eq!(json["seenAction"], "PUT");
}

#[tokio::test]
async fn method_segment_with_a_real_verb_is_an_invalid_url() {
    let (app, _state) = spawn_app(test_config()).await;
    let (status, json) = call(
        &app,
        request("PUT", "/gotapi/put/battery?serviceId=svc1.pluginA"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["errorCode"], 19);
}

#[tokio::test]
async fn unsupported_http_verb_is_not_implemented() {
    let (app, _state) = spawn_app(test_config()).await;
    let (status, json) = call(&app, request("PATCH", "/gotapi/battery")).await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(json["errorCode"], 1);
}

#[tokio::test]
async fn missing_origin_is_rejected_when_required() {
    let (app, _state) = spawn_app(GatewayConfig {
        require_origin: true,
        ..test_config()
    })
    .await;
    let (_, json) = call(&app, get("/gotapi/availability")).await;
    assert_eq!(json["errorCode"], 18);

    let (_, json) = call(&app, get_with_origin("/gotapi/availability", "http://app")).await;
    assert_eq!(json["result"], 0);
}

#[tokio::test]
async fn grant_and_token_flow_unlocks_plugin_profiles() {
    let (app, state) = spawn_app(GatewayConfig {
        enable_token_check: true,
        ..test_config()
    })
    .await;
    support::spawn_scripted_plugin(&state, "pluginA", &["battery"], echo_battery);

    // Exempt profile works untokened, plugin profile does not.
    let (_, json) = call(&app, get_with_origin("/gotapi/availability", "http://app")).await;
    assert_eq!(json["result"], 0);
    let (_, json) = call(
        &app,
        get_with_origin("/gotapi/battery?serviceId=svc1.pluginA", "http://app"),
    )
    .await;
    assert_eq!(json["errorCode"], 13);

    let (_, json) = call(
        &app,
        get_with_origin("/gotapi/authorization/grant", "http://app"),
    )
    .await;
    let client_id = json["clientId"].as_str().unwrap().to_string();

    let (_, json) = call(
        &app,
        get_with_origin(
            &format!("/gotapi/authorization/accessToken?clientId={client_id}&scope=battery"),
            "http://app",
        ),
    )
    .await;
    let token = json["accessToken"].as_str().unwrap().to_string();

    let (_, json) = call(
        &app,
        get_with_origin(
            &format!("/gotapi/battery?serviceId=svc1.pluginA&accessToken={token}"),
            "http://app",
        ),
    )
    .await;
    assert_eq!(json["result"], 0);
    assert_eq!(json["level"], 72);
}

#[tokio::test]
async fn token_scope_is_enforced_per_profile() {
    let (app, state) = spawn_app(GatewayConfig {
        enable_token_check: true,
        ..test_config()
    })
    .await;
    support::spawn_scripted_plugin(&state, "pluginA", &["battery"], echo_battery);

    let (_, json) = call(
        &app,
        get_with_origin("/gotapi/authorization/grant", "http://app"),
    )
    .await;
    let client_id = json["clientId"].as_str().unwrap().to_string();
    let (_, json) = call(
        &app,
        get_with_origin(
            &format!("/gotapi/authorization/accessToken?clientId={client_id}&scope=light"),
            "http://app",
        ),
    )
    .await;
    let token = json["accessToken"].as_str().unwrap().to_string();

    let (_, json) = call(
        &app,
        get_with_origin(
            &format!("/gotapi/battery?serviceId=svc1.pluginA&accessToken={token}"),
            "http://app",
        ),
    )
    .await;
    assert_eq!(json["errorCode"], 14);
}

#[tokio::test]
async fn discovery_aggregates_across_plugins() {
    let (app, state) = spawn_app(test_config()).await;
    for plugin_id in ["pluginA", "pluginB"] {
        support::spawn_scripted_plugin(&state, plugin_id, &["battery"], move |request| {
            if let Some(response) = answer_handshake(&request) {
                return Some(response);
            }
            Some(
                CanonicalResponse::ok(request.correlation_id).with_field(
                    "services",
                    serde_json::json!([{"id": "svc1", "name": "Sensor"}]),
                ),
            )
        });
    }

    let (status, json) = call(&app, get("/gotapi/servicediscovery")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], 0);
    let mut ids: Vec<&str> = json["services"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["svc1.pluginA", "svc1.pluginB"]);
    // config defaults to the plugin's display name.
    assert!(json["services"][0]["config"].as_str().unwrap().ends_with("plugin"));
}

#[tokio::test]
async fn system_profile_lists_registered_plugins() {
    let (app, state) = spawn_app(test_config()).await;
    support::spawn_scripted_plugin(&state, "pluginA", &["battery", "light"], echo_battery);

    let (_, json) = call(&app, get("/gotapi/system")).await;
    assert_eq!(json["result"], 0);
    assert_eq!(json["plugins"][0]["pluginId"], "pluginA");
    assert_eq!(json["plugins"][0]["profiles"][0], "battery");
}
