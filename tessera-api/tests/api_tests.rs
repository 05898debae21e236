//! Router-level tests: envelope shape, error rendering, and the
//! integration-credential gate.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use tessera_api::{router, AppState};
use tessera_core::callback::CallbackDispatcher;
use tessera_core::clock::ManualClock;
use tessera_core::{Config, Store};

fn test_state(restrict_access: bool) -> Arc<AppState> {
    let mut config = Config::default();
    config.server.restrict_access = restrict_access;
    let store = Store::in_memory().expect("store");
    AppState::build(
        config,
        store,
        Arc::new(ManualClock::new(1_700_000_000_000)),
        CallbackDispatcher::disabled(),
    )
    .expect("state")
}

async fn post_json(app: &axum::Router, path: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(path)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn system_status_returns_ok_envelope() {
    let app = router(test_state(false));
    let (status, body) = post_json(&app, "/rest/v3/status", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
    assert_eq!(body["responseObject"]["applicationName"], "tessera");
}

#[tokio::test]
async fn error_list_contains_stable_codes() {
    let app = router(test_state(false));
    let (status, body) = post_json(&app, "/rest/v3/error/list", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let errors = body["responseObject"]["errors"].as_array().unwrap();
    assert!(errors
        .iter()
        .any(|e| e["code"] == "ACTIVATION_NOT_FOUND"));
    assert!(errors.iter().any(|e| e["code"] == "CONCURRENCY"));
}

#[tokio::test]
async fn application_lifecycle_over_http() {
    let app = router(test_state(false));

    let (status, body) = post_json(
        &app,
        "/rest/v3/application/create",
        json!({"applicationName": "mobile-bank"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let application_id = body["responseObject"]["id"].as_i64().unwrap();
    assert_eq!(body["responseObject"]["name"], "mobile-bank");
    assert!(body["responseObject"]["masterPublicKey"].as_str().unwrap().len() > 0);

    let (_, list) = post_json(&app, "/rest/v3/application/list", json!({})).await;
    assert_eq!(list["responseObject"].as_array().unwrap().len(), 1);

    let (_, detail) = post_json(
        &app,
        "/rest/v3/application/detail",
        json!({"applicationId": application_id}),
    )
    .await;
    assert_eq!(detail["responseObject"]["versions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn activation_init_and_status_over_http() {
    let app = router(test_state(false));

    let (_, created) = post_json(
        &app,
        "/rest/v3/application/create",
        json!({"applicationName": "app"}),
    )
    .await;
    let application_id = created["responseObject"]["id"].as_i64().unwrap();

    let (status, body) = post_json(
        &app,
        "/rest/v3/activation/init",
        json!({"userId": "alice", "applicationId": application_id}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let activation_id = body["responseObject"]["activationId"].as_str().unwrap().to_string();
    assert_eq!(body["responseObject"]["activationCode"].as_str().unwrap().len(), 23);

    let (_, status_body) = post_json(
        &app,
        "/rest/v3/activation/status",
        json!({"activationId": activation_id}),
    )
    .await;
    assert_eq!(status_body["responseObject"]["activationStatus"], "CREATED");

    // unknown activations come back synthesized, not as an error
    let (code, unknown) = post_json(
        &app,
        "/rest/v3/activation/status",
        json!({"activationId": "00000000-0000-0000-0000-000000000000"}),
    )
    .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(unknown["responseObject"]["activationStatus"], "REMOVED");
    assert_eq!(unknown["responseObject"]["userId"], "unknown");
    assert_eq!(unknown["responseObject"]["applicationId"], 0);
}

#[tokio::test]
async fn service_errors_render_as_error_envelope() {
    let app = router(test_state(false));

    let (status, body) = post_json(
        &app,
        "/rest/v3/activation/init",
        json!({"userId": "", "applicationId": 1}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "ERROR");
    assert_eq!(body["responseError"]["code"], "NO_USER_ID");

    let (status, body) = post_json(
        &app,
        "/rest/v3/activation/commit",
        json!({"activationId": "missing"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["responseError"]["code"], "ACTIVATION_NOT_FOUND");
}

#[tokio::test]
async fn recovery_error_carries_current_puk_index() {
    let app = router(test_state(false));

    let (_, created) = post_json(
        &app,
        "/rest/v3/application/create",
        json!({"applicationName": "app"}),
    )
    .await;
    let application_id = created["responseObject"]["id"].as_i64().unwrap();

    let (_, code_body) = post_json(
        &app,
        "/rest/v3/recovery/create",
        json!({"applicationId": application_id, "userId": "alice", "pukCount": 2}),
    )
    .await;
    let recovery_code = code_body["responseObject"]["recoveryCode"].as_str().unwrap().to_string();

    post_json(
        &app,
        "/rest/v3/recovery/confirm",
        json!({"applicationId": application_id, "recoveryCode": recovery_code}),
    )
    .await;

    let (status, body) = post_json(
        &app,
        "/rest/v3/activation/recovery/create",
        json!({
            "applicationId": application_id,
            "recoveryCode": recovery_code,
            "puk": "0000000000",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["responseError"]["code"], "INVALID_RECOVERY_CODE");
    assert_eq!(body["responseError"]["currentRecoveryPukIndex"], 1);
}

#[tokio::test]
async fn restrict_access_gates_requests() {
    let state = test_state(true);
    // register an integration directly against the service layer
    let integration = state.applications.create_integration("gateway").unwrap();
    let app = router(state);

    // no credentials
    let (status, body) = post_json(&app, "/rest/v3/status", json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "ERROR");

    // wrong credentials
    let bad = BASE64.encode(format!("{}:wrong", integration.client_token));
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/rest/v3/status")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Basic {}", bad))
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // valid credentials
    let good = BASE64.encode(format!(
        "{}:{}",
        integration.client_token, integration.client_secret
    ));
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/rest/v3/status")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Basic {}", good))
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn failed_signature_is_not_a_transport_error() {
    let app = router(test_state(false));

    let (_, created) = post_json(
        &app,
        "/rest/v3/application/create",
        json!({"applicationName": "app"}),
    )
    .await;
    let application_id = created["responseObject"]["id"].as_i64().unwrap();
    let application_key = created["responseObject"]["versions"][0]["applicationKey"]
        .as_str()
        .unwrap()
        .to_string();

    let (_, init) = post_json(
        &app,
        "/rest/v3/activation/init",
        json!({"userId": "alice", "applicationId": application_id}),
    )
    .await;
    let activation_id = init["responseObject"]["activationId"].as_str().unwrap().to_string();

    // a signature against a pending activation is invalid but still 200
    let (status, body) = post_json(
        &app,
        "/rest/v3/signature/verify",
        json!({
            "activationId": activation_id,
            "applicationKey": application_key,
            "data": BASE64.encode(b"data"),
            "signature": "00000000-00000000",
            "signatureType": "possession_knowledge",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
    assert_eq!(body["responseObject"]["signatureValid"], false);
    assert_eq!(body["responseObject"]["activationStatus"], "CREATED");
}
