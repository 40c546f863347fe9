use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use pressurize_backend::gateway::{InstanceRouter, ModelRegistry};
use pressurize_backend::test_util::{in_memory_store, test_config, TEST_SECRET, TEST_TOKEN};
use pressurize_backend::{routes, AppState, Config};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn collect(body: axum::body::Body) -> Bytes {
    axum::body::to_bytes(body, usize::MAX).await.unwrap()
}

fn gateway(config: Config) -> axum::Router {
    let store = Arc::new(in_memory_store());
    let registry = Arc::new(ModelRegistry::from_config(&config));
    let backend = Arc::new(InstanceRouter::new(registry.clone(), Duration::from_secs(5)).unwrap());
    let state = Arc::new(AppState::with_parts(config, registry, store.clone(), store, backend));
    routes::router(state)
}

async fn gateway_for(server: &MockServer) -> axum::Router {
    let mut config = test_config();
    config.models[0].host = Some(server.uri());
    gateway(config)
}

async fn send(app: &axum::Router, method: http::Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req_builder = http::Request::builder().method(method).uri(uri);
    if body.is_some() {
        req_builder = req_builder.header("Content-Type", "application/json");
    }

    let req = req_builder
        .body(match body {
            Some(b) => axum::body::Body::from(Bytes::from(b.to_string())),
            None => axum::body::Body::empty(),
        })
        .unwrap();

    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = collect(response.into_body()).await;
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn post_raw(app: &axum::Router, uri: &str, body: &'static str) -> (StatusCode, Value) {
    let req = http::Request::builder()
        .method(http::Method::POST)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(axum::body::Body::from(body))
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = collect(response.into_body()).await;
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn call(number: i64) -> Value {
    json!({
        "data": {"number": number},
        "auth_token_key": TEST_TOKEN,
        "auth_secret": TEST_SECRET,
    })
}

async fn mount_classify(server: &MockServer, number: i64, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/api/TestModel/classify/"))
        .and(body_json(json!({"data": {"number": number}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {"number": number + 1}})))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_call_then_cache_hit() {
    let server = MockServer::start().await;
    mount_classify(&server, 42, 1).await;
    let app = gateway_for(&server).await;

    let (status, body) = send(&app, http::Method::POST, "/api/models/TestModel/classify/", Some(call(42))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], json!({"number": 43}));
    assert_eq!(body["from_cache"], json!(false));
    assert_eq!(body["batched"], json!(false));
    assert_eq!(body["cache_time"], json!(-1));
    assert_eq!(body["model"], json!("TestModel"));
    assert_eq!(body["method"], json!("classify"));

    let (status, body) = send(&app, http::Method::POST, "/api/models/TestModel/classify/", Some(call(42))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], json!({"number": 43}));
    assert_eq!(body["from_cache"], json!(true));
    assert!(body["cache_time"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_no_cache_always_calls_downstream() {
    let server = MockServer::start().await;
    mount_classify(&server, 7, 2).await;
    let app = gateway_for(&server).await;

    let mut body = call(7);
    body["no_cache"] = json!(true);
    for _ in 0..2 {
        let (status, reply) =
            send(&app, http::Method::POST, "/api/models/TestModel/classify/", Some(body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["from_cache"], json!(false));
    }
}

#[tokio::test]
async fn test_batched_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/TestModel/batch_predict/"))
        .and(body_json(json!({"requests": [{"data": {"number": 1}}]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"responses": [{"result": {"number": 2}}]})))
        .expect(1)
        .mount(&server)
        .await;
    let app = gateway_for(&server).await;

    let (status, body) = send(&app, http::Method::POST, "/api/models/TestModel/predict", Some(call(1))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["batched"], json!(true));
    assert_eq!(body["result"], json!({"number": 2}));
}

#[tokio::test]
async fn test_unknown_model_and_method_are_404() {
    let server = MockServer::start().await;
    let app = gateway_for(&server).await;

    let (status, body) = send(&app, http::Method::POST, "/api/models/Nope/classify/", Some(call(1))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("No known model 'Nope'"));

    let (status, body) = send(&app, http::Method::POST, "/api/models/TestModel/train/", Some(call(1))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("No method 'train' found for model 'TestModel'."));
}

#[tokio::test]
async fn test_malformed_body_is_400() {
    let server = MockServer::start().await;
    let app = gateway_for(&server).await;

    let (status, body) = post_raw(&app, "/api/models/TestModel/classify/", "{\"data\": ").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Failed to parse payload"));
}

#[tokio::test]
async fn test_bad_credentials_are_403() {
    let server = MockServer::start().await;
    let app = gateway_for(&server).await;

    let mut body = call(1);
    body["auth_secret"] = json!("wrong");
    let (status, reply) = send(&app, http::Method::POST, "/api/models/TestModel/classify/", Some(body)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(reply["error"], json!("Invalid authentication token."));

    let (status, _) = send(
        &app,
        http::Method::POST,
        "/api/models/TestModel/classify/",
        Some(json!({"data": {"number": 1}})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, reply) = send(
        &app,
        http::Method::POST,
        "/api/models/TestModel/classify/",
        Some(json!({"auth_token_key": "ghost", "auth_secret": "S"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(reply["error"], json!("Could not find token ghost"));
}

#[tokio::test]
async fn test_auth_disabled() {
    let server = MockServer::start().await;
    mount_classify(&server, 3, 1).await;
    let mut config = test_config();
    config.models[0].host = Some(server.uri());
    config.auth.enabled = false;
    let app = gateway(config);

    let (status, body) = send(
        &app,
        http::Method::POST,
        "/api/models/TestModel/classify/",
        Some(json!({"data": {"number": 3}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], json!({"number": 4}));
}

#[tokio::test]
async fn test_model_error_is_500_with_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/TestModel/classify/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "Exception: bad input"})))
        .mount(&server)
        .await;
    let app = gateway_for(&server).await;

    let (status, body) = send(&app, http::Method::POST, "/api/models/TestModel/classify/", Some(call(1))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], json!("Exception: bad input"));
}

#[tokio::test]
async fn test_list_models_and_health() {
    let server = MockServer::start().await;
    let app = gateway_for(&server).await;

    let (status, body) = send(&app, http::Method::GET, "/api/models", None).await;
    assert_eq!(status, StatusCode::OK);
    let models = body["models"].as_array().unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0]["name"], json!("TestModel"));
    assert_eq!(
        models[0]["methods"],
        json!([{"name": "classify", "batch": false}, {"name": "predict", "batch": true}])
    );

    let (status, body) = send(&app, http::Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
    assert_eq!(body["models"], json!(1));
}

#[tokio::test]
async fn test_metrics_count_calls() {
    let server = MockServer::start().await;
    mount_classify(&server, 42, 1).await;
    let app = gateway_for(&server).await;

    send(&app, http::Method::POST, "/api/models/TestModel/classify/", Some(call(42))).await;
    send(&app, http::Method::POST, "/api/models/TestModel/classify/", Some(call(42))).await;

    let req = http::Request::builder()
        .uri("/metrics")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(collect(response.into_body()).await.to_vec()).unwrap();
    assert!(text.contains("pressurize_requests_total 2"));
    assert!(text.contains("pressurize_cache_hits_total 1"));
    assert!(text.contains("pressurize_direct_calls_total 1"));
}
