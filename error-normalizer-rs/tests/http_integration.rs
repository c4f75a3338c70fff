use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::Path,
    http::{HeaderMap, Request, StatusCode},
    routing::{get, post},
    Json, Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use error_normalizer::{
    http, ErrorReportingRecord, ExceptionChannel, Failure, ForwardError, HttpCollector,
    HttpFailure, LogEvent, LogEventChannel, Normalizer, TelemetryConfig,
};

#[derive(Default)]
struct RecordingCollector {
    records: Mutex<Vec<ErrorReportingRecord>>,
    events: Mutex<Vec<LogEvent>>,
}

#[async_trait]
impl ExceptionChannel for RecordingCollector {
    async fn report_exception(&self, record: ErrorReportingRecord) -> Result<(), ForwardError> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

#[async_trait]
impl LogEventChannel for RecordingCollector {
    async fn report_log_event(&self, event: LogEvent) -> Result<(), ForwardError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

async fn find_item(Path(id): Path<u32>) -> Result<Json<Value>, Failure> {
    if id == 1 {
        return Ok(Json(json!({"id": 1, "name": "widget"})));
    }
    Err(HttpFailure::not_found(json!([format!("Item {} not found", id)])).into())
}

async fn read_config() -> Result<Json<Value>, Failure> {
    let raw = std::fs::read_to_string("/definitely/not/here.toml")?;
    Ok(Json(json!({ "raw": raw })))
}

async fn explode() -> Json<Value> {
    panic!("handler bug");
}

async fn teapot() -> Result<(), HttpFailure> {
    Err(HttpFailure::new(418, "I'm a teapot"))
}

fn app(collector: Arc<RecordingCollector>) -> Router {
    let normalizer = Normalizer::builder().collector(collector).build();
    let router = Router::new()
        .route("/items/:id", get(find_item))
        .route("/config", get(read_config))
        .route("/explode", get(explode))
        .route("/teapot", post(teapot))
        .method_not_allowed_fallback(http::method_not_allowed)
        .fallback(http::route_not_found);
    http::install(router, Arc::new(normalizer))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("cookie", "session=secret")
        .header("x-request-id", "req-1")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn successful_responses_pass_through() {
    let collector = Arc::new(RecordingCollector::default());

    let (status, body) = send(app(collector.clone()), get_request("/items/1")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"id": 1, "name": "widget"}));
    assert!(collector.records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn classified_failure_is_sanitized() {
    let collector = Arc::new(RecordingCollector::default());

    let (status, body) = send(app(collector.clone()), get_request("/items/7?verbose=1")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"message": "Item 7 not found", "code": "NOT_FOUND"}));

    let events = collector.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].path, "/items/7?verbose=1");
    assert_eq!(events[0].message["statusCode"], 404);
    assert_eq!(events[0].message["error"], "Not Found");

    let records = collector.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].request.method, "GET");
    assert_eq!(records[0].request.get_header("x-request-id"), Some("req-1"));
}

#[tokio::test]
async fn io_error_surfaces_as_internal_error() {
    let collector = Arc::new(RecordingCollector::default());

    let (status, body) = send(app(collector.clone()), get_request("/config")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"message": "Internal server error"}));
    assert!(collector.events.lock().unwrap().is_empty());
    assert_eq!(collector.records.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn panics_are_normalized() {
    let collector = Arc::new(RecordingCollector::default());

    let (status, body) = send(app(collector.clone()), get_request("/explode")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"message": "Internal server error"}));

    let records = collector.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].failure.message().contains("handler bug"));
}

#[tokio::test]
async fn string_payload_is_returned_as_is() {
    let collector = Arc::new(RecordingCollector::default());
    let request = Request::builder()
        .method("POST")
        .uri("/teapot")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(app(collector.clone()), request).await;

    assert_eq!(status.as_u16(), 418);
    assert_eq!(body, json!("I'm a teapot"));
    assert_eq!(collector.events.lock().unwrap()[0].message, json!("I'm a teapot"));
}

#[tokio::test]
async fn unmatched_routes_use_the_same_shape() {
    let collector = Arc::new(RecordingCollector::default());

    let (status, body) = send(app(collector), get_request("/nowhere")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"message": "Cannot GET /nowhere", "code": "NOT_FOUND"}));
}

#[tokio::test]
async fn unsupported_methods_are_normalized() {
    let collector = Arc::new(RecordingCollector::default());

    let (status, body) = send(app(collector.clone()), get_request("/teapot")).await;

    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(
        body,
        json!({"message": "Cannot GET /teapot", "code": "METHOD_NOT_ALLOWED"})
    );
    let records = collector.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].response.status_code, 405);
}

#[derive(Clone, Default)]
struct Received {
    posts: Arc<Mutex<Vec<(String, HeaderMap, Value)>>>,
}

async fn spawn_collector() -> (String, Received) {
    let received = Received::default();

    let exceptions = received.clone();
    let logs = received.clone();
    let router = Router::new()
        .route(
            "/v1/exceptions",
            post(move |headers: HeaderMap, Json(body): Json<Value>| async move {
                exceptions
                    .posts
                    .lock()
                    .unwrap()
                    .push(("exceptions".to_string(), headers, body));
                StatusCode::ACCEPTED
            }),
        )
        .route(
            "/v1/logs",
            post(move |headers: HeaderMap, Json(body): Json<Value>| async move {
                logs.posts
                    .lock()
                    .unwrap()
                    .push(("logs".to_string(), headers, body));
                StatusCode::ACCEPTED
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{}", addr), received)
}

#[tokio::test]
async fn http_collector_delivers_both_channels() {
    let (endpoint, received) = spawn_collector().await;
    let config = TelemetryConfig {
        app_name: "orders-api".into(),
        license_key: Some("license-123".into()),
        collector_endpoint: Some(endpoint),
        ..TelemetryConfig::default()
    };
    let collector = Arc::new(HttpCollector::new(&config).unwrap());
    let normalizer = Normalizer::builder()
        .config(&config)
        .collector(collector.clone())
        .build();

    let router = Router::new().route("/items/:id", get(find_item));
    let app = http::install(router, Arc::new(normalizer));

    let (status, body) = send(app, get_request("/items/9")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let posts = received.posts.lock().unwrap();
    assert_eq!(posts.len(), 2);

    let (route, headers, exception) = &posts[0];
    assert_eq!(route, "exceptions");
    assert_eq!(headers.get("x-license-key").unwrap(), "license-123");
    assert_eq!(headers.get("x-app-name").unwrap(), "orders-api");
    assert_eq!(exception["response"]["statusCode"], 404);
    assert_eq!(exception["request"]["headers"]["x-request-id"], "req-1");
    assert!(exception["request"]["headers"].get("cookie").is_none());

    let (route, _, event) = &posts[1];
    assert_eq!(route, "logs");
    assert_eq!(event["level"], "ERROR");
    assert_eq!(event["statusCode"], 404);
    assert_eq!(event["path"], "/items/9");
    assert_eq!(event["message"]["error"], "Not Found");

    assert_eq!(collector.recent_samples().len(), 2);
}

#[tokio::test]
async fn unreachable_collector_does_not_change_response() {
    let config = TelemetryConfig {
        collector_endpoint: Some("http://127.0.0.1:9".into()),
        forward_timeout_ms: 300,
        ..TelemetryConfig::default()
    };
    let normalizer = Normalizer::from_config(&config).unwrap();
    let router = Router::new().route("/items/:id", get(find_item));
    let app = http::install(router, Arc::new(normalizer));

    let (status, body) = send(app, get_request("/items/9")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"message": "Item 9 not found", "code": "NOT_FOUND"}));
}
