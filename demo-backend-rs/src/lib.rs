use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::header::HeaderMap,
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use error_normalizer::{http, Failure, HttpFailure, Normalizer, UnclassifiedFailure};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod validation;

use validation::{
    enforce_payload_limit, payload_limit_config, validate_content_type, ItemValidator, NewItem,
    ValidationSetupError,
};

#[derive(Debug, Clone, Serialize)]
pub struct Item {
    pub id: u64,
    pub name: String,
    pub price_cents: u64,
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub service_name: String,
    pub uptime_seconds: u64,
    pub items: usize,
}

/// Shared application state
pub struct AppState {
    service_name: String,
    started: Instant,
    items: RwLock<BTreeMap<u64, Item>>,
    next_id: AtomicU64,
    validator: ItemValidator,
}

impl AppState {
    pub fn new<S: Into<String>>(service_name: S) -> Result<Self, ValidationSetupError> {
        Ok(Self {
            service_name: service_name.into(),
            started: Instant::now(),
            items: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            validator: ItemValidator::new()?,
        })
    }
}

/// Create the router with all routes and middleware
pub fn create_router(state: Arc<AppState>, normalizer: Arc<Normalizer>) -> Router {
    let routes = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/items", get(list_items).post(create_item))
        .route("/items/:id", get(get_item))
        .route("/teapot", get(teapot_handler))
        .route("/boom", get(boom_handler))
        .route("/panic", get(panic_handler))
        .method_not_allowed_fallback(http::method_not_allowed)
        .fallback(http::route_not_found)
        .layer(payload_limit_config())
        .layer(middleware::from_fn(enforce_payload_limit))
        .with_state(state);

    http::install(routes, normalizer)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}

async fn root_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "service": state.service_name,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "GET /health",
            "GET /items",
            "POST /items",
            "GET /items/:id",
            "GET /teapot",
            "GET /boom",
            "GET /panic"
        ]
    }))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let items = state.items.read().await.len();
    Json(HealthResponse {
        healthy: true,
        service_name: state.service_name.clone(),
        uptime_seconds: state.started.elapsed().as_secs(),
        items,
    })
}

async fn list_items(State(state): State<Arc<AppState>>) -> Json<Vec<Item>> {
    let items = state.items.read().await;
    Json(items.values().cloned().collect())
}

async fn get_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Item>, Failure> {
    let id: u64 = id
        .parse()
        .map_err(|_| HttpFailure::bad_request(vec![format!("id must be a positive integer, got '{}'", id)]))?;

    let items = state.items.read().await;
    match items.get(&id) {
        Some(item) => Ok(Json(item.clone())),
        None => Err(HttpFailure::not_found(vec![format!("Item {} not found", id)]).into()),
    }
}

async fn create_item(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Item>, Failure> {
    validate_content_type(&headers, "application/json")?;

    let Json(payload) = payload.map_err(|rejection| {
        HttpFailure::standard(rejection.status().as_u16(), vec![rejection.body_text()])
    })?;

    let NewItem { name, price_cents, tags } = state.validator.validate(&payload)?;

    let mut items = state.items.write().await;
    if items.values().any(|item| item.name == name) {
        return Err(HttpFailure::conflict(format!("Item '{}' already exists", name)).into());
    }

    let id = state.next_id.fetch_add(1, Ordering::SeqCst);
    let item = Item { id, name, price_cents, tags };
    items.insert(id, item.clone());

    tracing::info!(item_id = id, "Item created");
    Ok(Json(item))
}

async fn teapot_handler() -> Result<(), HttpFailure> {
    Err(HttpFailure::new(418, "I'm a teapot"))
}

async fn boom_handler() -> Result<(), Failure> {
    Err(UnclassifiedFailure::msg("inventory cache is corrupted").into())
}

async fn panic_handler() -> Json<Value> {
    panic!("unexpected state in panic handler");
}
