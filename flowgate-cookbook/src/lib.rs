//! A small storefront wired through flowgate.
//!
//! The service is transport-agnostic: [`DemoRequest`] carries the method, path,
//! query and JSON body an HTTP adapter would extract, and [`DemoResponse`] is a
//! status code plus a JSON body. Every route sits behind one
//! [`AdmissionLayer`]:
//!
//! | route              | resource key                       | when blocked          |
//! |--------------------|------------------------------------|-----------------------|
//! | `POST /orders`     | `POST:/orders`                     | 200, queued (fallback)|
//! | `GET /orders/:id`  | `GET:/orders/:id`                  | 429                   |
//! | `POST /seckill`    | see below                          | 429                   |
//! | `GET /products`    | `GET:/products`                    | 429                   |
//! | `POST /admin/rule` | `POST:/admin/rule`                 | 429                   |
//! | `GET /health`      | `GET:/health`                      | 429                   |
//!
//! A flash sale with a `product_id` is keyed `POST:/seckill:{product_id}` when
//! a rule governs that product, otherwise it counts against the route-wide
//! `POST:/seckill` quota.
//!
//! `POST /admin/rule` accepts `{"resource": "...", "threshold": n}` and changes
//! the quota of the running engine. It performs no authorization.

use std::collections::HashMap;
use std::convert::Infallible;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use flowgate::resource::{param_or_route_key, route_key};
use flowgate::{
    AdminError, AdmissionEngine, AdmissionLayer, AdmissionService, Blocked, FallbackFn, RuleAdmin,
    UpdateRuleRequest,
};
use futures::future::BoxFuture;
use rand::Rng;
use serde_json::{json, Value};
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, info};

/// Incoming request as seen by the demo service.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DemoRequest {
    /// HTTP method, upper case.
    pub method: String,
    /// Concrete request path, e.g. `/orders/42`.
    pub path: String,
    /// Decoded query string.
    pub query: HashMap<String, String>,
    /// Decoded JSON body, if any.
    pub body: Option<Value>,
}

impl DemoRequest {
    /// `GET path`.
    pub fn get(path: impl Into<String>) -> Self {
        Self { method: "GET".into(), path: path.into(), ..Self::default() }
    }

    /// `POST path` with a JSON body.
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self { method: "POST".into(), path: path.into(), body: Some(body), ..Self::default() }
    }

    /// Add a query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Route template matched by this request, if any.
    pub fn route(&self) -> Option<&'static str> {
        match_route(&self.method, &self.path)
    }

    /// String parameter looked up in the JSON body first, then the query.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|body| body.get(name))
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .or_else(|| self.query.get(name).map(String::as_str).filter(|v| !v.is_empty()))
    }
}

/// Response produced by the demo service.
#[derive(Clone, Debug, PartialEq)]
pub struct DemoResponse {
    /// HTTP status code.
    pub status: u16,
    /// JSON body.
    pub body: Value,
}

impl DemoResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn envelope(status: u16, code: i64, message: &str, data: Value) -> Self {
        Self {
            status,
            body: json!({
                "code": code,
                "message": message,
                "data": data,
                "timestamp": unix_secs(),
            }),
        }
    }

    fn error(status: u16, error: impl Into<String>) -> Self {
        Self { status, body: json!({ "error": error.into() }) }
    }

    /// Envelope `code` field, if present.
    pub fn code(&self) -> Option<i64> {
        self.body.get("code").and_then(Value::as_i64)
    }

    /// Envelope `message` field, if present.
    pub fn message(&self) -> Option<&str> {
        self.body.get("message").and_then(Value::as_str)
    }
}

/// Route template for `method` and `path`.
pub fn match_route(method: &str, path: &str) -> Option<&'static str> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match (method, segments.as_slice()) {
        ("POST", ["orders"]) => Some("/orders"),
        ("GET", ["orders", id]) if !id.is_empty() => Some("/orders/:id"),
        ("POST", ["seckill"]) => Some("/seckill"),
        ("GET", ["products"]) => Some("/products"),
        ("POST", ["admin", "rule"]) => Some("/admin/rule"),
        ("GET", ["health"]) => Some("/health"),
        _ => None,
    }
}

/// Candidate resource key of a request. Flash sales are keyed per `product_id`.
pub fn resource_of(req: &DemoRequest) -> String {
    let route = req.route().unwrap_or("");
    if route == "/seckill" {
        return param_or_route_key(&req.method, route, &req.path, req.param("product_id"));
    }
    route_key(&req.method, route, &req.path)
}

/// Resource key under the rules of `engine`: a per-product flash-sale key is
/// only used while a rule governs it.
pub fn storefront_key(engine: &AdmissionEngine, req: &DemoRequest) -> String {
    let key = resource_of(req);
    if req.route() == Some("/seckill") && engine.rule(&key).is_none() {
        return route_key(&req.method, "/seckill", &req.path);
    }
    key
}

/// Answer for a blocked request: order creation degrades to a queued
/// acknowledgement, everything else gets 429.
pub fn blocked_response(req: &DemoRequest, blocked: &Blocked) -> DemoResponse {
    debug!(target: "flowgate_cookbook", resource = blocked.resource(), "serving blocked response");
    if req.method == "POST" && req.route() == Some("/orders") {
        return DemoResponse::envelope(
            200,
            0,
            "service busy: your order is queued, check back shortly",
            Value::Null,
        );
    }
    DemoResponse::envelope(429, 429, "too many requests, please retry later", Value::Null)
}

/// Route handlers. Clones share the engine behind the admin route.
#[derive(Clone, Debug)]
pub struct OrderService {
    admin: RuleAdmin,
    simulate_latency: bool,
}

impl OrderService {
    /// Handlers administering `engine`; with `simulate_latency` each handler
    /// sleeps a few random milliseconds.
    pub fn new(engine: AdmissionEngine, simulate_latency: bool) -> Self {
        Self { admin: RuleAdmin::new(engine), simulate_latency }
    }

    fn update_rule(&self, req: &DemoRequest) -> DemoResponse {
        let raw = match &req.body {
            Some(body) => body.to_string(),
            None => return DemoResponse::error(400, "request body is required"),
        };
        let request = match UpdateRuleRequest::from_json(raw.as_bytes()) {
            Ok(request) => request,
            Err(e) => return DemoResponse::error(400, e.to_string()),
        };
        let (resource, threshold) = (request.resource.clone(), request.threshold);
        match self.admin.execute(request.into_command()) {
            Ok(_) => {
                info!(target: "flowgate_cookbook", %resource, threshold, "rule updated via admin route");
                DemoResponse::ok(json!({
                    "message": "rule updated",
                    "resource": resource,
                    "threshold": threshold,
                }))
            }
            Err(e @ AdminError::Validation(_)) => DemoResponse::error(400, e.to_string()),
            Err(e) => DemoResponse::error(500, format!("rule update failed: {e}")),
        }
    }
}

fn unix_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn order_id() -> String {
    format!("{}{:04}", unix_secs(), rand::rng().random_range(0..10_000))
}

fn latency(enabled: bool, min_ms: u64, spread_ms: u64) -> Option<Duration> {
    enabled.then(|| Duration::from_millis(min_ms + rand::rng().random_range(0..spread_ms)))
}

impl Service<DemoRequest> for OrderService {
    type Response = DemoResponse;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<DemoResponse, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: DemoRequest) -> Self::Future {
        let simulate = self.simulate_latency;
        let (delay, response) = match req.route() {
            Some("/orders") => (
                latency(simulate, 10, 50),
                DemoResponse::envelope(
                    200,
                    0,
                    "order created",
                    json!({ "order_id": order_id(), "amount": rand::rng().random_range(1.0..1001.0) }),
                ),
            ),
            Some("/orders/:id") => {
                let id = req.path.rsplit('/').next().unwrap_or_default().to_string();
                (
                    latency(simulate, 5, 30),
                    DemoResponse::envelope(
                        200,
                        0,
                        "order found",
                        json!({ "order_id": id, "status": "paid", "amount": 299.99 }),
                    ),
                )
            }
            Some("/seckill") => {
                let product_id = req.param("product_id").map(str::to_string);
                let won = rand::rng().random_range(0..100) > 30;
                let response = if won {
                    DemoResponse::envelope(
                        200,
                        0,
                        "flash sale won",
                        json!({ "product_id": product_id, "order_id": order_id() }),
                    )
                } else {
                    DemoResponse::envelope(200, 1001, "flash sale lost: sold out", Value::Null)
                };
                (latency(simulate, 20, 100), response)
            }
            Some("/products") => (
                latency(simulate, 5, 20),
                DemoResponse::envelope(200, 0, "success", json!(["product1", "product2", "product3"])),
            ),
            Some("/admin/rule") => (None, self.update_rule(&req)),
            Some("/health") => (None, DemoResponse::ok(json!({ "status": "healthy" }))),
            _ => (None, DemoResponse::error(404, format!("no route for {} {}", req.method, req.path))),
        };
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(response)
        })
    }
}

type Extract = Box<dyn Fn(&DemoRequest) -> String + Send + Sync>;
type Degrade = fn(&DemoRequest, &Blocked) -> DemoResponse;

/// The full demo stack: admission control in front of the route handlers.
pub type DemoApp = AdmissionService<OrderService, Extract, FallbackFn<Degrade>>;

/// Build the demo stack over `engine`.
pub fn app(engine: AdmissionEngine, simulate_latency: bool) -> DemoApp {
    let keys = engine.clone();
    let extract: Extract = Box::new(move |req: &DemoRequest| storefront_key(&keys, req));
    AdmissionLayer::new(engine.clone(), extract)
        .with_fallback(blocked_response as Degrade)
        .layer(OrderService::new(engine, simulate_latency))
}

/// Send one request through `app`.
pub async fn handle(app: &DemoApp, req: DemoRequest) -> DemoResponse {
    match app.clone().oneshot(req).await {
        Ok(response) => response,
        Err(e) => DemoResponse::error(500, e.to_string()),
    }
}
