//! In-process mock of the Pomelo commerce API.
//!
//! [`MockApi`] serves the envelope protocol the production backend speaks:
//! every body is `{code, success, message, data}`, the session token rides
//! in the `satoken` header, and a missing or revoked token answers with
//! HTTP 401. Tests point a `Storefront` at [`MockApi::base_url`] and then
//! inspect server state through the accessors here.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};

use pomelo_client::RemoteCartLine;
use pomelo_core::{LineId, ProductId, UserId, UserProfile};

/// Password the mock accepts; everything else is refused in the envelope.
pub const VALID_PASSWORD: &str = "secret";

/// Token lifetime the mock reports, in seconds.
pub const TOKEN_TIMEOUT_SECS: i64 = 3600;

/// Shared state behind the mock's handlers.
#[derive(Default)]
pub struct ApiState {
    token: Mutex<Option<String>>,
    lines: Mutex<Vec<RemoteCartLine>>,
    next_line_id: AtomicI64,
    next_token: AtomicI64,
}

impl ApiState {
    fn locked_lines(&self) -> MutexGuard<'_, Vec<RemoteCartLine>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn locked_token(&self) -> MutexGuard<'_, Option<String>> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let presented = headers.get("satoken").and_then(|v| v.to_str().ok());
        match (presented, self.locked_token().as_deref()) {
            (Some(presented), Some(issued)) => presented == issued,
            _ => false,
        }
    }
}

/// A running mock API bound to an ephemeral local port.
pub struct MockApi {
    addr: SocketAddr,
    state: Arc<ApiState>,
}

impl MockApi {
    /// Bind and serve the mock on `127.0.0.1:0`.
    pub async fn start() -> Self {
        let state = Arc::new(ApiState::default());
        let router = Router::new()
            .route("/user/login", post(login))
            .route("/user/logout", post(logout))
            .route("/cart", get(list_cart).post(add_line).delete(clear_cart))
            .route("/cart/{id}", put(update_line).delete(remove_line))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock api");
        let addr = listener.local_addr().expect("mock api local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self { addr, state }
    }

    /// Base URL clients should be configured with.
    #[must_use]
    pub fn base_url(&self) -> url::Url {
        format!("http://{}/", self.addr)
            .parse()
            .expect("mock api base url")
    }

    /// Server-side cart contents.
    #[must_use]
    pub fn lines(&self) -> Vec<RemoteCartLine> {
        self.state.locked_lines().clone()
    }

    /// Server-side quantity for one product, if carted.
    #[must_use]
    pub fn quantity_of(&self, product_id: i64) -> Option<u32> {
        self.state
            .locked_lines()
            .iter()
            .find(|l| l.product_id == ProductId::new(product_id))
            .map(|l| l.quantity)
    }

    /// Pre-load a server cart line, as if carted from another device.
    pub fn seed_line(&self, product_id: i64, quantity: u32, unit_price: Decimal) {
        let line_id = self.state.next_line_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.locked_lines().push(RemoteCartLine {
            line_id: LineId::new(line_id),
            product_id: ProductId::new(product_id),
            name: format!("product-{product_id}"),
            unit_price,
            quantity,
            selected: true,
        });
    }

    /// Invalidate the issued token; subsequent cart calls answer 401.
    pub fn revoke_token(&self) {
        *self.state.locked_token() = None;
    }

    /// Whether a token is currently issued.
    #[must_use]
    pub fn has_active_token(&self) -> bool {
        self.state.locked_token().is_some()
    }
}

fn ok(data: Value) -> Json<Value> {
    Json(json!({"code": 0, "success": true, "message": "ok", "data": data}))
}

fn refuse(code: i64, message: &str) -> Json<Value> {
    Json(json!({"code": code, "success": false, "message": message}))
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

async fn login(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<LoginRequest>,
) -> Json<Value> {
    if body.password != VALID_PASSWORD {
        return refuse(1001, "bad credentials");
    }
    let token = format!(
        "tok-{}",
        state.next_token.fetch_add(1, Ordering::SeqCst) + 1
    );
    *state.locked_token() = Some(token.clone());
    let profile = UserProfile::new(UserId::new(7), body.username);
    ok(json!({
        "token": token,
        "tokenTimeout": TOKEN_TIMEOUT_SECS,
        "userInfo": profile,
    }))
}

async fn logout(State(state): State<Arc<ApiState>>) -> Json<Value> {
    *state.locked_token() = None;
    ok(Value::Null)
}

async fn list_cart(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let lines = state.locked_lines().clone();
    ok(json!(lines)).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddRequest {
    product_id: ProductId,
    quantity: u32,
}

async fn add_line(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<AddRequest>,
) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut lines = state.locked_lines();
    if let Some(line) = lines.iter_mut().find(|l| l.product_id == body.product_id) {
        line.quantity += body.quantity;
        return ok(json!(line.clone())).into_response();
    }
    let line = RemoteCartLine {
        line_id: LineId::new(state.next_line_id.fetch_add(1, Ordering::SeqCst) + 1),
        product_id: body.product_id,
        name: format!("product-{}", body.product_id),
        unit_price: Decimal::TEN,
        quantity: body.quantity,
        selected: true,
    };
    lines.push(line.clone());
    ok(json!(line)).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest {
    quantity: Option<u32>,
    selected: Option<bool>,
}

async fn update_line(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<UpdateRequest>,
) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut lines = state.locked_lines();
    let Some(line) = lines.iter_mut().find(|l| l.line_id == LineId::new(id)) else {
        return refuse(404, "no such cart line").into_response();
    };
    if let Some(quantity) = body.quantity {
        line.quantity = quantity;
    }
    if let Some(selected) = body.selected {
        line.selected = selected;
    }
    ok(json!(line.clone())).into_response()
}

async fn remove_line(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state
        .locked_lines()
        .retain(|l| l.line_id != LineId::new(id));
    ok(Value::Null).into_response()
}

async fn clear_cart(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.locked_lines().clear();
    ok(Value::Null).into_response()
}
