//! Remote commerce API collaborators.
//!
//! The reconciler and login coordinator talk to the server through the
//! [`RemoteCartGateway`] and [`AuthBackend`] traits. The [`http`] module
//! provides `reqwest`-backed implementations speaking the production REST
//! protocol; tests substitute in-memory fakes.

pub mod http;

pub use http::{HttpAuthBackend, HttpCartGateway, HttpTransport};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use pomelo_core::{LineId, ProductId, UserProfile};

/// Errors from remote calls.
///
/// `Unauthorized` is distinguished so the session layer can force a logout;
/// `Timeout` and `Network` are retryable by the caller; `Rejected` is a
/// terminal business refusal.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport-level failure (connection refused, DNS, TLS, ...).
    #[error("network failure: {0}")]
    Network(String),

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The server rejected the session token (HTTP 401 equivalent).
    #[error("unauthorized")]
    Unauthorized,

    /// The response could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The server processed the request and refused it.
    #[error("rejected by server: {0}")]
    Rejected(String),
}

/// A cart line as the server reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCartLine {
    /// Server-side line ID, used for updates and removals.
    #[serde(rename = "id")]
    pub line_id: LineId,
    /// Product this line refers to.
    pub product_id: ProductId,
    /// Display name.
    pub name: String,
    /// Price per unit.
    pub unit_price: Decimal,
    /// Units in the cart.
    pub quantity: u32,
    /// Whether the line is selected for checkout.
    #[serde(default = "default_selected")]
    pub selected: bool,
}

const fn default_selected() -> bool {
    true
}

/// Partial update for a single cart line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineUpdate {
    /// New quantity, if changing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    /// New selection state, if changing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
}

impl LineUpdate {
    /// Update only the quantity.
    #[must_use]
    pub const fn quantity(quantity: u32) -> Self {
        Self {
            quantity: Some(quantity),
            selected: None,
        }
    }

    /// Update only the selection state.
    #[must_use]
    pub const fn selected(selected: bool) -> Self {
        Self {
            quantity: None,
            selected: Some(selected),
        }
    }
}

/// Async operations against the server-side cart resource.
///
/// All methods may fail with network or authorization errors; a 401
/// equivalent surfaces as [`GatewayError::Unauthorized`].
pub trait RemoteCartGateway: Send + Sync {
    /// Fetch the authoritative cart contents.
    fn list(&self) -> impl Future<Output = Result<Vec<RemoteCartLine>, GatewayError>> + Send;

    /// Add `quantity` units of a product, returning the resulting line.
    fn add(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> impl Future<Output = Result<RemoteCartLine, GatewayError>> + Send;

    /// Apply a partial update to an existing line.
    fn update(
        &self,
        line_id: LineId,
        update: LineUpdate,
    ) -> impl Future<Output = Result<RemoteCartLine, GatewayError>> + Send;

    /// Remove a line.
    fn remove(&self, line_id: LineId) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Empty the cart.
    fn clear(&self) -> impl Future<Output = Result<(), GatewayError>> + Send;
}

/// Login credentials presented to the authentication backend.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Account name.
    pub username: String,
    /// Account password.
    pub password: String,
}

/// Successful authentication handshake result.
#[derive(Debug, Clone)]
pub struct AuthSuccess {
    /// Session token issued by the server.
    pub token: String,
    /// Token lifetime, when the server reports one.
    pub ttl: Option<chrono::Duration>,
    /// Profile of the authenticated user.
    pub profile: UserProfile,
}

/// Opaque authentication handshake. The exact protocol is the backend's
/// concern; the coordinator only needs a token, a TTL, and a profile.
pub trait AuthBackend: Send + Sync {
    /// Authenticate with credentials.
    fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<AuthSuccess, GatewayError>> + Send;

    /// Invalidate the session server-side. Best-effort; callers proceed with
    /// local cleanup regardless of the outcome.
    fn logout(&self) -> impl Future<Output = Result<(), GatewayError>> + Send;
}
