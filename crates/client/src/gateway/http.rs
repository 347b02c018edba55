//! `reqwest`-backed gateway and auth backend.
//!
//! Every response travels in the API's JSON envelope
//! `{code, success, message, msg, data}`; a call counts as successful when
//! `code == 0` or `success == true`. The session token rides in the
//! `satoken` header and is re-read from the [`TokenProvider`] on every
//! request, so logins and logouts take effect mid-flight.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use pomelo_core::{LineId, ProductId, UserProfile};

use crate::config::ClientConfig;
use crate::session::TokenProvider;

use super::{
    AuthBackend, AuthSuccess, Credentials, GatewayError, LineUpdate, RemoteCartGateway,
    RemoteCartLine,
};

/// Header carrying the session token.
const TOKEN_HEADER: &str = "satoken";

/// Envelope status code the server uses for an expired or invalid token.
const CODE_UNAUTHORIZED: i64 = 401;

#[derive(Debug, serde::Deserialize)]
struct Envelope<D> {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default = "Option::default")]
    data: Option<D>,
}

impl<D> Envelope<D> {
    fn is_ok(&self) -> bool {
        self.code == Some(0) || self.success == Some(true)
    }

    fn into_message(self) -> String {
        self.message
            .or(self.msg)
            .unwrap_or_else(|| "request refused".to_string())
    }
}

/// Shared HTTP plumbing for the cart gateway and the auth backend.
#[derive(Debug)]
pub struct HttpTransport<T> {
    http: reqwest::Client,
    base_url: Url,
    tokens: T,
}

impl<T: TokenProvider> HttpTransport<T> {
    /// Build a transport from configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`reqwest::Error`] if the underlying HTTP client cannot be
    /// constructed.
    pub fn new(config: &ClientConfig, tokens: T) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: with_trailing_slash(config.api_base_url.clone()),
            tokens,
        })
    }

    async fn send<D: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
    ) -> Result<Option<D>, GatewayError> {
        let builder = self.builder(method, path)?;
        self.execute(builder).await
    }

    async fn send_json<B, D>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<Option<D>, GatewayError>
    where
        B: Serialize + Sync + ?Sized,
        D: DeserializeOwned,
    {
        let builder = self.builder(method, path)?.json(body);
        self.execute(builder).await
    }

    fn builder(
        &self,
        method: Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, GatewayError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| GatewayError::Malformed(format!("invalid request path: {e}")))?;
        let mut builder = self.http.request(method, url);
        if let Some(token) = self.tokens.token() {
            builder = builder.header(TOKEN_HEADER, token);
        }
        Ok(builder)
    }

    async fn execute<D: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<Option<D>, GatewayError> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout
            } else {
                GatewayError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(GatewayError::Unauthorized);
        }
        if status.is_server_error() {
            return Err(GatewayError::Network(format!("server error: {status}")));
        }
        if !status.is_success() {
            return Err(GatewayError::Rejected(format!(
                "unexpected status: {status}"
            )));
        }

        let envelope: Envelope<D> = response
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;

        if envelope.is_ok() {
            return Ok(envelope.data);
        }
        if envelope.code == Some(CODE_UNAUTHORIZED) {
            return Err(GatewayError::Unauthorized);
        }
        Err(GatewayError::Rejected(envelope.into_message()))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddLineRequest {
    product_id: ProductId,
    quantity: u32,
}

/// Cart gateway speaking the REST cart resource.
#[derive(Debug, Clone)]
pub struct HttpCartGateway<T> {
    transport: Arc<HttpTransport<T>>,
}

impl<T> HttpCartGateway<T> {
    /// Create a gateway over a shared transport.
    #[must_use]
    pub const fn new(transport: Arc<HttpTransport<T>>) -> Self {
        Self { transport }
    }
}

impl<T: TokenProvider> RemoteCartGateway for HttpCartGateway<T> {
    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<RemoteCartLine>, GatewayError> {
        let lines: Option<Vec<RemoteCartLine>> =
            self.transport.send(Method::GET, "cart").await?;
        Ok(lines.unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn add(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<RemoteCartLine, GatewayError> {
        let body = AddLineRequest {
            product_id,
            quantity,
        };
        self.transport
            .send_json(Method::POST, "cart", &body)
            .await?
            .ok_or_else(|| GatewayError::Malformed("cart add returned no line".to_string()))
    }

    #[instrument(skip(self))]
    async fn update(
        &self,
        line_id: LineId,
        update: LineUpdate,
    ) -> Result<RemoteCartLine, GatewayError> {
        self.transport
            .send_json(Method::PUT, &format!("cart/{line_id}"), &update)
            .await?
            .ok_or_else(|| GatewayError::Malformed("cart update returned no line".to_string()))
    }

    #[instrument(skip(self))]
    async fn remove(&self, line_id: LineId) -> Result<(), GatewayError> {
        let _: Option<serde_json::Value> = self
            .transport
            .send(Method::DELETE, &format!("cart/{line_id}"))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> Result<(), GatewayError> {
        let _: Option<serde_json::Value> = self.transport.send(Method::DELETE, "cart").await?;
        Ok(())
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginPayload {
    token: String,
    /// Token lifetime in seconds, when the server reports one.
    #[serde(default)]
    token_timeout: Option<i64>,
    user_info: UserProfile,
}

/// Auth backend speaking the REST user resource.
#[derive(Debug, Clone)]
pub struct HttpAuthBackend<T> {
    transport: Arc<HttpTransport<T>>,
}

impl<T> HttpAuthBackend<T> {
    /// Create a backend over a shared transport.
    #[must_use]
    pub const fn new(transport: Arc<HttpTransport<T>>) -> Self {
        Self { transport }
    }
}

impl<T: TokenProvider> AuthBackend for HttpAuthBackend<T> {
    #[instrument(skip_all)]
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<AuthSuccess, GatewayError> {
        let payload: LoginPayload = self
            .transport
            .send_json(Method::POST, "user/login", credentials)
            .await?
            .ok_or_else(|| GatewayError::Malformed("login returned no session".to_string()))?;

        debug!(user_id = %payload.user_info.id, "login handshake succeeded");
        Ok(AuthSuccess {
            token: payload.token,
            ttl: payload.token_timeout.map(chrono::Duration::seconds),
            profile: payload.user_info,
        })
    }

    #[instrument(skip(self))]
    async fn logout(&self) -> Result<(), GatewayError> {
        let _: Option<serde_json::Value> =
            self.transport.send(Method::POST, "user/logout").await?;
        Ok(())
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
