//! Login flow error types.

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::storage::StorageError;

/// Errors surfaced by [`LoginCoordinator::login`](super::LoginCoordinator::login).
#[derive(Debug, Error)]
pub enum LoginError {
    /// Another login attempt is already in flight.
    #[error("a login attempt is already in progress")]
    AlreadyInProgress,

    /// The server refused the credentials.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The handshake could not reach the server.
    #[error("login request failed: {0}")]
    NetworkFailure(#[source] GatewayError),

    /// The server answered with something the client cannot use.
    #[error("malformed login response: {0}")]
    MalformedResponse(String),

    /// The authenticated session could not be persisted.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl LoginError {
    /// Whether retrying the same credentials is reasonable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkFailure(GatewayError::Network(_) | GatewayError::Timeout)
        )
    }
}
