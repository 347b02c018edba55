//! Login orchestration.
//!
//! [`LoginCoordinator`] drives the full login sequence: single-slot attempt
//! admission, the credential handshake, session persistence, and the
//! post-login cart merge. Logout runs the sequence in reverse, with the
//! server-side invalidation being best-effort.

mod error;

pub use error::LoginError;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Duration;
use tracing::{debug, instrument, warn};

use pomelo_core::UserProfile;

use crate::cart::CartReconciler;
use crate::gateway::{AuthBackend, Credentials, GatewayError, RemoteCartGateway};
use crate::session::SessionStore;
use crate::storage::{KeyValueStore, StorageError};

/// Session lifetime used when the server does not report one.
const DEFAULT_SESSION_TTL_DAYS: i64 = 7;

/// Resets the in-flight flag when an attempt finishes, normally or by panic.
struct AttemptGuard<'a>(&'a AtomicBool);

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Orchestrates login and logout across the session store and the cart.
pub struct LoginCoordinator<S, G, A> {
    backend: A,
    session: Arc<SessionStore<S>>,
    cart: Arc<CartReconciler<S, G>>,
    attempting: AtomicBool,
    default_ttl: Duration,
}

impl<S, G, A> LoginCoordinator<S, G, A>
where
    S: KeyValueStore,
    G: RemoteCartGateway,
    A: AuthBackend,
{
    /// Create a coordinator with the default session lifetime.
    pub fn new(
        backend: A,
        session: Arc<SessionStore<S>>,
        cart: Arc<CartReconciler<S, G>>,
    ) -> Self {
        Self {
            backend,
            session,
            cart,
            attempting: AtomicBool::new(false),
            default_ttl: Duration::days(DEFAULT_SESSION_TTL_DAYS),
        }
    }

    /// Override the fallback session lifetime applied when the server does
    /// not report a token TTL.
    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Whether a valid session currently exists.
    pub fn is_logged_in(&self) -> bool {
        self.session.is_valid()
    }

    /// Log in with credentials.
    ///
    /// An already-valid session short-circuits to its cached profile without
    /// a handshake, after making sure the cart has followed the session into
    /// remote mode (a restarted process resumes a durable session with a
    /// locally hydrated cart). Only one attempt runs at a time; a second
    /// concurrent call fails fast with [`LoginError::AlreadyInProgress`]
    /// rather than queuing. After the session is committed the local cart is
    /// merged into the server cart; a merge failure is logged but does not
    /// fail the login.
    ///
    /// # Errors
    ///
    /// Returns a [`LoginError`] if another attempt is in flight, the server
    /// refuses the credentials, the handshake fails, or the session cannot
    /// be persisted.
    #[instrument(skip_all)]
    pub async fn login(&self, credentials: &Credentials) -> Result<UserProfile, LoginError> {
        if self.session.is_valid() {
            // A restart resumes the durable session while the cart is still
            // hydrated in local mode; the one-shot merge brings it back.
            if let Err(e) = self.cart.on_session_established().await {
                warn!(error = %e, "cart merge for resumed session failed, cart stays local");
            }
            if let Some(profile) = self.session.current_profile() {
                debug!("session already valid, skipping handshake");
                return Ok(profile);
            }
        }

        if self
            .attempting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(LoginError::AlreadyInProgress);
        }
        let _guard = AttemptGuard(&self.attempting);

        let success = self
            .backend
            .authenticate(credentials)
            .await
            .map_err(|e| match e {
                GatewayError::Rejected(reason) => LoginError::InvalidCredentials(reason),
                GatewayError::Unauthorized => {
                    LoginError::InvalidCredentials("unauthorized".to_string())
                }
                GatewayError::Malformed(reason) => LoginError::MalformedResponse(reason),
                e @ (GatewayError::Network(_) | GatewayError::Timeout) => {
                    LoginError::NetworkFailure(e)
                }
            })?;

        if success.token.is_empty() {
            return Err(LoginError::MalformedResponse(
                "server issued an empty token".to_string(),
            ));
        }

        let ttl = success.ttl.unwrap_or(self.default_ttl);
        self.session
            .commit(&success.token, ttl, Some(success.profile.clone()))?;
        debug!(user_id = %success.profile.id, "session committed");

        // The login itself has succeeded; a failed merge leaves the cart
        // local and retryable, which is strictly better than rolling back
        // a working session.
        if let Err(e) = self.cart.on_session_established().await {
            warn!(error = %e, "post-login cart merge failed, cart stays local");
        }

        Ok(success.profile)
    }

    /// Log out: best-effort server invalidation, then local teardown.
    ///
    /// The server call failing never blocks the local cleanup; the token
    /// will age out server-side.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the session or cart state cannot be
    /// removed from durable storage.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<(), StorageError> {
        if let Err(e) = self.backend.logout().await {
            warn!(error = %e, "server-side logout failed, continuing local cleanup");
        }
        self.session.clear()?;
        self.cart.reset_to_local()
    }
}
