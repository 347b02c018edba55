//! Local authentication session state.
//!
//! [`SessionStore`] owns the token, its expiry, and the cached user profile.
//! It never makes network calls; validity is derived purely from durable
//! state and the clock. Expired sessions are evicted lazily the first time
//! validity is checked past the expiry instant.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use pomelo_core::UserProfile;

use crate::storage::{KeyValueStore, StorageError, keys};

/// Cached copy of the durable session fields.
#[derive(Debug, Clone)]
struct CachedSession {
    token: SecretString,
    expires_at: DateTime<Utc>,
    profile: Option<UserProfile>,
}

/// Supplies the current session token to outbound requests.
///
/// Implemented by [`SessionStore`]; the HTTP gateway asks for the token on
/// every request so a mid-flight login or logout is picked up immediately.
pub trait TokenProvider: Send + Sync {
    /// The current valid token, if any.
    fn token(&self) -> Option<String>;
}

impl<T: TokenProvider + ?Sized> TokenProvider for std::sync::Arc<T> {
    fn token(&self) -> Option<String> {
        (**self).token()
    }
}

/// Owner of the authentication session.
///
/// All three durable fields (token, expiry, profile) are committed together;
/// a partial persistence failure is rolled back and reported, so callers
/// never observe a half-written session.
#[derive(Debug)]
pub struct SessionStore<S> {
    store: S,
    cache: RwLock<Option<CachedSession>>,
}

impl<S: KeyValueStore> SessionStore<S> {
    /// Create a session store over durable storage.
    pub const fn new(store: S) -> Self {
        Self {
            store,
            cache: RwLock::new(None),
        }
    }

    /// Commit a new session: token, expiry (`now + ttl`), and profile.
    ///
    /// Fields are written token → expiry → profile. If a later write fails,
    /// the earlier writes are rolled back and the commit reports failure;
    /// from the caller's perspective the commit is all-or-nothing.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if any field fails to persist. The prior
    /// session state, if any, is no longer guaranteed after a failed commit;
    /// callers should treat the session as logged out.
    pub fn commit(
        &self,
        token: &str,
        ttl: Duration,
        profile: Option<UserProfile>,
    ) -> Result<(), StorageError> {
        let issued_at = Utc::now();
        let expires_at = issued_at + ttl;

        self.store
            .set_json(keys::TOKEN, &token)
            .and_then(|()| self.store.set_json(keys::TOKEN_EXPIRES_AT, &expires_at))
            .and_then(|()| match &profile {
                Some(profile) => self.store.set_json(keys::USER_PROFILE, profile),
                None => self.store.remove(keys::USER_PROFILE),
            })
            .inspect_err(|e| {
                warn!(error = %e, "session commit failed, rolling back partial writes");
                self.rollback();
            })?;

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        *cache = Some(CachedSession {
            token: SecretString::from(token.to_string()),
            expires_at,
            profile,
        });
        Ok(())
    }

    /// Whether a valid session exists: token present and not yet expired.
    ///
    /// As a side effect, a token found expired is evicted (all session
    /// fields removed) before this returns `false`.
    pub fn is_valid(&self) -> bool {
        let (token, expires_at) = match self.read_durable() {
            Ok(fields) => fields,
            Err(e) => {
                warn!(error = %e, "session read failed, treating as logged out");
                return false;
            }
        };

        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return false;
        };
        let Some(expires_at) = expires_at else {
            return false;
        };

        if Utc::now() >= expires_at {
            debug!("session token expired, evicting");
            if let Err(e) = self.clear() {
                warn!(error = %e, "failed to evict expired session");
            }
            return false;
        }

        // Re-populate the cache after process restarts.
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if cache.is_none() {
            let profile = self
                .store
                .get_json(keys::USER_PROFILE)
                .unwrap_or_default();
            *cache = Some(CachedSession {
                token: SecretString::from(token),
                expires_at,
                profile,
            });
        }
        true
    }

    /// Remove the session from durable storage and the in-memory cache.
    ///
    /// # Errors
    ///
    /// Returns the first [`StorageError`] encountered; all fields are still
    /// attempted.
    pub fn clear(&self) -> Result<(), StorageError> {
        {
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            *cache = None;
        }

        let results = [
            self.store.remove(keys::TOKEN),
            self.store.remove(keys::TOKEN_EXPIRES_AT),
            self.store.remove(keys::USER_PROFILE),
        ];
        results.into_iter().collect()
    }

    /// The cached profile, only while the session is valid.
    pub fn current_profile(&self) -> Option<UserProfile> {
        if !self.is_valid() {
            return None;
        }
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache.as_ref().and_then(|s| s.profile.clone())
    }

    /// Time until expiry, floored at zero.
    pub fn remaining_time(&self) -> Duration {
        if !self.is_valid() {
            return Duration::zero();
        }
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache
            .as_ref()
            .map_or_else(Duration::zero, |s| {
                (s.expires_at - Utc::now()).max(Duration::zero())
            })
    }

    fn read_durable(
        &self,
    ) -> Result<(Option<String>, Option<DateTime<Utc>>), StorageError> {
        let token = self.store.get_json(keys::TOKEN)?;
        let expires_at = self.store.get_json(keys::TOKEN_EXPIRES_AT)?;
        Ok((token, expires_at))
    }

    /// Best-effort removal of partially committed fields.
    fn rollback(&self) {
        for key in [keys::TOKEN, keys::TOKEN_EXPIRES_AT, keys::USER_PROFILE] {
            if let Err(e) = self.store.remove(key) {
                warn!(key, error = %e, "session rollback could not remove key");
            }
        }
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        *cache = None;
    }
}

impl<S: KeyValueStore> TokenProvider for SessionStore<S> {
    fn token(&self) -> Option<String> {
        if !self.is_valid() {
            return None;
        }
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache
            .as_ref()
            .map(|s| s.token.expose_secret().to_string())
    }
}
