//! Durable key-value storage.
//!
//! The host environment supplies a [`KeyValueStore`] implementation; the
//! library treats each call as atomic and assumes the store serializes its
//! own writes. Values are JSON documents, matching what the original device
//! storage held. Two adapters ship with the crate: [`MemoryStore`] for tests
//! and ephemeral use, and [`JsonFileStore`] for simple durable storage.

mod file;
pub mod history;

pub use file::JsonFileStore;
pub use history::{BrowseEntry, BrowseHistory, SearchHistory};

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Well-known storage keys.
///
/// All persistent client state lives under these keys so that a full reset
/// is a bounded set of removals.
pub mod keys {
    /// Authentication token.
    pub const TOKEN: &str = "token";

    /// Token expiry timestamp (RFC 3339).
    pub const TOKEN_EXPIRES_AT: &str = "token_expires_at";

    /// Cached user profile for the current session.
    pub const USER_PROFILE: &str = "user_profile";

    /// Local-mode cart lines.
    pub const CART: &str = "cart";

    /// Checkout handoff snapshot of the selected cart lines.
    pub const ORDER_DRAFT: &str = "order_draft";

    /// Recent search keywords, most recent first.
    pub const SEARCH_HISTORY: &str = "search_history";

    /// Recently viewed products, most recent first.
    pub const BROWSE_HISTORY: &str = "browse_history";
}

/// Errors that can occur when reading or writing durable storage.
///
/// A failed write leaves the operation that issued it in its last-known-good
/// state; callers never observe half-applied storage mutations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading a key failed at the storage layer.
    #[error("storage read failed for key `{key}`: {reason}")]
    Read { key: String, reason: String },

    /// Writing a key failed at the storage layer.
    #[error("storage write failed for key `{key}`: {reason}")]
    Write { key: String, reason: String },

    /// Removing a key failed at the storage layer.
    #[error("storage remove failed for key `{key}`: {reason}")]
    Remove { key: String, reason: String },

    /// A stored value did not decode as the expected type.
    #[error("stored value for key `{key}` is malformed: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A value could not be encoded for storage.
    #[error("value for key `{key}` could not be encoded: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable synchronous key/value storage supplied by the host environment.
///
/// Implementations must serialize their own writes; the library treats each
/// call as atomic.
pub trait KeyValueStore: Send + Sync {
    /// Read the raw JSON value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying storage fails.
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying storage fails.
    fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    /// Remove `key`. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Remove`] if the underlying storage fails.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Read and decode the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the read fails and
    /// [`StorageError::Decode`] if the stored value does not match `T`.
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError>
    where
        Self: Sized,
    {
        match self.get(key)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| StorageError::Decode {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Encode and store `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Encode`] if encoding fails and
    /// [`StorageError::Write`] if the write fails.
    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError>
    where
        Self: Sized,
    {
        let encoded = serde_json::to_value(value).map_err(|source| StorageError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.set(key, encoded)
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }
}

/// In-memory [`KeyValueStore`] adapter.
///
/// Useful for tests and for hosts that manage durability themselves.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}
