//! Search and browse history persisted in the key-value store.
//!
//! Both histories are most-recent-first, deduplicated, and capped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pomelo_core::{ProductId, ProductSummary};

use super::{KeyValueStore, StorageError, keys};

/// Maximum retained search keywords.
const MAX_SEARCH_ENTRIES: usize = 10;

/// Maximum retained browse entries.
const MAX_BROWSE_ENTRIES: usize = 50;

/// Recent search keywords.
#[derive(Debug)]
pub struct SearchHistory<S> {
    store: S,
}

impl<S: KeyValueStore> SearchHistory<S> {
    /// Create a history view over `store`.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Record a search. Blank keywords are ignored; an existing entry moves
    /// to the front instead of duplicating.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the history cannot be read or written.
    pub fn push(&self, keyword: &str) -> Result<(), StorageError> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(());
        }

        let mut entries = self.entries()?;
        entries.retain(|entry| entry != keyword);
        entries.insert(0, keyword.to_string());
        entries.truncate(MAX_SEARCH_ENTRIES);

        self.store.set_json(keys::SEARCH_HISTORY, &entries)
    }

    /// All keywords, most recent first.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the history cannot be read.
    pub fn entries(&self) -> Result<Vec<String>, StorageError> {
        Ok(self
            .store
            .get_json(keys::SEARCH_HISTORY)?
            .unwrap_or_default())
    }

    /// Remove a single keyword.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the history cannot be read or written.
    pub fn remove(&self, keyword: &str) -> Result<(), StorageError> {
        let mut entries = self.entries()?;
        entries.retain(|entry| entry != keyword);
        self.store.set_json(keys::SEARCH_HISTORY, &entries)
    }

    /// Drop the whole history.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the key cannot be removed.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(keys::SEARCH_HISTORY)
    }
}

/// A recently viewed product with the time it was viewed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowseEntry {
    /// Product data snapshotted at view time.
    #[serde(flatten)]
    pub product: ProductSummary,
    /// When the product was viewed.
    pub browsed_at: DateTime<Utc>,
}

/// Recently viewed products.
#[derive(Debug)]
pub struct BrowseHistory<S> {
    store: S,
}

impl<S: KeyValueStore> BrowseHistory<S> {
    /// Create a history view over `store`.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Record a product view. A repeat view moves the entry to the front
    /// with a fresh timestamp.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the history cannot be read or written.
    pub fn push(&self, product: &ProductSummary) -> Result<(), StorageError> {
        let mut entries = self.entries()?;
        entries.retain(|entry| entry.product.id != product.id);
        entries.insert(
            0,
            BrowseEntry {
                product: product.clone(),
                browsed_at: Utc::now(),
            },
        );
        entries.truncate(MAX_BROWSE_ENTRIES);

        self.store.set_json(keys::BROWSE_HISTORY, &entries)
    }

    /// All entries, most recent first.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the history cannot be read.
    pub fn entries(&self) -> Result<Vec<BrowseEntry>, StorageError> {
        Ok(self
            .store
            .get_json(keys::BROWSE_HISTORY)?
            .unwrap_or_default())
    }

    /// Remove the entry for one product.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the history cannot be read or written.
    pub fn remove(&self, product_id: ProductId) -> Result<(), StorageError> {
        let mut entries = self.entries()?;
        entries.retain(|entry| entry.product.id != product_id);
        self.store.set_json(keys::BROWSE_HISTORY, &entries)
    }

    /// Drop the whole history.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the key cannot be removed.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(keys::BROWSE_HISTORY)
    }
}
