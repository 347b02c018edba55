//! Cart synchronization error types.

use thiserror::Error;

use pomelo_core::ProductId;

use crate::gateway::GatewayError;
use crate::storage::StorageError;

/// The cart operation that produced an error.
///
/// Carried inside [`CartSyncError`] so the caller knows which mutation to
/// retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartOp {
    Add,
    UpdateQuantity,
    Remove,
    ToggleSelected,
    SelectAll,
    Clear,
    Refresh,
    Merge,
}

impl std::fmt::Display for CartOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Add => "add",
            Self::UpdateQuantity => "quantity update",
            Self::Remove => "removal",
            Self::ToggleSelected => "selection toggle",
            Self::SelectAll => "select-all",
            Self::Clear => "clear",
            Self::Refresh => "refresh",
            Self::Merge => "merge",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by cart mutations.
///
/// Remote-mode failures always describe state that has already been settled:
/// per-line mutations are rolled back to their pre-call snapshot before the
/// error is returned, so the in-memory cart never diverges permanently from
/// the server.
#[derive(Debug, Error)]
pub enum CartSyncError {
    /// A per-line remote mutation failed; the optimistic local change was
    /// rolled back.
    #[error("cart {op} for product {product_id} failed: {source}")]
    Line {
        op: CartOp,
        product_id: ProductId,
        #[source]
        source: GatewayError,
    },

    /// A whole-cart remote operation failed.
    #[error("cart {op} failed: {source}")]
    Cart {
        op: CartOp,
        #[source]
        source: GatewayError,
    },

    /// Durable storage failed; the in-memory cart keeps its previous state.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Checkout was requested with no lines selected.
    #[error("no cart lines are selected")]
    NothingSelected,
}

impl CartSyncError {
    /// The underlying gateway error, for remote failures.
    #[must_use]
    pub const fn gateway_error(&self) -> Option<&GatewayError> {
        match self {
            Self::Line { source, .. } | Self::Cart { source, .. } => Some(source),
            Self::Storage(_) | Self::NothingSelected => None,
        }
    }

    /// Whether the server rejected the session token.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self.gateway_error(), Some(GatewayError::Unauthorized))
    }

    /// Whether retrying the same mutation is reasonable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.gateway_error(),
            Some(GatewayError::Network(_) | GatewayError::Timeout)
        )
    }
}
