//! Cart state and reconciliation.
//!
//! [`CartReconciler`] owns the in-memory cart and decides, for every
//! mutation, whether it applies to device storage (`Local` mode, no session)
//! or to the server cart (`Remote` mode, valid session). The one-time merge
//! of a pre-login local cart into the server cart happens on
//! [`CartReconciler::on_session_established`].
//!
//! Remote-mode mutations are optimistic: the in-memory cache is updated
//! first, the gateway call runs afterwards, and a failed call rolls the
//! cache back to its pre-mutation snapshot before a [`CartSyncError`] is
//! returned.

mod error;

pub use error::{CartOp, CartSyncError};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use pomelo_core::{CurrencyCode, LineId, Price, ProductId, ProductSummary};

use crate::gateway::{GatewayError, LineUpdate, RemoteCartGateway, RemoteCartLine};
use crate::storage::{KeyValueStore, StorageError, keys};

/// Which backing store currently owns the cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartMode {
    /// No valid session; the cart lives in device storage only.
    Local,
    /// Valid session; the server cart is the source of truth and the
    /// in-memory copy is a cache.
    Remote,
}

/// A single cart line.
///
/// At most one line exists per product. `line_id` is the server-side line
/// identifier and is only present for Remote-mode lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    /// Product this line refers to.
    pub product_id: ProductId,
    /// Server-side line ID, absent for local-only lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_id: Option<LineId>,
    /// Display name.
    pub name: String,
    /// Price per unit.
    pub unit_price: Decimal,
    /// Units in the cart, always >= 1.
    pub quantity: u32,
    /// Whether the line is selected for checkout.
    pub selected: bool,
}

impl CartLine {
    fn from_product(product: &ProductSummary, quantity: u32) -> Self {
        Self {
            product_id: product.id,
            line_id: None,
            name: product.name.clone(),
            unit_price: product.unit_price,
            quantity,
            selected: true,
        }
    }

    fn from_remote(line: RemoteCartLine) -> Self {
        Self {
            product_id: line.product_id,
            line_id: Some(line.line_id),
            name: line.name,
            unit_price: line.unit_price,
            quantity: line.quantity,
            selected: line.selected,
        }
    }

    /// Line subtotal.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Derived cart aggregates, recomputed from the lines on every read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartSummary {
    /// Units across all lines.
    pub total_count: u32,
    /// Price across all lines.
    pub total_price: Decimal,
    /// Units across selected lines.
    pub selected_count: u32,
    /// Price across selected lines.
    pub selected_total: Decimal,
    /// Whether every line is selected (false for an empty cart).
    pub all_selected: bool,
}

/// Snapshot of the selected lines handed to the order flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutDraft {
    /// The selected lines at the time of checkout.
    pub lines: Vec<CartLine>,
    /// Units across the drafted lines.
    pub total_count: u32,
    /// Price across the drafted lines.
    pub total: Price,
    /// When the draft was taken.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct CartState {
    mode: CartMode,
    lines: Vec<CartLine>,
}

/// Pre-mutation snapshot used to roll back a failed optimistic update.
enum LineSnapshot {
    /// The line was newly inserted; revert removes it.
    Inserted,
    /// The line existed and was mutated in place; revert restores the copy.
    Mutated(CartLine),
    /// The line was removed; revert reinserts it at its old position.
    Removed { index: usize, line: CartLine },
}

/// Remote call chosen while the optimistic update was applied.
enum RemoteCall {
    Add(u32),
    Update(LineId, LineUpdate),
    Remove(LineId),
    /// The line never existed server-side; nothing to send.
    None,
}

/// Owner of the in-memory cart and router of cart mutations.
pub struct CartReconciler<S, G> {
    store: S,
    gateway: G,
    state: RwLock<CartState>,
    /// One-shot merge flag; re-armed on logout or on an aborted merge.
    merged: AtomicBool,
    /// Per-product locks serializing in-flight remote calls for a line.
    line_locks: Mutex<HashMap<ProductId, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S: KeyValueStore, G: RemoteCartGateway> CartReconciler<S, G> {
    /// Create a reconciler, hydrating the local cart from durable storage.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the stored cart cannot be read.
    pub fn new(store: S, gateway: G) -> Result<Self, StorageError> {
        let lines = store
            .get_json::<Vec<CartLine>>(keys::CART)?
            .unwrap_or_default();
        Ok(Self {
            store,
            gateway,
            state: RwLock::new(CartState {
                mode: CartMode::Local,
                lines,
            }),
            merged: AtomicBool::new(false),
            line_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Current cart mode.
    pub fn mode(&self) -> CartMode {
        self.read_state().mode
    }

    /// Snapshot of the current cart lines in display order.
    pub fn lines(&self) -> Vec<CartLine> {
        self.read_state().lines.clone()
    }

    /// Aggregates over the current lines.
    pub fn summary(&self) -> CartSummary {
        let state = self.read_state();
        let selected: Vec<&CartLine> = state.lines.iter().filter(|l| l.selected).collect();
        CartSummary {
            total_count: state.lines.iter().map(|l| l.quantity).sum(),
            total_price: state.lines.iter().map(CartLine::line_total).sum(),
            selected_count: selected.iter().map(|l| l.quantity).sum(),
            selected_total: selected.iter().map(|l| l.line_total()).sum(),
            all_selected: !state.lines.is_empty() && selected.len() == state.lines.len(),
        }
    }

    // =========================================================================
    // Session transitions
    // =========================================================================

    /// Merge the local cart into the server cart and switch to Remote mode.
    ///
    /// Runs at most once per login. The merge is additive: quantities for
    /// products present on both sides are summed, local-only products are
    /// added remotely. Individual line failures are logged and skipped; the
    /// merge is best-effort, not transactional.
    ///
    /// # Errors
    ///
    /// Returns a [`CartSyncError`] if the initial remote fetch fails or the
    /// server rejects the session token. In both cases the cart stays Local
    /// and the merge re-arms so a later attempt can retry.
    #[instrument(skip(self))]
    pub async fn on_session_established(&self) -> Result<(), CartSyncError> {
        if self
            .merged
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("cart already merged for this session");
            return Ok(());
        }

        match self.merge().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.merged.store(false, Ordering::SeqCst);
                if e.is_unauthorized() {
                    self.force_local_fallback();
                }
                Err(e)
            }
        }
    }

    async fn merge(&self) -> Result<(), CartSyncError> {
        let local_lines = self.read_state().lines.clone();

        let mut remote = self
            .gateway
            .list()
            .await
            .map_err(|source| CartSyncError::Cart {
                op: CartOp::Merge,
                source,
            })?;

        for line in &local_lines {
            match remote
                .iter_mut()
                .find(|r| r.product_id == line.product_id)
            {
                Some(existing) => {
                    let quantity = existing.quantity.saturating_add(line.quantity);
                    match self
                        .gateway
                        .update(existing.line_id, LineUpdate::quantity(quantity))
                        .await
                    {
                        Ok(updated) => *existing = updated,
                        Err(GatewayError::Unauthorized) => {
                            return Err(CartSyncError::Line {
                                op: CartOp::Merge,
                                product_id: line.product_id,
                                source: GatewayError::Unauthorized,
                            });
                        }
                        Err(e) => {
                            warn!(product_id = %line.product_id, error = %e,
                                "skipping cart line during merge");
                        }
                    }
                }
                None => match self.gateway.add(line.product_id, line.quantity).await {
                    Ok(added) => remote.push(added),
                    Err(GatewayError::Unauthorized) => {
                        return Err(CartSyncError::Line {
                            op: CartOp::Merge,
                            product_id: line.product_id,
                            source: GatewayError::Unauthorized,
                        });
                    }
                    Err(e) => {
                        warn!(product_id = %line.product_id, error = %e,
                            "skipping cart line during merge");
                    }
                },
            }
        }

        // The local durable cart is consumed by the merge. A failed removal
        // is logged rather than failing the merge: the remote updates are
        // already applied and re-running them would double quantities.
        if let Err(e) = self.store.remove(keys::CART) {
            warn!(error = %e, "failed to clear merged local cart from storage");
        }

        let mut state = self.write_state();
        state.mode = CartMode::Remote;
        state.lines = remote.into_iter().map(CartLine::from_remote).collect();
        debug!(line_count = state.lines.len(), "cart merged, now in remote mode");
        Ok(())
    }

    /// Reset to a fresh empty Local cart. Used on logout and on forced
    /// session teardown; the pre-login cart consumed by a merge is not
    /// resurrected.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the durable cart entry cannot be
    /// removed.
    pub fn reset_to_local(&self) -> Result<(), StorageError> {
        {
            let mut state = self.write_state();
            state.mode = CartMode::Local;
            state.lines.clear();
        }
        self.merged.store(false, Ordering::SeqCst);
        self.store.remove(keys::CART)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add units of a product, merging with an existing line by product ID.
    ///
    /// A quantity of zero is treated as one.
    ///
    /// # Errors
    ///
    /// Returns a [`CartSyncError`] if persistence or the remote call fails;
    /// in Remote mode the optimistic change is rolled back first.
    #[instrument(skip(self, product), fields(product_id = %product.id))]
    pub async fn add_item(
        &self,
        product: &ProductSummary,
        quantity: u32,
    ) -> Result<(), CartSyncError> {
        let quantity = quantity.max(1);

        let lock = self.line_lock(product.id);
        let _guard = lock.lock().await;

        if self.mode() == CartMode::Local {
            return self.local_mutate(|lines| {
                if let Some(line) = lines.iter_mut().find(|l| l.product_id == product.id) {
                    line.quantity = line.quantity.saturating_add(quantity);
                } else {
                    lines.push(CartLine::from_product(product, quantity));
                }
            });
        }

        let (snapshot, call) = {
            let mut state = self.write_state();
            if let Some(line) = state
                .lines
                .iter_mut()
                .find(|l| l.product_id == product.id)
            {
                let snapshot = LineSnapshot::Mutated(line.clone());
                line.quantity = line.quantity.saturating_add(quantity);
                let call = line.line_id.map_or(RemoteCall::Add(quantity), |id| {
                    RemoteCall::Update(id, LineUpdate::quantity(line.quantity))
                });
                (snapshot, call)
            } else {
                state.lines.push(CartLine::from_product(product, quantity));
                (LineSnapshot::Inserted, RemoteCall::Add(quantity))
            }
        };

        self.settle(CartOp::Add, product.id, snapshot, call).await
    }

    /// Set the quantity of an existing line. A quantity of zero removes the
    /// line. Missing lines are a no-op.
    ///
    /// # Errors
    ///
    /// Returns a [`CartSyncError`] if persistence or the remote call fails;
    /// in Remote mode the optimistic change is rolled back first.
    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<(), CartSyncError> {
        if quantity == 0 {
            // Quantity invariant: an update to zero is a removal.
            return self.remove_item(product_id).await;
        }

        let lock = self.line_lock(product_id);
        let _guard = lock.lock().await;

        if self.mode() == CartMode::Local {
            return self.local_mutate(|lines| {
                if let Some(line) = lines.iter_mut().find(|l| l.product_id == product_id) {
                    line.quantity = quantity;
                }
            });
        }

        let (snapshot, call) = {
            let mut state = self.write_state();
            let Some(line) = state
                .lines
                .iter_mut()
                .find(|l| l.product_id == product_id)
            else {
                return Ok(());
            };
            let snapshot = LineSnapshot::Mutated(line.clone());
            line.quantity = quantity;
            let call = line.line_id.map_or(RemoteCall::None, |id| {
                RemoteCall::Update(id, LineUpdate::quantity(quantity))
            });
            (snapshot, call)
        };

        self.settle(CartOp::UpdateQuantity, product_id, snapshot, call)
            .await
    }

    /// Remove a line. Missing lines are a no-op.
    ///
    /// # Errors
    ///
    /// Returns a [`CartSyncError`] if persistence or the remote call fails;
    /// in Remote mode the removed line is reinserted at its old position on
    /// failure.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, product_id: ProductId) -> Result<(), CartSyncError> {
        let lock = self.line_lock(product_id);
        let _guard = lock.lock().await;

        if self.mode() == CartMode::Local {
            return self.local_mutate(|lines| {
                lines.retain(|l| l.product_id != product_id);
            });
        }

        let (snapshot, call) = {
            let mut state = self.write_state();
            let Some(index) = state
                .lines
                .iter()
                .position(|l| l.product_id == product_id)
            else {
                return Ok(());
            };
            let line = state.lines.remove(index);
            let call = line.line_id.map_or(RemoteCall::None, RemoteCall::Remove);
            (LineSnapshot::Removed { index, line }, call)
        };

        self.settle(CartOp::Remove, product_id, snapshot, call).await
    }

    /// Flip a line's selection state. Missing lines are a no-op.
    ///
    /// # Errors
    ///
    /// Returns a [`CartSyncError`] if persistence or the remote call fails;
    /// in Remote mode the optimistic change is rolled back first.
    #[instrument(skip(self))]
    pub async fn toggle_selected(&self, product_id: ProductId) -> Result<(), CartSyncError> {
        let selected = {
            let state = self.read_state();
            let Some(line) = state.lines.iter().find(|l| l.product_id == product_id) else {
                return Ok(());
            };
            !line.selected
        };
        self.set_selected(CartOp::ToggleSelected, product_id, selected)
            .await
    }

    /// Select or deselect every line (the cart page's select-all control).
    ///
    /// In Remote mode each changed line is synchronized individually;
    /// failed lines are rolled back one by one and the last failure is
    /// returned after all lines have been attempted.
    ///
    /// # Errors
    ///
    /// Returns a [`CartSyncError`] if persistence or any remote call fails.
    #[instrument(skip(self))]
    pub async fn set_all_selected(&self, selected: bool) -> Result<(), CartSyncError> {
        if self.mode() == CartMode::Local {
            return self.local_mutate(|lines| {
                for line in lines {
                    line.selected = selected;
                }
            });
        }

        let product_ids: Vec<ProductId> = self
            .read_state()
            .lines
            .iter()
            .filter(|l| l.selected != selected)
            .map(|l| l.product_id)
            .collect();

        let mut last_error = None;
        for product_id in product_ids {
            if let Err(e) = self.set_selected(CartOp::SelectAll, product_id, selected).await {
                last_error = Some(e);
            }
        }
        last_error.map_or(Ok(()), Err)
    }

    async fn set_selected(
        &self,
        op: CartOp,
        product_id: ProductId,
        selected: bool,
    ) -> Result<(), CartSyncError> {
        let lock = self.line_lock(product_id);
        let _guard = lock.lock().await;

        if self.mode() == CartMode::Local {
            return self.local_mutate(|lines| {
                if let Some(line) = lines.iter_mut().find(|l| l.product_id == product_id) {
                    line.selected = selected;
                }
            });
        }

        let (snapshot, call) = {
            let mut state = self.write_state();
            let Some(line) = state
                .lines
                .iter_mut()
                .find(|l| l.product_id == product_id)
            else {
                return Ok(());
            };
            if line.selected == selected {
                return Ok(());
            }
            let snapshot = LineSnapshot::Mutated(line.clone());
            line.selected = selected;
            let call = line.line_id.map_or(RemoteCall::None, |id| {
                RemoteCall::Update(id, LineUpdate::selected(selected))
            });
            (snapshot, call)
        };

        self.settle(op, product_id, snapshot, call).await
    }

    /// Empty the cart.
    ///
    /// In Remote mode the cache is emptied immediately and a single remote
    /// clear is fired. A failed remote clear does not restore the removed
    /// lines: clearing is a decisive user action and the stale-empty cache
    /// re-syncs on the next [`refresh`](Self::refresh).
    ///
    /// # Errors
    ///
    /// Returns a [`CartSyncError`] if persistence or the remote call fails.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<(), CartSyncError> {
        if self.mode() == CartMode::Local {
            return self.local_mutate(Vec::clear);
        }

        self.write_state().lines.clear();

        match self.gateway.clear().await {
            Ok(()) => Ok(()),
            Err(GatewayError::Unauthorized) => {
                self.force_local_fallback();
                Err(CartSyncError::Cart {
                    op: CartOp::Clear,
                    source: GatewayError::Unauthorized,
                })
            }
            Err(source) => Err(CartSyncError::Cart {
                op: CartOp::Clear,
                source,
            }),
        }
    }

    /// Re-read the cart from its backing store: durable storage in Local
    /// mode, the server in Remote mode.
    ///
    /// # Errors
    ///
    /// Returns a [`CartSyncError`] if the read fails.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<(), CartSyncError> {
        match self.mode() {
            CartMode::Local => {
                let lines = self
                    .store
                    .get_json::<Vec<CartLine>>(keys::CART)?
                    .unwrap_or_default();
                self.write_state().lines = lines;
                Ok(())
            }
            CartMode::Remote => {
                let remote = self.gateway.list().await.map_err(|source| {
                    let error = CartSyncError::Cart {
                        op: CartOp::Refresh,
                        source,
                    };
                    if error.is_unauthorized() {
                        self.force_local_fallback();
                    }
                    error
                })?;
                self.write_state().lines =
                    remote.into_iter().map(CartLine::from_remote).collect();
                Ok(())
            }
        }
    }

    /// Snapshot the selected lines for the order flow and persist the draft.
    ///
    /// # Errors
    ///
    /// Returns [`CartSyncError::NothingSelected`] if no line is selected,
    /// or a storage error if the draft cannot be persisted. Nothing is
    /// persisted on failure.
    pub fn begin_checkout(&self) -> Result<CheckoutDraft, CartSyncError> {
        let lines: Vec<CartLine> = self
            .read_state()
            .lines
            .iter()
            .filter(|l| l.selected)
            .cloned()
            .collect();
        if lines.is_empty() {
            return Err(CartSyncError::NothingSelected);
        }

        let draft = CheckoutDraft {
            total_count: lines.iter().map(|l| l.quantity).sum(),
            total: Price::new(
                lines.iter().map(CartLine::line_total).sum(),
                CurrencyCode::default(),
            ),
            lines,
            created_at: Utc::now(),
        };
        self.store.set_json(keys::ORDER_DRAFT, &draft)?;
        Ok(draft)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Apply a mutation to the Local cart: mutate a scratch copy, persist
    /// it, and only then commit it to memory, so a storage failure leaves
    /// the last-known-good state untouched.
    fn local_mutate<F: FnOnce(&mut Vec<CartLine>)>(&self, f: F) -> Result<(), CartSyncError> {
        let mut lines = self.read_state().lines.clone();
        f(&mut lines);
        self.store.set_json(keys::CART, &lines)?;
        self.write_state().lines = lines;
        Ok(())
    }

    /// Run the chosen remote call and settle the optimistic update:
    /// confirm the line on success, revert the snapshot on failure.
    async fn settle(
        &self,
        op: CartOp,
        product_id: ProductId,
        snapshot: LineSnapshot,
        call: RemoteCall,
    ) -> Result<(), CartSyncError> {
        let result = match call {
            RemoteCall::Add(quantity) => self.gateway.add(product_id, quantity).await.map(Some),
            RemoteCall::Update(line_id, update) => {
                self.gateway.update(line_id, update).await.map(Some)
            }
            RemoteCall::Remove(line_id) => self.gateway.remove(line_id).await.map(|()| None),
            RemoteCall::None => Ok(None),
        };

        match result {
            Ok(Some(remote)) => {
                self.adopt_remote_line(product_id, remote);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(source) => {
                self.revert(product_id, snapshot);
                if matches!(source, GatewayError::Unauthorized) {
                    self.force_local_fallback();
                }
                Err(CartSyncError::Line {
                    op,
                    product_id,
                    source,
                })
            }
        }
    }

    /// Fold the server's view of a line back into the cache. The server is
    /// authoritative for everything except the selection flag, which keeps
    /// its optimistic value so a server-side default cannot clobber the UI.
    fn adopt_remote_line(&self, product_id: ProductId, remote: RemoteCartLine) {
        let mut state = self.write_state();
        if let Some(line) = state
            .lines
            .iter_mut()
            .find(|l| l.product_id == product_id)
        {
            line.line_id = Some(remote.line_id);
            line.name = remote.name;
            line.unit_price = remote.unit_price;
            line.quantity = remote.quantity;
        }
    }

    fn revert(&self, product_id: ProductId, snapshot: LineSnapshot) {
        let mut state = self.write_state();
        match snapshot {
            LineSnapshot::Inserted => {
                state.lines.retain(|l| l.product_id != product_id);
            }
            LineSnapshot::Mutated(original) => {
                if let Some(line) = state
                    .lines
                    .iter_mut()
                    .find(|l| l.product_id == product_id)
                {
                    *line = original;
                }
            }
            LineSnapshot::Removed { index, line } => {
                let index = index.min(state.lines.len());
                state.lines.insert(index, line);
            }
        }
    }

    /// Drop to a fresh empty Local cart after the server rejected the
    /// session token. The session itself is cleared by the owning layer.
    fn force_local_fallback(&self) {
        warn!("server rejected the session token, resetting to a local cart");
        if let Err(e) = self.reset_to_local() {
            warn!(error = %e, "failed to reset cart after authorization failure");
        }
    }

    fn line_lock(&self, product_id: ProductId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .line_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(product_id).or_default().clone()
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, CartState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, CartState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests;
