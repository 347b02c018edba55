use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rust_decimal::Decimal;

use pomelo_core::{LineId, ProductId, ProductSummary};

use super::*;
use crate::gateway::{GatewayError, LineUpdate, RemoteCartGateway, RemoteCartLine};
use crate::storage::{KeyValueStore, MemoryStore, keys};

/// Which error the mock should inject into its next call.
#[derive(Debug, Clone, Copy)]
enum Fail {
    Network,
    Unauthorized,
}

/// In-memory server cart that can inject failures and records call traffic.
struct MockGateway {
    lines: Mutex<Vec<RemoteCartLine>>,
    next_line_id: AtomicI64,
    fail_queue: Mutex<VecDeque<Fail>>,
    fail_list: Mutex<VecDeque<Fail>>,
    list_calls: AtomicUsize,
    clear_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockGateway {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            lines: Mutex::new(Vec::new()),
            next_line_id: AtomicI64::new(100),
            fail_queue: Mutex::new(VecDeque::new()),
            fail_list: Mutex::new(VecDeque::new()),
            list_calls: AtomicUsize::new(0),
            clear_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    fn seed(&self, product_id: i64, quantity: u32, unit_price: &str) {
        let line_id = self.next_line_id.fetch_add(1, Ordering::SeqCst);
        self.locked_lines().push(RemoteCartLine {
            line_id: LineId::new(line_id),
            product_id: ProductId::new(product_id),
            name: format!("product-{product_id}"),
            unit_price: unit_price.parse().expect("decimal"),
            quantity,
            selected: true,
        });
    }

    fn fail_next(&self, fail: Fail) {
        self.fail_queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(fail);
    }

    fn locked_lines(&self) -> std::sync::MutexGuard<'_, Vec<RemoteCartLine>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn server_quantity(&self, product_id: i64) -> Option<u32> {
        self.locked_lines()
            .iter()
            .find(|l| l.product_id == ProductId::new(product_id))
            .map(|l| l.quantity)
    }

    fn fail_next_list(&self, fail: Fail) {
        self.fail_list
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(fail);
    }

    fn take_from(queue: &Mutex<VecDeque<Fail>>) -> Result<(), GatewayError> {
        let fail = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match fail {
            Some(Fail::Network) => Err(GatewayError::Network("injected".to_string())),
            Some(Fail::Unauthorized) => Err(GatewayError::Unauthorized),
            None => Ok(()),
        }
    }

    fn take_fail(&self) -> Result<(), GatewayError> {
        Self::take_from(&self.fail_queue)
    }

    /// Track overlapping calls; yields so concurrent tasks can interleave.
    async fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RemoteCartGateway for Arc<MockGateway> {
    async fn list(&self) -> Result<Vec<RemoteCartLine>, GatewayError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        MockGateway::take_from(&self.fail_list)?;
        Ok(self.locked_lines().clone())
    }

    async fn add(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<RemoteCartLine, GatewayError> {
        self.enter().await;
        let result = self.take_fail();
        self.exit();
        result?;

        let mut lines = self.locked_lines();
        if let Some(line) = lines.iter_mut().find(|l| l.product_id == product_id) {
            line.quantity += quantity;
            return Ok(line.clone());
        }
        let line = RemoteCartLine {
            line_id: LineId::new(self.next_line_id.fetch_add(1, Ordering::SeqCst)),
            product_id,
            name: format!("product-{product_id}"),
            unit_price: Decimal::ONE,
            quantity,
            selected: true,
        };
        lines.push(line.clone());
        Ok(line)
    }

    async fn update(
        &self,
        line_id: LineId,
        update: LineUpdate,
    ) -> Result<RemoteCartLine, GatewayError> {
        self.enter().await;
        let result = self.take_fail();
        self.exit();
        result?;

        let mut lines = self.locked_lines();
        let line = lines
            .iter_mut()
            .find(|l| l.line_id == line_id)
            .ok_or_else(|| GatewayError::Rejected("no such line".to_string()))?;
        if let Some(quantity) = update.quantity {
            line.quantity = quantity;
        }
        if let Some(selected) = update.selected {
            line.selected = selected;
        }
        Ok(line.clone())
    }

    async fn remove(&self, line_id: LineId) -> Result<(), GatewayError> {
        self.enter().await;
        let result = self.take_fail();
        self.exit();
        result?;
        self.locked_lines().retain(|l| l.line_id != line_id);
        Ok(())
    }

    async fn clear(&self) -> Result<(), GatewayError> {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        self.take_fail()?;
        self.locked_lines().clear();
        Ok(())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn product(id: i64, price: &str) -> ProductSummary {
    ProductSummary::new(
        ProductId::new(id),
        format!("product-{id}"),
        price.parse().expect("decimal"),
    )
}

fn local_reconciler() -> (Arc<MemoryStore>, CartReconciler<Arc<MemoryStore>, Arc<MockGateway>>) {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let cart = CartReconciler::new(Arc::clone(&store), MockGateway::new()).expect("new");
    (store, cart)
}

async fn remote_reconciler(
    gateway: &Arc<MockGateway>,
) -> (Arc<MemoryStore>, CartReconciler<Arc<MemoryStore>, Arc<MockGateway>>) {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let cart = CartReconciler::new(Arc::clone(&store), Arc::clone(gateway)).expect("new");
    cart.on_session_established().await.expect("merge");
    (store, cart)
}

#[tokio::test]
async fn test_local_add_merges_by_product_and_persists() {
    let (store, cart) = local_reconciler();

    cart.add_item(&product(1, "28.8"), 2).await.expect("add");
    cart.add_item(&product(1, "28.8"), 3).await.expect("add");

    let lines = cart.lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].quantity, 5);
    assert_eq!(lines[0].line_id, None);

    // The durable copy matches the in-memory cart.
    let stored: Vec<CartLine> = store
        .get_json(keys::CART)
        .expect("get")
        .expect("cart persisted");
    assert_eq!(stored, lines);
}

#[tokio::test]
async fn test_local_zero_quantity_add_counts_as_one() {
    let (_store, cart) = local_reconciler();
    cart.add_item(&product(1, "10"), 0).await.expect("add");
    assert_eq!(cart.lines()[0].quantity, 1);
}

#[tokio::test]
async fn test_update_to_zero_removes_line() {
    let (store, cart) = local_reconciler();
    cart.add_item(&product(1, "10"), 2).await.expect("add");

    cart.update_quantity(ProductId::new(1), 0)
        .await
        .expect("update");

    assert!(cart.lines().is_empty());
    let stored: Vec<CartLine> = store
        .get_json(keys::CART)
        .expect("get")
        .expect("cart persisted");
    assert!(stored.is_empty());
}

#[tokio::test]
async fn test_remove_missing_line_is_noop() {
    let (_store, cart) = local_reconciler();
    cart.remove_item(ProductId::new(42)).await.expect("remove");
    assert!(cart.lines().is_empty());
}

#[tokio::test]
async fn test_hydrates_from_storage() {
    let store = Arc::new(MemoryStore::new());
    {
        let cart = CartReconciler::new(Arc::clone(&store), MockGateway::new()).expect("new");
        cart.add_item(&product(1, "5"), 2).await.expect("add");
    }

    // Fresh reconciler over the same storage (restart).
    let cart = CartReconciler::new(Arc::clone(&store), MockGateway::new()).expect("new");
    assert_eq!(cart.mode(), CartMode::Local);
    assert_eq!(cart.lines().len(), 1);
    assert_eq!(cart.lines()[0].quantity, 2);
}

#[tokio::test]
async fn test_merge_sums_overlapping_and_keeps_remote_only() {
    let gateway = MockGateway::new();
    gateway.seed(1, 3, "28.8");
    gateway.seed(2, 1, "12");

    let store = Arc::new(MemoryStore::new());
    let cart = CartReconciler::new(Arc::clone(&store), Arc::clone(&gateway)).expect("new");
    cart.add_item(&product(1, "28.8"), 2).await.expect("add");

    cart.on_session_established().await.expect("merge");

    assert_eq!(cart.mode(), CartMode::Remote);
    let lines = cart.lines();
    assert_eq!(lines.len(), 2);
    let qty = |id: i64| {
        lines
            .iter()
            .find(|l| l.product_id == ProductId::new(id))
            .map(|l| l.quantity)
    };
    assert_eq!(qty(1), Some(5));
    assert_eq!(qty(2), Some(1));
    assert_eq!(gateway.server_quantity(1), Some(5));

    // The merged local cart is consumed from storage.
    assert_eq!(store.get(keys::CART).expect("get"), None);
}

#[tokio::test]
async fn test_merge_runs_once_per_session() {
    let gateway = MockGateway::new();
    let (_store, cart) = remote_reconciler(&gateway).await;

    cart.on_session_established().await.expect("second call");
    assert_eq!(gateway.list_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_merge_rearms_and_stays_local() {
    let gateway = MockGateway::new();
    gateway.fail_next_list(Fail::Network);

    let store = Arc::new(MemoryStore::new());
    let cart = CartReconciler::new(Arc::clone(&store), Arc::clone(&gateway)).expect("new");
    cart.add_item(&product(1, "10"), 2).await.expect("add");

    let err = cart
        .on_session_established()
        .await
        .expect_err("list failure must abort");
    assert!(err.is_retryable());
    assert_eq!(cart.mode(), CartMode::Local);
    assert_eq!(cart.lines().len(), 1);

    // The flag re-armed, so a retry performs the merge.
    cart.on_session_established().await.expect("retry");
    assert_eq!(cart.mode(), CartMode::Remote);
    assert_eq!(gateway.server_quantity(1), Some(2));
}

#[tokio::test]
async fn test_merge_skips_failed_line_and_completes() {
    let gateway = MockGateway::new();
    gateway.seed(2, 1, "12");

    let store = Arc::new(MemoryStore::new());
    let cart = CartReconciler::new(Arc::clone(&store), Arc::clone(&gateway)).expect("new");
    cart.add_item(&product(1, "10"), 2).await.expect("add");
    cart.add_item(&product(3, "7"), 1).await.expect("add");

    // First per-line call (add of product 1) fails; product 3 still merges.
    gateway.fail_next(Fail::Network);
    cart.on_session_established().await.expect("merge");

    assert_eq!(cart.mode(), CartMode::Remote);
    assert_eq!(gateway.server_quantity(1), None);
    assert_eq!(gateway.server_quantity(3), Some(1));
}

#[tokio::test]
async fn test_remote_failure_reverts_optimistic_update() {
    let gateway = MockGateway::new();
    gateway.seed(1, 2, "10");
    let (_store, cart) = remote_reconciler(&gateway).await;

    gateway.fail_next(Fail::Network);
    let err = cart
        .update_quantity(ProductId::new(1), 7)
        .await
        .expect_err("update must fail");
    assert!(err.is_retryable());

    // Cache rolled back to the server-confirmed quantity.
    assert_eq!(cart.lines()[0].quantity, 2);
    assert_eq!(gateway.server_quantity(1), Some(2));
}

#[tokio::test]
async fn test_remote_failure_restores_removed_line_in_place() {
    let gateway = MockGateway::new();
    gateway.seed(1, 1, "10");
    gateway.seed(2, 1, "20");
    gateway.seed(3, 1, "30");
    let (_store, cart) = remote_reconciler(&gateway).await;

    gateway.fail_next(Fail::Network);
    cart.remove_item(ProductId::new(2))
        .await
        .expect_err("remove must fail");

    let ids: Vec<ProductId> = cart.lines().iter().map(|l| l.product_id).collect();
    assert_eq!(
        ids,
        vec![ProductId::new(1), ProductId::new(2), ProductId::new(3)]
    );
}

#[tokio::test]
async fn test_unauthorized_forces_local_fallback() {
    let gateway = MockGateway::new();
    gateway.seed(1, 2, "10");
    let (_store, cart) = remote_reconciler(&gateway).await;

    gateway.fail_next(Fail::Unauthorized);
    let err = cart
        .update_quantity(ProductId::new(1), 5)
        .await
        .expect_err("update must fail");
    assert!(err.is_unauthorized());

    assert_eq!(cart.mode(), CartMode::Local);
    assert!(cart.lines().is_empty());
}

#[tokio::test]
async fn test_remote_add_adopts_server_line_id() {
    let gateway = MockGateway::new();
    let (_store, cart) = remote_reconciler(&gateway).await;

    cart.add_item(&product(1, "10"), 2).await.expect("add");

    let lines = cart.lines();
    assert!(lines[0].line_id.is_some());
    assert_eq!(gateway.server_quantity(1), Some(2));
}

#[tokio::test]
async fn test_clear_is_idempotent_and_not_restored_on_failure() {
    let gateway = MockGateway::new();
    gateway.seed(1, 2, "10");
    let (_store, cart) = remote_reconciler(&gateway).await;

    gateway.fail_next(Fail::Network);
    cart.clear().await.expect_err("clear must fail");
    // Decisive action: the emptied cache stays empty.
    assert!(cart.lines().is_empty());

    cart.clear().await.expect("clear");
    cart.clear().await.expect("clear again");
    assert!(cart.lines().is_empty());
}

#[tokio::test]
async fn test_toggle_and_select_all() {
    let gateway = MockGateway::new();
    gateway.seed(1, 1, "10");
    gateway.seed(2, 1, "20");
    let (_store, cart) = remote_reconciler(&gateway).await;

    cart.toggle_selected(ProductId::new(1)).await.expect("toggle");
    assert!(!cart.summary().all_selected);

    cart.set_all_selected(true).await.expect("select all");
    assert!(cart.summary().all_selected);

    cart.set_all_selected(false).await.expect("deselect all");
    assert_eq!(cart.summary().selected_count, 0);
}

#[tokio::test]
async fn test_summary_totals() {
    let (_store, cart) = local_reconciler();
    cart.add_item(&product(1, "28.8"), 2).await.expect("add");
    cart.add_item(&product(2, "12"), 1).await.expect("add");
    cart.toggle_selected(ProductId::new(2)).await.expect("toggle");

    let summary = cart.summary();
    assert_eq!(summary.total_count, 3);
    assert_eq!(summary.total_price, "69.6".parse::<Decimal>().expect("dec"));
    assert_eq!(summary.selected_count, 2);
    assert_eq!(
        summary.selected_total,
        "57.6".parse::<Decimal>().expect("dec")
    );
    assert!(!summary.all_selected);
}

#[tokio::test]
async fn test_checkout_snapshots_selected_lines() {
    let (store, cart) = local_reconciler();
    cart.add_item(&product(1, "28.8"), 2).await.expect("add");
    cart.add_item(&product(2, "12"), 1).await.expect("add");
    cart.toggle_selected(ProductId::new(2)).await.expect("toggle");

    let draft = cart.begin_checkout().expect("checkout");
    assert_eq!(draft.lines.len(), 1);
    assert_eq!(draft.total_count, 2);
    assert_eq!(draft.total.amount, "57.6".parse::<Decimal>().expect("dec"));
    assert_eq!(draft.total.currency_code, pomelo_core::CurrencyCode::CNY);

    let stored: CheckoutDraft = store
        .get_json(keys::ORDER_DRAFT)
        .expect("get")
        .expect("draft persisted");
    assert_eq!(stored.lines, draft.lines);
}

#[tokio::test]
async fn test_checkout_with_nothing_selected_fails() {
    let (store, cart) = local_reconciler();
    cart.add_item(&product(1, "10"), 1).await.expect("add");
    cart.set_all_selected(false).await.expect("deselect");

    let err = cart.begin_checkout().expect_err("must fail");
    assert!(matches!(err, CartSyncError::NothingSelected));
    assert_eq!(store.get(keys::ORDER_DRAFT).expect("get"), None);
}

#[tokio::test]
async fn test_refresh_rereads_backing_store() {
    let gateway = MockGateway::new();
    gateway.seed(1, 2, "10");
    let (_store, cart) = remote_reconciler(&gateway).await;

    // Server-side change invisible to the cache until a refresh.
    gateway.seed(2, 1, "20");
    assert_eq!(cart.lines().len(), 1);

    cart.refresh().await.expect("refresh");
    assert_eq!(cart.lines().len(), 2);
}

#[tokio::test]
async fn test_reset_to_local_drops_cart_and_rearms_merge() {
    let gateway = MockGateway::new();
    gateway.seed(1, 2, "10");
    let (store, cart) = remote_reconciler(&gateway).await;

    cart.reset_to_local().expect("reset");
    assert_eq!(cart.mode(), CartMode::Local);
    assert!(cart.lines().is_empty());
    assert_eq!(store.get(keys::CART).expect("get"), None);

    // A new session merges again.
    cart.on_session_established().await.expect("merge");
    assert_eq!(cart.mode(), CartMode::Remote);
    assert_eq!(gateway.list_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_product_mutations_are_serialized() {
    let gateway = MockGateway::new();
    let (_store, cart) = remote_reconciler(&gateway).await;
    let cart = Arc::new(cart);

    let item = product(1, "10");
    let (a, b, c) = tokio::join!(
        cart.add_item(&item, 1),
        cart.add_item(&item, 1),
        cart.add_item(&item, 1),
    );
    a.expect("add");
    b.expect("add");
    c.expect("add");

    // Per-product serialization: never more than one call in flight.
    assert_eq!(gateway.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(cart.lines()[0].quantity, 3);
    assert_eq!(gateway.server_quantity(1), Some(3));
}
