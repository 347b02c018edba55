//! End-to-end cart synchronization against the mock commerce API.

use std::sync::Arc;

use rust_decimal::Decimal;

use pomelo_client::{
    CartMode, ClientConfig, Credentials, HttpStorefront, MemoryStore, Storefront,
};
use pomelo_core::{ProductId, ProductSummary};
use pomelo_integration_tests::{MockApi, VALID_PASSWORD};

fn credentials() -> Credentials {
    Credentials {
        username: "tester".to_string(),
        password: VALID_PASSWORD.to_string(),
    }
}

fn product(id: i64) -> ProductSummary {
    ProductSummary::new(ProductId::new(id), format!("product-{id}"), Decimal::TEN)
}

async fn logged_in_client(api: &MockApi) -> HttpStorefront<Arc<MemoryStore>> {
    let client = Storefront::over_http(
        &ClientConfig::new(api.base_url()),
        Arc::new(MemoryStore::new()),
    )
    .expect("storefront");
    client.login(&credentials()).await.expect("login");
    client
}

#[tokio::test]
async fn test_remote_mutations_reach_the_server() {
    let api = MockApi::start().await;
    let client = logged_in_client(&api).await;

    client.add_to_cart(&product(1), 2).await.expect("add");
    assert_eq!(api.quantity_of(1), Some(2));

    client
        .set_quantity(ProductId::new(1), 5)
        .await
        .expect("update");
    assert_eq!(api.quantity_of(1), Some(5));
    assert_eq!(client.cart_summary().total_count, 5);

    // Zero quantity removes the line on both sides.
    client
        .set_quantity(ProductId::new(1), 0)
        .await
        .expect("remove");
    assert_eq!(api.quantity_of(1), None);
    assert!(client.cart_lines().is_empty());
}

#[tokio::test]
async fn test_selection_changes_sync_to_server() {
    let api = MockApi::start().await;
    let client = logged_in_client(&api).await;

    client.add_to_cart(&product(1), 1).await.expect("add");
    client
        .toggle_selected(ProductId::new(1))
        .await
        .expect("toggle");

    let lines = api.lines();
    assert_eq!(lines.len(), 1);
    assert!(!lines[0].selected);

    client.set_all_selected(true).await.expect("select all");
    assert!(api.lines()[0].selected);
}

#[tokio::test]
async fn test_clear_empties_both_sides() {
    let api = MockApi::start().await;
    let client = logged_in_client(&api).await;

    client.add_to_cart(&product(1), 2).await.expect("add");
    client.add_to_cart(&product(2), 1).await.expect("add");

    client.clear_cart().await.expect("clear");

    assert!(api.lines().is_empty());
    assert!(client.cart_lines().is_empty());
}

#[tokio::test]
async fn test_revoked_token_forces_logout() {
    let api = MockApi::start().await;
    let client = logged_in_client(&api).await;
    client.add_to_cart(&product(1), 2).await.expect("add");

    api.revoke_token();

    let err = client
        .add_to_cart(&product(2), 1)
        .await
        .expect_err("must be rejected");
    assert!(err.is_unauthorized());

    // The client lands in a clean logged-out state with a fresh local cart.
    assert!(!client.is_logged_in());
    assert_eq!(client.cart().mode(), CartMode::Local);
    assert!(client.cart_lines().is_empty());
}

#[tokio::test]
async fn test_refresh_picks_up_server_changes() {
    let api = MockApi::start().await;
    let client = logged_in_client(&api).await;
    client.add_to_cart(&product(1), 2).await.expect("add");

    // Another device carts a product.
    api.seed_line(9, 4, Decimal::ONE);
    assert_eq!(client.cart_lines().len(), 1);

    client.refresh_cart().await.expect("refresh");
    assert_eq!(client.cart_lines().len(), 2);
}

#[tokio::test]
async fn test_checkout_draft_covers_selected_lines() {
    let api = MockApi::start().await;
    let client = logged_in_client(&api).await;

    client.add_to_cart(&product(1), 2).await.expect("add");
    client.add_to_cart(&product(2), 1).await.expect("add");
    client
        .toggle_selected(ProductId::new(2))
        .await
        .expect("toggle");

    let draft = client.begin_checkout().expect("checkout");
    assert_eq!(draft.lines.len(), 1);
    assert_eq!(draft.total_count, 2);
    assert_eq!(draft.total.amount, Decimal::from(20));
}
