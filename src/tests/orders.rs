use serde_json::json;

use crate::backend_memory::MemoryDatabase;
use crate::errors::{BackendError, MarketError};
use crate::load_state::{LoadView, Loadable};
use crate::models::{tables, OrderStatus};
use crate::orders::Checkout;
use crate::tests::test_utils::*;

fn with_shipping_and_discount(db: &MemoryDatabase) {
    db.seed(
        tables::SHIPPING_METHODS,
        vec![
            json!({"id": 1, "name": "Farm pickup", "price": 0.0, "is_active": true}),
            json!({"id": 2, "name": "Courier", "price": 5.0, "is_active": true}),
        ],
    );
    db.seed(
        tables::DISCOUNTS,
        vec![json!({"id": 1, "code": "HARVEST10", "percent_off": 10.0, "is_active": true})],
    );
}

#[tokio::test]
async fn place_order_writes_order_items_and_clears_cart() {
    let db = seeded_database();
    with_shipping_and_discount(&db);
    let market = signed_in_customer(&db).await;
    market.cart.add_to_cart(7, 2);
    market.cart.add_to_cart(8, 1);

    let order = market
        .orders
        .place_order(Checkout {
            shipping_method_id: Some(2),
            discount_code: Some("harvest10".into()),
            ..Checkout::default()
        })
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.subtotal, 21.0);
    assert_eq!(order.discount_amount, 2.1);
    assert_eq!(order.shipping_cost, 5.0);
    assert_eq!(order.total_amount, 23.9);
    assert_eq!(order.order_items.len(), 2);
    assert!(market.cart.get_cart().is_empty());

    let customers = db.rows(tables::FARM_CUSTOMERS);
    assert_eq!(customers.len(), 1);
    assert_eq!(customers[0]["customer_id"], "cust-1");
    assert_eq!(customers[0]["order_count"], json!(1));

    let listed = market.orders.list_orders(0).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].order_items.len(), 2);
}

#[tokio::test]
async fn empty_cart_cannot_check_out() {
    let db = seeded_database();
    let market = signed_in_customer(&db).await;
    let err = market.orders.place_order(Checkout::default()).await.unwrap_err();
    assert!(matches!(err, MarketError::Validation { .. }));
    assert!(db.rows(tables::ORDERS).is_empty());
}

#[tokio::test]
async fn over_stock_is_rejected() {
    let db = seeded_database();
    let market = signed_in_customer(&db).await;
    market.cart.add_to_cart(8, 4);
    let err = market.orders.place_order(Checkout::default()).await.unwrap_err();
    assert!(matches!(err, MarketError::Validation { .. }));
}

#[tokio::test]
async fn failed_item_insert_leaves_partial_order() {
    let db = seeded_database();
    db.fail_table(tables::ORDER_ITEMS, BackendError::other("insert denied by row policy"));
    let market = signed_in_customer(&db).await;
    market.cart.add_to_cart(7, 1);

    let err = market.orders.place_order(Checkout::default()).await.unwrap_err();
    let order_id = match err {
        MarketError::PartialOrder { order_id, .. } => order_id,
        other => panic!("expected a partial order, got {other:?}"),
    };

    let orders = db.rows(tables::ORDERS);
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["id"], json!(order_id));
    assert_eq!(market.cart.item_count(), 1);
}

#[tokio::test]
async fn customer_can_cancel_only_pending_orders() {
    let db = seeded_database();
    let market = signed_in_customer(&db).await;
    market.cart.add_to_cart(7, 1);
    let order = market.orders.place_order(Checkout::default()).await.unwrap();

    let cancelled = market.orders.cancel_order(order.id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);

    let err = market.orders.cancel_order(order.id).await.unwrap_err();
    assert!(matches!(err, MarketError::InvalidTransition { .. }));
}

#[tokio::test]
async fn farmer_moves_order_through_lifecycle() {
    let db = seeded_database();
    let customer = signed_in_customer(&db).await;
    customer.cart.add_to_cart(7, 3);
    let order = customer.orders.place_order(Checkout::default()).await.unwrap();

    let farm = market(&db);
    farm.auth.login(FARMER_EMAIL, FARMER_PASSWORD).await.unwrap();

    let items = farm.orders.list_farm_order_items(0).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].products.as_ref().unwrap()["name"], "Heirloom tomatoes");

    let err = farm
        .orders
        .update_order_status(order.id, OrderStatus::Delivered)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::InvalidTransition { .. }));

    for next in [OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered] {
        let updated = farm.orders.update_order_status(order.id, next).await.unwrap();
        assert_eq!(updated.status, next);
    }

    let err = customer
        .orders
        .update_order_status(order.id, OrderStatus::Cancelled)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Forbidden { .. }));
}

#[tokio::test]
async fn load_state_distinguishes_empty_from_missing_table() {
    let db = seeded_database();
    let market = signed_in_customer(&db).await;

    let mut state = Loadable::new();
    market.orders.load_orders(&mut state, 0).await.unwrap();
    assert_eq!(state.view(), LoadView::Empty);

    db.drop_table(tables::ORDERS);
    let err = market.orders.load_orders(&mut state, 0).await.unwrap_err();
    assert!(err.is_schema_not_ready());
    assert_eq!(state.view(), LoadView::SchemaNotReady(tables::ORDERS));
}

#[tokio::test]
async fn oversized_page_is_empty() {
    let db = seeded_database();
    let market = signed_in_customer(&db).await;
    market.cart.add_to_cart(7, 1);
    market.orders.place_order(Checkout::default()).await.unwrap();

    assert!(market.orders.list_orders(usize::MAX).await.unwrap().is_empty());
    assert_eq!(market.orders.list_orders(0).await.unwrap().len(), 1);
}
