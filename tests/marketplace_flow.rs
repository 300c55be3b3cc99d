//! End-to-end flows against the in-memory backend:
//! a farm lists produce, a customer buys it, the farm ships it.

use std::sync::Arc;

use serde_json::json;

use farmlink::auth::NewAccount;
use farmlink::backend_memory::MemoryDatabase;
use farmlink::models::{tables, OrderStatus, UserSettings};
use farmlink::orders::Checkout;
use farmlink::products::{NewProduct, ProductSort, ProductUpdate};
use farmlink::reviews::average_rating;
use farmlink::{MarketError, Marketplace, Role};

fn fresh_database() -> Arc<MemoryDatabase> {
    Arc::new(MemoryDatabase::with_tables(&tables::ALL))
}

async fn register(db: &Arc<MemoryDatabase>, email: &str, role: Role) -> Marketplace {
    let market = Marketplace::in_memory(Arc::clone(db)).expect("Failed to build marketplace");
    market
        .auth
        .register(NewAccount {
            email: email.into(),
            password: "a long password".into(),
            first_name: "Test".into(),
            last_name: "User".into(),
            role,
        })
        .await
        .expect("Failed to register");
    market
}

fn carrots() -> NewProduct {
    NewProduct {
        name: "Rainbow carrots".into(),
        description: "Bunch of mixed carrots".into(),
        price: 3.25,
        unit: "bunch".into(),
        stock_quantity: 10,
        category_id: None,
        image_url: None,
        is_organic: true,
        nutritional_info: None,
    }
}

#[tokio::test]
async fn farm_to_table() {
    let db = fresh_database();
    let farm = register(&db, "farm@example.com", Role::Farmer).await;
    let shopper = register(&db, "shopper@example.com", Role::Customer).await;

    let product = farm.products.create_product(carrots()).await.unwrap();
    let farm_id = farm.auth.current_session().unwrap().id;
    assert_eq!(product.farm_id, farm_id);

    shopper.cart.add_to_cart(product.id, 4);
    let order = shopper.orders.place_order(Checkout::default()).await.unwrap();
    assert_eq!(order.total_amount, 13.0);
    assert_eq!(order.order_items[0].farm_id, farm_id);

    let customers = farm.customers.list_farm_customers(0).await.unwrap();
    assert_eq!(customers.len(), 1);
    assert_eq!(customers[0].customer_email, "shopper@example.com");
    assert_eq!(customers[0].total_spent, 13.0);

    farm.orders.update_order_status(order.id, OrderStatus::Processing).await.unwrap();
    let seen = shopper.orders.get_order(order.id).await.unwrap();
    assert_eq!(seen.status, OrderStatus::Processing);

    let err = shopper.orders.cancel_order(order.id).await.unwrap_err();
    assert!(matches!(err, MarketError::InvalidTransition { .. }));
}

#[tokio::test]
async fn repeat_customer_totals_accumulate() {
    let db = fresh_database();
    let farm = register(&db, "farm@example.com", Role::Farmer).await;
    let shopper = register(&db, "shopper@example.com", Role::Customer).await;
    let product = farm.products.create_product(carrots()).await.unwrap();

    for quantity in [1, 2] {
        shopper.cart.add_to_cart(product.id, quantity);
        shopper.orders.place_order(Checkout::default()).await.unwrap();
    }

    let customers = farm.customers.list_farm_customers(0).await.unwrap();
    assert_eq!(customers.len(), 1);
    assert_eq!(customers[0].order_count, 2);
    assert_eq!(customers[0].total_spent, 9.75);

    let noted = farm
        .customers
        .update_notes(&customers[0].customer_id, "prefers Saturday pickup")
        .await
        .unwrap();
    assert_eq!(noted.notes.as_deref(), Some("prefers Saturday pickup"));
}

#[tokio::test]
async fn customers_cannot_manage_products() {
    let db = fresh_database();
    let shopper = register(&db, "shopper@example.com", Role::Customer).await;

    let err = shopper.products.create_product(carrots()).await.unwrap_err();
    assert!(matches!(err, MarketError::Forbidden { .. }));
    assert!(db.rows(tables::PRODUCTS).is_empty());
}

#[tokio::test]
async fn farm_edits_its_own_catalog() {
    let db = fresh_database();
    let farm = register(&db, "farm@example.com", Role::Farmer).await;
    let other = register(&db, "other@example.com", Role::Farmer).await;

    let product = farm.products.create_product(carrots()).await.unwrap();
    let cheaper = farm
        .products
        .update_product(
            product.id,
            ProductUpdate {
                price: Some(2.75),
                ..ProductUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(cheaper.price, 2.75);

    let restocked = farm.products.adjust_stock(product.id, -25).await.unwrap();
    assert_eq!(restocked.stock_quantity, 0);

    assert!(other.products.delete_product(product.id).await.is_err());
    let listed = farm.products.list_farm_products(0, ProductSort::Name).await.unwrap();
    assert_eq!(listed.len(), 1);

    farm.products.delete_product(product.id).await.unwrap();
    assert!(farm.products.products_by_ids(&[product.id]).await.unwrap().is_empty());
}

#[tokio::test]
async fn reviews_need_a_session_and_a_valid_rating() {
    let db = fresh_database();
    let shopper = register(&db, "shopper@example.com", Role::Customer).await;

    shopper.reviews.add_review(1, 5, Some("sweet and crunchy")).await.unwrap();
    shopper.reviews.add_review(1, 4, None).await.unwrap();
    assert!(shopper.reviews.add_review(1, 6, None).await.is_err());

    let reviews = shopper.reviews.list_reviews(1).await.unwrap();
    assert_eq!(reviews.len(), 2);
    assert_eq!(average_rating(&reviews), Some(4.5));

    shopper.logout().unwrap();
    let err = shopper.reviews.add_review(1, 3, None).await.unwrap_err();
    assert!(matches!(err, MarketError::NotAuthenticated));
}

#[tokio::test]
async fn settings_default_then_persist() {
    let db = fresh_database();
    let shopper = register(&db, "shopper@example.com", Role::Customer).await;
    let user_id = shopper.auth.current_session().unwrap().id;

    let settings = shopper.settings.user_settings().await.unwrap();
    assert_eq!(settings, UserSettings::defaults_for(&user_id));

    let saved = shopper
        .settings
        .save_user_settings(UserSettings {
            newsletter: true,
            ..settings
        })
        .await
        .unwrap();
    assert!(saved.newsletter);
    assert!(shopper.settings.user_settings().await.unwrap().newsletter);
    assert_eq!(db.rows(tables::USER_SETTINGS).len(), 1);

    let err = shopper
        .settings
        .update_site_setting("maintenance", json!(true))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Forbidden { .. }));
}

#[tokio::test]
async fn shipping_methods_cheapest_first() {
    let db = fresh_database();
    db.seed(
        tables::SHIPPING_METHODS,
        vec![
            json!({"id": 1, "name": "Courier", "price": 7.5, "is_active": true}),
            json!({"id": 2, "name": "Pickup", "price": 0.0, "is_active": true}),
            json!({"id": 3, "name": "Drone", "price": 1.0, "is_active": false}),
        ],
    );
    let market = Marketplace::in_memory(Arc::clone(&db)).unwrap();

    let names: Vec<String> = market
        .settings
        .shipping_methods()
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(names, vec!["Pickup", "Courier"]);
}
