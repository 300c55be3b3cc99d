use std::sync::Arc;

use crate::app::Marketplace;
use crate::backend_memory::MemoryDatabase;
use crate::errors::{BackendError, MarketError};
use crate::local_store::MemoryStorage;
use crate::load_state::LoadError;
use crate::models::tables;
use crate::payment_methods::{FetchOutcome, NewPaymentMethod, SkipReason, CREATE_SCHEMA_FUNCTION};
use crate::tests::test_utils::*;

fn database_without_payment_table() -> Arc<MemoryDatabase> {
    let db = seeded_database();
    db.drop_table(tables::PAYMENT_METHODS);
    db
}

fn visa(last_four: &str) -> NewPaymentMethod {
    NewPaymentMethod {
        card_type: "visa".into(),
        last_four: last_four.into(),
        expiry_month: 12,
        expiry_year: 2099,
        cardholder_name: "Ada Test".into(),
    }
}

#[tokio::test]
async fn auto_fetch_stops_after_max_attempts() {
    let db = database_without_payment_table();
    let market = signed_in_customer(&db).await;
    let controller = &market.payment_methods;
    let max = controller.max_fetch_attempts() as usize;

    for _ in 0..max {
        match controller.auto_fetch().await {
            FetchOutcome::Failed(LoadError::SchemaNotReady { table }) => {
                assert_eq!(table, tables::PAYMENT_METHODS)
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(db.call_count(tables::PAYMENT_METHODS), max);

    for _ in 0..5 {
        assert_eq!(
            controller.auto_fetch().await,
            FetchOutcome::Skipped(SkipReason::AttemptsExhausted)
        );
    }
    assert_eq!(db.call_count(tables::PAYMENT_METHODS), max);

    let state = controller.state();
    assert!(state.initialized);
    assert!(state.schema_missing());
}

#[tokio::test]
async fn manual_refresh_resets_the_budget() {
    let db = database_without_payment_table();
    let market = signed_in_customer(&db).await;
    let controller = &market.payment_methods;
    for _ in 0..controller.max_fetch_attempts() {
        controller.auto_fetch().await;
    }

    let err = controller.refresh().await.unwrap_err();
    assert!(err.is_schema_not_ready());
    assert_eq!(controller.state().fetch_attempts, 0);
    assert!(matches!(controller.auto_fetch().await, FetchOutcome::Failed(_)));
}

#[tokio::test]
async fn create_schema_then_load_empty() {
    let db = database_without_payment_table();
    let market = signed_in_customer(&db).await;

    let methods = market.payment_methods.create_schema().await.unwrap();
    assert!(methods.is_empty());
    assert!(db.has_table(tables::PAYMENT_METHODS));

    let state = market.payment_methods.state();
    assert!(state.initialized);
    assert!(state.error.is_none());
    assert_eq!(
        market.payment_methods.auto_fetch().await,
        FetchOutcome::Skipped(SkipReason::AlreadyLoaded)
    );
}

#[tokio::test]
async fn anonymous_auto_fetch_issues_no_request() {
    let db = seeded_database();
    let market = market(&db);
    assert_eq!(
        market.payment_methods.auto_fetch().await,
        FetchOutcome::Skipped(SkipReason::NotAuthenticated)
    );
    assert_eq!(db.call_count(tables::PAYMENT_METHODS), 0);
}

#[tokio::test]
async fn first_card_is_default_and_default_moves() {
    let db = seeded_database();
    let market = signed_in_customer(&db).await;
    let controller = &market.payment_methods;

    let first = controller.add_method(visa("4242")).await.unwrap();
    let second = controller.add_method(visa("1881")).await.unwrap();
    assert!(first.is_default);
    assert!(!second.is_default);

    controller.set_default(second.id).await.unwrap();
    let loaded = controller.refresh().await.unwrap();
    let defaults: Vec<i64> = loaded.iter().filter(|m| m.is_default).map(|m| m.id).collect();
    assert_eq!(defaults, vec![second.id]);

    controller.remove_method(second.id).await.unwrap();
    let loaded = controller.refresh().await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert!(loaded[0].is_default);
}

#[tokio::test]
async fn invalid_card_is_rejected_before_any_request() {
    let db = seeded_database();
    let market = signed_in_customer(&db).await;
    let before = db.call_count(tables::PAYMENT_METHODS);

    let err = market.payment_methods.add_method(visa("42")).await.unwrap_err();
    assert!(matches!(err, MarketError::Validation { .. }));
    assert_eq!(db.call_count(tables::PAYMENT_METHODS), before);
}

#[tokio::test]
async fn removing_default_in_a_new_process_promotes_a_stored_card() {
    let db = seeded_database();
    let storage = Arc::new(MemoryStorage::new());

    let first_run = Marketplace::with_storage(Arc::clone(&db), storage.clone()).unwrap();
    first_run.auth.login(CUSTOMER_EMAIL, CUSTOMER_PASSWORD).await.unwrap();
    let first = first_run.payment_methods.add_method(visa("4242")).await.unwrap();
    let second = first_run.payment_methods.add_method(visa("1881")).await.unwrap();
    assert!(first.is_default);

    let second_run = Marketplace::with_storage(Arc::clone(&db), storage).unwrap();
    assert!(second_run.payment_methods.state().methods.is_empty());
    second_run.payment_methods.remove_method(first.id).await.unwrap();

    let loaded = second_run.payment_methods.refresh().await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id, second.id);
    assert!(loaded[0].is_default);
}

#[tokio::test]
async fn concurrent_auto_fetches_share_one_budget() {
    let db = database_without_payment_table();
    let market = signed_in_customer(&db).await;
    let controller = &market.payment_methods;
    let max = controller.max_fetch_attempts() as usize;

    let outcomes = tokio::join!(
        controller.auto_fetch(),
        controller.auto_fetch(),
        controller.auto_fetch(),
        controller.auto_fetch(),
        controller.auto_fetch(),
        controller.auto_fetch(),
    );
    let outcomes = [outcomes.0, outcomes.1, outcomes.2, outcomes.3, outcomes.4, outcomes.5];

    let failed = outcomes
        .iter()
        .filter(|o| matches!(o, FetchOutcome::Failed(_)))
        .count();
    assert!(failed <= max);
    assert!(db.call_count(tables::PAYMENT_METHODS) <= max);
    assert!(controller.state().fetch_attempts <= controller.max_fetch_attempts());
}

#[tokio::test]
async fn failed_create_schema_names_the_table() {
    let db = database_without_payment_table();
    db.fail_function(
        CREATE_SCHEMA_FUNCTION,
        BackendError::classify(Some("42P01"), "relation \"payment_methods\" does not exist"),
    );
    let market = signed_in_customer(&db).await;

    let err = market.payment_methods.create_schema().await.unwrap_err();
    match err {
        MarketError::SchemaNotReady { table } => assert_eq!(table, tables::PAYMENT_METHODS),
        other => panic!("expected a missing table, got {other:?}"),
    }
}
