use std::sync::Arc;

use serde_json::json;

use crate::app::Marketplace;
use crate::auth::NewAccount;
use crate::backend_memory::MemoryDatabase;
use crate::errors::MarketError;
use crate::models::tables;
use crate::session::{Role, SessionState};
use crate::tests::test_utils::*;

#[tokio::test]
async fn login_with_good_credentials() {
    let db = seeded_database();
    let market = market(&db);

    let session = market.auth.login("  ADA@example.com ", CUSTOMER_PASSWORD).await.unwrap();
    assert_eq!(session.id, "cust-1");
    assert_eq!(session.role, Role::Customer);
    assert!(session.token.is_some());
    assert_eq!(market.auth.state(), SessionState::Authenticated(session.clone()));
    assert_eq!(market.handle.headers().identity_id.as_deref(), Some("cust-1"));

    let user = db
        .rows(tables::USERS)
        .into_iter()
        .find(|u| u["id"] == "cust-1")
        .unwrap();
    assert_eq!(user["email_verified"], json!(true));
}

#[tokio::test]
async fn wrong_password_and_unknown_email_look_the_same() {
    let db = seeded_database();
    let market = market(&db);

    let wrong = market.auth.login(CUSTOMER_EMAIL, "nope").await.unwrap_err();
    let unknown = market.auth.login("ghost@example.com", "nope").await.unwrap_err();
    assert!(matches!(wrong, MarketError::InvalidCredentials));
    assert!(matches!(unknown, MarketError::InvalidCredentials));
    assert_eq!(wrong.user_message(), unknown.user_message());
    assert!(market.auth.current_session().is_none());
}

#[tokio::test]
async fn account_without_hash_is_incomplete() {
    let db = seeded_database();
    db.seed(tables::USERS, vec![user_row("old-1", "old@example.com", None, "customer")]);

    let err = market(&db).auth.login("old@example.com", "anything").await.unwrap_err();
    assert!(matches!(err, MarketError::AccountIncomplete { .. }));
}

#[tokio::test]
async fn missing_users_table_is_schema_not_ready() {
    let db = Arc::new(MemoryDatabase::new());
    let err = market(&db).auth.login(CUSTOMER_EMAIL, CUSTOMER_PASSWORD).await.unwrap_err();
    match err {
        MarketError::SchemaNotReady { table } => assert_eq!(table, tables::USERS),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn disabled_storage_still_returns_a_session() {
    let db = seeded_database();
    let market = Marketplace::with_storage(Arc::clone(&db), Arc::new(FailingStorage)).unwrap();

    assert!(market.handle.sessions().read_session().is_none());
    let session = market.auth.login(CUSTOMER_EMAIL, CUSTOMER_PASSWORD).await.unwrap();
    assert_eq!(session.id, "cust-1");
    assert!(market.handle.sessions().read_session().is_none());
    assert!(market.handle.headers().is_empty());
}

#[tokio::test]
async fn logout_drops_identity_headers() {
    let db = seeded_database();
    let market = signed_in_customer(&db).await;
    assert!(market.handle.headers().has_identity());

    market.logout().unwrap();
    assert_eq!(market.auth.state(), SessionState::Anonymous);
    assert!(market.handle.headers().is_empty());
    assert!(matches!(market.auth.require_session(), Err(MarketError::NotAuthenticated)));
}

#[tokio::test]
async fn register_signs_in_and_rejects_duplicates() {
    let db = seeded_database();
    let market = market(&db);
    let account = NewAccount {
        email: "New@Example.com".into(),
        password: "long enough pw".into(),
        first_name: "Nia".into(),
        last_name: "Grow".into(),
        role: Role::Farmer,
    };

    let session = market.auth.register(account.clone()).await.unwrap();
    assert_eq!(session.email, "new@example.com");
    assert_eq!(session.role, Role::Farmer);

    let err = market.auth.register(account).await.unwrap_err();
    assert!(matches!(err, MarketError::Validation { .. }));

    market.logout().unwrap();
    let again = market.auth.login("new@example.com", "long enough pw").await.unwrap();
    assert_eq!(again.id, session.id);
}

#[tokio::test]
async fn admin_self_registration_is_forbidden() {
    let db = seeded_database();
    let err = market(&db)
        .auth
        .register(NewAccount {
            email: "boss@example.com".into(),
            password: "long enough pw".into(),
            first_name: String::new(),
            last_name: String::new(),
            role: Role::Admin,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Forbidden { .. }));
}
