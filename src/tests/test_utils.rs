// src/tests/test_utils.rs
// Shared fixtures: a seeded in-memory database and storage doubles

use std::sync::Arc;

use serde_json::{json, Value};

use crate::app::Marketplace;
use crate::backend_memory::MemoryDatabase;
use crate::local_store::{Storage, StorageError, StorageResult};
use crate::models::tables;
use crate::password::hash_password;

pub const CUSTOMER_EMAIL: &str = "ada@example.com";
pub const CUSTOMER_PASSWORD: &str = "correct horse battery";
pub const FARMER_EMAIL: &str = "fern@greenacre.farm";
pub const FARMER_PASSWORD: &str = "tomatoes-all-summer";

/// Storage that fails every call, like a browser with storage disabled.
pub struct FailingStorage;

impl Storage for FailingStorage {
    fn get(&self, _key: &str) -> StorageResult<Option<String>> {
        Err(StorageError::Unavailable("storage disabled".into()))
    }

    fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
        Err(StorageError::Unavailable("storage disabled".into()))
    }

    fn remove(&self, _key: &str) -> StorageResult<()> {
        Err(StorageError::Unavailable("storage disabled".into()))
    }
}

pub fn user_row(id: &str, email: &str, password: Option<&str>, role: &str) -> Value {
    let hash = password.map(|p| hash_password(p).unwrap());
    json!({
        "id": id,
        "email": email,
        "first_name": "Test",
        "last_name": role,
        "role": role,
        "password_hash": hash,
        "email_verified": false,
    })
}

pub fn product_row(id: i64, farm_id: &str, name: &str, price: f64, stock: i64) -> Value {
    json!({
        "id": id,
        "farm_id": farm_id,
        "name": name,
        "price": price,
        "stock_quantity": stock,
        "is_active": true,
    })
}

/// Every marketplace table, a customer, a farmer and two products.
pub fn seeded_database() -> Arc<MemoryDatabase> {
    let db = Arc::new(MemoryDatabase::with_tables(&tables::ALL));
    db.seed(
        tables::USERS,
        vec![
            user_row("cust-1", CUSTOMER_EMAIL, Some(CUSTOMER_PASSWORD), "customer"),
            user_row("farm-1", FARMER_EMAIL, Some(FARMER_PASSWORD), "farmer"),
        ],
    );
    db.seed(
        tables::PRODUCTS,
        vec![
            product_row(7, "farm-1", "Heirloom tomatoes", 4.5, 20),
            product_row(8, "farm-1", "Wildflower honey", 12.0, 3),
        ],
    );
    db
}

pub fn market(db: &Arc<MemoryDatabase>) -> Marketplace {
    Marketplace::in_memory(Arc::clone(db)).unwrap()
}

pub async fn signed_in_customer(db: &Arc<MemoryDatabase>) -> Marketplace {
    let market = market(db);
    market.auth.login(CUSTOMER_EMAIL, CUSTOMER_PASSWORD).await.unwrap();
    market
}
