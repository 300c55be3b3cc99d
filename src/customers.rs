//! Farm-side customer list: who has bought from a farm and how much.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::client::{ClientHandle, DatabaseClient};
use crate::errors::{BackendError, MarketError, MarketResult};
use crate::models::{round_cents, tables, FarmCustomer};
use crate::query::{Direction, Query};

#[derive(Clone)]
pub struct CustomerService {
    handle: ClientHandle,
    page_size: usize,
}

impl CustomerService {
    pub fn new(handle: ClientHandle, page_size: usize) -> Self {
        Self { handle, page_size }
    }

    /// The signed-in farm's customers, best customers first.
    pub async fn list_farm_customers(&self, page: usize) -> MarketResult<Vec<FarmCustomer>> {
        let session = self.handle.require_session()?;
        if !session.role.can_manage_products() {
            return Err(MarketError::forbidden("view farm customers"));
        }
        self.handle
            .client()
            .fetch(
                Query::table(tables::FARM_CUSTOMERS)
                    .eq("farm_id", session.id)
                    .order("total_spent", Direction::Desc)
                    .page(page, self.page_size),
            )
            .await
    }

    pub async fn update_notes(&self, customer_id: &str, notes: &str) -> MarketResult<FarmCustomer> {
        let session = self.handle.require_session()?;
        if !session.role.can_manage_products() {
            return Err(MarketError::forbidden("edit farm customers"));
        }
        self.handle
            .client()
            .fetch::<FarmCustomer>(
                Query::table(tables::FARM_CUSTOMERS)
                    .eq("farm_id", session.id)
                    .eq("customer_id", customer_id)
                    .update(json!({ "notes": notes })),
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| MarketError::Backend(BackendError::not_found(format!("customer {customer_id}"))))
    }
}

/// Add one order to the farm/customer relation, creating it on first order.
///
/// Read-then-write without a transaction; concurrent orders may undercount.
pub async fn record_customer(
    client: &DatabaseClient,
    farm_id: &str,
    customer_id: &str,
    customer_email: &str,
    amount: f64,
    at: DateTime<Utc>,
) -> MarketResult<FarmCustomer> {
    let existing: Option<FarmCustomer> = client
        .fetch_optional(
            Query::table(tables::FARM_CUSTOMERS)
                .eq("farm_id", farm_id)
                .eq("customer_id", customer_id),
        )
        .await?;

    let rows = match existing {
        Some(current) => {
            let patch = json!({
                "order_count": current.order_count + 1,
                "total_spent": round_cents(current.total_spent + amount),
                "last_order_at": at,
                "customer_email": customer_email,
            });
            client
                .fetch::<FarmCustomer>(
                    Query::table(tables::FARM_CUSTOMERS)
                        .eq("farm_id", farm_id)
                        .eq("customer_id", customer_id)
                        .update(patch),
                )
                .await?
        }
        None => {
            let row = FarmCustomer {
                id: None,
                farm_id: farm_id.to_string(),
                customer_id: customer_id.to_string(),
                customer_email: customer_email.to_string(),
                order_count: 1,
                total_spent: round_cents(amount),
                last_order_at: Some(at),
                notes: None,
            };
            let mut value = serde_json::to_value(&row)?;
            if let Some(map) = value.as_object_mut() {
                map.remove("id");
            }
            client
                .fetch::<FarmCustomer>(Query::table(tables::FARM_CUSTOMERS).insert(vec![value]))
                .await?
        }
    };

    rows.into_iter()
        .next()
        .ok_or_else(|| MarketError::Backend(BackendError::other("farm customer write returned no row")))
}
