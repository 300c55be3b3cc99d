//! Checkout and order tracking.
//!
//! Placing an order is a chain of separate writes: the order row, then each
//! item, then the cart is cleared. Nothing is rolled back. If an item insert
//! fails the order row stays behind and the caller gets `PartialOrder` with
//! its id.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::cart::{subtotal, Cart};
use crate::client::ClientHandle;
use crate::customers::record_customer;
use crate::errors::{BackendError, MarketError, MarketResult};
use crate::load_state::Loadable;
use crate::models::{round_cents, tables, Address, Discount, Order, OrderItem, OrderStatus, ShippingMethod};
use crate::query::{Direction, Query};
use crate::session::Role;

const ORDER_WITH_ITEMS: &str = "*, order_items(*)";

#[derive(Debug, Clone, Default)]
pub struct Checkout {
    pub shipping_address: Option<Address>,
    pub payment_method_id: Option<i64>,
    pub shipping_method_id: Option<i64>,
    pub discount_code: Option<String>,
}

#[derive(Serialize)]
struct NewOrderRow<'a> {
    user_id: &'a str,
    status: OrderStatus,
    subtotal: f64,
    discount_amount: f64,
    shipping_cost: f64,
    total_amount: f64,
    shipping_address: Option<&'a Address>,
    payment_method_id: Option<i64>,
    shipping_method_id: Option<i64>,
    discount_code: Option<&'a str>,
}

#[derive(Serialize)]
struct NewOrderItemRow<'a> {
    order_id: i64,
    product_id: i64,
    farm_id: &'a str,
    quantity: u32,
    price: f64,
}

#[derive(Clone)]
pub struct OrderService {
    handle: ClientHandle,
    cart: Cart,
    page_size: usize,
}

impl OrderService {
    pub fn new(handle: ClientHandle, cart: Cart, page_size: usize) -> Self {
        Self {
            handle,
            cart,
            page_size,
        }
    }

    async fn active_discount(&self, code: &str, amount: f64) -> MarketResult<Option<Discount>> {
        let code = code.trim().to_uppercase();
        if code.is_empty() {
            return Ok(None);
        }
        let discount: Option<Discount> = self
            .handle
            .client()
            .fetch_optional(Query::table(tables::DISCOUNTS).eq("code", code.clone()))
            .await?;

        match discount {
            Some(d) if d.applies(amount, Utc::now()) => Ok(Some(d)),
            _ => Err(MarketError::validation("discount_code", format!("{code} is not valid for this order"))),
        }
    }

    async fn shipping_cost(&self, shipping_method_id: Option<i64>) -> MarketResult<f64> {
        let Some(id) = shipping_method_id else {
            return Ok(0.0);
        };
        let method: ShippingMethod = self
            .handle
            .client()
            .fetch_one(Query::table(tables::SHIPPING_METHODS).eq("id", id).eq("is_active", true))
            .await?;
        Ok(method.price)
    }

    /// Turn the cart into an order.
    pub async fn place_order(&self, checkout: Checkout) -> MarketResult<Order> {
        let session = self.handle.require_session()?;
        let client = self.handle.client();

        let lines = self.cart.hydrate(&client).await?;
        if lines.is_empty() {
            return Err(MarketError::validation("cart", "cart is empty"));
        }
        if let Some(line) = lines.iter().find(|l| l.exceeds_stock()) {
            return Err(MarketError::validation(
                "quantity",
                format!("only {} of {} left", line.product.stock_quantity, line.product.name),
            ));
        }

        let items_total = subtotal(&lines);
        let discount = match checkout.discount_code.as_deref() {
            Some(code) => self.active_discount(code, items_total).await?,
            None => None,
        };
        let discount_amount = discount.as_ref().map(|d| d.amount_off(items_total)).unwrap_or(0.0);
        let shipping_cost = self.shipping_cost(checkout.shipping_method_id).await?;
        let total_amount = round_cents((items_total - discount_amount).max(0.0) + shipping_cost);

        let row = NewOrderRow {
            user_id: &session.id,
            status: OrderStatus::Pending,
            subtotal: items_total,
            discount_amount,
            shipping_cost,
            total_amount,
            shipping_address: checkout.shipping_address.as_ref(),
            payment_method_id: checkout.payment_method_id,
            shipping_method_id: checkout.shipping_method_id,
            discount_code: discount.as_ref().map(|d| d.code.as_str()),
        };
        let mut order: Order = client.insert_one(tables::ORDERS, &row).await?;
        info!(order_id = order.id, total = order.total_amount, "order created");

        for line in &lines {
            let item = NewOrderItemRow {
                order_id: order.id,
                product_id: line.product.id,
                farm_id: &line.product.farm_id,
                quantity: line.quantity,
                price: line.product.price,
            };
            match client.insert_one::<_, OrderItem>(tables::ORDER_ITEMS, &item).await {
                Ok(stored) => order.order_items.push(stored),
                Err(e) => {
                    warn!(order_id = order.id, product_id = line.product.id, error = %e,
                        "order item insert failed; order left incomplete");
                    return Err(MarketError::PartialOrder {
                        order_id: order.id,
                        message: e.user_message(),
                    });
                }
            }
        }

        self.cart.clear_cart();

        let mut per_farm: BTreeMap<&str, f64> = BTreeMap::new();
        for line in &lines {
            *per_farm.entry(line.product.farm_id.as_str()).or_default() += line.line_total();
        }
        let now = Utc::now();
        for (farm_id, amount) in per_farm {
            if let Err(e) = record_customer(&client, farm_id, &session.id, &session.email, amount, now).await {
                warn!(order_id = order.id, farm_id, error = %e, "farm customer stats not updated");
            }
        }

        Ok(order)
    }

    /// The signed-in user's orders, newest first.
    pub async fn list_orders(&self, page: usize) -> MarketResult<Vec<Order>> {
        let session = self.handle.require_session()?;
        self.handle
            .client()
            .fetch(
                Query::table(tables::ORDERS)
                    .select(ORDER_WITH_ITEMS)
                    .eq("user_id", session.id)
                    .order("created_at", Direction::Desc)
                    .page(page, self.page_size),
            )
            .await
    }

    /// `list_orders` recorded into a load state.
    pub async fn load_orders(&self, state: &mut Loadable<Order>, page: usize) -> MarketResult<()> {
        state.begin();
        let result = self.list_orders(page).await;
        state.settle(result).map(|_| ())
    }

    pub async fn get_order(&self, order_id: i64) -> MarketResult<Order> {
        let session = self.handle.require_session()?;
        let mut query = Query::table(tables::ORDERS).select(ORDER_WITH_ITEMS).eq("id", order_id);
        if session.role != Role::Admin {
            query = query.eq("user_id", session.id);
        }
        self.handle.client().fetch_one(query).await
    }

    /// Customers may cancel their own orders while they are still pending.
    pub async fn cancel_order(&self, order_id: i64) -> MarketResult<Order> {
        let order = self.get_order(order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(MarketError::InvalidTransition {
                from: order.status.to_string(),
                to: OrderStatus::Cancelled.to_string(),
            });
        }
        self.transition(order, OrderStatus::Cancelled).await
    }

    /// Items the signed-in farm has sold, newest first.
    pub async fn list_farm_order_items(&self, page: usize) -> MarketResult<Vec<OrderItem>> {
        let session = self.handle.require_session()?;
        if !session.role.can_manage_products() {
            return Err(MarketError::forbidden("view farm orders"));
        }
        self.handle
            .client()
            .fetch(
                Query::table(tables::ORDER_ITEMS)
                    .select("*, products(name, unit)")
                    .eq("farm_id", session.id)
                    .order("id", Direction::Desc)
                    .page(page, self.page_size),
            )
            .await
    }

    /// Farm or admin moves an order along its lifecycle.
    pub async fn update_order_status(&self, order_id: i64, next: OrderStatus) -> MarketResult<Order> {
        let session = self.handle.require_session()?;
        if !session.role.can_manage_products() {
            return Err(MarketError::forbidden("update order status"));
        }

        let client = self.handle.client();
        if session.role == Role::Farmer {
            let owned = client
                .execute(
                    Query::table(tables::ORDER_ITEMS)
                        .select("id")
                        .eq("order_id", order_id)
                        .eq("farm_id", session.id.clone())
                        .limit(1),
                )
                .await?;
            if owned.is_empty() {
                return Err(MarketError::forbidden(format!("update order {order_id}")));
            }
        }

        let order: Order = client
            .fetch_one(Query::table(tables::ORDERS).select(ORDER_WITH_ITEMS).eq("id", order_id))
            .await?;
        self.transition(order, next).await
    }

    async fn transition(&self, order: Order, next: OrderStatus) -> MarketResult<Order> {
        if !order.status.can_transition_to(next) {
            return Err(MarketError::InvalidTransition {
                from: order.status.to_string(),
                to: next.to_string(),
            });
        }

        let updated: Order = self
            .handle
            .client()
            .fetch::<Order>(
                Query::table(tables::ORDERS)
                    .eq("id", order.id)
                    .eq("status", order.status.to_string())
                    .update(json!({ "status": next })),
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                MarketError::Backend(BackendError::other(format!(
                    "order {} changed while updating its status",
                    order.id
                )))
            })?;

        info!(order_id = order.id, from = %order.status, to = %next, "order status changed");
        Ok(Order {
            order_items: order.order_items,
            ..updated
        })
    }
}
