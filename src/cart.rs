//! The pre-checkout cart.
//!
//! Lives entirely in the local store as `[{product_id, quantity}]`. Product
//! details are fetched on demand with one batched `in` query. Storage
//! failures never reach the caller: reads fall back to an empty cart and
//! writes are logged and dropped.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::DatabaseClient;
use crate::errors::MarketResult;
use crate::local_store::{Storage, CART_KEY};
use crate::models::{round_cents, tables, Product};
use crate::query::Query;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: i64,
    pub quantity: u32,
}

/// A cart entry joined with live product data.
#[derive(Debug, Clone, PartialEq)]
pub struct CartLine {
    pub product: Product,
    pub quantity: u32,
}

impl CartLine {
    pub fn line_total(&self) -> f64 {
        round_cents(self.product.price * f64::from(self.quantity))
    }

    pub fn exceeds_stock(&self) -> bool {
        !self.product.in_stock(self.quantity)
    }
}

pub fn subtotal(lines: &[CartLine]) -> f64 {
    round_cents(lines.iter().map(CartLine::line_total).sum())
}

#[derive(Clone)]
pub struct Cart {
    storage: Arc<dyn Storage>,
}

impl Cart {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn get_cart(&self) -> Vec<CartItem> {
        let raw = match self.storage.get(CART_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(error = %e, "cart unavailable, treating as empty");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<CartItem>>(&raw) {
            Ok(items) => items.into_iter().filter(|i| i.quantity > 0).collect(),
            Err(e) => {
                warn!(error = %e, "stored cart is corrupted, discarding it");
                if let Err(e) = self.storage.remove(CART_KEY) {
                    warn!(error = %e, "failed to discard corrupted cart");
                }
                Vec::new()
            }
        }
    }

    fn save(&self, items: &[CartItem]) {
        let serialized = match serde_json::to_string(items) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "cart could not be serialized");
                return;
            }
        };
        if let Err(e) = self.storage.set(CART_KEY, &serialized) {
            warn!(error = %e, "cart not saved");
        }
    }

    /// Add `quantity` of a product, merging with an existing entry.
    pub fn add_to_cart(&self, product_id: i64, quantity: u32) -> Vec<CartItem> {
        let mut items = self.get_cart();
        if quantity == 0 {
            return items;
        }

        match items.iter_mut().find(|i| i.product_id == product_id) {
            Some(item) => item.quantity = item.quantity.saturating_add(quantity),
            None => items.push(CartItem {
                product_id,
                quantity,
            }),
        }

        self.save(&items);
        items
    }

    /// Set an entry's quantity; zero removes it.
    pub fn update_quantity(&self, product_id: i64, quantity: u32) -> Vec<CartItem> {
        if quantity == 0 {
            return self.remove_from_cart(product_id);
        }

        let mut items = self.get_cart();
        if let Some(item) = items.iter_mut().find(|i| i.product_id == product_id) {
            item.quantity = quantity;
            self.save(&items);
        }
        items
    }

    pub fn remove_from_cart(&self, product_id: i64) -> Vec<CartItem> {
        let mut items = self.get_cart();
        let before = items.len();
        items.retain(|i| i.product_id != product_id);
        if items.len() != before {
            self.save(&items);
        }
        items
    }

    pub fn clear_cart(&self) {
        if let Err(e) = self.storage.remove(CART_KEY) {
            warn!(error = %e, "cart not cleared");
        }
    }

    /// Total number of units across all entries.
    pub fn item_count(&self) -> u32 {
        self.get_cart().iter().map(|i| i.quantity).sum()
    }

    /// Join the cart with current product rows in a single request.
    ///
    /// Entries whose product no longer exists (or is inactive) are dropped
    /// from the result and from the stored cart.
    pub async fn hydrate(&self, client: &DatabaseClient) -> MarketResult<Vec<CartLine>> {
        let items = self.get_cart();
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = items.iter().map(|i| i.product_id).collect();
        let products: Vec<Product> = client
            .fetch(Query::table(tables::PRODUCTS).in_("id", ids))
            .await?;
        let by_id: HashMap<i64, Product> = products
            .into_iter()
            .filter(|p| p.is_active)
            .map(|p| (p.id, p))
            .collect();

        let mut lines = Vec::with_capacity(items.len());
        let mut kept = Vec::with_capacity(items.len());
        for item in items.iter() {
            match by_id.get(&item.product_id) {
                Some(product) => {
                    lines.push(CartLine {
                        product: product.clone(),
                        quantity: item.quantity,
                    });
                    kept.push(*item);
                }
                None => warn!(product_id = item.product_id, "dropping unavailable product from cart"),
            }
        }

        if kept.len() != items.len() {
            self.save(&kept);
        }

        Ok(lines)
    }
}
