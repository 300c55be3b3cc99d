//! Farm-side product management and the category list.

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::client::ClientHandle;
use crate::errors::{BackendError, MarketError, MarketResult};
use crate::models::{tables, Attributes, Category, Product};
use crate::query::{Direction, Query};
use crate::session::{Role, SessionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductSort {
    Newest,
    PriceLowToHigh,
    PriceHighToLow,
    Name,
}

impl ProductSort {
    fn apply(self, query: Query) -> Query {
        match self {
            ProductSort::Newest => query.order("created_at", Direction::Desc),
            ProductSort::PriceLowToHigh => query.order("price", Direction::Asc),
            ProductSort::PriceHighToLow => query.order("price", Direction::Desc),
            ProductSort::Name => query.order("name", Direction::Asc),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub price: f64,
    pub unit: String,
    pub stock_quantity: i64,
    pub category_id: Option<i64>,
    pub image_url: Option<String>,
    pub is_organic: bool,
    pub nutritional_info: Option<Attributes>,
}

/// Fields to change; `None` leaves the column as it is.
#[derive(Debug, Clone, Default)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub stock_quantity: Option<i64>,
    pub category_id: Option<i64>,
    pub is_active: Option<bool>,
    pub nutritional_info: Option<Attributes>,
}

impl ProductUpdate {
    fn into_patch(self) -> MarketResult<Value> {
        let mut patch = Map::new();
        if let Some(name) = self.name {
            patch.insert("name".into(), json!(name.trim()));
        }
        if let Some(description) = self.description {
            patch.insert("description".into(), json!(description));
        }
        if let Some(price) = self.price {
            validate_price(price)?;
            patch.insert("price".into(), json!(price));
        }
        if let Some(stock) = self.stock_quantity {
            validate_stock(stock)?;
            patch.insert("stock_quantity".into(), json!(stock));
        }
        if let Some(category_id) = self.category_id {
            patch.insert("category_id".into(), json!(category_id));
        }
        if let Some(active) = self.is_active {
            patch.insert("is_active".into(), json!(active));
        }
        if let Some(info) = self.nutritional_info {
            patch.insert("nutritional_info".into(), serde_json::to_value(info)?);
        }
        if patch.is_empty() {
            return Err(MarketError::validation("update", "nothing to change"));
        }
        Ok(Value::Object(patch))
    }
}

fn validate_price(price: f64) -> MarketResult<()> {
    if !price.is_finite() || price < 0.0 {
        return Err(MarketError::validation("price", "must be a non-negative amount"));
    }
    Ok(())
}

fn validate_stock(stock: i64) -> MarketResult<()> {
    if stock < 0 {
        return Err(MarketError::validation("stock_quantity", "cannot be negative"));
    }
    Ok(())
}

#[derive(Clone)]
pub struct ProductService {
    handle: ClientHandle,
    page_size: usize,
}

impl ProductService {
    pub fn new(handle: ClientHandle, page_size: usize) -> Self {
        Self { handle, page_size }
    }

    fn require_manager(&self) -> MarketResult<SessionRecord> {
        let session = self.handle.require_session()?;
        if !session.role.can_manage_products() {
            return Err(MarketError::forbidden("manage products"));
        }
        Ok(session)
    }

    /// Products for the given ids in one request; unknown ids are skipped.
    pub async fn products_by_ids(&self, ids: &[i64]) -> MarketResult<Vec<Product>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.handle
            .client()
            .fetch(Query::table(tables::PRODUCTS).in_("id", ids.iter().copied()))
            .await
    }

    /// The signed-in farm's products, one page at a time.
    pub async fn list_farm_products(&self, page: usize, sort: ProductSort) -> MarketResult<Vec<Product>> {
        let session = self.require_manager()?;
        let query = Query::table(tables::PRODUCTS).eq("farm_id", session.id);
        self.handle
            .client()
            .fetch(sort.apply(query).page(page, self.page_size))
            .await
    }

    pub async fn create_product(&self, product: NewProduct) -> MarketResult<Product> {
        let session = self.require_manager()?;
        if product.name.trim().is_empty() {
            return Err(MarketError::validation("name", "cannot be empty"));
        }
        validate_price(product.price)?;
        validate_stock(product.stock_quantity)?;

        let mut row = serde_json::to_value(&product)?;
        if let Value::Object(map) = &mut row {
            map.insert("farm_id".into(), json!(session.id));
            map.insert("is_active".into(), json!(true));
        }

        let created: Product = self
            .handle
            .client()
            .fetch(Query::table(tables::PRODUCTS).insert(vec![row]))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| MarketError::Backend(BackendError::other("product insert returned no row")))?;

        info!(product_id = created.id, farm_id = %created.farm_id, "product created");
        Ok(created)
    }

    fn scoped(&self, session: &SessionRecord, product_id: i64) -> Query {
        let query = Query::table(tables::PRODUCTS).eq("id", product_id);
        // admins may edit any farm's products
        if session.role == Role::Admin {
            query
        } else {
            query.eq("farm_id", session.id.clone())
        }
    }

    pub async fn update_product(&self, product_id: i64, update: ProductUpdate) -> MarketResult<Product> {
        let session = self.require_manager()?;
        let patch = update.into_patch()?;
        self.handle
            .client()
            .fetch::<Product>(self.scoped(&session, product_id).update(patch))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| MarketError::Backend(BackendError::not_found(format!("product {product_id}"))))
    }

    pub async fn delete_product(&self, product_id: i64) -> MarketResult<()> {
        let session = self.require_manager()?;
        let removed = self
            .handle
            .client()
            .execute(self.scoped(&session, product_id).delete())
            .await?;
        if removed.is_empty() {
            return Err(MarketError::Backend(BackendError::not_found(format!("product {product_id}"))));
        }
        info!(product_id, "product deleted");
        Ok(())
    }

    /// Add `delta` (may be negative) to a product's stock, never below zero.
    pub async fn adjust_stock(&self, product_id: i64, delta: i64) -> MarketResult<Product> {
        let session = self.require_manager()?;
        let client = self.handle.client();
        let current: Product = client.fetch_one(self.scoped(&session, product_id)).await?;
        let next = (current.stock_quantity + delta).max(0);
        self.update_product(
            product_id,
            ProductUpdate {
                stock_quantity: Some(next),
                ..ProductUpdate::default()
            },
        )
        .await
    }

    pub async fn list_categories(&self) -> MarketResult<Vec<Category>> {
        self.handle
            .client()
            .fetch(Query::table(tables::CATEGORIES).order("name", Direction::Asc))
            .await
    }
}
