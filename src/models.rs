//! Row shapes for the marketplace tables.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::MarketError;
use crate::session::Role;

pub mod tables {
    pub const USERS: &str = "users";
    pub const PRODUCTS: &str = "products";
    pub const CATEGORIES: &str = "categories";
    pub const ORDERS: &str = "orders";
    pub const ORDER_ITEMS: &str = "order_items";
    pub const REVIEWS: &str = "reviews";
    pub const PAYMENT_METHODS: &str = "payment_methods";
    pub const SETTINGS: &str = "settings";
    pub const SHIPPING_METHODS: &str = "shipping_methods";
    pub const ADMIN_PAYMENT_METHODS: &str = "admin_payment_methods";
    pub const USER_SETTINGS: &str = "user_settings";
    pub const FARM_SETTINGS: &str = "farm_settings";
    pub const DISCOUNTS: &str = "discounts";
    pub const DELIVERIES: &str = "deliveries";
    pub const FARM_CUSTOMERS: &str = "farm_customers";

    pub const ALL: [&str; 15] = [
        USERS,
        PRODUCTS,
        CATEGORIES,
        ORDERS,
        ORDER_ITEMS,
        REVIEWS,
        PAYMENT_METHODS,
        SETTINGS,
        SHIPPING_METHODS,
        ADMIN_PAYMENT_METHODS,
        USER_SETTINGS,
        FARM_SETTINGS,
        DISCOUNTS,
        DELIVERIES,
        FARM_CUSTOMERS,
    ];
}

/// Schemaless attributes such as nutritional facts.
pub type Attributes = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default)]
    pub state: String,
    pub postal_code: String,
    #[serde(default = "default_country")]
    pub country: String,
}

fn default_country() -> String {
    "US".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub farm_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(default)]
    pub stock_quantity: i64,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_organic: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub nutritional_info: Option<Attributes>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_unit() -> String {
    "each".to_string()
}

fn default_true() -> bool {
    true
}

impl Product {
    pub fn in_stock(&self, quantity: u32) -> bool {
        self.stock_quantity >= i64::from(quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Allowed forward moves; everything else is rejected.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Shipped)
                | (Shipped, Delivered)
                | (Pending, Cancelled)
                | (Processing, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for OrderStatus {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
            other => Err(MarketError::validation("status", format!("unknown order status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: String,
    pub status: OrderStatus,
    pub subtotal: f64,
    #[serde(default)]
    pub discount_amount: f64,
    #[serde(default)]
    pub shipping_cost: f64,
    pub total_amount: f64,
    #[serde(default)]
    pub shipping_address: Option<Address>,
    #[serde(default)]
    pub payment_method_id: Option<i64>,
    #[serde(default)]
    pub shipping_method_id: Option<i64>,
    #[serde(default)]
    pub discount_code: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub order_items: Vec<OrderItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub farm_id: String,
    pub quantity: u32,
    pub price: f64,
    #[serde(default)]
    pub products: Option<Value>,
}

impl OrderItem {
    pub fn line_total(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub product_id: i64,
    pub user_id: String,
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: i64,
    pub user_id: String,
    pub card_type: String,
    pub last_four: String,
    pub expiry_month: u8,
    pub expiry_year: u16,
    #[serde(default)]
    pub cardholder_name: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub user_id: String,
    #[serde(default = "default_true")]
    pub email_notifications: bool,
    #[serde(default)]
    pub sms_notifications: bool,
    #[serde(default)]
    pub newsletter: bool,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

impl UserSettings {
    pub fn defaults_for(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            email_notifications: true,
            sms_notifications: false,
            newsletter: false,
            language: default_language(),
            currency: default_currency(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmSettings {
    pub farm_id: String,
    pub farm_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub pickup_available: bool,
    #[serde(default)]
    pub delivery_available: bool,
    #[serde(default)]
    pub delivery_radius_km: Option<f64>,
    #[serde(default)]
    pub min_order_amount: f64,
    #[serde(default)]
    pub address: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteSetting {
    pub key: String,
    pub value: Value,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingMethod {
    pub id: i64,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub estimated_days: Option<u32>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminPaymentMethod {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discount {
    pub id: i64,
    pub code: String,
    pub percent_off: f64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub min_order_amount: f64,
}

impl Discount {
    pub fn applies(&self, subtotal: f64, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.expires_at.map(|t| t > now).unwrap_or(true)
            && subtotal >= self.min_order_amount
    }

    pub fn amount_off(&self, subtotal: f64) -> f64 {
        round_cents(subtotal * self.percent_off.clamp(0.0, 100.0) / 100.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmCustomer {
    #[serde(default)]
    pub id: Option<i64>,
    pub farm_id: String,
    pub customer_id: String,
    #[serde(default)]
    pub customer_email: String,
    #[serde(default)]
    pub order_count: u32,
    #[serde(default)]
    pub total_spent: f64,
    #[serde(default)]
    pub last_order_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
