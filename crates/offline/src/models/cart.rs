//! Cart, cart mutation and checkout models

use serde::{Deserialize, Serialize};

use crate::storage::{Collection, Entity, IndexValue, RecordKey};

/// Status of the active cart
pub const CART_ACTIVE: &str = "ACTIVE";

/// A buyer's cart with a single farmer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub id: i64,
    pub buyer_id: i64,
    pub farmer_id: i64,
    pub status: String,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub subtotal: f64,
    #[serde(default)]
    pub platform_fee: f64,
    #[serde(default)]
    pub delivery_fee: f64,
    #[serde(default)]
    pub total: f64,
}

impl Cart {
    pub fn is_active(&self) -> bool {
        self.status == CART_ACTIVE
    }
}

impl Entity for Cart {
    const COLLECTION: Collection = Collection::Cart;

    fn key(&self) -> RecordKey {
        RecordKey::Id(self.id)
    }

    fn index_values(&self) -> Vec<(&'static str, IndexValue)> {
        vec![
            ("buyer_id", IndexValue::Int(self.buyer_id)),
            ("farmer_id", IndexValue::Int(self.farmer_id)),
            ("status", IndexValue::from(self.status.as_str())),
        ]
    }
}

/// A line item in a cart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: i64,
    pub cart_id: i64,
    pub product_id: i64,
    pub quantity: f64,
    #[serde(default)]
    pub unit_price_snapshot: f64,
    #[serde(default)]
    pub added_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Entity for CartItem {
    const COLLECTION: Collection = Collection::CartItems;

    fn key(&self) -> RecordKey {
        RecordKey::Id(self.id)
    }

    fn index_values(&self) -> Vec<(&'static str, IndexValue)> {
        vec![
            ("cart_id", IndexValue::Int(self.cart_id)),
            ("product_id", IndexValue::Int(self.product_id)),
        ]
    }
}

/// A queued change to the remote cart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CartMutation {
    AddItem { product_id: i64, quantity: f64 },
    UpdateItem { item_id: i64, quantity: f64 },
    RemoveItem { item_id: i64 },
    Clear,
}

/// How a checked-out order reaches the buyer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMethod {
    Delivery,
    Pickup,
}

/// Checkout of the active cart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub delivery_method: DeliveryMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_district: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout_email: Option<String>,
}

impl CheckoutRequest {
    /// Checkout for collection at the farm
    pub fn pickup() -> Self {
        Self {
            delivery_method: DeliveryMethod::Pickup,
            delivery_address: None,
            delivery_region: None,
            delivery_district: None,
            delivery_phone: None,
            delivery_notes: None,
            checkout_email: None,
        }
    }
}

/// Result of a successful checkout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub order_id: i64,
    pub order_number: String,
    pub total_amount: f64,
    #[serde(default)]
    pub payment_url: Option<String>,
}
