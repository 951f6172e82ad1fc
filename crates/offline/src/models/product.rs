//! Product listing models

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::storage::{Collection, Entity, IndexValue, RecordKey};

/// A product listing as returned by the remote API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub seller_id: i64,
    pub product_name: String,
    pub category: String,
    #[serde(default)]
    pub description: Option<String>,
    pub quantity_available: f64,
    pub unit_of_measure: String,
    pub price_per_unit: f64,
    #[serde(default = "default_minimum_order")]
    pub minimum_order_quantity: f64,
    /// ISO date as sent by the server
    #[serde(default)]
    pub harvest_date: Option<String>,
    #[serde(default)]
    pub expected_shelf_life_days: Option<i64>,
    #[serde(default)]
    pub farm_location: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub primary_image_url: Option<String>,
    #[serde(default)]
    pub additional_images: Option<Vec<String>>,
    #[serde(default)]
    pub is_organic: bool,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub is_negotiable: bool,
    #[serde(default)]
    pub view_count: i64,
    #[serde(default)]
    pub order_count: i64,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

fn default_minimum_order() -> f64 {
    1.0
}

fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn default_status() -> String {
    "ACTIVE".to_string()
}

impl Entity for Product {
    const COLLECTION: Collection = Collection::Products;

    fn key(&self) -> RecordKey {
        RecordKey::Id(self.id)
    }

    fn index_values(&self) -> Vec<(&'static str, IndexValue)> {
        let mut values = vec![
            ("seller_id", IndexValue::Int(self.seller_id)),
            ("category", IndexValue::from(self.category.as_str())),
            ("status", IndexValue::from(self.status.as_str())),
        ];
        if let Some(region) = &self.region {
            values.push(("region", IndexValue::from(region.as_str())));
        }
        values
    }
}

/// Fields a farmer authors when listing a product
///
/// This is the body of a create request and the payload of a draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductFields {
    pub product_name: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub quantity_available: f64,
    pub unit_of_measure: String,
    pub price_per_unit: f64,
    #[serde(default = "default_minimum_order")]
    pub minimum_order_quantity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harvest_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_shelf_life_days: Option<i64>,
    #[serde(default)]
    pub is_organic: bool,
    #[serde(default)]
    pub is_negotiable: bool,
}

impl ProductFields {
    /// Create fields with the required values and defaults for the rest
    pub fn new(
        product_name: impl Into<String>,
        category: impl Into<String>,
        quantity_available: f64,
        unit_of_measure: impl Into<String>,
        price_per_unit: f64,
    ) -> Self {
        Self {
            product_name: product_name.into(),
            category: category.into(),
            description: None,
            quantity_available,
            unit_of_measure: unit_of_measure.into(),
            price_per_unit,
            minimum_order_quantity: default_minimum_order(),
            harvest_date: None,
            expected_shelf_life_days: None,
            is_organic: false,
            is_negotiable: false,
        }
    }

    /// Check the fields a listing form would require
    ///
    /// Returns a human-readable reason for the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.product_name.trim().is_empty() {
            return Err("product name is required".to_string());
        }
        if self.category.trim().is_empty() {
            return Err("category is required".to_string());
        }
        if self.unit_of_measure.trim().is_empty() {
            return Err("unit of measure is required".to_string());
        }
        if !is_positive(self.quantity_available) {
            return Err("quantity available must be positive".to_string());
        }
        if !is_positive(self.price_per_unit) {
            return Err("price per unit must be positive".to_string());
        }
        if !is_positive(self.minimum_order_quantity) {
            return Err("minimum order quantity must be positive".to_string());
        }
        if self.expected_shelf_life_days.is_some_and(|days| days < 0) {
            return Err("shelf life cannot be negative".to_string());
        }
        Ok(())
    }
}

/// Partial update of a published listing
///
/// Only fields that are set are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity_available: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_of_measure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_per_unit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_order_quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harvest_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_shelf_life_days: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_organic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_negotiable: Option<bool>,
}

impl ProductUpdate {
    /// Whether the update changes nothing
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Page size applied when a query names a page but no limit
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Filters for listing products
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl ProductQuery {
    /// Query restricted to one category
    pub fn category(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            ..Self::default()
        }
    }

    /// Query parameters as (name, value) pairs, skipping unset filters
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(category) = &self.category {
            pairs.push(("category", category.clone()));
        }
        if let Some(region) = &self.region {
            pairs.push(("region", region.clone()));
        }
        if let Some(search) = &self.search {
            pairs.push(("search", search.clone()));
        }
        if let Some(seller_id) = self.seller_id {
            pairs.push(("seller_id", seller_id.to_string()));
        }
        if let Some(page) = self.page {
            pairs.push(("page", page.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        pairs
    }

    /// Whether `product` passes every filter
    ///
    /// `search` is a case-insensitive substring of the name, description
    /// or category.
    pub fn matches(&self, product: &Product) -> bool {
        if self.seller_id.is_some_and(|id| id != product.seller_id) {
            return false;
        }
        if let Some(region) = &self.region {
            if product.region.as_deref() != Some(region.as_str()) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if product.category != *category {
                return false;
            }
        }
        match &self.search {
            Some(search) => {
                let needle = search.to_lowercase();
                product.product_name.to_lowercase().contains(&needle)
                    || product.category.to_lowercase().contains(&needle)
                    || product
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
            }
            None => true,
        }
    }

    /// The requested page of `items`; pages count from 1
    pub fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        if self.page.is_none() && self.limit.is_none() {
            return items;
        }
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE) as usize;
        let page = self.page.unwrap_or(1).max(1) as usize;
        items
            .into_iter()
            .skip((page - 1) * limit)
            .take(limit)
            .collect()
    }
}

/// Paged product listing response
#[derive(Debug, Clone, Deserialize)]
pub struct ProductsResponse {
    pub products: Vec<Product>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub limit: u32,
}
