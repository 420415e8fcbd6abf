//! Core domain model for the legacy catalog synchronizer.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub mod normalize;

pub const CRATE_NAME: &str = "catsync-core";

/// Raw product row as stored by the legacy system of record.
///
/// Every attribute is free text; `id` is the legacy primary key and `code` is the
/// natural key, which may repeat, be blank, or differ only by casing/whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RawProductRecord {
    pub id: i64,
    pub code: Option<String>,
    pub name: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub color: Option<String>,
    pub weight: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
    pub depth: Option<String>,
    pub unit: Option<String>,
    pub registered_on: Option<String>,
    pub active: bool,
}

/// Raw price row as stored by the legacy system of record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RawPriceRecord {
    pub id: Option<i64>,
    pub product_code: Option<String>,
    pub amount: Option<String>,
    pub currency: Option<String>,
    pub discount: Option<String>,
    pub surcharge: Option<String>,
    pub promo_amount: Option<String>,
    pub promo_starts_on: Option<String>,
    pub promo_ends_on: Option<String>,
    pub updated_on: Option<String>,
    pub channel: Option<String>,
    pub customer_type: Option<String>,
    pub agent: Option<String>,
    pub note: Option<String>,
    pub status: Option<String>,
}

/// Typed product attributes compared by the delta classifier.
///
/// Equality is field-wise on typed values, so numeric columns compare as numbers
/// (`10.0 == 10`) and text columns compare after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProductAttributes {
    pub name: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub color: Option<String>,
    pub weight_grams: Option<f64>,
    pub width_cm: Option<f64>,
    pub height_cm: Option<f64>,
    pub depth_cm: Option<f64>,
    pub unit: Option<String>,
    pub registered_on: Option<NaiveDate>,
}

/// Typed price attributes compared by the delta classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PriceAttributes {
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub discount: Option<f64>,
    pub surcharge: Option<f64>,
    pub promo_amount: Option<f64>,
    pub promo_starts_on: Option<NaiveDate>,
    pub promo_ends_on: Option<NaiveDate>,
    pub updated_on: Option<NaiveDate>,
    pub channel: Option<String>,
    pub customer_type: Option<String>,
    pub agent: Option<String>,
    pub note: Option<String>,
}

/// Canonical product shape produced by the source projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub origin_id: i64,
    pub code: String,
    pub attributes: ProductAttributes,
}

/// Canonical price shape with its owning product already resolved to a destination id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub origin_id: i64,
    pub product_id: i64,
    pub attributes: PriceAttributes,
}

/// Persisted destination product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedProduct {
    pub id: i64,
    pub origin_id: i64,
    pub code: String,
    pub attributes: ProductAttributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted destination price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPrice {
    pub id: i64,
    pub origin_id: i64,
    pub product_id: i64,
    pub attributes: PriceAttributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read model used by the listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductWithPrices {
    #[serde(flatten)]
    pub product: NormalizedProduct,
    pub prices: Vec<NormalizedPrice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogPage {
    pub products: Vec<ProductWithPrices>,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    Products,
    Prices,
}

impl SyncKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncKind::Products => "products",
            SyncKind::Prices => "prices",
        }
    }
}

impl std::fmt::Display for SyncKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result counters of one reconciliation pass.
///
/// `processed` is the snapshot size (post-dedup, post-join), independent of how many
/// rows were actually written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncCounts {
    pub processed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

impl SyncCounts {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}
