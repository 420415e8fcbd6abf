//! Storage ports and adapters for the catalog synchronizer.
//!
//! The sync engine only talks to the traits defined here: [`CatalogStore`] for raw
//! reads and transactional destination writes, [`SyncLock`] for mutual exclusion and
//! [`CacheInvalidator`] for downstream cache versioning. Each port ships an in-memory
//! adapter and a Postgres adapter.

use async_trait::async_trait;
use catsync_core::{
    CatalogPage, NormalizedPrice, NormalizedProduct, PriceRecord, ProductRecord, RawPriceRecord,
    RawProductRecord,
};
use thiserror::Error;

pub mod coordination;
pub mod memory;
pub mod postgres;

pub use coordination::{
    listing_cache_key, CacheInvalidator, CacheVersion, LockHandle, MemoryCacheVersion,
    MemorySyncLock, PgCacheVersion, PgSyncLock, SyncLock,
};
pub use memory::{CatalogState, MemoryCatalogStore};
pub use postgres::PgCatalogStore;

pub const CRATE_NAME: &str = "catsync-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated on {table}.{column} = {value}")]
    UniqueViolation {
        table: &'static str,
        column: &'static str,
        value: String,
    },
    #[error("foreign key violated: {0}")]
    ForeignKeyViolation(String),
    #[error("row not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Backend(String),
}

/// Temporary origin id assigned to a destination product during a code swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OriginRelocation {
    pub product_id: i64,
    pub origin_id: i64,
}

/// Read side of the legacy tables plus the entry point for destination transactions.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn raw_products(&self) -> Result<Vec<RawProductRecord>, StoreError>;

    async fn raw_prices(&self) -> Result<Vec<RawPriceRecord>, StoreError>;

    /// Destination products ordered by id with their prices, 1-based pages.
    async fn list_catalog(&self, page: u32, per_page: u32) -> Result<CatalogPage, StoreError>;

    async fn begin(&self) -> Result<Box<dyn CatalogTx>, StoreError>;
}

/// One destination unit of work. Dropping it without [`CatalogTx::commit`] rolls back.
#[async_trait]
pub trait CatalogTx: Send {
    async fn products(&mut self) -> Result<Vec<NormalizedProduct>, StoreError>;

    async fn prices(&mut self) -> Result<Vec<NormalizedPrice>, StoreError>;

    /// Deletes products by code; dependent prices go with them.
    async fn delete_products_by_code(&mut self, codes: &[String]) -> Result<u64, StoreError>;

    async fn relocate_product_origins(
        &mut self,
        moves: &[OriginRelocation],
    ) -> Result<(), StoreError>;

    async fn insert_product(&mut self, record: &ProductRecord) -> Result<(), StoreError>;

    /// Overwrites origin id and attributes of the product owning `record.code`.
    async fn update_product(&mut self, record: &ProductRecord) -> Result<(), StoreError>;

    async fn delete_prices_by_origin(&mut self, origin_ids: &[i64]) -> Result<u64, StoreError>;

    async fn insert_price(&mut self, record: &PriceRecord) -> Result<(), StoreError>;

    /// Overwrites product id and attributes of the price owning `record.origin_id`.
    async fn update_price(&mut self, record: &PriceRecord) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
