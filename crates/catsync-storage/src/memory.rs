//! In-memory catalog store enforcing the destination schema constraints
//! (unique code and origin ids, price → product foreign key, cascading delete).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use catsync_core::{
    CatalogPage, NormalizedPrice, NormalizedProduct, PriceRecord, ProductRecord, ProductWithPrices,
    RawPriceRecord, RawProductRecord,
};
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{CatalogStore, CatalogTx, OriginRelocation, StoreError};

#[derive(Debug, Clone, Default)]
pub struct CatalogState {
    pub raw_products: Vec<RawProductRecord>,
    pub raw_prices: Vec<RawPriceRecord>,
    pub products: BTreeMap<i64, NormalizedProduct>,
    pub prices: BTreeMap<i64, NormalizedPrice>,
    next_product_id: i64,
    next_price_id: i64,
}

impl CatalogState {
    pub fn product_by_code(&self, code: &str) -> Option<&NormalizedProduct> {
        self.products.values().find(|p| p.code == code)
    }

    pub fn price_by_origin(&self, origin_id: i64) -> Option<&NormalizedPrice> {
        self.prices.values().find(|p| p.origin_id == origin_id)
    }

    fn ensure_unique_product(
        &self,
        skip_id: Option<i64>,
        code: &str,
        origin_id: i64,
    ) -> Result<(), StoreError> {
        for product in self.products.values() {
            if Some(product.id) == skip_id {
                continue;
            }
            if product.code == code {
                return Err(StoreError::UniqueViolation {
                    table: "products",
                    column: "code",
                    value: code.to_string(),
                });
            }
            if product.origin_id == origin_id {
                return Err(StoreError::UniqueViolation {
                    table: "products",
                    column: "origin_id",
                    value: origin_id.to_string(),
                });
            }
        }
        Ok(())
    }

    fn ensure_price_refs(&self, skip_id: Option<i64>, record: &PriceRecord) -> Result<(), StoreError> {
        if !self.products.contains_key(&record.product_id) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "prices.product_id = {} has no product",
                record.product_id
            )));
        }
        if self
            .prices
            .values()
            .any(|p| Some(p.id) != skip_id && p.origin_id == record.origin_id)
        {
            return Err(StoreError::UniqueViolation {
                table: "prices",
                column: "origin_id",
                value: record.origin_id.to_string(),
            });
        }
        Ok(())
    }
}

/// Catalog store backed by a mutex-guarded [`CatalogState`].
///
/// A transaction owns the state lock and mutates a working copy that replaces the
/// shared state only on commit.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalogStore {
    state: Arc<Mutex<CatalogState>>,
    fail_writes: Arc<AtomicBool>,
    raw_reads: Arc<AtomicUsize>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_raw(products: Vec<RawProductRecord>, prices: Vec<RawPriceRecord>) -> Self {
        let state = CatalogState {
            raw_products: products,
            raw_prices: prices,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            ..Default::default()
        }
    }

    /// Mutates the legacy tables (or anything else) outside a sync transaction.
    pub async fn edit<F>(&self, f: F)
    where
        F: FnOnce(&mut CatalogState),
    {
        let mut state = self.state.lock().await;
        f(&mut state);
    }

    pub async fn state(&self) -> CatalogState {
        self.state.lock().await.clone()
    }

    /// Makes every subsequent destination write fail until switched off.
    pub fn inject_write_failure(&self, enabled: bool) {
        self.fail_writes.store(enabled, Ordering::SeqCst);
    }

    pub fn raw_read_count(&self) -> usize {
        self.raw_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn raw_products(&self) -> Result<Vec<RawProductRecord>, StoreError> {
        self.raw_reads.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.state.lock().await.raw_products.clone();
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }

    async fn raw_prices(&self) -> Result<Vec<RawPriceRecord>, StoreError> {
        self.raw_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().await.raw_prices.clone())
    }

    async fn list_catalog(&self, page: u32, per_page: u32) -> Result<CatalogPage, StoreError> {
        let state = self.state.lock().await;
        let per_page = per_page.max(1) as usize;
        let offset = (page.max(1) as usize - 1) * per_page;
        let products = state
            .products
            .values()
            .skip(offset)
            .take(per_page)
            .map(|product| ProductWithPrices {
                product: product.clone(),
                prices: state
                    .prices
                    .values()
                    .filter(|price| price.product_id == product.id)
                    .cloned()
                    .collect(),
            })
            .collect();
        Ok(CatalogPage {
            products,
            total: state.products.len() as u64,
        })
    }

    async fn begin(&self) -> Result<Box<dyn CatalogTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryCatalogTx {
            guard,
            working,
            fail_writes: self.fail_writes.clone(),
        }))
    }
}

struct MemoryCatalogTx {
    guard: OwnedMutexGuard<CatalogState>,
    working: CatalogState,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryCatalogTx {
    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Backend("injected write failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CatalogTx for MemoryCatalogTx {
    async fn products(&mut self) -> Result<Vec<NormalizedProduct>, StoreError> {
        Ok(self.working.products.values().cloned().collect())
    }

    async fn prices(&mut self) -> Result<Vec<NormalizedPrice>, StoreError> {
        Ok(self.working.prices.values().cloned().collect())
    }

    async fn delete_products_by_code(&mut self, codes: &[String]) -> Result<u64, StoreError> {
        self.check_writable()?;
        let doomed: Vec<i64> = self
            .working
            .products
            .values()
            .filter(|p| codes.contains(&p.code))
            .map(|p| p.id)
            .collect();
        for id in &doomed {
            self.working.products.remove(id);
        }
        self.working
            .prices
            .retain(|_, price| !doomed.contains(&price.product_id));
        Ok(doomed.len() as u64)
    }

    async fn relocate_product_origins(
        &mut self,
        moves: &[OriginRelocation],
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        for relocation in moves {
            let code = self
                .working
                .products
                .get(&relocation.product_id)
                .map(|p| p.code.clone())
                .ok_or_else(|| StoreError::NotFound(format!("product {}", relocation.product_id)))?;
            self.working.ensure_unique_product(
                Some(relocation.product_id),
                &code,
                relocation.origin_id,
            )?;
            if let Some(product) = self.working.products.get_mut(&relocation.product_id) {
                product.origin_id = relocation.origin_id;
            }
        }
        Ok(())
    }

    async fn insert_product(&mut self, record: &ProductRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        self.working
            .ensure_unique_product(None, &record.code, record.origin_id)?;
        self.working.next_product_id += 1;
        let id = self.working.next_product_id;
        let now = Utc::now();
        self.working.products.insert(
            id,
            NormalizedProduct {
                id,
                origin_id: record.origin_id,
                code: record.code.clone(),
                attributes: record.attributes.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn update_product(&mut self, record: &ProductRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        let id = self
            .working
            .product_by_code(&record.code)
            .map(|p| p.id)
            .ok_or_else(|| StoreError::NotFound(format!("product code {}", record.code)))?;
        self.working
            .ensure_unique_product(Some(id), &record.code, record.origin_id)?;
        if let Some(product) = self.working.products.get_mut(&id) {
            product.origin_id = record.origin_id;
            product.attributes = record.attributes.clone();
            product.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_prices_by_origin(&mut self, origin_ids: &[i64]) -> Result<u64, StoreError> {
        self.check_writable()?;
        let before = self.working.prices.len();
        self.working
            .prices
            .retain(|_, price| !origin_ids.contains(&price.origin_id));
        Ok((before - self.working.prices.len()) as u64)
    }

    async fn insert_price(&mut self, record: &PriceRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        self.working.ensure_price_refs(None, record)?;
        self.working.next_price_id += 1;
        let id = self.working.next_price_id;
        let now = Utc::now();
        self.working.prices.insert(
            id,
            NormalizedPrice {
                id,
                origin_id: record.origin_id,
                product_id: record.product_id,
                attributes: record.attributes.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn update_price(&mut self, record: &PriceRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        let id = self
            .working
            .price_by_origin(record.origin_id)
            .map(|p| p.id)
            .ok_or_else(|| StoreError::NotFound(format!("price origin {}", record.origin_id)))?;
        self.working.ensure_price_refs(Some(id), record)?;
        if let Some(price) = self.working.prices.get_mut(&id) {
            price.product_id = record.product_id;
            price.attributes = record.attributes.clone();
            price.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryCatalogTx {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }
}
