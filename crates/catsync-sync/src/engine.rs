//! The reconciliation pipeline for one kind: project, stage, classify, merge.

use std::collections::BTreeSet;
use std::sync::Arc;

use catsync_core::{SyncCounts, SyncKind};
use catsync_storage::CatalogStore;
use tracing::info;
use uuid::Uuid;

use crate::classify::{classify_prices, classify_products};
use crate::merge::{merge_prices, merge_products};
use crate::projection::{project_prices, project_products};
use crate::staging::{stage_prices, stage_products};
use crate::SyncError;

#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<dyn CatalogStore>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    pub async fn run(&self, kind: SyncKind, run_id: Uuid) -> Result<SyncCounts, SyncError> {
        match kind {
            SyncKind::Products => self.sync_products(run_id).await,
            SyncKind::Prices => self.sync_prices(run_id).await,
        }
    }

    pub async fn sync_products(&self, run_id: Uuid) -> Result<SyncCounts, SyncError> {
        let raw = self.store.raw_products().await?;
        let snapshot = stage_products(run_id, project_products(&raw));

        let mut tx = self.store.begin().await?;
        let destination = tx.products().await?;
        let delta = classify_products(&snapshot, &destination);
        let counts = merge_products(tx.as_mut(), &delta, snapshot.len()).await?;
        tx.commit().await?;

        info!(
            raw_rows = raw.len(),
            processed = counts.processed,
            inserted = counts.inserted,
            updated = counts.updated,
            deleted = counts.deleted,
            unchanged = delta.unchanged,
            relocated = delta.relocations.len(),
            "product reconciliation committed"
        );
        Ok(counts)
    }

    /// Prices only follow products that survive the product projection and already
    /// exist in the destination.
    pub async fn sync_prices(&self, run_id: Uuid) -> Result<SyncCounts, SyncError> {
        let raw_products = self.store.raw_products().await?;
        let raw_prices = self.store.raw_prices().await?;
        let codes: BTreeSet<String> = project_products(&raw_products)
            .into_iter()
            .map(|product| product.code)
            .collect();
        let projected = project_prices(&raw_prices, &codes);

        let mut tx = self.store.begin().await?;
        let destination_products = tx.products().await?;
        let snapshot = stage_prices(run_id, projected, &destination_products);
        let destination = tx.prices().await?;
        let delta = classify_prices(&snapshot, &destination);
        let counts = merge_prices(tx.as_mut(), &delta, snapshot.len()).await?;
        tx.commit().await?;

        info!(
            raw_rows = raw_prices.len(),
            processed = counts.processed,
            inserted = counts.inserted,
            updated = counts.updated,
            deleted = counts.deleted,
            unchanged = delta.unchanged,
            "price reconciliation committed"
        );
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{raw_price, raw_product};
    use catsync_storage::MemoryCatalogStore;

    fn engine(store: &MemoryCatalogStore) -> SyncEngine {
        SyncEngine::new(Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn second_run_is_a_noop_and_keeps_timestamps() {
        let store = MemoryCatalogStore::with_raw(
            vec![raw_product(1, "PRD001"), raw_product(2, "PRD002")],
            vec![raw_price(10, "PRD001"), raw_price(11, "PRD002")],
        );
        let engine = engine(&store);

        let first = engine.sync_products(Uuid::new_v4()).await.expect("products");
        assert_eq!(first.inserted, 2);
        let prices = engine.sync_prices(Uuid::new_v4()).await.expect("prices");
        assert_eq!(prices.inserted, 2);
        let before = store.state().await;

        let again = engine.sync_products(Uuid::new_v4()).await.expect("products");
        let prices_again = engine.sync_prices(Uuid::new_v4()).await.expect("prices");
        assert!(again.is_noop());
        assert!(prices_again.is_noop());
        assert_eq!(again.processed, 2);
        assert_eq!(prices_again.processed, 2);

        let after = store.state().await;
        assert_eq!(before.products, after.products);
        assert_eq!(before.prices, after.prices);
    }

    #[tokio::test]
    async fn duplicate_codes_keep_the_lowest_raw_id() {
        let store = MemoryCatalogStore::with_raw(
            vec![raw_product(7, "prd001"), raw_product(3, " PRD001 ")],
            Vec::new(),
        );
        let counts = engine(&store).sync_products(Uuid::new_v4()).await.expect("sync");

        assert_eq!(counts.processed, 1);
        let state = store.state().await;
        assert_eq!(state.products.len(), 1);
        assert_eq!(state.product_by_code("PRD001").map(|p| p.origin_id), Some(3));
    }

    #[tokio::test]
    async fn code_swap_updates_both_rows_without_duplicates() {
        let store = MemoryCatalogStore::with_raw(
            vec![raw_product(1, "PRD001"), raw_product(2, "PRD002")],
            Vec::new(),
        );
        let engine = engine(&store);
        engine.sync_products(Uuid::new_v4()).await.expect("seed");

        store
            .edit(|state| {
                state.raw_products[0].code = Some("PRD002".into());
                state.raw_products[1].code = Some("PRD001".into());
            })
            .await;
        let counts = engine.sync_products(Uuid::new_v4()).await.expect("swap");

        assert_eq!(counts.updated, 2);
        assert_eq!(counts.inserted, 0);
        assert_eq!(counts.deleted, 0);
        let state = store.state().await;
        assert_eq!(state.products.len(), 2);
        assert_eq!(state.product_by_code("PRD001").map(|p| p.origin_id), Some(2));
        assert_eq!(state.product_by_code("PRD002").map(|p| p.origin_id), Some(1));
    }

    #[tokio::test]
    async fn prices_for_unknown_products_are_excluded() {
        let store = MemoryCatalogStore::with_raw(
            vec![raw_product(1, "PRD001")],
            vec![raw_price(10, "PRD001"), raw_price(11, "PRD404")],
        );
        let engine = engine(&store);
        engine.sync_products(Uuid::new_v4()).await.expect("products");
        let counts = engine.sync_prices(Uuid::new_v4()).await.expect("prices");

        assert_eq!(counts.processed, 1);
        assert_eq!(counts.inserted, 1);
        let state = store.state().await;
        assert!(state.price_by_origin(11).is_none());
    }

    #[tokio::test]
    async fn prices_wait_for_their_product_to_be_synced() {
        let store = MemoryCatalogStore::with_raw(
            vec![raw_product(1, "PRD001")],
            vec![raw_price(10, "PRD001")],
        );
        let counts = engine(&store).sync_prices(Uuid::new_v4()).await.expect("prices");
        assert_eq!(counts.processed, 0);
        assert!(store.state().await.prices.is_empty());
    }

    #[tokio::test]
    async fn orphan_products_cascade_and_count_once() {
        let store = MemoryCatalogStore::with_raw(
            vec![raw_product(1, "PRD001"), raw_product(2, "PRD002")],
            vec![
                raw_price(10, "PRD001"),
                raw_price(11, "PRD001"),
                raw_price(12, "PRD002"),
            ],
        );
        let engine = engine(&store);
        engine.sync_products(Uuid::new_v4()).await.expect("products");
        engine.sync_prices(Uuid::new_v4()).await.expect("prices");

        store.edit(|state| state.raw_products[0].active = false).await;
        let counts = engine.sync_products(Uuid::new_v4()).await.expect("products");

        assert_eq!(counts.deleted, 1);
        let state = store.state().await;
        assert!(state.product_by_code("PRD001").is_none());
        assert_eq!(state.prices.len(), 1);
        assert!(state.price_by_origin(12).is_some());

        let prices = engine.sync_prices(Uuid::new_v4()).await.expect("prices");
        assert!(prices.is_noop());
        assert_eq!(prices.processed, 1);
    }

    #[tokio::test]
    async fn monetary_text_is_parsed_end_to_end() {
        let mut formatted = raw_price(10, "PRD001");
        formatted.amount = Some("R$ 1.234,56".into());
        let mut missing = raw_price(11, "PRD001");
        missing.amount = Some("sem preço".into());
        let store = MemoryCatalogStore::with_raw(vec![raw_product(1, "PRD001")], vec![formatted, missing]);
        let engine = engine(&store);
        engine.sync_products(Uuid::new_v4()).await.expect("products");
        engine.sync_prices(Uuid::new_v4()).await.expect("prices");

        let state = store.state().await;
        assert_eq!(
            state.price_by_origin(10).and_then(|p| p.attributes.amount),
            Some(1234.56)
        );
        assert_eq!(state.price_by_origin(11).and_then(|p| p.attributes.amount), None);
    }

    #[tokio::test]
    async fn changed_attribute_updates_only_that_row() {
        let store = MemoryCatalogStore::with_raw(
            vec![raw_product(1, "PRD001"), raw_product(2, "PRD002")],
            Vec::new(),
        );
        let engine = engine(&store);
        engine.sync_products(Uuid::new_v4()).await.expect("seed");
        let untouched = store.state().await.product_by_code("PRD002").cloned();

        store
            .edit(|state| state.raw_products[0].weight = Some("500g".into()))
            .await;
        let counts = engine.sync_products(Uuid::new_v4()).await.expect("sync");

        assert_eq!(counts.updated, 1);
        let state = store.state().await;
        assert_eq!(
            state.product_by_code("PRD001").and_then(|p| p.attributes.weight_grams),
            Some(500.0)
        );
        assert_eq!(state.product_by_code("PRD002").cloned(), untouched);
    }

    #[tokio::test]
    async fn changed_price_attribute_updates_only_that_price() {
        let store = MemoryCatalogStore::with_raw(
            vec![raw_product(1, "PRD001")],
            vec![raw_price(10, "PRD001"), raw_price(11, "PRD001")],
        );
        let engine = engine(&store);
        engine.sync_products(Uuid::new_v4()).await.expect("products");
        engine.sync_prices(Uuid::new_v4()).await.expect("prices");
        let before = store.state().await;
        let changed_before = before.price_by_origin(10).cloned().expect("price 10");
        let sibling_before = before.price_by_origin(11).cloned();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .edit(|state| state.raw_prices[0].amount = Some("12,50".into()))
            .await;
        let counts = engine.sync_prices(Uuid::new_v4()).await.expect("prices");

        assert_eq!(counts.processed, 2);
        assert_eq!(counts.updated, 1);
        assert_eq!(counts.inserted, 0);
        assert_eq!(counts.deleted, 0);
        let state = store.state().await;
        let changed = state.price_by_origin(10).expect("price 10");
        assert_eq!(changed.attributes.amount, Some(12.5));
        assert_eq!(changed.id, changed_before.id);
        assert_eq!(changed.created_at, changed_before.created_at);
        assert!(changed.updated_at > changed_before.updated_at);
        assert_eq!(state.price_by_origin(11).cloned(), sibling_before);
    }

    #[tokio::test]
    async fn conflicting_price_rows_stay_stable_when_read_order_changes() {
        let mut pricey = raw_price(10, "PRD001");
        pricey.amount = Some("99,00".into());
        let store = MemoryCatalogStore::with_raw(
            vec![raw_product(1, "PRD001")],
            vec![raw_price(10, "PRD001"), pricey],
        );
        let engine = engine(&store);
        engine.sync_products(Uuid::new_v4()).await.expect("products");
        let first = engine.sync_prices(Uuid::new_v4()).await.expect("prices");
        assert_eq!(first.inserted, 1);
        let before = store.state().await;

        store.edit(|state| state.raw_prices.reverse()).await;
        let again = engine.sync_prices(Uuid::new_v4()).await.expect("prices");

        assert!(again.is_noop(), "{again:?}");
        assert_eq!(again.processed, 1);
        let after = store.state().await;
        assert_eq!(before.prices, after.prices);
        assert_eq!(
            after.price_by_origin(10).and_then(|p| p.attributes.amount),
            Some(10.0)
        );
    }

    #[tokio::test]
    async fn write_failure_rolls_back_everything() {
        let store = MemoryCatalogStore::with_raw(
            vec![raw_product(1, "PRD001"), raw_product(2, "PRD002")],
            Vec::new(),
        );
        store.inject_write_failure(true);

        let result = engine(&store).sync_products(Uuid::new_v4()).await;
        assert!(matches!(result, Err(SyncError::Store(_))));
        assert!(store.state().await.products.is_empty());
    }
}
