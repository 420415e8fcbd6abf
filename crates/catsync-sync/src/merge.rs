use catsync_core::{PriceRecord, ProductRecord, SyncCounts};
use catsync_storage::{CatalogTx, StoreError};

use crate::classify::Delta;

/// Applies a product delta: orphans, relocations, updates, inserts.
///
/// Deleted counts only the products removed directly; cascaded prices are not counted.
pub async fn merge_products(
    tx: &mut dyn CatalogTx,
    delta: &Delta<ProductRecord>,
    processed: usize,
) -> Result<SyncCounts, StoreError> {
    let deleted = if delta.orphans.is_empty() {
        0
    } else {
        tx.delete_products_by_code(&delta.orphans).await?
    };

    if !delta.relocations.is_empty() {
        tx.relocate_product_origins(&delta.relocations).await?;
    }
    for record in &delta.updates {
        tx.update_product(record).await?;
    }
    for record in &delta.inserts {
        tx.insert_product(record).await?;
    }

    Ok(SyncCounts {
        deleted,
        ..delta.planned_counts(processed)
    })
}

pub async fn merge_prices(
    tx: &mut dyn CatalogTx,
    delta: &Delta<PriceRecord>,
    processed: usize,
) -> Result<SyncCounts, StoreError> {
    let deleted = if delta.orphans.is_empty() {
        0
    } else {
        tx.delete_prices_by_origin(&delta.orphans).await?
    };

    for record in &delta.updates {
        tx.update_price(record).await?;
    }
    for record in &delta.inserts {
        tx.insert_price(record).await?;
    }

    Ok(SyncCounts {
        deleted,
        ..delta.planned_counts(processed)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify_products;
    use crate::staging::stage_products;
    use catsync_core::ProductAttributes;
    use catsync_storage::{CatalogStore, MemoryCatalogStore};
    use uuid::Uuid;

    fn record(origin_id: i64, code: &str) -> ProductRecord {
        ProductRecord {
            origin_id,
            code: code.to_string(),
            attributes: ProductAttributes::default(),
        }
    }

    #[tokio::test]
    async fn origin_swap_passes_unique_checks() {
        let store = MemoryCatalogStore::new();
        let mut tx = store.begin().await.expect("begin");
        tx.insert_product(&record(1, "PRD001")).await.expect("insert");
        tx.insert_product(&record(2, "PRD002")).await.expect("insert");
        tx.commit().await.expect("commit");

        let snapshot = stage_products(Uuid::new_v4(), vec![record(2, "PRD001"), record(1, "PRD002")]);
        let mut tx = store.begin().await.expect("begin");
        let destination = tx.products().await.expect("products");
        let delta = classify_products(&snapshot, &destination);
        let counts = merge_products(tx.as_mut(), &delta, snapshot.len())
            .await
            .expect("merge");
        tx.commit().await.expect("commit");

        assert_eq!(counts.updated, 2);
        let state = store.state().await;
        assert_eq!(state.product_by_code("PRD001").map(|p| p.origin_id), Some(2));
        assert_eq!(state.product_by_code("PRD002").map(|p| p.origin_id), Some(1));
    }

    #[tokio::test]
    async fn failed_write_leaves_destination_untouched_after_drop() {
        let store = MemoryCatalogStore::new();
        let snapshot = stage_products(Uuid::new_v4(), vec![record(1, "PRD001")]);
        {
            let mut tx = store.begin().await.expect("begin");
            let delta = classify_products(&snapshot, &[]);
            store.inject_write_failure(true);
            assert!(merge_products(tx.as_mut(), &delta, 1).await.is_err());
        }
        assert!(store.state().await.products.is_empty());
    }
}
