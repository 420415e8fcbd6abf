//! Per-run staging snapshots keyed by natural key.

use std::collections::{BTreeMap, HashMap};

use catsync_core::{NormalizedProduct, PriceRecord, ProductRecord, SyncKind};
use tracing::debug;
use uuid::Uuid;

use crate::projection::ProjectedPrice;

/// A row that can live in a [`StagingSnapshot`].
pub trait StagedRow {
    type Key: Ord + Clone + std::fmt::Debug;

    fn key(&self) -> Self::Key;

    fn origin_id(&self) -> i64;
}

impl StagedRow for ProductRecord {
    type Key = String;

    fn key(&self) -> String {
        self.code.clone()
    }

    fn origin_id(&self) -> i64 {
        self.origin_id
    }
}

impl StagedRow for PriceRecord {
    type Key = i64;

    fn key(&self) -> i64 {
        self.origin_id
    }

    fn origin_id(&self) -> i64 {
        self.origin_id
    }
}

/// Normalized rows of one run. Owned by the run and torn down when it ends, on any path.
#[derive(Debug)]
pub struct StagingSnapshot<R: StagedRow> {
    kind: SyncKind,
    run_id: Uuid,
    rows: BTreeMap<R::Key, R>,
}

impl<R: StagedRow> StagingSnapshot<R> {
    pub fn new(kind: SyncKind, run_id: Uuid, rows: impl IntoIterator<Item = R>) -> Self {
        let rows = rows.into_iter().map(|row| (row.key(), row)).collect();
        Self { kind, run_id, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &R::Key) -> Option<&R> {
        self.rows.get(key)
    }

    pub fn contains_key(&self, key: &R::Key) -> bool {
        self.rows.contains_key(key)
    }

    /// Rows in natural-key order.
    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.rows.values()
    }

    pub fn max_origin_id(&self) -> Option<i64> {
        self.rows.values().map(StagedRow::origin_id).max()
    }
}

impl<R: StagedRow> Drop for StagingSnapshot<R> {
    fn drop(&mut self) {
        debug!(
            kind = %self.kind,
            run_id = %self.run_id,
            rows = self.rows.len(),
            "staging snapshot dropped"
        );
    }
}

pub fn stage_products(run_id: Uuid, projected: Vec<ProductRecord>) -> StagingSnapshot<ProductRecord> {
    StagingSnapshot::new(SyncKind::Products, run_id, projected)
}

/// Resolves each projected price to the destination product owning its code.
///
/// `destination` must be read inside the sync transaction. Prices whose code has no
/// destination product are left out.
pub fn stage_prices(
    run_id: Uuid,
    projected: Vec<ProjectedPrice>,
    destination: &[NormalizedProduct],
) -> StagingSnapshot<PriceRecord> {
    let product_ids: HashMap<&str, i64> = destination
        .iter()
        .map(|product| (product.code.as_str(), product.id))
        .collect();

    let rows = projected.into_iter().filter_map(|price| {
        let product_id = *product_ids.get(price.product_code.as_str())?;
        Some(PriceRecord {
            origin_id: price.origin_id,
            product_id,
            attributes: price.attributes,
        })
    });
    StagingSnapshot::new(SyncKind::Prices, run_id, rows)
}
