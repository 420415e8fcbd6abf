//! Delta classification of a staging snapshot against the destination rows.

use std::collections::HashSet;

use catsync_core::{NormalizedPrice, NormalizedProduct, PriceRecord, ProductRecord, SyncCounts};
use catsync_storage::OriginRelocation;

use crate::staging::{StagedRow, StagingSnapshot};

/// Writes needed to make the destination equal to a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta<R: StagedRow> {
    pub inserts: Vec<R>,
    pub updates: Vec<R>,
    /// Destination natural keys absent from the snapshot.
    pub orphans: Vec<R::Key>,
    /// Temporary origin ids applied before updates so that origin ids can be swapped.
    pub relocations: Vec<OriginRelocation>,
    pub unchanged: usize,
}

impl<R: StagedRow> Delta<R> {
    fn empty() -> Self {
        Self {
            inserts: Vec::new(),
            updates: Vec::new(),
            orphans: Vec::new(),
            relocations: Vec::new(),
            unchanged: 0,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.orphans.is_empty()
    }

    /// Counts the delta would produce, before execution. Merge replaces `deleted`
    /// with the rows actually removed.
    pub fn planned_counts(&self, processed: usize) -> SyncCounts {
        SyncCounts {
            processed: processed as u64,
            inserted: self.inserts.len() as u64,
            updated: self.updates.len() as u64,
            deleted: self.orphans.len() as u64,
        }
    }
}

/// Products match by code. A matched row whose origin id moved is relocated first and
/// then always updated.
pub fn classify_products(
    snapshot: &StagingSnapshot<ProductRecord>,
    destination: &[NormalizedProduct],
) -> Delta<ProductRecord> {
    let mut delta = Delta::empty();
    let relocation_base = snapshot
        .max_origin_id()
        .into_iter()
        .chain(destination.iter().map(|p| p.origin_id))
        .max()
        .unwrap_or(0);

    let mut seen = HashSet::new();
    for current in destination {
        let Some(staged) = snapshot.get(&current.code) else {
            delta.orphans.push(current.code.clone());
            continue;
        };
        seen.insert(current.code.as_str());

        if staged.origin_id != current.origin_id {
            delta.relocations.push(OriginRelocation {
                product_id: current.id,
                origin_id: relocation_base + current.id,
            });
            delta.updates.push(staged.clone());
        } else if staged.attributes != current.attributes {
            delta.updates.push(staged.clone());
        } else {
            delta.unchanged += 1;
        }
    }

    delta.inserts = snapshot
        .iter()
        .filter(|row| !seen.contains(row.code.as_str()))
        .cloned()
        .collect();
    delta
}

/// Prices match by origin id; a changed product id counts as a change.
pub fn classify_prices(
    snapshot: &StagingSnapshot<PriceRecord>,
    destination: &[NormalizedPrice],
) -> Delta<PriceRecord> {
    let mut delta = Delta::empty();
    let mut seen = HashSet::new();
    for current in destination {
        let Some(staged) = snapshot.get(&current.origin_id) else {
            delta.orphans.push(current.origin_id);
            continue;
        };
        seen.insert(current.origin_id);

        if staged.product_id != current.product_id || staged.attributes != current.attributes {
            delta.updates.push(staged.clone());
        } else {
            delta.unchanged += 1;
        }
    }

    delta.inserts = snapshot
        .iter()
        .filter(|row| !seen.contains(&row.origin_id))
        .cloned()
        .collect();
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::{stage_prices, stage_products};
    use crate::test_support::{stored_price, stored_product};
    use catsync_core::{PriceAttributes, ProductAttributes};
    use uuid::Uuid;

    fn record(origin_id: i64, code: &str) -> ProductRecord {
        ProductRecord {
            origin_id,
            code: code.to_string(),
            attributes: ProductAttributes::default(),
        }
    }

    #[test]
    fn products_split_into_inserts_updates_orphans_and_unchanged() {
        let mut renamed = record(2, "PRD002");
        renamed.attributes.name = Some("Novo nome".into());
        let snapshot = stage_products(
            Uuid::new_v4(),
            vec![record(1, "PRD001"), renamed, record(3, "PRD003")],
        );
        let destination = vec![
            stored_product(1, 1, "PRD001"),
            stored_product(2, 2, "PRD002"),
            stored_product(3, 4, "PRD004"),
        ];

        let delta = classify_products(&snapshot, &destination);
        assert_eq!(delta.unchanged, 1);
        assert_eq!(delta.updates.len(), 1);
        assert_eq!(delta.updates[0].code, "PRD002");
        assert_eq!(delta.inserts.len(), 1);
        assert_eq!(delta.inserts[0].code, "PRD003");
        assert_eq!(delta.orphans, vec!["PRD004".to_string()]);
        assert!(delta.relocations.is_empty());
        assert_eq!(delta.planned_counts(3).deleted, 1);
    }

    #[test]
    fn swapped_origin_ids_are_relocated_past_every_known_origin() {
        let snapshot = stage_products(
            Uuid::new_v4(),
            vec![record(2, "PRD001"), record(1, "PRD002")],
        );
        let destination = vec![
            stored_product(10, 1, "PRD001"),
            stored_product(11, 2, "PRD002"),
            // Stale high origin that the snapshot no longer knows about.
            stored_product(12, 50, "PRD009"),
        ];

        let delta = classify_products(&snapshot, &destination);
        assert_eq!(delta.updates.len(), 2);
        assert_eq!(
            delta.relocations,
            vec![
                OriginRelocation {
                    product_id: 10,
                    origin_id: 60,
                },
                OriginRelocation {
                    product_id: 11,
                    origin_id: 61,
                },
            ]
        );
    }

    #[test]
    fn prices_detect_product_moves_as_updates() {
        let destination_products = vec![stored_product(1, 1, "PRD001"), stored_product(2, 2, "PRD002")];
        let snapshot = stage_prices(
            Uuid::new_v4(),
            vec![
                crate::projection::ProjectedPrice {
                    origin_id: 100,
                    product_code: "PRD002".into(),
                    attributes: PriceAttributes::default(),
                },
                crate::projection::ProjectedPrice {
                    origin_id: 101,
                    product_code: "PRD001".into(),
                    attributes: PriceAttributes::default(),
                },
            ],
            &destination_products,
        );
        let destination = vec![stored_price(1, 100, 1), stored_price(2, 101, 1), stored_price(3, 102, 2)];

        let delta = classify_prices(&snapshot, &destination);
        assert_eq!(delta.updates.len(), 1);
        assert_eq!(delta.updates[0].origin_id, 100);
        assert_eq!(delta.unchanged, 1);
        assert_eq!(delta.orphans, vec![102]);
        assert!(delta.inserts.is_empty());
    }

    #[test]
    fn empty_destination_inserts_everything() {
        let snapshot = stage_products(Uuid::new_v4(), vec![record(1, "PRD001")]);
        let delta = classify_products(&snapshot, &[]);
        assert_eq!(delta.inserts.len(), 1);
        assert!(!delta.is_noop());
    }
}
