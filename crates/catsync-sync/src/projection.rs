//! Deduplicated, normalized views over the legacy tables.

use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use catsync_core::normalize;
use catsync_core::{PriceAttributes, ProductAttributes, ProductRecord, RawPriceRecord, RawProductRecord};
use tracing::warn;

/// Legacy status value marking a price row as active (compared trimmed, lowercase).
pub const ACTIVE_PRICE_STATUS: &str = "ativo";

/// Normalized price still keyed by product code; the product id is resolved at staging time.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedPrice {
    pub origin_id: i64,
    pub product_code: String,
    pub attributes: PriceAttributes,
}

/// Normalizes one raw product. Rows without a usable code have no natural key.
pub fn normalize_product(raw: &RawProductRecord) -> Option<ProductRecord> {
    let code = normalize::product_code(raw.code.as_deref())?;
    Some(ProductRecord {
        origin_id: raw.id,
        code,
        attributes: ProductAttributes {
            name: normalize::text(raw.name.as_deref()),
            category: normalize::upper_text(raw.category.as_deref()),
            subcategory: normalize::upper_text(raw.subcategory.as_deref()),
            description: normalize::text(raw.description.as_deref()),
            manufacturer: normalize::text(raw.manufacturer.as_deref()),
            model: normalize::upper_text(raw.model.as_deref()),
            color: normalize::upper_text(raw.color.as_deref()),
            weight_grams: normalize::weight_grams(raw.weight.as_deref()),
            width_cm: normalize::dimension_cm(raw.width.as_deref()),
            height_cm: normalize::dimension_cm(raw.height.as_deref()),
            depth_cm: normalize::dimension_cm(raw.depth.as_deref()),
            unit: normalize::upper_text(raw.unit.as_deref()),
            registered_on: normalize::date(raw.registered_on.as_deref()),
        },
    })
}

/// Active products with a code, one per normalized code; the lowest raw id wins.
pub fn project_products(raw: &[RawProductRecord]) -> Vec<ProductRecord> {
    let mut winners: BTreeMap<String, ProductRecord> = BTreeMap::new();
    for record in raw.iter().filter(|r| r.active).filter_map(normalize_product) {
        match winners.entry(record.code.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
            Entry::Occupied(mut slot) => {
                if record.origin_id < slot.get().origin_id {
                    slot.insert(record);
                }
            }
        }
    }
    winners.into_values().collect()
}

pub fn is_active_price(raw: &RawPriceRecord) -> bool {
    raw.status
        .as_deref()
        .is_some_and(|status| status.trim().to_lowercase() == ACTIVE_PRICE_STATUS)
}

/// Normalizes one raw price. Rows without an id or a product code cannot be keyed.
pub fn normalize_price(raw: &RawPriceRecord) -> Option<ProjectedPrice> {
    let origin_id = raw.id?;
    let product_code = normalize::product_code(raw.product_code.as_deref())?;
    Some(ProjectedPrice {
        origin_id,
        product_code,
        attributes: PriceAttributes {
            amount: normalize::money(raw.amount.as_deref()),
            currency: normalize::upper_text(raw.currency.as_deref()),
            discount: normalize::fraction(raw.discount.as_deref()),
            surcharge: normalize::fraction(raw.surcharge.as_deref()),
            promo_amount: normalize::money(raw.promo_amount.as_deref()),
            promo_starts_on: normalize::date(raw.promo_starts_on.as_deref()),
            promo_ends_on: normalize::date(raw.promo_ends_on.as_deref()),
            updated_on: normalize::date(raw.updated_on.as_deref()),
            channel: normalize::upper_text(raw.channel.as_deref()),
            customer_type: normalize::upper_text(raw.customer_type.as_deref()),
            agent: normalize::text(raw.agent.as_deref()),
            note: normalize::text(raw.note.as_deref()),
        },
    })
}

/// Active prices whose product code survives the product projection.
///
/// Exact duplicates collapse silently. Distinct rows sharing an origin id keep the
/// lowest one under [`price_rank`], so the winner does not depend on read order.
pub fn project_prices(
    raw: &[RawPriceRecord],
    product_codes: &BTreeSet<String>,
) -> Vec<ProjectedPrice> {
    let mut by_origin: BTreeMap<i64, ProjectedPrice> = BTreeMap::new();
    for price in raw
        .iter()
        .filter(|r| is_active_price(r))
        .filter_map(normalize_price)
    {
        if !product_codes.contains(&price.product_code) {
            continue;
        }
        match by_origin.entry(price.origin_id) {
            Entry::Vacant(slot) => {
                slot.insert(price);
            }
            Entry::Occupied(mut slot) => {
                if *slot.get() == price {
                    continue;
                }
                warn!(
                    origin_id = price.origin_id,
                    "conflicting legacy price rows share an origin id; keeping the lowest-ranked"
                );
                if price_rank(&price, slot.get()) == Ordering::Less {
                    slot.insert(price);
                }
            }
        }
    }
    by_origin.into_values().collect()
}

/// Total order over normalized prices: product code, then every attribute in
/// declaration order. Missing values sort first; amounts compare by `f64::total_cmp`.
pub fn price_rank(a: &ProjectedPrice, b: &ProjectedPrice) -> Ordering {
    let (x, y) = (&a.attributes, &b.attributes);
    a.origin_id
        .cmp(&b.origin_id)
        .then_with(|| a.product_code.cmp(&b.product_code))
        .then_with(|| cmp_number(x.amount, y.amount))
        .then_with(|| x.currency.cmp(&y.currency))
        .then_with(|| cmp_number(x.discount, y.discount))
        .then_with(|| cmp_number(x.surcharge, y.surcharge))
        .then_with(|| cmp_number(x.promo_amount, y.promo_amount))
        .then_with(|| x.promo_starts_on.cmp(&y.promo_starts_on))
        .then_with(|| x.promo_ends_on.cmp(&y.promo_ends_on))
        .then_with(|| x.updated_on.cmp(&y.updated_on))
        .then_with(|| x.channel.cmp(&y.channel))
        .then_with(|| x.customer_type.cmp(&y.customer_type))
        .then_with(|| x.agent.cmp(&y.agent))
        .then_with(|| x.note.cmp(&y.note))
}

fn cmp_number(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.total_cmp(&b),
    }
}
