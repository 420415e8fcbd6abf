//! Postgres adapter for the catalog store (table layout in `sql/schema.sql`).

use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;
use catsync_core::{
    CatalogPage, NormalizedPrice, NormalizedProduct, PriceAttributes, PriceRecord,
    ProductAttributes, ProductRecord, ProductWithPrices, RawPriceRecord, RawProductRecord,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};

use crate::{CatalogStore, CatalogTx, OriginRelocation, StoreError};

const PRODUCT_COLUMNS: &str = r#"
    id, origin_id, code, name, category, subcategory, description, manufacturer, model, color,
    weight_grams, width_cm, height_cm, depth_cm, unit, registered_on, created_at, updated_at
"#;

const PRICE_COLUMNS: &str = r#"
    id, origin_id, product_id, amount, currency, discount, surcharge, promo_amount,
    promo_starts_on, promo_ends_on, updated_on, channel, customer_type, agent, note,
    created_at, updated_at
"#;

#[derive(Debug, Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn raw_products(&self) -> Result<Vec<RawProductRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, code, name, category, subcategory, description, manufacturer, model, color,
                   weight, width, height, depth, unit, registered_on,
                   COALESCE(active, 0) = 1 AS active
              FROM legacy_products
             ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(RawProductRecord {
                id: row.try_get("id")?,
                code: row.try_get("code")?,
                name: row.try_get("name")?,
                category: row.try_get("category")?,
                subcategory: row.try_get("subcategory")?,
                description: row.try_get("description")?,
                manufacturer: row.try_get("manufacturer")?,
                model: row.try_get("model")?,
                color: row.try_get("color")?,
                weight: row.try_get("weight")?,
                width: row.try_get("width")?,
                height: row.try_get("height")?,
                depth: row.try_get("depth")?,
                unit: row.try_get("unit")?,
                registered_on: row.try_get("registered_on")?,
                active: row.try_get("active")?,
            });
        }
        Ok(out)
    }

    async fn raw_prices(&self) -> Result<Vec<RawPriceRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_code, amount, currency, discount, surcharge, promo_amount,
                   promo_starts_on, promo_ends_on, updated_on, channel, customer_type, agent,
                   note, status
              FROM legacy_prices
             ORDER BY id NULLS LAST
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(RawPriceRecord {
                id: row.try_get("id")?,
                product_code: row.try_get("product_code")?,
                amount: row.try_get("amount")?,
                currency: row.try_get("currency")?,
                discount: row.try_get("discount")?,
                surcharge: row.try_get("surcharge")?,
                promo_amount: row.try_get("promo_amount")?,
                promo_starts_on: row.try_get("promo_starts_on")?,
                promo_ends_on: row.try_get("promo_ends_on")?,
                updated_on: row.try_get("updated_on")?,
                channel: row.try_get("channel")?,
                customer_type: row.try_get("customer_type")?,
                agent: row.try_get("agent")?,
                note: row.try_get("note")?,
                status: row.try_get("status")?,
            });
        }
        Ok(out)
    }

    async fn list_catalog(&self, page: u32, per_page: u32) -> Result<CatalogPage, StoreError> {
        let per_page = i64::from(per_page.max(1));
        let offset = (i64::from(page.max(1)) - 1) * per_page;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;

        let product_rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY id LIMIT $1 OFFSET $2"
        ))
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let products = product_rows
            .iter()
            .map(product_from_row)
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        let ids: Vec<i64> = products.iter().map(|p| p.id).collect();
        let price_rows = sqlx::query(&format!(
            "SELECT {PRICE_COLUMNS} FROM prices WHERE product_id = ANY($1) ORDER BY id"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut prices_by_product: BTreeMap<i64, Vec<NormalizedPrice>> = BTreeMap::new();
        for row in &price_rows {
            let price = price_from_row(row)?;
            prices_by_product.entry(price.product_id).or_default().push(price);
        }

        Ok(CatalogPage {
            products: products
                .into_iter()
                .map(|product| ProductWithPrices {
                    prices: prices_by_product.remove(&product.id).unwrap_or_default(),
                    product,
                })
                .collect(),
            total: total.max(0) as u64,
        })
    }

    async fn begin(&self) -> Result<Box<dyn CatalogTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgCatalogTx { tx }))
    }
}

struct PgCatalogTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CatalogTx for PgCatalogTx {
    async fn products(&mut self) -> Result<Vec<NormalizedProduct>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY id FOR UPDATE"
        ))
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows
            .iter()
            .map(product_from_row)
            .collect::<Result<Vec<_>, sqlx::Error>>()?)
    }

    async fn prices(&mut self) -> Result<Vec<NormalizedPrice>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PRICE_COLUMNS} FROM prices ORDER BY id FOR UPDATE"
        ))
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows
            .iter()
            .map(price_from_row)
            .collect::<Result<Vec<_>, sqlx::Error>>()?)
    }

    async fn delete_products_by_code(&mut self, codes: &[String]) -> Result<u64, StoreError> {
        if codes.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM products WHERE code = ANY($1)")
            .bind(codes)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn relocate_product_origins(
        &mut self,
        moves: &[OriginRelocation],
    ) -> Result<(), StoreError> {
        for relocation in moves {
            sqlx::query("UPDATE products SET origin_id = $1 WHERE id = $2")
                .bind(relocation.origin_id)
                .bind(relocation.product_id)
                .execute(&mut *self.tx)
                .await?;
        }
        Ok(())
    }

    async fn insert_product(&mut self, record: &ProductRecord) -> Result<(), StoreError> {
        let a = &record.attributes;
        sqlx::query(
            r#"
            INSERT INTO products (
                origin_id, code, name, category, subcategory, description, manufacturer, model,
                color, weight_grams, width_cm, height_cm, depth_cm, unit, registered_on,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, NOW(), NOW())
            "#,
        )
        .bind(record.origin_id)
        .bind(&record.code)
        .bind(&a.name)
        .bind(&a.category)
        .bind(&a.subcategory)
        .bind(&a.description)
        .bind(&a.manufacturer)
        .bind(&a.model)
        .bind(&a.color)
        .bind(a.weight_grams)
        .bind(a.width_cm)
        .bind(a.height_cm)
        .bind(a.depth_cm)
        .bind(&a.unit)
        .bind(a.registered_on)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_product(&mut self, record: &ProductRecord) -> Result<(), StoreError> {
        let a = &record.attributes;
        let result = sqlx::query(
            r#"
            UPDATE products
               SET origin_id = $2,
                   name = $3,
                   category = $4,
                   subcategory = $5,
                   description = $6,
                   manufacturer = $7,
                   model = $8,
                   color = $9,
                   weight_grams = $10,
                   width_cm = $11,
                   height_cm = $12,
                   depth_cm = $13,
                   unit = $14,
                   registered_on = $15,
                   updated_at = NOW()
             WHERE code = $1
            "#,
        )
        .bind(&record.code)
        .bind(record.origin_id)
        .bind(&a.name)
        .bind(&a.category)
        .bind(&a.subcategory)
        .bind(&a.description)
        .bind(&a.manufacturer)
        .bind(&a.model)
        .bind(&a.color)
        .bind(a.weight_grams)
        .bind(a.width_cm)
        .bind(a.height_cm)
        .bind(a.depth_cm)
        .bind(&a.unit)
        .bind(a.registered_on)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("product code {}", record.code)));
        }
        Ok(())
    }

    async fn delete_prices_by_origin(&mut self, origin_ids: &[i64]) -> Result<u64, StoreError> {
        if origin_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM prices WHERE origin_id = ANY($1)")
            .bind(origin_ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_price(&mut self, record: &PriceRecord) -> Result<(), StoreError> {
        let a = &record.attributes;
        sqlx::query(
            r#"
            INSERT INTO prices (
                origin_id, product_id, amount, currency, discount, surcharge, promo_amount,
                promo_starts_on, promo_ends_on, updated_on, channel, customer_type, agent, note,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, NOW(), NOW())
            "#,
        )
        .bind(record.origin_id)
        .bind(record.product_id)
        .bind(a.amount)
        .bind(&a.currency)
        .bind(a.discount)
        .bind(a.surcharge)
        .bind(a.promo_amount)
        .bind(a.promo_starts_on)
        .bind(a.promo_ends_on)
        .bind(a.updated_on)
        .bind(&a.channel)
        .bind(&a.customer_type)
        .bind(&a.agent)
        .bind(&a.note)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_price(&mut self, record: &PriceRecord) -> Result<(), StoreError> {
        let a = &record.attributes;
        let result = sqlx::query(
            r#"
            UPDATE prices
               SET product_id = $2,
                   amount = $3,
                   currency = $4,
                   discount = $5,
                   surcharge = $6,
                   promo_amount = $7,
                   promo_starts_on = $8,
                   promo_ends_on = $9,
                   updated_on = $10,
                   channel = $11,
                   customer_type = $12,
                   agent = $13,
                   note = $14,
                   updated_at = NOW()
             WHERE origin_id = $1
            "#,
        )
        .bind(record.origin_id)
        .bind(record.product_id)
        .bind(a.amount)
        .bind(&a.currency)
        .bind(a.discount)
        .bind(a.surcharge)
        .bind(a.promo_amount)
        .bind(a.promo_starts_on)
        .bind(a.promo_ends_on)
        .bind(a.updated_on)
        .bind(&a.channel)
        .bind(&a.customer_type)
        .bind(&a.agent)
        .bind(&a.note)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("price origin {}", record.origin_id)));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

fn product_from_row(row: &PgRow) -> Result<NormalizedProduct, sqlx::Error> {
    Ok(NormalizedProduct {
        id: row.try_get("id")?,
        origin_id: row.try_get("origin_id")?,
        code: row.try_get("code")?,
        attributes: ProductAttributes {
            name: row.try_get("name")?,
            category: row.try_get("category")?,
            subcategory: row.try_get("subcategory")?,
            description: row.try_get("description")?,
            manufacturer: row.try_get("manufacturer")?,
            model: row.try_get("model")?,
            color: row.try_get("color")?,
            weight_grams: row.try_get("weight_grams")?,
            width_cm: row.try_get("width_cm")?,
            height_cm: row.try_get("height_cm")?,
            depth_cm: row.try_get("depth_cm")?,
            unit: row.try_get("unit")?,
            registered_on: row.try_get("registered_on")?,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn price_from_row(row: &PgRow) -> Result<NormalizedPrice, sqlx::Error> {
    Ok(NormalizedPrice {
        id: row.try_get("id")?,
        origin_id: row.try_get("origin_id")?,
        product_id: row.try_get("product_id")?,
        attributes: PriceAttributes {
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            discount: row.try_get("discount")?,
            surcharge: row.try_get("surcharge")?,
            promo_amount: row.try_get("promo_amount")?,
            promo_starts_on: row.try_get("promo_starts_on")?,
            promo_ends_on: row.try_get("promo_ends_on")?,
            updated_on: row.try_get("updated_on")?,
            channel: row.try_get("channel")?,
            customer_type: row.try_get("customer_type")?,
            agent: row.try_get("agent")?,
            note: row.try_get("note")?,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
