//! Postgres-backed product read model (`storefront_products`).
//!
//! The projection worker drives this store from a plain thread, so the
//! [`TenantStore`] methods block on the runtime handle captured at
//! construction.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use storefront_core::{AggregateId, TenantId};
use storefront_products::{PricingMetadata, ProductId, PublishWindow};

use super::{ReadModelError, TenantStore};
use crate::catalog::sql::LISTING_ORDER;
use crate::projections::products::ProductReadModel;

/// Columns selected for a [`ProductReadModel`], shared with the catalog queries.
pub(crate) const PRODUCT_COLUMNS: &str = "product_id, sku, name, base_price, currency, website_published, \
     expected_publish_date, expected_unpublish_date, related_product_ids, version";

pub struct PostgresProductStore {
    pool: PgPool,
    handle: Handle,
}

impl PostgresProductStore {
    pub fn new(pool: PgPool, handle: Handle) -> Self {
        Self { pool, handle }
    }

    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        crate::blocking::block_on(&self.handle, fut)
    }
}

/// A bound column that fails to decode is treated as absent.
fn lenient_bound(row: &PgRow, column: &str, product_id: Uuid) -> Option<DateTime<Utc>> {
    match row.try_get::<Option<DateTime<Utc>>, _>(column) {
        Ok(value) => value,
        Err(err) => {
            warn!(%product_id, column, error = %err, "unreadable publish bound, treating as absent");
            None
        }
    }
}

/// Decode a `storefront_products` row. Rows missing an identity column are
/// dropped (logged); bad window bounds never drop the row.
pub(crate) fn decode_product_row(row: &PgRow) -> Option<ProductReadModel> {
    let decoded = (|| -> Result<ProductReadModel, sqlx::Error> {
        let product_id: Uuid = row.try_get("product_id")?;
        let base_price: Option<i64> = row.try_get("base_price")?;
        let related: Vec<Uuid> = row.try_get("related_product_ids").unwrap_or_default();
        let version: i64 = row.try_get("version")?;

        Ok(ProductReadModel {
            product_id: ProductId::new(AggregateId::from_uuid(product_id)),
            sku: row.try_get("sku")?,
            name: row.try_get("name")?,
            pricing: PricingMetadata {
                base_price: base_price.and_then(|p| u64::try_from(p).ok()),
                currency: row.try_get("currency")?,
            },
            website_published: row.try_get("website_published")?,
            window: PublishWindow::new(
                lenient_bound(row, "expected_publish_date", product_id),
                lenient_bound(row, "expected_unpublish_date", product_id),
            ),
            related_product_ids: related
                .into_iter()
                .map(|id| ProductId::new(AggregateId::from_uuid(id)))
                .collect(),
            version: u64::try_from(version).unwrap_or_default(),
        })
    })();

    match decoded {
        Ok(rm) => Some(rm),
        Err(err) => {
            warn!(error = %err, "dropping undecodable storefront_products row");
            None
        }
    }
}

impl TenantStore<ProductId, ProductReadModel> for PostgresProductStore {
    fn get(&self, tenant_id: TenantId, key: &ProductId) -> Option<ProductReadModel> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM storefront_products WHERE tenant_id = $1 AND product_id = $2"
        );
        let query = sqlx::query(&sql)
            .bind(*tenant_id.as_uuid())
            .bind(*key.0.as_uuid())
            .fetch_optional(&self.pool)
            .instrument(info_span!("read_model", operation = "get_product"));

        match self.block_on(query) {
            Ok(row) => row.as_ref().and_then(decode_product_row),
            Err(err) => {
                warn!(%tenant_id, product_id = %key, error = %err, "product read failed");
                None
            }
        }
    }

    fn upsert(&self, tenant_id: TenantId, key: ProductId, value: ProductReadModel) -> Result<(), ReadModelError> {
        let related: Vec<Uuid> = value.related_product_ids.iter().map(|id| *id.0.as_uuid()).collect();
        let base_price = value.pricing.base_price.and_then(|p| i64::try_from(p).ok());
        let version = i64::try_from(value.version).unwrap_or(i64::MAX);

        let query = sqlx::query(
            r#"
            INSERT INTO storefront_products (
                tenant_id, product_id, sku, name, base_price, currency,
                website_published, expected_publish_date, expected_unpublish_date,
                related_product_ids, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (tenant_id, product_id)
            DO UPDATE SET
                sku = EXCLUDED.sku,
                name = EXCLUDED.name,
                base_price = EXCLUDED.base_price,
                currency = EXCLUDED.currency,
                website_published = EXCLUDED.website_published,
                expected_publish_date = EXCLUDED.expected_publish_date,
                expected_unpublish_date = EXCLUDED.expected_unpublish_date,
                related_product_ids = EXCLUDED.related_product_ids,
                version = EXCLUDED.version,
                updated_at = NOW()
            "#,
        )
        .bind(*tenant_id.as_uuid())
        .bind(*key.0.as_uuid())
        .bind(&value.sku)
        .bind(&value.name)
        .bind(base_price)
        .bind(&value.pricing.currency)
        .bind(value.website_published)
        .bind(value.window.expected_publish_date)
        .bind(value.window.expected_unpublish_date)
        .bind(&related)
        .bind(version)
        .execute(&self.pool)
        .instrument(info_span!("read_model", operation = "upsert_product"));

        self.block_on(query).map_err(|err| {
            warn!(%tenant_id, product_id = %key, error = %err, "product upsert failed");
            ReadModelError::Backend(err.to_string())
        })?;
        Ok(())
    }

    fn list(&self, tenant_id: TenantId) -> Vec<ProductReadModel> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM storefront_products WHERE tenant_id = $1 ORDER BY {LISTING_ORDER}"
        );
        let query = sqlx::query(&sql)
            .bind(*tenant_id.as_uuid())
            .fetch_all(&self.pool)
            .instrument(info_span!("read_model", operation = "list_products"));

        match self.block_on(query) {
            Ok(rows) => rows.iter().filter_map(decode_product_row).collect(),
            Err(err) => {
                warn!(%tenant_id, error = %err, "product listing failed");
                vec![]
            }
        }
    }

    fn clear_all(&self) -> Result<(), ReadModelError> {
        let query = sqlx::query("DELETE FROM storefront_products")
            .execute(&self.pool)
            .instrument(info_span!("read_model", operation = "clear_products"));

        let cleared = self
            .block_on(query)
            .map_err(|err| ReadModelError::Backend(err.to_string()))?;
        info!(rows = cleared.rows_affected(), "product read model cleared");
        Ok(())
    }
}
