//! Query-side catalog: the visibility rule runs inside Postgres, so hidden
//! rows are never fetched.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{Instrument, info_span};
use uuid::Uuid;

use storefront_core::TenantId;
use storefront_products::{ProductId, StorefrontVisibility};

use super::sql::{self, like_pattern};
use super::{CatalogError, CatalogPage, CatalogQuery, StorefrontCatalog};
use crate::projections::ProductReadModel;
use crate::read_model::postgres::decode_product_row;

const SCHEMA: &str = include_str!("../../migrations/0001_storefront_products.sql");

#[derive(Debug, Clone)]
pub struct PostgresCatalog {
    pool: PgPool,
}

impl PostgresCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create `storefront_products` and its indexes if missing.
    pub async fn ensure_schema(pool: &PgPool) -> Result<(), CatalogError> {
        sqlx::raw_sql(SCHEMA).execute(pool).await?;
        Ok(())
    }
}

#[async_trait]
impl StorefrontCatalog for PostgresCatalog {
    async fn search(
        &self,
        tenant_id: TenantId,
        visibility: &StorefrontVisibility,
        query: &CatalogQuery,
    ) -> Result<CatalogPage, CatalogError> {
        let terms = query.terms();
        let patterns: Vec<String> = terms.iter().map(|t| like_pattern(t)).collect();
        let statements = sql::search_statements(patterns.len());
        let span = info_span!(
            "catalog.search",
            %tenant_id,
            now = %visibility.now(),
            terms = patterns.len(),
            hits = tracing::field::Empty,
        );

        async {
            let mut count = sqlx::query_scalar::<_, i64>(&statements.count)
                .bind(*tenant_id.as_uuid())
                .bind(visibility.now());
            for p in &patterns {
                count = count.bind(p);
            }
            let total = u64::try_from(count.fetch_one(&self.pool).await?).unwrap_or_default();

            let p = query.pagination;
            let mut page = sqlx::query(&statements.page)
                .bind(*tenant_id.as_uuid())
                .bind(visibility.now());
            for pattern in &patterns {
                page = page.bind(pattern);
            }
            let rows = page
                .bind(i64::from(p.limit))
                .bind(i64::from(p.offset))
                .fetch_all(&self.pool)
                .await?;

            tracing::Span::current().record("hits", total);
            let items = rows.iter().filter_map(decode_product_row).collect();
            Ok::<_, CatalogError>(CatalogPage::new(items, total, p))
        }
        .instrument(span)
        .await
    }

    async fn visible_product(
        &self,
        tenant_id: TenantId,
        visibility: &StorefrontVisibility,
        product_id: ProductId,
    ) -> Result<Option<ProductReadModel>, CatalogError> {
        let row = sqlx::query(&sql::visible_product_statement())
            .bind(*tenant_id.as_uuid())
            .bind(visibility.now())
            .bind(*product_id.0.as_uuid())
            .fetch_optional(&self.pool)
            .instrument(info_span!("catalog.visible_product", %tenant_id, %product_id))
            .await?;

        Ok(row.as_ref().and_then(decode_product_row))
    }

    async fn all_visible(
        &self,
        tenant_id: TenantId,
        visibility: &StorefrontVisibility,
    ) -> Result<Vec<ProductReadModel>, CatalogError> {
        let rows = sqlx::query(&sql::all_visible_statement())
            .bind(*tenant_id.as_uuid())
            .bind(visibility.now())
            .fetch_all(&self.pool)
            .instrument(info_span!("catalog.all_visible", %tenant_id))
            .await?;

        Ok(rows.iter().filter_map(decode_product_row).collect())
    }

    async fn products_by_ids(
        &self,
        tenant_id: TenantId,
        ids: &[ProductId],
    ) -> Result<Vec<ProductReadModel>, CatalogError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<Uuid> = ids.iter().map(|id| *id.0.as_uuid()).collect();

        let rows = sqlx::query(&sql::products_by_ids_statement())
            .bind(*tenant_id.as_uuid())
            .bind(&ids)
            .fetch_all(&self.pool)
            .instrument(info_span!("catalog.products_by_ids", %tenant_id))
            .await?;

        Ok(rows.iter().filter_map(decode_product_row).collect())
    }
}
