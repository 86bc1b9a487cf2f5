//! Storefront catalog: every customer-facing listing goes through here.
//!
//! All surfaces (search, product page, related products, sitemap) take the
//! same [`StorefrontVisibility`] snapshot, so one request sees one `now`.
//! Backends:
//!
//! - [`ProductCatalogProjection`] filters row-side over the tenant store.
//! - [`PostgresCatalog`] pushes the rule into SQL ([`sql::VisibilityClause`]).

pub mod in_memory;
pub mod postgres;
pub mod sql;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use storefront_core::TenantId;
use storefront_products::{ProductId, StorefrontVisibility};

use crate::projections::ProductReadModel;

pub use postgres::PostgresCatalog;

/// Paging for storefront listings (0-based offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Pagination {
    pub const MAX_LIMIT: u32 = 100;

    pub fn new(limit: u32, offset: u32) -> Self {
        Self {
            limit: limit.clamp(1, Self::MAX_LIMIT),
            offset,
        }
    }

    /// 1-based page number to limit/offset. Page 0 is read as page 1.
    pub fn page(page: u32, page_size: u32) -> Self {
        let limit = page_size.clamp(1, Self::MAX_LIMIT);
        Self::new(limit, page.saturating_sub(1).saturating_mul(limit))
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(20, 0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogQuery {
    /// Free text; every whitespace-separated word must match name or SKU.
    pub search: Option<String>,
    pub pagination: Pagination,
}

impl CatalogQuery {
    /// Lowercased search words; empty when there is nothing to filter on.
    pub fn terms(&self) -> Vec<String> {
        self.search
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_lowercase)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPage {
    pub items: Vec<ProductReadModel>,
    /// Matching products across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl CatalogPage {
    pub fn new(items: Vec<ProductReadModel>, total: u64, pagination: Pagination) -> Self {
        let has_more = u64::from(pagination.offset) + (items.len() as u64) < total;
        Self {
            items,
            total,
            pagination,
            has_more,
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog backend unavailable: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for CatalogError {
    fn from(value: sqlx::Error) -> Self {
        CatalogError::Backend(value.to_string())
    }
}

/// Read-only storefront view of the product catalog.
///
/// Every method except [`products_by_ids`](Self::products_by_ids) returns
/// only products admitted by `visibility`.
#[async_trait]
pub trait StorefrontCatalog: Send + Sync {
    /// Search results for the `/shop` listing, sorted by name.
    async fn search(
        &self,
        tenant_id: TenantId,
        visibility: &StorefrontVisibility,
        query: &CatalogQuery,
    ) -> Result<CatalogPage, CatalogError>;

    /// A single product, or `None` when it is unknown or not currently visible.
    async fn visible_product(
        &self,
        tenant_id: TenantId,
        visibility: &StorefrontVisibility,
        product_id: ProductId,
    ) -> Result<Option<ProductReadModel>, CatalogError>;

    /// Every currently visible product (sitemap).
    async fn all_visible(
        &self,
        tenant_id: TenantId,
        visibility: &StorefrontVisibility,
    ) -> Result<Vec<ProductReadModel>, CatalogError>;

    /// Unfiltered lookup by id; callers apply visibility themselves.
    async fn products_by_ids(
        &self,
        tenant_id: TenantId,
        ids: &[ProductId],
    ) -> Result<Vec<ProductReadModel>, CatalogError>;

    /// Related products of a visible anchor, filtered row-side and kept in
    /// the anchor's order. `None` when the anchor itself is not visible.
    async fn related_products(
        &self,
        tenant_id: TenantId,
        visibility: &StorefrontVisibility,
        product_id: ProductId,
    ) -> Result<Option<Vec<ProductReadModel>>, CatalogError> {
        let Some(anchor) = self.visible_product(tenant_id, visibility, product_id).await? else {
            return Ok(None);
        };

        let mut candidates = self
            .products_by_ids(tenant_id, &anchor.related_product_ids)
            .await?;
        candidates.sort_by_key(|rm| {
            anchor
                .related_product_ids
                .iter()
                .position(|id| *id == rm.product_id)
        });

        Ok(Some(visibility.retain(candidates)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_numbers_map_to_offsets() {
        assert_eq!(Pagination::page(1, 20), Pagination { limit: 20, offset: 0 });
        assert_eq!(Pagination::page(3, 20), Pagination { limit: 20, offset: 40 });
        assert_eq!(Pagination::page(0, 20), Pagination { limit: 20, offset: 0 });
    }

    #[test]
    fn page_size_is_capped() {
        assert_eq!(Pagination::page(1, 10_000).limit, Pagination::MAX_LIMIT);
        assert_eq!(Pagination::page(1, 0).limit, 1);
    }

    #[test]
    fn search_terms_are_split_and_lowercased() {
        let query = CatalogQuery {
            search: Some("  Test   PRODUCT ".to_string()),
            pagination: Pagination::default(),
        };
        assert_eq!(query.terms(), vec!["test".to_string(), "product".to_string()]);
        assert!(CatalogQuery::default().terms().is_empty());
    }
}
