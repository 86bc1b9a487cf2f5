//! Row-side catalog over the projection's tenant store.

use async_trait::async_trait;
use tracing::debug;

use storefront_core::TenantId;
use storefront_products::{ProductId, StorefrontVisibility};

use super::{CatalogError, CatalogPage, CatalogQuery, StorefrontCatalog};
use crate::projections::{ProductCatalogProjection, ProductReadModel};
use crate::read_model::TenantStore;

fn matches_terms(rm: &ProductReadModel, terms: &[String]) -> bool {
    let name = rm.name.to_lowercase();
    let sku = rm.sku.to_lowercase();
    terms.iter().all(|t| name.contains(t.as_str()) || sku.contains(t.as_str()))
}

fn by_name(a: &ProductReadModel, b: &ProductReadModel) -> std::cmp::Ordering {
    a.name
        .cmp(&b.name)
        .then_with(|| a.sku.cmp(&b.sku))
        .then_with(|| a.product_id.0.as_uuid().cmp(b.product_id.0.as_uuid()))
}

#[async_trait]
impl<S> StorefrontCatalog for ProductCatalogProjection<S>
where
    S: TenantStore<ProductId, ProductReadModel>,
{
    async fn search(
        &self,
        tenant_id: TenantId,
        visibility: &StorefrontVisibility,
        query: &CatalogQuery,
    ) -> Result<CatalogPage, CatalogError> {
        let terms = query.terms();
        let mut hits: Vec<ProductReadModel> = visibility
            .retain(self.store().list(tenant_id))
            .into_iter()
            .filter(|rm| matches_terms(rm, &terms))
            .collect();
        hits.sort_by(by_name);

        let total = hits.len() as u64;
        let p = query.pagination;
        let items: Vec<ProductReadModel> = hits
            .into_iter()
            .skip(p.offset as usize)
            .take(p.limit as usize)
            .collect();

        debug!(%tenant_id, now = %visibility.now(), hits = total, "row-side catalog search");
        Ok(CatalogPage::new(items, total, p))
    }

    async fn visible_product(
        &self,
        tenant_id: TenantId,
        visibility: &StorefrontVisibility,
        product_id: ProductId,
    ) -> Result<Option<ProductReadModel>, CatalogError> {
        Ok(self
            .store()
            .get(tenant_id, &product_id)
            .filter(|rm| visibility.admits(rm)))
    }

    async fn all_visible(
        &self,
        tenant_id: TenantId,
        visibility: &StorefrontVisibility,
    ) -> Result<Vec<ProductReadModel>, CatalogError> {
        let mut rows = visibility.retain(self.store().list(tenant_id));
        rows.sort_by(by_name);
        Ok(rows)
    }

    async fn products_by_ids(
        &self,
        tenant_id: TenantId,
        ids: &[ProductId],
    ) -> Result<Vec<ProductReadModel>, CatalogError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.store().get(tenant_id, id))
            .collect())
    }
}
