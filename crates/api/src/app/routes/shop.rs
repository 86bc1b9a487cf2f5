//! Customer-facing routes. Every handler takes one visibility snapshot and
//! hands it to the catalog; nothing here re-reads the clock.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use tracing::{debug, error};

use storefront_core::AggregateId;
use storefront_infra::catalog::{CatalogQuery, Pagination};
use storefront_products::ProductId;

use crate::app::services::AppServices;
use crate::app::{dto, errors, html};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(search))
        .route("/product/:id", get(product_page))
        .route("/product/:id/related", get(related_products))
}

fn not_found() -> axum::response::Response {
    (StatusCode::NOT_FOUND, Html(html::not_found_page())).into_response()
}

pub async fn search(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(params): Query<dto::ShopQuery>,
) -> axum::response::Response {
    let tenant_id = tenant.tenant_id();
    let visibility = services.visibility();
    let search = params
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let page_number = params.page_number();

    let query = CatalogQuery {
        search: search.map(str::to_string),
        pagination: Pagination::page(page_number, services.shop_page_size()),
    };

    match services.catalog().search(tenant_id, &visibility, &query).await {
        Ok(page) => {
            debug!(%tenant_id, now = %visibility.now(), hits = page.total, "shop search");
            Html(html::shop_page(search, Some(&page), page_number)).into_response()
        }
        Err(err) => {
            error!(%tenant_id, error = %err, "shop search failed, rendering empty page");
            Html(html::shop_page(search, None, page_number)).into_response()
        }
    }
}

pub async fn product_page(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Ok(aggregate_id) = id.parse::<AggregateId>() else {
        return not_found();
    };
    let visibility = services.visibility();

    match services
        .catalog()
        .visible_product(tenant.tenant_id(), &visibility, ProductId::new(aggregate_id))
        .await
    {
        Ok(Some(rm)) => Html(html::product_page(&rm)).into_response(),
        Ok(None) => not_found(),
        Err(err) => errors::catalog_error_to_response(err),
    }
}

pub async fn related_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Ok(aggregate_id) = id.parse::<AggregateId>() else {
        return errors::invalid_product_id();
    };
    let visibility = services.visibility();

    match services
        .catalog()
        .related_products(tenant.tenant_id(), &visibility, ProductId::new(aggregate_id))
        .await
    {
        Ok(Some(related)) => {
            let items: Vec<_> = related.iter().map(dto::storefront_product_to_json).collect();
            Json(serde_json::json!({ "items": items })).into_response()
        }
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "product not found"),
        Err(err) => errors::catalog_error_to_response(err),
    }
}

pub async fn sitemap(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    let visibility = services.visibility();

    match services.catalog().all_visible(tenant.tenant_id(), &visibility).await {
        Ok(products) => (
            [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
            html::sitemap(services.public_base_url(), &products),
        )
            .into_response(),
        Err(err) => errors::catalog_error_to_response(err),
    }
}
