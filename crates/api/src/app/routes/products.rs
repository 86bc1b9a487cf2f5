use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;

use storefront_core::AggregateId;
use storefront_infra::event_store::StoredEvent;
use storefront_infra::projections::PRODUCT_AGGREGATE_TYPE;
use storefront_products::{
    CreateProduct, Product, ProductCommand, ProductId, PublishProduct, SchedulePublication,
    SetRelatedProducts, UnpublishProduct,
};

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_product).get(list_products))
        .route("/:id", get(get_product))
        .route("/:id/publish", post(publish_product))
        .route("/:id/unpublish", post(unpublish_product))
        .route("/:id/window", put(schedule_window))
        .route("/:id/related", put(set_related))
}

fn parse_id(id: &str) -> Result<ProductId, axum::response::Response> {
    id.parse::<AggregateId>()
        .map(ProductId::new)
        .map_err(|_| errors::invalid_product_id())
}

fn run(
    services: &AppServices,
    tenant: &TenantContext,
    product_id: ProductId,
    cmd: ProductCommand,
) -> Result<Vec<StoredEvent>, axum::response::Response> {
    services
        .dispatch::<Product>(
            tenant.tenant_id(),
            product_id.0,
            PRODUCT_AGGREGATE_TYPE,
            cmd,
            |_t, aggregate_id| Product::empty(ProductId::new(aggregate_id)),
        )
        .map_err(errors::dispatch_error_to_response)
}

/// `version` lets callers wait for the read model to catch up.
fn committed_response(status: StatusCode, product_id: ProductId, committed: &[StoredEvent]) -> axum::response::Response {
    (
        status,
        Json(serde_json::json!({
            "id": product_id.to_string(),
            "events_committed": committed.len(),
            "version": committed.last().map(|e| e.sequence_number),
        })),
    )
        .into_response()
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<dto::CreateProductRequest>,
) -> axum::response::Response {
    let window = match body.window() {
        Ok(w) => w,
        Err(resp) => return resp,
    };
    let product_id = ProductId::new(AggregateId::new());

    let cmd = ProductCommand::CreateProduct(CreateProduct {
        tenant_id: tenant.tenant_id(),
        product_id,
        sku: body.sku,
        name: body.name,
        pricing: body.pricing,
        website_published: body.website_published,
        window,
        occurred_at: Utc::now(),
    });

    match run(&services, &tenant, product_id, cmd) {
        Ok(committed) => committed_response(StatusCode::CREATED, product_id, &committed),
        Err(resp) => resp,
    }
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> impl IntoResponse {
    let items: Vec<_> = services
        .product_list(tenant.tenant_id())
        .iter()
        .map(dto::product_to_json)
        .collect();

    Json(serde_json::json!({ "items": items }))
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.product_get(tenant.tenant_id(), &product_id) {
        Some(rm) => (StatusCode::OK, Json(dto::product_to_json(&rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "product not found"),
    }
}

pub async fn publish_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = ProductCommand::PublishProduct(PublishProduct {
        tenant_id: tenant.tenant_id(),
        product_id,
        occurred_at: Utc::now(),
    });

    match run(&services, &tenant, product_id, cmd) {
        Ok(committed) => committed_response(StatusCode::OK, product_id, &committed),
        Err(resp) => resp,
    }
}

pub async fn unpublish_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = ProductCommand::UnpublishProduct(UnpublishProduct {
        tenant_id: tenant.tenant_id(),
        product_id,
        occurred_at: Utc::now(),
    });

    match run(&services, &tenant, product_id, cmd) {
        Ok(committed) => committed_response(StatusCode::OK, product_id, &committed),
        Err(resp) => resp,
    }
}

pub async fn schedule_window(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ScheduleWindowRequest>,
) -> axum::response::Response {
    let product_id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let window = match body.window() {
        Ok(w) => w,
        Err(resp) => return resp,
    };

    let cmd = ProductCommand::SchedulePublication(SchedulePublication {
        tenant_id: tenant.tenant_id(),
        product_id,
        window,
        occurred_at: Utc::now(),
    });

    match run(&services, &tenant, product_id, cmd) {
        Ok(committed) => committed_response(StatusCode::OK, product_id, &committed),
        Err(resp) => resp,
    }
}

pub async fn set_related(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::SetRelatedRequest>,
) -> axum::response::Response {
    let product_id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let related_product_ids = match body.product_ids() {
        Ok(ids) => ids,
        Err(resp) => return resp,
    };

    let cmd = ProductCommand::SetRelatedProducts(SetRelatedProducts {
        tenant_id: tenant.tenant_id(),
        product_id,
        related_product_ids,
        occurred_at: Utc::now(),
    });

    match run(&services, &tenant, product_id, cmd) {
        Ok(committed) => committed_response(StatusCode::OK, product_id, &committed),
        Err(resp) => resp,
    }
}
