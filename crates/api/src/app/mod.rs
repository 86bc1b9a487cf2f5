//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring (event store/bus, projection, catalog)
//! - `routes/`: HTTP routes + handlers (back office and storefront)
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `html.rs`: storefront pages and the sitemap
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use storefront_core::Clock;

use crate::config::ApiConfig;
use crate::middleware::{self, TenantResolver};

pub mod dto;
pub mod errors;
pub mod html;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// `clock` is the only time source the storefront reads.
pub async fn build_app(config: ApiConfig, clock: Arc<dyn Clock>) -> Result<Router, services::ServicesError> {
    let resolver = TenantResolver {
        fallback: config.storefront_tenant_id,
    };
    let services = Arc::new(services::build_services(&config, clock).await?);

    // Tenant-scoped routes: storefront and back office.
    let scoped = routes::router()
        .layer(Extension(services.clone()))
        .layer(axum::middleware::from_fn_with_state(
            resolver,
            middleware::tenant_middleware,
        ));

    Ok(Router::new()
        .route("/health", get(routes::system::health))
        .layer(Extension(services))
        .merge(scoped)
        .layer(ServiceBuilder::new().layer(axum::middleware::from_fn(middleware::trace_request))))
}
