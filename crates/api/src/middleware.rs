use std::time::Instant;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::info;

use storefront_core::TenantId;

use crate::app::errors::json_error;
use crate::context::TenantContext;

pub const TENANT_HEADER: &str = "x-tenant-id";

#[derive(Debug, Clone, Copy)]
pub struct TenantResolver {
    /// Used when the request has no tenant header (`STOREFRONT_TENANT_ID`).
    pub fallback: Option<TenantId>,
}

impl TenantResolver {
    pub fn resolve(&self, headers: &HeaderMap) -> Result<TenantId, Response> {
        let Some(raw) = headers.get(TENANT_HEADER) else {
            return self.fallback.ok_or_else(|| {
                json_error(StatusCode::BAD_REQUEST, "missing_tenant", "X-Tenant-Id header is required")
            });
        };

        raw.to_str()
            .ok()
            .and_then(|s| s.trim().parse::<TenantId>().ok())
            .ok_or_else(|| json_error(StatusCode::BAD_REQUEST, "invalid_tenant", "X-Tenant-Id is not a valid tenant id"))
    }
}

pub async fn tenant_middleware(
    State(resolver): State<TenantResolver>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let tenant_id = resolver.resolve(req.headers())?;
    req.extensions_mut().insert(TenantContext::new(tenant_id));

    Ok(next.run(req).await)
}

/// One structured log line per request.
pub async fn trace_request(req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    info!(
        %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}
