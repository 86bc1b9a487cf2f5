use axum::{routing::get, Router};

pub mod products;
pub mod shop;
pub mod system;

/// Router for all tenant-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/products", products::router())
        .nest("/shop", shop::router())
        .route("/sitemap.xml", get(shop::sitemap))
}
