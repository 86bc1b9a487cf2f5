//! HTTP API: storefront pages, back-office catalog routes, and wiring.

pub mod app;
pub mod config;
pub mod context;
pub mod middleware;
