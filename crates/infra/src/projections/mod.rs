//! Projections: read models built from the event stream.
//!
//! Projections are rebuildable from events, tenant-partitioned, and
//! idempotent under at-least-once delivery.

pub mod products;

pub use products::{
    PRODUCT_AGGREGATE_TYPE, ProductCatalogProjection, ProductProjectionError, ProductReadModel,
};
