//! Tenant-partitioned read-model storage.

pub mod postgres;
pub mod tenant_store;

pub use postgres::PostgresProductStore;
pub use tenant_store::{InMemoryTenantStore, ReadModelError, TenantStore};
