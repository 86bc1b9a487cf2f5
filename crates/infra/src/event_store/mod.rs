//! Append-only, tenant-scoped event streams.

pub mod in_memory;
pub mod postgres;
pub mod stream;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use stream::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
