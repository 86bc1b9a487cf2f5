use std::sync::Arc;

use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{info, warn};

use storefront_core::{AggregateId, Clock, DomainError, TenantId};
use storefront_events::{EventEnvelope, InMemoryEventBus};
use storefront_infra::{
    catalog::{CatalogError, PostgresCatalog, StorefrontCatalog},
    command_dispatcher::{CommandDispatcher, DispatchError},
    event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore, StoredEvent},
    projections::{ProductCatalogProjection, ProductProjectionError, ProductReadModel},
    read_model::{InMemoryTenantStore, PostgresProductStore},
    workers::{ProjectionWorker, RetryPolicy, WorkerHandle},
};
use storefront_products::{ProductId, StorefrontVisibility};

use crate::config::ApiConfig;

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Dispatcher = CommandDispatcher<Arc<dyn EventStore>, Bus>;
type InMemoryProducts = ProductCatalogProjection<Arc<InMemoryTenantStore<ProductId, ProductReadModel>>>;
type PersistentProducts = ProductCatalogProjection<Arc<PostgresProductStore>>;

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")]
    MissingDatabaseUrl,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    #[error("read model rebuild failed: {0}")]
    Rebuild(#[from] ProductProjectionError),

    #[error("read model rebuild did not complete: {0}")]
    RebuildAborted(#[from] tokio::task::JoinError),

    #[error("failed to start projection worker: {0}")]
    Worker(#[from] std::io::Error),
}

/// Where events and the product read model live.
///
/// Persistent mode keeps both in Postgres; the read model is rebuilt from
/// the event log at startup so it never lists a product whose history is
/// gone.
enum ReadSide {
    InMemory {
        projection: Arc<InMemoryProducts>,
    },
    Persistent {
        projection: Arc<PersistentProducts>,
        catalog: Arc<PostgresCatalog>,
    },
}

pub struct AppServices {
    dispatcher: Dispatcher,
    read_side: ReadSide,
    clock: Arc<dyn Clock>,
    shop_page_size: u32,
    public_base_url: String,
    worker: WorkerHandle,
}

pub async fn build_services(config: &ApiConfig, clock: Arc<dyn Clock>) -> Result<AppServices, ServicesError> {
    let bus: Bus = Arc::new(InMemoryEventBus::new());

    let (events, read_side, worker) = if config.use_persistent_stores {
        let url = config.database_url.as_deref().ok_or(ServicesError::MissingDatabaseUrl)?;
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        PostgresEventStore::ensure_schema(&pool).await?;
        PostgresCatalog::ensure_schema(&pool).await?;

        let events: Arc<dyn EventStore> = Arc::new(PostgresEventStore::new(pool.clone(), Handle::current()));
        let rm_store = Arc::new(PostgresProductStore::new(pool.clone(), Handle::current()));
        let projection: Arc<PersistentProducts> =
            Arc::new(ProductCatalogProjection::new(rm_store).with_replay(events.clone()));

        let replayed = rebuild_read_model(projection.clone(), events.clone()).await?;
        let worker = spawn_projection_worker(&bus, {
            let projection = projection.clone();
            move |env: &EventEnvelope<JsonValue>| projection.apply_envelope(env)
        })?;

        info!(read_model = "postgres", replayed, "storefront services ready");
        let read_side = ReadSide::Persistent {
            projection,
            catalog: Arc::new(PostgresCatalog::new(pool)),
        };
        (events, read_side, worker)
    } else {
        let events: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
        let projection: Arc<InMemoryProducts> = Arc::new(
            ProductCatalogProjection::new(Arc::new(InMemoryTenantStore::new())).with_replay(events.clone()),
        );
        let worker = spawn_projection_worker(&bus, {
            let projection = projection.clone();
            move |env: &EventEnvelope<JsonValue>| projection.apply_envelope(env)
        })?;

        info!(read_model = "in_memory", "storefront services ready");
        (events, ReadSide::InMemory { projection }, worker)
    };

    Ok(AppServices {
        dispatcher: CommandDispatcher::new(events, bus),
        read_side,
        clock,
        shop_page_size: config.shop_page_size,
        public_base_url: config.public_base_url.clone(),
        worker,
    })
}

/// Replace the persisted read model with a replay of the full event log.
async fn rebuild_read_model(
    projection: Arc<PersistentProducts>,
    events: Arc<dyn EventStore>,
) -> Result<usize, ServicesError> {
    tokio::task::spawn_blocking(move || {
        let history = events.load_all()?;
        let replayed = projection.rebuild_from_scratch(history.iter().map(StoredEvent::to_envelope))?;
        Ok::<_, ServicesError>(replayed)
    })
    .await?
}

/// Bus -> product read model, on its own thread.
///
/// Store failures are retried with backoff; anything else is logged once and
/// skipped, since redelivery cannot fix a bad payload.
fn spawn_projection_worker<F>(bus: &Bus, apply: F) -> std::io::Result<WorkerHandle>
where
    F: Fn(&EventEnvelope<JsonValue>) -> Result<(), ProductProjectionError> + Send + 'static,
{
    ProjectionWorker::spawn_with_retry(
        "products-catalog",
        bus,
        None,
        RetryPolicy::default(),
        move |env: EventEnvelope<JsonValue>| match apply(&env) {
            Err(err) if !err.is_transient() => {
                warn!(
                    tenant_id = %env.tenant_id(),
                    aggregate_id = %env.aggregate_id(),
                    seq = env.sequence_number(),
                    error = %err,
                    "product event not projected"
                );
                Ok(())
            }
            other => other,
        },
    )
}

impl AppServices {
    /// One `now` for the whole request.
    pub fn visibility(&self) -> StorefrontVisibility {
        StorefrontVisibility::snapshot(&self.clock)
    }

    pub fn catalog(&self) -> &dyn StorefrontCatalog {
        match &self.read_side {
            ReadSide::InMemory { projection } => projection.as_ref() as &dyn StorefrontCatalog,
            ReadSide::Persistent { catalog, .. } => catalog.as_ref() as &dyn StorefrontCatalog,
        }
    }

    pub fn read_model_kind(&self) -> &'static str {
        match &self.read_side {
            ReadSide::InMemory { .. } => "in_memory",
            ReadSide::Persistent { .. } => "postgres",
        }
    }

    pub fn worker_name(&self) -> &'static str {
        self.worker.name()
    }

    pub fn shop_page_size(&self) -> u32 {
        self.shop_page_size
    }

    pub fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: storefront_core::Aggregate<Error = DomainError>,
        A::Event: storefront_events::Event + serde::Serialize + serde::de::DeserializeOwned,
    {
        self.dispatcher
            .dispatch::<A>(tenant_id, aggregate_id, aggregate_type, command, make_aggregate)
    }

    /// Back-office lookup; ignores visibility.
    pub fn product_get(&self, tenant_id: TenantId, product_id: &ProductId) -> Option<ProductReadModel> {
        match &self.read_side {
            ReadSide::InMemory { projection } => projection.get(tenant_id, product_id),
            ReadSide::Persistent { projection, .. } => projection.get(tenant_id, product_id),
        }
    }

    pub fn product_list(&self, tenant_id: TenantId) -> Vec<ProductReadModel> {
        match &self.read_side {
            ReadSide::InMemory { projection } => projection.list(tenant_id),
            ReadSide::Persistent { projection, .. } => projection.list(tenant_id),
        }
    }
}
