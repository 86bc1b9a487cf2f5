//! Full pipeline: command → event store → bus → projection worker → catalog.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use storefront_core::{AggregateId, TenantId};
use storefront_events::{EventBus, EventEnvelope, InMemoryEventBus};
use storefront_products::{
    CreateProduct, Product, ProductCommand, ProductId, PublishWindow, SchedulePublication,
    StorefrontVisibility, UnpublishProduct,
};

use crate::catalog::{CatalogQuery, Pagination, StorefrontCatalog};
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, InMemoryEventStore};
use crate::projections::{PRODUCT_AGGREGATE_TYPE, ProductCatalogProjection, ProductReadModel};
use crate::read_model::InMemoryTenantStore;
use crate::workers::{ProjectionWorker, WorkerHandle};

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Catalog = ProductCatalogProjection<Arc<InMemoryTenantStore<ProductId, ProductReadModel>>>;

struct Pipeline {
    dispatcher: CommandDispatcher<Arc<InMemoryEventStore>, Bus>,
    store: Arc<InMemoryEventStore>,
    catalog: Arc<Catalog>,
    worker: Option<WorkerHandle>,
}

impl Pipeline {
    fn start() -> Self {
        let store = Arc::new(InMemoryEventStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let catalog: Arc<Catalog> = Arc::new(
            ProductCatalogProjection::new(Arc::new(InMemoryTenantStore::new())).with_replay(store.clone()),
        );

        let projection = catalog.clone();
        let worker = ProjectionWorker::spawn("products-catalog", &bus, None, move |env: EventEnvelope<JsonValue>| {
            projection.apply_envelope(&env)
        })
        .unwrap();

        Self {
            dispatcher: CommandDispatcher::new(store.clone(), bus),
            store,
            catalog,
            worker: Some(worker),
        }
    }

    fn run(&self, tenant_id: TenantId, product_id: ProductId, cmd: ProductCommand) -> Result<u64, DispatchError> {
        let committed = self.dispatcher.dispatch(tenant_id, product_id.0, PRODUCT_AGGREGATE_TYPE, cmd, |_, id| {
            Product::empty(ProductId::new(id))
        })?;
        Ok(committed.last().map_or(0, |e| e.sequence_number))
    }

    /// Wait until the read model has caught up with `version`.
    fn wait_for(&self, tenant_id: TenantId, product_id: ProductId, version: u64) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if self.catalog.get(tenant_id, &product_id).is_some_and(|rm| rm.version >= version) {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("read model did not reach version {version}");
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

fn create(tenant_id: TenantId, product_id: ProductId, name: &str, window: PublishWindow) -> ProductCommand {
    ProductCommand::CreateProduct(CreateProduct {
        tenant_id,
        product_id,
        sku: format!("SKU-{}", &product_id.to_string()[..8]),
        name: name.to_string(),
        pricing: None,
        website_published: true,
        window,
        occurred_at: Utc::now(),
    })
}

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-06-15T12:00:00Z").unwrap().with_timezone(&Utc)
}

fn search_all() -> CatalogQuery {
    CatalogQuery {
        search: Some("Test Product".to_string()),
        pagination: Pagination::default(),
    }
}

#[tokio::test]
async fn scheduled_window_drives_search_results() {
    let p = Pipeline::start();
    let t = TenantId::new();
    let id = ProductId::new(AggregateId::new());
    let n = now();

    let v = p.run(t, id, create(t, id, "Test Product", PublishWindow::unbounded())).unwrap();
    p.wait_for(t, id, v);
    let vis = StorefrontVisibility::at(n);
    assert_eq!(p.catalog.search(t, &vis, &search_all()).await.unwrap().total, 1);

    let v = p
        .run(
            t,
            id,
            ProductCommand::SchedulePublication(SchedulePublication {
                tenant_id: t,
                product_id: id,
                window: PublishWindow::starting_at(n + chrono::Duration::days(1)),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
    p.wait_for(t, id, v);

    assert!(p.catalog.search(t, &vis, &search_all()).await.unwrap().items.is_empty());
    let later = StorefrontVisibility::at(n + chrono::Duration::days(2));
    assert_eq!(p.catalog.search(t, &later, &search_all()).await.unwrap().total, 1);
}

#[tokio::test]
async fn unpublished_product_is_hidden_whatever_the_window() {
    let p = Pipeline::start();
    let t = TenantId::new();
    let id = ProductId::new(AggregateId::new());
    let n = now();
    let open = PublishWindow::new(Some(n - chrono::Duration::days(1)), Some(n + chrono::Duration::days(1)));

    p.run(t, id, create(t, id, "Test Product", open)).unwrap();
    let v = p
        .run(
            t,
            id,
            ProductCommand::UnpublishProduct(UnpublishProduct {
                tenant_id: t,
                product_id: id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
    p.wait_for(t, id, v);

    let vis = StorefrontVisibility::at(n);
    assert!(p.catalog.search(t, &vis, &search_all()).await.unwrap().items.is_empty());
    assert!(p.catalog.visible_product(t, &vis, id).await.unwrap().is_none());
    assert!(p.catalog.all_visible(t, &vis).await.unwrap().is_empty());

    // Still present for the back office.
    assert_eq!(p.catalog.list(t).len(), 1);
}

#[tokio::test]
async fn tenants_do_not_see_each_other() {
    let p = Pipeline::start();
    let t1 = TenantId::new();
    let t2 = TenantId::new();
    let id = ProductId::new(AggregateId::new());

    let v = p.run(t1, id, create(t1, id, "Test Product", PublishWindow::unbounded())).unwrap();
    p.wait_for(t1, id, v);

    let vis = StorefrontVisibility::at(now());
    assert_eq!(p.catalog.search(t1, &vis, &search_all()).await.unwrap().total, 1);
    assert_eq!(p.catalog.search(t2, &vis, &search_all()).await.unwrap().total, 0);
}

#[test]
fn rebuild_from_event_store_restores_the_read_model() {
    let p = Pipeline::start();
    let t = TenantId::new();
    let a = ProductId::new(AggregateId::new());
    let b = ProductId::new(AggregateId::new());

    p.run(t, a, create(t, a, "Alpha", PublishWindow::unbounded())).unwrap();
    let v = p.run(t, b, create(t, b, "Beta", PublishWindow::ending_at(now()))).unwrap();
    p.wait_for(t, b, v);

    let fresh: Catalog = ProductCatalogProjection::new(Arc::new(InMemoryTenantStore::new()));
    let envelopes = p.store.load_tenant(t).unwrap().iter().map(|e| e.to_envelope()).collect::<Vec<_>>();
    fresh.rebuild_from_scratch(envelopes).unwrap();

    let mut rebuilt = fresh.list(t);
    let mut live = p.catalog.list(t);
    rebuilt.sort_by_key(|rm| rm.name.clone());
    live.sort_by_key(|rm| rm.name.clone());
    assert_eq!(rebuilt, live);
}

#[test]
fn duplicate_create_is_a_conflict() {
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let _sub = bus.subscribe();
    let dispatcher = CommandDispatcher::new(store, bus);
    let t = TenantId::new();
    let id = ProductId::new(AggregateId::new());

    let first = dispatcher.dispatch(t, id.0, PRODUCT_AGGREGATE_TYPE, create(t, id, "One", PublishWindow::unbounded()), |_, aid| {
        Product::empty(ProductId::new(aid))
    });
    assert!(first.is_ok());

    let second = dispatcher.dispatch(t, id.0, PRODUCT_AGGREGATE_TYPE, create(t, id, "Two", PublishWindow::unbounded()), |_, aid| {
        Product::empty(ProductId::new(aid))
    });
    assert!(matches!(second, Err(DispatchError::Conflict(_))));
}
