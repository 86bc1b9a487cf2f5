use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};

use storefront_core::TenantId;
use storefront_events::EventEnvelope;
use storefront_products::{
    PricingMetadata, ProductEvent, ProductId, PublishWindow, Publishable,
};

use crate::event_store::EventStore;
use crate::read_model::{ReadModelError, TenantStore};

/// Aggregate type tag of product event streams.
pub const PRODUCT_AGGREGATE_TYPE: &str = "products.product";

/// Queryable product row backing the storefront and the back office.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductReadModel {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub pricing: PricingMetadata,
    pub website_published: bool,
    pub window: PublishWindow,
    pub related_product_ids: Vec<ProductId>,
    /// Sequence number of the last applied event; also the projection cursor.
    pub version: u64,
}

impl Publishable for ProductReadModel {
    fn is_published(&self) -> bool {
        self.website_published
    }

    fn publish_window(&self) -> PublishWindow {
        self.window
    }
}

#[derive(Debug, Error)]
pub enum ProductProjectionError {
    #[error("failed to deserialize product event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error(transparent)]
    Store(#[from] ReadModelError),

    #[error("replaying product stream failed: {0}")]
    Replay(String),
}

impl ProductProjectionError {
    /// Worth redelivering: the row was left at its previous version.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Replay(_))
    }
}

/// Builds [`ProductReadModel`]s from product event envelopes.
///
/// The row's `version` is the per-stream cursor: envelopes at or below it are
/// duplicates and skipped. A failed write leaves the row where it was, so the
/// next envelope shows up as a gap. With an event store attached the
/// projection closes a gap by replaying the missing part of the stream;
/// without one the gap is rejected.
pub struct ProductCatalogProjection<S> {
    store: S,
    events: Option<Arc<dyn EventStore>>,
}

impl<S: core::fmt::Debug> core::fmt::Debug for ProductCatalogProjection<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProductCatalogProjection")
            .field("store", &self.store)
            .field("replays_gaps", &self.events.is_some())
            .finish()
    }
}

/// A product envelope that passed the scope checks.
struct Decoded {
    tenant_id: TenantId,
    product_id: ProductId,
    seq: u64,
    event: ProductEvent,
}

fn decode(envelope: &EventEnvelope<JsonValue>) -> Result<Option<Decoded>, ProductProjectionError> {
    if envelope.aggregate_type() != PRODUCT_AGGREGATE_TYPE {
        return Ok(None);
    }

    let tenant_id = envelope.tenant_id();
    let event: ProductEvent = serde_json::from_value(envelope.payload().clone())
        .map_err(|e| ProductProjectionError::Deserialize(e.to_string()))?;

    let (event_tenant, product_id) = event.scope();
    if event_tenant != tenant_id {
        return Err(ProductProjectionError::TenantIsolation(
            "event tenant_id does not match envelope tenant_id".to_string(),
        ));
    }
    if product_id.0 != envelope.aggregate_id() {
        return Err(ProductProjectionError::TenantIsolation(
            "event product_id does not match envelope aggregate_id".to_string(),
        ));
    }

    Ok(Some(Decoded {
        tenant_id,
        product_id,
        seq: envelope.sequence_number(),
        event,
    }))
}

impl<S> ProductCatalogProjection<S>
where
    S: TenantStore<ProductId, ProductReadModel>,
{
    pub fn new(store: S) -> Self {
        Self { store, events: None }
    }

    /// Close sequence gaps by reading the stream back from `events`.
    pub fn with_replay(mut self, events: Arc<dyn EventStore>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn get(&self, tenant_id: TenantId, product_id: &ProductId) -> Option<ProductReadModel> {
        self.store.get(tenant_id, product_id)
    }

    /// Every product of the tenant, visible or not (back-office listing).
    pub fn list(&self, tenant_id: TenantId) -> Vec<ProductReadModel> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.sku.cmp(&b.sku)));
        rows
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProductProjectionError> {
        let Some(decoded) = decode(envelope)? else {
            return Ok(());
        };
        let (tenant_id, product_id, seq) = (decoded.tenant_id, decoded.product_id, decoded.seq);

        let last = self.store.get(tenant_id, &product_id).map_or(0, |rm| rm.version);
        if seq <= last {
            debug!(%tenant_id, %product_id, seq, "duplicate product event skipped");
            return Ok(());
        }
        if seq == last + 1 {
            return self.apply_next(decoded);
        }

        let Some(events) = &self.events else {
            return Err(ProductProjectionError::NonMonotonicSequence { last, found: seq });
        };
        self.catch_up(events.as_ref(), tenant_id, product_id, last, seq)
    }

    /// Apply committed events `last + 1 ..= target` of one stream.
    fn catch_up(
        &self,
        events: &dyn EventStore,
        tenant_id: TenantId,
        product_id: ProductId,
        last: u64,
        target: u64,
    ) -> Result<(), ProductProjectionError> {
        info!(%tenant_id, %product_id, from = last + 1, to = target, "replaying product stream to close a gap");

        let stream = events
            .load_stream(tenant_id, product_id.0)
            .map_err(|e| ProductProjectionError::Replay(e.to_string()))?;

        let mut applied = last;
        for stored in stream
            .iter()
            .filter(|e| e.sequence_number > last && e.sequence_number <= target)
        {
            if stored.sequence_number != applied + 1 {
                break;
            }
            if let Some(decoded) = decode(&stored.to_envelope())? {
                self.apply_next(decoded)?;
            }
            applied = stored.sequence_number;
        }

        if applied < target {
            return Err(ProductProjectionError::NonMonotonicSequence {
                last: applied,
                found: target,
            });
        }
        Ok(())
    }

    /// Fold an event that directly follows the stored row.
    fn apply_next(&self, decoded: Decoded) -> Result<(), ProductProjectionError> {
        let Decoded {
            tenant_id,
            product_id,
            seq,
            event,
        } = decoded;
        let existing = self.store.get(tenant_id, &product_id);

        let mut rm = match (event, existing) {
            (ProductEvent::ProductCreated(e), _) => {
                if e.window.is_inverted() {
                    warn!(%tenant_id, product_id = %e.product_id, "product created with an inverted publish window");
                }
                ProductReadModel {
                    product_id: e.product_id,
                    sku: e.sku,
                    name: e.name,
                    pricing: e.pricing,
                    website_published: e.website_published,
                    window: e.window,
                    related_product_ids: Vec::new(),
                    version: 0,
                }
            }
            (_, None) => {
                return Err(ProductProjectionError::NonMonotonicSequence { last: 0, found: seq });
            }
            (ProductEvent::ProductPublished(_), Some(mut rm)) => {
                rm.website_published = true;
                rm
            }
            (ProductEvent::ProductUnpublished(_), Some(mut rm)) => {
                rm.website_published = false;
                rm
            }
            (ProductEvent::PublicationScheduled(e), Some(mut rm)) => {
                if e.window.is_inverted() {
                    warn!(%tenant_id, %product_id, "publish window scheduled inverted; product stays hidden");
                }
                rm.window = e.window;
                rm
            }
            (ProductEvent::RelatedProductsSet(e), Some(mut rm)) => {
                rm.related_product_ids = e.related_product_ids;
                rm
            }
        };

        rm.version = seq;
        self.store.upsert(tenant_id, product_id, rm)?;
        Ok(())
    }

    /// Drop every row and replay `envelopes` in stream order.
    ///
    /// Run at startup against the full event log, so the read model only
    /// holds products whose history is still available to command handlers.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<usize, ProductProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| {
            (
                *e.tenant_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        self.store.clear_all()?;
        for env in &envs {
            self.apply_envelope(env)?;
        }
        info!(events = envs.len(), "product read model rebuilt");
        Ok(envs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use serde_json::json;
    use storefront_core::AggregateId;
    use storefront_products::{
        ProductCreated, ProductUnpublished, PublicationScheduled, RelatedProductsSet,
    };
    use uuid::Uuid;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use storefront_core::ExpectedVersion;

    use crate::event_store::{InMemoryEventStore, UncommittedEvent};
    use crate::read_model::InMemoryTenantStore;

    type Projection = ProductCatalogProjection<Arc<InMemoryTenantStore<ProductId, ProductReadModel>>>;

    fn projection() -> Projection {
        ProductCatalogProjection::new(Arc::new(InMemoryTenantStore::new()))
    }

    fn envelope(tenant_id: TenantId, product_id: ProductId, seq: u64, ev: &ProductEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            product_id.0,
            PRODUCT_AGGREGATE_TYPE,
            seq,
            serde_json::to_value(ev).unwrap(),
        )
    }

    fn created(tenant_id: TenantId, product_id: ProductId) -> ProductEvent {
        ProductEvent::ProductCreated(ProductCreated {
            tenant_id,
            product_id,
            sku: "SKU-1".to_string(),
            name: "Test Product".to_string(),
            pricing: PricingMetadata::default(),
            website_published: true,
            window: PublishWindow::unbounded(),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn created_event_inserts_read_model() {
        let p = projection();
        let t = TenantId::new();
        let id = ProductId::new(AggregateId::new());

        p.apply_envelope(&envelope(t, id, 1, &created(t, id))).unwrap();

        let rm = p.get(t, &id).unwrap();
        assert_eq!(rm.name, "Test Product");
        assert!(rm.website_published);
        assert!(rm.window.is_unbounded());
        assert_eq!(rm.version, 1);
    }

    #[test]
    fn follow_up_events_update_visibility_fields() {
        let p = projection();
        let t = TenantId::new();
        let id = ProductId::new(AggregateId::new());
        let other = ProductId::new(AggregateId::new());
        let now = Utc::now();
        let window = PublishWindow::new(Some(now), Some(now + Duration::days(3)));

        p.apply_envelope(&envelope(t, id, 1, &created(t, id))).unwrap();
        p.apply_envelope(&envelope(
            t,
            id,
            2,
            &ProductEvent::PublicationScheduled(PublicationScheduled {
                tenant_id: t,
                product_id: id,
                window,
                occurred_at: now,
            }),
        ))
        .unwrap();
        p.apply_envelope(&envelope(
            t,
            id,
            3,
            &ProductEvent::ProductUnpublished(ProductUnpublished {
                tenant_id: t,
                product_id: id,
                occurred_at: now,
            }),
        ))
        .unwrap();
        p.apply_envelope(&envelope(
            t,
            id,
            4,
            &ProductEvent::RelatedProductsSet(RelatedProductsSet {
                tenant_id: t,
                product_id: id,
                related_product_ids: vec![other],
                occurred_at: now,
            }),
        ))
        .unwrap();

        let rm = p.get(t, &id).unwrap();
        assert_eq!(rm.window, window);
        assert!(!rm.website_published);
        assert_eq!(rm.related_product_ids, vec![other]);
        assert_eq!(rm.version, 4);
    }

    #[test]
    fn duplicate_envelopes_are_ignored() {
        let p = projection();
        let t = TenantId::new();
        let id = ProductId::new(AggregateId::new());
        let env = envelope(t, id, 1, &created(t, id));

        p.apply_envelope(&env).unwrap();
        p.apply_envelope(&env).unwrap();

        assert_eq!(p.list(t).len(), 1);
        assert_eq!(p.get(t, &id).unwrap().version, 1);
    }

    #[test]
    fn gaps_are_rejected() {
        let p = projection();
        let t = TenantId::new();
        let id = ProductId::new(AggregateId::new());
        p.apply_envelope(&envelope(t, id, 1, &created(t, id))).unwrap();

        let unpublished = ProductEvent::ProductUnpublished(ProductUnpublished {
            tenant_id: t,
            product_id: id,
            occurred_at: Utc::now(),
        });
        let err = p.apply_envelope(&envelope(t, id, 3, &unpublished)).unwrap_err();
        assert!(matches!(err, ProductProjectionError::NonMonotonicSequence { last: 1, found: 3 }));
    }

    #[test]
    fn envelope_tenant_must_match_payload() {
        let p = projection();
        let t = TenantId::new();
        let id = ProductId::new(AggregateId::new());
        let env = envelope(TenantId::new(), id, 1, &created(t, id));

        let err = p.apply_envelope(&env).unwrap_err();
        assert!(matches!(err, ProductProjectionError::TenantIsolation(_)));
    }

    #[test]
    fn other_aggregate_types_are_skipped() {
        let p = projection();
        let t = TenantId::new();
        let env = EventEnvelope::new(Uuid::now_v7(), t, AggregateId::new(), "orders.order", 1, json!({}));

        p.apply_envelope(&env).unwrap();
        assert!(p.list(t).is_empty());
    }

    #[test]
    fn malformed_window_in_payload_fails_open() {
        let p = projection();
        let t = TenantId::new();
        let id = ProductId::new(AggregateId::new());
        let mut payload = serde_json::to_value(created(t, id)).unwrap();
        payload["ProductCreated"]["window"] = json!({
            "expected_publish_date": "not a date",
            "expected_unpublish_date": null
        });
        let env = EventEnvelope::new(Uuid::now_v7(), t, id.0, PRODUCT_AGGREGATE_TYPE, 1, payload);

        p.apply_envelope(&env).unwrap();
        assert!(p.get(t, &id).unwrap().window.is_unbounded());
    }

    #[test]
    fn rebuild_from_scratch_replays_in_order() {
        let p = projection();
        let t = TenantId::new();
        let id = ProductId::new(AggregateId::new());
        let unpublished = ProductEvent::ProductUnpublished(ProductUnpublished {
            tenant_id: t,
            product_id: id,
            occurred_at: Utc::now(),
        });

        let envs = vec![envelope(t, id, 2, &unpublished), envelope(t, id, 1, &created(t, id))];
        p.rebuild_from_scratch(envs.clone()).unwrap();
        p.rebuild_from_scratch(envs).unwrap();

        let rm = p.get(t, &id).unwrap();
        assert!(!rm.website_published);
        assert_eq!(rm.version, 2);
    }

    /// Drops the next `failures` writes with an error, then behaves normally.
    struct FlakyStore {
        inner: InMemoryTenantStore<ProductId, ProductReadModel>,
        failures: AtomicUsize,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: InMemoryTenantStore::new(),
                failures: AtomicUsize::new(0),
            }
        }

        fn fail_next(&self, n: usize) {
            self.failures.store(n, Ordering::SeqCst);
        }
    }

    impl TenantStore<ProductId, ProductReadModel> for FlakyStore {
        fn get(&self, tenant_id: TenantId, key: &ProductId) -> Option<ProductReadModel> {
            self.inner.get(tenant_id, key)
        }

        fn upsert(&self, tenant_id: TenantId, key: ProductId, value: ProductReadModel) -> Result<(), ReadModelError> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(ReadModelError::Backend("connection reset".to_string()));
            }
            self.inner.upsert(tenant_id, key, value)
        }

        fn list(&self, tenant_id: TenantId) -> Vec<ProductReadModel> {
            self.inner.list(tenant_id)
        }

        fn clear_all(&self) -> Result<(), ReadModelError> {
            self.inner.clear_all()
        }
    }

    /// Commit `events` as one product stream and return their envelopes.
    fn commit(store: &InMemoryEventStore, tenant_id: TenantId, product_id: ProductId, events: &[ProductEvent]) -> Vec<EventEnvelope<JsonValue>> {
        let batch = events
            .iter()
            .map(|ev| UncommittedEvent::from_typed(tenant_id, product_id.0, PRODUCT_AGGREGATE_TYPE, Uuid::now_v7(), ev).unwrap())
            .collect();
        store
            .append(batch, ExpectedVersion::Exact(0))
            .unwrap()
            .iter()
            .map(|e| e.to_envelope())
            .collect()
    }

    fn lifecycle(t: TenantId, id: ProductId, window: PublishWindow) -> Vec<ProductEvent> {
        let now = Utc::now();
        vec![
            created(t, id),
            ProductEvent::PublicationScheduled(PublicationScheduled {
                tenant_id: t,
                product_id: id,
                window,
                occurred_at: now,
            }),
            ProductEvent::ProductUnpublished(ProductUnpublished {
                tenant_id: t,
                product_id: id,
                occurred_at: now,
            }),
        ]
    }

    #[test]
    fn failed_write_does_not_advance_the_row() {
        let store = Arc::new(FlakyStore::new());
        let p = ProductCatalogProjection::new(store.clone());
        let t = TenantId::new();
        let id = ProductId::new(AggregateId::new());
        let events = InMemoryEventStore::new();
        let envs = commit(&events, t, id, &lifecycle(t, id, PublishWindow::unbounded()));

        p.apply_envelope(&envs[0]).unwrap();
        store.fail_next(1);
        let err = p.apply_envelope(&envs[1]).unwrap_err();
        assert!(matches!(err, ProductProjectionError::Store(_)));
        assert!(err.is_transient());
        assert_eq!(p.get(t, &id).unwrap().version, 1);

        // Redelivery of the same envelope succeeds once the store recovers.
        p.apply_envelope(&envs[1]).unwrap();
        assert_eq!(p.get(t, &id).unwrap().version, 2);
    }

    #[test]
    fn gap_after_failed_write_is_closed_from_the_event_store() {
        let store = Arc::new(FlakyStore::new());
        let events = Arc::new(InMemoryEventStore::new());
        let p = ProductCatalogProjection::new(store.clone()).with_replay(events.clone());
        let t = TenantId::new();
        let id = ProductId::new(AggregateId::new());
        let now = Utc::now();
        let window = PublishWindow::new(Some(now - Duration::days(1)), Some(now + Duration::days(1)));
        let envs = commit(&events, t, id, &lifecycle(t, id, window));

        p.apply_envelope(&envs[0]).unwrap();
        store.fail_next(1);
        assert!(p.apply_envelope(&envs[1]).is_err());

        // The unpublish arrives with the schedule still missing.
        p.apply_envelope(&envs[2]).unwrap();

        let rm = p.get(t, &id).unwrap();
        assert!(!rm.website_published);
        assert_eq!(rm.window, window);
        assert_eq!(rm.version, 3);
    }

    #[test]
    fn gap_beyond_the_committed_stream_is_still_rejected() {
        let events = Arc::new(InMemoryEventStore::new());
        let p = projection().with_replay(events.clone());
        let t = TenantId::new();
        let id = ProductId::new(AggregateId::new());
        let envs = commit(&events, t, id, &[created(t, id)]);
        p.apply_envelope(&envs[0]).unwrap();

        let unpublished = ProductEvent::ProductUnpublished(ProductUnpublished {
            tenant_id: t,
            product_id: id,
            occurred_at: Utc::now(),
        });
        let err = p.apply_envelope(&envelope(t, id, 3, &unpublished)).unwrap_err();
        assert!(matches!(err, ProductProjectionError::NonMonotonicSequence { last: 1, found: 3 }));
    }

    #[test]
    fn rebuild_drops_rows_without_history() {
        let p = projection();
        let t = TenantId::new();
        let orphan = ProductId::new(AggregateId::new());
        let id = ProductId::new(AggregateId::new());
        p.apply_envelope(&envelope(t, orphan, 1, &created(t, orphan))).unwrap();

        let replayed = p.rebuild_from_scratch(vec![envelope(t, id, 1, &created(t, id))]).unwrap();

        assert_eq!(replayed, 1);
        assert!(p.get(t, &orphan).is_none());
        assert!(p.get(t, &id).is_some());
    }
}
