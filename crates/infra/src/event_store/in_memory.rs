use std::collections::HashMap;
use std::sync::RwLock;

use storefront_core::{AggregateId, ExpectedVersion, TenantId};

use super::stream::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

type StreamKey = (TenantId, AggregateId);

/// In-memory append-only event store (dev, tests, and the default API mode).
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamKey, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// All events in a batch must share tenant, aggregate and aggregate type.
fn batch_stream(events: &[UncommittedEvent]) -> Result<(StreamKey, &str), EventStoreError> {
    let first = &events[0];
    for (idx, e) in events.iter().enumerate().skip(1) {
        if e.tenant_id != first.tenant_id {
            return Err(EventStoreError::TenantIsolation(format!(
                "batch contains multiple tenant_ids (index {idx})"
            )));
        }
        if e.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch contains multiple aggregate_ids (index {idx})"
            )));
        }
        if e.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "batch contains multiple aggregate_types (index {idx})"
            )));
        }
    }
    Ok(((first.tenant_id, first.aggregate_id), first.aggregate_type.as_str()))
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let (key, aggregate_type) = batch_stream(&events)?;
        let aggregate_type = aggregate_type.to_string();

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;
        let stream = streams.entry(key).or_default();

        let current = stream.last().map_or(0, |e| e.sequence_number);
        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        if let Some(existing) = stream.first() {
            if existing.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{}', attempted append with '{aggregate_type}'",
                    existing.aggregate_type
                )));
            }
        }

        let committed: Vec<StoredEvent> = events
            .into_iter()
            .zip(current + 1..)
            .map(|(e, sequence_number)| StoredEvent {
                event_id: e.event_id,
                tenant_id: e.tenant_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            })
            .collect();

        stream.extend(committed.iter().cloned());
        Ok(committed)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        Ok(streams.get(&(tenant_id, aggregate_id)).cloned().unwrap_or_default())
    }

    fn load_tenant(&self, tenant_id: TenantId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        let mut events: Vec<StoredEvent> = streams
            .iter()
            .filter(|((t, _), _)| *t == tenant_id)
            .flat_map(|(_, stream)| stream.iter().cloned())
            .collect();
        events.sort_by_key(|e| (*e.aggregate_id.as_uuid().as_bytes(), e.sequence_number));
        Ok(events)
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        let mut events: Vec<StoredEvent> = streams.values().flat_map(|stream| stream.iter().cloned()).collect();
        events.sort_by_key(|e| {
            (
                *e.tenant_id.as_uuid().as_bytes(),
                *e.aggregate_id.as_uuid().as_bytes(),
                e.sequence_number,
            )
        });
        Ok(events)
    }
}
