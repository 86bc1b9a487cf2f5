//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! command
//!   → load stream (tenant-scoped) → check stream integrity
//!   → rehydrate aggregate → handle (pure) → append (optimistic)
//!   → publish committed envelopes
//! ```
//!
//! The dispatcher owns no IO of its own; it composes an [`EventStore`] and an
//! [`EventBus`], so tests run it against the in-memory implementations.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use storefront_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, TenantId};
use storefront_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Stale expected version on append.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// Business-level conflict (duplicate create, already published, ...).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("not found")]
    NotFound,

    /// A historical payload no longer decodes into the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),

    /// Append succeeded but fan-out failed; retrying may deliver twice.
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::NotFound => DispatchError::NotFound,
        }
    }
}

/// Runs commands against any aggregate whose error type is [`DomainError`].
///
/// Events are appended with `ExpectedVersion::Exact(current)` and published
/// only after the append succeeded. A failed publish is reported but the
/// events stay committed (at-least-once).
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Execute `command` against the aggregate stream `(tenant_id, aggregate_id)`.
    ///
    /// `make_aggregate` builds the empty instance that history is replayed
    /// into. Returns the committed events; an empty vec means the command was
    /// a no-op for the current state.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: storefront_events::Event + Serialize + DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        check_stream(tenant_id, aggregate_id, &history)?;
        let current = history.last().map_or(0, |e| e.sequence_number);

        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        for stored in &history {
            let event: A::Event = serde_json::from_value(stored.payload.clone())
                .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
            aggregate.apply(&event);
        }

        let decided = aggregate.handle(&command)?;
        if decided.is_empty() {
            debug!(%tenant_id, %aggregate_id, "command produced no events");
            return Ok(vec![]);
        }

        let aggregate_type = aggregate_type.into();
        let batch = decided
            .iter()
            .map(|event| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    aggregate_id,
                    aggregate_type.as_str(),
                    Uuid::now_v7(),
                    event,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(batch, ExpectedVersion::Exact(current))?;

        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        debug!(%tenant_id, %aggregate_id, events = committed.len(), "command committed");
        Ok(committed)
    }
}

/// Reject streams a misbehaving backend could hand back: foreign tenant or
/// aggregate rows, or sequence numbers that are not strictly increasing from 1.
fn check_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id || e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains a foreign event at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}
