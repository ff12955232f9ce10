//! Command execution pipeline (application-level orchestration).
//!
//! A document action touches several aggregates: the document itself, its
//! parent document's lines, warehouse stock and disposition records. All of
//! those writes must commit together or not at all, so commands are staged in
//! a [`UnitOfWork`] and appended as one atomic batch.
//!
//! ```text
//! Action
//!   ↓
//! 1. Load streams (tenant-scoped, validated)
//!   ↓
//! 2. Rehydrate aggregates
//!   ↓
//! 3. Handle commands (pure), apply staged events to the working copies
//!   ↓
//! 4. Append every touched stream in one batch (expected = loaded version)
//!   ↓
//! 5. Publish committed events to the bus
//! ```
//!
//! A version mismatch at step 4 means another writer committed first. The
//! dispatcher reruns the whole unit of work against fresh state a
//! configurable number of times before surfacing a retryable contention error.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use tallyerp_core::{
    Aggregate, AggregateId, ConflictDetail, ConflictKind, DomainError, ExpectedVersion,
    StateViolation, TenantId,
};
use tallyerp_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("illegal transition: {0}")]
    State(StateViolation),

    #[error("conflict: {0}")]
    Conflict(ConflictDetail),

    /// Optimistic concurrency failure after all retries. Safe to retry.
    #[error("concurrent modification: {0}")]
    Contention(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Cross-tenant or cross-aggregate data in a loaded stream.
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// Failed to deserialize historical event payloads into the aggregate event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Contention(_))
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Contention(msg),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvalidId(msg) => DispatchError::InvalidId(msg),
            DomainError::State(v) => DispatchError::State(v),
            DomainError::Conflict(d) if d.kind == ConflictKind::Contention => {
                DispatchError::Contention(d.message)
            }
            DomainError::Conflict(d) => DispatchError::Conflict(d),
            DomainError::NotFound(what) => DispatchError::NotFound(what),
            DomainError::Internal(msg) => DispatchError::Internal(msg),
        }
    }
}

#[derive(Debug)]
struct StreamState {
    aggregate_type: String,
    base_version: u64,
    history: Vec<StoredEvent>,
    staged: Vec<UncommittedEvent>,
}

/// Tenant-scoped set of loaded streams and the events staged against them.
///
/// Loading the same stream twice returns the state including everything
/// staged so far, so a workflow can touch one aggregate repeatedly (an
/// invoice posting several lines against the same PO line).
#[derive(Debug)]
pub struct UnitOfWork<'s, S> {
    store: &'s S,
    tenant_id: TenantId,
    streams: BTreeMap<AggregateId, StreamState>,
}

impl<'s, S: EventStore> UnitOfWork<'s, S> {
    pub fn new(store: &'s S, tenant_id: TenantId) -> Self {
        Self {
            store,
            tenant_id,
            streams: BTreeMap::new(),
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Rehydrate an aggregate from its stream plus anything already staged.
    pub fn load<A>(
        &mut self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        if !self.streams.contains_key(&aggregate_id) {
            let history = self.store.load_stream(self.tenant_id, aggregate_id)?;
            validate_loaded_stream(self.tenant_id, aggregate_id, &history)?;
            if let Some(first) = history.first() {
                if first.aggregate_type != aggregate_type {
                    return Err(DispatchError::NotFound(format!(
                        "{aggregate_type} {aggregate_id}"
                    )));
                }
            }
            self.streams.insert(
                aggregate_id,
                StreamState {
                    aggregate_type: aggregate_type.to_string(),
                    base_version: stream_version(&history),
                    history,
                    staged: Vec::new(),
                },
            );
        }

        let state = self
            .streams
            .get(&aggregate_id)
            .ok_or_else(|| DispatchError::Internal(format!("stream {aggregate_id} not loaded")))?;
        if state.aggregate_type != aggregate_type {
            return Err(DispatchError::NotFound(format!("{aggregate_type} {aggregate_id}")));
        }

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &state.history)?;
        for staged in &state.staged {
            let ev: A::Event = serde_json::from_value(staged.payload.clone())
                .map_err(|e| DispatchError::Deserialize(format!("staged {}: {e}", staged.event_type)))?;
            aggregate.apply(&ev);
        }
        Ok(aggregate)
    }

    /// Decide events for `command`, apply them to `aggregate` and stage them
    /// for commit. The aggregate's stream must have been loaded through this
    /// unit of work.
    pub fn stage<A>(
        &mut self,
        aggregate: &mut A,
        command: &A::Command,
    ) -> Result<Vec<A::Event>, DispatchError>
    where
        A: Aggregate<Id = AggregateId, Error = DomainError>,
        A::Event: tallyerp_events::Event + Serialize,
    {
        let aggregate_id = *aggregate.id();
        let tenant_id = self.tenant_id;
        let state = self.streams.get_mut(&aggregate_id).ok_or_else(|| {
            DispatchError::Internal(format!("stream {aggregate_id} staged without being loaded"))
        })?;

        let decided = aggregate.handle(command)?;
        for ev in &decided {
            let uncommitted = UncommittedEvent::from_typed(
                tenant_id,
                aggregate_id,
                state.aggregate_type.clone(),
                Uuid::now_v7(),
                ev,
            )?;
            aggregate.apply(ev);
            state.staged.push(uncommitted);
        }
        Ok(decided)
    }

    pub fn has_staged(&self) -> bool {
        self.streams.values().any(|s| !s.staged.is_empty())
    }

    /// Append every stream with staged events in one atomic batch.
    pub fn commit(self) -> Result<Vec<StoredEvent>, DispatchError> {
        let batch: Vec<StreamAppend> = self
            .streams
            .into_values()
            .filter(|s| !s.staged.is_empty())
            .map(|s| StreamAppend::new(s.staged, ExpectedVersion::Exact(s.base_version)))
            .collect();

        if batch.is_empty() {
            return Ok(vec![]);
        }
        Ok(self.store.append_batch(batch)?)
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// - `S`: event store implementation
/// - `B`: event bus implementation
///
/// Events are persisted before publication; if the append fails nothing is
/// published. Publication failures after a successful append are logged and
/// do not fail the command (consumers are at-least-once anyway).
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    contention_retries: u32,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            contention_retries: 1,
        }
    }

    /// Number of times a unit of work is rerun after losing a concurrency race.
    pub fn with_contention_retries(mut self, retries: u32) -> Self {
        self.contention_retries = retries;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Run `work` in a fresh unit of work and commit what it staged.
    ///
    /// On contention the closure is rerun from scratch, so it must derive
    /// everything from the state it loads.
    pub fn run<T>(
        &self,
        tenant_id: TenantId,
        mut work: impl FnMut(&mut UnitOfWork<'_, S>) -> Result<T, DispatchError>,
    ) -> Result<(T, Vec<StoredEvent>), DispatchError> {
        let mut attempt = 0u32;
        loop {
            let mut uow = UnitOfWork::new(&self.store, tenant_id);
            let outcome = work(&mut uow).and_then(|value| uow.commit().map(|c| (value, c)));

            match outcome {
                Ok((value, committed)) => {
                    self.publish(&committed);
                    return Ok((value, committed));
                }
                Err(DispatchError::Contention(msg)) if attempt < self.contention_retries => {
                    attempt += 1;
                    warn!(tenant_id = %tenant_id, attempt, reason = %msg, "retrying after concurrent modification");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Rehydrate one aggregate without staging anything.
    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        UnitOfWork::new(&self.store, tenant_id).load(aggregate_id, aggregate_type, make_aggregate)
    }

    /// Dispatch a single command against a single aggregate.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl Fn(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Id = AggregateId, Error = DomainError>,
        A::Event: tallyerp_events::Event + Serialize + DeserializeOwned,
    {
        let (_, committed) = self.run(tenant_id, |uow| {
            let mut aggregate = uow.load(aggregate_id, aggregate_type, &make_aggregate)?;
            uow.stage(&mut aggregate, &command)?;
            Ok(())
        })?;
        Ok(committed)
    }

    fn publish(&self, committed: &[StoredEvent]) {
        for stored in committed {
            if let Err(e) = self.bus.publish(stored.to_envelope()) {
                warn!(event_id = %stored.event_id, event_type = %stored.event_type, error = ?e, "event publication failed");
            } else {
                debug!(event_id = %stored.event_id, event_type = %stored.event_type, "event published");
            }
        }
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Enforce tenant isolation even if a buggy backend returns cross-tenant
    // data, and require gap-free ascending sequence numbers.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number != last + 1 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream is not contiguous at index {idx} (expected {}, got {})",
                last + 1,
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone()).map_err(|e| {
            DispatchError::Deserialize(format!(
                "failed to deserialize {} (seq {}): {e}",
                stored.event_type, stored.sequence_number
            ))
        })?;
        aggregate.apply(&ev);
    }
    Ok(())
}
