use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tallyerp_core::{AggregateId, TenantId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, stream_identity};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

/// In-memory append-only event store.
///
/// Intended for tests/dev and single-process deployments. A batch is checked
/// and applied under one write lock, which also serialises competing writers.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamKey, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }
}

impl EventStore for InMemoryEventStore {
    fn append_batch(&self, batch: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut planned = Vec::with_capacity(batch.len());
        let mut seen = HashSet::new();
        for append in batch {
            let Some((tenant_id, aggregate_id, aggregate_type)) = stream_identity(&append.events)? else {
                continue;
            };
            let key = StreamKey {
                tenant_id,
                aggregate_id,
            };
            if !seen.insert(key) {
                return Err(EventStoreError::InvalidAppend(format!(
                    "stream {aggregate_id} appears twice in one batch"
                )));
            }
            planned.push((key, aggregate_type, append));
        }

        if planned.is_empty() {
            return Ok(vec![]);
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))?;

        // Check every stream before touching any of them.
        for (key, aggregate_type, append) in &planned {
            let stream = streams.get(key).map(Vec::as_slice).unwrap_or(&[]);
            let current = Self::current_version(stream);

            if !append.expected_version.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "stream {}: expected {:?}, found {current}",
                    key.aggregate_id, append.expected_version
                )));
            }

            if let Some(existing) = stream.first() {
                if &existing.aggregate_type != aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{}', attempted append with '{}'",
                        existing.aggregate_type, aggregate_type
                    )));
                }
            }
        }

        let mut committed = Vec::new();
        for (key, _, append) in planned {
            let stream = streams.entry(key).or_default();
            let mut next = Self::current_version(stream) + 1;
            for e in append.events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    tenant_id: e.tenant_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                stream.push(stored.clone());
                committed.push(stored);
            }
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            tenant_id,
            aggregate_id,
        };

        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))?;

        Ok(streams.get(&key).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tallyerp_core::ExpectedVersion;
    use uuid::Uuid;

    use crate::event_store::UncommittedEvent;

    fn event(tenant_id: TenantId, aggregate_id: AggregateId) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            tenant_id,
            aggregate_id,
            aggregate_type: "documents.document".to_string(),
            event_type: "documents.document.created".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: json!({}),
        }
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let store = InMemoryEventStore::new();
        let tenant = TenantId::new();
        let (a, b) = (AggregateId::new(), AggregateId::new());
        store.append(vec![event(tenant, b)], ExpectedVersion::Exact(0)).unwrap();

        // `b` is at version 1, so the whole batch must fail.
        let err = store
            .append_batch(vec![
                StreamAppend::new(vec![event(tenant, a)], ExpectedVersion::Exact(0)),
                StreamAppend::new(vec![event(tenant, b)], ExpectedVersion::Exact(0)),
            ])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
        assert!(store.load_stream(tenant, a).unwrap().is_empty());

        let committed = store
            .append_batch(vec![
                StreamAppend::new(vec![event(tenant, a)], ExpectedVersion::Exact(0)),
                StreamAppend::new(vec![event(tenant, b)], ExpectedVersion::Exact(1)),
            ])
            .unwrap();
        assert_eq!(committed.len(), 2);
        assert_eq!(store.load_stream(tenant, b).unwrap()[1].sequence_number, 2);
    }

    #[test]
    fn streams_are_tenant_scoped() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store.append(vec![event(TenantId::new(), id)], ExpectedVersion::Exact(0)).unwrap();
        assert!(store.load_stream(TenantId::new(), id).unwrap().is_empty());
    }

    #[test]
    fn mixed_tenants_in_one_stream_append_are_rejected() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        let err = store
            .append(vec![event(TenantId::new(), id), event(TenantId::new(), id)], ExpectedVersion::Any)
            .unwrap_err();
        assert!(matches!(err, EventStoreError::TenantIsolation(_)));
    }
}
