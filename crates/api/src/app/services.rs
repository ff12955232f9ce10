use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use tallyerp_core::TenantId;
use tallyerp_events::{EventBus, EventEnvelope, InMemoryEventBus};
use tallyerp_infra::{
    command_dispatcher::CommandDispatcher,
    config::{AppConfig, ConfigError, StoreBackend},
    directory::{InMemoryCompanyPolicies, InMemoryProductCatalog},
    engine::DocumentEngine,
    event_store::{EventStore, InMemoryEventStore, PostgresEventStore},
    tolerance_store::{InMemoryToleranceStore, PostgresToleranceStore, ToleranceStore},
};

pub type ApiBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type ApiEngine = DocumentEngine<Arc<dyn EventStore>, ApiBus>;

/// Committed event relayed to SSE subscribers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RealtimeMessage {
    pub tenant_id: TenantId,
    pub topic: String,
    pub payload: JsonValue,
}

pub struct AppServices {
    engine: ApiEngine,
    catalog: Arc<InMemoryProductCatalog>,
    policies: Arc<InMemoryCompanyPolicies>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
}

impl AppServices {
    /// Everything in process memory. State is lost on restart.
    pub fn in_memory(config: &AppConfig) -> Self {
        Self::assemble(config, Arc::new(InMemoryEventStore::new()), Arc::new(InMemoryToleranceStore::new()))
    }

    /// Postgres-backed event and tolerance stores; runs the embedded schema
    /// migration before returning.
    pub async fn postgres(config: &AppConfig) -> anyhow::Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;

        let store = PostgresEventStore::new(pool.clone());
        store.migrate().await?;
        let tolerances = PostgresToleranceStore::new(pool);

        Ok(Self::assemble(config, Arc::new(store), Arc::new(tolerances)))
    }

    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        match config.store {
            StoreBackend::Memory => Ok(Self::in_memory(config)),
            StoreBackend::Postgres => Self::postgres(config).await,
        }
    }

    fn assemble(config: &AppConfig, store: Arc<dyn EventStore>, tolerances: Arc<dyn ToleranceStore>) -> Self {
        let bus: ApiBus = Arc::new(InMemoryEventBus::new());
        let (realtime_tx, _) = broadcast::channel(1024);
        spawn_relay(&bus, realtime_tx.clone());

        let catalog = Arc::new(InMemoryProductCatalog::new());
        let policies = Arc::new(InMemoryCompanyPolicies::new(config.default_invoice_policy));
        let dispatcher =
            CommandDispatcher::new(store, bus).with_contention_retries(config.contention_retries);
        let engine = DocumentEngine::new(dispatcher, tolerances, catalog.clone(), policies.clone());

        Self {
            engine,
            catalog,
            policies,
            realtime_tx,
        }
    }

    pub fn engine(&self) -> &ApiEngine {
        &self.engine
    }

    pub fn catalog(&self) -> &InMemoryProductCatalog {
        &self.catalog
    }

    pub fn policies(&self) -> &InMemoryCompanyPolicies {
        &self.policies
    }

    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        &self.realtime_tx
    }
}

/// Background subscriber: bus -> realtime broadcast.
fn spawn_relay(bus: &ApiBus, realtime_tx: broadcast::Sender<RealtimeMessage>) {
    let sub = bus.subscribe();
    std::thread::spawn(move || {
        while let Ok(env) = sub.recv() {
            // No subscribers is not an error; messages are dropped.
            let _ = realtime_tx.send(RealtimeMessage {
                tenant_id: env.tenant_id(),
                topic: env.event_type().to_string(),
                payload: serde_json::json!({
                    "aggregateId": env.aggregate_id().to_string(),
                    "aggregateType": env.aggregate_type(),
                    "sequenceNumber": env.sequence_number(),
                    "payload": env.payload(),
                }),
            });
        }
    });
}

/// Build an SSE stream for a tenant (used by `/events/stream`).
pub fn tenant_sse_stream(
    services: Arc<AppServices>,
    tenant_id: TenantId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(m) if m.tenant_id == tenant_id => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
