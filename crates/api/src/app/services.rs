use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use invrecon_core::ProjectId;
use invrecon_events::{EventBus, EventEnvelope, InMemoryBusError, InMemoryEventBus, ProjectScoped, Subscription};
use invrecon_infra::{
    catalog::{InMemoryRawProductCatalog, RawProductCatalog},
    config::{Settings, StorageBackend},
    engine::{LedgerPolicy, ReconciliationEngine, StockLedger, WarehouseRegistry},
    store::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, StoreError},
};

/// Notification pushed to SSE subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeMessage {
    pub project_id: ProjectId,
    pub topic: String,
    pub payload: JsonValue,
}

impl ProjectScoped for RealtimeMessage {
    fn project_id(&self) -> ProjectId {
        self.project_id
    }
}

impl RealtimeMessage {
    fn from_envelope(envelope: &EventEnvelope<JsonValue>) -> Self {
        Self {
            project_id: envelope.project_id(),
            topic: envelope.event_type().to_string(),
            payload: serde_json::json!({
                "eventId": envelope.event_id().to_string(),
                "aggregateId": envelope.aggregate_id().to_string(),
                "aggregateType": envelope.aggregate_type(),
                "sequenceNumber": envelope.sequence_number(),
                "event": envelope.payload(),
            }),
        }
    }
}

/// In-process bus that also fans committed events out to the SSE channel.
///
/// The realtime side is lossy: with no SSE client connected the message is
/// simply dropped.
#[derive(Debug)]
pub struct RealtimeBus {
    inner: InMemoryEventBus<EventEnvelope<JsonValue>>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
}

impl RealtimeBus {
    pub fn new(capacity: usize) -> Self {
        let (realtime_tx, _realtime_rx) = broadcast::channel(capacity);
        Self {
            inner: InMemoryEventBus::new(),
            realtime_tx,
        }
    }

    pub fn realtime(&self) -> broadcast::Receiver<RealtimeMessage> {
        self.realtime_tx.subscribe()
    }
}

impl EventBus<EventEnvelope<JsonValue>> for RealtimeBus {
    type Error = InMemoryBusError;

    fn publish(&self, message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
        let _ = self.realtime_tx.send(RealtimeMessage::from_envelope(&message));
        self.inner.publish(message)
    }

    fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
        self.inner.subscribe()
    }
}

pub type Bus = Arc<RealtimeBus>;

/// Everything the handlers need, built once per process.
pub struct AppServices {
    pub registry: WarehouseRegistry<Bus>,
    pub ledger: StockLedger<Bus>,
    pub engine: ReconciliationEngine<Bus>,
    pub catalog: Arc<dyn RawProductCatalog>,
    bus: Bus,
}

impl AppServices {
    pub fn new(store: Arc<dyn LedgerStore>, policy: LedgerPolicy) -> Self {
        let bus: Bus = Arc::new(RealtimeBus::new(256));
        let catalog: Arc<dyn RawProductCatalog> = Arc::new(InMemoryRawProductCatalog::new());

        Self {
            registry: WarehouseRegistry::new(store.clone(), bus.clone()),
            ledger: StockLedger::new(store.clone(), bus.clone(), policy),
            engine: ReconciliationEngine::new(store, bus.clone(), catalog.clone(), policy),
            catalog,
            bus,
        }
    }

    pub fn in_memory(policy: LedgerPolicy) -> Self {
        Self::new(Arc::new(InMemoryLedgerStore::new()), policy)
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// SSE stream of one project's committed changes.
    pub fn project_sse_stream(
        &self,
        project_id: ProjectId,
    ) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>> + use<>> {
        let stream = BroadcastStream::new(self.bus.realtime()).filter_map(move |msg| match msg {
            Ok(m) if m.belongs_to(project_id) => {
                let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
                Some(Ok(SseEvent::default().event(m.topic).data(data)))
            }
            _ => None,
        });

        Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
    }
}

/// Wire services for the configured storage backend.
pub async fn build_services(settings: &Settings) -> Result<AppServices, StoreError> {
    let policy = LedgerPolicy::from(settings.ledger);

    let store: Arc<dyn LedgerStore> = match settings.storage.backend {
        StorageBackend::Memory => {
            tracing::info!("using in-memory ledger store");
            Arc::new(InMemoryLedgerStore::new())
        }
        StorageBackend::Postgres => {
            let url = settings.storage.database_url.as_deref().ok_or_else(|| {
                StoreError::Transport("storage.database_url is not set".to_string())
            })?;
            let store = PostgresLedgerStore::connect(url, settings.storage.max_connections).await?;
            store.migrate().await?;
            tracing::info!("using postgres ledger store");
            Arc::new(store)
        }
    };

    Ok(AppServices::new(store, policy))
}
