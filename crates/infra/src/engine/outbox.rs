//! Events waiting for their unit of work to commit.

use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use invrecon_core::ProjectId;
use invrecon_events::{Event, EventBus, EventEnvelope};

use crate::error::EngineError;

/// Collects the envelopes of one operation. Nothing is published until
/// [`Outbox::publish`] is called, which services do only after commit.
#[derive(Debug, Default)]
pub struct Outbox {
    envelopes: Vec<EventEnvelope<JsonValue>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue events produced by one aggregate.
    ///
    /// `version_before` is the aggregate version the events were applied on top
    /// of; each envelope carries the version its event produced.
    pub fn record<E>(
        &mut self,
        project_id: ProjectId,
        aggregate_id: Uuid,
        aggregate_type: &str,
        version_before: u64,
        events: &[E],
    ) -> Result<(), EngineError>
    where
        E: Event + Serialize,
    {
        for (offset, event) in events.iter().enumerate() {
            let payload = serde_json::to_value(event)
                .map_err(|e| EngineError::Transport(format!("event serialization failed: {e}")))?;
            self.envelopes.push(EventEnvelope::new(
                Uuid::now_v7(),
                project_id,
                aggregate_id,
                aggregate_type,
                version_before + offset as u64 + 1,
                event.event_type(),
                payload,
            ));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    /// Best effort: the change is already durable, so a failed publish is logged.
    pub fn publish<B>(self, bus: &B)
    where
        B: EventBus<EventEnvelope<JsonValue>>,
    {
        for envelope in self.envelopes {
            let event_type = envelope.event_type().to_string();
            if let Err(err) = bus.publish(envelope) {
                tracing::warn!(event_type, error = ?err, "failed to publish committed event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use invrecon_core::WarehouseId;
    use invrecon_events::InMemoryEventBus;
    use invrecon_warehouse::{WarehouseActivationChanged, WarehouseEvent};

    #[test]
    fn sequence_numbers_continue_from_the_loaded_version() {
        let project_id = ProjectId::new();
        let warehouse_id = WarehouseId::new();
        let event = |active| {
            WarehouseEvent::WarehouseActivationChanged(WarehouseActivationChanged {
                project_id,
                warehouse_id,
                active,
                occurred_at: Utc::now(),
            })
        };

        let bus: InMemoryEventBus<EventEnvelope<JsonValue>> = InMemoryEventBus::new();
        let sub = bus.subscribe();

        let mut outbox = Outbox::new();
        outbox
            .record(project_id, Uuid::from(warehouse_id), "warehouse", 4, &[event(false), event(true)])
            .unwrap();
        assert_eq!(outbox.len(), 2);
        outbox.publish(&bus);

        let received = sub.drain();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].sequence_number(), 5);
        assert_eq!(received[1].sequence_number(), 6);
        assert_eq!(received[0].event_type(), "warehouse.activation_changed");
        assert_eq!(received[1].project_id(), project_id);
    }
}
