//! Warehouse registry service.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::instrument;
use uuid::Uuid;

use invrecon_core::{Aggregate, AggregateRoot, ExpectedVersion, PartnerId, ProjectId, WarehouseId};
use invrecon_events::{EventBus, EventEnvelope};
use invrecon_warehouse::{
    CreateWarehouse, RemoveWarehouse, SetWarehouseActive, UpdateWarehouse, Warehouse, WarehouseCommand,
    WarehouseDetails, WarehouseDetailsPatch, WarehouseType,
};

use crate::error::EngineError;
use crate::store::LedgerStore;

use super::outbox::Outbox;
use super::posting::{WAREHOUSE, load_warehouse};

#[derive(Debug, Clone)]
pub struct NewWarehouse {
    pub partner_id: Option<PartnerId>,
    pub name: String,
    pub warehouse_type: WarehouseType,
    pub details: WarehouseDetails,
}

/// Partial update. `warehouse_type` is accepted only to be rejected when it
/// differs from the stored type.
#[derive(Debug, Clone, Default)]
pub struct WarehouseUpdate {
    pub name: Option<String>,
    pub warehouse_type: Option<WarehouseType>,
    pub details: WarehouseDetailsPatch,
}

pub struct WarehouseRegistry<B> {
    store: Arc<dyn LedgerStore>,
    bus: B,
}

impl<B> WarehouseRegistry<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: Arc<dyn LedgerStore>, bus: B) -> Self {
        Self { store, bus }
    }

    #[instrument(skip(self, input), fields(name = %input.name, warehouse_type = %input.warehouse_type), err)]
    pub async fn create(&self, project_id: ProjectId, input: NewWarehouse) -> Result<Warehouse, EngineError> {
        let warehouse_id = WarehouseId::new();
        let command = WarehouseCommand::Create(CreateWarehouse {
            project_id,
            partner_id: input.partner_id,
            warehouse_id,
            name: input.name,
            warehouse_type: input.warehouse_type,
            details: input.details,
            occurred_at: Utc::now(),
        });

        let mut tx = self.store.begin().await?;
        let mut warehouse = Warehouse::empty(warehouse_id);
        let events = warehouse.execute(&command)?;
        tx.save_warehouse(&warehouse, ExpectedVersion::Exact(0)).await?;

        let mut outbox = Outbox::new();
        outbox.record(project_id, Uuid::from(warehouse_id), WAREHOUSE, 0, &events)?;
        tx.commit().await?;
        outbox.publish(&self.bus);

        tracing::info!(%warehouse_id, "warehouse created");
        Ok(warehouse)
    }

    #[instrument(skip(self, update), err)]
    pub async fn update(
        &self,
        project_id: ProjectId,
        warehouse_id: WarehouseId,
        update: WarehouseUpdate,
    ) -> Result<Warehouse, EngineError> {
        let command = WarehouseCommand::Update(UpdateWarehouse {
            project_id,
            warehouse_id,
            name: update.name,
            warehouse_type: update.warehouse_type,
            details: update.details,
            occurred_at: Utc::now(),
        });
        self.execute(project_id, warehouse_id, command).await
    }

    #[instrument(skip(self), err)]
    pub async fn set_active(
        &self,
        project_id: ProjectId,
        warehouse_id: WarehouseId,
        active: bool,
    ) -> Result<Warehouse, EngineError> {
        let command = WarehouseCommand::SetActive(SetWarehouseActive {
            project_id,
            warehouse_id,
            active,
            occurred_at: Utc::now(),
        });
        self.execute(project_id, warehouse_id, command).await
    }

    /// Hard delete. Rejected with a conflict while any movement references the
    /// warehouse; deactivate it instead.
    #[instrument(skip(self), err)]
    pub async fn delete(&self, project_id: ProjectId, warehouse_id: WarehouseId) -> Result<(), EngineError> {
        let mut tx = self.store.begin().await?;
        let mut warehouse = load_warehouse(tx.as_mut(), project_id, warehouse_id).await?;
        let referenced = tx.warehouse_is_referenced(project_id, warehouse_id).await?;

        let version_before = warehouse.version();
        let events = warehouse.execute(&WarehouseCommand::Remove(RemoveWarehouse {
            project_id,
            warehouse_id,
            referenced_by_movements: referenced,
            occurred_at: Utc::now(),
        }))?;
        tx.delete_warehouse(project_id, warehouse_id).await?;

        let mut outbox = Outbox::new();
        outbox.record(project_id, Uuid::from(warehouse_id), WAREHOUSE, version_before, &events)?;
        tx.commit().await?;
        outbox.publish(&self.bus);

        tracing::info!(%warehouse_id, "warehouse deleted");
        Ok(())
    }

    pub async fn get(&self, project_id: ProjectId, warehouse_id: WarehouseId) -> Result<Warehouse, EngineError> {
        let mut tx = self.store.begin().await?;
        load_warehouse(tx.as_mut(), project_id, warehouse_id).await
    }

    pub async fn list(&self, project_id: ProjectId, only_active: bool) -> Result<Vec<Warehouse>, EngineError> {
        let mut tx = self.store.begin().await?;
        let mut warehouses = tx.list_warehouses(project_id).await?;
        if only_active {
            warehouses.retain(|w| w.is_active());
        }
        Ok(warehouses)
    }

    async fn execute(
        &self,
        project_id: ProjectId,
        warehouse_id: WarehouseId,
        command: WarehouseCommand,
    ) -> Result<Warehouse, EngineError> {
        let mut tx = self.store.begin().await?;
        let mut warehouse = load_warehouse(tx.as_mut(), project_id, warehouse_id).await?;

        let version_before = warehouse.version();
        let events = warehouse.execute(&command)?;
        if events.is_empty() {
            return Ok(warehouse);
        }
        tx.save_warehouse(&warehouse, ExpectedVersion::Exact(version_before)).await?;

        let mut outbox = Outbox::new();
        outbox.record(project_id, Uuid::from(warehouse_id), WAREHOUSE, version_before, &events)?;
        tx.commit().await?;
        outbox.publish(&self.bus);
        Ok(warehouse)
    }
}
