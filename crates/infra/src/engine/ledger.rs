//! Stock ledger service: manual movements, status changes and balance queries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::instrument;
use uuid::Uuid;

use invrecon_core::{
    Aggregate, AggregateRoot, ExpectedVersion, MovementId, PartnerId, ProjectId, RawProductId, WarehouseId,
};
use invrecon_events::{EventBus, EventEnvelope};
use invrecon_stock::{
    ChangeMovementStatus, CountedLine, DetailLine, Direction, MovementCommand, MovementStatus, MovementType,
    ProductBalance, RecordMovement, RemoveMovement, StockMovement, adjustments, ensure_inbound_type,
    ensure_outbound_type,
};

use crate::error::EngineError;
use crate::projections::{BalanceProjector, InventorySummary, RebuildReport};
use crate::store::{LedgerStore, MovementFilter};

use super::LedgerPolicy;
use super::outbox::Outbox;
use super::posting::{MOVEMENT, load_movement, load_warehouse, record_movement};

/// One requested product line of a manual movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementLine {
    pub raw_product_id: RawProductId,
    pub quantity: Decimal,
    /// Ignored for outgoing lines, which leave at the average cost.
    pub unit_price: Decimal,
    pub notes: Option<String>,
}

impl MovementLine {
    fn into_detail(self, direction: Direction) -> DetailLine {
        DetailLine {
            detail_id: Uuid::now_v7(),
            raw_product_id: Some(self.raw_product_id),
            direction,
            quantity: self.quantity,
            unit_price: self.unit_price,
            notes: self.notes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewMovement {
    pub movement_type: MovementType,
    /// Defaults to confirmed.
    pub status: Option<MovementStatus>,
    pub partner_id: Option<PartnerId>,
    /// Defaults to now.
    pub movement_date: Option<DateTime<Utc>>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub lines: Vec<MovementLine>,
}

impl NewMovement {
    pub fn new(movement_type: MovementType, lines: Vec<MovementLine>) -> Self {
        Self {
            movement_type,
            status: None,
            partner_id: None,
            movement_date: None,
            reference: None,
            notes: None,
            lines,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub source_warehouse_id: WarehouseId,
    pub target_warehouse_id: WarehouseId,
    pub partner_id: Option<PartnerId>,
    pub movement_date: Option<DateTime<Utc>>,
    /// Shared by both legs; generated when absent.
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub lines: Vec<MovementLine>,
}

/// Both legs of a transfer, linked to each other.
#[derive(Debug, Clone)]
pub struct TransferMovements {
    pub outbound: StockMovement,
    pub inbound: StockMovement,
}

#[derive(Debug, Clone)]
pub struct NewInventoryCheck {
    pub partner_id: Option<PartnerId>,
    pub movement_date: Option<DateTime<Utc>>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub lines: Vec<CountedLine>,
}

pub struct StockLedger<B> {
    store: Arc<dyn LedgerStore>,
    bus: B,
    policy: LedgerPolicy,
    projector: BalanceProjector,
}

impl<B> StockLedger<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: Arc<dyn LedgerStore>, bus: B, policy: LedgerPolicy) -> Self {
        Self {
            store,
            bus,
            policy,
            projector: BalanceProjector::new(policy.allow_negative_balances),
        }
    }

    pub fn policy(&self) -> LedgerPolicy {
        self.policy
    }

    /// Goods coming in (PURCHASE, RETURN or OTHER); every line is IN.
    #[instrument(skip(self, input), fields(movement_type = %input.movement_type, lines = input.lines.len()), err)]
    pub async fn create_inbound(
        &self,
        project_id: ProjectId,
        warehouse_id: WarehouseId,
        input: NewMovement,
    ) -> Result<StockMovement, EngineError> {
        ensure_inbound_type(input.movement_type)?;
        let status = input.status.unwrap_or(MovementStatus::Confirmed);
        if status == MovementStatus::Draft && !self.policy.allow_draft_inbound {
            return Err(EngineError::Validation(
                "draft movements are disabled by ledger policy".to_string(),
            ));
        }
        self.post_single(project_id, warehouse_id, input, status, Direction::In).await
    }

    /// Goods going out (SALE, WASTE, INTERNAL_USE or RETURN); every line is OUT.
    #[instrument(skip(self, input), fields(movement_type = %input.movement_type, lines = input.lines.len()), err)]
    pub async fn create_outbound(
        &self,
        project_id: ProjectId,
        warehouse_id: WarehouseId,
        input: NewMovement,
    ) -> Result<StockMovement, EngineError> {
        ensure_outbound_type(input.movement_type)?;
        let status = input.status.unwrap_or(MovementStatus::Confirmed);
        self.post_single(project_id, warehouse_id, input, status, Direction::Out).await
    }

    async fn post_single(
        &self,
        project_id: ProjectId,
        warehouse_id: WarehouseId,
        input: NewMovement,
        status: MovementStatus,
        direction: Direction,
    ) -> Result<StockMovement, EngineError> {
        let now = Utc::now();
        let command = RecordMovement {
            project_id,
            partner_id: input.partner_id,
            movement_id: MovementId::new(),
            movement_type: input.movement_type,
            status,
            warehouse_id,
            source_warehouse_id: None,
            target_warehouse_id: None,
            linked_movement_id: None,
            movement_date: input.movement_date.unwrap_or(now),
            invoice_id: None,
            reference: input.reference,
            notes: input.notes,
            lines: input.lines.into_iter().map(|l| l.into_detail(direction)).collect(),
            total_amount: None,
            effect_sequence: None,
            occurred_at: now,
        };

        let mut tx = self.store.begin().await?;
        let mut outbox = Outbox::new();
        let movement = record_movement(tx.as_mut(), &self.projector, &mut outbox, command).await?;
        tx.commit().await?;
        outbox.publish(&self.bus);

        tracing::info!(
            movement_id = %movement.id_typed(),
            total_amount = %movement.total_amount(),
            "stock movement recorded"
        );
        Ok(movement)
    }

    /// Move goods between two physical warehouses.
    ///
    /// Records two linked movements in one transaction: OUT at the source,
    /// then IN at the target, both valued at the source's average cost.
    #[instrument(skip(self, input), fields(source = %input.source_warehouse_id, target = %input.target_warehouse_id), err)]
    pub async fn create_transfer(
        &self,
        project_id: ProjectId,
        input: NewTransfer,
    ) -> Result<TransferMovements, EngineError> {
        let now = Utc::now();
        let movement_date = input.movement_date.unwrap_or(now);
        let outbound_id = MovementId::new();
        let inbound_id = MovementId::new();
        let reference = input
            .reference
            .unwrap_or_else(|| format!("TRANSFER-{outbound_id}"));

        let record = |movement_id: MovementId, linked: MovementId, warehouse_id: WarehouseId, lines: Vec<DetailLine>| RecordMovement {
            project_id,
            partner_id: input.partner_id,
            movement_id,
            movement_type: MovementType::Transfer,
            status: MovementStatus::Confirmed,
            warehouse_id,
            source_warehouse_id: Some(input.source_warehouse_id),
            target_warehouse_id: Some(input.target_warehouse_id),
            linked_movement_id: Some(linked),
            movement_date,
            invoice_id: None,
            reference: Some(reference.clone()),
            notes: input.notes.clone(),
            lines,
            total_amount: None,
            effect_sequence: None,
            occurred_at: now,
        };

        let out_lines: Vec<DetailLine> = input
            .lines
            .iter()
            .cloned()
            .map(|l| l.into_detail(Direction::Out))
            .collect();

        let mut tx = self.store.begin().await?;
        let mut outbox = Outbox::new();

        let outbound = record_movement(
            tx.as_mut(),
            &self.projector,
            &mut outbox,
            record(outbound_id, inbound_id, input.source_warehouse_id, out_lines),
        )
        .await?;

        let in_lines: Vec<DetailLine> = outbound
            .details()
            .iter()
            .map(|d| DetailLine {
                detail_id: Uuid::now_v7(),
                raw_product_id: d.raw_product_id,
                direction: Direction::In,
                quantity: d.quantity,
                unit_price: d.unit_price,
                notes: d.notes.clone(),
            })
            .collect();

        let inbound = record_movement(
            tx.as_mut(),
            &self.projector,
            &mut outbox,
            record(inbound_id, outbound_id, input.target_warehouse_id, in_lines),
        )
        .await?;

        tx.commit().await?;
        outbox.publish(&self.bus);

        tracing::info!(
            outbound_id = %outbound_id,
            inbound_id = %inbound_id,
            total_amount = %outbound.total_amount(),
            "transfer recorded"
        );
        Ok(TransferMovements { outbound, inbound })
    }

    /// Turn a count into one INVENTORY movement. `None` when nothing differs.
    #[instrument(skip(self, input), fields(lines = input.lines.len()), err)]
    pub async fn create_inventory_check(
        &self,
        project_id: ProjectId,
        warehouse_id: WarehouseId,
        input: NewInventoryCheck,
    ) -> Result<Option<StockMovement>, EngineError> {
        let adjustments = adjustments(&input.lines)?;
        if adjustments.is_empty() {
            tracing::info!(%warehouse_id, "inventory check matched the books");
            return Ok(None);
        }

        let now = Utc::now();
        let command = RecordMovement {
            project_id,
            partner_id: input.partner_id,
            movement_id: MovementId::new(),
            movement_type: MovementType::Inventory,
            status: MovementStatus::Confirmed,
            warehouse_id,
            source_warehouse_id: None,
            target_warehouse_id: None,
            linked_movement_id: None,
            movement_date: input.movement_date.unwrap_or(now),
            invoice_id: None,
            reference: input.reference,
            notes: input.notes,
            lines: adjustments
                .into_iter()
                .map(|a| DetailLine {
                    detail_id: Uuid::now_v7(),
                    raw_product_id: Some(a.raw_product_id),
                    direction: a.direction,
                    quantity: a.quantity,
                    unit_price: a.unit_price,
                    notes: a.notes,
                })
                .collect(),
            total_amount: None,
            effect_sequence: None,
            occurred_at: now,
        };

        let mut tx = self.store.begin().await?;
        let mut outbox = Outbox::new();
        let movement = record_movement(tx.as_mut(), &self.projector, &mut outbox, command).await?;
        tx.commit().await?;
        outbox.publish(&self.bus);

        tracing::info!(movement_id = %movement.id_typed(), "inventory adjustment recorded");
        Ok(Some(movement))
    }

    /// `draft → confirmed` applies the movement to balances; `draft → cancelled`
    /// has nothing to undo. Confirmed movements are final.
    #[instrument(skip(self), err)]
    pub async fn update_status(
        &self,
        project_id: ProjectId,
        movement_id: MovementId,
        status: MovementStatus,
    ) -> Result<StockMovement, EngineError> {
        let mut tx = self.store.begin().await?;
        let mut movement = load_movement(tx.as_mut(), project_id, movement_id).await?;

        let version_before = movement.version();
        let was_effective = movement.is_effective();

        let mut effect_sequence = None;
        if !was_effective && status.is_effective() {
            if let Some(warehouse_id) = movement.warehouse_id() {
                load_warehouse(tx.as_mut(), project_id, warehouse_id)
                    .await?
                    .ensure_active()?;
            }
            effect_sequence = Some(tx.next_effect_sequence().await?);
        }

        let events = movement.execute(&MovementCommand::ChangeStatus(ChangeMovementStatus {
            project_id,
            movement_id,
            status,
            effect_sequence,
            occurred_at: Utc::now(),
        }))?;

        if !was_effective && movement.is_effective() {
            self.projector.apply_movement(tx.as_mut(), &movement).await?;
        }
        tx.save_movement(&movement, ExpectedVersion::Exact(version_before)).await?;

        let mut outbox = Outbox::new();
        outbox.record(project_id, Uuid::from(movement_id), MOVEMENT, version_before, &events)?;
        tx.commit().await?;
        outbox.publish(&self.bus);

        tracing::info!(%movement_id, status = %movement.status(), "movement status changed");
        Ok(movement)
    }

    /// Only drafts and cancelled movements can be deleted.
    #[instrument(skip(self), err)]
    pub async fn delete_movement(&self, project_id: ProjectId, movement_id: MovementId) -> Result<(), EngineError> {
        let mut tx = self.store.begin().await?;
        let mut movement = load_movement(tx.as_mut(), project_id, movement_id).await?;

        let version_before = movement.version();
        let events = movement.execute(&MovementCommand::Remove(RemoveMovement {
            project_id,
            movement_id,
            occurred_at: Utc::now(),
        }))?;
        tx.delete_movement(project_id, movement_id).await?;

        let mut outbox = Outbox::new();
        outbox.record(project_id, Uuid::from(movement_id), MOVEMENT, version_before, &events)?;
        tx.commit().await?;
        outbox.publish(&self.bus);
        Ok(())
    }

    pub async fn get_movement(&self, project_id: ProjectId, movement_id: MovementId) -> Result<StockMovement, EngineError> {
        let mut tx = self.store.begin().await?;
        load_movement(tx.as_mut(), project_id, movement_id).await
    }

    pub async fn list_movements(
        &self,
        project_id: ProjectId,
        filter: &MovementFilter,
    ) -> Result<Vec<StockMovement>, EngineError> {
        let mut tx = self.store.begin().await?;
        Ok(tx.list_movements(project_id, filter).await?)
    }

    pub async fn list_balances(
        &self,
        project_id: ProjectId,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<ProductBalance>, EngineError> {
        let mut tx = self.store.begin().await?;
        load_warehouse(tx.as_mut(), project_id, warehouse_id).await?;
        Ok(tx.list_balances(project_id, Some(warehouse_id)).await?)
    }

    pub async fn inventory_summary(
        &self,
        project_id: ProjectId,
        warehouse_id: WarehouseId,
    ) -> Result<InventorySummary, EngineError> {
        let balances = self.list_balances(project_id, warehouse_id).await?;
        Ok(InventorySummary::from_balances(warehouse_id, &balances))
    }

    /// Replace every balance of the project with a replay of its confirmed movements.
    #[instrument(skip(self), err)]
    pub async fn rebuild_balances(&self, project_id: ProjectId) -> Result<RebuildReport, EngineError> {
        let mut tx = self.store.begin().await?;
        let report = self.projector.rebuild(tx.as_mut(), project_id).await?;
        tx.commit().await?;

        if report.drifted.is_empty() {
            tracing::info!(balances = report.balances, "balances rebuilt");
        } else {
            tracing::warn!(
                balances = report.balances,
                drifted = report.drifted.len(),
                "balances rebuilt with drift"
            );
        }
        Ok(report)
    }
}
