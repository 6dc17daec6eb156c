use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use invrecon_core::{
    Aggregate, AggregateRoot, DomainError, Entity, InvoiceId, MovementId, PartnerId, ProjectId,
    RawProductId, WarehouseId,
};
use invrecon_events::Event;

/// Business reason of a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Purchase,
    Sale,
    Inventory,
    Transfer,
    Waste,
    InternalUse,
    Return,
    Expense,
    Other,
}

impl MovementType {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::Purchase => "PURCHASE",
            MovementType::Sale => "SALE",
            MovementType::Inventory => "INVENTORY",
            MovementType::Transfer => "TRANSFER",
            MovementType::Waste => "WASTE",
            MovementType::InternalUse => "INTERNAL_USE",
            MovementType::Return => "RETURN",
            MovementType::Expense => "EXPENSE",
            MovementType::Other => "OTHER",
        }
    }

    /// Expense movements carry amounts only and never touch balances.
    pub fn bears_quantities(self) -> bool {
        self != MovementType::Expense
    }

    fn allows(self, direction: Direction) -> bool {
        match self {
            MovementType::Purchase | MovementType::Expense => direction == Direction::In,
            MovementType::Sale | MovementType::Waste | MovementType::InternalUse => {
                direction == Direction::Out
            }
            MovementType::Inventory
            | MovementType::Transfer
            | MovementType::Return
            | MovementType::Other => true,
        }
    }

    /// Inventory adjustments may mix directions; every other type is one-way.
    fn allows_mixed_directions(self) -> bool {
        self == MovementType::Inventory
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementStatus {
    Draft,
    Confirmed,
    Cancelled,
}

impl MovementStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementStatus::Draft => "draft",
            MovementStatus::Confirmed => "confirmed",
            MovementStatus::Cancelled => "cancelled",
        }
    }

    /// Only drafts move, and only forward.
    pub fn can_transition_to(self, next: MovementStatus) -> bool {
        matches!(
            (self, next),
            (MovementStatus::Draft, MovementStatus::Confirmed)
                | (MovementStatus::Draft, MovementStatus::Cancelled)
        )
    }

    /// Confirmed movements are the ones reflected in balances.
    pub fn is_effective(self) -> bool {
        self == MovementStatus::Confirmed
    }
}

impl core::fmt::Display for MovementStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(MovementStatus::Draft),
            "confirmed" => Ok(MovementStatus::Confirmed),
            "cancelled" => Ok(MovementStatus::Cancelled),
            other => Err(DomainError::validation(format!("unknown movement status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    In,
    Out,
}

/// Line-level row of a movement. Owned by its movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockMovementDetail {
    pub id: Uuid,
    pub movement_id: MovementId,
    /// Absent only on expense rows whose article is not in the catalog.
    pub raw_product_id: Option<RawProductId>,
    pub direction: Direction,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub date: DateTime<Utc>,
    pub warehouse_id: WarehouseId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Entity for StockMovementDetail {
    type Id = Uuid;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Requested detail row, before totals are computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailLine {
    pub detail_id: Uuid,
    pub raw_product_id: Option<RawProductId>,
    pub direction: Direction,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub notes: Option<String>,
}

fn restored_from_snapshot() -> bool {
    true
}

/// Aggregate root: StockMovement.
///
/// A movement is a recorded fact. After creation only its status changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockMovement {
    id: MovementId,
    project_id: Option<ProjectId>,
    partner_id: Option<PartnerId>,
    movement_type: MovementType,
    status: MovementStatus,
    warehouse_id: Option<WarehouseId>,
    source_warehouse_id: Option<WarehouseId>,
    target_warehouse_id: Option<WarehouseId>,
    linked_movement_id: Option<MovementId>,
    movement_date: Option<DateTime<Utc>>,
    /// Position in the ledger's order of effect; set when the movement starts
    /// counting towards balances (creation as confirmed, or confirmation).
    #[serde(default)]
    effect_sequence: Option<u64>,
    total_quantity: Decimal,
    total_amount: Decimal,
    invoice_id: Option<InvoiceId>,
    reference: Option<String>,
    notes: Option<String>,
    details: Vec<StockMovementDetail>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    #[serde(skip, default = "restored_from_snapshot")]
    created: bool,
    #[serde(skip)]
    removed: bool,
}

impl StockMovement {
    /// Not-yet-recorded instance; the target of a `Record` command.
    pub fn empty(id: MovementId) -> Self {
        Self {
            id,
            project_id: None,
            partner_id: None,
            movement_type: MovementType::Other,
            status: MovementStatus::Draft,
            warehouse_id: None,
            source_warehouse_id: None,
            target_warehouse_id: None,
            linked_movement_id: None,
            movement_date: None,
            effect_sequence: None,
            total_quantity: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            invoice_id: None,
            reference: None,
            notes: None,
            details: Vec::new(),
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
            removed: false,
        }
    }

    pub fn id_typed(&self) -> MovementId {
        self.id
    }

    pub fn project_id(&self) -> Option<ProjectId> {
        self.project_id
    }

    pub fn partner_id(&self) -> Option<PartnerId> {
        self.partner_id
    }

    pub fn movement_type(&self) -> MovementType {
        self.movement_type
    }

    pub fn status(&self) -> MovementStatus {
        self.status
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn source_warehouse_id(&self) -> Option<WarehouseId> {
        self.source_warehouse_id
    }

    pub fn target_warehouse_id(&self) -> Option<WarehouseId> {
        self.target_warehouse_id
    }

    pub fn linked_movement_id(&self) -> Option<MovementId> {
        self.linked_movement_id
    }

    pub fn movement_date(&self) -> Option<DateTime<Utc>> {
        self.movement_date
    }

    pub fn effect_sequence(&self) -> Option<u64> {
        self.effect_sequence
    }

    pub fn total_quantity(&self) -> Decimal {
        self.total_quantity
    }

    pub fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    pub fn invoice_id(&self) -> Option<InvoiceId> {
        self.invoice_id
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn details(&self) -> &[StockMovementDetail] {
        &self.details
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Whether this movement is currently reflected in balances.
    pub fn is_effective(&self) -> bool {
        self.created && !self.removed && self.status.is_effective() && self.movement_type.bears_quantities()
    }

    /// Every warehouse this movement references (warehouse, source, target).
    pub fn referenced_warehouses(&self) -> impl Iterator<Item = WarehouseId> + '_ {
        [self.warehouse_id, self.source_warehouse_id, self.target_warehouse_id]
            .into_iter()
            .flatten()
    }
}

impl AggregateRoot for StockMovement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RecordMovement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMovement {
    pub project_id: ProjectId,
    pub partner_id: Option<PartnerId>,
    pub movement_id: MovementId,
    pub movement_type: MovementType,
    pub status: MovementStatus,
    pub warehouse_id: WarehouseId,
    pub source_warehouse_id: Option<WarehouseId>,
    pub target_warehouse_id: Option<WarehouseId>,
    pub linked_movement_id: Option<MovementId>,
    pub movement_date: DateTime<Utc>,
    pub invoice_id: Option<InvoiceId>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub lines: Vec<DetailLine>,
    /// Overrides the sum of line totals (expense movements book the invoice amount).
    pub total_amount: Option<Decimal>,
    /// Stamped by the ledger for movements recorded as confirmed.
    #[serde(default)]
    pub effect_sequence: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeMovementStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMovementStatus {
    pub project_id: ProjectId,
    pub movement_id: MovementId,
    pub status: MovementStatus,
    /// Stamped by the ledger on `draft → confirmed`.
    #[serde(default)]
    pub effect_sequence: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveMovement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveMovement {
    pub project_id: ProjectId,
    pub movement_id: MovementId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementCommand {
    Record(RecordMovement),
    ChangeStatus(ChangeMovementStatus),
    Remove(RemoveMovement),
}

/// Event: MovementRecorded (the full recorded fact, totals included).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecorded {
    pub project_id: ProjectId,
    pub partner_id: Option<PartnerId>,
    pub movement_id: MovementId,
    pub movement_type: MovementType,
    pub status: MovementStatus,
    pub warehouse_id: WarehouseId,
    pub source_warehouse_id: Option<WarehouseId>,
    pub target_warehouse_id: Option<WarehouseId>,
    pub linked_movement_id: Option<MovementId>,
    pub movement_date: DateTime<Utc>,
    pub invoice_id: Option<InvoiceId>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub details: Vec<StockMovementDetail>,
    pub total_quantity: Decimal,
    pub total_amount: Decimal,
    #[serde(default)]
    pub effect_sequence: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementStatusChanged {
    pub project_id: ProjectId,
    pub movement_id: MovementId,
    pub from: MovementStatus,
    pub to: MovementStatus,
    #[serde(default)]
    pub effect_sequence: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRemoved {
    pub project_id: ProjectId,
    pub movement_id: MovementId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementEvent {
    MovementRecorded(MovementRecorded),
    MovementStatusChanged(MovementStatusChanged),
    MovementRemoved(MovementRemoved),
}

impl Event for MovementEvent {
    fn event_type(&self) -> &'static str {
        match self {
            MovementEvent::MovementRecorded(_) => "stock.movement.recorded",
            MovementEvent::MovementStatusChanged(_) => "stock.movement.status_changed",
            MovementEvent::MovementRemoved(_) => "stock.movement.removed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            MovementEvent::MovementRecorded(e) => e.occurred_at,
            MovementEvent::MovementStatusChanged(e) => e.occurred_at,
            MovementEvent::MovementRemoved(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockMovement {
    type Command = MovementCommand;
    type Event = MovementEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            MovementEvent::MovementRecorded(e) => {
                self.project_id = Some(e.project_id);
                self.partner_id = e.partner_id;
                self.movement_type = e.movement_type;
                self.status = e.status;
                self.warehouse_id = Some(e.warehouse_id);
                self.source_warehouse_id = e.source_warehouse_id;
                self.target_warehouse_id = e.target_warehouse_id;
                self.linked_movement_id = e.linked_movement_id;
                self.movement_date = Some(e.movement_date);
                self.invoice_id = e.invoice_id;
                self.reference = e.reference.clone();
                self.notes = e.notes.clone();
                self.details = e.details.clone();
                self.total_quantity = e.total_quantity;
                self.total_amount = e.total_amount;
                self.effect_sequence = e.effect_sequence;
                self.created_at = Some(e.occurred_at);
                self.updated_at = Some(e.occurred_at);
                self.created = true;
            }
            MovementEvent::MovementStatusChanged(e) => {
                self.status = e.to;
                if e.effect_sequence.is_some() {
                    self.effect_sequence = e.effect_sequence;
                }
                self.updated_at = Some(e.occurred_at);
            }
            MovementEvent::MovementRemoved(e) => {
                self.removed = true;
                self.updated_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            MovementCommand::Record(cmd) => self.handle_record(cmd),
            MovementCommand::ChangeStatus(cmd) => self.handle_change_status(cmd),
            MovementCommand::Remove(cmd) => self.handle_remove(cmd),
        }
    }
}

impl StockMovement {
    fn ensure_visible(&self, project_id: ProjectId, movement_id: MovementId) -> Result<(), DomainError> {
        if !self.created || self.removed || self.project_id != Some(project_id) || self.id != movement_id {
            return Err(DomainError::not_found(format!("stock movement {movement_id}")));
        }
        Ok(())
    }

    fn handle_record(&self, cmd: &RecordMovement) -> Result<Vec<MovementEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("movement already recorded"));
        }
        if self.id != cmd.movement_id {
            return Err(DomainError::validation("movement_id mismatch"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("a movement needs at least one line"));
        }
        if cmd.status == MovementStatus::Cancelled {
            return Err(DomainError::validation("a movement cannot be created cancelled"));
        }

        self.check_transfer_shape(cmd)?;

        let first_direction = cmd.lines[0].direction;
        for (idx, line) in cmd.lines.iter().enumerate() {
            if !cmd.movement_type.allows(line.direction) {
                return Err(DomainError::validation(format!(
                    "line {idx}: direction {:?} not allowed for {} movements",
                    line.direction, cmd.movement_type
                )));
            }
            if !cmd.movement_type.allows_mixed_directions() && line.direction != first_direction {
                return Err(DomainError::validation(format!(
                    "line {idx}: {} movements cannot mix directions",
                    cmd.movement_type
                )));
            }
            if cmd.movement_type.bears_quantities() {
                if line.quantity <= Decimal::ZERO {
                    return Err(DomainError::validation(format!("line {idx}: quantity must be positive")));
                }
                if line.raw_product_id.is_none() {
                    return Err(DomainError::validation(format!("line {idx}: rawProductId is required")));
                }
            } else if line.quantity < Decimal::ZERO {
                return Err(DomainError::validation(format!("line {idx}: quantity cannot be negative")));
            }
            if line.unit_price < Decimal::ZERO {
                return Err(DomainError::validation(format!("line {idx}: unit price cannot be negative")));
            }
        }

        // Drafts have no balance effect until confirmed, so only rows whose
        // valuation is known up front (incoming goods) may wait in draft.
        if cmd.status == MovementStatus::Draft
            && (cmd.movement_type == MovementType::Transfer
                || !cmd.movement_type.bears_quantities()
                || cmd.lines.iter().any(|l| l.direction == Direction::Out))
        {
            return Err(DomainError::validation(format!(
                "{} movements with outgoing lines cannot be drafted",
                cmd.movement_type
            )));
        }

        let mut details = Vec::with_capacity(cmd.lines.len());
        let mut total_quantity = Decimal::ZERO;
        let mut line_total = Decimal::ZERO;
        for line in &cmd.lines {
            let total_price = line
                .quantity
                .checked_mul(line.unit_price)
                .ok_or_else(|| DomainError::validation("line total overflows"))?;
            total_quantity += line.quantity;
            line_total += total_price;
            details.push(StockMovementDetail {
                id: line.detail_id,
                movement_id: cmd.movement_id,
                raw_product_id: line.raw_product_id,
                direction: line.direction,
                quantity: line.quantity,
                unit_price: line.unit_price,
                total_price,
                date: cmd.movement_date,
                warehouse_id: cmd.warehouse_id,
                notes: line.notes.clone(),
            });
        }

        Ok(vec![MovementEvent::MovementRecorded(MovementRecorded {
            project_id: cmd.project_id,
            partner_id: cmd.partner_id,
            movement_id: cmd.movement_id,
            movement_type: cmd.movement_type,
            status: cmd.status,
            warehouse_id: cmd.warehouse_id,
            source_warehouse_id: cmd.source_warehouse_id,
            target_warehouse_id: cmd.target_warehouse_id,
            linked_movement_id: cmd.linked_movement_id,
            movement_date: cmd.movement_date,
            invoice_id: cmd.invoice_id,
            reference: cmd.reference.clone(),
            notes: cmd.notes.clone(),
            details,
            total_quantity,
            total_amount: cmd.total_amount.unwrap_or(line_total),
            effect_sequence: cmd.effect_sequence.filter(|_| cmd.status.is_effective()),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn check_transfer_shape(&self, cmd: &RecordMovement) -> Result<(), DomainError> {
        if cmd.movement_type != MovementType::Transfer {
            if cmd.source_warehouse_id.is_some() || cmd.target_warehouse_id.is_some() {
                return Err(DomainError::validation(
                    "source/target warehouses are only used by transfers",
                ));
            }
            return Ok(());
        }

        let (Some(source), Some(target)) = (cmd.source_warehouse_id, cmd.target_warehouse_id) else {
            return Err(DomainError::validation("a transfer needs a source and a target warehouse"));
        };
        if source == target {
            return Err(DomainError::validation("source and target warehouse must differ"));
        }

        let expected_direction = if cmd.warehouse_id == source {
            Direction::Out
        } else if cmd.warehouse_id == target {
            Direction::In
        } else {
            return Err(DomainError::validation(
                "a transfer leg must be booked at its source or target warehouse",
            ));
        };
        if cmd.lines.iter().any(|l| l.direction != expected_direction) {
            return Err(DomainError::validation(
                "transfer legs go OUT at the source and IN at the target",
            ));
        }
        Ok(())
    }

    fn handle_change_status(&self, cmd: &ChangeMovementStatus) -> Result<Vec<MovementEvent>, DomainError> {
        self.ensure_visible(cmd.project_id, cmd.movement_id)?;

        if !self.status.can_transition_to(cmd.status) {
            return Err(DomainError::conflict(format!(
                "movement {} cannot go from {} to {}",
                self.id, self.status, cmd.status
            )));
        }

        Ok(vec![MovementEvent::MovementStatusChanged(MovementStatusChanged {
            project_id: cmd.project_id,
            movement_id: cmd.movement_id,
            from: self.status,
            to: cmd.status,
            effect_sequence: cmd.effect_sequence.filter(|_| cmd.status.is_effective()),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove(&self, cmd: &RemoveMovement) -> Result<Vec<MovementEvent>, DomainError> {
        self.ensure_visible(cmd.project_id, cmd.movement_id)?;

        if self.status == MovementStatus::Confirmed {
            return Err(DomainError::conflict(format!(
                "movement {} is confirmed and cannot be deleted",
                self.id
            )));
        }

        Ok(vec![MovementEvent::MovementRemoved(MovementRemoved {
            project_id: cmd.project_id,
            movement_id: cmd.movement_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_project_id() -> ProjectId {
        ProjectId::new()
    }

    fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn line(direction: Direction, qty: i64, price: Decimal) -> DetailLine {
        DetailLine {
            detail_id: Uuid::now_v7(),
            raw_product_id: Some(RawProductId::new()),
            direction,
            quantity: Decimal::from(qty),
            unit_price: price,
            notes: None,
        }
    }

    fn record(
        project_id: ProjectId,
        movement_type: MovementType,
        status: MovementStatus,
        lines: Vec<DetailLine>,
    ) -> RecordMovement {
        RecordMovement {
            project_id,
            partner_id: None,
            movement_id: MovementId::new(),
            movement_type,
            status,
            warehouse_id: WarehouseId::new(),
            source_warehouse_id: None,
            target_warehouse_id: None,
            linked_movement_id: None,
            movement_date: test_time(),
            invoice_id: None,
            reference: None,
            notes: None,
            lines,
            total_amount: None,
            effect_sequence: Some(1),
            occurred_at: test_time(),
        }
    }

    fn recorded(cmd: RecordMovement) -> StockMovement {
        let mut mv = StockMovement::empty(cmd.movement_id);
        mv.execute(&MovementCommand::Record(cmd)).unwrap();
        mv
    }

    #[test]
    fn record_computes_totals() {
        let cmd = record(
            test_project_id(),
            MovementType::Purchase,
            MovementStatus::Confirmed,
            vec![
                line(Direction::In, 10, Decimal::new(200, 2)),
                line(Direction::In, 3, Decimal::new(150, 2)),
            ],
        );
        let mv = recorded(cmd);

        assert_eq!(mv.total_quantity(), Decimal::from(13));
        assert_eq!(mv.total_amount(), Decimal::new(2450, 2));
        assert_eq!(mv.details()[0].total_price, Decimal::from(20));
        assert!(mv.details().iter().all(|d| d.movement_id == mv.id_typed()));
        assert!(mv.is_effective());
        assert_eq!(mv.version(), 1);
    }

    #[test]
    fn empty_movement_is_rejected() {
        let cmd = record(test_project_id(), MovementType::Purchase, MovementStatus::Confirmed, vec![]);
        let err = StockMovement::empty(cmd.movement_id)
            .handle(&MovementCommand::Record(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn purchase_lines_must_be_incoming() {
        let cmd = record(
            test_project_id(),
            MovementType::Purchase,
            MovementStatus::Confirmed,
            vec![line(Direction::Out, 1, Decimal::ONE)],
        );
        let err = StockMovement::empty(cmd.movement_id)
            .handle(&MovementCommand::Record(cmd))
            .unwrap_err();
        match err {
            DomainError::Validation(msg) => assert!(msg.contains("not allowed")),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn inventory_may_mix_directions_but_return_may_not() {
        let mixed = vec![
            line(Direction::In, 1, Decimal::ONE),
            line(Direction::Out, 1, Decimal::ONE),
        ];
        let ok = record(test_project_id(), MovementType::Inventory, MovementStatus::Confirmed, mixed.clone());
        assert!(StockMovement::empty(ok.movement_id).handle(&MovementCommand::Record(ok)).is_ok());

        let bad = record(test_project_id(), MovementType::Return, MovementStatus::Confirmed, mixed);
        assert!(StockMovement::empty(bad.movement_id).handle(&MovementCommand::Record(bad)).is_err());
    }

    #[test]
    fn outgoing_drafts_are_rejected() {
        let cmd = record(
            test_project_id(),
            MovementType::Sale,
            MovementStatus::Draft,
            vec![line(Direction::Out, 1, Decimal::ONE)],
        );
        let err = StockMovement::empty(cmd.movement_id)
            .handle(&MovementCommand::Record(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn transfer_leg_direction_must_match_side() {
        let source = WarehouseId::new();
        let target = WarehouseId::new();
        let mut cmd = record(
            test_project_id(),
            MovementType::Transfer,
            MovementStatus::Confirmed,
            vec![line(Direction::In, 2, Decimal::ONE)],
        );
        cmd.warehouse_id = source;
        cmd.source_warehouse_id = Some(source);
        cmd.target_warehouse_id = Some(target);

        let err = StockMovement::empty(cmd.movement_id)
            .handle(&MovementCommand::Record(cmd.clone()))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        cmd.lines = vec![line(Direction::Out, 2, Decimal::ONE)];
        let mv = recorded(cmd);
        assert_eq!(mv.referenced_warehouses().collect::<Vec<_>>(), vec![source, source, target]);
    }

    #[test]
    fn expense_uses_amount_override_and_has_no_balance_effect() {
        let mut cmd = record(
            test_project_id(),
            MovementType::Expense,
            MovementStatus::Confirmed,
            vec![line(Direction::In, 1, Decimal::from(100))],
        );
        cmd.total_amount = Some(Decimal::new(12345, 2));
        let mv = recorded(cmd);

        assert_eq!(mv.total_amount(), Decimal::new(12345, 2));
        assert!(!mv.is_effective());
    }

    #[test]
    fn draft_can_be_confirmed_once() {
        let project_id = test_project_id();
        let mut mv = recorded(record(
            project_id,
            MovementType::Purchase,
            MovementStatus::Draft,
            vec![line(Direction::In, 1, Decimal::ONE)],
        ));
        assert!(!mv.is_effective());

        let confirm = MovementCommand::ChangeStatus(ChangeMovementStatus {
            project_id,
            movement_id: mv.id_typed(),
            status: MovementStatus::Confirmed,
            effect_sequence: Some(7),
            occurred_at: test_time(),
        });
        assert_eq!(mv.effect_sequence(), None);
        mv.execute(&confirm).unwrap();
        assert!(mv.is_effective());
        assert_eq!(mv.effect_sequence(), Some(7));

        let cancel = MovementCommand::ChangeStatus(ChangeMovementStatus {
            project_id,
            movement_id: mv.id_typed(),
            status: MovementStatus::Cancelled,
            effect_sequence: None,
            occurred_at: test_time(),
        });
        match mv.handle(&cancel).unwrap_err() {
            DomainError::Conflict(msg) => assert!(msg.contains("confirmed")),
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn only_draft_or_cancelled_can_be_removed() {
        let project_id = test_project_id();
        let confirmed = recorded(record(
            project_id,
            MovementType::Purchase,
            MovementStatus::Confirmed,
            vec![line(Direction::In, 1, Decimal::ONE)],
        ));
        let remove = |mv: &StockMovement| {
            MovementCommand::Remove(RemoveMovement {
                project_id,
                movement_id: mv.id_typed(),
                occurred_at: test_time(),
            })
        };
        assert!(matches!(
            confirmed.handle(&remove(&confirmed)),
            Err(DomainError::Conflict(_))
        ));

        let mut draft = recorded(record(
            project_id,
            MovementType::Purchase,
            MovementStatus::Draft,
            vec![line(Direction::In, 1, Decimal::ONE)],
        ));
        draft
            .execute(&MovementCommand::ChangeStatus(ChangeMovementStatus {
                project_id,
                movement_id: draft.id_typed(),
                status: MovementStatus::Cancelled,
                effect_sequence: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        let cmd = remove(&draft);
        draft.execute(&cmd).unwrap();
        assert!(draft.is_removed());
    }

    #[test]
    fn status_parses_from_wire_form() {
        assert_eq!("confirmed".parse::<MovementStatus>().unwrap(), MovementStatus::Confirmed);
        assert!("done".parse::<MovementStatus>().is_err());
        assert_eq!(
            serde_json::to_value(MovementType::InternalUse).unwrap(),
            serde_json::json!("INTERNAL_USE")
        );
    }
}
