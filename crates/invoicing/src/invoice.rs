use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use invrecon_core::{
    Aggregate, AggregateRoot, DomainError, Entity, InvoiceId, MovementId, PartnerId, ProjectId,
    SupplierId, WarehouseId,
};
use invrecon_events::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Scheduled,
    Paid,
    Canceled,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Scheduled => "scheduled",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Canceled => "canceled",
        }
    }

    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Scheduled) | (Pending, Paid) | (Pending, Canceled) | (Scheduled, Paid) | (Scheduled, Canceled)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostCenterStatus {
    NotAssigned,
    Assigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryStatus {
    NotProcessed,
    PartiallyProcessed,
    Processed,
}

/// Owned by the extraction pipeline; the engine only records transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawProductStatus {
    NotProcessed,
    Processing,
    Processed,
}

impl RawProductStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RawProductStatus::NotProcessed => "not_processed",
            RawProductStatus::Processing => "processing",
            RawProductStatus::Processed => "processed",
        }
    }

    pub fn can_transition_to(self, next: RawProductStatus) -> bool {
        use RawProductStatus::*;
        matches!(
            (self, next),
            (NotProcessed, Processing) | (Processing, Processed) | (Processing, NotProcessed)
        )
    }
}

/// The four independent status axes of an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceStatus {
    pub payment_status: PaymentStatus,
    pub cost_center_status: CostCenterStatus,
    pub cost_center_id: Option<WarehouseId>,
    pub cost_center_assign_date: Option<DateTime<Utc>>,
    pub cost_center_movement_id: Option<MovementId>,
    pub inventory_status: InventoryStatus,
    /// Physical warehouses the invoice has been processed into, first use first.
    pub inventory_ids: Vec<WarehouseId>,
    pub raw_product_status: RawProductStatus,
}

impl Default for InvoiceStatus {
    fn default() -> Self {
        Self {
            payment_status: PaymentStatus::Pending,
            cost_center_status: CostCenterStatus::NotAssigned,
            cost_center_id: None,
            cost_center_assign_date: None,
            cost_center_movement_id: None,
            inventory_status: InventoryStatus::NotProcessed,
            inventory_ids: Vec::new(),
            raw_product_status: RawProductStatus::NotProcessed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceLine {
    pub line_number: u32,
    pub description: Option<String>,
    pub article_code: Option<String>,
    pub unit: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub processed: bool,
    pub processed_warehouse_id: Option<WarehouseId>,
    pub processed_date: Option<DateTime<Utc>>,
}

impl Entity for InvoiceLine {
    type Id = u32;

    fn id(&self) -> &Self::Id {
        &self.line_number
    }
}

/// Line as delivered by the extraction pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvoiceLine {
    pub line_number: u32,
    pub description: Option<String>,
    pub article_code: Option<String>,
    pub unit: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Defaults to `quantity × unit_price`.
    pub total_price: Option<Decimal>,
}

/// Which lines a processing request targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineSelection {
    /// Every line not yet processed.
    AllUnprocessed,
    /// Explicit line numbers.
    Numbers(Vec<u32>),
    /// Zero-based positions in the invoice's line list.
    Indices(Vec<usize>),
}

fn restored_from_snapshot() -> bool {
    true
}

/// Aggregate root: EInvoice (a supplier invoice awaiting reconciliation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EInvoice {
    id: InvoiceId,
    project_id: Option<ProjectId>,
    partner_id: Option<PartnerId>,
    invoice_number: String,
    invoice_date: Option<DateTime<Utc>>,
    total_amount: Decimal,
    supplier_id: Option<SupplierId>,
    invoice_lines: Vec<InvoiceLine>,
    status: InvoiceStatus,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    #[serde(skip, default = "restored_from_snapshot")]
    created: bool,
}

impl EInvoice {
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            project_id: None,
            partner_id: None,
            invoice_number: String::new(),
            invoice_date: None,
            total_amount: Decimal::ZERO,
            supplier_id: None,
            invoice_lines: Vec::new(),
            status: InvoiceStatus::default(),
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn project_id(&self) -> Option<ProjectId> {
        self.project_id
    }

    pub fn partner_id(&self) -> Option<PartnerId> {
        self.partner_id
    }

    pub fn invoice_number(&self) -> &str {
        &self.invoice_number
    }

    pub fn invoice_date(&self) -> Option<DateTime<Utc>> {
        self.invoice_date
    }

    pub fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        self.supplier_id
    }

    pub fn lines(&self) -> &[InvoiceLine] {
        &self.invoice_lines
    }

    pub fn line(&self, line_number: u32) -> Option<&InvoiceLine> {
        self.invoice_lines.iter().find(|l| l.line_number == line_number)
    }

    pub fn status(&self) -> &InvoiceStatus {
        &self.status
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn unprocessed_lines(&self) -> impl Iterator<Item = &InvoiceLine> + '_ {
        self.invoice_lines.iter().filter(|l| !l.processed)
    }

    /// Resolve a selection to concrete, unprocessed line numbers.
    ///
    /// Fails with Validation for empty or unknown selections and with Conflict
    /// when any selected line was processed before.
    pub fn resolve_selection(&self, selection: &LineSelection) -> Result<Vec<u32>, DomainError> {
        if self.invoice_lines.is_empty() {
            return Err(DomainError::validation(format!(
                "invoice {} has no lines to process",
                self.invoice_number
            )));
        }

        let requested: Vec<u32> = match selection {
            LineSelection::AllUnprocessed => {
                let open: Vec<u32> = self.unprocessed_lines().map(|l| l.line_number).collect();
                if open.is_empty() {
                    return Err(DomainError::conflict(format!(
                        "all lines of invoice {} are already processed",
                        self.invoice_number
                    )));
                }
                return Ok(open);
            }
            LineSelection::Numbers(numbers) => numbers.clone(),
            LineSelection::Indices(indices) => indices
                .iter()
                .map(|&i| {
                    self.invoice_lines.get(i).map(|l| l.line_number).ok_or_else(|| {
                        DomainError::validation(format!("line index {i} is out of range"))
                    })
                })
                .collect::<Result<_, _>>()?,
        };

        if requested.is_empty() {
            return Err(DomainError::validation("empty line selection"));
        }

        let mut selected = Vec::with_capacity(requested.len());
        for number in requested {
            if selected.contains(&number) {
                continue;
            }
            let line = self
                .line(number)
                .ok_or_else(|| DomainError::validation(format!("unknown line number {number}")))?;
            if line.processed {
                let target = line
                    .processed_warehouse_id
                    .map(|w| w.to_string())
                    .unwrap_or_else(|| "a warehouse".to_string());
                return Err(DomainError::conflict(format!(
                    "line {number} is already processed into {target}"
                )));
            }
            selected.push(number);
        }
        Ok(selected)
    }
}

impl AggregateRoot for EInvoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterInvoice (intake from the extraction pipeline).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterInvoice {
    pub project_id: ProjectId,
    pub partner_id: Option<PartnerId>,
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub invoice_date: DateTime<Utc>,
    pub total_amount: Decimal,
    pub supplier_id: Option<SupplierId>,
    pub lines: Vec<NewInvoiceLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignCostCenter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignCostCenter {
    pub project_id: ProjectId,
    pub invoice_id: InvoiceId,
    pub cost_center_id: WarehouseId,
    /// The expense movement booked for this assignment.
    pub movement_id: MovementId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ProcessLines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessLines {
    pub project_id: ProjectId,
    pub invoice_id: InvoiceId,
    pub warehouse_id: WarehouseId,
    pub selection: LineSelection,
    /// The purchase movement booked for these lines.
    pub movement_id: MovementId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangePaymentStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePaymentStatus {
    pub project_id: ProjectId,
    pub invoice_id: InvoiceId,
    pub status: PaymentStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeRawProductStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRawProductStatus {
    pub project_id: ProjectId,
    pub invoice_id: InvoiceId,
    pub status: RawProductStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    Register(RegisterInvoice),
    AssignCostCenter(AssignCostCenter),
    ProcessLines(ProcessLines),
    ChangePaymentStatus(ChangePaymentStatus),
    ChangeRawProductStatus(ChangeRawProductStatus),
}

/// Event: InvoiceRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRegistered {
    pub project_id: ProjectId,
    pub partner_id: Option<PartnerId>,
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub invoice_date: DateTime<Utc>,
    pub total_amount: Decimal,
    pub supplier_id: Option<SupplierId>,
    pub lines: Vec<InvoiceLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CostCenterAssigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostCenterAssigned {
    pub project_id: ProjectId,
    pub invoice_id: InvoiceId,
    pub cost_center_id: WarehouseId,
    pub movement_id: MovementId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LinesProcessed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinesProcessed {
    pub project_id: ProjectId,
    pub invoice_id: InvoiceId,
    pub warehouse_id: WarehouseId,
    pub movement_id: MovementId,
    pub line_numbers: Vec<u32>,
    /// Inventory status after these lines are marked.
    pub inventory_status: InventoryStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStatusChanged {
    pub project_id: ProjectId,
    pub invoice_id: InvoiceId,
    pub from: PaymentStatus,
    pub to: PaymentStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RawProductStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawProductStatusChanged {
    pub project_id: ProjectId,
    pub invoice_id: InvoiceId,
    pub from: RawProductStatus,
    pub to: RawProductStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceRegistered(InvoiceRegistered),
    CostCenterAssigned(CostCenterAssigned),
    LinesProcessed(LinesProcessed),
    PaymentStatusChanged(PaymentStatusChanged),
    RawProductStatusChanged(RawProductStatusChanged),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceRegistered(_) => "einvoice.registered",
            InvoiceEvent::CostCenterAssigned(_) => "einvoice.cost_center_assigned",
            InvoiceEvent::LinesProcessed(_) => "einvoice.lines_processed",
            InvoiceEvent::PaymentStatusChanged(_) => "einvoice.payment_status_changed",
            InvoiceEvent::RawProductStatusChanged(_) => "einvoice.raw_product_status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceRegistered(e) => e.occurred_at,
            InvoiceEvent::CostCenterAssigned(e) => e.occurred_at,
            InvoiceEvent::LinesProcessed(e) => e.occurred_at,
            InvoiceEvent::PaymentStatusChanged(e) => e.occurred_at,
            InvoiceEvent::RawProductStatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for EInvoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceRegistered(e) => {
                self.project_id = Some(e.project_id);
                self.partner_id = e.partner_id;
                self.invoice_number = e.invoice_number.clone();
                self.invoice_date = Some(e.invoice_date);
                self.total_amount = e.total_amount;
                self.supplier_id = e.supplier_id;
                self.invoice_lines = e.lines.clone();
                self.status = InvoiceStatus::default();
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            InvoiceEvent::CostCenterAssigned(e) => {
                self.status.cost_center_status = CostCenterStatus::Assigned;
                self.status.cost_center_id = Some(e.cost_center_id);
                self.status.cost_center_assign_date = Some(e.occurred_at);
                self.status.cost_center_movement_id = Some(e.movement_id);
            }
            InvoiceEvent::LinesProcessed(e) => {
                for line in self
                    .invoice_lines
                    .iter_mut()
                    .filter(|l| e.line_numbers.contains(&l.line_number))
                {
                    line.processed = true;
                    line.processed_warehouse_id = Some(e.warehouse_id);
                    line.processed_date = Some(e.occurred_at);
                }
                if !self.status.inventory_ids.contains(&e.warehouse_id) {
                    self.status.inventory_ids.push(e.warehouse_id);
                }
                self.status.inventory_status = e.inventory_status;
            }
            InvoiceEvent::PaymentStatusChanged(e) => {
                self.status.payment_status = e.to;
            }
            InvoiceEvent::RawProductStatusChanged(e) => {
                self.status.raw_product_status = e.to;
            }
        }

        self.updated_at = Some(Event::occurred_at(event));
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::Register(cmd) => self.handle_register(cmd),
            InvoiceCommand::AssignCostCenter(cmd) => self.handle_assign_cost_center(cmd),
            InvoiceCommand::ProcessLines(cmd) => self.handle_process_lines(cmd),
            InvoiceCommand::ChangePaymentStatus(cmd) => self.handle_payment_status(cmd),
            InvoiceCommand::ChangeRawProductStatus(cmd) => self.handle_raw_product_status(cmd),
        }
    }
}

impl EInvoice {
    fn ensure_visible(&self, project_id: ProjectId, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if !self.created || self.project_id != Some(project_id) || self.id != invoice_id {
            return Err(DomainError::not_found(format!("invoice {invoice_id}")));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("invoice already registered"));
        }
        if self.id != cmd.invoice_id {
            return Err(DomainError::validation("invoice_id mismatch"));
        }
        if cmd.invoice_number.trim().is_empty() {
            return Err(DomainError::validation("invoice number cannot be empty"));
        }
        if cmd.total_amount < Decimal::ZERO {
            return Err(DomainError::validation("total amount cannot be negative"));
        }

        let mut lines: Vec<InvoiceLine> = Vec::with_capacity(cmd.lines.len());
        for new in &cmd.lines {
            if new.line_number == 0 {
                return Err(DomainError::validation("line numbers start at 1"));
            }
            if lines.iter().any(|l| l.line_number == new.line_number) {
                return Err(DomainError::validation(format!(
                    "duplicate line number {}",
                    new.line_number
                )));
            }
            // Every line must be bookable as stock, and stock rows carry a
            // positive quantity.
            if new.quantity <= Decimal::ZERO {
                return Err(DomainError::validation(format!(
                    "line {}: quantity must be positive",
                    new.line_number
                )));
            }
            if new.unit_price < Decimal::ZERO {
                return Err(DomainError::validation(format!(
                    "line {}: unit price cannot be negative",
                    new.line_number
                )));
            }
            let total_price = match new.total_price {
                Some(total) => total,
                None => new
                    .quantity
                    .checked_mul(new.unit_price)
                    .ok_or_else(|| DomainError::validation("line total overflows"))?,
            };
            lines.push(InvoiceLine {
                line_number: new.line_number,
                description: new.description.clone(),
                article_code: new.article_code.clone(),
                unit: new.unit.clone(),
                quantity: new.quantity,
                unit_price: new.unit_price,
                total_price,
                processed: false,
                processed_warehouse_id: None,
                processed_date: None,
            });
        }

        Ok(vec![InvoiceEvent::InvoiceRegistered(InvoiceRegistered {
            project_id: cmd.project_id,
            partner_id: cmd.partner_id,
            invoice_id: cmd.invoice_id,
            invoice_number: cmd.invoice_number.trim().to_string(),
            invoice_date: cmd.invoice_date,
            total_amount: cmd.total_amount,
            supplier_id: cmd.supplier_id,
            lines,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign_cost_center(&self, cmd: &AssignCostCenter) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_visible(cmd.project_id, cmd.invoice_id)?;

        if self.status.cost_center_status == CostCenterStatus::Assigned {
            let current = self
                .status
                .cost_center_id
                .map(|w| w.to_string())
                .unwrap_or_default();
            return Err(DomainError::conflict(format!(
                "invoice {} is already assigned to cost center {current}",
                self.invoice_number
            )));
        }

        Ok(vec![InvoiceEvent::CostCenterAssigned(CostCenterAssigned {
            project_id: cmd.project_id,
            invoice_id: cmd.invoice_id,
            cost_center_id: cmd.cost_center_id,
            movement_id: cmd.movement_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_process_lines(&self, cmd: &ProcessLines) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_visible(cmd.project_id, cmd.invoice_id)?;

        let line_numbers = self.resolve_selection(&cmd.selection)?;
        let remaining = self
            .unprocessed_lines()
            .filter(|l| !line_numbers.contains(&l.line_number))
            .count();
        let inventory_status = if remaining == 0 {
            InventoryStatus::Processed
        } else {
            InventoryStatus::PartiallyProcessed
        };

        Ok(vec![InvoiceEvent::LinesProcessed(LinesProcessed {
            project_id: cmd.project_id,
            invoice_id: cmd.invoice_id,
            warehouse_id: cmd.warehouse_id,
            movement_id: cmd.movement_id,
            line_numbers,
            inventory_status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_payment_status(&self, cmd: &ChangePaymentStatus) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_visible(cmd.project_id, cmd.invoice_id)?;

        let from = self.status.payment_status;
        if !from.can_transition_to(cmd.status) {
            return Err(DomainError::conflict(format!(
                "payment status cannot go from {} to {}",
                from.as_str(),
                cmd.status.as_str()
            )));
        }

        Ok(vec![InvoiceEvent::PaymentStatusChanged(PaymentStatusChanged {
            project_id: cmd.project_id,
            invoice_id: cmd.invoice_id,
            from,
            to: cmd.status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_raw_product_status(&self, cmd: &ChangeRawProductStatus) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_visible(cmd.project_id, cmd.invoice_id)?;

        let from = self.status.raw_product_status;
        if !from.can_transition_to(cmd.status) {
            return Err(DomainError::conflict(format!(
                "raw product status cannot go from {} to {}",
                from.as_str(),
                cmd.status.as_str()
            )));
        }

        Ok(vec![InvoiceEvent::RawProductStatusChanged(RawProductStatusChanged {
            project_id: cmd.project_id,
            invoice_id: cmd.invoice_id,
            from,
            to: cmd.status,
            occurred_at: cmd.occurred_at,
        })])
    }
}
