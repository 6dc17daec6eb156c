//! Invoice reconciliation engine.
//!
//! Turns supplier invoices into ledger entries. An invoice either lands in a
//! cost center as one EXPENSE movement, or its lines are booked into physical
//! warehouses as PURCHASE movements, possibly split over several calls.
//!
//! Both operations hold the invoice's in-flight guard for their whole unit of
//! work. The movement, the balances it moves and the invoice's new status commit
//! in one transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::instrument;
use uuid::Uuid;

use invrecon_core::{
    Aggregate, AggregateRoot, ExpectedVersion, InvoiceId, MovementId, PartnerId, ProjectId, SupplierId,
    WarehouseId,
};
use invrecon_events::{EventBus, EventEnvelope};
use invrecon_invoicing::{
    AssignCostCenter, ChangePaymentStatus, ChangeRawProductStatus, EInvoice, InvoiceCommand, InvoiceLine,
    LineSelection, NewInvoiceLine, PaymentStatus, ProcessLines, RawProductStatus, RegisterInvoice,
};
use invrecon_stock::{DetailLine, Direction, MovementStatus, MovementType, RecordMovement, StockMovement};

use crate::catalog::RawProductCatalog;
use crate::error::EngineError;
use crate::projections::BalanceProjector;
use crate::store::{LedgerStore, LedgerTx};

use super::LedgerPolicy;
use super::in_flight::InFlightInvoices;
use super::outbox::Outbox;
use super::posting::{INVOICE, load_invoice, record_movement};

/// Invoice as delivered by the extraction pipeline.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub partner_id: Option<PartnerId>,
    pub invoice_number: String,
    /// Defaults to now.
    pub invoice_date: Option<DateTime<Utc>>,
    pub total_amount: Decimal,
    pub supplier_id: Option<SupplierId>,
    pub lines: Vec<NewInvoiceLine>,
}

pub struct ReconciliationEngine<B> {
    store: Arc<dyn LedgerStore>,
    bus: B,
    catalog: Arc<dyn RawProductCatalog>,
    in_flight: InFlightInvoices,
    projector: BalanceProjector,
}

impl<B> ReconciliationEngine<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        store: Arc<dyn LedgerStore>,
        bus: B,
        catalog: Arc<dyn RawProductCatalog>,
        policy: LedgerPolicy,
    ) -> Self {
        Self {
            store,
            bus,
            catalog,
            in_flight: InFlightInvoices::new(),
            projector: BalanceProjector::new(policy.allow_negative_balances),
        }
    }

    /// Shared view of the in-flight registry.
    pub fn in_flight(&self) -> &InFlightInvoices {
        &self.in_flight
    }

    pub fn is_processing(&self, invoice_id: InvoiceId) -> bool {
        self.in_flight.is_processing(invoice_id)
    }

    #[instrument(skip(self, input), fields(invoice_number = %input.invoice_number, lines = input.lines.len()), err)]
    pub async fn register_invoice(&self, project_id: ProjectId, input: NewInvoice) -> Result<EInvoice, EngineError> {
        let invoice_id = InvoiceId::new();
        let now = Utc::now();
        let command = InvoiceCommand::Register(RegisterInvoice {
            project_id,
            partner_id: input.partner_id,
            invoice_id,
            invoice_number: input.invoice_number,
            invoice_date: input.invoice_date.unwrap_or(now),
            total_amount: input.total_amount,
            supplier_id: input.supplier_id,
            lines: input.lines,
            occurred_at: now,
        });

        let mut tx = self.store.begin().await?;
        let mut invoice = EInvoice::empty(invoice_id);
        let events = invoice.execute(&command)?;
        tx.save_invoice(&invoice, ExpectedVersion::Exact(0)).await?;

        let mut outbox = Outbox::new();
        outbox.record(project_id, Uuid::from(invoice_id), INVOICE, 0, &events)?;
        tx.commit().await?;
        outbox.publish(&self.bus);

        tracing::info!(%invoice_id, "invoice registered");
        Ok(invoice)
    }

    /// Book the whole invoice as an expense of a cost center.
    ///
    /// Creates one EXPENSE movement for the invoice total and returns it.
    #[instrument(skip(self), err)]
    pub async fn assign_to_cost_center(
        &self,
        project_id: ProjectId,
        invoice_id: InvoiceId,
        cost_center_id: WarehouseId,
    ) -> Result<StockMovement, EngineError> {
        let _guard = self.in_flight.acquire(invoice_id)?;

        let mut tx = self.store.begin().await?;
        let mut invoice = load_invoice(tx.as_mut(), project_id, invoice_id).await?;

        let now = Utc::now();
        let movement_id = MovementId::new();
        let version_before = invoice.version();
        let invoice_events = invoice.execute(&InvoiceCommand::AssignCostCenter(AssignCostCenter {
            project_id,
            invoice_id,
            cost_center_id,
            movement_id,
            occurred_at: now,
        }))?;

        let command = RecordMovement {
            project_id,
            partner_id: invoice.partner_id(),
            movement_id,
            movement_type: MovementType::Expense,
            status: MovementStatus::Confirmed,
            warehouse_id: cost_center_id,
            source_warehouse_id: None,
            target_warehouse_id: None,
            linked_movement_id: None,
            movement_date: now,
            invoice_id: Some(invoice_id),
            reference: Some(invoice.invoice_number().to_string()),
            notes: None,
            lines: self.expense_lines(project_id, &invoice),
            total_amount: Some(invoice.total_amount()),
            effect_sequence: None,
            occurred_at: now,
        };

        let mut outbox = Outbox::new();
        let movement = record_movement(tx.as_mut(), &self.projector, &mut outbox, command).await?;
        self.save_invoice(tx.as_mut(), &mut outbox, &invoice, version_before, &invoice_events)
            .await?;
        tx.commit().await?;
        outbox.publish(&self.bus);

        tracing::info!(
            %invoice_id,
            %cost_center_id,
            %movement_id,
            amount = %movement.total_amount(),
            "invoice assigned to cost center"
        );
        Ok(movement)
    }

    /// Book selected invoice lines into a physical warehouse as one PURCHASE movement.
    #[instrument(skip(self, selection), err)]
    pub async fn process_to_warehouse(
        &self,
        project_id: ProjectId,
        invoice_id: InvoiceId,
        warehouse_id: WarehouseId,
        selection: LineSelection,
    ) -> Result<StockMovement, EngineError> {
        let _guard = self.in_flight.acquire(invoice_id)?;

        let mut tx = self.store.begin().await?;
        let mut invoice = load_invoice(tx.as_mut(), project_id, invoice_id).await?;

        let line_numbers = invoice.resolve_selection(&selection)?;
        let mut lines = Vec::with_capacity(line_numbers.len());
        for number in &line_numbers {
            let line = invoice
                .line(*number)
                .ok_or_else(|| EngineError::Validation(format!("unknown line number {number}")))?;
            lines.push(self.purchase_line(project_id, line)?);
        }

        let now = Utc::now();
        let movement_id = MovementId::new();
        let version_before = invoice.version();
        let invoice_events = invoice.execute(&InvoiceCommand::ProcessLines(ProcessLines {
            project_id,
            invoice_id,
            warehouse_id,
            selection: LineSelection::Numbers(line_numbers),
            movement_id,
            occurred_at: now,
        }))?;

        let command = RecordMovement {
            project_id,
            partner_id: invoice.partner_id(),
            movement_id,
            movement_type: MovementType::Purchase,
            status: MovementStatus::Confirmed,
            warehouse_id,
            source_warehouse_id: None,
            target_warehouse_id: None,
            linked_movement_id: None,
            movement_date: now,
            invoice_id: Some(invoice_id),
            reference: Some(invoice.invoice_number().to_string()),
            notes: None,
            lines,
            total_amount: None,
            effect_sequence: None,
            occurred_at: now,
        };

        let mut outbox = Outbox::new();
        let movement = record_movement(tx.as_mut(), &self.projector, &mut outbox, command).await?;
        self.save_invoice(tx.as_mut(), &mut outbox, &invoice, version_before, &invoice_events)
            .await?;
        tx.commit().await?;
        outbox.publish(&self.bus);

        tracing::info!(
            %invoice_id,
            %warehouse_id,
            %movement_id,
            lines = movement.details().len(),
            inventory_status = ?invoice.status().inventory_status,
            "invoice lines processed into warehouse"
        );
        Ok(movement)
    }

    #[instrument(skip(self), err)]
    pub async fn update_payment_status(
        &self,
        project_id: ProjectId,
        invoice_id: InvoiceId,
        status: PaymentStatus,
    ) -> Result<EInvoice, EngineError> {
        self.execute(
            project_id,
            invoice_id,
            InvoiceCommand::ChangePaymentStatus(ChangePaymentStatus {
                project_id,
                invoice_id,
                status,
                occurred_at: Utc::now(),
            }),
        )
        .await
    }

    #[instrument(skip(self), err)]
    pub async fn update_raw_product_status(
        &self,
        project_id: ProjectId,
        invoice_id: InvoiceId,
        status: RawProductStatus,
    ) -> Result<EInvoice, EngineError> {
        self.execute(
            project_id,
            invoice_id,
            InvoiceCommand::ChangeRawProductStatus(ChangeRawProductStatus {
                project_id,
                invoice_id,
                status,
                occurred_at: Utc::now(),
            }),
        )
        .await
    }

    pub async fn get_invoice(&self, project_id: ProjectId, invoice_id: InvoiceId) -> Result<EInvoice, EngineError> {
        let mut tx = self.store.begin().await?;
        load_invoice(tx.as_mut(), project_id, invoice_id).await
    }

    pub async fn list_invoices(&self, project_id: ProjectId) -> Result<Vec<EInvoice>, EngineError> {
        let mut tx = self.store.begin().await?;
        Ok(tx.list_invoices(project_id).await?)
    }

    async fn execute(
        &self,
        project_id: ProjectId,
        invoice_id: InvoiceId,
        command: InvoiceCommand,
    ) -> Result<EInvoice, EngineError> {
        let mut tx = self.store.begin().await?;
        let mut invoice = load_invoice(tx.as_mut(), project_id, invoice_id).await?;

        let version_before = invoice.version();
        let events = invoice.execute(&command)?;

        let mut outbox = Outbox::new();
        self.save_invoice(tx.as_mut(), &mut outbox, &invoice, version_before, &events)
            .await?;
        tx.commit().await?;
        outbox.publish(&self.bus);
        Ok(invoice)
    }

    async fn save_invoice<E>(
        &self,
        tx: &mut dyn LedgerTx,
        outbox: &mut Outbox,
        invoice: &EInvoice,
        version_before: u64,
        events: &[E],
    ) -> Result<(), EngineError>
    where
        E: invrecon_events::Event + serde::Serialize,
    {
        let project_id = invoice
            .project_id()
            .ok_or_else(|| EngineError::Validation(format!("invoice {} has no project", invoice.id_typed())))?;
        tx.save_invoice(invoice, ExpectedVersion::Exact(version_before)).await?;
        outbox.record(project_id, Uuid::from(invoice.id_typed()), INVOICE, version_before, events)
    }

    /// An invoice line booked as incoming stock. The article code must resolve.
    fn purchase_line(&self, project_id: ProjectId, line: &InvoiceLine) -> Result<DetailLine, EngineError> {
        let code = line
            .article_code
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                EngineError::Validation(format!("line {} has no article code", line.line_number))
            })?;
        let raw_product_id = self.catalog.resolve_article(project_id, code).ok_or_else(|| {
            EngineError::Validation(format!(
                "line {}: article code {code} is not in the raw-product catalog",
                line.line_number
            ))
        })?;
        if line.quantity <= Decimal::ZERO {
            return Err(EngineError::Validation(format!(
                "line {}: quantity must be positive",
                line.line_number
            )));
        }

        Ok(DetailLine {
            detail_id: Uuid::now_v7(),
            raw_product_id: Some(raw_product_id),
            direction: Direction::In,
            quantity: line.quantity,
            unit_price: line.unit_price,
            notes: line.description.clone(),
        })
    }

    /// One expense row per invoice line; a line-less invoice becomes a single
    /// row carrying the total.
    fn expense_lines(&self, project_id: ProjectId, invoice: &EInvoice) -> Vec<DetailLine> {
        if invoice.lines().is_empty() {
            return vec![DetailLine {
                detail_id: Uuid::now_v7(),
                raw_product_id: None,
                direction: Direction::In,
                quantity: Decimal::ONE,
                unit_price: invoice.total_amount(),
                notes: None,
            }];
        }

        invoice
            .lines()
            .iter()
            .map(|line| {
                let raw_product_id = line.article_code.as_deref().and_then(|code| {
                    let resolved = self.catalog.resolve_article(project_id, code);
                    if resolved.is_none() {
                        tracing::warn!(
                            invoice_id = %invoice.id_typed(),
                            line_number = line.line_number,
                            article_code = code,
                            "article code not in raw-product catalog; expense row left unlinked"
                        );
                    }
                    resolved
                });
                DetailLine {
                    detail_id: Uuid::now_v7(),
                    raw_product_id,
                    direction: Direction::In,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    notes: line.description.clone(),
                }
            })
            .collect()
    }
}
