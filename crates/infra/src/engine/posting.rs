//! Movement posting shared by the stock ledger and the reconciliation engine.
//!
//! Everything here runs inside the caller's transaction: the movement row, the
//! balances it moves and the queued events either all commit or all vanish.

use rust_decimal::Decimal;
use uuid::Uuid;

use invrecon_core::{Aggregate, ExpectedVersion, ProjectId, RawProductId, WarehouseId};
use invrecon_invoicing::EInvoice;
use invrecon_stock::{
    BalanceKey, Direction, MovementCommand, RecordMovement, StockMovement, ensure_warehouse_accepts,
};
use invrecon_warehouse::Warehouse;

use crate::error::EngineError;
use crate::projections::BalanceProjector;
use crate::store::LedgerTx;

use super::outbox::Outbox;

pub(crate) const WAREHOUSE: &str = "warehouse";
pub(crate) const MOVEMENT: &str = "stock.movement";
pub(crate) const INVOICE: &str = "einvoice";

pub(crate) async fn load_warehouse(
    tx: &mut dyn LedgerTx,
    project_id: ProjectId,
    warehouse_id: WarehouseId,
) -> Result<Warehouse, EngineError> {
    tx.load_warehouse(project_id, warehouse_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("warehouse {warehouse_id}")))
}

pub(crate) async fn load_movement(
    tx: &mut dyn LedgerTx,
    project_id: ProjectId,
    movement_id: invrecon_core::MovementId,
) -> Result<StockMovement, EngineError> {
    tx.load_movement(project_id, movement_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("stock movement {movement_id}")))
}

pub(crate) async fn load_invoice(
    tx: &mut dyn LedgerTx,
    project_id: ProjectId,
    invoice_id: invrecon_core::InvoiceId,
) -> Result<EInvoice, EngineError> {
    tx.load_invoice(project_id, invoice_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("invoice {invoice_id}")))
}

/// Weighted-average cost of a product in a warehouse; zero when never stocked.
pub(crate) async fn average_cost(
    tx: &mut dyn LedgerTx,
    project_id: ProjectId,
    warehouse_id: WarehouseId,
    raw_product_id: RawProductId,
) -> Result<Decimal, EngineError> {
    let key = BalanceKey {
        project_id,
        warehouse_id,
        raw_product_id,
    };
    Ok(tx
        .load_balance(key)
        .await?
        .map(|b| b.average_unit_cost)
        .unwrap_or(Decimal::ZERO))
}

/// Validate, price, record and project one movement.
///
/// Outgoing lines are re-priced at the warehouse's current average cost, so the
/// value leaving a balance is exactly the value the balance loses.
pub(crate) async fn record_movement(
    tx: &mut dyn LedgerTx,
    projector: &BalanceProjector,
    outbox: &mut Outbox,
    mut cmd: RecordMovement,
) -> Result<StockMovement, EngineError> {
    let warehouse = load_warehouse(tx, cmd.project_id, cmd.warehouse_id).await?;
    ensure_warehouse_accepts(&warehouse, cmd.movement_type)?;

    for line in cmd.lines.iter_mut().filter(|l| l.direction == Direction::Out) {
        if let Some(raw_product_id) = line.raw_product_id {
            line.unit_price = average_cost(tx, cmd.project_id, cmd.warehouse_id, raw_product_id).await?;
        }
    }

    // Taken under the warehouse row lock, so per warehouse the sequence
    // follows the order in which balances were actually moved.
    if cmd.status.is_effective() {
        cmd.effect_sequence = Some(tx.next_effect_sequence().await?);
    }

    let project_id = cmd.project_id;
    let mut movement = StockMovement::empty(cmd.movement_id);
    let events = movement.execute(&MovementCommand::Record(cmd))?;

    projector.apply_movement(tx, &movement).await?;
    tx.save_movement(&movement, ExpectedVersion::Exact(0)).await?;
    outbox.record(project_id, Uuid::from(movement.id_typed()), MOVEMENT, 0, &events)?;
    Ok(movement)
}
