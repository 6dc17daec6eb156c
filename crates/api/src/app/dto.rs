use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use invrecon_core::{InvoiceId, PartnerId, RawProductId, SupplierId, WarehouseId};
use invrecon_infra::engine::{
    MovementLine, NewInventoryCheck, NewInvoice, NewMovement, NewTransfer, NewWarehouse, WarehouseUpdate,
};
use invrecon_infra::store::MovementFilter;
use invrecon_invoicing::{
    LineSelection, NewInvoiceLine, PaymentStatus, PurchaseHistory, RawProductStatus,
};
use invrecon_stock::{CountedLine, MovementStatus, MovementType};
use invrecon_warehouse::{WarehouseDetails, WarehouseDetailsPatch, WarehouseType};

use crate::app::errors::{self, parse_id};

type Rejection = axum::response::Response;

fn parse_opt<T: core::str::FromStr>(raw: Option<&str>, what: &str) -> Result<Option<T>, Rejection> {
    raw.map(|r| parse_id(r, what)).transpose()
}

// -------------------------
// Warehouses
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWarehouseRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub warehouse_type: WarehouseType,
    pub partner_id: Option<String>,
    #[serde(flatten)]
    pub details: WarehouseDetails,
}

impl CreateWarehouseRequest {
    pub fn into_input(self) -> Result<NewWarehouse, Rejection> {
        Ok(NewWarehouse {
            partner_id: parse_opt::<PartnerId>(self.partner_id.as_deref(), "partnerId")?,
            name: self.name,
            warehouse_type: self.warehouse_type,
            details: self.details,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWarehouseRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub warehouse_type: Option<WarehouseType>,
    #[serde(flatten)]
    pub details: WarehouseDetailsPatch,
}

impl From<UpdateWarehouseRequest> for WarehouseUpdate {
    fn from(value: UpdateWarehouseRequest) -> Self {
        Self {
            name: value.name,
            warehouse_type: value.warehouse_type,
            details: value.details,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetActiveRequest {
    pub is_active: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListWarehousesQuery {
    pub active: Option<bool>,
}

// -------------------------
// Stock movements
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementLineRequest {
    pub raw_product_id: String,
    pub quantity: Decimal,
    #[serde(default)]
    pub unit_price: Decimal,
    pub notes: Option<String>,
}

fn movement_lines(products: Vec<MovementLineRequest>) -> Result<Vec<MovementLine>, Rejection> {
    products
        .into_iter()
        .map(|p| {
            Ok(MovementLine {
                raw_product_id: parse_id::<RawProductId>(&p.raw_product_id, "rawProductId")?,
                quantity: p.quantity,
                unit_price: p.unit_price,
                notes: p.notes,
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementRequest {
    pub movement_type: MovementType,
    pub status: Option<MovementStatus>,
    pub movement_date: Option<DateTime<Utc>>,
    pub partner_id: Option<String>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub products: Vec<MovementLineRequest>,
}

impl MovementRequest {
    pub fn into_input(self) -> Result<NewMovement, Rejection> {
        Ok(NewMovement {
            movement_type: self.movement_type,
            status: self.status,
            partner_id: parse_opt::<PartnerId>(self.partner_id.as_deref(), "partnerId")?,
            movement_date: self.movement_date,
            reference: self.reference,
            notes: self.notes,
            lines: movement_lines(self.products)?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub source_warehouse_id: String,
    pub target_warehouse_id: String,
    pub movement_date: Option<DateTime<Utc>>,
    pub partner_id: Option<String>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub products: Vec<MovementLineRequest>,
}

impl TransferRequest {
    pub fn into_input(self) -> Result<NewTransfer, Rejection> {
        Ok(NewTransfer {
            source_warehouse_id: parse_id::<WarehouseId>(&self.source_warehouse_id, "sourceWarehouseId")?,
            target_warehouse_id: parse_id::<WarehouseId>(&self.target_warehouse_id, "targetWarehouseId")?,
            partner_id: parse_opt::<PartnerId>(self.partner_id.as_deref(), "partnerId")?,
            movement_date: self.movement_date,
            reference: self.reference,
            notes: self.notes,
            lines: movement_lines(self.products)?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountedLineRequest {
    pub raw_product_id: String,
    pub expected_qty: Decimal,
    pub actual_qty: Decimal,
    #[serde(default)]
    pub unit_price: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryCheckRequest {
    pub movement_date: Option<DateTime<Utc>>,
    pub partner_id: Option<String>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub products: Vec<CountedLineRequest>,
}

impl InventoryCheckRequest {
    pub fn into_input(self) -> Result<NewInventoryCheck, Rejection> {
        let lines = self
            .products
            .into_iter()
            .map(|p| {
                Ok(CountedLine {
                    raw_product_id: parse_id::<RawProductId>(&p.raw_product_id, "rawProductId")?,
                    expected_qty: p.expected_qty,
                    actual_qty: p.actual_qty,
                    unit_price: p.unit_price,
                    notes: p.notes,
                })
            })
            .collect::<Result<Vec<_>, Rejection>>()?;

        Ok(NewInventoryCheck {
            partner_id: parse_opt::<PartnerId>(self.partner_id.as_deref(), "partnerId")?,
            movement_date: self.movement_date,
            reference: self.reference,
            notes: self.notes,
            lines,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct MovementStatusRequest {
    pub status: MovementStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementQuery {
    pub warehouse_id: Option<String>,
    pub invoice_id: Option<String>,
    pub status: Option<String>,
}

impl MovementQuery {
    pub fn into_filter(self) -> Result<MovementFilter, Rejection> {
        let status = match self.status.as_deref() {
            Some(raw) => Some(raw.parse::<MovementStatus>().map_err(|e| {
                errors::json_error(axum::http::StatusCode::BAD_REQUEST, "validation_error", e.to_string())
            })?),
            None => None,
        };
        Ok(MovementFilter {
            warehouse_id: parse_opt::<WarehouseId>(self.warehouse_id.as_deref(), "warehouseId")?,
            invoice_id: parse_opt::<InvoiceId>(self.invoice_id.as_deref(), "invoiceId")?,
            status,
        })
    }
}

// -------------------------
// Invoices
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceLineRequest {
    pub line_number: u32,
    pub description: Option<String>,
    pub article_code: Option<String>,
    pub unit: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInvoiceRequest {
    pub invoice_number: String,
    pub invoice_date: Option<DateTime<Utc>>,
    pub total_amount: Decimal,
    pub partner_id: Option<String>,
    pub supplier_id: Option<String>,
    #[serde(default)]
    pub invoice_lines: Vec<InvoiceLineRequest>,
}

impl RegisterInvoiceRequest {
    pub fn into_input(self) -> Result<NewInvoice, Rejection> {
        Ok(NewInvoice {
            partner_id: parse_opt::<PartnerId>(self.partner_id.as_deref(), "partnerId")?,
            invoice_number: self.invoice_number,
            invoice_date: self.invoice_date,
            total_amount: self.total_amount,
            supplier_id: parse_opt::<SupplierId>(self.supplier_id.as_deref(), "supplierId")?,
            lines: self
                .invoice_lines
                .into_iter()
                .map(|l| NewInvoiceLine {
                    line_number: l.line_number,
                    description: l.description,
                    article_code: l.article_code,
                    unit: l.unit,
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                    total_price: l.total_price,
                })
                .collect(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignCostCenterRequest {
    pub cost_center_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInvoiceRequest {
    pub warehouse_id: String,
    pub line_numbers: Option<Vec<u32>>,
    /// Zero-based positions in the invoice's line list.
    pub line_indices: Option<Vec<usize>>,
}

impl ProcessInvoiceRequest {
    pub fn selection(&self) -> Result<LineSelection, Rejection> {
        match (&self.line_numbers, &self.line_indices) {
            (Some(_), Some(_)) => Err(errors::json_error(
                axum::http::StatusCode::BAD_REQUEST,
                "validation_error",
                "send either lineNumbers or lineIndices, not both",
            )),
            (Some(numbers), None) => Ok(LineSelection::Numbers(numbers.clone())),
            (None, Some(indices)) => Ok(LineSelection::Indices(indices.clone())),
            (None, None) => Ok(LineSelection::AllUnprocessed),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusRequest {
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProductStatusRequest {
    pub raw_product_status: RawProductStatus,
}

// -------------------------
// Raw products
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProductRequest {
    pub article_code: String,
    pub description: Option<String>,
    pub unit: Option<String>,
    #[serde(default)]
    pub purchase_history: Vec<PurchaseHistory>,
}
