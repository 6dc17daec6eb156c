//! Running product balance with weighted-average cost.
//!
//! `total_value` is always `current_quantity × average_unit_cost`. Incoming
//! goods re-weight the average; outgoing goods leave at the average, so the
//! value that leaves is exactly what the balance loses.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use invrecon_core::{DomainError, ProjectId, RawProductId, WarehouseId};

use crate::movement::{Direction, StockMovementDetail};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceKey {
    pub project_id: ProjectId,
    pub warehouse_id: WarehouseId,
    pub raw_product_id: RawProductId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductBalance {
    pub project_id: ProjectId,
    pub warehouse_id: WarehouseId,
    pub raw_product_id: RawProductId,
    pub current_quantity: Decimal,
    pub average_unit_cost: Decimal,
    pub total_value: Decimal,
    pub last_movement_date: Option<DateTime<Utc>>,
}

impl ProductBalance {
    pub fn empty(key: BalanceKey) -> Self {
        Self {
            project_id: key.project_id,
            warehouse_id: key.warehouse_id,
            raw_product_id: key.raw_product_id,
            current_quantity: Decimal::ZERO,
            average_unit_cost: Decimal::ZERO,
            total_value: Decimal::ZERO,
            last_movement_date: None,
        }
    }

    pub fn key(&self) -> BalanceKey {
        BalanceKey {
            project_id: self.project_id,
            warehouse_id: self.warehouse_id,
            raw_product_id: self.raw_product_id,
        }
    }

    /// Book incoming goods at `unit_price`.
    ///
    /// On an empty (or negative) balance the incoming price becomes the
    /// average; otherwise the average is re-weighted by quantity.
    pub fn receive(&mut self, quantity: Decimal, unit_price: Decimal, at: DateTime<Utc>) -> Result<(), DomainError> {
        if quantity <= Decimal::ZERO {
            return Err(DomainError::validation("incoming quantity must be positive"));
        }
        if unit_price < Decimal::ZERO {
            return Err(DomainError::validation("unit price cannot be negative"));
        }

        let old_qty = self.current_quantity;
        let new_qty = old_qty
            .checked_add(quantity)
            .ok_or_else(|| overflow("quantity"))?;

        let new_avg = if old_qty <= Decimal::ZERO {
            unit_price
        } else {
            let old_value = old_qty
                .checked_mul(self.average_unit_cost)
                .ok_or_else(|| overflow("value"))?;
            let incoming = quantity.checked_mul(unit_price).ok_or_else(|| overflow("value"))?;
            old_value
                .checked_add(incoming)
                .and_then(|v| v.checked_div(new_qty))
                .ok_or_else(|| overflow("average cost"))?
        };

        self.current_quantity = new_qty;
        self.average_unit_cost = new_avg;
        self.touch(at);
        self.recompute_value()
    }

    /// Book outgoing goods at the current average.
    ///
    /// Fails with Validation when the quantity would drop below zero, unless
    /// `allow_negative` is set.
    pub fn issue(&mut self, quantity: Decimal, at: DateTime<Utc>, allow_negative: bool) -> Result<(), DomainError> {
        if quantity <= Decimal::ZERO {
            return Err(DomainError::validation("outgoing quantity must be positive"));
        }

        let new_qty = self
            .current_quantity
            .checked_sub(quantity)
            .ok_or_else(|| overflow("quantity"))?;
        if new_qty < Decimal::ZERO && !allow_negative {
            return Err(DomainError::validation(format!(
                "insufficient stock for product {} in warehouse {}: available {}, requested {}",
                self.raw_product_id, self.warehouse_id, self.current_quantity, quantity
            )));
        }

        self.current_quantity = new_qty;
        self.touch(at);
        self.recompute_value()
    }

    /// Apply one movement detail row.
    pub fn apply_detail(&mut self, detail: &StockMovementDetail, allow_negative: bool) -> Result<(), DomainError> {
        match detail.direction {
            Direction::In => self.receive(detail.quantity, detail.unit_price, detail.date),
            Direction::Out => self.issue(detail.quantity, detail.date, allow_negative),
        }
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.last_movement_date = Some(match self.last_movement_date {
            Some(prev) if prev > at => prev,
            _ => at,
        });
    }

    fn recompute_value(&mut self) -> Result<(), DomainError> {
        self.total_value = self
            .current_quantity
            .checked_mul(self.average_unit_cost)
            .ok_or_else(|| overflow("value"))?;
        Ok(())
    }
}

fn overflow(what: &str) -> DomainError {
    DomainError::validation(format!("{what} out of range"))
}
