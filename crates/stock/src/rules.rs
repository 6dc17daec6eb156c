//! Which movements a warehouse may take part in.

use invrecon_core::DomainError;
use invrecon_warehouse::{Warehouse, WarehouseType};

use crate::movement::MovementType;

/// Types accepted by a manual inbound movement.
pub const INBOUND_TYPES: [MovementType; 3] =
    [MovementType::Purchase, MovementType::Return, MovementType::Other];

/// Types accepted by a manual outbound movement.
pub const OUTBOUND_TYPES: [MovementType; 4] = [
    MovementType::Sale,
    MovementType::Waste,
    MovementType::InternalUse,
    MovementType::Return,
];

/// Quantity-bearing movements need a physical warehouse; expense movements
/// need a cost center. Inactive warehouses take nothing.
pub fn ensure_warehouse_accepts(warehouse: &Warehouse, movement_type: MovementType) -> Result<(), DomainError> {
    let required = if movement_type.bears_quantities() {
        WarehouseType::Physical
    } else {
        WarehouseType::CostCenter
    };
    if warehouse.warehouse_type() != required {
        return Err(DomainError::validation(format!(
            "{} movements require a {} warehouse, {} is {}",
            movement_type,
            required,
            warehouse.id_typed(),
            warehouse.warehouse_type()
        )));
    }
    warehouse.ensure_active()
}

pub fn ensure_inbound_type(movement_type: MovementType) -> Result<(), DomainError> {
    if INBOUND_TYPES.contains(&movement_type) {
        Ok(())
    } else {
        Err(DomainError::validation(format!(
            "{movement_type} is not an inbound movement type"
        )))
    }
}

pub fn ensure_outbound_type(movement_type: MovementType) -> Result<(), DomainError> {
    if OUTBOUND_TYPES.contains(&movement_type) {
        Ok(())
    } else {
        Err(DomainError::validation(format!(
            "{movement_type} is not an outbound movement type"
        )))
    }
}
