//! Warehouse registry domain: physical warehouses and cost centers.

pub mod warehouse;

pub use warehouse::{
    CreateWarehouse, RemoveWarehouse, SetWarehouseActive, UpdateWarehouse, Warehouse,
    WarehouseActivationChanged, WarehouseCommand, WarehouseCreated, WarehouseDetails,
    WarehouseDetailsPatch, WarehouseEvent, WarehouseRemoved, WarehouseType, WarehouseUpdated,
};
