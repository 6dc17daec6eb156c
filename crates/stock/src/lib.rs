//! Stock ledger domain.
//!
//! - [`movement`]: the `StockMovement` aggregate and its detail rows
//! - [`balance`]: per-(warehouse, product) running balance with weighted-average cost
//! - [`check`]: turning counted quantities into inventory adjustments
//! - [`rules`]: which movement types a warehouse accepts

pub mod balance;
pub mod check;
pub mod movement;
pub mod rules;

pub use balance::{BalanceKey, ProductBalance};
pub use check::{Adjustment, CountedLine, adjustments};
pub use rules::{ensure_inbound_type, ensure_outbound_type, ensure_warehouse_accepts};
pub use movement::{
    ChangeMovementStatus, DetailLine, Direction, MovementCommand, MovementEvent, MovementRecorded,
    MovementRemoved, MovementStatus, MovementStatusChanged, MovementType, RecordMovement,
    RemoveMovement, StockMovement, StockMovementDetail,
};
pub use rust_decimal::Decimal;
