//! Derived state maintained next to the ledger.

pub mod balances;

pub use balances::{BalanceDrift, BalanceProjector, InventorySummary, RebuildReport, replay};
