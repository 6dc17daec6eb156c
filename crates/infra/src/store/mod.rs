//! Ledger persistence boundary.
//!
//! The store keeps aggregate snapshots (warehouses, movements, invoices) and the
//! derived product balances. It makes no decisions: aggregates decide, the
//! store only guarantees that one operation's writes land together or not at all.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use r#trait::{LedgerStore, LedgerTx, MovementFilter, StoreError};
