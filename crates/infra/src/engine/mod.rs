//! Engine services: the operations callers invoke.
//!
//! Each operation is one unit of work:
//!
//! ```text
//! begin ─▶ load aggregates ─▶ decide (aggregate.handle) ─▶ apply
//!       ─▶ write movements + balances + invoice ─▶ commit ─▶ publish events
//! ```
//!
//! Any error before commit drops the transaction, so no partial outcome is ever
//! visible. Events reach the bus only after commit.

pub mod in_flight;
pub mod ledger;
pub mod outbox;
pub(crate) mod posting;
pub mod reconciliation;
pub mod registry;

pub use in_flight::{InFlightGuard, InFlightInvoices};
pub use ledger::{MovementLine, NewInventoryCheck, NewMovement, NewTransfer, StockLedger, TransferMovements};
pub use outbox::Outbox;
pub use reconciliation::{NewInvoice, ReconciliationEngine};
pub use registry::{NewWarehouse, WarehouseRegistry, WarehouseUpdate};

use crate::config::LedgerSettings;

/// Ledger-wide policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerPolicy {
    pub allow_negative_balances: bool,
    pub allow_draft_inbound: bool,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        LedgerSettings::default().into()
    }
}

impl From<LedgerSettings> for LedgerPolicy {
    fn from(value: LedgerSettings) -> Self {
        Self {
            allow_negative_balances: value.allow_negative_balances,
            allow_draft_inbound: value.allow_draft_inbound,
        }
    }
}
