use async_trait::async_trait;
use thiserror::Error;

use invrecon_core::{ExpectedVersion, InvoiceId, MovementId, ProjectId, WarehouseId};
use invrecon_invoicing::EInvoice;
use invrecon_stock::{BalanceKey, MovementStatus, ProductBalance, StockMovement};
use invrecon_warehouse::Warehouse;

/// Storage failure.
///
/// These are infrastructure errors, as opposed to the deterministic domain
/// errors raised by the aggregates.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic version check failed or a concurrent writer got there first.
    #[error("concurrent modification: {0}")]
    Concurrency(String),

    #[error("{0} not found")]
    NotFound(String),

    /// A stored snapshot could not be encoded or decoded.
    #[error("snapshot serialization failed: {0}")]
    Serialization(String),

    /// Database, pool or network failure.
    #[error("storage transport failure: {0}")]
    Transport(String),
}

/// Selection for [`LedgerTx::list_movements`]. Empty filter = every movement of the project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementFilter {
    /// Matches the booking warehouse as well as transfer source/target.
    pub warehouse_id: Option<WarehouseId>,
    pub invoice_id: Option<InvoiceId>,
    pub status: Option<MovementStatus>,
}

impl MovementFilter {
    pub fn matches(&self, movement: &StockMovement) -> bool {
        self.warehouse_id
            .is_none_or(|w| movement.referenced_warehouses().any(|r| r == w))
            && self.invoice_id.is_none_or(|i| movement.invoice_id() == Some(i))
            && self.status.is_none_or(|s| movement.status() == s)
    }
}

/// Transactional ledger storage.
///
/// One call to [`LedgerStore::begin`] opens one unit of work. Everything an
/// operation writes (movements, balances, invoice state) goes through that
/// transaction and becomes visible to other readers only at [`LedgerTx::commit`].
/// Dropping a transaction without committing discards all of its writes.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError>;
}

/// One open unit of work.
///
/// Every lookup is project-scoped: a record of another project reads as absent.
/// Aggregate saves carry the version the writer loaded (`Exact(0)` = insert)
/// and fail with [`StoreError::Concurrency`] when the stored version moved.
#[async_trait]
pub trait LedgerTx: Send {
    async fn load_warehouse(&mut self, project_id: ProjectId, id: WarehouseId) -> Result<Option<Warehouse>, StoreError>;
    async fn save_warehouse(&mut self, warehouse: &Warehouse, expected: ExpectedVersion) -> Result<(), StoreError>;
    async fn delete_warehouse(&mut self, project_id: ProjectId, id: WarehouseId) -> Result<(), StoreError>;
    async fn list_warehouses(&mut self, project_id: ProjectId) -> Result<Vec<Warehouse>, StoreError>;
    /// Whether any movement names the warehouse as its warehouse, source or target.
    async fn warehouse_is_referenced(&mut self, project_id: ProjectId, id: WarehouseId) -> Result<bool, StoreError>;

    async fn load_movement(&mut self, project_id: ProjectId, id: MovementId) -> Result<Option<StockMovement>, StoreError>;
    async fn save_movement(&mut self, movement: &StockMovement, expected: ExpectedVersion) -> Result<(), StoreError>;
    async fn delete_movement(&mut self, project_id: ProjectId, id: MovementId) -> Result<(), StoreError>;
    /// Ordered by movement date, then id.
    async fn list_movements(&mut self, project_id: ProjectId, filter: &MovementFilter) -> Result<Vec<StockMovement>, StoreError>;

    async fn load_balance(&mut self, key: BalanceKey) -> Result<Option<ProductBalance>, StoreError>;
    async fn save_balance(&mut self, balance: &ProductBalance) -> Result<(), StoreError>;
    /// Balances of a project, optionally narrowed to one warehouse.
    async fn list_balances(&mut self, project_id: ProjectId, warehouse_id: Option<WarehouseId>) -> Result<Vec<ProductBalance>, StoreError>;
    async fn clear_balances(&mut self, project_id: ProjectId) -> Result<(), StoreError>;

    async fn load_invoice(&mut self, project_id: ProjectId, id: InvoiceId) -> Result<Option<EInvoice>, StoreError>;
    async fn save_invoice(&mut self, invoice: &EInvoice, expected: ExpectedVersion) -> Result<(), StoreError>;
    async fn list_invoices(&mut self, project_id: ProjectId) -> Result<Vec<EInvoice>, StoreError>;

    /// Next position in the ledger's order of effect. Strictly increasing
    /// across committed transactions; gaps are allowed.
    async fn next_effect_sequence(&mut self) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
