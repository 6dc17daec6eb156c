use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use invrecon_core::{AggregateRoot, ExpectedVersion, InvoiceId, MovementId, ProjectId, WarehouseId};
use invrecon_invoicing::EInvoice;
use invrecon_stock::{BalanceKey, ProductBalance, StockMovement};
use invrecon_warehouse::Warehouse;

use super::r#trait::{LedgerStore, LedgerTx, MovementFilter, StoreError};

/// The whole ledger, normalized: one map per record kind, keyed by id.
#[derive(Debug, Default)]
struct LedgerState {
    warehouses: HashMap<WarehouseId, Warehouse>,
    movements: BTreeMap<MovementId, StockMovement>,
    balances: BTreeMap<BalanceKey, ProductBalance>,
    invoices: HashMap<InvoiceId, EInvoice>,
    effect_sequence: u64,
}

/// Prior value of one record a transaction overwrote.
enum Undo {
    Warehouse(WarehouseId, Option<Warehouse>),
    Movement(MovementId, Option<StockMovement>),
    Balance(BalanceKey, Option<ProductBalance>),
    Invoice(InvoiceId, Option<EInvoice>),
    EffectSequence(u64),
}

/// In-memory ledger store for tests and single-process deployments.
///
/// A transaction holds the state lock for its whole lifetime, so transactions
/// are serializable. Writes go straight to the shared state and are journaled;
/// a transaction dropped without a successful commit replays the journal
/// backwards, leaving no trace. Reads cost nothing beyond the lock.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
    #[cfg(test)]
    fail_next_commit: Arc<AtomicBool>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail with a transport error.
    #[cfg(test)]
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        let state = self.state.clone().lock_owned().await;
        Ok(Box::new(InMemoryLedgerTx {
            state,
            journal: Vec::new(),
            #[cfg(test)]
            fail_commit: self.fail_next_commit.clone(),
        }))
    }
}

struct InMemoryLedgerTx {
    state: OwnedMutexGuard<LedgerState>,
    journal: Vec<Undo>,
    #[cfg(test)]
    fail_commit: Arc<AtomicBool>,
}

impl InMemoryLedgerTx {
    fn rollback(&mut self) {
        while let Some(undo) = self.journal.pop() {
            let state = &mut *self.state;
            match undo {
                Undo::Warehouse(id, Some(prev)) => {
                    state.warehouses.insert(id, prev);
                }
                Undo::Warehouse(id, None) => {
                    state.warehouses.remove(&id);
                }
                Undo::Movement(id, Some(prev)) => {
                    state.movements.insert(id, prev);
                }
                Undo::Movement(id, None) => {
                    state.movements.remove(&id);
                }
                Undo::Balance(key, Some(prev)) => {
                    state.balances.insert(key, prev);
                }
                Undo::Balance(key, None) => {
                    state.balances.remove(&key);
                }
                Undo::Invoice(id, Some(prev)) => {
                    state.invoices.insert(id, prev);
                }
                Undo::Invoice(id, None) => {
                    state.invoices.remove(&id);
                }
                Undo::EffectSequence(prev) => state.effect_sequence = prev,
            }
        }
    }
}

impl Drop for InMemoryLedgerTx {
    fn drop(&mut self) {
        self.rollback();
    }
}

fn check_version(what: &str, expected: ExpectedVersion, current: u64) -> Result<(), StoreError> {
    if expected.matches(current) {
        Ok(())
    } else {
        Err(StoreError::Concurrency(format!(
            "{what}: expected {expected:?}, found version {current}"
        )))
    }
}

#[async_trait]
impl LedgerTx for InMemoryLedgerTx {
    async fn load_warehouse(&mut self, project_id: ProjectId, id: WarehouseId) -> Result<Option<Warehouse>, StoreError> {
        Ok(self
            .state
            .warehouses
            .get(&id)
            .filter(|w| w.project_id() == Some(project_id))
            .cloned())
    }

    async fn save_warehouse(&mut self, warehouse: &Warehouse, expected: ExpectedVersion) -> Result<(), StoreError> {
        let id = warehouse.id_typed();
        let current = self.state.warehouses.get(&id).map(|w| w.version()).unwrap_or(0);
        check_version(&format!("warehouse {id}"), expected, current)?;
        let previous = self.state.warehouses.insert(id, warehouse.clone());
        self.journal.push(Undo::Warehouse(id, previous));
        Ok(())
    }

    async fn delete_warehouse(&mut self, project_id: ProjectId, id: WarehouseId) -> Result<(), StoreError> {
        match self.state.warehouses.get(&id) {
            Some(w) if w.project_id() == Some(project_id) => {
                let previous = self.state.warehouses.remove(&id);
                self.journal.push(Undo::Warehouse(id, previous));
                Ok(())
            }
            _ => Err(StoreError::NotFound(format!("warehouse {id}"))),
        }
    }

    async fn list_warehouses(&mut self, project_id: ProjectId) -> Result<Vec<Warehouse>, StoreError> {
        let mut out: Vec<Warehouse> = self
            .state
            .warehouses
            .values()
            .filter(|w| w.project_id() == Some(project_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name().cmp(b.name()).then(a.id_typed().cmp(&b.id_typed())));
        Ok(out)
    }

    async fn warehouse_is_referenced(&mut self, project_id: ProjectId, id: WarehouseId) -> Result<bool, StoreError> {
        Ok(self
            .state
            .movements
            .values()
            .filter(|m| m.project_id() == Some(project_id))
            .any(|m| m.referenced_warehouses().any(|w| w == id)))
    }

    async fn load_movement(&mut self, project_id: ProjectId, id: MovementId) -> Result<Option<StockMovement>, StoreError> {
        Ok(self
            .state
            .movements
            .get(&id)
            .filter(|m| m.project_id() == Some(project_id))
            .cloned())
    }

    async fn save_movement(&mut self, movement: &StockMovement, expected: ExpectedVersion) -> Result<(), StoreError> {
        let id = movement.id_typed();
        let current = self.state.movements.get(&id).map(|m| m.version()).unwrap_or(0);
        check_version(&format!("stock movement {id}"), expected, current)?;
        let previous = self.state.movements.insert(id, movement.clone());
        self.journal.push(Undo::Movement(id, previous));
        Ok(())
    }

    async fn delete_movement(&mut self, project_id: ProjectId, id: MovementId) -> Result<(), StoreError> {
        match self.state.movements.get(&id) {
            Some(m) if m.project_id() == Some(project_id) => {
                let previous = self.state.movements.remove(&id);
                self.journal.push(Undo::Movement(id, previous));
                Ok(())
            }
            _ => Err(StoreError::NotFound(format!("stock movement {id}"))),
        }
    }

    async fn list_movements(&mut self, project_id: ProjectId, filter: &MovementFilter) -> Result<Vec<StockMovement>, StoreError> {
        let mut out: Vec<StockMovement> = self
            .state
            .movements
            .values()
            .filter(|m| m.project_id() == Some(project_id) && filter.matches(m))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.movement_date()
                .cmp(&b.movement_date())
                .then(a.id_typed().cmp(&b.id_typed()))
        });
        Ok(out)
    }

    async fn load_balance(&mut self, key: BalanceKey) -> Result<Option<ProductBalance>, StoreError> {
        Ok(self.state.balances.get(&key).cloned())
    }

    async fn save_balance(&mut self, balance: &ProductBalance) -> Result<(), StoreError> {
        let key = balance.key();
        let previous = self.state.balances.insert(key, balance.clone());
        self.journal.push(Undo::Balance(key, previous));
        Ok(())
    }

    async fn list_balances(&mut self, project_id: ProjectId, warehouse_id: Option<WarehouseId>) -> Result<Vec<ProductBalance>, StoreError> {
        Ok(self
            .state
            .balances
            .values()
            .filter(|b| b.project_id == project_id && warehouse_id.is_none_or(|w| b.warehouse_id == w))
            .cloned()
            .collect())
    }

    async fn clear_balances(&mut self, project_id: ProjectId) -> Result<(), StoreError> {
        let keys: Vec<BalanceKey> = self
            .state
            .balances
            .keys()
            .filter(|k| k.project_id == project_id)
            .copied()
            .collect();
        for key in keys {
            let previous = self.state.balances.remove(&key);
            self.journal.push(Undo::Balance(key, previous));
        }
        Ok(())
    }

    async fn load_invoice(&mut self, project_id: ProjectId, id: InvoiceId) -> Result<Option<EInvoice>, StoreError> {
        Ok(self
            .state
            .invoices
            .get(&id)
            .filter(|i| i.project_id() == Some(project_id))
            .cloned())
    }

    async fn save_invoice(&mut self, invoice: &EInvoice, expected: ExpectedVersion) -> Result<(), StoreError> {
        let id = invoice.id_typed();
        let current = self.state.invoices.get(&id).map(|i| i.version()).unwrap_or(0);
        check_version(&format!("invoice {id}"), expected, current)?;
        let previous = self.state.invoices.insert(id, invoice.clone());
        self.journal.push(Undo::Invoice(id, previous));
        Ok(())
    }

    async fn list_invoices(&mut self, project_id: ProjectId) -> Result<Vec<EInvoice>, StoreError> {
        let mut out: Vec<EInvoice> = self
            .state
            .invoices
            .values()
            .filter(|i| i.project_id() == Some(project_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.invoice_date()
                .cmp(&b.invoice_date())
                .then(a.id_typed().cmp(&b.id_typed()))
        });
        Ok(out)
    }

    async fn next_effect_sequence(&mut self) -> Result<u64, StoreError> {
        let previous = self.state.effect_sequence;
        self.state.effect_sequence = previous + 1;
        self.journal.push(Undo::EffectSequence(previous));
        Ok(previous + 1)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        #[cfg(test)]
        if self.fail_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Transport("injected commit failure".to_string()));
        }
        self.journal.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use invrecon_core::Aggregate;
    use invrecon_warehouse::{CreateWarehouse, WarehouseCommand, WarehouseDetails, WarehouseType};

    fn warehouse(project_id: ProjectId) -> Warehouse {
        let id = WarehouseId::new();
        let mut wh = Warehouse::empty(id);
        wh.execute(&WarehouseCommand::Create(CreateWarehouse {
            project_id,
            partner_id: None,
            warehouse_id: id,
            name: "Main".to_string(),
            warehouse_type: WarehouseType::Physical,
            details: WarehouseDetails::default(),
            occurred_at: Utc::now(),
        }))
        .unwrap();
        wh
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let store = InMemoryLedgerStore::new();
        let project = ProjectId::new();
        let wh = warehouse(project);

        let mut tx = store.begin().await.unwrap();
        tx.save_warehouse(&wh, ExpectedVersion::Exact(0)).await.unwrap();
        drop(tx);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.load_warehouse(project, wh.id_typed()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn records_are_invisible_to_other_projects() {
        let store = InMemoryLedgerStore::new();
        let project = ProjectId::new();
        let wh = warehouse(project);

        let mut tx = store.begin().await.unwrap();
        tx.save_warehouse(&wh, ExpectedVersion::Exact(0)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.load_warehouse(project, wh.id_typed()).await.unwrap().is_some());
        assert!(tx.load_warehouse(ProjectId::new(), wh.id_typed()).await.unwrap().is_none());
        assert!(tx.list_warehouses(ProjectId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_transaction_restores_overwritten_and_removed_records() {
        let store = InMemoryLedgerStore::new();
        let project = ProjectId::new();
        let kept = warehouse(project);
        let removed = warehouse(project);

        let mut tx = store.begin().await.unwrap();
        tx.save_warehouse(&kept, ExpectedVersion::Exact(0)).await.unwrap();
        tx.save_warehouse(&removed, ExpectedVersion::Exact(0)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut deactivated = kept.clone();
        deactivated
            .execute(&WarehouseCommand::SetActive(invrecon_warehouse::SetWarehouseActive {
                project_id: project,
                warehouse_id: kept.id_typed(),
                active: false,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        tx.save_warehouse(&deactivated, ExpectedVersion::Exact(kept.version())).await.unwrap();
        tx.delete_warehouse(project, removed.id_typed()).await.unwrap();
        drop(tx);

        let mut tx = store.begin().await.unwrap();
        let restored = tx.load_warehouse(project, kept.id_typed()).await.unwrap().unwrap();
        assert!(restored.is_active());
        assert_eq!(restored.version(), kept.version());
        assert!(tx.load_warehouse(project, removed.id_typed()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn effect_sequence_increases_across_commits_and_rewinds_on_failure() {
        let store = InMemoryLedgerStore::new();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.next_effect_sequence().await.unwrap(), 1);
        assert_eq!(tx.next_effect_sequence().await.unwrap(), 2);
        tx.commit().await.unwrap();

        store.fail_next_commit();
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.next_effect_sequence().await.unwrap(), 3);
        assert!(tx.commit().await.is_err());

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.next_effect_sequence().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn stale_version_is_a_concurrency_error() {
        let store = InMemoryLedgerStore::new();
        let wh = warehouse(ProjectId::new());

        let mut tx = store.begin().await.unwrap();
        tx.save_warehouse(&wh, ExpectedVersion::Exact(0)).await.unwrap();
        assert!(matches!(
            tx.save_warehouse(&wh, ExpectedVersion::Exact(0)).await,
            Err(StoreError::Concurrency(_))
        ));
    }
}
