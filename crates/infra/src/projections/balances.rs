//! Balance projector.
//!
//! Derives `ProductBalance` rows from confirmed stock movements. The projector
//! runs inside the caller's [`LedgerTx`], so a movement and the balances it moves
//! commit together or not at all.
//!
//! Balances can always be thrown away and rebuilt by replaying the confirmed
//! movements of a project in movement-date order.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use invrecon_core::{DomainError, ProjectId, WarehouseId};
use invrecon_stock::{BalanceKey, ProductBalance, StockMovement};

use crate::error::EngineError;
use crate::store::{LedgerTx, MovementFilter};

/// Totals over one warehouse's balances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventorySummary {
    pub warehouse_id: WarehouseId,
    pub product_count: usize,
    pub total_quantity: Decimal,
    pub total_value: Decimal,
}

impl InventorySummary {
    pub fn from_balances(warehouse_id: WarehouseId, balances: &[ProductBalance]) -> Self {
        Self {
            warehouse_id,
            product_count: balances.len(),
            total_quantity: balances.iter().map(|b| b.current_quantity).sum(),
            total_value: balances.iter().map(|b| b.total_value).sum(),
        }
    }
}

/// A stored balance that disagreed with the replayed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceDrift {
    pub key: BalanceKey,
    pub stored: Option<ProductBalance>,
    pub replayed: Option<ProductBalance>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildReport {
    pub project_id: ProjectId,
    pub movements_replayed: usize,
    pub balances: usize,
    pub drifted: Vec<BalanceDrift>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceProjector {
    allow_negative: bool,
}

impl BalanceProjector {
    pub fn new(allow_negative: bool) -> Self {
        Self { allow_negative }
    }

    /// Apply an effective movement's detail rows to the stored balances.
    ///
    /// Returns the balances as written. A movement without balance effect
    /// (draft, cancelled, expense) is a no-op.
    pub async fn apply_movement(
        &self,
        tx: &mut dyn LedgerTx,
        movement: &StockMovement,
    ) -> Result<Vec<ProductBalance>, EngineError> {
        if !movement.is_effective() {
            return Ok(Vec::new());
        }
        let project_id = project_of(movement)?;

        let mut touched: BTreeMap<BalanceKey, ProductBalance> = BTreeMap::new();
        for detail in movement.details() {
            let raw_product_id = detail.raw_product_id.ok_or_else(|| {
                EngineError::Validation(format!("detail {} has no product", detail.id))
            })?;
            let key = BalanceKey {
                project_id,
                warehouse_id: detail.warehouse_id,
                raw_product_id,
            };
            if !touched.contains_key(&key) {
                let current = tx
                    .load_balance(key)
                    .await?
                    .unwrap_or_else(|| ProductBalance::empty(key));
                touched.insert(key, current);
            }
            if let Some(balance) = touched.get_mut(&key) {
                balance.apply_detail(detail, self.allow_negative)?;
            }
        }

        for balance in touched.values() {
            tx.save_balance(balance).await?;
        }
        Ok(touched.into_values().collect())
    }

    /// Recompute every balance of a project from its confirmed movements and
    /// store the result, reporting the balances that had drifted.
    pub async fn rebuild(&self, tx: &mut dyn LedgerTx, project_id: ProjectId) -> Result<RebuildReport, EngineError> {
        let movements = tx.list_movements(project_id, &MovementFilter::default()).await?;
        let replayed = replay(&movements)?;

        let mut stored: BTreeMap<BalanceKey, ProductBalance> = tx
            .list_balances(project_id, None)
            .await?
            .into_iter()
            .map(|b| (b.key(), b))
            .collect();

        let mut drifted = Vec::new();
        for (key, balance) in &replayed {
            match stored.remove(key) {
                Some(existing) if existing == *balance => {}
                existing => drifted.push(BalanceDrift {
                    key: *key,
                    stored: existing,
                    replayed: Some(balance.clone()),
                }),
            }
        }
        for (key, existing) in stored {
            drifted.push(BalanceDrift {
                key,
                stored: Some(existing),
                replayed: None,
            });
        }

        tx.clear_balances(project_id).await?;
        for balance in replayed.values() {
            tx.save_balance(balance).await?;
        }

        Ok(RebuildReport {
            project_id,
            movements_replayed: movements.iter().filter(|m| m.is_effective()).count(),
            balances: replayed.len(),
            drifted,
        })
    }
}

fn project_of(movement: &StockMovement) -> Result<ProjectId, EngineError> {
    movement
        .project_id()
        .ok_or_else(|| EngineError::Validation(format!("movement {} has no project", movement.id_typed())))
}

/// Fold effective movements into balances in the order they took effect.
///
/// History is replayed as recorded, so a balance that went negative under a
/// permissive policy replays without error.
pub fn replay(movements: &[StockMovement]) -> Result<BTreeMap<BalanceKey, ProductBalance>, DomainError> {
    let mut ordered: Vec<&StockMovement> = movements.iter().filter(|m| m.is_effective()).collect();
    // Weighted-average cost does not commute with issues, so the fold must
    // follow the order in which movements took effect, not their business date.
    ordered.sort_by(|a, b| {
        a.effect_sequence()
            .cmp(&b.effect_sequence())
            .then(a.movement_date().cmp(&b.movement_date()))
            .then(a.id_typed().cmp(&b.id_typed()))
    });

    let mut balances: BTreeMap<BalanceKey, ProductBalance> = BTreeMap::new();
    for movement in ordered {
        let Some(project_id) = movement.project_id() else {
            continue;
        };
        for detail in movement.details() {
            let Some(raw_product_id) = detail.raw_product_id else {
                continue;
            };
            let key = BalanceKey {
                project_id,
                warehouse_id: detail.warehouse_id,
                raw_product_id,
            };
            balances
                .entry(key)
                .or_insert_with(|| ProductBalance::empty(key))
                .apply_detail(detail, true)?;
        }
    }
    Ok(balances)
}
