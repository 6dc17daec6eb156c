//! Postgres-backed ledger store.
//!
//! Aggregates are stored as JSONB snapshots next to the columns the queries
//! filter on; balances are plain `NUMERIC` columns. One [`LedgerTx`] is one SQL
//! transaction, and every aggregate row read inside it is locked with
//! `FOR UPDATE` so concurrent writers of the same record queue up.
//!
//! ## Error Mapping
//!
//! | SQLx error | Code | StoreError |
//! |------------|------|------------|
//! | Database (unique violation) | `23505` | `Concurrency` |
//! | Database (serialization failure) | `40001` | `Concurrency` |
//! | Database (other) | any | `Transport` |
//! | PoolClosed / Io / Tls / other | n/a | `Transport` |

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use invrecon_core::{AggregateRoot, ExpectedVersion, InvoiceId, MovementId, ProjectId, RawProductId, WarehouseId};
use invrecon_invoicing::EInvoice;
use invrecon_stock::{BalanceKey, ProductBalance, StockMovement};
use invrecon_warehouse::Warehouse;

use super::r#trait::{LedgerStore, LedgerTx, MovementFilter, StoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_ledger.sql");

#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(Box::new(PostgresLedgerTx { tx }))
    }
}

struct PostgresLedgerTx {
    tx: Transaction<'static, Postgres>,
}

fn to_snapshot<T: Serialize>(what: &str, value: &T) -> Result<JsonValue, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization(format!("{what}: {e}")))
}

fn from_snapshot<T: DeserializeOwned>(row: &PgRow) -> Result<T, StoreError> {
    let data: JsonValue = row
        .try_get("data")
        .map_err(|e| map_sqlx_error("decode snapshot", e))?;
    serde_json::from_value(data).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn version_param(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::Serialization(format!("version {version} out of range")))
}

/// Translate an `UPDATE … WHERE version = $n` outcome.
fn ensure_updated(what: String, expected: ExpectedVersion, rows_affected: u64) -> Result<(), StoreError> {
    if rows_affected == 1 {
        Ok(())
    } else {
        Err(StoreError::Concurrency(format!(
            "{what}: stored version does not match {expected:?}"
        )))
    }
}

fn balance_from_row(row: &PgRow) -> Result<ProductBalance, StoreError> {
    let get = |e: sqlx::Error| map_sqlx_error("decode balance", e);
    Ok(ProductBalance {
        project_id: ProjectId::from_uuid(row.try_get("project_id").map_err(get)?),
        warehouse_id: WarehouseId::from_uuid(row.try_get("warehouse_id").map_err(get)?),
        raw_product_id: RawProductId::from_uuid(row.try_get("raw_product_id").map_err(get)?),
        current_quantity: row.try_get("current_quantity").map_err(get)?,
        average_unit_cost: row.try_get("average_unit_cost").map_err(get)?,
        total_value: row.try_get("total_value").map_err(get)?,
        last_movement_date: row.try_get("last_movement_date").map_err(get)?,
    })
}

#[async_trait]
impl LedgerTx for PostgresLedgerTx {
    async fn load_warehouse(&mut self, project_id: ProjectId, id: WarehouseId) -> Result<Option<Warehouse>, StoreError> {
        let row = sqlx::query("SELECT data FROM warehouses WHERE project_id = $1 AND id = $2 FOR UPDATE")
            .bind(project_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_warehouse", e))?;
        row.as_ref().map(from_snapshot).transpose()
    }

    async fn save_warehouse(&mut self, warehouse: &Warehouse, expected: ExpectedVersion) -> Result<(), StoreError> {
        let id = warehouse.id_typed();
        let project_id = warehouse
            .project_id()
            .ok_or_else(|| StoreError::Serialization(format!("warehouse {id} has no project")))?;
        let data = to_snapshot("warehouse", warehouse)?;
        let version = version_param(warehouse.version())?;

        match expected {
            ExpectedVersion::Exact(0) => {
                sqlx::query(
                    r#"
                    INSERT INTO warehouses (id, project_id, version, warehouse_type, is_active, data)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(id.as_uuid())
                .bind(project_id.as_uuid())
                .bind(version)
                .bind(warehouse.warehouse_type().as_str())
                .bind(warehouse.is_active())
                .bind(data)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("insert_warehouse", e))?;
                Ok(())
            }
            ExpectedVersion::Exact(v) => {
                let result = sqlx::query(
                    r#"
                    UPDATE warehouses
                    SET version = $3, is_active = $4, data = $5
                    WHERE project_id = $1 AND id = $2 AND version = $6
                    "#,
                )
                .bind(project_id.as_uuid())
                .bind(id.as_uuid())
                .bind(version)
                .bind(warehouse.is_active())
                .bind(data)
                .bind(version_param(v)?)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("update_warehouse", e))?;
                ensure_updated(format!("warehouse {id}"), expected, result.rows_affected())
            }
            ExpectedVersion::Any => {
                sqlx::query(
                    r#"
                    INSERT INTO warehouses (id, project_id, version, warehouse_type, is_active, data)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (id) DO UPDATE
                    SET version = EXCLUDED.version, is_active = EXCLUDED.is_active, data = EXCLUDED.data
                    "#,
                )
                .bind(id.as_uuid())
                .bind(project_id.as_uuid())
                .bind(version)
                .bind(warehouse.warehouse_type().as_str())
                .bind(warehouse.is_active())
                .bind(data)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("upsert_warehouse", e))?;
                Ok(())
            }
        }
    }

    async fn delete_warehouse(&mut self, project_id: ProjectId, id: WarehouseId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM warehouses WHERE project_id = $1 AND id = $2")
            .bind(project_id.as_uuid())
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_warehouse", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("warehouse {id}")));
        }
        Ok(())
    }

    async fn list_warehouses(&mut self, project_id: ProjectId) -> Result<Vec<Warehouse>, StoreError> {
        let rows = sqlx::query(
            "SELECT data FROM warehouses WHERE project_id = $1 ORDER BY data->>'name', id",
        )
        .bind(project_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_warehouses", e))?;
        rows.iter().map(from_snapshot).collect()
    }

    async fn warehouse_is_referenced(&mut self, project_id: ProjectId, id: WarehouseId) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM stock_movements
                WHERE project_id = $1
                  AND (warehouse_id = $2 OR source_warehouse_id = $2 OR target_warehouse_id = $2)
            ) AS referenced
            "#,
        )
        .bind(project_id.as_uuid())
        .bind(id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("warehouse_is_referenced", e))?;
        row.try_get("referenced")
            .map_err(|e| map_sqlx_error("warehouse_is_referenced", e))
    }

    async fn load_movement(&mut self, project_id: ProjectId, id: MovementId) -> Result<Option<StockMovement>, StoreError> {
        let row = sqlx::query("SELECT data FROM stock_movements WHERE project_id = $1 AND id = $2 FOR UPDATE")
            .bind(project_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_movement", e))?;
        row.as_ref().map(from_snapshot).transpose()
    }

    async fn save_movement(&mut self, movement: &StockMovement, expected: ExpectedVersion) -> Result<(), StoreError> {
        let id = movement.id_typed();
        let project_id = movement
            .project_id()
            .ok_or_else(|| StoreError::Serialization(format!("stock movement {id} has no project")))?;
        let data = to_snapshot("stock movement", movement)?;
        let version = version_param(movement.version())?;

        if expected == ExpectedVersion::Exact(0) {
            sqlx::query(
                r#"
                INSERT INTO stock_movements (
                    id, project_id, version, movement_type, status,
                    warehouse_id, source_warehouse_id, target_warehouse_id,
                    invoice_id, movement_date, data
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(id.as_uuid())
            .bind(project_id.as_uuid())
            .bind(version)
            .bind(movement.movement_type().as_str())
            .bind(movement.status().as_str())
            .bind(movement.warehouse_id().map(Uuid::from))
            .bind(movement.source_warehouse_id().map(Uuid::from))
            .bind(movement.target_warehouse_id().map(Uuid::from))
            .bind(movement.invoice_id().map(Uuid::from))
            .bind(movement.movement_date())
            .bind(data)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_movement", e))?;
            return Ok(());
        }

        let result = sqlx::query(
            r#"
            UPDATE stock_movements
            SET version = $3, status = $4, data = $5
            WHERE project_id = $1 AND id = $2 AND ($6::BIGINT IS NULL OR version = $6)
            "#,
        )
        .bind(project_id.as_uuid())
        .bind(id.as_uuid())
        .bind(version)
        .bind(movement.status().as_str())
        .bind(data)
        .bind(match expected {
            ExpectedVersion::Exact(v) => Some(version_param(v)?),
            ExpectedVersion::Any => None,
        })
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_movement", e))?;
        ensure_updated(format!("stock movement {id}"), expected, result.rows_affected())
    }

    async fn delete_movement(&mut self, project_id: ProjectId, id: MovementId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM stock_movements WHERE project_id = $1 AND id = $2")
            .bind(project_id.as_uuid())
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_movement", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("stock movement {id}")));
        }
        Ok(())
    }

    async fn list_movements(&mut self, project_id: ProjectId, filter: &MovementFilter) -> Result<Vec<StockMovement>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM stock_movements
            WHERE project_id = $1
              AND ($2::UUID IS NULL OR warehouse_id = $2 OR source_warehouse_id = $2 OR target_warehouse_id = $2)
              AND ($3::UUID IS NULL OR invoice_id = $3)
              AND ($4::TEXT IS NULL OR status = $4)
            ORDER BY movement_date ASC, id ASC
            "#,
        )
        .bind(project_id.as_uuid())
        .bind(filter.warehouse_id.map(Uuid::from))
        .bind(filter.invoice_id.map(Uuid::from))
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_movements", e))?;
        rows.iter().map(from_snapshot).collect()
    }

    async fn load_balance(&mut self, key: BalanceKey) -> Result<Option<ProductBalance>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT project_id, warehouse_id, raw_product_id, current_quantity,
                   average_unit_cost, total_value, last_movement_date
            FROM product_balances
            WHERE project_id = $1 AND warehouse_id = $2 AND raw_product_id = $3
            FOR UPDATE
            "#,
        )
        .bind(key.project_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .bind(key.raw_product_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_balance", e))?;
        row.as_ref().map(balance_from_row).transpose()
    }

    async fn save_balance(&mut self, balance: &ProductBalance) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO product_balances (
                project_id, warehouse_id, raw_product_id,
                current_quantity, average_unit_cost, total_value, last_movement_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (project_id, warehouse_id, raw_product_id) DO UPDATE
            SET current_quantity = EXCLUDED.current_quantity,
                average_unit_cost = EXCLUDED.average_unit_cost,
                total_value = EXCLUDED.total_value,
                last_movement_date = EXCLUDED.last_movement_date
            "#,
        )
        .bind(balance.project_id.as_uuid())
        .bind(balance.warehouse_id.as_uuid())
        .bind(balance.raw_product_id.as_uuid())
        .bind(balance.current_quantity)
        .bind(balance.average_unit_cost)
        .bind(balance.total_value)
        .bind(balance.last_movement_date)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_balance", e))?;
        Ok(())
    }

    async fn list_balances(&mut self, project_id: ProjectId, warehouse_id: Option<WarehouseId>) -> Result<Vec<ProductBalance>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT project_id, warehouse_id, raw_product_id, current_quantity,
                   average_unit_cost, total_value, last_movement_date
            FROM product_balances
            WHERE project_id = $1 AND ($2::UUID IS NULL OR warehouse_id = $2)
            ORDER BY warehouse_id, raw_product_id
            "#,
        )
        .bind(project_id.as_uuid())
        .bind(warehouse_id.map(Uuid::from))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_balances", e))?;
        rows.iter().map(balance_from_row).collect()
    }

    async fn clear_balances(&mut self, project_id: ProjectId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM product_balances WHERE project_id = $1")
            .bind(project_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("clear_balances", e))?;
        Ok(())
    }

    async fn load_invoice(&mut self, project_id: ProjectId, id: InvoiceId) -> Result<Option<EInvoice>, StoreError> {
        let row = sqlx::query("SELECT data FROM einvoices WHERE project_id = $1 AND id = $2 FOR UPDATE")
            .bind(project_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_invoice", e))?;
        row.as_ref().map(from_snapshot).transpose()
    }

    async fn save_invoice(&mut self, invoice: &EInvoice, expected: ExpectedVersion) -> Result<(), StoreError> {
        let id = invoice.id_typed();
        let project_id = invoice
            .project_id()
            .ok_or_else(|| StoreError::Serialization(format!("invoice {id} has no project")))?;
        let data = to_snapshot("invoice", invoice)?;
        let version = version_param(invoice.version())?;

        if expected == ExpectedVersion::Exact(0) {
            sqlx::query(
                r#"
                INSERT INTO einvoices (id, project_id, version, invoice_number, invoice_date, data)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(id.as_uuid())
            .bind(project_id.as_uuid())
            .bind(version)
            .bind(invoice.invoice_number())
            .bind(invoice.invoice_date())
            .bind(data)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_invoice", e))?;
            return Ok(());
        }

        let result = sqlx::query(
            r#"
            UPDATE einvoices
            SET version = $3, data = $4
            WHERE project_id = $1 AND id = $2 AND ($5::BIGINT IS NULL OR version = $5)
            "#,
        )
        .bind(project_id.as_uuid())
        .bind(id.as_uuid())
        .bind(version)
        .bind(data)
        .bind(match expected {
            ExpectedVersion::Exact(v) => Some(version_param(v)?),
            ExpectedVersion::Any => None,
        })
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_invoice", e))?;
        ensure_updated(format!("invoice {id}"), expected, result.rows_affected())
    }

    async fn list_invoices(&mut self, project_id: ProjectId) -> Result<Vec<EInvoice>, StoreError> {
        let rows = sqlx::query(
            "SELECT data FROM einvoices WHERE project_id = $1 ORDER BY invoice_date ASC, id ASC",
        )
        .bind(project_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_invoices", e))?;
        rows.iter().map(from_snapshot).collect()
    }

    async fn next_effect_sequence(&mut self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT nextval('stock_movement_effect_seq') AS seq")
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("next_effect_sequence", e))?;
        let seq: i64 = row
            .try_get("seq")
            .map_err(|e| map_sqlx_error("next_effect_sequence", e))?;
        u64::try_from(seq).map_err(|_| StoreError::Serialization(format!("effect sequence {seq} out of range")))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") => StoreError::Concurrency(msg),
                _ => StoreError::Transport(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Transport(format!("connection pool closed in {operation}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("decode error in {operation}: {err}"))
        }
        _ => StoreError::Transport(format!("sqlx error in {operation}: {err}")),
    }
}
