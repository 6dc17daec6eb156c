//! Engine tests over the in-memory ledger store.
//!
//! Each test drives the services the way the HTTP layer does:
//! service call → LedgerTx → commit → event bus, and then checks the stored
//! movements, balances and invoice state.

use std::sync::Arc;

use proptest::prelude::*;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use invrecon_core::{InvoiceId, ProjectId, RawProductId, WarehouseId};
use invrecon_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use invrecon_invoicing::{
    CostCenterStatus, EInvoice, InventoryStatus, LineSelection, NewInvoiceLine, PaymentStatus, RawProduct,
};
use invrecon_stock::{CountedLine, Direction, MovementStatus, MovementType, ProductBalance};
use invrecon_warehouse::{WarehouseDetails, WarehouseType};

use crate::catalog::{InMemoryRawProductCatalog, RawProductCatalog};
use crate::engine::{
    LedgerPolicy, MovementLine, NewInventoryCheck, NewInvoice, NewMovement, NewTransfer, NewWarehouse,
    ReconciliationEngine, StockLedger, WarehouseRegistry,
};
use crate::error::EngineError;
use crate::store::{InMemoryLedgerStore, LedgerStore, MovementFilter};

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

struct Harness {
    project: ProjectId,
    store: InMemoryLedgerStore,
    bus: Bus,
    catalog: Arc<InMemoryRawProductCatalog>,
    registry: WarehouseRegistry<Bus>,
    ledger: StockLedger<Bus>,
    engine: ReconciliationEngine<Bus>,
}

fn harness() -> Harness {
    harness_with(LedgerPolicy::default())
}

fn harness_with(policy: LedgerPolicy) -> Harness {
    let store = InMemoryLedgerStore::new();
    let shared: Arc<dyn LedgerStore> = Arc::new(store.clone());
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let catalog = Arc::new(InMemoryRawProductCatalog::new());

    Harness {
        project: ProjectId::new(),
        registry: WarehouseRegistry::new(shared.clone(), bus.clone()),
        ledger: StockLedger::new(shared.clone(), bus.clone(), policy),
        engine: ReconciliationEngine::new(shared, bus.clone(), catalog.clone(), policy),
        store,
        bus,
        catalog,
    }
}

fn dec(units: i64, scale: u32) -> Decimal {
    Decimal::new(units, scale)
}

fn qty(n: i64) -> Decimal {
    Decimal::from(n)
}

impl Harness {
    async fn warehouse(&self, name: &str, warehouse_type: WarehouseType) -> WarehouseId {
        self.registry
            .create(
                self.project,
                NewWarehouse {
                    partner_id: None,
                    name: name.to_string(),
                    warehouse_type,
                    details: WarehouseDetails::default(),
                },
            )
            .await
            .unwrap()
            .id_typed()
    }

    async fn physical(&self, name: &str) -> WarehouseId {
        self.warehouse(name, WarehouseType::Physical).await
    }

    async fn inbound(&self, warehouse: WarehouseId, product: RawProductId, quantity: i64, price: Decimal) {
        self.ledger
            .create_inbound(
                self.project,
                warehouse,
                NewMovement::new(
                    MovementType::Purchase,
                    vec![MovementLine {
                        raw_product_id: product,
                        quantity: qty(quantity),
                        unit_price: price,
                        notes: None,
                    }],
                ),
            )
            .await
            .unwrap();
    }

    async fn outbound(
        &self,
        warehouse: WarehouseId,
        product: RawProductId,
        quantity: i64,
    ) -> Result<invrecon_stock::StockMovement, EngineError> {
        self.ledger
            .create_outbound(
                self.project,
                warehouse,
                NewMovement::new(
                    MovementType::Sale,
                    vec![MovementLine {
                        raw_product_id: product,
                        quantity: qty(quantity),
                        unit_price: Decimal::ZERO,
                        notes: None,
                    }],
                ),
            )
            .await
    }

    async fn balance(&self, warehouse: WarehouseId, product: RawProductId) -> Option<ProductBalance> {
        self.ledger
            .list_balances(self.project, warehouse)
            .await
            .unwrap()
            .into_iter()
            .find(|b| b.raw_product_id == product)
    }

    fn product(&self, code: &str) -> RawProductId {
        self.catalog
            .upsert(RawProduct {
                id: RawProductId::new(),
                project_id: self.project,
                article_code: code.to_string(),
                description: None,
                unit: Some("kg".to_string()),
                purchase_history: Vec::new(),
            })
            .unwrap()
            .id
    }

    async fn invoice(&self, total: Decimal, lines: Vec<NewInvoiceLine>) -> EInvoice {
        self.engine
            .register_invoice(
                self.project,
                NewInvoice {
                    partner_id: None,
                    invoice_number: "INV-2024-001".to_string(),
                    invoice_date: None,
                    total_amount: total,
                    supplier_id: None,
                    lines,
                },
            )
            .await
            .unwrap()
    }

    async fn reload(&self, invoice: InvoiceId) -> EInvoice {
        self.engine.get_invoice(self.project, invoice).await.unwrap()
    }

    fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
        self.bus.subscribe()
    }
}

fn invoice_line(number: u32, code: &str, quantity: i64, price: Decimal) -> NewInvoiceLine {
    NewInvoiceLine {
        line_number: number,
        description: Some(format!("item {code}")),
        article_code: Some(code.to_string()),
        unit: Some("kg".to_string()),
        quantity: qty(quantity),
        unit_price: price,
        total_price: None,
    }
}

#[tokio::test]
async fn weighted_average_and_inventory_check_scenario() {
    let h = harness();
    let wh = h.physical("Main").await;
    let product = RawProductId::new();

    h.inbound(wh, product, 10, dec(200, 2)).await;
    let b = h.balance(wh, product).await.unwrap();
    assert_eq!((b.current_quantity, b.average_unit_cost, b.total_value), (qty(10), qty(2), qty(20)));

    h.inbound(wh, product, 10, dec(400, 2)).await;
    let b = h.balance(wh, product).await.unwrap();
    assert_eq!((b.current_quantity, b.average_unit_cost, b.total_value), (qty(20), qty(3), qty(60)));

    let out = h.outbound(wh, product, 5).await.unwrap();
    assert_eq!(out.details()[0].unit_price, qty(3));
    assert_eq!(out.total_amount(), qty(15));
    let b = h.balance(wh, product).await.unwrap();
    assert_eq!((b.current_quantity, b.average_unit_cost, b.total_value), (qty(15), qty(3), qty(45)));

    let check = h
        .ledger
        .create_inventory_check(
            h.project,
            wh,
            NewInventoryCheck {
                partner_id: None,
                movement_date: None,
                reference: None,
                notes: None,
                lines: vec![CountedLine {
                    raw_product_id: product,
                    expected_qty: qty(15),
                    actual_qty: qty(12),
                    unit_price: qty(3),
                    notes: None,
                }],
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(check.movement_type(), MovementType::Inventory);
    assert_eq!(check.details().len(), 1);
    assert_eq!(check.details()[0].direction, Direction::Out);
    assert_eq!(check.details()[0].quantity, qty(3));

    let b = h.balance(wh, product).await.unwrap();
    assert_eq!((b.current_quantity, b.average_unit_cost, b.total_value), (qty(12), qty(3), qty(36)));
}

#[tokio::test]
async fn inventory_check_without_differences_records_nothing() {
    let h = harness();
    let wh = h.physical("Main").await;
    let product = RawProductId::new();
    h.inbound(wh, product, 4, qty(1)).await;

    let result = h
        .ledger
        .create_inventory_check(
            h.project,
            wh,
            NewInventoryCheck {
                partner_id: None,
                movement_date: None,
                reference: None,
                notes: None,
                lines: vec![CountedLine {
                    raw_product_id: product,
                    expected_qty: qty(4),
                    actual_qty: qty(4),
                    unit_price: qty(1),
                    notes: None,
                }],
            },
        )
        .await
        .unwrap();
    assert!(result.is_none());
    assert_eq!(
        h.ledger.list_movements(h.project, &MovementFilter::default()).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn outbound_below_zero_is_rejected_and_nothing_is_written() {
    let h = harness();
    let wh = h.physical("Main").await;
    let product = RawProductId::new();
    h.inbound(wh, product, 2, qty(5)).await;
    let sub = h.subscribe();

    let err = h.outbound(wh, product, 3).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(ref m) if m.contains("insufficient stock")));

    let b = h.balance(wh, product).await.unwrap();
    assert_eq!(b.current_quantity, qty(2));
    assert_eq!(
        h.ledger.list_movements(h.project, &MovementFilter::default()).await.unwrap().len(),
        1
    );
    assert!(sub.drain().is_empty());
}

#[tokio::test]
async fn negative_balances_follow_policy() {
    let h = harness_with(LedgerPolicy {
        allow_negative_balances: true,
        allow_draft_inbound: true,
    });
    let wh = h.physical("Main").await;
    let product = RawProductId::new();

    h.outbound(wh, product, 3).await.unwrap();
    assert_eq!(h.balance(wh, product).await.unwrap().current_quantity, qty(-3));
}

#[tokio::test]
async fn transfer_moves_value_with_the_goods() {
    let h = harness();
    let source = h.physical("Source").await;
    let target = h.physical("Target").await;
    let product = RawProductId::new();
    h.inbound(source, product, 10, dec(200, 2)).await;
    h.inbound(source, product, 10, dec(400, 2)).await;
    h.inbound(target, product, 5, qty(10)).await;

    let value_before = h.balance(source, product).await.unwrap().total_value
        + h.balance(target, product).await.unwrap().total_value;

    let transfer = h
        .ledger
        .create_transfer(
            h.project,
            NewTransfer {
                source_warehouse_id: source,
                target_warehouse_id: target,
                partner_id: None,
                movement_date: None,
                reference: None,
                notes: None,
                lines: vec![MovementLine {
                    raw_product_id: product,
                    quantity: qty(4),
                    unit_price: qty(99),
                    notes: None,
                }],
            },
        )
        .await
        .unwrap();

    assert_eq!(transfer.outbound.linked_movement_id(), Some(transfer.inbound.id_typed()));
    assert_eq!(transfer.inbound.linked_movement_id(), Some(transfer.outbound.id_typed()));
    assert_eq!(transfer.outbound.reference(), transfer.inbound.reference());
    assert!(transfer.outbound.reference().is_some());
    assert_eq!(transfer.inbound.details()[0].unit_price, qty(3));

    let src = h.balance(source, product).await.unwrap();
    let dst = h.balance(target, product).await.unwrap();
    assert_eq!(src.current_quantity, qty(16));
    assert_eq!(dst.current_quantity, qty(9));
    assert_eq!(src.total_value + dst.total_value, value_before);
}

#[tokio::test]
async fn transfer_to_the_same_warehouse_is_rejected() {
    let h = harness();
    let wh = h.physical("Main").await;
    let product = RawProductId::new();
    h.inbound(wh, product, 1, qty(1)).await;

    let err = h
        .ledger
        .create_transfer(
            h.project,
            NewTransfer {
                source_warehouse_id: wh,
                target_warehouse_id: wh,
                partner_id: None,
                movement_date: None,
                reference: None,
                notes: None,
                lines: vec![MovementLine {
                    raw_product_id: product,
                    quantity: qty(1),
                    unit_price: qty(1),
                    notes: None,
                }],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(h.balance(wh, product).await.unwrap().current_quantity, qty(1));
}

#[tokio::test]
async fn draft_inbound_takes_effect_on_confirmation() {
    let h = harness();
    let wh = h.physical("Main").await;
    let product = RawProductId::new();

    let mut input = NewMovement::new(
        MovementType::Purchase,
        vec![MovementLine {
            raw_product_id: product,
            quantity: qty(6),
            unit_price: qty(2),
            notes: None,
        }],
    );
    input.status = Some(MovementStatus::Draft);
    let draft = h.ledger.create_inbound(h.project, wh, input).await.unwrap();
    assert!(h.balance(wh, product).await.is_none());

    let confirmed = h
        .ledger
        .update_status(h.project, draft.id_typed(), MovementStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(confirmed.status(), MovementStatus::Confirmed);
    assert_eq!(h.balance(wh, product).await.unwrap().total_value, qty(12));

    let err = h
        .ledger
        .update_status(h.project, draft.id_typed(), MovementStatus::Cancelled)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
    assert!(matches!(
        h.ledger.delete_movement(h.project, draft.id_typed()).await,
        Err(EngineError::Conflict(_))
    ));
}

#[tokio::test]
async fn cancelled_draft_can_be_deleted() {
    let h = harness();
    let wh = h.physical("Main").await;
    let mut input = NewMovement::new(
        MovementType::Other,
        vec![MovementLine {
            raw_product_id: RawProductId::new(),
            quantity: qty(1),
            unit_price: qty(1),
            notes: None,
        }],
    );
    input.status = Some(MovementStatus::Draft);
    let draft = h.ledger.create_inbound(h.project, wh, input).await.unwrap();

    h.ledger
        .update_status(h.project, draft.id_typed(), MovementStatus::Cancelled)
        .await
        .unwrap();
    h.ledger.delete_movement(h.project, draft.id_typed()).await.unwrap();
    assert!(matches!(
        h.ledger.get_movement(h.project, draft.id_typed()).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn drafts_are_refused_when_policy_forbids_them() {
    let h = harness_with(LedgerPolicy {
        allow_negative_balances: false,
        allow_draft_inbound: false,
    });
    let wh = h.physical("Main").await;
    let mut input = NewMovement::new(
        MovementType::Purchase,
        vec![MovementLine {
            raw_product_id: RawProductId::new(),
            quantity: qty(1),
            unit_price: qty(1),
            notes: None,
        }],
    );
    input.status = Some(MovementStatus::Draft);
    assert!(matches!(
        h.ledger.create_inbound(h.project, wh, input).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn movement_types_must_match_the_warehouse() {
    let h = harness();
    let cost_center = h.warehouse("Marketing", WarehouseType::CostCenter).await;

    let err = h
        .ledger
        .create_inbound(
            h.project,
            cost_center,
            NewMovement::new(
                MovementType::Purchase,
                vec![MovementLine {
                    raw_product_id: RawProductId::new(),
                    quantity: qty(1),
                    unit_price: qty(1),
                    notes: None,
                }],
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let wh = h.physical("Main").await;
    let err = h
        .ledger
        .create_inbound(h.project, wh, NewMovement::new(MovementType::Sale, Vec::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn inactive_warehouses_take_no_movements() {
    let h = harness();
    let wh = h.physical("Main").await;
    let product = RawProductId::new();
    h.inbound(wh, product, 2, qty(1)).await;
    h.registry.set_active(h.project, wh, false).await.unwrap();

    assert!(matches!(h.outbound(wh, product, 1).await, Err(EngineError::Validation(_))));
    assert_eq!(h.balance(wh, product).await.unwrap().current_quantity, qty(2));
}

#[tokio::test]
async fn referenced_warehouse_cannot_be_deleted() {
    let h = harness();
    let used = h.physical("Used").await;
    let unused = h.physical("Unused").await;
    h.inbound(used, RawProductId::new(), 1, qty(1)).await;

    assert!(matches!(
        h.registry.delete(h.project, used).await,
        Err(EngineError::Conflict(_))
    ));
    h.registry.delete(h.project, unused).await.unwrap();
    assert!(matches!(
        h.registry.get(h.project, unused).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn other_projects_cannot_see_the_ledger() {
    let h = harness();
    let wh = h.physical("Main").await;

    let stranger = ProjectId::new();
    assert!(matches!(h.registry.get(stranger, wh).await, Err(EngineError::NotFound(_))));
    assert!(matches!(
        h.ledger.list_balances(stranger, wh).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(h.registry.list(stranger, false).await.unwrap().is_empty());
}

#[tokio::test]
async fn cost_center_assignment_books_one_expense() {
    let h = harness();
    let cost_center = h.warehouse("Marketing", WarehouseType::CostCenter).await;
    h.product("A-1");
    let invoice = h
        .invoice(
            dec(12345, 2),
            vec![
                invoice_line(1, "A-1", 1, dec(10000, 2)),
                invoice_line(2, "UNKNOWN", 1, dec(2345, 2)),
            ],
        )
        .await;

    let movement = h
        .engine
        .assign_to_cost_center(h.project, invoice.id_typed(), cost_center)
        .await
        .unwrap();
    assert_eq!(movement.movement_type(), MovementType::Expense);
    assert_eq!(movement.total_amount(), dec(12345, 2));
    assert_eq!(movement.warehouse_id(), Some(cost_center));
    assert_eq!(movement.invoice_id(), Some(invoice.id_typed()));
    assert_eq!(movement.details().len(), 2);
    assert!(movement.details()[0].raw_product_id.is_some());
    assert!(movement.details()[1].raw_product_id.is_none());

    let invoice = h.reload(invoice.id_typed()).await;
    assert_eq!(invoice.status().cost_center_status, CostCenterStatus::Assigned);
    assert_eq!(invoice.status().cost_center_id, Some(cost_center));
    assert!(invoice.status().cost_center_assign_date.is_some());
    assert_eq!(invoice.status().inventory_status, InventoryStatus::NotProcessed);
    assert!(invoice.lines().iter().all(|l| !l.processed));
    assert!(h.ledger.list_balances(h.project, cost_center).await.unwrap().is_empty());

    let expenses = h
        .ledger
        .list_movements(
            h.project,
            &MovementFilter {
                invoice_id: Some(invoice.id_typed()),
                ..MovementFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(expenses.len(), 1);

    assert!(matches!(
        h.engine.assign_to_cost_center(h.project, invoice.id_typed(), cost_center).await,
        Err(EngineError::Conflict(_))
    ));
}

#[tokio::test]
async fn invoice_with_an_empty_line_is_refused_at_registration() {
    let h = harness();
    h.product("A-1");
    h.product("A-2");
    let err = h
        .engine
        .register_invoice(
            h.project,
            NewInvoice {
                partner_id: None,
                invoice_number: "INV-2024-002".to_string(),
                invoice_date: None,
                total_amount: qty(20),
                supplier_id: None,
                lines: vec![
                    invoice_line(1, "A-1", 10, qty(2)),
                    invoice_line(2, "A-2", 0, Decimal::ZERO),
                ],
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::Validation("line 2: quantity must be positive".to_string()));
    assert!(h.engine.list_invoices(h.project).await.unwrap().is_empty());
}

#[tokio::test]
async fn line_less_invoice_is_expensed_as_one_row() {
    let h = harness();
    let cost_center = h.warehouse("Admin", WarehouseType::CostCenter).await;
    let invoice = h.invoice(dec(5000, 2), Vec::new()).await;

    let movement = h
        .engine
        .assign_to_cost_center(h.project, invoice.id_typed(), cost_center)
        .await
        .unwrap();
    assert_eq!(movement.details().len(), 1);
    assert_eq!(movement.details()[0].quantity, Decimal::ONE);
    assert_eq!(movement.total_amount(), dec(5000, 2));
}

#[tokio::test]
async fn assigning_to_a_physical_warehouse_is_rejected() {
    let h = harness();
    let wh = h.physical("Main").await;
    let invoice = h.invoice(qty(10), Vec::new()).await;

    assert!(matches!(
        h.engine.assign_to_cost_center(h.project, invoice.id_typed(), wh).await,
        Err(EngineError::Validation(_))
    ));
    let after = h.reload(invoice.id_typed()).await;
    assert_eq!(after, invoice);
}

#[tokio::test]
async fn split_processing_aggregates_status() {
    let h = harness();
    let a = h.physical("A").await;
    let b = h.physical("B").await;
    let flour = h.product("FLOUR");
    let sugar = h.product("SUGAR");
    h.product("SALT");
    let invoice = h
        .invoice(
            qty(40),
            vec![
                invoice_line(1, "FLOUR", 10, qty(2)),
                invoice_line(2, "sugar ", 5, qty(2)),
                invoice_line(3, "SALT", 5, qty(2)),
            ],
        )
        .await;

    let first = h
        .engine
        .process_to_warehouse(h.project, invoice.id_typed(), a, LineSelection::Numbers(vec![1, 2]))
        .await
        .unwrap();
    assert_eq!(first.movement_type(), MovementType::Purchase);
    assert_eq!(first.details().len(), 2);

    let after_first = h.reload(invoice.id_typed()).await;
    assert_eq!(after_first.status().inventory_status, InventoryStatus::PartiallyProcessed);
    assert_eq!(after_first.status().inventory_ids, vec![a]);
    assert_eq!(h.balance(a, flour).await.unwrap().current_quantity, qty(10));
    assert_eq!(h.balance(a, sugar).await.unwrap().current_quantity, qty(5));

    h.engine
        .process_to_warehouse(h.project, invoice.id_typed(), b, LineSelection::AllUnprocessed)
        .await
        .unwrap();
    let done = h.reload(invoice.id_typed()).await;
    assert_eq!(done.status().inventory_status, InventoryStatus::Processed);
    assert_eq!(done.status().inventory_ids, vec![a, b]);
    assert!(done.lines().iter().all(|l| l.processed));
    assert_eq!(done.line(3).unwrap().processed_warehouse_id, Some(b));

    assert!(matches!(
        h.engine
            .process_to_warehouse(h.project, invoice.id_typed(), b, LineSelection::AllUnprocessed)
            .await,
        Err(EngineError::Conflict(_))
    ));
}

#[tokio::test]
async fn overlapping_selection_fails_and_leaves_state_untouched() {
    let h = harness();
    let a = h.physical("A").await;
    let b = h.physical("B").await;
    h.product("X");
    h.product("Y");
    let invoice = h
        .invoice(qty(6), vec![invoice_line(1, "X", 1, qty(3)), invoice_line(2, "Y", 1, qty(3))])
        .await;

    h.engine
        .process_to_warehouse(h.project, invoice.id_typed(), a, LineSelection::Indices(vec![0]))
        .await
        .unwrap();
    let before = h.reload(invoice.id_typed()).await;
    let movements_before = h.ledger.list_movements(h.project, &MovementFilter::default()).await.unwrap();

    let err = h
        .engine
        .process_to_warehouse(h.project, invoice.id_typed(), b, LineSelection::Numbers(vec![1, 2]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
    assert_eq!(h.reload(invoice.id_typed()).await, before);
    assert_eq!(
        h.ledger.list_movements(h.project, &MovementFilter::default()).await.unwrap(),
        movements_before
    );
    assert!(!h.engine.is_processing(invoice.id_typed()));
}

#[tokio::test]
async fn bad_selections_are_validation_errors() {
    let h = harness();
    let wh = h.physical("Main").await;
    h.product("X");
    let invoice = h.invoice(qty(3), vec![invoice_line(1, "X", 1, qty(3))]).await;

    for selection in [
        LineSelection::Numbers(Vec::new()),
        LineSelection::Numbers(vec![7]),
        LineSelection::Indices(vec![1]),
    ] {
        assert!(matches!(
            h.engine
                .process_to_warehouse(h.project, invoice.id_typed(), wh, selection)
                .await,
            Err(EngineError::Validation(_))
        ));
    }
}

#[tokio::test]
async fn unknown_article_code_rejects_the_whole_batch() {
    let h = harness();
    let wh = h.physical("Main").await;
    let known = h.product("KNOWN");
    let invoice = h
        .invoice(
            qty(4),
            vec![invoice_line(1, "KNOWN", 1, qty(2)), invoice_line(2, "MISSING", 1, qty(2))],
        )
        .await;

    let err = h
        .engine
        .process_to_warehouse(h.project, invoice.id_typed(), wh, LineSelection::AllUnprocessed)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(ref m) if m.contains("MISSING")));
    assert!(h.balance(wh, known).await.is_none());
    assert_eq!(h.reload(invoice.id_typed()).await, invoice);
}

#[tokio::test]
async fn processing_into_a_cost_center_is_rejected() {
    let h = harness();
    let cost_center = h.warehouse("Marketing", WarehouseType::CostCenter).await;
    h.product("X");
    let invoice = h.invoice(qty(3), vec![invoice_line(1, "X", 1, qty(3))]).await;

    assert!(matches!(
        h.engine
            .process_to_warehouse(h.project, invoice.id_typed(), cost_center, LineSelection::AllUnprocessed)
            .await,
        Err(EngineError::Validation(_))
    ));
    assert_eq!(h.reload(invoice.id_typed()).await, invoice);
}

#[tokio::test]
async fn invoice_in_flight_is_a_conflict() {
    let h = harness();
    let wh = h.physical("Main").await;
    h.product("X");
    let invoice = h.invoice(qty(3), vec![invoice_line(1, "X", 1, qty(3))]).await;

    let guard = h.engine.in_flight().acquire(invoice.id_typed()).unwrap();
    assert!(h.engine.is_processing(invoice.id_typed()));
    assert!(matches!(
        h.engine
            .process_to_warehouse(h.project, invoice.id_typed(), wh, LineSelection::AllUnprocessed)
            .await,
        Err(EngineError::Conflict(_))
    ));
    drop(guard);

    h.engine
        .process_to_warehouse(h.project, invoice.id_typed(), wh, LineSelection::AllUnprocessed)
        .await
        .unwrap();
    assert!(!h.engine.is_processing(invoice.id_typed()));
}

#[tokio::test]
async fn failed_commit_rolls_back_movement_balance_and_invoice() {
    let h = harness();
    let wh = h.physical("Main").await;
    let product = h.product("X");
    let invoice = h.invoice(qty(3), vec![invoice_line(1, "X", 1, qty(3))]).await;
    let sub = h.subscribe();

    h.store.fail_next_commit();
    let err = h
        .engine
        .process_to_warehouse(h.project, invoice.id_typed(), wh, LineSelection::AllUnprocessed)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Transport(_)));

    assert!(h.balance(wh, product).await.is_none());
    assert!(h.ledger.list_movements(h.project, &MovementFilter::default()).await.unwrap().is_empty());
    assert_eq!(h.reload(invoice.id_typed()).await, invoice);
    assert!(!h.engine.is_processing(invoice.id_typed()));
    assert!(sub.drain().is_empty());

    h.engine
        .process_to_warehouse(h.project, invoice.id_typed(), wh, LineSelection::AllUnprocessed)
        .await
        .unwrap();
    assert_eq!(h.balance(wh, product).await.unwrap().total_value, qty(3));
}

#[tokio::test]
async fn committed_changes_are_published_in_order() {
    let h = harness();
    let sub = h.subscribe();
    let wh = h.physical("Main").await;
    h.product("X");
    let invoice = h.invoice(qty(3), vec![invoice_line(1, "X", 1, qty(3))]).await;
    h.engine
        .process_to_warehouse(h.project, invoice.id_typed(), wh, LineSelection::AllUnprocessed)
        .await
        .unwrap();

    let types: Vec<String> = sub.drain().iter().map(|e| e.event_type().to_string()).collect();
    assert_eq!(
        types,
        vec![
            "warehouse.created",
            "einvoice.registered",
            "stock.movement.recorded",
            "einvoice.lines_processed",
        ]
    );
}

#[tokio::test]
async fn payment_and_raw_product_statuses_advance() {
    let h = harness();
    let invoice = h.invoice(qty(1), Vec::new()).await;

    let paid = h
        .engine
        .update_payment_status(h.project, invoice.id_typed(), PaymentStatus::Paid)
        .await
        .unwrap();
    assert_eq!(paid.status().payment_status, PaymentStatus::Paid);
    assert!(matches!(
        h.engine
            .update_payment_status(h.project, invoice.id_typed(), PaymentStatus::Pending)
            .await,
        Err(EngineError::Conflict(_))
    ));

    assert!(matches!(
        h.engine
            .update_raw_product_status(h.project, invoice.id_typed(), invrecon_invoicing::RawProductStatus::Processed)
            .await,
        Err(EngineError::Conflict(_))
    ));
    h.engine
        .update_raw_product_status(h.project, invoice.id_typed(), invrecon_invoicing::RawProductStatus::Processing)
        .await
        .unwrap();
}

#[tokio::test]
async fn rebuild_matches_live_balances() {
    let h = harness();
    let a = h.physical("A").await;
    let b = h.physical("B").await;
    let product = RawProductId::new();
    h.inbound(a, product, 10, qty(2)).await;
    h.inbound(a, product, 10, qty(4)).await;
    h.outbound(a, product, 5).await.unwrap();
    h.ledger
        .create_transfer(
            h.project,
            NewTransfer {
                source_warehouse_id: a,
                target_warehouse_id: b,
                partner_id: None,
                movement_date: None,
                reference: Some("T-1".to_string()),
                notes: None,
                lines: vec![MovementLine {
                    raw_product_id: product,
                    quantity: qty(5),
                    unit_price: Decimal::ZERO,
                    notes: None,
                }],
            },
        )
        .await
        .unwrap();

    let live_a = h.balance(a, product).await.unwrap();
    let live_b = h.balance(b, product).await.unwrap();
    let report = h.ledger.rebuild_balances(h.project).await.unwrap();
    assert!(report.drifted.is_empty(), "unexpected drift: {:?}", report.drifted);
    assert_eq!(report.balances, 2);
    assert_eq!(report.movements_replayed, 5);
    assert_eq!(h.balance(a, product).await.unwrap(), live_a);
    assert_eq!(h.balance(b, product).await.unwrap(), live_b);

    let summary = h.ledger.inventory_summary(h.project, a).await.unwrap();
    assert_eq!(summary.product_count, 1);
    assert_eq!(summary.total_value, live_a.total_value);
}

#[tokio::test]
async fn rebuild_repairs_a_tampered_balance() {
    let h = harness();
    let wh = h.physical("Main").await;
    let product = RawProductId::new();
    h.inbound(wh, product, 3, qty(2)).await;

    let mut tampered = h.balance(wh, product).await.unwrap();
    tampered.current_quantity = qty(100);
    let mut tx = h.store.begin().await.unwrap();
    tx.save_balance(&tampered).await.unwrap();
    tx.commit().await.unwrap();

    let report = h.ledger.rebuild_balances(h.project).await.unwrap();
    assert_eq!(report.drifted.len(), 1);
    assert_eq!(report.drifted[0].stored.as_ref().map(|b| b.current_quantity), Some(qty(100)));
    assert_eq!(h.balance(wh, product).await.unwrap().current_quantity, qty(3));
}

#[tokio::test]
async fn rebuild_follows_order_of_effect_for_backdated_receipts() {
    let h = harness();
    let wh = h.physical("Main").await;
    let product = RawProductId::new();
    h.inbound(wh, product, 10, qty(2)).await;
    h.outbound(wh, product, 5).await.unwrap();

    let mut backdated = NewMovement::new(
        MovementType::Purchase,
        vec![MovementLine {
            raw_product_id: product,
            quantity: qty(10),
            unit_price: qty(4),
            notes: None,
        }],
    );
    backdated.movement_date = Some(chrono::Utc::now() - chrono::Duration::days(1));
    h.ledger.create_inbound(h.project, wh, backdated).await.unwrap();

    let live = h.balance(wh, product).await.unwrap();
    assert_eq!(live.current_quantity, qty(15));
    assert_eq!(live.total_value, qty(50));

    let report = h.ledger.rebuild_balances(h.project).await.unwrap();
    assert!(report.drifted.is_empty(), "unexpected drift: {:?}", report.drifted);
    assert_eq!(h.balance(wh, product).await.unwrap(), live);

    // Net value of receipts minus issues matches what the balance holds.
    let movements = h.ledger.list_movements(h.project, &MovementFilter::default()).await.unwrap();
    let net: Decimal = movements
        .iter()
        .flat_map(|m| m.details())
        .map(|d| match d.direction {
            Direction::In => d.total_price,
            Direction::Out => -d.total_price,
        })
        .sum();
    assert_eq!(net, qty(50));
}

#[tokio::test]
async fn rebuild_places_a_late_confirmed_draft_at_its_confirmation() {
    let h = harness();
    let wh = h.physical("Main").await;
    let product = RawProductId::new();

    let mut draft = NewMovement::new(
        MovementType::Purchase,
        vec![MovementLine {
            raw_product_id: product,
            quantity: qty(10),
            unit_price: qty(4),
            notes: None,
        }],
    );
    draft.status = Some(MovementStatus::Draft);
    let draft = h.ledger.create_inbound(h.project, wh, draft).await.unwrap();
    assert_eq!(draft.effect_sequence(), None);

    h.inbound(wh, product, 10, qty(2)).await;
    h.outbound(wh, product, 5).await.unwrap();
    let confirmed = h
        .ledger
        .update_status(h.project, draft.id_typed(), MovementStatus::Confirmed)
        .await
        .unwrap();
    assert!(confirmed.effect_sequence().is_some());

    let live = h.balance(wh, product).await.unwrap();
    assert_eq!(live.current_quantity, qty(15));
    assert_eq!(live.total_value, qty(50));

    let report = h.ledger.rebuild_balances(h.project).await.unwrap();
    assert!(report.drifted.is_empty(), "unexpected drift: {:?}", report.drifted);
    assert_eq!(report.movements_replayed, 3);
    assert_eq!(h.balance(wh, product).await.unwrap(), live);
}

fn run<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, ..ProptestConfig::default() })]

    /// Transfers never create or destroy value across the two warehouses.
    #[test]
    fn transfers_preserve_total_value(
        receipts in prop::collection::vec((1i64..50, 1i64..10_000), 1..6),
        moves in prop::collection::vec(1i64..40, 1..6),
    ) {
        run(async {
            let h = harness();
            let a = h.physical("A").await;
            let b = h.physical("B").await;
            let product = RawProductId::new();
            for (quantity, cents) in &receipts {
                h.inbound(a, product, *quantity, Decimal::new(*cents, 2)).await;
            }
            let total = h.balance(a, product).await.unwrap().total_value;

            for (i, quantity) in moves.iter().enumerate() {
                let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
                let _ = h
                    .ledger
                    .create_transfer(
                        h.project,
                        NewTransfer {
                            source_warehouse_id: from,
                            target_warehouse_id: to,
                            partner_id: None,
                            movement_date: None,
                            reference: None,
                            notes: None,
                            lines: vec![MovementLine {
                                raw_product_id: product,
                                quantity: qty(*quantity),
                                unit_price: Decimal::ZERO,
                                notes: None,
                            }],
                        },
                    )
                    .await;

                let value_a = h.balance(a, product).await.map(|x| x.total_value).unwrap_or_default();
                let value_b = h.balance(b, product).await.map(|x| x.total_value).unwrap_or_default();
                assert!((value_a + value_b - total).abs() < Decimal::new(1, 6));
            }
        });
    }
}
