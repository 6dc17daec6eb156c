use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{Duration, TimeZone, Utc};
use invrecon_core::{Aggregate, MovementId, ProjectId, RawProductId, WarehouseId};
use invrecon_infra::projections::replay;
use invrecon_stock::{
    BalanceKey, Decimal, DetailLine, Direction, MovementCommand, MovementStatus, MovementType, ProductBalance,
    RecordMovement, StockMovement,
};
use uuid::Uuid;

/// Alternating receipts and issues of a handful of products in one warehouse.
fn movement_history(movements: usize, products: &[RawProductId], project_id: ProjectId, warehouse_id: WarehouseId) -> Vec<StockMovement> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).single().unwrap_or_else(Utc::now);
    (0..movements)
        .map(|i| {
            let direction = if i % 3 == 2 { Direction::Out } else { Direction::In };
            let movement_id = MovementId::new();
            let lines = products
                .iter()
                .map(|p| DetailLine {
                    detail_id: Uuid::now_v7(),
                    raw_product_id: Some(*p),
                    direction,
                    quantity: Decimal::from(1 + (i % 7) as i64),
                    unit_price: Decimal::new(150 + (i % 50) as i64, 2),
                    notes: None,
                })
                .collect();
            let mut movement = StockMovement::empty(movement_id);
            movement
                .execute(&MovementCommand::Record(RecordMovement {
                    project_id,
                    partner_id: None,
                    movement_id,
                    movement_type: if direction == Direction::In { MovementType::Purchase } else { MovementType::Sale },
                    status: MovementStatus::Confirmed,
                    warehouse_id,
                    source_warehouse_id: None,
                    target_warehouse_id: None,
                    linked_movement_id: None,
                    movement_date: start + Duration::minutes(i as i64),
                    invoice_id: None,
                    reference: None,
                    notes: None,
                    lines,
                    total_amount: None,
                    effect_sequence: Some(i as u64 + 1),
                    occurred_at: start,
                }))
                .unwrap();
            movement
        })
        .collect()
}

fn bench_balance_arithmetic(c: &mut Criterion) {
    let mut group = c.benchmark_group("product_balance");
    let key = BalanceKey {
        project_id: ProjectId::new(),
        warehouse_id: WarehouseId::new(),
        raw_product_id: RawProductId::new(),
    };
    let at = Utc::now();

    for ops in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(ops as u64));
        group.bench_with_input(BenchmarkId::new("receive_issue", ops), &ops, |b, &ops| {
            b.iter(|| {
                let mut balance = ProductBalance::empty(key);
                for i in 0..ops {
                    if i % 3 == 2 {
                        let _ = balance.issue(Decimal::ONE, at, true);
                    } else {
                        let _ = balance.receive(Decimal::from(2), Decimal::new(199 + (i % 13) as i64, 2), at);
                    }
                }
                black_box(balance)
            });
        });
    }
    group.finish();
}

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("balance_replay");
    let project_id = ProjectId::new();
    let warehouse_id = WarehouseId::new();
    let products: Vec<RawProductId> = (0..10).map(|_| RawProductId::new()).collect();

    for movements in [100usize, 1_000, 5_000] {
        let history = movement_history(movements, &products, project_id, warehouse_id);
        group.throughput(Throughput::Elements(movements as u64));
        group.bench_with_input(BenchmarkId::new("replay", movements), &history, |b, history| {
            b.iter(|| black_box(replay(history).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_balance_arithmetic, bench_replay);
criterion_main!(benches);
