use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fleet_ai::AutopilotRegistry;
use fleet_core::{ControlMode, OperatorId, SpaceId, Vessel, VesselId};

fn build_fleet(n_vessels: usize) -> Vec<Vessel> {
    let now = chrono::Utc::now();
    (0..n_vessels)
        .map(|i| {
            let mut v = Vessel::new(VesselId::new(format!("v{i}")), SpaceId::from("global"), now);
            match i % 3 {
                0 => v.add_crew(&OperatorId::new(format!("op{i}")), "crew", now),
                1 => v.mode = ControlMode::Player,
                _ => {}
            }
            v
        })
        .collect()
}

fn bench_reconcile(c: &mut Criterion) {
    let now = chrono::Utc::now();
    c.bench_function("autopilot_sync_1000", |b| {
        b.iter_batched(
            || build_fleet(1000),
            |mut fleet| {
                let mut reg = AutopilotRegistry::new();
                for v in fleet.iter_mut() {
                    black_box(reg.sync(v, now));
                }
                reg.len()
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_reconcile);
criterion_main!(benches);
