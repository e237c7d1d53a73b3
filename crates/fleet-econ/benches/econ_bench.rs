use criterion::{criterion_group, criterion_main, Criterion};
use fleet_core::config::default_ports;
use fleet_econ::generation::ListingGenerator;

fn bench_generation(c: &mut Criterion) {
    let ports = default_ports();
    let now = chrono::Utc::now();
    let mut generator = ListingGenerator::new(42);
    c.bench_function("cargo_generation_sweep", |b| {
        b.iter(|| {
            for port in &ports {
                for _ in 0..port.size.cargo_target() {
                    let _ = generator.cargo_lot(port, &ports, now);
                }
                for _ in 0..port.size.passenger_target() {
                    let _ = generator.passenger_contract(port, &ports, now);
                }
            }
        })
    });
}

fn bench_congestion(c: &mut Criterion) {
    let ports = default_ports();
    c.bench_function("port_congestion", |b| {
        b.iter(|| {
            ports
                .iter()
                .enumerate()
                .map(|(i, p)| fleet_econ::port_congestion(p.size, i as u32 * 3, i as u32))
                .sum::<f64>()
        })
    });
}

criterion_group!(benches, bench_generation, bench_congestion);
criterion_main!(benches);
