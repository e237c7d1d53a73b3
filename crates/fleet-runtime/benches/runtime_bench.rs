use criterion::{criterion_group, criterion_main, Criterion};
use fleet_core::{Adjustment, EngineConfig, OperatorId, SpaceId};
use fleet_runtime::gateway::parse_request;
use fleet_runtime::{Engine, ManualClock, Request, Session};
use std::sync::Arc;

fn bench_decode(c: &mut Criterion) {
    let line = r#"{"type":"cargo:assign","requestId":"r1","cargoId":"cargo-17","vesselId":"vessel-3"}"#;
    c.bench_function("decode_request", |b| {
        b.iter(|| parse_request(line).unwrap())
    });
}

fn bench_tick(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = rt.block_on(async {
        let pool = persistence::memory_pool().await.unwrap();
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let engine = Engine::new(EngineConfig::default(), pool, clock).unwrap();
        let session = Session::new(OperatorId::from("bench"), "bench", SpaceId::from("global"));
        let session = engine.connect(session).await.unwrap();
        engine
            .adjust(&session.operator_id, Adjustment::credits(10_000, "bench"))
            .await
            .unwrap();
        engine.handle(&session, Request::Create).await.unwrap();
        engine
    });
    c.bench_function("engine_tick", |b| {
        b.iter(|| rt.block_on(engine.tick()).unwrap())
    });
}

criterion_group!(benches, bench_decode, bench_tick);
criterion_main!(benches);
