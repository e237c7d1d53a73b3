use chrono::{Duration, Utc};
use fleet_core::{
    Adjustment, CargoStatus, ControlMode, EngineConfig, HullProperties, OperatorId,
    PhysicalState, PortId, Position, SaleType, SpaceId, Vessel, VesselId, VesselStatus,
};
use fleet_runtime::logistics::CargoRequest;
use fleet_runtime::market::SaleTerms;
use fleet_runtime::{Engine, GatewayError, ManualClock, Request, Response, Session};
use proptest::prelude::*;
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::sync::Arc;

async fn start() -> (Arc<Engine>, Arc<ManualClock>, SqlitePool) {
    let pool = persistence::memory_pool().await.unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let engine = Engine::new(EngineConfig::default(), pool.clone(), clock.clone()).unwrap();
    (Arc::new(engine), clock, pool)
}

fn session(op: &str) -> Session {
    Session::new(OperatorId::from(op), op, SpaceId::from("global"))
}

async fn fund(engine: &Engine, op: &str, credits: i64) {
    engine
        .adjust(&OperatorId::from(op), Adjustment::credits(credits, "grant"))
        .await
        .unwrap();
}

async fn buy_vessel(engine: &Engine, s: &Session) -> VesselId {
    match engine.handle(s, Request::Create).await.unwrap() {
        Response::Vessel(v) => v.id,
        other => panic!("unexpected response {other:?}"),
    }
}

fn cargo(port: Option<&str>, vessel: Option<&VesselId>, dest: &str, tons: f64) -> CargoRequest {
    CargoRequest {
        port_id: port.map(PortId::from),
        vessel_id: vessel.cloned(),
        destination_port_id: PortId::from(dest),
        cargo_type: "bulk".into(),
        description: None,
        weight_tons: tons,
        value: 400,
        reward_credits: Some(300),
        liability_rate: Decimal::ZERO,
        expires_at: None,
    }
}

/// Place a vessel in storage before the engine loads its space.
async fn seed_vessel(pool: &SqlitePool, vessel: &Vessel) {
    let mut conn = pool.acquire().await.unwrap();
    persistence::vessels::upsert_vessel(&mut conn, vessel, Utc::now())
        .await
        .unwrap();
}

#[tokio::test]
async fn first_tick_fills_a_small_port() {
    let (engine, clock, _) = start().await;
    let port = PortId::from("island-anchorage");

    let report = engine.tick().await.unwrap();
    assert!(report.cargo_generated.unwrap() > 0);
    let listed = engine.cargo_at_port(&port).await.unwrap();
    assert_eq!(listed.len(), 4);
    assert!(listed.iter().all(|c| c.status == CargoStatus::Listed));
    assert!(listed
        .iter()
        .all(|c| c.destination_port_id.as_ref() != Some(&port)));
    assert_eq!(engine.passengers_at_port(&port).await.unwrap().len(), 2);

    // Not due again yet.
    let again = engine.tick().await.unwrap();
    assert_eq!(again.cargo_generated, None);

    clock.advance(Duration::minutes(5));
    let later = engine.tick().await.unwrap();
    assert_eq!(later.cargo_generated, Some(0));
    assert_eq!(engine.cargo_at_port(&port).await.unwrap().len(), 4);
}

#[tokio::test]
async fn full_hold_rejects_and_keeps_the_listing() {
    let (engine, _, pool) = start().await;
    let now = Utc::now();
    let id = VesselId::from("barge-1");
    let mut barge = Vessel::new(id.clone(), SpaceId::from("global"), now);
    barge.owner_id = Some(OperatorId::from("op"));
    barge.hull = HullProperties {
        mass_kg: 1_666_700.0,
        length_m: 40.0,
    };
    seed_vessel(&pool, &barge).await;

    let s = session("op");
    let hold = engine.hold(&id).await.unwrap();
    assert!((hold.capacity_tons - 50.0).abs() < 0.01);

    engine
        .create_cargo(&s, cargo(None, Some(&id), "bay-delta", 45.0))
        .await
        .unwrap();
    let lot = engine
        .create_cargo(&s, cargo(Some("harbor-alpha"), None, "bay-delta", 10.0))
        .await
        .unwrap();

    let err = engine.assign_cargo(&s, &lot.id, &id).await.unwrap_err();
    assert!(matches!(err, GatewayError::Capacity(_)), "{err}");

    let listed = engine
        .cargo_at_port(&PortId::from("harbor-alpha"))
        .await
        .unwrap();
    let still = listed.iter().find(|c| c.id == lot.id).unwrap();
    assert_eq!(still.status, CargoStatus::Listed);
    assert!((engine.hold(&id).await.unwrap().load_tons - 45.0).abs() < 1e-9);
}

#[tokio::test]
async fn broke_operator_cannot_buy_a_vessel() {
    let (engine, _, _) = start().await;
    let s = session("broke");
    let err = engine.handle(&s, Request::Create).await.unwrap_err();
    assert!(matches!(err, GatewayError::InsufficientCredits { needed: 500 }));
    assert!(engine.list_vessels(&s.space_id).await.unwrap().is_empty());
    assert_eq!(engine.profile(&s.operator_id).await.unwrap().credits, 0);
    assert!(engine
        .recent_transactions(&s.operator_id, 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn arrival_within_radius_pays_the_reward() {
    let (engine, _, _) = start().await;
    let s = session("carrier");
    fund(&engine, "carrier", 1000).await;
    let id = buy_vessel(&engine, &s).await;
    let lot = engine
        .create_cargo(&s, cargo(None, Some(&id), "bay-delta", 5.0))
        .await
        .unwrap();
    assert_eq!(lot.status, CargoStatus::Loaded);
    assert_eq!(engine.profile(&s.operator_id).await.unwrap().credits, 500);

    // 300 m out: not yet.
    let mut state = PhysicalState {
        position: Position::new(2300.0, -1500.0),
        ..PhysicalState::default()
    };
    engine.crew_state_update(&s, &id, state).await.unwrap();
    assert_eq!(engine.detect_deliveries().await.unwrap(), 0);

    state.position = Position::new(2200.0, -1400.0);
    engine.crew_state_update(&s, &id, state).await.unwrap();
    let report = engine.tick().await.unwrap();
    assert_eq!(report.deliveries, 1);
    assert_eq!(engine.profile(&s.operator_id).await.unwrap().credits, 800);

    let hold = engine.hold(&id).await.unwrap();
    assert!(hold.cargo.is_empty());
    // Delivered once only.
    assert_eq!(engine.detect_deliveries().await.unwrap(), 0);
}

#[tokio::test]
async fn auction_below_reserve_does_not_transfer() {
    let (engine, _, _) = start().await;
    let seller = session("seller");
    let buyer = session("buyer");
    fund(&engine, "seller", 600).await;
    fund(&engine, "buyer", 5000).await;
    let id = buy_vessel(&engine, &seller).await;

    let terms = SaleTerms {
        vessel_id: id.clone(),
        sale_type: SaleType::Auction,
        price: 300,
        reserve_price: Some(800),
        ends_at: None,
    };
    let sale = match engine.handle(&seller, Request::SaleCreate(terms)).await.unwrap() {
        Response::Sale(sale) => sale,
        other => panic!("unexpected response {other:?}"),
    };

    let err = engine
        .handle(&buyer, Request::SaleBuy { sale_id: sale.id.clone() })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "reserve_not_met");

    let v = engine.vessel(&id).await.unwrap();
    assert_eq!(v.owner_id, Some(OperatorId::from("seller")));
    assert_eq!(engine.profile(&buyer.operator_id).await.unwrap().credits, 5000);
    assert_eq!(engine.profile(&seller.operator_id).await.unwrap().credits, 100);
    assert_eq!(engine.open_sales().await.unwrap().len(), 1);
}

#[tokio::test]
async fn joining_another_vessel_leaves_the_first() {
    let (engine, _, _) = start().await;
    let s = session("op");
    fund(&engine, "op", 2000).await;
    let a = buy_vessel(&engine, &s).await;
    let b = buy_vessel(&engine, &s).await;

    // Buying B moved the operator aboard it.
    assert!(engine.vessel(&a).await.unwrap().crew.is_empty());

    engine.join(&s, Some(&a)).await.unwrap();
    let joined = engine.join(&s, Some(&b)).await.unwrap();
    assert_eq!(joined.crew_ids, vec![OperatorId::from("op")]);
    assert_eq!(joined.mode, ControlMode::Player);

    let first = engine.vessel(&a).await.unwrap();
    assert!(first.crew.is_empty());
    assert_eq!(first.mode, ControlMode::Ai);
    assert!(first.stations.helm.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_joins_leave_the_operator_on_one_vessel() {
    let (engine, _, _) = start().await;
    let s = session("op");
    fund(&engine, "op", 2000).await;
    let ids = [
        buy_vessel(&engine, &s).await,
        buy_vessel(&engine, &s).await,
        buy_vessel(&engine, &s).await,
    ];
    for _ in 0..10 {
        let joins: Vec<_> = ids[..2]
            .iter()
            .map(|id| {
                let engine = engine.clone();
                let s = s.clone();
                let id = id.clone();
                tokio::spawn(async move { engine.join(&s, Some(&id)).await })
            })
            .collect();
        for j in joins {
            j.await.unwrap().unwrap();
        }
        let mut aboard = Vec::new();
        for id in &ids {
            let v = engine.vessel(id).await.unwrap();
            if v.has_crew(&s.operator_id) {
                aboard.push(id.clone());
            } else {
                assert_eq!(v.mode, ControlMode::Ai);
            }
        }
        assert_eq!(aboard.len(), 1, "aboard {aboard:?}");
        engine.leave(&s).await.unwrap().unwrap();
        assert_eq!(engine.leave(&s).await.unwrap(), None);
    }
}

#[tokio::test]
async fn store_and_activate_round_trip() {
    let (engine, _, _) = start().await;
    let s = session("op");
    fund(&engine, "op", 1000).await;
    let id = buy_vessel(&engine, &s).await;

    let stored = engine.store_vessel(&s, &id).await.unwrap();
    assert_eq!(stored.status, VesselStatus::Stored);
    assert_eq!(stored.storage_port_id, Some(PortId::from("harbor-alpha")));
    assert!(stored.crew_ids.is_empty());
    assert_eq!(stored.mode, ControlMode::Ai);

    let err = engine.join(&s, Some(&id)).await.unwrap_err();
    assert_eq!(err.kind(), "unavailable");

    let active = engine.activate_vessel(&s, &id).await.unwrap();
    assert_eq!(active.status, VesselStatus::Active);
    assert_eq!(active.storage_port_id, None);

    let joined = engine.join(&s, Some(&id)).await.unwrap();
    assert_eq!(joined.crew_ids, vec![OperatorId::from("op")]);
    assert_eq!(joined.mode, ControlMode::Player);
}

#[tokio::test]
async fn crew_and_control_mode_agree_throughout() {
    let (engine, _, _) = start().await;
    fund(&engine, "a", 1000).await;
    let a = session("a");
    let id = buy_vessel(&engine, &a).await;
    let sessions: Vec<Session> = ["b", "c", "d"].into_iter().map(session).collect();
    for s in &sessions {
        let v = engine.join(s, None).await.unwrap();
        assert_eq!(v.id, id);
        assert_eq!(v.mode, ControlMode::Player);
    }
    let err = engine.join(&session("e"), Some(&id)).await.unwrap_err();
    assert_eq!(err.kind(), "capacity");

    for s in sessions.iter().chain([&a]) {
        let left = engine.leave(s).await.unwrap().unwrap();
        let expected = if left.crew_ids.is_empty() {
            ControlMode::Ai
        } else {
            ControlMode::Player
        };
        assert_eq!(left.mode, expected);
    }
    assert_eq!(engine.vessel(&id).await.unwrap().mode, ControlMode::Ai);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn concurrent_assigns_never_overfill(weights in prop::collection::vec(1u32..=8, 2..8)) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();
        let (accepted, load, capacity) = rt.block_on(async {
            let (engine, _, _) = start().await;
            let s = session("op");
            fund(&engine, "op", 1000).await;
            let id = buy_vessel(&engine, &s).await;
            let mut lots = Vec::new();
            for w in &weights {
                let lot = engine
                    .create_cargo(&s, cargo(Some("harbor-alpha"), None, "bay-delta", f64::from(*w)))
                    .await
                    .unwrap();
                lots.push(lot);
            }
            let tasks: Vec<_> = lots
                .into_iter()
                .map(|lot| {
                    let engine = engine.clone();
                    let s = s.clone();
                    let id = id.clone();
                    tokio::spawn(async move {
                        engine
                            .assign_cargo(&s, &lot.id, &id)
                            .await
                            .map(|_| lot.weight_tons)
                    })
                })
                .collect();
            let mut accepted = 0.0;
            for t in tasks {
                match t.await.unwrap() {
                    Ok(tons) => accepted += tons,
                    Err(e) => assert_eq!(e.kind(), "capacity"),
                }
            }
            let hold = engine.hold(&id).await.unwrap();
            (accepted, hold.load_tons, hold.capacity_tons)
        });
        prop_assert!(load <= capacity + 1e-6);
        prop_assert!((accepted - load).abs() < 1e-9);
    }
}
