//! Running costs: fuel and upkeep, crew wages, port fees and cargo liability.
//!
//! Charges accrue per vessel from the last time it was billed. A vessel is
//! only stamped the first time the sweep sees it, so nothing is back-billed
//! across a restart. Laid-up vessels cost nothing.

use crate::ledger::Touched;
use crate::{Engine, Result};
use chrono::{DateTime, Utc};
use fleet_core::{Adjustment, CargoLot, CargoStatus, OperatorId, PortId, VesselId, VesselStatus};
use fleet_econ::{
    billable_operating_cost, cargo_liability, classify_op_state, crew_wage, operating_cost, OpState,
};
use persistence::{ledger, logistics};
use serde_json::json;
use std::collections::HashMap;
use std::sync::PoisonError;
use tracing::debug;

/// When a vessel was last billed and the port it was in at the time.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ChargeMark {
    at: DateTime<Utc>,
    port: Option<PortId>,
}

pub(crate) type ChargeMarks = HashMap<VesselId, ChargeMark>;

/// Work done by one running-cost sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OperatingSweep {
    pub charged: usize,
    pub port_fees: usize,
    pub wages: usize,
    pub liabilities: usize,
}

/// What the sweep needs from a vessel, read under its lock.
struct Snapshot {
    id: VesselId,
    payer: Option<OperatorId>,
    stored: bool,
    state: OpState,
    throttle: f64,
    port: Option<PortId>,
    crew: Vec<OperatorId>,
}

impl Engine {
    /// Bill every loaded vessel's running costs since it was last billed.
    pub(crate) async fn operating_sweep(&self, now: DateTime<Utc>) -> Result<OperatingSweep> {
        let mut report = OperatingSweep::default();
        for (_, handle) in self.registry.all_handles() {
            let snap = {
                let v = handle.lock().await;
                Snapshot {
                    id: v.id.clone(),
                    payer: v.billing_operator().cloned(),
                    stored: v.status == VesselStatus::Stored,
                    state: classify_op_state(v.physical.velocity.speed(), v.controls.throttle),
                    throttle: v.controls.throttle,
                    port: self.port_at(&v.physical.position).map(|p| p.id.clone()),
                    crew: v.crew.keys().cloned().collect(),
                }
            };
            let Some(intervals) = self.due_intervals(&snap, now) else {
                continue;
            };
            let Some(payer) = snap.payer.clone() else {
                continue;
            };
            self.charge_running_costs(&snap, &payer, intervals, now, &mut report)
                .await?;
        }
        Ok(report)
    }

    /// Charge intervals elapsed since the vessel was last billed, or `None`
    /// when nothing is owed yet. Restamps the mark whenever it returns `Some`.
    fn due_intervals(&self, snap: &Snapshot, now: DateTime<Utc>) -> Option<(f64, bool)> {
        let mut marks = self.charge_marks.lock().unwrap_or_else(PoisonError::into_inner);
        let fresh = ChargeMark {
            at: now,
            port: snap.port.clone(),
        };
        let Some(mark) = marks.get(&snap.id) else {
            marks.insert(snap.id.clone(), fresh);
            return None;
        };
        if snap.stored || snap.payer.is_none() {
            marks.insert(snap.id.clone(), fresh);
            return None;
        }
        let interval_ms = i64::try_from(self.cfg.charge_interval_secs)
            .unwrap_or(i64::MAX / 1000)
            .saturating_mul(1000);
        let elapsed_ms = (now - mark.at).num_milliseconds();
        if elapsed_ms < interval_ms {
            return None;
        }
        let arrived = snap.port.is_some() && snap.port != mark.port;
        marks.insert(snap.id.clone(), fresh);
        Some((elapsed_ms as f64 / interval_ms as f64, arrived))
    }

    async fn charge_running_costs(
        &self,
        snap: &Snapshot,
        payer: &OperatorId,
        (intervals, arrived): (f64, bool),
        now: DateTime<Utc>,
        report: &mut OperatingSweep,
    ) -> Result<()> {
        let cfg = &self.cfg;
        let cost = operating_cost(snap.state, snap.throttle, intervals, cfg);
        let wage = crew_wage(intervals, cfg);
        let mut touched: Touched = Vec::new();

        let mut tx = self.pool.begin().await?;
        let available = ledger::get_profile(&mut tx, payer).await?.credits;
        let billed = billable_operating_cost(cost, available);
        if billed > 0 {
            let adj = Adjustment::credits(-billed, "operating_cost")
                .with_vessel(&snap.id)
                .with_meta(json!({
                    "opState": snap.state,
                    "throttle": snap.throttle,
                    "intervals": intervals,
                }));
            touched.push((payer.clone(), ledger::adjust(&mut tx, payer, &adj, now).await?));
            report.charged += 1;
        }
        if let (true, Some(port)) = (arrived, &snap.port) {
            if cfg.port_fee > 0 {
                let adj = Adjustment::credits(-cfg.port_fee, "port_fee")
                    .with_vessel(&snap.id)
                    .with_meta(json!({ "portId": port.as_str() }));
                touched.push((payer.clone(), ledger::adjust(&mut tx, payer, &adj, now).await?));
                report.port_fees += 1;
            }
        }
        if wage > 0 {
            for member in snap.crew.iter().filter(|m| *m != payer) {
                let meta = json!({ "crewId": member.as_str() });
                let debit = Adjustment::credits(-wage, "crew_wage")
                    .with_vessel(&snap.id)
                    .with_meta(meta.clone());
                let credit = Adjustment::credits(wage, "crew_wage")
                    .with_vessel(&snap.id)
                    .with_meta(meta);
                touched.push((payer.clone(), ledger::adjust(&mut tx, payer, &debit, now).await?));
                touched.push((member.clone(), ledger::adjust(&mut tx, member, &credit, now).await?));
                report.wages += 1;
            }
        }
        let aboard: Vec<CargoLot> = logistics::list_cargo_on_vessel(&mut tx, &snap.id).await?;
        for lot in aboard.iter().filter(|l| l.status == CargoStatus::Loaded) {
            let Some(owner) = &lot.owner_id else {
                continue;
            };
            let charge = cargo_liability(lot.value, lot.liability_rate, intervals);
            if charge <= 0 {
                continue;
            }
            let adj = Adjustment::credits(-charge, "cargo_liability")
                .with_vessel(&snap.id)
                .with_meta(json!({ "cargoId": lot.id }));
            touched.push((owner.clone(), ledger::adjust(&mut tx, owner, &adj, now).await?));
            report.liabilities += 1;
        }
        tx.commit().await?;
        if !touched.is_empty() {
            debug!(vessel_id = %snap.id, operator_id = %payer, intervals, "running costs charged");
        }
        self.publish_profiles(touched);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use chrono::Duration;
    use fleet_core::{PhysicalState, Position, SpaceId, Vessel, Velocity};
    use rust_decimal::Decimal;

    async fn credits(engine: &Engine, op: &str) -> i64 {
        engine.profile(&OperatorId::from(op)).await.unwrap().credits
    }

    /// Persist and load a vessel so the sweep can see it.
    async fn afloat(engine: &Engine, v: Vessel) -> VesselId {
        let now = engine.now();
        let id = v.id.clone();
        engine.persist(&v, now).await.unwrap();
        engine.vessel(&id).await.unwrap();
        id
    }

    fn vessel(id: &str, owner: &str, at: Position) -> Vessel {
        let mut v = Vessel::new(VesselId::from(id), SpaceId::from("global"), Utc::now());
        v.owner_id = Some(OperatorId::from(owner));
        v.physical.position = at;
        v
    }

    #[tokio::test]
    async fn first_sight_stamps_then_idle_costs_accrue() {
        let (engine, clock) = engine().await;
        afloat(&engine, vessel("v1", "owner", Position::new(0.0, 0.0))).await;
        grant(&engine, "owner", 1000).await;

        let first = engine.operating_sweep(engine.now()).await.unwrap();
        assert_eq!(first, OperatingSweep::default());
        clock.advance(Duration::seconds(5));
        let early = engine.operating_sweep(engine.now()).await.unwrap();
        assert_eq!(early, OperatingSweep::default());

        clock.advance(Duration::seconds(55));
        let report = engine.operating_sweep(engine.now()).await.unwrap();
        // Idle for six intervals: 4 × 6 × 0.1, no fee for a vessel that started in port.
        assert_eq!(report, OperatingSweep { charged: 1, ..OperatingSweep::default() });
        assert_eq!(credits(&engine, "owner").await, 998);
    }

    #[tokio::test]
    async fn charterer_pays_fuel_wages_and_port_fees() {
        let (engine, clock) = engine().await;
        let now = engine.now();
        let mut v = vessel("v1", "owner", Position::new(1000.0, 1000.0));
        v.status = VesselStatus::Chartered;
        v.charterer_id = Some(OperatorId::from("charter"));
        v.add_crew(&OperatorId::from("charter"), "charter", now);
        v.add_crew(&OperatorId::from("deck"), "deck", now);
        v.controls.throttle = 1.0;
        v.physical.velocity = Velocity {
            surge: 5.0,
            ..Velocity::default()
        };
        let id = afloat(&engine, v).await;
        grant(&engine, "charter", 1000).await;
        engine.operating_sweep(engine.now()).await.unwrap();

        clock.advance(Duration::minutes(1));
        let report = engine.operating_sweep(engine.now()).await.unwrap();
        assert_eq!(report, OperatingSweep { charged: 1, wages: 1, ..OperatingSweep::default() });
        assert_eq!(credits(&engine, "charter").await, 1000 - 144 - 36);
        assert_eq!(credits(&engine, "deck").await, 36);
        assert_eq!(credits(&engine, "owner").await, 0);

        let berth = PhysicalState {
            position: Position::new(2000.0, -1500.0),
            ..PhysicalState::default()
        };
        engine
            .crew_state_update(&session("charter"), &id, berth)
            .await
            .unwrap();
        clock.advance(Duration::minutes(1));
        let report = engine.operating_sweep(engine.now()).await.unwrap();
        assert_eq!(report.port_fees, 1);
        assert_eq!(credits(&engine, "charter").await, 820 - 144 - 120 - 36);

        // Still in the same port: no second fee.
        clock.advance(Duration::minutes(1));
        let report = engine.operating_sweep(engine.now()).await.unwrap();
        assert_eq!(report.port_fees, 0);
    }

    #[tokio::test]
    async fn fuel_is_capped_at_the_balance() {
        let (engine, clock) = engine().await;
        let mut v = vessel("v1", "owner", Position::new(1000.0, 1000.0));
        v.add_crew(&OperatorId::from("owner"), "owner", engine.now());
        v.controls.throttle = 1.0;
        afloat(&engine, v).await;
        grant(&engine, "owner", 50).await;
        engine.operating_sweep(engine.now()).await.unwrap();
        clock.advance(Duration::minutes(1));
        engine.operating_sweep(engine.now()).await.unwrap();
        assert_eq!(credits(&engine, "owner").await, 0);
    }

    #[tokio::test]
    async fn loaded_cargo_costs_its_owner_liability() {
        let (engine, clock) = engine().await;
        let id = afloat(&engine, vessel("v1", "owner", Position::new(1000.0, 1000.0))).await;
        let lot = CargoLot {
            id: "c1".into(),
            port_id: None,
            origin_port_id: None,
            destination_port_id: Some(PortId::from("bay-delta")),
            owner_id: Some(OperatorId::from("shipper")),
            carrier_id: Some(OperatorId::from("owner")),
            vessel_id: Some(id.clone()),
            cargo_type: "bulk".into(),
            description: None,
            weight_tons: 5.0,
            value: 400,
            reward_credits: 460,
            liability_rate: Decimal::new(1, 2),
            status: CargoStatus::Loaded,
            ready_at: None,
            expires_at: None,
        };
        {
            let mut conn = engine.pool().acquire().await.unwrap();
            logistics::insert_cargo(&mut conn, &lot, engine.now()).await.unwrap();
        }
        engine.operating_sweep(engine.now()).await.unwrap();
        clock.advance(Duration::minutes(1));
        let report = engine.operating_sweep(engine.now()).await.unwrap();
        assert_eq!(report.liabilities, 1);
        assert_eq!(credits(&engine, "shipper").await, -24);
    }

    #[tokio::test]
    async fn laid_up_vessels_cost_nothing() {
        let (engine, clock) = engine().await;
        let mut v = vessel("v1", "owner", Position::new(0.0, 0.0));
        v.store_at(&PortId::from("harbor-alpha"), engine.now());
        afloat(&engine, v).await;
        grant(&engine, "owner", 100).await;
        engine.operating_sweep(engine.now()).await.unwrap();
        clock.advance(Duration::hours(1));
        let report = engine.operating_sweep(engine.now()).await.unwrap();
        assert_eq!(report, OperatingSweep::default());
        assert_eq!(credits(&engine, "owner").await, 100);
    }
}
