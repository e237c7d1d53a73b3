//! Cargo and passenger contracts: matching, sweeps and delivery.

use crate::ledger::{credit_with_revenue_share, Touched};
use crate::{Engine, GatewayError, Result, Session};
use chrono::{DateTime, Utc};
use fleet_core::{
    require_id, Adjustment, CargoLot, CargoStatus, PassengerContract, PassengerStatus, PortId,
    Position, Vessel, VesselId,
};
use fleet_econ::generation::top_up_count;
use fleet_econ::{
    cargo_capacity_tons, passenger_capacity, port_congestion, turnaround_delay, EconError,
    PortCongestion,
};
use persistence::logistics;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use tracing::{debug, info};

/// An operator's own consignment.
///
/// Without a vessel the lot is listed at `port_id`; with one it goes straight
/// into the hold of that vessel at whichever port it is lying in.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CargoRequest {
    #[serde(default)]
    pub port_id: Option<PortId>,
    #[serde(default)]
    pub vessel_id: Option<VesselId>,
    pub destination_port_id: PortId,
    #[serde(default = "default_cargo_type")]
    pub cargo_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub weight_tons: f64,
    pub value: i64,
    #[serde(default)]
    pub reward_credits: Option<i64>,
    #[serde(default)]
    pub liability_rate: Decimal,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_cargo_type() -> String {
    "bulk".to_string()
}

/// What a vessel is carrying against what it can carry.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldReport {
    pub vessel_id: VesselId,
    pub cargo: Vec<CargoLot>,
    pub load_tons: f64,
    pub capacity_tons: f64,
    pub passengers: i64,
    pub passenger_capacity: i64,
}

/// Counts from one expiry sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExpiryReport {
    pub cargo_expired: usize,
    pub cargo_regenerated: usize,
    pub passengers_expired: u64,
    pub sales_expired: usize,
}

fn may_load(vessel: &Vessel, session: &Session) -> Result<()> {
    let op = &session.operator_id;
    if session.admin || vessel.is_operated_by(op) || vessel.has_crew(op) {
        Ok(())
    } else {
        Err(GatewayError::unauthorized(format!(
            "you do not operate vessel {}",
            vessel.id
        )))
    }
}

impl Engine {
    async fn congestion_of(&self, conn: &mut SqliteConnection, port: &PortId) -> Result<f64> {
        let counts = logistics::listed_counts(conn).await?;
        let Some(p) = self.cfg.port(port) else {
            return Ok(0.0);
        };
        let (cargo, pax) = counts.get(port).copied().unwrap_or_default();
        Ok(port_congestion(p.size, cargo, pax))
    }

    /// Congestion of every configured port, in registry order.
    pub async fn congestion(&self) -> Result<Vec<PortCongestion>> {
        let counts = {
            let mut conn = self.pool.acquire().await?;
            logistics::listed_counts(&mut conn).await?
        };
        Ok(self
            .cfg
            .ports
            .iter()
            .map(|p| {
                let (cargo, pax) = counts.get(&p.id).copied().unwrap_or_default();
                PortCongestion {
                    port_id: p.id.clone(),
                    congestion: port_congestion(p.size, cargo, pax),
                }
            })
            .collect())
    }

    fn known_port(&self, port: &PortId) -> Result<()> {
        match self.cfg.port(port) {
            Some(_) => Ok(()),
            None => Err(GatewayError::not_found("port", port.as_str())),
        }
    }

    pub async fn cargo_at_port(&self, port: &PortId) -> Result<Vec<CargoLot>> {
        self.known_port(port)?;
        let mut conn = self.pool.acquire().await?;
        Ok(logistics::list_cargo_at_port(&mut conn, port).await?)
    }

    pub async fn passengers_at_port(&self, port: &PortId) -> Result<Vec<PassengerContract>> {
        self.known_port(port)?;
        let mut conn = self.pool.acquire().await?;
        Ok(logistics::list_passengers_at_port(&mut conn, port).await?)
    }

    pub async fn hold(&self, vessel_id: &VesselId) -> Result<HoldReport> {
        let hull = {
            let handle = self.vessel_handle(vessel_id).await?;
            let guard = handle.lock().await;
            guard.hull
        };
        let mut conn = self.pool.acquire().await?;
        let cargo = logistics::list_cargo_on_vessel(&mut conn, vessel_id).await?;
        let load_tons = logistics::hold_load_tons(&mut conn, vessel_id).await?;
        let passengers = logistics::passenger_load(&mut conn, vessel_id).await?;
        Ok(HoldReport {
            vessel_id: vessel_id.clone(),
            cargo,
            load_tons,
            capacity_tons: cargo_capacity_tons(&hull),
            passengers,
            passenger_capacity: passenger_capacity(&hull),
        })
    }

    /// Load a listed lot onto a vessel lying in the lot's port.
    ///
    /// The capacity check and the status change are a single conditional
    /// update, so concurrent assignments cannot overfill the hold.
    pub async fn assign_cargo(
        &self,
        session: &Session,
        cargo_id: &str,
        vessel_id: &VesselId,
    ) -> Result<CargoLot> {
        let now = self.now();
        let lot = {
            let mut conn = self.pool.acquire().await?;
            logistics::get_cargo(&mut conn, cargo_id)
                .await?
                .ok_or_else(|| GatewayError::not_found("cargo", cargo_id))?
        };
        if lot.status != CargoStatus::Listed {
            return Err(GatewayError::unavailable(format!(
                "cargo {cargo_id} is {}",
                lot.status
            )));
        }
        if lot.expires_at.is_some_and(|at| at <= now) {
            return Err(GatewayError::Expired(format!("cargo {cargo_id}")));
        }
        let op = &session.operator_id;
        if lot.owner_id.as_ref().is_some_and(|owner| owner != op) {
            return Err(GatewayError::unauthorized(format!(
                "cargo {cargo_id} belongs to another operator"
            )));
        }

        let handle = self.vessel_handle(vessel_id).await?;
        let guard = handle.lock().await;
        may_load(&guard, session)?;
        let port = self
            .port_at(&guard.physical.position)
            .map(|p| p.id.clone())
            .filter(|p| lot.port_id.as_ref().map_or(true, |listed| listed == p))
            .ok_or_else(|| GatewayError::unavailable("vessel must be in the cargo's port"))?;
        let capacity = cargo_capacity_tons(&guard.hull);

        let mut tx = self.pool.begin().await?;
        let congestion = self.congestion_of(&mut tx, &port).await?;
        let ready_at = now + turnaround_delay(congestion, &self.cfg);
        if !logistics::assign_cargo(&mut tx, cargo_id, vessel_id, op, capacity, ready_at, now)
            .await?
        {
            let current = logistics::get_cargo(&mut tx, cargo_id).await?;
            return Err(match current {
                Some(c) if c.status != CargoStatus::Listed => {
                    GatewayError::unavailable(format!("cargo {cargo_id} is {}", c.status))
                }
                Some(c) if c.expires_at.is_some_and(|at| at <= now) => {
                    GatewayError::Expired(format!("cargo {cargo_id}"))
                }
                Some(_) => GatewayError::Capacity(format!(
                    "cargo {cargo_id} exceeds the hold of {vessel_id}"
                )),
                None => GatewayError::not_found("cargo", cargo_id),
            });
        }
        tx.commit().await?;
        drop(guard);
        info!(cargo_id, vessel_id = %vessel_id, operator_id = %op, congestion, "cargo loading");
        Ok(CargoLot {
            port_id: None,
            carrier_id: Some(op.clone()),
            vessel_id: Some(vessel_id.clone()),
            status: CargoStatus::Loading,
            ready_at: Some(ready_at),
            ..lot
        })
    }

    /// Board a listed passenger contract onto a vessel at its origin port.
    pub async fn accept_passengers(
        &self,
        session: &Session,
        contract_id: &str,
        vessel_id: &VesselId,
    ) -> Result<PassengerContract> {
        let now = self.now();
        let contract = {
            let mut conn = self.pool.acquire().await?;
            logistics::get_passengers(&mut conn, contract_id)
                .await?
                .ok_or_else(|| GatewayError::not_found("passenger contract", contract_id))?
        };
        if contract.status != PassengerStatus::Listed {
            return Err(GatewayError::unavailable(format!(
                "contract {contract_id} is {}",
                contract.status
            )));
        }
        if contract.expires_at.is_some_and(|at| at <= now) {
            return Err(GatewayError::Expired(format!("contract {contract_id}")));
        }

        let op = &session.operator_id;
        let handle = self.vessel_handle(vessel_id).await?;
        let guard = handle.lock().await;
        may_load(&guard, session)?;
        if self.port_at(&guard.physical.position).map(|p| &p.id) != Some(&contract.origin_port_id) {
            return Err(GatewayError::unavailable("vessel must be in the contract's origin port"));
        }
        let seats = passenger_capacity(&guard.hull);

        let mut tx = self.pool.begin().await?;
        let congestion = self.congestion_of(&mut tx, &contract.origin_port_id).await?;
        let ready_at = now + turnaround_delay(congestion, &self.cfg);
        if !logistics::accept_passengers(&mut tx, contract_id, vessel_id, op, seats, ready_at, now)
            .await?
        {
            let current = logistics::get_passengers(&mut tx, contract_id).await?;
            return Err(match current {
                Some(c) if c.status != PassengerStatus::Listed => GatewayError::unavailable(
                    format!("contract {contract_id} is {}", c.status),
                ),
                Some(c) if c.expires_at.is_some_and(|at| at <= now) => {
                    GatewayError::Expired(format!("contract {contract_id}"))
                }
                Some(_) => GatewayError::Capacity(format!("not enough seats aboard {vessel_id}")),
                None => GatewayError::not_found("passenger contract", contract_id),
            });
        }
        tx.commit().await?;
        drop(guard);
        info!(contract_id, vessel_id = %vessel_id, operator_id = %op, pax = contract.pax_count, "passengers boarding");
        Ok(PassengerContract {
            operator_id: Some(op.clone()),
            vessel_id: Some(vessel_id.clone()),
            status: PassengerStatus::Boarding,
            ready_at: Some(ready_at),
            ..contract
        })
    }

    /// Owner abandons their lot. No reward is paid.
    pub async fn release_cargo(&self, session: &Session, cargo_id: &str) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let lot = logistics::get_cargo(&mut conn, cargo_id)
            .await?
            .ok_or_else(|| GatewayError::not_found("cargo", cargo_id))?;
        if lot.owner_id.as_ref() != Some(&session.operator_id) {
            return Err(GatewayError::unauthorized(format!("cargo {cargo_id} is not yours")));
        }
        if !logistics::release_cargo(&mut conn, cargo_id, &session.operator_id, self.now()).await? {
            return Err(GatewayError::unavailable(format!("cargo {cargo_id} is {}", lot.status)));
        }
        info!(cargo_id, operator_id = %session.operator_id, "cargo released");
        Ok(())
    }

    /// List an operator-owned consignment, or load it straight onto their vessel.
    pub async fn create_cargo(&self, session: &Session, req: CargoRequest) -> Result<CargoLot> {
        if req.value <= 0 {
            return Err(GatewayError::validation("cargo value must be > 0"));
        }
        if !req.weight_tons.is_finite() || req.weight_tons < 0.0 {
            return Err(GatewayError::validation("cargo weight must be >= 0"));
        }
        let reward = req.reward_credits.unwrap_or(req.value);
        if reward <= 0 {
            return Err(GatewayError::validation("cargo reward must be > 0"));
        }
        if req.liability_rate < Decimal::ZERO {
            return Err(GatewayError::validation("liability rate must be >= 0"));
        }
        require_id(&req.cargo_type, "cargo type")?;
        self.known_port(&req.destination_port_id)?;
        let now = self.now();
        let op = session.operator_id.clone();

        let mut lot = CargoLot {
            id: self.next_id("cargo"),
            port_id: None,
            origin_port_id: None,
            destination_port_id: Some(req.destination_port_id),
            owner_id: Some(op.clone()),
            carrier_id: None,
            vessel_id: None,
            cargo_type: req.cargo_type,
            description: req.description,
            weight_tons: req.weight_tons,
            value: req.value,
            reward_credits: reward,
            liability_rate: req.liability_rate,
            status: CargoStatus::Listed,
            ready_at: None,
            expires_at: req.expires_at,
        };

        let Some(vessel_id) = req.vessel_id else {
            let port = req
                .port_id
                .ok_or_else(|| GatewayError::validation("missing port for cargo listing"))?;
            self.known_port(&port)?;
            lot.origin_port_id = Some(port.clone());
            lot.port_id = Some(port);
            let mut conn = self.pool.acquire().await?;
            logistics::insert_cargo(&mut conn, &lot, now).await?;
            info!(cargo_id = %lot.id, operator_id = %op, "cargo listed");
            return Ok(lot);
        };

        let handle = self.vessel_handle(&vessel_id).await?;
        let guard = handle.lock().await;
        if guard.owner_id.as_ref() != Some(&op) && !session.admin {
            return Err(GatewayError::unauthorized(format!(
                "only the owner can load {vessel_id}"
            )));
        }
        let port = self
            .port_at(&guard.physical.position)
            .map(|p| p.id.clone())
            .ok_or_else(|| GatewayError::unavailable("vessel must be in port to load cargo"))?;
        let capacity = cargo_capacity_tons(&guard.hull);
        lot.origin_port_id = Some(port);
        lot.carrier_id = Some(op.clone());
        lot.vessel_id = Some(vessel_id.clone());
        lot.status = CargoStatus::Loaded;

        let mut tx = self.pool.begin().await?;
        let load = logistics::hold_load_tons(&mut tx, &vessel_id).await?;
        if load + lot.weight_tons > capacity {
            return Err(GatewayError::Capacity(format!(
                "cargo exceeds the hold of {vessel_id}"
            )));
        }
        logistics::insert_cargo(&mut tx, &lot, now).await?;
        tx.commit().await?;
        drop(guard);
        info!(cargo_id = %lot.id, vessel_id = %vessel_id, operator_id = %op, "cargo loaded directly");
        Ok(lot)
    }

    /// Top every port up to its listed-cargo target.
    pub(crate) async fn generate_cargo(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let counts = logistics::listed_counts(&mut tx).await?;
        let ports = &self.cfg.ports;
        let lots = self.with_generator(|g| {
            let mut lots = Vec::new();
            for port in ports {
                let listed = counts.get(&port.id).map_or(0, |c| c.0);
                for _ in 0..top_up_count(port.size.cargo_target(), listed) {
                    if let Some(lot) = g.cargo_lot(port, ports, now)? {
                        lots.push(lot);
                    }
                }
            }
            Ok::<_, EconError>(lots)
        })?;
        for lot in &lots {
            logistics::insert_cargo(&mut tx, lot, now).await?;
        }
        tx.commit().await?;
        if !lots.is_empty() {
            info!(count = lots.len(), "cargo listings generated");
        }
        Ok(lots.len())
    }

    /// Top every port up to its listed-passenger target.
    pub(crate) async fn generate_passengers(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let counts = logistics::listed_counts(&mut tx).await?;
        let ports = &self.cfg.ports;
        let contracts = self.with_generator(|g| {
            ports
                .iter()
                .flat_map(|port| {
                    let listed = counts.get(&port.id).map_or(0, |c| c.1);
                    (0..top_up_count(port.size.passenger_target(), listed)).map(move |_| port)
                })
                .filter_map(|port| g.passenger_contract(port, ports, now))
                .collect::<Vec<_>>()
        });
        for c in &contracts {
            logistics::insert_passengers(&mut tx, c, now).await?;
        }
        tx.commit().await?;
        if !contracts.is_empty() {
            info!(count = contracts.len(), "passenger listings generated");
        }
        Ok(contracts.len())
    }

    /// Expire overdue listings and relist expired cargo at its origin.
    pub(crate) async fn expire_listings(&self, now: DateTime<Utc>) -> Result<ExpiryReport> {
        let mut tx = self.pool.begin().await?;
        let expired = logistics::expire_listed_cargo(&mut tx, now).await?;
        let passengers_expired = logistics::expire_listed_passengers(&mut tx, now).await?;
        let ports = &self.cfg.ports;
        let fresh: Vec<CargoLot> = self.with_generator(|g| {
            expired
                .iter()
                .filter_map(|lot| g.regenerate_cargo(lot, ports, now))
                .collect()
        });
        for lot in &fresh {
            logistics::insert_cargo(&mut tx, lot, now).await?;
        }
        tx.commit().await?;
        let report = ExpiryReport {
            cargo_expired: expired.len(),
            cargo_regenerated: fresh.len(),
            passengers_expired,
            sales_expired: self.expire_sales(now).await?,
        };
        if report != ExpiryReport::default() {
            info!(
                cargo_expired = report.cargo_expired,
                cargo_regenerated = report.cargo_regenerated,
                passengers_expired,
                sales_expired = report.sales_expired,
                "listings expired"
            );
        }
        Ok(report)
    }

    /// Finish loading and boarding whose turnaround has elapsed.
    pub(crate) async fn promote(&self, now: DateTime<Utc>) -> Result<(u64, u64)> {
        let mut conn = self.pool.acquire().await?;
        let promoted = logistics::promote_ready(&mut conn, now).await?;
        if promoted != (0, 0) {
            debug!(cargo = promoted.0, passengers = promoted.1, "turnaround complete");
        }
        Ok(promoted)
    }

    async fn live_positions(
        &self,
        ids: impl IntoIterator<Item = VesselId>,
    ) -> HashMap<VesselId, Position> {
        let mut out = HashMap::new();
        for id in ids {
            if out.contains_key(&id) {
                continue;
            }
            // Vessels in spaces nobody has touched cannot be moving.
            if let Some(handle) = self.registry.find(&id) {
                let position = handle.lock().await.physical.position;
                out.insert(id, position);
            }
        }
        out
    }

    fn arrived(
        &self,
        positions: &HashMap<VesselId, Position>,
        vessel: Option<&VesselId>,
        dest: Option<&PortId>,
    ) -> bool {
        let (Some(vessel), Some(dest)) = (vessel, dest) else {
            return false;
        };
        match (positions.get(vessel), self.cfg.port(dest)) {
            (Some(at), Some(port)) => at.distance_to(&port.position) <= self.cfg.delivery_radius_m,
            _ => false,
        }
    }

    /// Complete every in-transit contract whose vessel has reached its destination.
    ///
    /// Each delivery commits on its own with the reward credit.
    pub async fn detect_deliveries(&self) -> Result<usize> {
        let (cargo, pax) = {
            let mut conn = self.pool.acquire().await?;
            (
                logistics::list_cargo_in_transit(&mut conn).await?,
                logistics::list_passengers_in_transit(&mut conn).await?,
            )
        };
        if cargo.is_empty() && pax.is_empty() {
            return Ok(0);
        }
        let ids: Vec<VesselId> = cargo
            .iter()
            .filter_map(|c| c.vessel_id.clone())
            .chain(pax.iter().filter_map(|p| p.vessel_id.clone()))
            .collect();
        let positions = self.live_positions(ids).await;
        let now = self.now();
        let mut delivered = 0usize;
        let mut touched: Touched = Vec::new();

        for lot in cargo
            .iter()
            .filter(|c| self.arrived(&positions, c.vessel_id.as_ref(), c.destination_port_id.as_ref()))
        {
            let mut tx = self.pool.begin().await?;
            if !logistics::mark_cargo_delivered(&mut tx, &lot.id, now).await? {
                continue;
            }
            if let (Some(carrier), Some(vessel)) = (&lot.carrier_id, &lot.vessel_id) {
                let reward = if lot.reward_credits > 0 { lot.reward_credits } else { lot.value };
                let adj = Adjustment::credits(reward, "cargo_delivery")
                    .with_vessel(vessel)
                    .with_meta(json!({
                        "cargoId": lot.id,
                        "destinationPortId": lot.destination_port_id,
                    }));
                touched.extend(credit_with_revenue_share(&mut tx, carrier, adj, now).await?);
            }
            tx.commit().await?;
            delivered += 1;
            info!(cargo_id = %lot.id, carrier_id = ?lot.carrier_id, "cargo delivered");
        }

        for contract in pax
            .iter()
            .filter(|p| self.arrived(&positions, p.vessel_id.as_ref(), Some(&p.destination_port_id)))
        {
            let mut tx = self.pool.begin().await?;
            if !logistics::mark_passengers_completed(&mut tx, &contract.id, now).await? {
                continue;
            }
            if let (Some(operator), Some(vessel)) = (&contract.operator_id, &contract.vessel_id) {
                let adj = Adjustment::credits(contract.reward_credits, "passenger_delivery")
                    .with_vessel(vessel)
                    .with_meta(json!({
                        "contractId": contract.id,
                        "destinationPortId": contract.destination_port_id,
                    }));
                touched.extend(credit_with_revenue_share(&mut tx, operator, adj, now).await?);
            }
            tx.commit().await?;
            delivered += 1;
            info!(contract_id = %contract.id, operator_id = ?contract.operator_id, "passengers delivered");
        }

        self.publish_profiles(touched);
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use chrono::Duration;
    use fleet_core::{OperatorId, PhysicalState, SpaceId};

    fn listed_lot(id: &str, port: &str, weight: f64, expires_at: DateTime<Utc>) -> CargoLot {
        CargoLot {
            id: id.into(),
            port_id: Some(PortId::from(port)),
            origin_port_id: Some(PortId::from(port)),
            destination_port_id: Some(PortId::from("bay-delta")),
            owner_id: None,
            carrier_id: None,
            vessel_id: None,
            cargo_type: "bulk".into(),
            description: None,
            weight_tons: weight,
            value: 1000,
            reward_credits: 1150,
            liability_rate: Decimal::new(1, 2),
            status: CargoStatus::Listed,
            ready_at: None,
            expires_at: Some(expires_at),
        }
    }

    async fn vessel_at(engine: &Engine, id: &str, owner: &str, at: Position, mass_kg: f64) -> VesselId {
        let now = engine.now();
        let vid = VesselId::from(id);
        let mut v = Vessel::new(vid.clone(), SpaceId::from("global"), now);
        v.owner_id = Some(OperatorId::from(owner));
        v.physical.position = at;
        v.hull.mass_kg = mass_kg;
        engine.persist(&v, now).await.unwrap();
        vid
    }

    async fn insert(engine: &Engine, lot: &CargoLot) {
        let mut conn = engine.pool().acquire().await.unwrap();
        logistics::insert_cargo(&mut conn, lot, engine.now()).await.unwrap();
    }

    #[tokio::test]
    async fn assign_sets_turnaround_and_clears_port() {
        let (engine, _) = engine().await;
        let now = engine.now();
        let vid = vessel_at(&engine, "v1", "op", Position::new(0.0, 0.0), 2_000_000.0).await;
        insert(&engine, &listed_lot("c1", "harbor-alpha", 10.0, now + Duration::hours(2))).await;

        let lot = engine.assign_cargo(&session("op"), "c1", &vid).await.unwrap();
        assert_eq!(lot.status, CargoStatus::Loading);
        assert_eq!(lot.port_id, None);
        let ready = lot.ready_at.unwrap();
        assert!(ready >= now + Duration::minutes(6));
        assert!(ready <= now + Duration::minutes(24));

        let hold = engine.hold(&vid).await.unwrap();
        assert_eq!(hold.cargo.len(), 1);
        assert!((hold.load_tons - 10.0).abs() < 1e-9);
        assert!((hold.capacity_tons - 60.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn assign_rejects_wrong_port_and_stranger() {
        let (engine, _) = engine().await;
        let now = engine.now();
        let vid = vessel_at(&engine, "v1", "op", Position::new(2000.0, -1500.0), 2_000_000.0).await;
        insert(&engine, &listed_lot("c1", "harbor-alpha", 10.0, now + Duration::hours(2))).await;

        let err = engine.assign_cargo(&session("op"), "c1", &vid).await.err().unwrap();
        assert_eq!(err.kind(), "unavailable");
        let err = engine.assign_cargo(&session("x"), "c1", &vid).await.err().unwrap();
        assert_eq!(err.kind(), "unauthorized");
        let err = engine.assign_cargo(&session("op"), "missing", &vid).await.err().unwrap();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn expired_lot_cannot_be_assigned() {
        let (engine, clock) = engine().await;
        let now = engine.now();
        let vid = vessel_at(&engine, "v1", "op", Position::new(0.0, 0.0), 2_000_000.0).await;
        insert(&engine, &listed_lot("c1", "harbor-alpha", 10.0, now + Duration::minutes(1))).await;
        clock.advance(Duration::minutes(2));
        let err = engine.assign_cargo(&session("op"), "c1", &vid).await.err().unwrap();
        assert_eq!(err.kind(), "expired");
    }

    #[tokio::test]
    async fn passengers_respect_seats() {
        let (engine, _) = engine().await;
        let now = engine.now();
        // 30 m hull: 18 seats.
        let vid = vessel_at(&engine, "v1", "op", Position::new(0.0, 0.0), 500_000.0).await;
        let contract = |id: &str, pax| PassengerContract {
            id: id.into(),
            origin_port_id: PortId::from("harbor-alpha"),
            destination_port_id: PortId::from("bay-delta"),
            operator_id: None,
            vessel_id: None,
            passenger_type: "water_bus".into(),
            pax_count: pax,
            reward_credits: 450,
            status: PassengerStatus::Listed,
            ready_at: None,
            expires_at: Some(now + Duration::hours(1)),
        };
        {
            let mut conn = engine.pool().acquire().await.unwrap();
            logistics::insert_passengers(&mut conn, &contract("p1", 12), now).await.unwrap();
            logistics::insert_passengers(&mut conn, &contract("p2", 10), now).await.unwrap();
        }
        let boarded = engine.accept_passengers(&session("op"), "p1", &vid).await.unwrap();
        assert_eq!(boarded.status, PassengerStatus::Boarding);
        let err = engine.accept_passengers(&session("op"), "p2", &vid).await.err().unwrap();
        assert_eq!(err.kind(), "capacity");
        let err = engine.accept_passengers(&session("op"), "p1", &vid).await.err().unwrap();
        assert_eq!(err.kind(), "unavailable");
    }

    #[tokio::test]
    async fn generation_tops_up_and_is_idempotent() {
        let (engine, _) = engine().await;
        let now = engine.now();
        let first = engine.generate_cargo(now).await.unwrap();
        let expected: u32 = engine.config().ports.iter().map(|p| p.size.cargo_target()).sum();
        assert_eq!(first, expected as usize);
        assert_eq!(engine.generate_cargo(now).await.unwrap(), 0);

        let pax = engine.generate_passengers(now).await.unwrap();
        let expected: u32 = engine.config().ports.iter().map(|p| p.size.passenger_target()).sum();
        assert_eq!(pax, expected as usize);

        let congestion = engine.congestion().await.unwrap();
        assert_eq!(congestion.len(), engine.config().ports.len());
        assert!(congestion.iter().all(|c| (0.0..=1.0).contains(&c.congestion)));
    }

    #[tokio::test]
    async fn expiry_regenerates_cargo_but_not_passengers() {
        let (engine, clock) = engine().await;
        let now = engine.now();
        insert(&engine, &listed_lot("c1", "harbor-alpha", 10.0, now + Duration::minutes(5))).await;
        clock.advance(Duration::minutes(10));
        let report = engine.expire_listings(engine.now()).await.unwrap();
        assert_eq!(report.cargo_expired, 1);
        assert_eq!(report.cargo_regenerated, 1);

        let listed = engine.cargo_at_port(&PortId::from("harbor-alpha")).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_ne!(listed[0].id, "c1");
        assert!((listed[0].weight_tons - 10.0).abs() < 1e-9);
        assert_eq!(listed[0].reward_credits, 1150);
        assert!(listed[0].expires_at.unwrap() > engine.now());
    }

    #[tokio::test]
    async fn release_is_owner_only() {
        let (engine, _) = engine().await;
        let mut lot = listed_lot("c1", "harbor-alpha", 5.0, engine.now() + Duration::hours(1));
        lot.owner_id = Some(OperatorId::from("owner"));
        insert(&engine, &lot).await;
        let err = engine.release_cargo(&session("x"), "c1").await.err().unwrap();
        assert_eq!(err.kind(), "unauthorized");
        engine.release_cargo(&session("owner"), "c1").await.unwrap();
        let err = engine.release_cargo(&session("owner"), "c1").await.err().unwrap();
        assert_eq!(err.kind(), "unavailable");
    }

    #[tokio::test]
    async fn direct_load_checks_owner_port_and_hold() {
        let (engine, _) = engine().await;
        let vid = vessel_at(&engine, "v1", "op", Position::new(0.0, 0.0), 500_000.0).await;
        let request = |weight| CargoRequest {
            port_id: None,
            vessel_id: Some(vid.clone()),
            destination_port_id: PortId::from("bay-delta"),
            cargo_type: "parcels".into(),
            description: None,
            weight_tons: weight,
            value: 300,
            reward_credits: None,
            liability_rate: Decimal::ZERO,
            expires_at: None,
        };
        let err = engine.create_cargo(&session("x"), request(1.0)).await.err().unwrap();
        assert_eq!(err.kind(), "unauthorized");
        let lot = engine.create_cargo(&session("op"), request(10.0)).await.unwrap();
        assert_eq!(lot.status, CargoStatus::Loaded);
        assert_eq!(lot.reward_credits, 300);
        assert_eq!(lot.origin_port_id, Some(PortId::from("harbor-alpha")));
        // Default hull carries 15 t.
        let err = engine.create_cargo(&session("op"), request(6.0)).await.err().unwrap();
        assert_eq!(err.kind(), "capacity");
    }

    #[tokio::test]
    async fn listing_needs_a_known_port() {
        let (engine, _) = engine().await;
        let request = CargoRequest {
            port_id: None,
            vessel_id: None,
            destination_port_id: PortId::from("bay-delta"),
            cargo_type: "bulk".into(),
            description: None,
            weight_tons: 20.0,
            value: 500,
            reward_credits: Some(700),
            liability_rate: Decimal::ZERO,
            expires_at: None,
        };
        let err = engine.create_cargo(&session("op"), request.clone()).await.err().unwrap();
        assert_eq!(err.kind(), "validation");
        let err = engine
            .create_cargo(
                &session("op"),
                CargoRequest {
                    port_id: Some(PortId::from("atlantis")),
                    ..request.clone()
                },
            )
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), "not_found");
        let lot = engine
            .create_cargo(
                &session("op"),
                CargoRequest {
                    port_id: Some(PortId::from("channel-gate")),
                    ..request
                },
            )
            .await
            .unwrap();
        assert_eq!(lot.owner_id, Some(OperatorId::from("op")));
        assert_eq!(
            engine.cargo_at_port(&PortId::from("channel-gate")).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn passengers_complete_on_arrival() {
        let (engine, clock) = engine().await;
        let now = engine.now();
        let vid = vessel_at(&engine, "v1", "op", Position::new(0.0, 0.0), 500_000.0).await;
        let contract = PassengerContract {
            id: "p1".into(),
            origin_port_id: PortId::from("harbor-alpha"),
            destination_port_id: PortId::from("bay-delta"),
            operator_id: None,
            vessel_id: None,
            passenger_type: "water_taxi".into(),
            pax_count: 4,
            reward_credits: 288,
            status: PassengerStatus::Listed,
            ready_at: None,
            expires_at: Some(now + Duration::hours(1)),
        };
        {
            let mut conn = engine.pool().acquire().await.unwrap();
            logistics::insert_passengers(&mut conn, &contract, now).await.unwrap();
        }
        engine.accept_passengers(&session("op"), "p1", &vid).await.unwrap();
        clock.advance(Duration::minutes(30));
        assert_eq!(engine.promote(engine.now()).await.unwrap(), (0, 1));
        assert_eq!(engine.detect_deliveries().await.unwrap(), 0);

        engine
            .update_physical_state(
                &vid,
                PhysicalState {
                    position: Position::new(2100.0, -1500.0),
                    ..PhysicalState::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(engine.detect_deliveries().await.unwrap(), 1);
        assert_eq!(engine.profile(&OperatorId::from("op")).await.unwrap().credits, 288);
        assert_eq!(engine.detect_deliveries().await.unwrap(), 0);
    }
}
