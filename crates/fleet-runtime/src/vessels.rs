//! Vessel lifecycle: join, leave, create, store, activate, stations and
//! simulation state updates.
//!
//! Every mutation clones the locked vessel, applies the change to the clone,
//! persists it and only then swaps it in, so a failed write leaves memory
//! untouched.

use crate::registry::{lock_pair, VesselGuard, VesselHandle};
use crate::{Engine, GatewayError, Result, Session};
use chrono::{DateTime, Utc};
use fleet_core::{
    validate_vessel, OperatorId, PhysicalState, Station, Vessel, VesselId, VesselProjection,
    VesselStatus,
};
use fleet_econ::vessel_creation_cost;
use persistence::{ledger, vessels};
use serde_json::json;
use tracing::{debug, info, warn};

/// Fallback joins retry when the chosen vessel filled up before it was locked.
const JOIN_ATTEMPTS: usize = 3;

/// Owner, active charterer/leasee or admin.
pub(crate) fn authorize(vessel: &Vessel, session: &Session) -> Result<()> {
    if session.admin || vessel.is_operated_by(&session.operator_id) {
        return Ok(());
    }
    Err(GatewayError::unauthorized(format!(
        "you do not operate vessel {}",
        vessel.id
    )))
}

fn check_joinable(vessel: &Vessel, operator: &OperatorId, max_crew: usize) -> Result<()> {
    if !vessel.status.is_crewable() {
        return Err(GatewayError::unavailable(format!(
            "vessel {} is {} and cannot take crew",
            vessel.id, vessel.status
        )));
    }
    if !vessel.has_crew(operator) && vessel.crew.len() >= max_crew {
        return Err(GatewayError::Capacity(format!(
            "vessel {} crew is full ({max_crew})",
            vessel.id
        )));
    }
    Ok(())
}

fn check_finite(state: &PhysicalState) -> Result<()> {
    let p = &state.position;
    let v = &state.velocity;
    let all = [p.x, p.y, state.heading, v.surge, v.sway, v.heave];
    if all.iter().all(|x| x.is_finite()) {
        Ok(())
    } else {
        Err(GatewayError::validation("physical state must be finite"))
    }
}

/// How a join target was chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JoinKind {
    Explicit,
    Fallback,
    /// Uncrewed vessel picked up by the fallback search; unowned ones are claimed.
    Takeover,
}

impl Engine {
    /// Put the operator aboard a vessel in their space.
    ///
    /// With no explicit target the search prefers a vessel the operator
    /// operates, then the least-crewed vessel with room, then an uncrewed
    /// vessel that is unowned or operated by the caller. The operator is
    /// detached from any other vessel in the space first.
    pub async fn join(
        &self,
        session: &Session,
        target: Option<&VesselId>,
    ) -> Result<VesselProjection> {
        self.ensure_space(&session.space_id).await?;
        let profile = self.profile(&session.operator_id).await?;
        let min_rank = self.cfg.min_rank_for(session.space_id.as_str());
        if profile.rank < min_rank {
            return Err(GatewayError::unauthorized(format!(
                "rank {min_rank} required in space {}",
                session.space_id
            )));
        }

        if let Some(id) = target {
            let handle = self.join_target(session, id).await?;
            return self.join_locked(session, id, handle, JoinKind::Explicit).await;
        }

        let mut last_err = None;
        for attempt in 0..JOIN_ATTEMPTS {
            let Some((id, handle, kind)) = self.fallback_target(session).await else {
                return Err(GatewayError::unavailable("no vessel available to join"));
            };
            match self.join_locked(session, &id, handle, kind).await {
                Err(e @ (GatewayError::Capacity(_) | GatewayError::Unavailable(_))) => {
                    debug!(attempt, vessel_id = %id, error = %e, "join candidate taken, retrying");
                    last_err = Some(e);
                }
                other => return other,
            }
        }
        Err(last_err.unwrap_or_else(|| GatewayError::unavailable("no vessel available to join")))
    }

    async fn join_target(&self, session: &Session, id: &VesselId) -> Result<VesselHandle> {
        if let Some(handle) = self.registry.get(&session.space_id, id) {
            return Ok(handle);
        }
        let stored = {
            let mut conn = self.pool.acquire().await?;
            vessels::get_vessel(&mut conn, id).await?
        };
        match stored {
            Some(_) if self.registry.find(id).is_some() => Err(GatewayError::unavailable(format!(
                "vessel {id} is in another space"
            ))),
            // A laid-up vessel from another space follows the operator who runs it.
            Some(mut v) if session.admin || v.is_operated_by(&session.operator_id) => {
                v.space_id = session.space_id.clone();
                Ok(self.registry.insert(v))
            }
            _ => Err(GatewayError::not_found("vessel", id.as_str())),
        }
    }

    async fn fallback_target(
        &self,
        session: &Session,
    ) -> Option<(VesselId, VesselHandle, JoinKind)> {
        let op = &session.operator_id;
        let max_crew = self.cfg.max_crew;
        let mut own = None;
        let mut shared: Vec<(usize, VesselId, VesselHandle)> = Vec::new();
        let mut takeover = None;
        for (id, handle) in self.registry.space_handles(&session.space_id) {
            let v = handle.lock().await;
            if !v.status.is_crewable() || v.has_crew(op) {
                continue;
            }
            let room = v.crew.len() < max_crew;
            if own.is_none() && room && v.is_operated_by(op) {
                own = Some((id.clone(), handle.clone()));
            } else if room && !v.crew.is_empty() {
                shared.push((v.crew.len(), id.clone(), handle.clone()));
            } else if takeover.is_none() && v.crew.is_empty() && v.owner_id.is_none() {
                takeover = Some((id.clone(), handle.clone()));
            }
        }
        if let Some((id, handle)) = own {
            return Some((id, handle, JoinKind::Fallback));
        }
        shared.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        if let Some((_, id, handle)) = shared.into_iter().next() {
            return Some((id, handle, JoinKind::Fallback));
        }
        takeover.map(|(id, handle)| (id, handle, JoinKind::Takeover))
    }

    async fn join_locked(
        &self,
        session: &Session,
        target_id: &VesselId,
        handle: VesselHandle,
        kind: JoinKind,
    ) -> Result<VesselProjection> {
        let op = &session.operator_id;
        let space = &session.space_id;
        let _operator = self.registry.lock_operator(space, op).await;
        let previous = self
            .registry
            .crewed_vessel(space, op)
            .filter(|p| p != target_id)
            .and_then(|p| self.registry.get(space, &p).map(|h| (p, h)));
        let (mut target, mut prev_guard) = match &previous {
            Some((pid, ph)) => {
                let (t, p) = lock_pair((target_id, &handle), (pid, ph)).await;
                (t, Some(p))
            }
            None => (handle.clone().lock_owned().await, None),
        };

        check_joinable(&target, op, self.cfg.max_crew)?;
        if kind == JoinKind::Takeover && target.owner_id.is_some() && !target.is_operated_by(op) {
            return Err(GatewayError::unavailable(format!(
                "vessel {target_id} was claimed by another operator"
            )));
        }

        let now = self.now();
        let mut next = Vessel::clone(&target);
        next.add_crew(op, &session.display_name, now);
        next.space_id = space.clone();
        if kind == JoinKind::Takeover && next.owner_id.is_none() {
            next.owner_id = Some(op.clone());
        }
        validate_vessel(&next)?;
        let mut prev_next = prev_guard
            .as_ref()
            .filter(|g| g.has_crew(op))
            .map(|g| {
                let mut v = Vessel::clone(g);
                v.remove_crew(op, now);
                v
            });

        let mut tx = self.pool.begin().await?;
        ledger::set_display_name(&mut tx, op, &session.display_name, now).await?;
        vessels::upsert_vessel(&mut tx, &next, now).await?;
        if let Some(p) = &prev_next {
            vessels::upsert_vessel(&mut tx, p, now).await?;
        }
        tx.commit().await?;

        self.registry.sync_autopilot(&mut next, now);
        let mut projections = vec![next.projection()];
        *target = next;
        if let (Some(guard), Some(mut p)) = (prev_guard.as_mut(), prev_next.take()) {
            self.registry.sync_autopilot(&mut p, now);
            projections.push(p.projection());
            **guard = p;
        }
        self.registry.set_crewed(space, op, target_id);
        drop(target);
        drop(prev_guard);

        info!(operator_id = %op, vessel_id = %target_id, ?kind, "operator joined vessel");
        self.publish_vessels(space, projections.clone());
        Ok(projections.swap_remove(0))
    }

    /// Take the operator off whatever vessel they crew in their space.
    pub async fn leave(&self, session: &Session) -> Result<Option<VesselProjection>> {
        let op = &session.operator_id;
        let space = &session.space_id;
        let _operator = self.registry.lock_operator(space, op).await;
        let Some(id) = self.registry.crewed_vessel(space, op) else {
            return Ok(None);
        };
        let Some(handle) = self.registry.get(space, &id) else {
            self.registry.clear_crewed(space, op, &id);
            return Ok(None);
        };
        let mut guard = handle.lock_owned().await;
        if !guard.has_crew(op) {
            self.registry.clear_crewed(space, op, &id);
            return Ok(None);
        }
        let now = self.now();
        let mut next = Vessel::clone(&guard);
        next.remove_crew(op, now);
        self.persist(&next, now).await?;
        self.registry.sync_autopilot(&mut next, now);
        let projection = next.projection();
        *guard = next;
        drop(guard);
        self.registry.clear_crewed(space, op, &id);
        debug!(operator_id = %op, vessel_id = %id, "operator left vessel");
        self.publish_vessels(space, [projection.clone()]);
        Ok(Some(projection))
    }

    /// Buy a new vessel. The cost is debited atomically before anything else changes.
    pub async fn create_vessel(&self, session: &Session) -> Result<VesselProjection> {
        let op = &session.operator_id;
        let space = &session.space_id;
        self.ensure_space(space).await?;
        let profile = self.profile(op).await?;
        let cost = vessel_creation_cost(profile.rank, &self.cfg);
        let now = self.now();

        let id = VesselId(self.next_id("vessel"));
        let mut vessel = Vessel::new(id.clone(), space.clone(), now);
        vessel.owner_id = Some(op.clone());
        if let Some(port) = self.cfg.ports.first() {
            vessel.physical.position = port.position;
        }
        vessel.add_crew(op, &session.display_name, now);

        let _operator = self.registry.lock_operator(space, op).await;
        let mut prev_guard: Option<VesselGuard> = match self.registry.crewed_vessel(space, op) {
            Some(pid) => match self.registry.get(space, &pid) {
                Some(h) => Some(h.lock_owned().await),
                None => None,
            },
            None => None,
        };
        let mut prev_next = prev_guard
            .as_ref()
            .filter(|g| g.has_crew(op))
            .map(|g| {
                let mut v = Vessel::clone(g);
                v.remove_crew(op, now);
                v
            });

        let mut tx = self.pool.begin().await?;
        let meta = json!({ "cost": cost, "rank": profile.rank });
        let Some(after) =
            ledger::debit_if_solvent(&mut tx, op, cost, Some(&id), "vessel_create", Some(&meta), now)
                .await?
        else {
            drop(tx);
            warn!(operator_id = %op, cost, credits = profile.credits, "vessel purchase refused");
            return Err(GatewayError::InsufficientCredits { needed: cost });
        };
        vessels::upsert_vessel(&mut tx, &vessel, now).await?;
        if let Some(p) = &prev_next {
            vessels::upsert_vessel(&mut tx, p, now).await?;
        }
        tx.commit().await?;

        let mut projections = vec![vessel.projection()];
        if let (Some(guard), Some(mut p)) = (prev_guard.as_mut(), prev_next.take()) {
            self.registry.sync_autopilot(&mut p, now);
            projections.push(p.projection());
            **guard = p;
        }
        drop(prev_guard);
        self.registry.insert(vessel);
        self.registry.set_crewed(space, op, &id);

        info!(operator_id = %op, vessel_id = %id, cost, "vessel created");
        self.publish_profiles([(op.clone(), after)]);
        self.publish_vessels(space, projections.clone());
        Ok(projections.swap_remove(0))
    }

    /// Lay a vessel up in the port it is sitting in.
    pub async fn store_vessel(&self, session: &Session, id: &VesselId) -> Result<VesselProjection> {
        let handle = self.vessel_handle(id).await?;
        let mut guard = handle.lock_owned().await;
        authorize(&guard, session)?;
        if guard.status != VesselStatus::Active {
            return Err(GatewayError::unavailable(format!(
                "vessel {id} is {} and cannot be stored",
                guard.status
            )));
        }
        let Some(port) = self.port_at(&guard.physical.position) else {
            return Err(GatewayError::unavailable("vessel must be in port to be stored"));
        };
        let speed = guard.physical.velocity.speed();
        if speed > self.cfg.storage_speed_limit_mps {
            return Err(GatewayError::unavailable(format!(
                "vessel must be stopped to be stored ({speed:.2} m/s)"
            )));
        }
        let port_id = port.id.clone();
        let now = self.now();
        let mut next = Vessel::clone(&guard);
        next.store_at(&port_id, now);
        self.persist(&next, now).await?;
        self.registry.sync_autopilot(&mut next, now);
        let space = next.space_id.clone();
        let projection = next.projection();
        *guard = next;
        drop(guard);
        self.registry.clear_vessel_crew(&space, id);
        info!(vessel_id = %id, port_id = %port_id, "vessel stored");
        self.publish_vessels(&space, [projection.clone()]);
        Ok(projection)
    }

    /// Bring a stored vessel back into service.
    pub async fn activate_vessel(
        &self,
        session: &Session,
        id: &VesselId,
    ) -> Result<VesselProjection> {
        let handle = self.vessel_handle(id).await?;
        let mut guard = handle.lock_owned().await;
        authorize(&guard, session)?;
        if guard.status != VesselStatus::Stored {
            return Err(GatewayError::unavailable(format!("vessel {id} is not stored")));
        }
        let now = self.now();
        let mut next = Vessel::clone(&guard);
        next.activate(now);
        self.persist(&next, now).await?;
        let space = next.space_id.clone();
        let projection = next.projection();
        *guard = next;
        drop(guard);
        info!(vessel_id = %id, "vessel activated");
        self.publish_vessels(&space, [projection.clone()]);
        Ok(projection)
    }

    /// Claim or release a station. Only crew can hold stations.
    pub async fn update_station(
        &self,
        session: &Session,
        id: &VesselId,
        station: Station,
        claim: bool,
    ) -> Result<VesselProjection> {
        let handle = self.vessel_handle(id).await?;
        let mut guard = handle.lock_owned().await;
        let op = &session.operator_id;
        if !guard.has_crew(op) && (claim || !session.admin) {
            return Err(GatewayError::unauthorized(format!("you are not crew on {id}")));
        }
        let mut next = Vessel::clone(&guard);
        next.update_station(station, claim, op, &session.display_name, session.admin)?;
        validate_vessel(&next)?;
        let now = self.now();
        next.last_update = now;
        self.persist(&next, now).await?;
        let space = next.space_id.clone();
        let projection = next.projection();
        *guard = next;
        drop(guard);
        self.publish_vessels(&space, [projection.clone()]);
        Ok(projection)
    }

    /// Accept position and velocity from the simulation loop.
    ///
    /// Only in-memory vessels are updated; the checkpoint sweep writes them back.
    pub async fn update_physical_state(
        &self,
        id: &VesselId,
        state: PhysicalState,
    ) -> Result<VesselProjection> {
        check_finite(&state)?;
        let handle = self
            .registry
            .find(id)
            .ok_or_else(|| GatewayError::not_found("vessel", id.as_str()))?;
        let mut guard = handle.lock().await;
        guard.physical = state;
        guard.last_update = self.now();
        let projection = guard.projection();
        let space = guard.space_id.clone();
        drop(guard);
        self.publish_vessels(&space, [projection.clone()]);
        Ok(projection)
    }

    /// Crew-submitted state; same as [`Engine::update_physical_state`] after an
    /// aboard check.
    pub async fn crew_state_update(
        &self,
        session: &Session,
        id: &VesselId,
        state: PhysicalState,
    ) -> Result<VesselProjection> {
        let handle = self.vessel_handle(id).await?;
        {
            let guard = handle.lock().await;
            if !session.admin && !guard.has_crew(&session.operator_id) {
                return Err(GatewayError::unauthorized(format!("you are not crew on {id}")));
            }
        }
        self.update_physical_state(id, state).await
    }

    /// Snapshot of one vessel.
    pub async fn vessel(&self, id: &VesselId) -> Result<Vessel> {
        let handle = self.vessel_handle(id).await?;
        let guard = handle.lock().await;
        Ok(Vessel::clone(&guard))
    }

    /// Projections of every vessel in a space, ordered by id.
    pub async fn list_vessels(&self, space: &fleet_core::SpaceId) -> Result<Vec<VesselProjection>> {
        self.ensure_space(space).await?;
        let mut out = Vec::new();
        for (_, handle) in self.registry.space_handles(space) {
            out.push(handle.lock().await.projection());
        }
        Ok(out)
    }

    /// Write every live vessel back to the store and reconcile autopilot claims.
    ///
    /// Each vessel is written while its lock is held so a concurrent mutation
    /// can never be overwritten by an older copy.
    pub async fn checkpoint(&self) -> Result<usize> {
        let now = self.now();
        let mut written = 0usize;
        let mut handed = Vec::new();
        for (_, handle) in self.registry.all_handles() {
            let mut guard = handle.lock().await;
            if self.registry.sync_autopilot(&mut guard, now) == fleet_ai::Reconcile::HandedToAutopilot
            {
                handed.push((guard.space_id.clone(), guard.projection()));
            }
            let mut conn = self.pool.acquire().await?;
            vessels::upsert_vessel(&mut conn, &guard, now).await?;
            written += 1;
        }
        for (space, projection) in handed {
            self.publish_vessels(&space, [projection]);
        }
        debug!(written, "checkpoint complete");
        Ok(written)
    }

    pub(crate) async fn persist(&self, vessel: &Vessel, now: DateTime<Utc>) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        vessels::upsert_vessel(&mut conn, vessel, now).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use fleet_core::{ControlMode, EngineConfig, Position, SpaceId};
    use std::sync::Arc;

    async fn seed(engine: &Engine, id: &str, owner: Option<&str>, position: Position) {
        let now = engine.now();
        let mut v = Vessel::new(VesselId::from(id), SpaceId::from("global"), now);
        v.owner_id = owner.map(OperatorId::from);
        v.physical.position = position;
        engine.persist(&v, now).await.unwrap();
    }

    #[tokio::test]
    async fn join_takes_over_unowned_vessel() {
        let (engine, _) = engine().await;
        seed(&engine, "v1", None, Position::new(0.0, 0.0)).await;
        let s = session("alice");
        let p = engine.join(&s, None).await.unwrap();
        assert_eq!(p.id, VesselId::from("v1"));
        assert_eq!(p.mode, ControlMode::Player);
        assert_eq!(p.owner_id, Some(OperatorId::from("alice")));
        assert_eq!(p.helm, Some(OperatorId::from("alice")));
        assert!(!engine.registry().autopilot_claimed(&p.id));
    }

    #[tokio::test]
    async fn fallback_skips_vessels_owned_by_others() {
        let (engine, _) = engine().await;
        seed(&engine, "v1", Some("bob"), Position::new(0.0, 0.0)).await;
        let err = engine.join(&session("alice"), None).await.err().unwrap();
        assert_eq!(err.kind(), "unavailable");
    }

    #[tokio::test]
    async fn crew_limit_is_enforced() {
        let cfg = EngineConfig {
            max_crew: 2,
            ..EngineConfig::default()
        };
        let (engine, _) = engine_with(cfg).await;
        seed(&engine, "v1", None, Position::new(0.0, 0.0)).await;
        let target = VesselId::from("v1");
        engine.join(&session("a"), Some(&target)).await.unwrap();
        engine.join(&session("b"), Some(&target)).await.unwrap();
        let err = engine.join(&session("c"), Some(&target)).await.err().unwrap();
        assert_eq!(err.kind(), "capacity");
        // Rejoining the same vessel is not a new seat.
        engine.join(&session("a"), Some(&target)).await.unwrap();
    }

    #[tokio::test]
    async fn rank_gate_blocks_low_rank_operators() {
        let mut cfg = EngineConfig::default();
        cfg.space_min_rank.insert("global".into(), 3);
        let (engine, _) = engine_with(cfg).await;
        seed(&engine, "v1", None, Position::new(0.0, 0.0)).await;
        let err = engine.join(&session("rookie"), None).await.err().unwrap();
        assert_eq!(err.kind(), "unauthorized");
    }

    #[tokio::test]
    async fn leave_hands_back_to_autopilot() {
        let (engine, _) = engine().await;
        seed(&engine, "v1", None, Position::new(0.0, 0.0)).await;
        let s = session("alice");
        engine.join(&s, None).await.unwrap();
        let p = engine.leave(&s).await.unwrap().unwrap();
        assert_eq!(p.mode, ControlMode::Ai);
        assert!(p.crew_ids.is_empty());
        assert!(engine.registry().autopilot_claimed(&p.id));
        assert!(engine.leave(&s).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_requires_port_and_low_speed() {
        let (engine, _) = engine().await;
        seed(&engine, "v1", Some("alice"), Position::new(5000.0, 5000.0)).await;
        let s = session("alice");
        let id = VesselId::from("v1");
        engine.join(&s, Some(&id)).await.unwrap();
        let err = engine.store_vessel(&s, &id).await.err().unwrap();
        assert_eq!(err.kind(), "unavailable");

        let mut state = PhysicalState {
            position: Position::new(10.0, 10.0),
            ..PhysicalState::default()
        };
        state.velocity.surge = 1.0;
        engine.update_physical_state(&id, state).await.unwrap();
        assert!(engine.store_vessel(&s, &id).await.is_err());

        state.velocity.surge = 0.1;
        engine.update_physical_state(&id, state).await.unwrap();
        let p = engine.store_vessel(&s, &id).await.unwrap();
        assert_eq!(p.status, VesselStatus::Stored);
        assert!(p.crew_ids.is_empty());
        assert_eq!(engine.registry().crewed_vessel(&s.space_id, &s.operator_id), None);

        let err = engine.store_vessel(&session("mallory"), &id).await.err().unwrap();
        assert_eq!(err.kind(), "unauthorized");
    }

    #[tokio::test]
    async fn stations_respect_holders() {
        let (engine, _) = engine().await;
        seed(&engine, "v1", None, Position::new(0.0, 0.0)).await;
        let id = VesselId::from("v1");
        let (a, b) = (session("a"), session("b"));
        engine.join(&a, Some(&id)).await.unwrap();
        engine.join(&b, Some(&id)).await.unwrap();
        let err = engine
            .update_station(&b, &id, Station::Helm, true)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), "conflict");
        engine.update_station(&a, &id, Station::Helm, false).await.unwrap();
        let p = engine.update_station(&b, &id, Station::Helm, true).await.unwrap();
        assert_eq!(p.helm, Some(OperatorId::from("b")));
    }

    #[tokio::test]
    async fn checkpoint_persists_positions() {
        let (engine, _) = engine().await;
        seed(&engine, "v1", None, Position::new(0.0, 0.0)).await;
        engine.ensure_space(&SpaceId::from("global")).await.unwrap();
        let id = VesselId::from("v1");
        let state = PhysicalState {
            position: Position::new(42.0, -7.0),
            ..PhysicalState::default()
        };
        engine.update_physical_state(&id, state).await.unwrap();
        assert_eq!(engine.checkpoint().await.unwrap(), 1);
        let mut conn = engine.pool().acquire().await.unwrap();
        let stored = vessels::get_vessel(&mut conn, &id).await.unwrap().unwrap();
        assert_eq!(stored.physical.position, Position::new(42.0, -7.0));
    }

    #[tokio::test]
    async fn concurrent_joins_never_exceed_crew_limit() {
        let (engine, _) = engine().await;
        seed(&engine, "v1", None, Position::new(0.0, 0.0)).await;
        let id = VesselId::from("v1");
        let mut tasks = Vec::new();
        for i in 0..8 {
            let engine = Arc::clone(&engine);
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                engine.join(&session(&format!("op{i}")), Some(&id)).await.is_ok()
            }));
        }
        let mut joined = 0;
        for t in tasks {
            if t.await.unwrap() {
                joined += 1;
            }
        }
        assert_eq!(joined, 4);
        let v = engine.vessel(&id).await.unwrap();
        assert_eq!(v.crew.len(), 4);
        validate_vessel(&v).unwrap();
    }
}
