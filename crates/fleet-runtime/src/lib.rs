#![deny(warnings)]

//! Authoritative runtime for the shared fleet world.
//!
//! [`Engine`] owns the in-memory vessel registry, the SQLite pool and the
//! broadcast channels. Gateway requests are validated at the boundary,
//! mutate a vessel while holding its lock, persist (multi-entity changes in
//! one transaction) and then publish partial projections to observers of the
//! vessel's space. Sweeps for listings, leases and finance run on their own
//! timers through [`Engine::tick`], as does running-cost billing.
//!
//! Lock order is the operator's crew lock (join, create and leave only), then
//! vessel locks (two vessels in id order), then a pool connection. Nothing
//! holds a connection while waiting on a vessel.

pub mod broadcast;
pub mod clock;
pub mod error;
pub mod finance;
pub mod gateway;
pub mod ledger;
pub mod logistics;
pub mod market;
pub mod operating;
pub mod registry;
pub mod sweeps;
pub mod vessels;

pub use broadcast::{Broadcaster, EconomyUpdate, SpaceUpdate};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{GatewayError, Result};
pub use gateway::{Reply, Request, Response, Session};
pub use sweeps::TickReport;

use chrono::{DateTime, Utc};
use fleet_core::{
    resolve_port_for_position, EconomyProfile, EngineConfig, OperatorId, Port, Position, SpaceId,
    Vessel, VesselId, VesselProjection,
};
use fleet_econ::generation::ListingGenerator;
use registry::{Registry, VesselHandle};
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex, PoisonError};
use sweeps::Sweeps;
use tracing::info;

pub struct Engine {
    cfg: EngineConfig,
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    registry: Registry,
    broadcaster: Broadcaster,
    generator: Mutex<ListingGenerator>,
    sweeps: Sweeps,
    charge_marks: Mutex<operating::ChargeMarks>,
}

impl Engine {
    /// Build an engine over an initialised pool. Rejects invalid configuration.
    pub fn new(cfg: EngineConfig, pool: SqlitePool, clock: Arc<dyn Clock>) -> Result<Self> {
        cfg.validate()?;
        info!(
            ports = cfg.ports.len(),
            max_crew = cfg.max_crew,
            seed = cfg.rng_seed,
            "engine configured"
        );
        Ok(Self {
            broadcaster: Broadcaster::new(cfg.broadcast_capacity),
            generator: Mutex::new(ListingGenerator::new(cfg.rng_seed)),
            sweeps: Sweeps::from_config(&cfg),
            charge_marks: Mutex::default(),
            registry: Registry::new(),
            cfg,
            pool,
            clock,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn next_id(&self, prefix: &str) -> String {
        self.generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_id(prefix, self.clock.now())
    }

    pub(crate) fn with_generator<T>(&self, f: impl FnOnce(&mut ListingGenerator) -> T) -> T {
        let mut generator = self.generator.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut generator)
    }

    /// Port whose proximity radius contains `position`.
    pub fn port_at(&self, position: &Position) -> Option<&Port> {
        resolve_port_for_position(&self.cfg.ports, position, self.cfg.port_radius_m)
    }

    /// Load a space's vessels from the store the first time it is touched.
    pub async fn ensure_space(&self, space: &SpaceId) -> Result<()> {
        if self.registry.is_loaded(space) {
            return Ok(());
        }
        let _loading = self.registry.load_lock.lock().await;
        if self.registry.is_loaded(space) {
            return Ok(());
        }
        let vessels = {
            let mut conn = self.pool.acquire().await?;
            persistence::vessels::list_space_vessels(&mut conn, space).await?
        };
        self.registry.install_space(space, vessels, self.now());
        Ok(())
    }

    /// Handle of a vessel, loading its space from the store if needed.
    pub(crate) async fn vessel_handle(&self, id: &VesselId) -> Result<VesselHandle> {
        if let Some(handle) = self.registry.find(id) {
            return Ok(handle);
        }
        let stored: Option<Vessel> = {
            let mut conn = self.pool.acquire().await?;
            persistence::vessels::get_vessel(&mut conn, id).await?
        };
        let Some(stored) = stored else {
            return Err(GatewayError::not_found("vessel", id.as_str()));
        };
        self.ensure_space(&stored.space_id).await?;
        match self.registry.find(id) {
            Some(handle) => Ok(handle),
            None => Ok(self.registry.insert(stored)),
        }
    }

    pub(crate) fn publish_vessels(
        &self,
        space: &SpaceId,
        projections: impl IntoIterator<Item = VesselProjection>,
    ) {
        self.broadcaster
            .publish_vessels(space, projections, self.now().timestamp_millis());
    }

    pub(crate) fn publish_profiles(
        &self,
        profiles: impl IntoIterator<Item = (OperatorId, EconomyProfile)>,
    ) {
        for (operator, profile) in profiles {
            self.broadcaster.publish_economy(&operator, profile);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn rejects_invalid_config() {
        let pool = persistence::memory_pool().await.unwrap();
        let cfg = EngineConfig {
            max_crew: 0,
            ..EngineConfig::default()
        };
        let err = Engine::new(cfg, pool, Arc::new(SystemClock)).err().unwrap();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn unknown_vessel_is_not_found() {
        let (engine, _) = engine().await;
        let err = engine
            .vessel_handle(&VesselId::from("nope"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn port_lookup_uses_configured_radius() {
        let cfg = EngineConfig::default();
        let near = Position::new(cfg.ports[1].position.x + 100.0, cfg.ports[1].position.y);
        let ports = cfg.ports.clone();
        let found = resolve_port_for_position(&ports, &near, cfg.port_radius_m).unwrap();
        assert_eq!(found.id, ports[1].id);
    }
}
