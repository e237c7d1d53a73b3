//! In-memory vessel registry, partitioned by space.
//!
//! The space map sits behind a short-lived `std::sync::RwLock` that is never
//! held across an await. Each vessel lives behind its own
//! `tokio::sync::Mutex`, which operations hold across persistence so a
//! check-then-act on one vessel is never interleaved with another.

use chrono::{DateTime, Utc};
use fleet_ai::{AutopilotRegistry, Reconcile};
use fleet_core::{OperatorId, SpaceId, Vessel, VesselId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

pub type VesselHandle = Arc<tokio::sync::Mutex<Vessel>>;
pub type VesselGuard = OwnedMutexGuard<Vessel>;
pub type OperatorGuard = OwnedMutexGuard<()>;

#[derive(Debug, Default)]
struct SpaceVessels {
    vessels: HashMap<VesselId, VesselHandle>,
    /// Which vessel each operator is crewing in this space.
    crew: HashMap<OperatorId, VesselId>,
}

#[derive(Debug, Default)]
pub struct Registry {
    spaces: RwLock<HashMap<SpaceId, SpaceVessels>>,
    loaded: RwLock<HashSet<SpaceId>>,
    /// Serialises store loads so a space is read only once.
    pub(crate) load_lock: tokio::sync::Mutex<()>,
    /// One lock per operator and space; taken before any vessel lock by
    /// operations that move the operator between vessels.
    operators: Mutex<HashMap<(SpaceId, OperatorId), Arc<tokio::sync::Mutex<()>>>>,
    autopilot: Mutex<AutopilotRegistry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self, space: &SpaceId) -> bool {
        self.loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(space)
    }

    /// Install vessels read from the store and mark the space loaded.
    ///
    /// Vessels already present in memory win over their stored copy.
    pub fn install_space(&self, space: &SpaceId, vessels: Vec<Vessel>, now: DateTime<Utc>) {
        let mut spaces = self.spaces.write().unwrap_or_else(PoisonError::into_inner);
        let entry = spaces.entry(space.clone()).or_default();
        let mut autopilot = self.autopilot.lock().unwrap_or_else(PoisonError::into_inner);
        let mut count = 0usize;
        for mut vessel in vessels {
            if entry.vessels.contains_key(&vessel.id) {
                continue;
            }
            if autopilot.sync(&mut vessel, now) == Reconcile::HandedToAutopilot {
                debug!(vessel_id = %vessel.id, "loaded vessel handed to autopilot");
            }
            entry
                .vessels
                .insert(vessel.id.clone(), Arc::new(tokio::sync::Mutex::new(vessel)));
            count += 1;
        }
        drop(autopilot);
        drop(spaces);
        self.loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(space.clone());
        debug!(space_id = %space, count, "space loaded");
    }

    /// Register a vessel built in memory and return its handle.
    pub fn insert(&self, vessel: Vessel) -> VesselHandle {
        let space = vessel.space_id.clone();
        let id = vessel.id.clone();
        let handle = Arc::new(tokio::sync::Mutex::new(vessel));
        self.spaces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(space)
            .or_default()
            .vessels
            .insert(id, handle.clone());
        handle
    }

    pub fn get(&self, space: &SpaceId, id: &VesselId) -> Option<VesselHandle> {
        self.spaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(space)
            .and_then(|s| s.vessels.get(id).cloned())
    }

    /// Look a vessel up in any loaded space.
    pub fn find(&self, id: &VesselId) -> Option<VesselHandle> {
        self.spaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find_map(|s| s.vessels.get(id).cloned())
    }

    /// Handles of every vessel in a space, ordered by id.
    pub fn space_handles(&self, space: &SpaceId) -> Vec<(VesselId, VesselHandle)> {
        let spaces = self.spaces.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<(VesselId, VesselHandle)> = spaces
            .get(space)
            .map(|s| {
                s.vessels
                    .iter()
                    .map(|(id, h)| (id.clone(), h.clone()))
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn all_handles(&self) -> Vec<(VesselId, VesselHandle)> {
        let spaces = self.spaces.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<(VesselId, VesselHandle)> = spaces
            .values()
            .flat_map(|s| s.vessels.iter().map(|(id, h)| (id.clone(), h.clone())))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn spaces(&self) -> Vec<SpaceId> {
        let mut out: Vec<SpaceId> = self
            .spaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        out.sort();
        out
    }

    /// Vessel the operator is currently crewing in `space`.
    pub fn crewed_vessel(&self, space: &SpaceId, operator: &OperatorId) -> Option<VesselId> {
        self.spaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(space)
            .and_then(|s| s.crew.get(operator).cloned())
    }

    /// Record the operator as crewing `vessel`.
    pub fn set_crewed(&self, space: &SpaceId, operator: &OperatorId, vessel: &VesselId) {
        self.spaces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(space.clone())
            .or_default()
            .crew
            .insert(operator.clone(), vessel.clone());
    }

    /// Forget the operator's crew entry if it still points at `vessel`.
    pub fn clear_crewed(&self, space: &SpaceId, operator: &OperatorId, vessel: &VesselId) {
        let mut spaces = self.spaces.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(s) = spaces.get_mut(space) {
            if s.crew.get(operator) == Some(vessel) {
                s.crew.remove(operator);
            }
        }
    }

    /// Drop every crew entry pointing at `vessel`.
    pub fn clear_vessel_crew(&self, space: &SpaceId, vessel: &VesselId) {
        let mut spaces = self.spaces.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(s) = spaces.get_mut(space) {
            s.crew.retain(|_, v| v != vessel);
        }
    }

    /// Serialise crew moves of one operator within a space.
    pub async fn lock_operator(&self, space: &SpaceId, operator: &OperatorId) -> OperatorGuard {
        let lock = self
            .operators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((space.clone(), operator.clone()))
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Bring a vessel's autopilot claim in line with its crew.
    pub fn sync_autopilot(&self, vessel: &mut Vessel, now: DateTime<Utc>) -> Reconcile {
        self.autopilot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sync(vessel, now)
    }

    pub fn autopilot_claimed(&self, id: &VesselId) -> bool {
        self.autopilot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_claimed(id)
    }
}

/// Lock two distinct vessels in id order.
///
/// Returns the guards in argument order.
pub async fn lock_pair(
    a: (&VesselId, &VesselHandle),
    b: (&VesselId, &VesselHandle),
) -> (VesselGuard, VesselGuard) {
    if a.0 <= b.0 {
        let ga = a.1.clone().lock_owned().await;
        let gb = b.1.clone().lock_owned().await;
        (ga, gb)
    } else {
        let gb = b.1.clone().lock_owned().await;
        let ga = a.1.clone().lock_owned().await;
        (ga, gb)
    }
}
