//! Fan-out of vessel deltas per space and operator-scoped economy updates.
//!
//! Publishing never blocks the mutator: `tokio::sync::broadcast` drops the
//! oldest messages for lagging subscribers instead.

use fleet_core::{EconomyProfile, OperatorId, SpaceId, VesselId, VesselProjection};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::trace;

/// Partial world update pushed to every observer of a space.
#[derive(Clone, Debug, Serialize)]
pub struct SpaceUpdate {
    #[serde(skip)]
    pub space_id: SpaceId,
    pub vessels: BTreeMap<VesselId, VesselProjection>,
    pub partial: bool,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

/// New ledger state for one operator.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EconomyUpdate {
    pub operator_id: OperatorId,
    #[serde(flatten)]
    pub profile: EconomyProfile,
}

/// Channels for space and economy events.
#[derive(Debug)]
pub struct Broadcaster {
    capacity: usize,
    spaces: RwLock<HashMap<SpaceId, broadcast::Sender<SpaceUpdate>>>,
    economy: broadcast::Sender<EconomyUpdate>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (economy, _) = broadcast::channel(capacity);
        Self {
            capacity,
            spaces: RwLock::new(HashMap::new()),
            economy,
        }
    }

    fn sender(&self, space: &SpaceId) -> broadcast::Sender<SpaceUpdate> {
        if let Some(tx) = self
            .spaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(space)
        {
            return tx.clone();
        }
        self.spaces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(space.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub fn subscribe_space(&self, space: &SpaceId) -> broadcast::Receiver<SpaceUpdate> {
        self.sender(space).subscribe()
    }

    pub fn subscribe_economy(&self) -> broadcast::Receiver<EconomyUpdate> {
        self.economy.subscribe()
    }

    /// Publish vessel projections to a space. No-op for an empty batch.
    pub fn publish_vessels(
        &self,
        space: &SpaceId,
        projections: impl IntoIterator<Item = VesselProjection>,
        timestamp: i64,
    ) {
        let vessels: BTreeMap<VesselId, VesselProjection> = projections
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        if vessels.is_empty() {
            return;
        }
        let count = vessels.len();
        let update = SpaceUpdate {
            space_id: space.clone(),
            vessels,
            partial: true,
            timestamp,
        };
        // Err only means nobody is listening.
        let _ = self.sender(space).send(update);
        trace!(space_id = %space, count, "space update published");
    }

    pub fn publish_economy(&self, operator: &OperatorId, profile: EconomyProfile) {
        let _ = self.economy.send(EconomyUpdate {
            operator_id: operator.clone(),
            profile,
        });
    }
}
