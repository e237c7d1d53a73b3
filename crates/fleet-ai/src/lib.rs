#![deny(warnings)]

//! Autonomous fallback control for uncrewed vessels.
//!
//! The registry tracks which vessels are held by the fallback controller.
//! A claimed vessel holds neutral controls until an operator joins; joining
//! drops the claim. [`reconcile`] repairs vessels whose crew emptied without
//! control being handed back.

use chrono::{DateTime, Utc};
use fleet_core::{ControlMode, Controls, Vessel, VesselId, VesselStatus};
use std::collections::HashMap;
use tracing::debug;

/// Fallback controller hold on one vessel.
#[derive(Clone, Debug, PartialEq)]
pub struct AutopilotClaim {
    pub vessel_id: VesselId,
    pub claimed_at: DateTime<Utc>,
}

/// Result of reconciling a single vessel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reconcile {
    /// Nothing to change.
    Unchanged,
    /// Uncrewed vessel was still in player mode and was handed to the autopilot.
    HandedToAutopilot,
}

/// Largest damping command the station keeper issues.
const MAX_HOLD_COMMAND: f64 = 0.3;

/// Controls the fallback controller applies.
///
/// Afloat vessels damp their residual motion to hold station; vessels laid up
/// or seized stay idle.
pub fn autopilot_controls(vessel: &Vessel) -> Controls {
    match vessel.status {
        VesselStatus::Stored | VesselStatus::Repossession => Controls::default(),
        _ => {
            let v = vessel.physical.velocity;
            Controls {
                throttle: (-0.5 * v.surge).clamp(-MAX_HOLD_COMMAND, MAX_HOLD_COMMAND),
                rudder_angle: 0.0,
                bow_thruster: (-0.5 * v.sway).clamp(-MAX_HOLD_COMMAND, MAX_HOLD_COMMAND),
            }
        }
    }
}

/// Flip an uncrewed player-mode vessel back to autonomous control.
pub fn reconcile(vessel: &mut Vessel, now: DateTime<Utc>) -> Reconcile {
    if vessel.crew.is_empty() && vessel.mode == ControlMode::Player {
        vessel.mode = ControlMode::Ai;
        vessel.desired_mode = ControlMode::Ai;
        vessel.stations.clear();
        vessel.neutral_controls();
        vessel.last_update = now;
        debug!(vessel_id = %vessel.id, "uncrewed vessel returned to autopilot");
        return Reconcile::HandedToAutopilot;
    }
    Reconcile::Unchanged
}

/// Vessels currently driven by the fallback controller.
#[derive(Debug, Default)]
pub struct AutopilotRegistry {
    claims: HashMap<VesselId, AutopilotClaim>,
}

impl AutopilotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take an uncrewed vessel under autonomous control.
    ///
    /// Returns false if the vessel has crew or is already claimed.
    pub fn claim(&mut self, vessel: &mut Vessel, now: DateTime<Utc>) -> bool {
        if !vessel.crew.is_empty() || self.claims.contains_key(&vessel.id) {
            return false;
        }
        vessel.mode = ControlMode::Ai;
        vessel.controls = autopilot_controls(vessel);
        self.claims.insert(
            vessel.id.clone(),
            AutopilotClaim {
                vessel_id: vessel.id.clone(),
                claimed_at: now,
            },
        );
        true
    }

    /// Drop the claim on a vessel an operator is taking over.
    pub fn release(&mut self, vessel_id: &VesselId) -> Option<AutopilotClaim> {
        self.claims.remove(vessel_id)
    }

    pub fn is_claimed(&self, vessel_id: &VesselId) -> bool {
        self.claims.contains_key(vessel_id)
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Reconcile a vessel and keep the claim set in step with its crew.
    pub fn sync(&mut self, vessel: &mut Vessel, now: DateTime<Utc>) -> Reconcile {
        let outcome = reconcile(vessel, now);
        if vessel.crew.is_empty() {
            self.claim(vessel, now);
        } else {
            self.release(&vessel.id);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{validate_vessel, OperatorId, SpaceId};
    use proptest::prelude::*;

    fn vessel(id: &str) -> Vessel {
        Vessel::new(VesselId::from(id), SpaceId::from("global"), Utc::now())
    }

    #[test]
    fn claim_and_release() {
        let now = Utc::now();
        let mut reg = AutopilotRegistry::new();
        let mut v = vessel("v1");
        v.controls.throttle = 0.8;
        assert!(reg.claim(&mut v, now));
        assert!(!reg.claim(&mut v, now));
        assert_eq!(v.controls, Controls::default());
        assert!(reg.is_claimed(&v.id));
        assert!(reg.release(&v.id).is_some());
        assert!(reg.is_empty());
    }

    #[test]
    fn drifting_vessel_is_damped() {
        let mut v = vessel("v1");
        v.physical.velocity.surge = 2.0;
        v.physical.velocity.sway = -0.2;
        let c = autopilot_controls(&v);
        assert_eq!(c.throttle, -MAX_HOLD_COMMAND);
        assert!((c.bow_thruster - 0.1).abs() < 1e-9);
        v.status = VesselStatus::Stored;
        assert_eq!(autopilot_controls(&v), Controls::default());
    }

    #[test]
    fn crewed_vessels_cannot_be_claimed() {
        let now = Utc::now();
        let mut reg = AutopilotRegistry::new();
        let mut v = vessel("v1");
        v.add_crew(&OperatorId::from("a"), "Ann", now);
        assert!(!reg.claim(&mut v, now));
        assert_eq!(v.mode, ControlMode::Player);
    }

    #[test]
    fn reconcile_repairs_stale_player_mode() {
        let now = Utc::now();
        let mut reg = AutopilotRegistry::new();
        let mut v = vessel("v1");
        v.mode = ControlMode::Player;
        assert_eq!(reg.sync(&mut v, now), Reconcile::HandedToAutopilot);
        assert_eq!(v.mode, ControlMode::Ai);
        assert!(reg.is_claimed(&v.id));
        assert_eq!(reg.sync(&mut v, now), Reconcile::Unchanged);
    }

    proptest! {
        #[test]
        fn sync_restores_crew_mode_invariant(joins in proptest::collection::vec(any::<bool>(), 0..20)) {
            let now = Utc::now();
            let mut reg = AutopilotRegistry::new();
            let mut v = vessel("v1");
            for (i, join) in joins.iter().enumerate() {
                let op = OperatorId::new(format!("op{}", i % 3));
                if *join {
                    v.add_crew(&op, "x", now);
                } else {
                    v.remove_crew(&op, now);
                }
                reg.sync(&mut v, now);
                prop_assert!(validate_vessel(&v).is_ok());
                prop_assert_eq!(reg.is_claimed(&v.id), v.crew.is_empty());
            }
        }
    }
}
