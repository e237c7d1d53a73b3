//! Engine tuning knobs and the default port registry.

use crate::{validate_ports, Port, PortId, PortSize, Position, ValidationError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Runtime configuration shared by every engine component.
///
/// All fields have defaults so a partial YAML file is accepted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum crew aboard a single vessel.
    pub max_crew: usize,
    /// Distance to the destination port at which a contract completes.
    pub delivery_radius_m: f64,
    /// Proximity radius used to decide whether a vessel is in a port.
    pub port_radius_m: f64,
    /// Vessels must be slower than this to be laid up.
    pub storage_speed_limit_mps: f64,
    /// Cargo listing generation interval.
    pub cargo_generation_secs: u64,
    /// Passenger listing generation interval.
    pub passenger_generation_secs: u64,
    /// Expiry sweep interval for both cargo and passengers.
    pub expiry_sweep_secs: u64,
    /// Loading/boarding promotion interval.
    pub promotion_secs: u64,
    /// Lease fee and lease expiry sweep interval.
    pub lease_sweep_secs: u64,
    /// Loan accrual and insurance premium sweep interval.
    pub finance_sweep_secs: u64,
    /// Interval at which live vessel state is written back to storage.
    pub checkpoint_secs: u64,
    /// Running cost sweep interval.
    pub operating_sweep_secs: u64,
    /// Length of one running-cost charge interval; rates below are per interval.
    pub charge_interval_secs: u64,
    /// Running cost with the engine idling.
    pub operating_base_cost: f64,
    /// Extra running cost at full throttle.
    pub operating_throttle_cost: f64,
    /// Extra running cost while making way, even with the engine off.
    pub operating_underway_cost: f64,
    /// Cost factor for a vessel lying still.
    pub idle_cost_multiplier: f64,
    /// Cost factor for a vessel coasting with the engine off.
    pub drift_cost_multiplier: f64,
    /// Wage paid to each crew member other than the billed operator.
    pub crew_wage: f64,
    /// Fee charged on arrival at a port.
    pub port_fee: i64,
    /// Base turnaround delay in minutes.
    pub turnaround_base_min: f64,
    /// Additional turnaround minutes at full congestion.
    pub turnaround_congestion_min: f64,
    /// Base vessel creation cost.
    pub vessel_base_cost: i64,
    /// Extra creation cost per rank above 1.
    pub vessel_rank_cost: i64,
    /// Base credit line available to every operator.
    pub loan_base_limit: i64,
    /// Extra credit line per rank.
    pub loan_rank_limit: i64,
    /// Default loan term.
    pub loan_term_days: i64,
    /// Default annual loan interest rate.
    pub loan_interest_rate: Decimal,
    /// Default insurance term.
    pub insurance_term_days: i64,
    /// Minimum rank needed to join a vessel in a given space.
    pub space_min_rank: BTreeMap<String, i64>,
    /// Seed for listing generation and id allocation.
    pub rng_seed: u64,
    /// Per-space broadcast channel capacity.
    pub broadcast_capacity: usize,
    /// Static port registry.
    pub ports: Vec<Port>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_crew: 4,
            delivery_radius_m: 260.0,
            port_radius_m: 250.0,
            storage_speed_limit_mps: 0.2,
            cargo_generation_secs: 5 * 60,
            passenger_generation_secs: 8 * 60,
            expiry_sweep_secs: 2 * 60,
            promotion_secs: 15,
            lease_sweep_secs: 60 * 60,
            finance_sweep_secs: 60 * 60,
            checkpoint_secs: 30,
            operating_sweep_secs: 60,
            charge_interval_secs: 10,
            operating_base_cost: 4.0,
            operating_throttle_cost: 18.0,
            operating_underway_cost: 2.0,
            idle_cost_multiplier: 0.1,
            drift_cost_multiplier: 0.35,
            crew_wage: 6.0,
            port_fee: 120,
            turnaround_base_min: 6.0,
            turnaround_congestion_min: 18.0,
            vessel_base_cost: 500,
            vessel_rank_cost: 250,
            loan_base_limit: 5000,
            loan_rank_limit: 2000,
            loan_term_days: 14,
            loan_interest_rate: Decimal::new(8, 2),
            insurance_term_days: 30,
            space_min_rank: BTreeMap::new(),
            rng_seed: 42,
            broadcast_capacity: 4096,
            ports: default_ports(),
        }
    }
}

impl EngineConfig {
    /// Reject nonsensical settings before the engine starts.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_crew == 0 {
            return Err(ValidationError::NonPositive("max_crew"));
        }
        crate::require_positive(self.delivery_radius_m, "delivery_radius_m")?;
        crate::require_positive(self.port_radius_m, "port_radius_m")?;
        crate::require_positive(self.storage_speed_limit_mps, "storage_speed_limit_mps")?;
        for (name, secs) in [
            ("cargo_generation_secs", self.cargo_generation_secs),
            ("passenger_generation_secs", self.passenger_generation_secs),
            ("expiry_sweep_secs", self.expiry_sweep_secs),
            ("promotion_secs", self.promotion_secs),
            ("lease_sweep_secs", self.lease_sweep_secs),
            ("finance_sweep_secs", self.finance_sweep_secs),
            ("checkpoint_secs", self.checkpoint_secs),
            ("operating_sweep_secs", self.operating_sweep_secs),
            ("charge_interval_secs", self.charge_interval_secs),
        ] {
            if secs == 0 {
                return Err(ValidationError::NonPositive(name));
            }
        }
        if self.turnaround_base_min < 0.0 || self.turnaround_congestion_min < 0.0 {
            return Err(ValidationError::OutOfRange {
                field: "turnaround",
                value: format!(
                    "{}+{}",
                    self.turnaround_base_min, self.turnaround_congestion_min
                ),
            });
        }
        if self.vessel_base_cost < 0 || self.vessel_rank_cost < 0 {
            return Err(ValidationError::OutOfRange {
                field: "vessel cost",
                value: format!("{}/{}", self.vessel_base_cost, self.vessel_rank_cost),
            });
        }
        for (field, rate) in [
            ("operating_base_cost", self.operating_base_cost),
            ("operating_throttle_cost", self.operating_throttle_cost),
            ("operating_underway_cost", self.operating_underway_cost),
            ("idle_cost_multiplier", self.idle_cost_multiplier),
            ("drift_cost_multiplier", self.drift_cost_multiplier),
            ("crew_wage", self.crew_wage),
        ] {
            if !rate.is_finite() || rate < 0.0 {
                return Err(ValidationError::OutOfRange {
                    field,
                    value: rate.to_string(),
                });
            }
        }
        if self.port_fee < 0 {
            return Err(ValidationError::OutOfRange {
                field: "port_fee",
                value: self.port_fee.to_string(),
            });
        }
        if self.loan_interest_rate < Decimal::ZERO {
            return Err(ValidationError::OutOfRange {
                field: "loan_interest_rate",
                value: self.loan_interest_rate.to_string(),
            });
        }
        if self.loan_term_days <= 0 {
            return Err(ValidationError::NonPositive("loan_term_days"));
        }
        if self.insurance_term_days <= 0 {
            return Err(ValidationError::NonPositive("insurance_term_days"));
        }
        if self.broadcast_capacity == 0 {
            return Err(ValidationError::NonPositive("broadcast_capacity"));
        }
        if self.ports.len() < 2 {
            return Err(ValidationError::OutOfRange {
                field: "ports",
                value: self.ports.len().to_string(),
            });
        }
        validate_ports(&self.ports)
    }

    /// Minimum rank required to join vessels in `space`.
    pub fn min_rank_for(&self, space: &str) -> i64 {
        self.space_min_rank.get(space).copied().unwrap_or(1)
    }

    pub fn port(&self, id: &PortId) -> Option<&Port> {
        self.ports.iter().find(|p| &p.id == id)
    }
}

/// The four harbours of the default world.
pub fn default_ports() -> Vec<Port> {
    let port = |id: &str, name: &str, size, region: &str, x, y| Port {
        id: PortId::from(id),
        name: name.to_string(),
        size,
        region: region.to_string(),
        position: Position::new(x, y),
    };
    vec![
        port("harbor-alpha", "Harbor Alpha", PortSize::Large, "north", 0.0, 0.0),
        port("bay-delta", "Bay Delta", PortSize::Medium, "south", 2000.0, -1500.0),
        port(
            "island-anchorage",
            "Island Anchorage",
            PortSize::Small,
            "islands",
            -2500.0,
            1200.0,
        ),
        port("channel-gate", "Channel Gate", PortSize::Medium, "east", 800.0, 2400.0),
    ]
}
