#![deny(warnings)]

//! Economic formulas for the harbor fleet economy.
//!
//! This module provides validated helpers for:
//! - Rank and safety score derivation used by the ledger
//! - Vessel creation cost and hold capacities
//! - Port congestion and turnaround delays
//! - Revenue share splits, loan limits and interest accrual
//! - Cargo and passenger pricing
//! - Running costs: operating state, fuel and crew wages, cargo liability
//!
//! Listing generation lives in [`generation`].

pub mod generation;

use chrono::Duration;
use fleet_core::{Adjustment, EconomyProfile, EngineConfig, HullProperties, PortId, PortSize};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Experience needed per rank step.
pub const EXPERIENCE_PER_RANK: i64 = 1000;
/// Safety score bounds.
pub const SAFETY_MIN: f64 = 0.0;
pub const SAFETY_MAX: f64 = 2.0;
/// Weight of a listed passenger contract in the port load.
pub const PASSENGER_LOAD_WEIGHT: f64 = 1.5;

const MS_PER_YEAR: i64 = 365 * 24 * 60 * 60 * 1000;

const KNOTS_PER_MPS: f64 = 1.943_84;
/// Below this speed with the engine off a vessel counts as idle.
const IDLE_SPEED_KTS: f64 = 0.3;
/// At or above this speed with the engine off a vessel is drifting.
const UNDERWAY_SPEED_KTS: f64 = 1.0;
/// Throttle below this is treated as engine off.
const THROTTLE_EPS: f64 = 0.03;

/// Errors produced by economic helpers.
#[derive(Debug, Error, PartialEq)]
pub enum EconError {
    /// Monetary amounts must be strictly positive.
    #[error("amount must be > 0, got {0}")]
    InvalidAmount(i64),
    /// Revenue share must be a fraction in [0, 1].
    #[error("invalid revenue share: {0}")]
    InvalidShare(Decimal),
    /// Numeric conversion failed or produced a non-finite value.
    #[error("non-finite numeric conversion")]
    NonFinite,
}

/// Rank derived from experience: `floor(experience / 1000) + 1`, never below 1.
pub fn rank_for_experience(experience: i64) -> i64 {
    (experience.div_euclid(EXPERIENCE_PER_RANK) + 1).max(1)
}

/// Clamp a safety score to [0, 2]. NaN collapses to the lower bound.
pub fn clamp_safety(score: f64) -> f64 {
    if score.is_nan() {
        return SAFETY_MIN;
    }
    score.clamp(SAFETY_MIN, SAFETY_MAX)
}

/// Pure mirror of the ledger update applied in storage.
///
/// Credits are not floor-checked; rank is re-derived from the new experience.
pub fn apply_adjustment(profile: EconomyProfile, adj: &Adjustment) -> EconomyProfile {
    let experience = profile.experience.saturating_add(adj.delta_experience);
    EconomyProfile {
        rank: rank_for_experience(experience),
        experience,
        credits: profile.credits.saturating_add(adj.delta_credits),
        safety_score: clamp_safety(profile.safety_score + adj.delta_safety_score),
    }
}

/// Cost of commissioning a new vessel at `rank`.
pub fn vessel_creation_cost(rank: i64, cfg: &EngineConfig) -> i64 {
    cfg.vessel_base_cost + cfg.vessel_rank_cost * (rank.max(1) - 1)
}

/// Cargo hold capacity in tonnes: 3% of displacement.
pub fn cargo_capacity_tons(hull: &HullProperties) -> f64 {
    (hull.mass_kg * 0.03 / 1000.0).max(0.0)
}

/// Passenger capacity: `max(4, round(length × 0.6))`.
pub fn passenger_capacity(hull: &HullProperties) -> i64 {
    let seats = (hull.length_m * 0.6).round();
    if !seats.is_finite() {
        return 4;
    }
    (seats as i64).max(4)
}

/// Congestion of one port in [0, 1].
pub fn port_congestion(size: PortSize, listed_cargo: u32, listed_passengers: u32) -> f64 {
    let load = f64::from(listed_cargo) + PASSENGER_LOAD_WEIGHT * f64::from(listed_passengers);
    (load / f64::from(size.listing_ceiling())).clamp(0.0, 1.0)
}

/// Congestion figure reported to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortCongestion {
    pub port_id: PortId,
    pub congestion: f64,
}

/// Loading or boarding delay: base plus a congestion-proportional surcharge.
pub fn turnaround_delay(congestion: f64, cfg: &EngineConfig) -> Duration {
    let c = if congestion.is_finite() {
        congestion.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let minutes = cfg.turnaround_base_min + cfg.turnaround_congestion_min * c;
    Duration::milliseconds((minutes * 60_000.0).round() as i64)
}

/// Split earnings between the earner and a lease owner.
///
/// The owner receives `floor(delta × share)`; the earner keeps the rest.
/// Non-positive deltas are never shared.
pub fn revenue_share_split(delta: i64, share: Decimal) -> Result<(i64, i64), EconError> {
    if share < Decimal::ZERO || share > Decimal::ONE {
        return Err(EconError::InvalidShare(share));
    }
    if delta <= 0 || share.is_zero() {
        return Ok((delta, 0));
    }
    let owner = (Decimal::from(delta) * share)
        .floor()
        .to_i64()
        .ok_or(EconError::NonFinite)?;
    Ok((delta - owner, owner))
}

/// Total outstanding credit allowed at `rank`.
pub fn loan_limit(rank: i64, cfg: &EngineConfig) -> i64 {
    cfg.loan_base_limit + cfg.loan_rank_limit * rank.max(1)
}

/// Simple interest accrued over `elapsed_ms`: `balance × rate × dt / year`.
pub fn accrue_interest(balance: Decimal, annual_rate: Decimal, elapsed_ms: i64) -> Decimal {
    if balance <= Decimal::ZERO || elapsed_ms <= 0 {
        return Decimal::ZERO;
    }
    balance * annual_rate * Decimal::from(elapsed_ms) / Decimal::from(MS_PER_YEAR)
}

/// Cargo types carried by small craft; these weigh 2–16 t instead of 18–80 t.
pub fn is_small_craft_cargo(cargo_type: &str) -> bool {
    matches!(cargo_type, "fish" | "parcels" | "supplies")
}

/// Value multiplier per cargo type.
pub fn cargo_type_multiplier(cargo_type: &str) -> f64 {
    match cargo_type {
        "hazardous" => 1.8,
        "refrigerated" => 1.4,
        "fish" => 1.2,
        "parcels" => 1.1,
        _ => 1.0,
    }
}

/// Declared value: `round(weight × 120 × multiplier)`.
pub fn cargo_value(weight_tons: f64, cargo_type: &str) -> Result<i64, EconError> {
    let v = (weight_tons * 120.0 * cargo_type_multiplier(cargo_type)).round();
    if !v.is_finite() {
        return Err(EconError::NonFinite);
    }
    Ok(v as i64)
}

/// Delivery reward: `round(value × 1.15)`.
pub fn cargo_reward(value: i64) -> i64 {
    (value as f64 * 1.15).round() as i64
}

/// Reward fallback for regenerated lots that lost their reward.
pub fn cargo_regenerated_reward(value: i64) -> i64 {
    (value as f64 * 1.1).round() as i64
}

/// Liability rate: 2% for hazardous cargo, 1% otherwise.
pub fn liability_rate(cargo_type: &str) -> Decimal {
    if cargo_type == "hazardous" {
        Decimal::new(2, 2)
    } else {
        Decimal::new(1, 2)
    }
}

/// Passenger reward: `round(count × 45 × multiplier)`, taxis pay 1.6×.
pub fn passenger_reward(pax_count: i64, passenger_type: &str) -> i64 {
    let mult = if passenger_type == "water_taxi" { 1.6 } else { 1.0 };
    (pax_count as f64 * 45.0 * mult).round() as i64
}

/// How a vessel is being worked, for running-cost purposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpState {
    Idle,
    Drifting,
    Underway,
}

/// Classify from speed over ground (m/s) and throttle.
pub fn classify_op_state(speed_mps: f64, throttle: f64) -> OpState {
    let kts = speed_mps * KNOTS_PER_MPS;
    let engine_off = throttle.abs() < THROTTLE_EPS;
    if engine_off && kts < IDLE_SPEED_KTS {
        OpState::Idle
    } else if engine_off && kts >= UNDERWAY_SPEED_KTS {
        OpState::Drifting
    } else {
        OpState::Underway
    }
}

/// Running cost over `intervals` charge intervals.
///
/// `(base + throttle_cost × |throttle| + underway) × intervals × multiplier`,
/// where the underway surcharge is waived for idle vessels.
pub fn operating_cost(state: OpState, throttle: f64, intervals: f64, cfg: &EngineConfig) -> f64 {
    let usage = if throttle.is_finite() { throttle.abs().min(1.0) } else { 0.0 };
    let propulsion = cfg.operating_base_cost + cfg.operating_throttle_cost * usage;
    let (underway, multiplier) = match state {
        OpState::Idle => (0.0, cfg.idle_cost_multiplier),
        OpState::Drifting => (cfg.operating_underway_cost, cfg.drift_cost_multiplier),
        OpState::Underway => (cfg.operating_underway_cost, 1.0),
    };
    let cost = (propulsion + underway) * intervals.max(0.0) * multiplier;
    if cost.is_finite() {
        cost
    } else {
        0.0
    }
}

/// Whole credits for a fractional charge, never negative.
pub fn whole_credits(amount: f64) -> i64 {
    let rounded = amount.round();
    if !rounded.is_finite() || rounded <= 0.0 {
        return 0;
    }
    rounded.min(i64::MAX as f64) as i64
}

/// Running cost actually billed: rounded and capped at what the payer holds.
pub fn billable_operating_cost(cost: f64, available: i64) -> i64 {
    whole_credits(cost).min(available.max(0))
}

/// Wage owed to one crew member for `intervals`.
pub fn crew_wage(intervals: f64, cfg: &EngineConfig) -> i64 {
    whole_credits(cfg.crew_wage * intervals)
}

/// Liability on a loaded lot for `intervals`: `value × rate × intervals`.
pub fn cargo_liability(value: i64, rate: Decimal, intervals: f64) -> i64 {
    let rate = rate.to_f64().unwrap_or(0.0);
    whole_credits(value as f64 * rate * intervals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rank_steps_every_thousand() {
        assert_eq!(rank_for_experience(0), 1);
        assert_eq!(rank_for_experience(999), 1);
        assert_eq!(rank_for_experience(1000), 2);
        assert_eq!(rank_for_experience(2500), 3);
        assert_eq!(rank_for_experience(-50), 1);
    }

    #[test]
    fn adjustment_clamps_safety_but_not_credits() {
        let p = EconomyProfile::default();
        let adj = Adjustment {
            delta_credits: -200,
            delta_experience: 1200,
            delta_safety_score: 5.0,
            ..Adjustment::default()
        };
        let next = apply_adjustment(p, &adj);
        assert_eq!(next.credits, -200);
        assert_eq!(next.rank, 2);
        assert_eq!(next.safety_score, 2.0);
    }

    #[test]
    fn creation_cost_by_rank() {
        let cfg = EngineConfig::default();
        assert_eq!(vessel_creation_cost(1, &cfg), 500);
        assert_eq!(vessel_creation_cost(3, &cfg), 1000);
    }

    #[test]
    fn capacities_from_hull() {
        let hull = HullProperties {
            mass_kg: 500_000.0,
            length_m: 30.0,
        };
        assert!((cargo_capacity_tons(&hull) - 15.0).abs() < 1e-9);
        assert_eq!(passenger_capacity(&hull), 18);
        let dinghy = HullProperties {
            mass_kg: 800.0,
            length_m: 3.0,
        };
        assert_eq!(passenger_capacity(&dinghy), 4);
    }

    #[test]
    fn congestion_and_turnaround() {
        let cfg = EngineConfig::default();
        assert_eq!(port_congestion(PortSize::Small, 0, 0), 0.0);
        assert!((port_congestion(PortSize::Medium, 4, 2) - 0.5).abs() < 1e-9);
        assert_eq!(port_congestion(PortSize::Small, 30, 30), 1.0);
        assert_eq!(turnaround_delay(0.0, &cfg), Duration::minutes(6));
        assert_eq!(turnaround_delay(1.0, &cfg), Duration::minutes(24));
        assert_eq!(turnaround_delay(0.5, &cfg), Duration::minutes(15));
    }

    #[test]
    fn revenue_share_floor() {
        assert_eq!(revenue_share_split(1000, Decimal::new(25, 2)).unwrap(), (750, 250));
        assert_eq!(revenue_share_split(7, Decimal::new(5, 1)).unwrap(), (4, 3));
        assert_eq!(revenue_share_split(-50, Decimal::new(5, 1)).unwrap(), (-50, 0));
        assert!(revenue_share_split(10, Decimal::new(11, 1)).is_err());
    }

    #[test]
    fn pricing_tables() {
        assert_eq!(cargo_value(10.0, "hazardous").unwrap(), 2160);
        assert_eq!(cargo_reward(2160), 2484);
        assert_eq!(liability_rate("hazardous"), Decimal::new(2, 2));
        assert_eq!(liability_rate("bulk"), Decimal::new(1, 2));
        assert_eq!(passenger_reward(4, "water_taxi"), 288);
        assert_eq!(passenger_reward(20, "ferry"), 900);
    }

    #[test]
    fn op_state_thresholds() {
        assert_eq!(classify_op_state(0.0, 0.0), OpState::Idle);
        assert_eq!(classify_op_state(0.1, 0.01), OpState::Idle);
        // Between the idle and drift speeds with the engine off.
        assert_eq!(classify_op_state(0.3, 0.0), OpState::Underway);
        assert_eq!(classify_op_state(1.0, 0.0), OpState::Drifting);
        assert_eq!(classify_op_state(0.0, -0.5), OpState::Underway);
    }

    #[test]
    fn running_costs() {
        let cfg = EngineConfig::default();
        assert!((operating_cost(OpState::Idle, 0.0, 6.0, &cfg) - 2.4).abs() < 1e-9);
        assert!((operating_cost(OpState::Underway, 1.0, 6.0, &cfg) - 144.0).abs() < 1e-9);
        assert!((operating_cost(OpState::Drifting, 0.0, 6.0, &cfg) - 12.6).abs() < 1e-9);
        assert_eq!(operating_cost(OpState::Underway, f64::NAN, 1.0, &cfg), 6.0);
        assert_eq!(billable_operating_cost(144.0, 50), 50);
        assert_eq!(billable_operating_cost(144.0, -10), 0);
        assert_eq!(billable_operating_cost(2.4, 1000), 2);
        assert_eq!(crew_wage(6.0, &cfg), 36);
        assert_eq!(cargo_liability(400, Decimal::new(1, 2), 6.0), 24);
        assert_eq!(cargo_liability(400, Decimal::ZERO, 6.0), 0);
    }

    #[test]
    fn interest_over_a_year() {
        let year = MS_PER_YEAR;
        let i = accrue_interest(Decimal::new(1000, 0), Decimal::new(8, 2), year);
        assert_eq!(i, Decimal::new(80, 0));
        assert_eq!(accrue_interest(Decimal::ZERO, Decimal::new(8, 2), year), Decimal::ZERO);
        assert_eq!(loan_limit(1, &EngineConfig::default()), 7000);
    }

    proptest! {
        #[test]
        fn rank_is_monotonic(a in 0i64..10_000_000, b in 0i64..10_000_000) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(rank_for_experience(lo) <= rank_for_experience(hi));
            prop_assert!(rank_for_experience(lo) >= 1);
        }

        #[test]
        fn congestion_monotonic(c in 0u32..50, p in 0u32..50) {
            for size in [PortSize::Small, PortSize::Medium, PortSize::Large] {
                let base = port_congestion(size, c, p);
                prop_assert!((0.0..=1.0).contains(&base));
                prop_assert!(port_congestion(size, c + 1, p) >= base);
                prop_assert!(port_congestion(size, c, p + 1) >= base);
            }
        }

        #[test]
        fn share_conserves_credits(delta in 1i64..1_000_000, pct in 0i64..=100) {
            let (earner, owner) = revenue_share_split(delta, Decimal::new(pct, 2)).unwrap();
            prop_assert_eq!(earner + owner, delta);
            prop_assert!(owner >= 0);
        }

        #[test]
        fn safety_always_bounded(s in -10.0f64..10.0) {
            let c = clamp_safety(s);
            prop_assert!((SAFETY_MIN..=SAFETY_MAX).contains(&c));
        }
    }
}
