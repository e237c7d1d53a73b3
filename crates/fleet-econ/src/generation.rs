//! Seeded generation of cargo lots and passenger contracts.

use crate::{
    cargo_regenerated_reward, cargo_reward, cargo_value, is_small_craft_cargo, liability_rate,
    passenger_reward, EconError,
};
use chrono::{DateTime, Duration, Utc};
use fleet_core::{CargoLot, CargoStatus, PassengerContract, PassengerStatus, Port};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

/// Passenger contract flavours and their party sizes.
pub const PASSENGER_TYPES: [(&str, i64, i64); 3] =
    [("ferry", 12, 60), ("water_bus", 6, 16), ("water_taxi", 2, 6)];

/// Cargo mix offered by ports of a region.
pub fn region_cargo_types(region: &str) -> &'static [&'static str] {
    match region {
        "north" => &["bulk", "refrigerated", "hazardous"],
        "south" => &["bulk", "supplies", "parcels"],
        "islands" => &["fish", "parcels", "supplies"],
        "east" => &["bulk", "refrigerated", "parcels"],
        _ => &["bulk", "parcels", "supplies"],
    }
}

/// How many listings are missing to reach `target`.
pub fn top_up_count(target: u32, listed: u32) -> u32 {
    target.saturating_sub(listed)
}

/// Deterministic source of listings and identifiers.
#[derive(Debug)]
pub struct ListingGenerator {
    rng: ChaCha8Rng,
}

impl ListingGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// A fresh opaque id such as `cargo-18f2c3a91b7-5d4e5f60`.
    ///
    /// The millisecond part keeps ids unique across restarts with the same seed.
    pub fn next_id(&mut self, prefix: &str, now: DateTime<Utc>) -> String {
        format!(
            "{prefix}-{:x}-{:08x}",
            now.timestamp_millis(),
            self.rng.gen::<u32>()
        )
    }

    /// Random port other than `origin`, if the registry has one.
    pub fn pick_destination<'a>(&mut self, origin: &Port, ports: &'a [Port]) -> Option<&'a Port> {
        let others: Vec<&Port> = ports.iter().filter(|p| p.id != origin.id).collect();
        others.choose(&mut self.rng).copied()
    }

    fn minutes_between(&mut self, lo_h: i64, hi_h: i64) -> Duration {
        Duration::minutes(self.rng.gen_range(lo_h * 60..=hi_h * 60))
    }

    /// A listed cargo lot at `origin` bound for another port.
    pub fn cargo_lot(
        &mut self,
        origin: &Port,
        ports: &[Port],
        now: DateTime<Utc>,
    ) -> Result<Option<CargoLot>, EconError> {
        let Some(dest) = self.pick_destination(origin, ports) else {
            return Ok(None);
        };
        let dest_id = dest.id.clone();
        let types = region_cargo_types(&origin.region);
        let cargo_type = types[self.rng.gen_range(0..types.len())];
        let weight = if is_small_craft_cargo(cargo_type) {
            self.rng.gen_range(2.0..=16.0_f64)
        } else {
            self.rng.gen_range(18.0..=80.0_f64)
        };
        let weight_tons = (weight * 10.0).round() / 10.0;
        let value = cargo_value(weight_tons, cargo_type)?;
        let expires_in = self.minutes_between(2, 8);
        let lot = CargoLot {
            id: self.next_id("cargo", now),
            port_id: Some(origin.id.clone()),
            origin_port_id: Some(origin.id.clone()),
            destination_port_id: Some(dest_id),
            owner_id: None,
            carrier_id: None,
            vessel_id: None,
            cargo_type: cargo_type.to_string(),
            description: Some(format!("{cargo_type} consignment from {}", origin.name)),
            weight_tons,
            value,
            reward_credits: cargo_reward(value),
            liability_rate: liability_rate(cargo_type),
            status: CargoStatus::Listed,
            ready_at: None,
            expires_at: Some(now + expires_in),
        };
        debug!(port_id = %origin.id, cargo_id = %lot.id, cargo_type, "generated cargo lot");
        Ok(Some(lot))
    }

    /// A listed passenger contract at `origin`.
    pub fn passenger_contract(
        &mut self,
        origin: &Port,
        ports: &[Port],
        now: DateTime<Utc>,
    ) -> Option<PassengerContract> {
        let dest = self.pick_destination(origin, ports)?.id.clone();
        let (passenger_type, lo, hi) = PASSENGER_TYPES[self.rng.gen_range(0..PASSENGER_TYPES.len())];
        let pax_count = self.rng.gen_range(lo..=hi);
        let expires_in = self.minutes_between(1, 5);
        let contract = PassengerContract {
            id: self.next_id("pax", now),
            origin_port_id: origin.id.clone(),
            destination_port_id: dest,
            operator_id: None,
            vessel_id: None,
            passenger_type: passenger_type.to_string(),
            pax_count,
            reward_credits: passenger_reward(pax_count, passenger_type),
            status: PassengerStatus::Listed,
            ready_at: None,
            expires_at: Some(now + expires_in),
        };
        debug!(port_id = %origin.id, contract_id = %contract.id, passenger_type, "generated passenger contract");
        Some(contract)
    }

    /// Relist an expired lot at its origin with a new destination and expiry.
    ///
    /// Type, weight and value carry over. Returns `None` when the origin is unknown.
    pub fn regenerate_cargo(
        &mut self,
        expired: &CargoLot,
        ports: &[Port],
        now: DateTime<Utc>,
    ) -> Option<CargoLot> {
        let origin_id = expired.origin_port_id.as_ref()?;
        let origin = ports.iter().find(|p| &p.id == origin_id)?;
        let dest = self.pick_destination(origin, ports)?.id.clone();
        let reward = if expired.reward_credits > 0 {
            expired.reward_credits
        } else {
            cargo_regenerated_reward(expired.value)
        };
        let expires_in = self.minutes_between(2, 8);
        Some(CargoLot {
            id: self.next_id("cargo", now),
            port_id: Some(origin.id.clone()),
            origin_port_id: Some(origin.id.clone()),
            destination_port_id: Some(dest),
            owner_id: None,
            carrier_id: None,
            vessel_id: None,
            cargo_type: expired.cargo_type.clone(),
            description: expired.description.clone(),
            weight_tons: expired.weight_tons,
            value: expired.value,
            reward_credits: reward,
            liability_rate: expired.liability_rate,
            status: CargoStatus::Listed,
            ready_at: None,
            expires_at: Some(now + expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::config::default_ports;
    use proptest::prelude::*;

    #[test]
    fn same_seed_same_listings() {
        let ports = default_ports();
        let now = Utc::now();
        let mut a = ListingGenerator::new(7);
        let mut b = ListingGenerator::new(7);
        let la = a.cargo_lot(&ports[0], &ports, now).unwrap().unwrap();
        let lb = b.cargo_lot(&ports[0], &ports, now).unwrap().unwrap();
        assert_eq!(la, lb);
    }

    #[test]
    fn single_port_world_has_no_destination() {
        let ports = vec![default_ports().remove(0)];
        let mut g = ListingGenerator::new(1);
        assert!(g.cargo_lot(&ports[0], &ports, Utc::now()).unwrap().is_none());
        assert!(g.passenger_contract(&ports[0], &ports, Utc::now()).is_none());
    }

    #[test]
    fn regenerated_lot_keeps_goods() {
        let ports = default_ports();
        let now = Utc::now();
        let mut g = ListingGenerator::new(3);
        let mut lot = g.cargo_lot(&ports[1], &ports, now).unwrap().unwrap();
        lot.status = CargoStatus::Expired;
        lot.reward_credits = 0;
        let fresh = g.regenerate_cargo(&lot, &ports, now).unwrap();
        assert_ne!(fresh.id, lot.id);
        assert_eq!(fresh.status, CargoStatus::Listed);
        assert_eq!(fresh.weight_tons, lot.weight_tons);
        assert_eq!(fresh.value, lot.value);
        assert_eq!(fresh.reward_credits, cargo_regenerated_reward(lot.value));
        assert_eq!(fresh.port_id, lot.origin_port_id);
        assert_ne!(fresh.destination_port_id, fresh.origin_port_id);
    }

    #[test]
    fn top_up_saturates() {
        assert_eq!(top_up_count(6, 2), 4);
        assert_eq!(top_up_count(6, 9), 0);
    }

    proptest! {
        #[test]
        fn cargo_follows_region_tables(seed in 0u64..500, idx in 0usize..4) {
            let ports = default_ports();
            let now = Utc::now();
            let mut g = ListingGenerator::new(seed);
            let lot = g.cargo_lot(&ports[idx], &ports, now).unwrap().unwrap();
            prop_assert!(region_cargo_types(&ports[idx].region).contains(&lot.cargo_type.as_str()));
            if is_small_craft_cargo(&lot.cargo_type) {
                prop_assert!((2.0..=16.0).contains(&lot.weight_tons));
            } else {
                prop_assert!((18.0..=80.0).contains(&lot.weight_tons));
            }
            prop_assert_eq!(lot.reward_credits, cargo_reward(lot.value));
            let ttl = lot.expires_at.unwrap() - now;
            prop_assert!(ttl >= Duration::hours(2) && ttl <= Duration::hours(8));
            prop_assert_ne!(lot.destination_port_id.clone(), lot.origin_port_id.clone());
        }

        #[test]
        fn passengers_sized_by_type(seed in 0u64..500) {
            let ports = default_ports();
            let mut g = ListingGenerator::new(seed);
            let c = g.passenger_contract(&ports[0], &ports, Utc::now()).unwrap();
            let (_, lo, hi) = PASSENGER_TYPES
                .iter()
                .copied()
                .find(|(t, _, _)| *t == c.passenger_type)
                .unwrap();
            prop_assert!(c.pax_count >= lo && c.pax_count <= hi);
            prop_assert_eq!(c.reward_credits, passenger_reward(c.pax_count, &c.passenger_type));
        }
    }
}
