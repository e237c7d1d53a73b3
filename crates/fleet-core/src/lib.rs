#![deny(warnings)]

//! Core domain models and invariants for the harbor fleet world.
//!
//! This crate defines the serializable types shared by the ledger, the
//! logistics engine, the vessel registry and the persistence layer, together
//! with validation helpers that guard the cross-cutting invariants
//! (charterer/leasee exclusivity, crew only under player control, bounded
//! station assignments).

pub mod config;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use config::EngineConfig;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Stable identifier of a human operator (user account).
    OperatorId
);
string_id!(
    /// Stable identifier of a vessel.
    VesselId
);
string_id!(
    /// Identifier of a port in the static registry, e.g. "harbor-alpha".
    PortId
);
string_id!(
    /// Identifier of an isolated world shard.
    SpaceId
);

/// Space used when a vessel row carries no explicit space.
pub const DEFAULT_SPACE_ID: &str = "global";

/// Declares a lowercase string-backed enum with `as_str` and `FromStr`.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ValidationError::UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(
    /// Lifecycle status of a vessel.
    VesselStatus {
        /// In normal operation.
        Active => "active",
        /// Laid up at a port; cannot be crewed.
        Stored => "stored",
        /// Operated by a charterer.
        Chartered => "chartered",
        /// Operated by a leasee.
        Leased => "leased",
        /// Listed for fixed-price sale.
        Sale => "sale",
        /// Listed at auction.
        Auction => "auction",
        /// Seized after a defaulted loan.
        Repossession => "repossession",
    }
);

text_enum!(
    /// Who is driving the vessel.
    ControlMode {
        /// A crewed human operator.
        Player => "player",
        /// Autonomous fallback logic.
        Ai => "ai",
    }
);

text_enum!(
    /// Named operating roles on a crewed vessel.
    Station {
        Helm => "helm",
        Engine => "engine",
        Radio => "radio",
    }
);

text_enum!(
    /// Lease flavour; only `Lease` carries a revenue share.
    LeaseType {
        Lease => "lease",
        Charter => "charter",
    }
);

text_enum!(
    LeaseStatus {
        Open => "open",
        Active => "active",
        Completed => "completed",
    }
);

text_enum!(
    SaleType {
        Sale => "sale",
        Auction => "auction",
        Repossession => "repossession",
    }
);

text_enum!(
    SaleStatus {
        Open => "open",
        Sold => "sold",
        /// Withdrawn by the seller or past its end without a buyer.
        Canceled => "canceled",
    }
);

text_enum!(
    /// Cargo lot lifecycle: listed → loading → loaded → delivered, or listed → expired.
    CargoStatus {
        Listed => "listed",
        Loading => "loading",
        Loaded => "loaded",
        Delivered => "delivered",
        Expired => "expired",
    }
);

text_enum!(
    /// Passenger contract lifecycle, mirroring [`CargoStatus`].
    PassengerStatus {
        Listed => "listed",
        Boarding => "boarding",
        InProgress => "in_progress",
        Completed => "completed",
        Expired => "expired",
    }
);

text_enum!(
    /// Port size class; drives listing targets and congestion ceilings.
    PortSize {
        Small => "small",
        Medium => "medium",
        Large => "large",
    }
);

text_enum!(
    LoanStatus {
        Active => "active",
        Paid => "paid",
        Defaulted => "defaulted",
    }
);

text_enum!(
    PolicyType {
        Damage => "damage",
        Loss => "loss",
        Salvage => "salvage",
    }
);

text_enum!(
    PolicyStatus {
        Active => "active",
        Canceled => "canceled",
    }
);

impl VesselStatus {
    /// Whether the vessel can currently take crew.
    pub fn is_crewable(self) -> bool {
        !matches!(
            self,
            VesselStatus::Stored
                | VesselStatus::Repossession
                | VesselStatus::Sale
                | VesselStatus::Auction
        )
    }
}

impl PortSize {
    /// Congestion ceiling: listed load at which a port counts as saturated.
    pub fn listing_ceiling(self) -> u32 {
        match self {
            PortSize::Small => 8,
            PortSize::Medium => 14,
            PortSize::Large => 22,
        }
    }

    /// Minimum number of listed cargo lots a generation sweep maintains.
    pub fn cargo_target(self) -> u32 {
        match self {
            PortSize::Small => 4,
            PortSize::Medium => 6,
            PortSize::Large => 10,
        }
    }

    /// Minimum number of listed passenger contracts a generation sweep maintains.
    pub fn passenger_target(self) -> u32 {
        match self {
            PortSize::Small => 2,
            PortSize::Medium => 4,
            PortSize::Large => 8,
        }
    }
}

/// Local planar position in metres. Supplied by the external simulation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance in metres.
    pub fn distance_to(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Body-frame velocity in m/s.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub surge: f64,
    pub sway: f64,
    pub heave: f64,
}

impl Velocity {
    /// Horizontal speed over ground in m/s.
    pub fn speed(&self) -> f64 {
        self.surge.hypot(self.sway)
    }
}

/// Operator control inputs. Reset to neutral whenever the vessel is laid up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Controls {
    pub throttle: f64,
    pub rudder_angle: f64,
    pub bow_thruster: f64,
}

/// Hull properties from the vessel template; capacities derive from these.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HullProperties {
    /// Displacement in kilograms.
    pub mass_kg: f64,
    /// Length overall in metres.
    pub length_m: f64,
}

impl Default for HullProperties {
    fn default() -> Self {
        Self {
            mass_kg: 500_000.0,
            length_m: 30.0,
        }
    }
}

/// System health values consumed by the simulation; never mutated here.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub hull: f64,
    pub engine: f64,
    pub steering: f64,
    pub electrical: f64,
    pub flooding: f64,
}

impl Default for Health {
    fn default() -> Self {
        Self {
            hull: 1.0,
            engine: 1.0,
            steering: 1.0,
            electrical: 1.0,
            flooding: 0.0,
        }
    }
}

/// Physical state snapshot pushed in by the simulation loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicalState {
    pub position: Position,
    /// Heading in radians.
    pub heading: f64,
    pub velocity: Velocity,
}

/// Operator currently holding a station.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationHolder {
    pub operator_id: OperatorId,
    pub display_name: String,
}

/// Helm/engine/radio assignments; at most one operator per station.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stations {
    pub helm: Option<StationHolder>,
    pub engine: Option<StationHolder>,
    pub radio: Option<StationHolder>,
}

impl Stations {
    pub fn get(&self, station: Station) -> Option<&StationHolder> {
        match station {
            Station::Helm => self.helm.as_ref(),
            Station::Engine => self.engine.as_ref(),
            Station::Radio => self.radio.as_ref(),
        }
    }

    fn slot_mut(&mut self, station: Station) -> &mut Option<StationHolder> {
        match station {
            Station::Helm => &mut self.helm,
            Station::Engine => &mut self.engine,
            Station::Radio => &mut self.radio,
        }
    }

    /// Give every unheld station to `holder`.
    pub fn fill_open(&mut self, holder: &StationHolder) {
        for station in [Station::Helm, Station::Engine, Station::Radio] {
            let slot = self.slot_mut(station);
            if slot.is_none() {
                *slot = Some(holder.clone());
            }
        }
    }

    /// Drop every station held by `operator`.
    pub fn release_all(&mut self, operator: &OperatorId) {
        for station in [Station::Helm, Station::Engine, Station::Radio] {
            let slot = self.slot_mut(station);
            if slot.as_ref().is_some_and(|h| &h.operator_id == operator) {
                *slot = None;
            }
        }
    }

    pub fn clear(&mut self) {
        *self = Stations::default();
    }
}

/// Outcome of a station claim/release request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StationError {
    #[error("{station} station held by {holder}")]
    Held { station: Station, holder: String },
    #[error("you do not hold the {0} station")]
    NotHeld(Station),
}

/// Authoritative in-memory vessel record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vessel {
    pub id: VesselId,
    pub space_id: SpaceId,
    /// None while in shipyard/system custody.
    pub owner_id: Option<OperatorId>,
    pub charterer_id: Option<OperatorId>,
    pub leasee_id: Option<OperatorId>,
    pub status: VesselStatus,
    pub storage_port_id: Option<PortId>,
    pub stored_at: Option<DateTime<Utc>>,
    /// Crew members keyed by id, with display names.
    pub crew: BTreeMap<OperatorId, String>,
    pub stations: Stations,
    pub mode: ControlMode,
    pub desired_mode: ControlMode,
    pub physical: PhysicalState,
    pub controls: Controls,
    pub hull: HullProperties,
    pub health: Health,
    pub last_crew_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl Vessel {
    /// A fresh uncrewed vessel under autonomous control.
    pub fn new(id: VesselId, space_id: SpaceId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            space_id,
            owner_id: None,
            charterer_id: None,
            leasee_id: None,
            status: VesselStatus::Active,
            storage_port_id: None,
            stored_at: None,
            crew: BTreeMap::new(),
            stations: Stations::default(),
            mode: ControlMode::Ai,
            desired_mode: ControlMode::Ai,
            physical: PhysicalState::default(),
            controls: Controls::default(),
            hull: HullProperties::default(),
            health: Health::default(),
            last_crew_at: now,
            last_update: now,
        }
    }

    /// Owner, active charterer or active leasee.
    pub fn is_operated_by(&self, operator: &OperatorId) -> bool {
        self.owner_id.as_ref() == Some(operator)
            || self.charterer_id.as_ref() == Some(operator)
            || self.leasee_id.as_ref() == Some(operator)
    }

    /// The account that pays running costs: charterer, then leasee, then owner.
    pub fn billing_operator(&self) -> Option<&OperatorId> {
        self.charterer_id
            .as_ref()
            .or(self.leasee_id.as_ref())
            .or(self.owner_id.as_ref())
    }

    pub fn has_crew(&self, operator: &OperatorId) -> bool {
        self.crew.contains_key(operator)
    }

    /// Add an operator to the crew, give them any free station and hand control to players.
    pub fn add_crew(&mut self, operator: &OperatorId, display_name: &str, now: DateTime<Utc>) {
        self.crew.insert(operator.clone(), display_name.to_string());
        self.stations.fill_open(&StationHolder {
            operator_id: operator.clone(),
            display_name: display_name.to_string(),
        });
        self.mode = ControlMode::Player;
        self.desired_mode = ControlMode::Player;
        self.last_crew_at = now;
        self.last_update = now;
    }

    /// Remove an operator from crew and stations. Returns false when they were not aboard.
    pub fn remove_crew(&mut self, operator: &OperatorId, now: DateTime<Utc>) -> bool {
        if self.crew.remove(operator).is_none() {
            return false;
        }
        self.stations.release_all(operator);
        self.last_crew_at = now;
        self.last_update = now;
        if self.crew.is_empty() {
            self.mode = ControlMode::Ai;
            self.desired_mode = ControlMode::Ai;
        }
        true
    }

    /// Take the vessel out of crewed operation.
    pub fn clear_crew(&mut self, now: DateTime<Utc>) {
        self.crew.clear();
        self.stations.clear();
        self.mode = ControlMode::Ai;
        self.desired_mode = ControlMode::Ai;
        self.last_update = now;
    }

    pub fn neutral_controls(&mut self) {
        self.controls = Controls::default();
    }

    /// Lay the vessel up at `port`.
    pub fn store_at(&mut self, port: &PortId, now: DateTime<Utc>) {
        self.status = VesselStatus::Stored;
        self.storage_port_id = Some(port.clone());
        self.stored_at = Some(now);
        self.neutral_controls();
        self.clear_crew(now);
    }

    /// Bring a stored vessel back into service; crew must re-join.
    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.status = VesselStatus::Active;
        self.storage_port_id = None;
        self.stored_at = None;
        self.desired_mode = ControlMode::Player;
        self.last_update = now;
    }

    /// Claim or release a named station.
    pub fn update_station(
        &mut self,
        station: Station,
        claim: bool,
        operator: &OperatorId,
        display_name: &str,
        admin_override: bool,
    ) -> Result<(), StationError> {
        let slot = self.stations.slot_mut(station);
        let held_by_other = slot
            .as_ref()
            .is_some_and(|h| &h.operator_id != operator);
        if claim {
            if held_by_other && !admin_override {
                let holder = slot
                    .as_ref()
                    .map(|h| h.display_name.clone())
                    .unwrap_or_default();
                return Err(StationError::Held { station, holder });
            }
            *slot = Some(StationHolder {
                operator_id: operator.clone(),
                display_name: display_name.to_string(),
            });
        } else {
            if held_by_other && !admin_override {
                return Err(StationError::NotHeld(station));
            }
            *slot = None;
        }
        Ok(())
    }

    /// Partial state pushed to observers of the space.
    pub fn projection(&self) -> VesselProjection {
        VesselProjection {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            charterer_id: self.charterer_id.clone(),
            leasee_id: self.leasee_id.clone(),
            status: self.status,
            storage_port_id: self.storage_port_id.clone(),
            mode: self.mode,
            desired_mode: self.desired_mode,
            crew_ids: self.crew.keys().cloned().collect(),
            crew_names: self.crew.values().cloned().collect(),
            helm: self.stations.helm.as_ref().map(|h| h.operator_id.clone()),
            engine: self.stations.engine.as_ref().map(|h| h.operator_id.clone()),
            radio: self.stations.radio.as_ref().map(|h| h.operator_id.clone()),
            position: self.physical.position,
            heading: self.physical.heading,
            last_update: self.last_update,
        }
    }
}

/// Delta projection of one vessel as broadcast to a space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VesselProjection {
    pub id: VesselId,
    pub owner_id: Option<OperatorId>,
    pub charterer_id: Option<OperatorId>,
    pub leasee_id: Option<OperatorId>,
    pub status: VesselStatus,
    pub storage_port_id: Option<PortId>,
    pub mode: ControlMode,
    pub desired_mode: ControlMode,
    pub crew_ids: Vec<OperatorId>,
    pub crew_names: Vec<String>,
    pub helm: Option<OperatorId>,
    pub engine: Option<OperatorId>,
    pub radio: Option<OperatorId>,
    pub position: Position,
    pub heading: f64,
    pub last_update: DateTime<Utc>,
}

/// Static port reference data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub id: PortId,
    pub name: String,
    pub size: PortSize,
    /// Region tag selecting the cargo mix, e.g. "north".
    pub region: String,
    pub position: Position,
}

/// Ledger view of an operator.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EconomyProfile {
    pub rank: i64,
    pub experience: i64,
    pub credits: i64,
    pub safety_score: f64,
}

impl Default for EconomyProfile {
    fn default() -> Self {
        Self {
            rank: 1,
            experience: 0,
            credits: 0,
            safety_score: 1.0,
        }
    }
}

/// A requested ledger change. Zero/None fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub delta_credits: i64,
    pub delta_experience: i64,
    pub delta_safety_score: f64,
    pub vessel_id: Option<VesselId>,
    pub reason: String,
    pub meta: Option<serde_json::Value>,
}

impl Adjustment {
    pub fn credits(delta: i64, reason: impl Into<String>) -> Self {
        Self {
            delta_credits: delta,
            reason: reason.into(),
            ..Self::default()
        }
    }

    pub fn with_vessel(mut self, vessel_id: &VesselId) -> Self {
        self.vessel_id = Some(vessel_id.clone());
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Append-only audit record of a credit movement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EconomyTransaction {
    pub id: i64,
    pub operator_id: OperatorId,
    pub vessel_id: Option<VesselId>,
    pub amount: i64,
    pub reason: String,
    pub meta: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A lease or charter agreement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub id: String,
    pub vessel_id: VesselId,
    pub owner_id: OperatorId,
    pub lessee_id: Option<OperatorId>,
    pub lease_type: LeaseType,
    /// Credits per hour charged to the lessee.
    pub rate_per_hour: i64,
    /// Fraction of earnings forwarded to the owner, in [0, 1].
    pub revenue_share: Decimal,
    pub status: LeaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub last_charged_at: Option<DateTime<Utc>>,
}

/// A sale or auction listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub id: String,
    pub vessel_id: VesselId,
    pub seller_id: Option<OperatorId>,
    pub sale_type: SaleType,
    pub price: i64,
    pub reserve_price: Option<i64>,
    pub buyer_id: Option<OperatorId>,
    pub status: SaleStatus,
    pub ends_at: Option<DateTime<Utc>>,
}

/// A tradable cargo consignment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CargoLot {
    pub id: String,
    /// Port the lot is currently listed at; cleared while aboard a vessel.
    pub port_id: Option<PortId>,
    pub origin_port_id: Option<PortId>,
    pub destination_port_id: Option<PortId>,
    pub owner_id: Option<OperatorId>,
    pub carrier_id: Option<OperatorId>,
    pub vessel_id: Option<VesselId>,
    pub cargo_type: String,
    pub description: Option<String>,
    pub weight_tons: f64,
    pub value: i64,
    pub reward_credits: i64,
    pub liability_rate: Decimal,
    pub status: CargoStatus,
    pub ready_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A passenger transport contract.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PassengerContract {
    pub id: String,
    pub origin_port_id: PortId,
    pub destination_port_id: PortId,
    pub operator_id: Option<OperatorId>,
    pub vessel_id: Option<VesselId>,
    pub passenger_type: String,
    pub pax_count: i64,
    pub reward_credits: i64,
    pub status: PassengerStatus,
    pub ready_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Operator credit line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub id: String,
    pub operator_id: OperatorId,
    pub principal: i64,
    pub balance: Decimal,
    /// Annual interest rate, e.g. 0.08.
    pub interest_rate: Decimal,
    pub status: LoanStatus,
    pub issued_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub last_accrued_at: Option<DateTime<Utc>>,
}

/// Vessel insurance cover.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InsurancePolicy {
    pub id: String,
    pub vessel_id: VesselId,
    pub owner_id: OperatorId,
    pub policy_type: PolicyType,
    pub coverage: i64,
    pub deductible: i64,
    /// Credits charged per premium interval.
    pub premium_rate: i64,
    pub status: PolicyStatus,
    pub active_from: DateTime<Utc>,
    pub active_until: Option<DateTime<Utc>>,
    pub last_charged_at: Option<DateTime<Utc>>,
}

/// Validation errors for domain invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Identifier field was empty.
    #[error("missing {0}")]
    MissingId(&'static str),
    /// Numeric input must be finite.
    #[error("{0} must be a finite number")]
    NonFinite(&'static str),
    /// Numeric input must be strictly positive.
    #[error("{0} must be > 0")]
    NonPositive(&'static str),
    /// Numeric input outside its allowed range.
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: String },
    /// Stored text did not match any enum variant.
    #[error("unknown {kind} value: {value}")]
    UnknownVariant { kind: &'static str, value: String },
    /// A vessel cannot be chartered and leased at the same time.
    #[error("vessel {0} has both a charterer and a leasee")]
    ChartererAndLeasee(String),
    /// Crew aboard while control is autonomous.
    #[error("vessel {0} has crew but is not under player control")]
    CrewWithoutPlayerControl(String),
    /// Station held by someone who is not crew.
    #[error("vessel {vessel}: {station} held by non-crew {operator}")]
    StationHolderNotCrew {
        vessel: String,
        station: Station,
        operator: String,
    },
    /// Storage fields set on a non-stored vessel.
    #[error("vessel {0} has storage fields but is not stored")]
    StrayStorage(String),
    /// Port registry contains a duplicate id.
    #[error("duplicate port id: {0}")]
    DuplicatePort(String),
}

/// Validate that a textual id is present.
pub fn require_id(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingId(field));
    }
    Ok(())
}

/// Validate a strictly positive finite number.
pub fn require_positive(value: f64, field: &'static str) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFinite(field));
    }
    if value <= 0.0 {
        return Err(ValidationError::NonPositive(field));
    }
    Ok(())
}

/// Validate a fraction in [0, 1].
pub fn require_fraction(value: Decimal, field: &'static str) -> Result<(), ValidationError> {
    if value < Decimal::ZERO || value > Decimal::ONE {
        return Err(ValidationError::OutOfRange {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Validate the ownership and crew invariants of a vessel.
pub fn validate_vessel(v: &Vessel) -> Result<(), ValidationError> {
    if v.charterer_id.is_some() && v.leasee_id.is_some() {
        return Err(ValidationError::ChartererAndLeasee(v.id.0.clone()));
    }
    if !v.crew.is_empty() && v.mode != ControlMode::Player {
        return Err(ValidationError::CrewWithoutPlayerControl(v.id.0.clone()));
    }
    for station in [Station::Helm, Station::Engine, Station::Radio] {
        if let Some(holder) = v.stations.get(station) {
            if !v.crew.contains_key(&holder.operator_id) {
                return Err(ValidationError::StationHolderNotCrew {
                    vessel: v.id.0.clone(),
                    station,
                    operator: holder.operator_id.0.clone(),
                });
            }
        }
    }
    if v.status != VesselStatus::Stored && (v.storage_port_id.is_some() || v.stored_at.is_some())
    {
        return Err(ValidationError::StrayStorage(v.id.0.clone()));
    }
    Ok(())
}

/// Validate a port registry: unique ids and finite positions.
pub fn validate_ports(ports: &[Port]) -> Result<(), ValidationError> {
    let mut seen: BTreeSet<&PortId> = BTreeSet::new();
    for p in ports {
        require_id(&p.id.0, "port id")?;
        if !p.position.x.is_finite() || !p.position.y.is_finite() {
            return Err(ValidationError::NonFinite("port position"));
        }
        if !seen.insert(&p.id) {
            return Err(ValidationError::DuplicatePort(p.id.0.clone()));
        }
    }
    Ok(())
}

/// Port whose proximity radius contains `position`, if any.
pub fn resolve_port_for_position<'a>(
    ports: &'a [Port],
    position: &Position,
    radius_m: f64,
) -> Option<&'a Port> {
    ports
        .iter()
        .find(|p| p.position.distance_to(position) < radius_m)
}
