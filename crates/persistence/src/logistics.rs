//! Cargo lots and passenger contracts.
//!
//! Assignment statements carry the hold capacity check inside the `UPDATE`,
//! so two concurrent assignments to one vessel are serialized by SQLite and
//! can never overfill it.

use crate::{from_opt_ms, opt_ms, parse_decimal, parse_text, to_ms, Result};
use chrono::{DateTime, Utc};
use fleet_core::{CargoLot, OperatorId, PassengerContract, PortId, VesselId};
use sqlx::{FromRow, SqliteConnection};
use std::collections::HashMap;

/// Slack for float comparison of summed tonnage.
const TONNAGE_EPSILON: f64 = 1e-9;

const CARGO_COLUMNS: &str = "id, port_id, origin_port_id, destination_port_id, owner_id, \
    carrier_id, vessel_id, cargo_type, description, weight_tons, value, reward_credits, \
    liability_rate, status, ready_at, expires_at";

const PAX_COLUMNS: &str = "id, origin_port_id, destination_port_id, operator_id, vessel_id, \
    passenger_type, pax_count, reward_credits, status, ready_at, expires_at";

#[derive(FromRow)]
struct CargoRow {
    id: String,
    port_id: Option<String>,
    origin_port_id: Option<String>,
    destination_port_id: Option<String>,
    owner_id: Option<String>,
    carrier_id: Option<String>,
    vessel_id: Option<String>,
    cargo_type: String,
    description: Option<String>,
    weight_tons: f64,
    value: i64,
    reward_credits: i64,
    liability_rate: String,
    status: String,
    ready_at: Option<i64>,
    expires_at: Option<i64>,
}

impl CargoRow {
    fn into_domain(self) -> Result<CargoLot> {
        Ok(CargoLot {
            id: self.id,
            port_id: self.port_id.map(PortId),
            origin_port_id: self.origin_port_id.map(PortId),
            destination_port_id: self.destination_port_id.map(PortId),
            owner_id: self.owner_id.map(OperatorId),
            carrier_id: self.carrier_id.map(OperatorId),
            vessel_id: self.vessel_id.map(VesselId),
            cargo_type: self.cargo_type,
            description: self.description,
            weight_tons: self.weight_tons,
            value: self.value,
            reward_credits: self.reward_credits,
            liability_rate: parse_decimal("cargo_lots.liability_rate", &self.liability_rate)?,
            status: parse_text("cargo_lots.status", &self.status)?,
            ready_at: from_opt_ms(self.ready_at)?,
            expires_at: from_opt_ms(self.expires_at)?,
        })
    }
}

#[derive(FromRow)]
struct PaxRow {
    id: String,
    origin_port_id: String,
    destination_port_id: String,
    operator_id: Option<String>,
    vessel_id: Option<String>,
    passenger_type: String,
    pax_count: i64,
    reward_credits: i64,
    status: String,
    ready_at: Option<i64>,
    expires_at: Option<i64>,
}

impl PaxRow {
    fn into_domain(self) -> Result<PassengerContract> {
        Ok(PassengerContract {
            id: self.id,
            origin_port_id: PortId(self.origin_port_id),
            destination_port_id: PortId(self.destination_port_id),
            operator_id: self.operator_id.map(OperatorId),
            vessel_id: self.vessel_id.map(VesselId),
            passenger_type: self.passenger_type,
            pax_count: self.pax_count,
            reward_credits: self.reward_credits,
            status: parse_text("passenger_contracts.status", &self.status)?,
            ready_at: from_opt_ms(self.ready_at)?,
            expires_at: from_opt_ms(self.expires_at)?,
        })
    }
}

fn cargo_rows(rows: Vec<CargoRow>) -> Result<Vec<CargoLot>> {
    rows.into_iter().map(CargoRow::into_domain).collect()
}

fn pax_rows(rows: Vec<PaxRow>) -> Result<Vec<PassengerContract>> {
    rows.into_iter().map(PaxRow::into_domain).collect()
}

pub async fn insert_cargo(
    conn: &mut SqliteConnection,
    lot: &CargoLot,
    now: DateTime<Utc>,
) -> Result<()> {
    let ts = to_ms(now);
    sqlx::query(
        "INSERT INTO cargo_lots (id, port_id, origin_port_id, destination_port_id, owner_id, \
            carrier_id, vessel_id, cargo_type, description, weight_tons, value, reward_credits, \
            liability_rate, status, ready_at, expires_at, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&lot.id)
    .bind(lot.port_id.as_ref().map(|p| p.as_str()))
    .bind(lot.origin_port_id.as_ref().map(|p| p.as_str()))
    .bind(lot.destination_port_id.as_ref().map(|p| p.as_str()))
    .bind(lot.owner_id.as_ref().map(|o| o.as_str()))
    .bind(lot.carrier_id.as_ref().map(|o| o.as_str()))
    .bind(lot.vessel_id.as_ref().map(|v| v.as_str()))
    .bind(&lot.cargo_type)
    .bind(lot.description.as_deref())
    .bind(lot.weight_tons)
    .bind(lot.value)
    .bind(lot.reward_credits)
    .bind(lot.liability_rate.to_string())
    .bind(lot.status.as_str())
    .bind(opt_ms(lot.ready_at))
    .bind(opt_ms(lot.expires_at))
    .bind(ts)
    .bind(ts)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_cargo(conn: &mut SqliteConnection, id: &str) -> Result<Option<CargoLot>> {
    let sql = format!("SELECT {CARGO_COLUMNS} FROM cargo_lots WHERE id = ?");
    let row: Option<CargoRow> = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(CargoRow::into_domain).transpose()
}

/// Cargo currently listed at a port, soonest expiry first.
pub async fn list_cargo_at_port(
    conn: &mut SqliteConnection,
    port: &PortId,
) -> Result<Vec<CargoLot>> {
    let sql = format!(
        "SELECT {CARGO_COLUMNS} FROM cargo_lots WHERE port_id = ? AND status = 'listed' \
         ORDER BY expires_at, id"
    );
    let rows: Vec<CargoRow> = sqlx::query_as(&sql)
        .bind(port.as_str())
        .fetch_all(&mut *conn)
        .await?;
    cargo_rows(rows)
}

/// Lots aboard a vessel (loading or loaded).
pub async fn list_cargo_on_vessel(
    conn: &mut SqliteConnection,
    vessel: &VesselId,
) -> Result<Vec<CargoLot>> {
    let sql = format!(
        "SELECT {CARGO_COLUMNS} FROM cargo_lots WHERE vessel_id = ? \
         AND status IN ('loading', 'loaded') ORDER BY id"
    );
    let rows: Vec<CargoRow> = sqlx::query_as(&sql)
        .bind(vessel.as_str())
        .fetch_all(&mut *conn)
        .await?;
    cargo_rows(rows)
}

/// Tonnage aboard a vessel.
pub async fn hold_load_tons(conn: &mut SqliteConnection, vessel: &VesselId) -> Result<f64> {
    let (load,): (f64,) = sqlx::query_as(
        "SELECT CAST(COALESCE(SUM(weight_tons), 0) AS REAL) FROM cargo_lots \
         WHERE vessel_id = ? AND status IN ('loading', 'loaded')",
    )
    .bind(vessel.as_str())
    .fetch_one(&mut *conn)
    .await?;
    Ok(load)
}

/// Passengers aboard a vessel.
pub async fn passenger_load(conn: &mut SqliteConnection, vessel: &VesselId) -> Result<i64> {
    let (load,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(pax_count), 0) FROM passenger_contracts \
         WHERE vessel_id = ? AND status IN ('boarding', 'in_progress')",
    )
    .bind(vessel.as_str())
    .fetch_one(&mut *conn)
    .await?;
    Ok(load)
}

/// Listed cargo and passenger counts per port.
pub async fn listed_counts(
    conn: &mut SqliteConnection,
) -> Result<HashMap<PortId, (u32, u32)>> {
    let cargo: Vec<(String, i64)> = sqlx::query_as(
        "SELECT port_id, COUNT(*) FROM cargo_lots \
         WHERE status = 'listed' AND port_id IS NOT NULL GROUP BY port_id",
    )
    .fetch_all(&mut *conn)
    .await?;
    let pax: Vec<(String, i64)> = sqlx::query_as(
        "SELECT origin_port_id, COUNT(*) FROM passenger_contracts \
         WHERE status = 'listed' GROUP BY origin_port_id",
    )
    .fetch_all(&mut *conn)
    .await?;
    let mut out: HashMap<PortId, (u32, u32)> = HashMap::new();
    for (port, n) in cargo {
        out.entry(PortId(port)).or_default().0 = u32::try_from(n).unwrap_or(u32::MAX);
    }
    for (port, n) in pax {
        out.entry(PortId(port)).or_default().1 = u32::try_from(n).unwrap_or(u32::MAX);
    }
    Ok(out)
}

/// Put a listed lot aboard a vessel if it still fits.
///
/// The lot must be listed, unexpired, unowned or owned by `carrier`, and its
/// weight plus the vessel's current load must stay within `capacity_tons`.
/// Returns false when any condition fails; nothing changes in that case.
pub async fn assign_cargo(
    conn: &mut SqliteConnection,
    cargo_id: &str,
    vessel: &VesselId,
    carrier: &OperatorId,
    capacity_tons: f64,
    ready_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let ts = to_ms(now);
    let res = sqlx::query(
        "UPDATE cargo_lots SET status = 'loading', carrier_id = ?, vessel_id = ?, ready_at = ?, \
            port_id = NULL, updated_at = ? \
         WHERE id = ? AND status = 'listed' \
           AND (expires_at IS NULL OR expires_at > ?) \
           AND (owner_id IS NULL OR owner_id = ?) \
           AND (SELECT COALESCE(SUM(c.weight_tons), 0) FROM cargo_lots c \
                WHERE c.vessel_id = ? AND c.status IN ('loading', 'loaded')) + weight_tons <= ?",
    )
    .bind(carrier.as_str())
    .bind(vessel.as_str())
    .bind(to_ms(ready_at))
    .bind(ts)
    .bind(cargo_id)
    .bind(ts)
    .bind(carrier.as_str())
    .bind(vessel.as_str())
    .bind(capacity_tons + TONNAGE_EPSILON)
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Board a listed passenger contract if the vessel has seats left.
pub async fn accept_passengers(
    conn: &mut SqliteConnection,
    contract_id: &str,
    vessel: &VesselId,
    operator: &OperatorId,
    capacity: i64,
    ready_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let ts = to_ms(now);
    let res = sqlx::query(
        "UPDATE passenger_contracts SET status = 'boarding', operator_id = ?, vessel_id = ?, \
            ready_at = ?, updated_at = ? \
         WHERE id = ? AND status = 'listed' \
           AND (expires_at IS NULL OR expires_at > ?) \
           AND (SELECT COALESCE(SUM(p.pax_count), 0) FROM passenger_contracts p \
                WHERE p.vessel_id = ? AND p.status IN ('boarding', 'in_progress')) + pax_count <= ?",
    )
    .bind(operator.as_str())
    .bind(vessel.as_str())
    .bind(to_ms(ready_at))
    .bind(ts)
    .bind(contract_id)
    .bind(ts)
    .bind(vessel.as_str())
    .bind(capacity)
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Promote loading/boarding work whose turnaround has elapsed.
///
/// Returns the number of cargo lots and passenger contracts promoted.
pub async fn promote_ready(conn: &mut SqliteConnection, now: DateTime<Utc>) -> Result<(u64, u64)> {
    let ts = to_ms(now);
    let cargo = sqlx::query(
        "UPDATE cargo_lots SET status = 'loaded', updated_at = ? \
         WHERE status = 'loading' AND ready_at IS NOT NULL AND ready_at <= ?",
    )
    .bind(ts)
    .bind(ts)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    let pax = sqlx::query(
        "UPDATE passenger_contracts SET status = 'in_progress', updated_at = ? \
         WHERE status = 'boarding' AND ready_at IS NOT NULL AND ready_at <= ?",
    )
    .bind(ts)
    .bind(ts)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok((cargo, pax))
}

/// Expire listed cargo past its deadline and return the expired lots.
pub async fn expire_listed_cargo(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> Result<Vec<CargoLot>> {
    let ts = to_ms(now);
    let sql = format!(
        "UPDATE cargo_lots SET status = 'expired', updated_at = ? \
         WHERE status = 'listed' AND expires_at IS NOT NULL AND expires_at <= ? \
         RETURNING {CARGO_COLUMNS}"
    );
    let rows: Vec<CargoRow> = sqlx::query_as(&sql)
        .bind(ts)
        .bind(ts)
        .fetch_all(&mut *conn)
        .await?;
    cargo_rows(rows)
}

/// Expire listed passenger contracts past their deadline.
pub async fn expire_listed_passengers(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> Result<u64> {
    let ts = to_ms(now);
    let res = sqlx::query(
        "UPDATE passenger_contracts SET status = 'expired', updated_at = ? \
         WHERE status = 'listed' AND expires_at IS NOT NULL AND expires_at <= ?",
    )
    .bind(ts)
    .bind(ts)
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected())
}

/// Loaded lots that are travelling aboard a vessel.
pub async fn list_cargo_in_transit(conn: &mut SqliteConnection) -> Result<Vec<CargoLot>> {
    let sql = format!(
        "SELECT {CARGO_COLUMNS} FROM cargo_lots \
         WHERE status = 'loaded' AND vessel_id IS NOT NULL ORDER BY id"
    );
    let rows: Vec<CargoRow> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
    cargo_rows(rows)
}

/// In-progress passenger contracts aboard a vessel.
pub async fn list_passengers_in_transit(
    conn: &mut SqliteConnection,
) -> Result<Vec<PassengerContract>> {
    let sql = format!(
        "SELECT {PAX_COLUMNS} FROM passenger_contracts \
         WHERE status = 'in_progress' AND vessel_id IS NOT NULL ORDER BY id"
    );
    let rows: Vec<PaxRow> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
    pax_rows(rows)
}

/// Mark a loaded lot delivered and list it at its destination.
///
/// False if another sweep already delivered it.
pub async fn mark_cargo_delivered(
    conn: &mut SqliteConnection,
    cargo_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE cargo_lots SET status = 'delivered', vessel_id = NULL, \
            port_id = destination_port_id, updated_at = ? \
         WHERE id = ? AND status = 'loaded'",
    )
    .bind(to_ms(now))
    .bind(cargo_id)
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Mark an in-progress contract completed.
pub async fn mark_passengers_completed(
    conn: &mut SqliteConnection,
    contract_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE passenger_contracts SET status = 'completed', vessel_id = NULL, updated_at = ? \
         WHERE id = ? AND status = 'in_progress'",
    )
    .bind(to_ms(now))
    .bind(contract_id)
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Owner gives up an undelivered lot without reward.
pub async fn release_cargo(
    conn: &mut SqliteConnection,
    cargo_id: &str,
    owner: &OperatorId,
    now: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE cargo_lots SET status = 'delivered', vessel_id = NULL, updated_at = ? \
         WHERE id = ? AND owner_id = ? AND status IN ('listed', 'loading', 'loaded')",
    )
    .bind(to_ms(now))
    .bind(cargo_id)
    .bind(owner.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected() == 1)
}

pub async fn insert_passengers(
    conn: &mut SqliteConnection,
    c: &PassengerContract,
    now: DateTime<Utc>,
) -> Result<()> {
    let ts = to_ms(now);
    sqlx::query(
        "INSERT INTO passenger_contracts (id, origin_port_id, destination_port_id, operator_id, \
            vessel_id, passenger_type, pax_count, reward_credits, status, ready_at, expires_at, \
            created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&c.id)
    .bind(c.origin_port_id.as_str())
    .bind(c.destination_port_id.as_str())
    .bind(c.operator_id.as_ref().map(|o| o.as_str()))
    .bind(c.vessel_id.as_ref().map(|v| v.as_str()))
    .bind(&c.passenger_type)
    .bind(c.pax_count)
    .bind(c.reward_credits)
    .bind(c.status.as_str())
    .bind(opt_ms(c.ready_at))
    .bind(opt_ms(c.expires_at))
    .bind(ts)
    .bind(ts)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_passengers(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<PassengerContract>> {
    let sql = format!("SELECT {PAX_COLUMNS} FROM passenger_contracts WHERE id = ?");
    let row: Option<PaxRow> = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(PaxRow::into_domain).transpose()
}

/// Passenger contracts waiting at a port.
pub async fn list_passengers_at_port(
    conn: &mut SqliteConnection,
    port: &PortId,
) -> Result<Vec<PassengerContract>> {
    let sql = format!(
        "SELECT {PAX_COLUMNS} FROM passenger_contracts \
         WHERE origin_port_id = ? AND status = 'listed' ORDER BY expires_at, id"
    );
    let rows: Vec<PaxRow> = sqlx::query_as(&sql)
        .bind(port.as_str())
        .fetch_all(&mut *conn)
        .await?;
    pax_rows(rows)
}
