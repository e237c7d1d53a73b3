//! Vessel rows.
//!
//! Crew and station assignments belong to live sessions and are not stored;
//! a vessel read back from the database always starts uncrewed.

use crate::{from_ms, from_opt_ms, opt_ms, parse_text, to_ms, Result};
use chrono::{DateTime, Utc};
use fleet_core::{
    Controls, Health, HullProperties, OperatorId, PhysicalState, PortId, Position, SpaceId,
    Stations, Velocity, Vessel, VesselId,
};
use sqlx::{FromRow, SqliteConnection};
use std::collections::BTreeMap;

const VESSEL_COLUMNS: &str = "id, space_id, owner_id, charterer_id, leasee_id, status, \
    storage_port_id, stored_at, mode, desired_mode, pos_x, pos_y, heading, surge, sway, heave, \
    throttle, rudder_angle, bow_thruster, mass_kg, length_m, hull_health, engine_health, \
    steering_health, electrical_health, flooding, last_crew_at, updated_at";

#[derive(FromRow)]
struct VesselRow {
    id: String,
    space_id: String,
    owner_id: Option<String>,
    charterer_id: Option<String>,
    leasee_id: Option<String>,
    status: String,
    storage_port_id: Option<String>,
    stored_at: Option<i64>,
    mode: String,
    desired_mode: String,
    pos_x: f64,
    pos_y: f64,
    heading: f64,
    surge: f64,
    sway: f64,
    heave: f64,
    throttle: f64,
    rudder_angle: f64,
    bow_thruster: f64,
    mass_kg: f64,
    length_m: f64,
    hull_health: f64,
    engine_health: f64,
    steering_health: f64,
    electrical_health: f64,
    flooding: f64,
    last_crew_at: i64,
    updated_at: i64,
}

impl VesselRow {
    fn into_domain(self) -> Result<Vessel> {
        Ok(Vessel {
            id: VesselId(self.id),
            space_id: SpaceId(self.space_id),
            owner_id: self.owner_id.map(OperatorId),
            charterer_id: self.charterer_id.map(OperatorId),
            leasee_id: self.leasee_id.map(OperatorId),
            status: parse_text("vessels.status", &self.status)?,
            storage_port_id: self.storage_port_id.map(PortId),
            stored_at: from_opt_ms(self.stored_at)?,
            crew: BTreeMap::new(),
            stations: Stations::default(),
            mode: parse_text("vessels.mode", &self.mode)?,
            desired_mode: parse_text("vessels.desired_mode", &self.desired_mode)?,
            physical: PhysicalState {
                position: Position::new(self.pos_x, self.pos_y),
                heading: self.heading,
                velocity: Velocity {
                    surge: self.surge,
                    sway: self.sway,
                    heave: self.heave,
                },
            },
            controls: Controls {
                throttle: self.throttle,
                rudder_angle: self.rudder_angle,
                bow_thruster: self.bow_thruster,
            },
            hull: HullProperties {
                mass_kg: self.mass_kg,
                length_m: self.length_m,
            },
            health: Health {
                hull: self.hull_health,
                engine: self.engine_health,
                steering: self.steering_health,
                electrical: self.electrical_health,
                flooding: self.flooding,
            },
            last_crew_at: from_ms(self.last_crew_at)?,
            last_update: from_ms(self.updated_at)?,
        })
    }
}

/// Insert or overwrite the durable part of a vessel.
pub async fn upsert_vessel(
    conn: &mut SqliteConnection,
    v: &Vessel,
    now: DateTime<Utc>,
) -> Result<()> {
    let ts = to_ms(now);
    sqlx::query(
        "INSERT INTO vessels (id, space_id, owner_id, charterer_id, leasee_id, status, \
            storage_port_id, stored_at, mode, desired_mode, pos_x, pos_y, heading, surge, sway, \
            heave, throttle, rudder_angle, bow_thruster, mass_kg, length_m, hull_health, \
            engine_health, steering_health, electrical_health, flooding, last_crew_at, \
            created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET \
            space_id = excluded.space_id, owner_id = excluded.owner_id, \
            charterer_id = excluded.charterer_id, leasee_id = excluded.leasee_id, \
            status = excluded.status, storage_port_id = excluded.storage_port_id, \
            stored_at = excluded.stored_at, mode = excluded.mode, \
            desired_mode = excluded.desired_mode, pos_x = excluded.pos_x, pos_y = excluded.pos_y, \
            heading = excluded.heading, surge = excluded.surge, sway = excluded.sway, \
            heave = excluded.heave, throttle = excluded.throttle, \
            rudder_angle = excluded.rudder_angle, bow_thruster = excluded.bow_thruster, \
            mass_kg = excluded.mass_kg, length_m = excluded.length_m, \
            hull_health = excluded.hull_health, engine_health = excluded.engine_health, \
            steering_health = excluded.steering_health, \
            electrical_health = excluded.electrical_health, flooding = excluded.flooding, \
            last_crew_at = excluded.last_crew_at, updated_at = excluded.updated_at",
    )
    .bind(v.id.as_str())
    .bind(v.space_id.as_str())
    .bind(v.owner_id.as_ref().map(|o| o.as_str()))
    .bind(v.charterer_id.as_ref().map(|o| o.as_str()))
    .bind(v.leasee_id.as_ref().map(|o| o.as_str()))
    .bind(v.status.as_str())
    .bind(v.storage_port_id.as_ref().map(|p| p.as_str()))
    .bind(opt_ms(v.stored_at))
    .bind(v.mode.as_str())
    .bind(v.desired_mode.as_str())
    .bind(v.physical.position.x)
    .bind(v.physical.position.y)
    .bind(v.physical.heading)
    .bind(v.physical.velocity.surge)
    .bind(v.physical.velocity.sway)
    .bind(v.physical.velocity.heave)
    .bind(v.controls.throttle)
    .bind(v.controls.rudder_angle)
    .bind(v.controls.bow_thruster)
    .bind(v.hull.mass_kg)
    .bind(v.hull.length_m)
    .bind(v.health.hull)
    .bind(v.health.engine)
    .bind(v.health.steering)
    .bind(v.health.electrical)
    .bind(v.health.flooding)
    .bind(to_ms(v.last_crew_at))
    .bind(ts)
    .bind(ts)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_vessel(conn: &mut SqliteConnection, id: &VesselId) -> Result<Option<Vessel>> {
    let sql = format!("SELECT {VESSEL_COLUMNS} FROM vessels WHERE id = ?");
    let row: Option<VesselRow> = sqlx::query_as(&sql)
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    row.map(VesselRow::into_domain).transpose()
}

/// All vessels in a space, ordered by id.
pub async fn list_space_vessels(
    conn: &mut SqliteConnection,
    space: &SpaceId,
) -> Result<Vec<Vessel>> {
    let sql = format!("SELECT {VESSEL_COLUMNS} FROM vessels WHERE space_id = ? ORDER BY id");
    let rows: Vec<VesselRow> = sqlx::query_as(&sql)
        .bind(space.as_str())
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(VesselRow::into_domain).collect()
}

/// Vessels owned by an operator in any space.
pub async fn list_owned_vessels(
    conn: &mut SqliteConnection,
    owner: &OperatorId,
) -> Result<Vec<Vessel>> {
    let sql = format!("SELECT {VESSEL_COLUMNS} FROM vessels WHERE owner_id = ? ORDER BY id");
    let rows: Vec<VesselRow> = sqlx::query_as(&sql)
        .bind(owner.as_str())
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(VesselRow::into_domain).collect()
}

/// Distinct spaces that hold at least one vessel.
pub async fn list_spaces(conn: &mut SqliteConnection) -> Result<Vec<SpaceId>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT DISTINCT space_id FROM vessels ORDER BY space_id")
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(|(s,)| SpaceId(s)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_pool;
    use fleet_core::{ControlMode, VesselStatus};

    #[tokio::test]
    async fn roundtrip_drops_crew() {
        let pool = memory_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();
        let mut v = Vessel::new(VesselId::from("v1"), SpaceId::from("global"), now);
        v.owner_id = Some(OperatorId::from("owner"));
        v.physical.position = Position::new(12.5, -3.0);
        v.add_crew(&OperatorId::from("owner"), "Owner", now);
        upsert_vessel(&mut conn, &v, now).await.unwrap();

        let back = get_vessel(&mut conn, &v.id).await.unwrap().unwrap();
        assert!(back.crew.is_empty());
        assert_eq!(back.mode, ControlMode::Player);
        assert_eq!(back.owner_id, v.owner_id);
        assert_eq!(back.physical.position, v.physical.position);

        v.store_at(&PortId::from("harbor-alpha"), now);
        upsert_vessel(&mut conn, &v, now).await.unwrap();
        let back = get_vessel(&mut conn, &v.id).await.unwrap().unwrap();
        assert_eq!(back.status, VesselStatus::Stored);
        assert_eq!(back.storage_port_id, Some(PortId::from("harbor-alpha")));

        let owned = list_owned_vessels(&mut conn, &OperatorId::from("owner")).await.unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(list_spaces(&mut conn).await.unwrap(), vec![SpaceId::from("global")]);
        assert!(get_vessel(&mut conn, &VesselId::from("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn schema_rejects_charterer_and_leasee() {
        let pool = memory_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();
        let mut v = Vessel::new(VesselId::from("v1"), SpaceId::from("global"), now);
        v.charterer_id = Some(OperatorId::from("a"));
        v.leasee_id = Some(OperatorId::from("b"));
        assert!(upsert_vessel(&mut conn, &v, now).await.is_err());
    }
}
