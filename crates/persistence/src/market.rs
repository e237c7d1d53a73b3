//! Lease, charter and sale listings.

use crate::{from_opt_ms, opt_ms, parse_decimal, parse_text, to_ms, Result};
use chrono::{DateTime, Utc};
use fleet_core::{Lease, OperatorId, Sale, VesselId};
use sqlx::{FromRow, SqliteConnection};

const LEASE_COLUMNS: &str = "id, vessel_id, owner_id, lessee_id, lease_type, rate_per_hour, \
    revenue_share, status, started_at, ends_at, last_charged_at";

const SALE_COLUMNS: &str =
    "id, vessel_id, seller_id, sale_type, price, reserve_price, buyer_id, status, ends_at";

#[derive(FromRow)]
struct LeaseRow {
    id: String,
    vessel_id: String,
    owner_id: String,
    lessee_id: Option<String>,
    lease_type: String,
    rate_per_hour: i64,
    revenue_share: String,
    status: String,
    started_at: Option<i64>,
    ends_at: Option<i64>,
    last_charged_at: Option<i64>,
}

impl LeaseRow {
    fn into_domain(self) -> Result<Lease> {
        Ok(Lease {
            id: self.id,
            vessel_id: VesselId(self.vessel_id),
            owner_id: OperatorId(self.owner_id),
            lessee_id: self.lessee_id.map(OperatorId),
            lease_type: parse_text("vessel_leases.lease_type", &self.lease_type)?,
            rate_per_hour: self.rate_per_hour,
            revenue_share: parse_decimal("vessel_leases.revenue_share", &self.revenue_share)?,
            status: parse_text("vessel_leases.status", &self.status)?,
            started_at: from_opt_ms(self.started_at)?,
            ends_at: from_opt_ms(self.ends_at)?,
            last_charged_at: from_opt_ms(self.last_charged_at)?,
        })
    }
}

#[derive(FromRow)]
struct SaleRow {
    id: String,
    vessel_id: String,
    seller_id: Option<String>,
    sale_type: String,
    price: i64,
    reserve_price: Option<i64>,
    buyer_id: Option<String>,
    status: String,
    ends_at: Option<i64>,
}

impl SaleRow {
    fn into_domain(self) -> Result<Sale> {
        Ok(Sale {
            id: self.id,
            vessel_id: VesselId(self.vessel_id),
            seller_id: self.seller_id.map(OperatorId),
            sale_type: parse_text("vessel_sales.sale_type", &self.sale_type)?,
            price: self.price,
            reserve_price: self.reserve_price,
            buyer_id: self.buyer_id.map(OperatorId),
            status: parse_text("vessel_sales.status", &self.status)?,
            ends_at: from_opt_ms(self.ends_at)?,
        })
    }
}

pub async fn insert_lease(
    conn: &mut SqliteConnection,
    lease: &Lease,
    now: DateTime<Utc>,
) -> Result<()> {
    let ts = to_ms(now);
    sqlx::query(
        "INSERT INTO vessel_leases (id, vessel_id, owner_id, lessee_id, lease_type, rate_per_hour, \
            revenue_share, status, started_at, ends_at, last_charged_at, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&lease.id)
    .bind(lease.vessel_id.as_str())
    .bind(lease.owner_id.as_str())
    .bind(lease.lessee_id.as_ref().map(|o| o.as_str()))
    .bind(lease.lease_type.as_str())
    .bind(lease.rate_per_hour)
    .bind(lease.revenue_share.to_string())
    .bind(lease.status.as_str())
    .bind(opt_ms(lease.started_at))
    .bind(opt_ms(lease.ends_at))
    .bind(opt_ms(lease.last_charged_at))
    .bind(ts)
    .bind(ts)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_lease(conn: &mut SqliteConnection, id: &str) -> Result<Option<Lease>> {
    let sql = format!("SELECT {LEASE_COLUMNS} FROM vessel_leases WHERE id = ?");
    let row: Option<LeaseRow> = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(LeaseRow::into_domain).transpose()
}

/// The open or active lease on a vessel, if any.
pub async fn current_lease_for_vessel(
    conn: &mut SqliteConnection,
    vessel: &VesselId,
) -> Result<Option<Lease>> {
    let sql = format!(
        "SELECT {LEASE_COLUMNS} FROM vessel_leases \
         WHERE vessel_id = ? AND status IN ('open', 'active') LIMIT 1"
    );
    let row: Option<LeaseRow> = sqlx::query_as(&sql)
        .bind(vessel.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    row.map(LeaseRow::into_domain).transpose()
}

/// The active lease on a vessel, if any.
pub async fn active_lease_for_vessel(
    conn: &mut SqliteConnection,
    vessel: &VesselId,
) -> Result<Option<Lease>> {
    Ok(current_lease_for_vessel(conn, vessel)
        .await?
        .filter(|l| l.status == fleet_core::LeaseStatus::Active))
}

/// Every open listing, oldest first.
pub async fn list_open_leases(conn: &mut SqliteConnection) -> Result<Vec<Lease>> {
    let sql = format!(
        "SELECT {LEASE_COLUMNS} FROM vessel_leases WHERE status = 'open' ORDER BY created_at, id"
    );
    let rows: Vec<LeaseRow> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
    rows.into_iter().map(LeaseRow::into_domain).collect()
}

/// Every active lease, for fee and expiry sweeps.
pub async fn list_active_leases(conn: &mut SqliteConnection) -> Result<Vec<Lease>> {
    let sql = format!(
        "SELECT {LEASE_COLUMNS} FROM vessel_leases WHERE status = 'active' ORDER BY id"
    );
    let rows: Vec<LeaseRow> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
    rows.into_iter().map(LeaseRow::into_domain).collect()
}

/// Move an open lease to active. False if it was no longer open.
pub async fn activate_lease(
    conn: &mut SqliteConnection,
    id: &str,
    lessee: &OperatorId,
    now: DateTime<Utc>,
) -> Result<bool> {
    let ts = to_ms(now);
    let res = sqlx::query(
        "UPDATE vessel_leases SET status = 'active', lessee_id = ?, started_at = ?, \
            last_charged_at = ?, updated_at = ? \
         WHERE id = ? AND status = 'open'",
    )
    .bind(lessee.as_str())
    .bind(ts)
    .bind(ts)
    .bind(ts)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Complete an open or active lease. False if it was already completed.
pub async fn complete_lease(
    conn: &mut SqliteConnection,
    id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let ts = to_ms(now);
    let res = sqlx::query(
        "UPDATE vessel_leases SET status = 'completed', ends_at = COALESCE(MIN(ends_at, ?), ?), \
            updated_at = ? \
         WHERE id = ? AND status IN ('open', 'active')",
    )
    .bind(ts)
    .bind(ts)
    .bind(ts)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Stamp the last fee charge on an active lease.
pub async fn mark_lease_charged(
    conn: &mut SqliteConnection,
    id: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    let ts = to_ms(at);
    sqlx::query(
        "UPDATE vessel_leases SET last_charged_at = ?, updated_at = ? WHERE id = ? AND status = 'active'",
    )
    .bind(ts)
    .bind(ts)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn insert_sale(conn: &mut SqliteConnection, sale: &Sale, now: DateTime<Utc>) -> Result<()> {
    let ts = to_ms(now);
    sqlx::query(
        "INSERT INTO vessel_sales (id, vessel_id, seller_id, sale_type, price, reserve_price, \
            buyer_id, status, ends_at, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&sale.id)
    .bind(sale.vessel_id.as_str())
    .bind(sale.seller_id.as_ref().map(|o| o.as_str()))
    .bind(sale.sale_type.as_str())
    .bind(sale.price)
    .bind(sale.reserve_price)
    .bind(sale.buyer_id.as_ref().map(|o| o.as_str()))
    .bind(sale.status.as_str())
    .bind(opt_ms(sale.ends_at))
    .bind(ts)
    .bind(ts)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_sale(conn: &mut SqliteConnection, id: &str) -> Result<Option<Sale>> {
    let sql = format!("SELECT {SALE_COLUMNS} FROM vessel_sales WHERE id = ?");
    let row: Option<SaleRow> = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(SaleRow::into_domain).transpose()
}

pub async fn open_sale_for_vessel(
    conn: &mut SqliteConnection,
    vessel: &VesselId,
) -> Result<Option<Sale>> {
    let sql = format!(
        "SELECT {SALE_COLUMNS} FROM vessel_sales WHERE vessel_id = ? AND status = 'open' LIMIT 1"
    );
    let row: Option<SaleRow> = sqlx::query_as(&sql)
        .bind(vessel.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    row.map(SaleRow::into_domain).transpose()
}

pub async fn list_open_sales(conn: &mut SqliteConnection) -> Result<Vec<Sale>> {
    let sql = format!(
        "SELECT {SALE_COLUMNS} FROM vessel_sales WHERE status = 'open' ORDER BY created_at, id"
    );
    let rows: Vec<SaleRow> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
    rows.into_iter().map(SaleRow::into_domain).collect()
}

/// Mark an open sale as sold. False if someone else closed it first.
pub async fn mark_sale_sold(
    conn: &mut SqliteConnection,
    id: &str,
    buyer: &OperatorId,
    now: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE vessel_sales SET status = 'sold', buyer_id = ?, updated_at = ? \
         WHERE id = ? AND status = 'open'",
    )
    .bind(buyer.as_str())
    .bind(to_ms(now))
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Open sales whose end time has passed.
pub async fn list_ended_sales(conn: &mut SqliteConnection, now: DateTime<Utc>) -> Result<Vec<Sale>> {
    let sql = format!(
        "SELECT {SALE_COLUMNS} FROM vessel_sales \
         WHERE status = 'open' AND ends_at IS NOT NULL AND ends_at <= ? ORDER BY ends_at, id"
    );
    let rows: Vec<SaleRow> = sqlx::query_as(&sql)
        .bind(to_ms(now))
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(SaleRow::into_domain).collect()
}

/// Close an open sale without a buyer. False if it was no longer open.
pub async fn cancel_sale(conn: &mut SqliteConnection, id: &str, now: DateTime<Utc>) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE vessel_sales SET status = 'canceled', updated_at = ? WHERE id = ? AND status = 'open'",
    )
    .bind(to_ms(now))
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected() == 1)
}
