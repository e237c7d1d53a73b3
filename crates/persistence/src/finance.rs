//! Loans and insurance policies.

use crate::{from_ms, from_opt_ms, opt_ms, parse_decimal, parse_text, to_ms, Result};
use chrono::{DateTime, Utc};
use fleet_core::{InsurancePolicy, Loan, OperatorId, VesselId};
use sqlx::{FromRow, SqliteConnection};

const LOAN_COLUMNS: &str = "id, operator_id, principal, balance, interest_rate, status, \
    issued_at, due_at, last_accrued_at";

const POLICY_COLUMNS: &str = "id, vessel_id, owner_id, policy_type, coverage, deductible, \
    premium_rate, status, active_from, active_until, last_charged_at";

#[derive(FromRow)]
struct LoanRow {
    id: String,
    operator_id: String,
    principal: i64,
    balance: String,
    interest_rate: String,
    status: String,
    issued_at: i64,
    due_at: i64,
    last_accrued_at: Option<i64>,
}

impl LoanRow {
    fn into_domain(self) -> Result<Loan> {
        Ok(Loan {
            id: self.id,
            operator_id: OperatorId(self.operator_id),
            principal: self.principal,
            balance: parse_decimal("loans.balance", &self.balance)?,
            interest_rate: parse_decimal("loans.interest_rate", &self.interest_rate)?,
            status: parse_text("loans.status", &self.status)?,
            issued_at: from_ms(self.issued_at)?,
            due_at: from_ms(self.due_at)?,
            last_accrued_at: from_opt_ms(self.last_accrued_at)?,
        })
    }
}

#[derive(FromRow)]
struct PolicyRow {
    id: String,
    vessel_id: String,
    owner_id: String,
    policy_type: String,
    coverage: i64,
    deductible: i64,
    premium_rate: i64,
    status: String,
    active_from: i64,
    active_until: Option<i64>,
    last_charged_at: Option<i64>,
}

impl PolicyRow {
    fn into_domain(self) -> Result<InsurancePolicy> {
        Ok(InsurancePolicy {
            id: self.id,
            vessel_id: VesselId(self.vessel_id),
            owner_id: OperatorId(self.owner_id),
            policy_type: parse_text("insurance_policies.policy_type", &self.policy_type)?,
            coverage: self.coverage,
            deductible: self.deductible,
            premium_rate: self.premium_rate,
            status: parse_text("insurance_policies.status", &self.status)?,
            active_from: from_ms(self.active_from)?,
            active_until: from_opt_ms(self.active_until)?,
            last_charged_at: from_opt_ms(self.last_charged_at)?,
        })
    }
}

pub async fn insert_loan(conn: &mut SqliteConnection, loan: &Loan, now: DateTime<Utc>) -> Result<()> {
    let ts = to_ms(now);
    sqlx::query(
        "INSERT INTO loans (id, operator_id, principal, balance, interest_rate, status, issued_at, \
            due_at, last_accrued_at, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&loan.id)
    .bind(loan.operator_id.as_str())
    .bind(loan.principal)
    .bind(loan.balance.to_string())
    .bind(loan.interest_rate.to_string())
    .bind(loan.status.as_str())
    .bind(to_ms(loan.issued_at))
    .bind(to_ms(loan.due_at))
    .bind(opt_ms(loan.last_accrued_at))
    .bind(ts)
    .bind(ts)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_loan(conn: &mut SqliteConnection, id: &str) -> Result<Option<Loan>> {
    let sql = format!("SELECT {LOAN_COLUMNS} FROM loans WHERE id = ?");
    let row: Option<LoanRow> = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(LoanRow::into_domain).transpose()
}

/// Active loans of one operator.
pub async fn list_operator_loans(
    conn: &mut SqliteConnection,
    operator: &OperatorId,
) -> Result<Vec<Loan>> {
    let sql = format!(
        "SELECT {LOAN_COLUMNS} FROM loans WHERE operator_id = ? AND status = 'active' \
         ORDER BY issued_at, id"
    );
    let rows: Vec<LoanRow> = sqlx::query_as(&sql)
        .bind(operator.as_str())
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(LoanRow::into_domain).collect()
}

/// Every active loan, for the accrual sweep.
pub async fn list_active_loans(conn: &mut SqliteConnection) -> Result<Vec<Loan>> {
    let sql = format!("SELECT {LOAN_COLUMNS} FROM loans WHERE status = 'active' ORDER BY id");
    let rows: Vec<LoanRow> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
    rows.into_iter().map(LoanRow::into_domain).collect()
}

/// Persist balance, status and accrual stamp of `next`, but only while the
/// stored row still matches `seen`. False when another writer got there first.
pub async fn update_loan(
    conn: &mut SqliteConnection,
    seen: &Loan,
    next: &Loan,
    now: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE loans SET balance = ?, status = ?, last_accrued_at = ?, updated_at = ? \
         WHERE id = ? AND status = ? AND balance = ? AND last_accrued_at IS ?",
    )
    .bind(next.balance.to_string())
    .bind(next.status.as_str())
    .bind(opt_ms(next.last_accrued_at))
    .bind(to_ms(now))
    .bind(&seen.id)
    .bind(seen.status.as_str())
    .bind(seen.balance.to_string())
    .bind(opt_ms(seen.last_accrued_at))
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected() == 1)
}

pub async fn insert_policy(
    conn: &mut SqliteConnection,
    p: &InsurancePolicy,
    now: DateTime<Utc>,
) -> Result<()> {
    let ts = to_ms(now);
    sqlx::query(
        "INSERT INTO insurance_policies (id, vessel_id, owner_id, policy_type, coverage, \
            deductible, premium_rate, status, active_from, active_until, last_charged_at, \
            created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&p.id)
    .bind(p.vessel_id.as_str())
    .bind(p.owner_id.as_str())
    .bind(p.policy_type.as_str())
    .bind(p.coverage)
    .bind(p.deductible)
    .bind(p.premium_rate)
    .bind(p.status.as_str())
    .bind(to_ms(p.active_from))
    .bind(opt_ms(p.active_until))
    .bind(opt_ms(p.last_charged_at))
    .bind(ts)
    .bind(ts)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_policy(conn: &mut SqliteConnection, id: &str) -> Result<Option<InsurancePolicy>> {
    let sql = format!("SELECT {POLICY_COLUMNS} FROM insurance_policies WHERE id = ?");
    let row: Option<PolicyRow> = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(PolicyRow::into_domain).transpose()
}

/// Active policies of one vessel.
pub async fn list_vessel_policies(
    conn: &mut SqliteConnection,
    vessel: &VesselId,
) -> Result<Vec<InsurancePolicy>> {
    let sql = format!(
        "SELECT {POLICY_COLUMNS} FROM insurance_policies WHERE vessel_id = ? AND status = 'active' \
         ORDER BY active_from, id"
    );
    let rows: Vec<PolicyRow> = sqlx::query_as(&sql)
        .bind(vessel.as_str())
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(PolicyRow::into_domain).collect()
}

/// Every active policy, for the premium sweep.
pub async fn list_active_policies(conn: &mut SqliteConnection) -> Result<Vec<InsurancePolicy>> {
    let sql =
        format!("SELECT {POLICY_COLUMNS} FROM insurance_policies WHERE status = 'active' ORDER BY id");
    let rows: Vec<PolicyRow> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
    rows.into_iter().map(PolicyRow::into_domain).collect()
}

/// Cancel an active policy held by `owner`. False if none matched.
pub async fn cancel_policy(
    conn: &mut SqliteConnection,
    id: &str,
    owner: &OperatorId,
    now: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE insurance_policies SET status = 'canceled', updated_at = ? \
         WHERE id = ? AND owner_id = ? AND status = 'active'",
    )
    .bind(to_ms(now))
    .bind(id)
    .bind(owner.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Cancel every active policy on a vessel, e.g. when it changes hands.
pub async fn cancel_vessel_policies(
    conn: &mut SqliteConnection,
    vessel: &VesselId,
    now: DateTime<Utc>,
) -> Result<u64> {
    let res = sqlx::query(
        "UPDATE insurance_policies SET status = 'canceled', updated_at = ? \
         WHERE vessel_id = ? AND status = 'active'",
    )
    .bind(to_ms(now))
    .bind(vessel.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected())
}

/// Stamp a premium charge; lapses the policy once its term is over.
pub async fn mark_policy_charged(
    conn: &mut SqliteConnection,
    id: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    let ts = to_ms(at);
    sqlx::query(
        "UPDATE insurance_policies SET last_charged_at = ?, updated_at = ?, \
            status = CASE WHEN active_until IS NOT NULL AND active_until <= ? \
                          THEN 'canceled' ELSE status END \
         WHERE id = ? AND status = 'active'",
    )
    .bind(ts)
    .bind(ts)
    .bind(ts)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
