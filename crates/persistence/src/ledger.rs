//! Operator credit ledger.
//!
//! Profile updates are single `UPDATE … RETURNING` statements; there is no
//! application-side read-modify-write of credits, experience or safety score.

use crate::{from_ms, to_ms, Result};
use chrono::{DateTime, Utc};
use fleet_core::{Adjustment, EconomyProfile, EconomyTransaction, OperatorId, VesselId};
use sqlx::{FromRow, SqliteConnection};
use tracing::debug;

#[derive(FromRow)]
struct ProfileRow {
    rank: i64,
    experience: i64,
    credits: i64,
    safety_score: f64,
}

impl From<ProfileRow> for EconomyProfile {
    fn from(r: ProfileRow) -> Self {
        EconomyProfile {
            rank: r.rank,
            experience: r.experience,
            credits: r.credits,
            safety_score: r.safety_score,
        }
    }
}

#[derive(FromRow)]
struct TransactionRow {
    id: i64,
    operator_id: String,
    vessel_id: Option<String>,
    amount: i64,
    reason: String,
    meta: Option<String>,
    created_at: i64,
}

impl TransactionRow {
    fn into_domain(self) -> Result<EconomyTransaction> {
        let meta = match self.meta {
            Some(text) => Some(serde_json::from_str(&text)?),
            None => None,
        };
        Ok(EconomyTransaction {
            id: self.id,
            operator_id: OperatorId(self.operator_id),
            vessel_id: self.vessel_id.map(VesselId),
            amount: self.amount,
            reason: self.reason,
            meta,
            created_at: from_ms(self.created_at)?,
        })
    }
}

/// Create the operator row with default economy values if it does not exist.
pub async fn ensure_operator(
    conn: &mut SqliteConnection,
    operator: &OperatorId,
    now: DateTime<Utc>,
) -> Result<()> {
    let ts = to_ms(now);
    sqlx::query(
        "INSERT INTO operators (id, created_at, updated_at) VALUES (?, ?, ?) \
         ON CONFLICT(id) DO NOTHING",
    )
    .bind(operator.as_str())
    .bind(ts)
    .bind(ts)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Record the operator's current display name.
pub async fn set_display_name(
    conn: &mut SqliteConnection,
    operator: &OperatorId,
    display_name: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    ensure_operator(conn, operator, now).await?;
    sqlx::query("UPDATE operators SET display_name = ?, updated_at = ? WHERE id = ?")
        .bind(display_name)
        .bind(to_ms(now))
        .bind(operator.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Current economy profile; unknown operators read as the defaults.
pub async fn get_profile(
    conn: &mut SqliteConnection,
    operator: &OperatorId,
) -> Result<EconomyProfile> {
    let row: Option<ProfileRow> = sqlx::query_as(
        "SELECT rank, experience, credits, safety_score FROM operators WHERE id = ?",
    )
    .bind(operator.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(EconomyProfile::from).unwrap_or_default())
}

async fn append_transaction(
    conn: &mut SqliteConnection,
    operator: &OperatorId,
    vessel: Option<&VesselId>,
    amount: i64,
    reason: &str,
    meta: Option<&serde_json::Value>,
    now: DateTime<Utc>,
) -> Result<()> {
    let meta = meta.map(serde_json::to_string).transpose()?;
    sqlx::query(
        "INSERT INTO economy_transactions (operator_id, vessel_id, amount, reason, meta, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(operator.as_str())
    .bind(vessel.map(|v| v.as_str()))
    .bind(amount)
    .bind(reason)
    .bind(meta)
    .bind(to_ms(now))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Apply an adjustment and return the new profile.
///
/// Credits are not floor-checked. A transaction record is appended only for
/// non-zero credit deltas. Run inside a transaction to keep the profile and
/// the audit row together.
pub async fn adjust(
    conn: &mut SqliteConnection,
    operator: &OperatorId,
    adj: &Adjustment,
    now: DateTime<Utc>,
) -> Result<EconomyProfile> {
    ensure_operator(conn, operator, now).await?;
    let row: ProfileRow = sqlx::query_as(
        "UPDATE operators SET \
            credits = credits + ?, \
            experience = experience + ?, \
            rank = MAX(1, ((experience + ?) / 1000) + 1), \
            safety_score = MIN(2.0, MAX(0.0, safety_score + ?)), \
            updated_at = ? \
         WHERE id = ? \
         RETURNING rank, experience, credits, safety_score",
    )
    .bind(adj.delta_credits)
    .bind(adj.delta_experience)
    .bind(adj.delta_experience)
    .bind(adj.delta_safety_score)
    .bind(to_ms(now))
    .bind(operator.as_str())
    .fetch_one(&mut *conn)
    .await?;
    if adj.delta_credits != 0 {
        append_transaction(
            conn,
            operator,
            adj.vessel_id.as_ref(),
            adj.delta_credits,
            &adj.reason,
            adj.meta.as_ref(),
            now,
        )
        .await?;
    }
    debug!(operator_id = %operator, delta = adj.delta_credits, reason = %adj.reason, "ledger adjusted");
    Ok(row.into())
}

/// Debit `amount` only if the operator can cover it.
///
/// Returns `None` without touching anything when credits are insufficient.
pub async fn debit_if_solvent(
    conn: &mut SqliteConnection,
    operator: &OperatorId,
    amount: i64,
    vessel: Option<&VesselId>,
    reason: &str,
    meta: Option<&serde_json::Value>,
    now: DateTime<Utc>,
) -> Result<Option<EconomyProfile>> {
    ensure_operator(conn, operator, now).await?;
    let row: Option<ProfileRow> = sqlx::query_as(
        "UPDATE operators SET credits = credits - ?, updated_at = ? \
         WHERE id = ? AND credits >= ? \
         RETURNING rank, experience, credits, safety_score",
    )
    .bind(amount)
    .bind(to_ms(now))
    .bind(operator.as_str())
    .bind(amount)
    .fetch_optional(&mut *conn)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    if amount != 0 {
        append_transaction(conn, operator, vessel, -amount, reason, meta, now).await?;
    }
    debug!(operator_id = %operator, amount, reason, "ledger debited");
    Ok(Some(row.into()))
}

/// Most recent transactions for an operator, newest first.
pub async fn recent_transactions(
    conn: &mut SqliteConnection,
    operator: &OperatorId,
    limit: i64,
) -> Result<Vec<EconomyTransaction>> {
    let rows: Vec<TransactionRow> = sqlx::query_as(
        "SELECT id, operator_id, vessel_id, amount, reason, meta, created_at \
         FROM economy_transactions WHERE operator_id = ? \
         ORDER BY created_at DESC, id DESC LIMIT ?",
    )
    .bind(operator.as_str())
    .bind(limit.max(0))
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter().map(TransactionRow::into_domain).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_pool;
    use serde_json::json;

    #[tokio::test]
    async fn unknown_operator_reads_defaults() {
        let pool = memory_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let p = get_profile(&mut conn, &OperatorId::from("ghost")).await.unwrap();
        assert_eq!(p, EconomyProfile::default());
    }

    #[tokio::test]
    async fn adjust_derives_rank_and_clamps_safety() {
        let pool = memory_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let op = OperatorId::from("op");
        let now = Utc::now();
        let adj = Adjustment {
            delta_credits: 300,
            delta_experience: 2100,
            delta_safety_score: 4.0,
            reason: "cargo_delivery".into(),
            meta: Some(json!({"cargoId": "c1"})),
            ..Adjustment::default()
        };
        let p = adjust(&mut conn, &op, &adj, now).await.unwrap();
        assert_eq!(p.credits, 300);
        assert_eq!(p.experience, 2100);
        assert_eq!(p.rank, 3);
        assert_eq!(p.safety_score, 2.0);

        let p = adjust(
            &mut conn,
            &op,
            &Adjustment {
                delta_safety_score: -9.0,
                ..Adjustment::default()
            },
            now,
        )
        .await
        .unwrap();
        assert_eq!(p.safety_score, 0.0);

        let txs = recent_transactions(&mut conn, &op, 10).await.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].amount, 300);
        assert_eq!(txs[0].meta, Some(json!({"cargoId": "c1"})));
    }

    #[tokio::test]
    async fn ledger_allows_negative_but_debit_does_not() {
        let pool = memory_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let op = OperatorId::from("op");
        let now = Utc::now();
        adjust(&mut conn, &op, &Adjustment::credits(100, "grant"), now)
            .await
            .unwrap();
        let none = debit_if_solvent(&mut conn, &op, 150, None, "vessel_create", None, now)
            .await
            .unwrap();
        assert!(none.is_none());
        assert_eq!(get_profile(&mut conn, &op).await.unwrap().credits, 100);

        let p = debit_if_solvent(&mut conn, &op, 100, None, "vessel_create", None, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(p.credits, 0);

        let p = adjust(&mut conn, &op, &Adjustment::credits(-40, "lease_fee"), now)
            .await
            .unwrap();
        assert_eq!(p.credits, -40);
        let txs = recent_transactions(&mut conn, &op, 10).await.unwrap();
        assert_eq!(txs.len(), 3);
        assert_eq!(txs[0].amount, -40);
    }

    proptest::proptest! {
        #[test]
        fn stored_profile_matches_running_totals(
            steps in proptest::collection::vec((-500i64..500, 0i64..900, -0.5f64..0.5), 1..12)
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let pool = memory_pool().await.unwrap();
                let mut conn = pool.acquire().await.unwrap();
                let op = OperatorId::from("op");
                let (mut credits, mut xp, mut safety) = (0i64, 0i64, 1.0f64);
                let mut nonzero = 0usize;
                for (dc, dx, ds) in &steps {
                    let adj = Adjustment {
                        delta_credits: *dc,
                        delta_experience: *dx,
                        delta_safety_score: *ds,
                        reason: "test".into(),
                        ..Adjustment::default()
                    };
                    let p = adjust(&mut conn, &op, &adj, Utc::now()).await.unwrap();
                    credits += dc;
                    xp += dx;
                    safety = (safety + ds).clamp(0.0, 2.0);
                    if *dc != 0 {
                        nonzero += 1;
                    }
                    assert_eq!(p.credits, credits);
                    assert_eq!(p.experience, xp);
                    assert_eq!(p.rank, xp / 1000 + 1);
                    assert!((p.safety_score - safety).abs() < 1e-9);
                }
                let txs = recent_transactions(&mut conn, &op, 100).await.unwrap();
                assert_eq!(txs.len(), nonzero);
            });
        }
    }
}
