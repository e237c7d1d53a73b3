//! Ledger operations on top of the store, plus lease revenue sharing.

use crate::{Engine, Result};
use chrono::{DateTime, Utc};
use fleet_core::{Adjustment, EconomyProfile, EconomyTransaction, LeaseType, OperatorId};
use fleet_econ::revenue_share_split;
use persistence::{ledger, market};
use serde_json::json;
use sqlx::SqliteConnection;
use tracing::debug;

/// Profiles touched by a ledger write, to publish after commit.
pub type Touched = Vec<(OperatorId, EconomyProfile)>;

impl Engine {
    pub async fn profile(&self, operator: &OperatorId) -> Result<EconomyProfile> {
        let mut conn = self.pool.acquire().await?;
        Ok(ledger::get_profile(&mut conn, operator).await?)
    }

    /// Apply an adjustment in its own transaction and notify the operator.
    pub async fn adjust(&self, operator: &OperatorId, adj: Adjustment) -> Result<EconomyProfile> {
        let now = self.now();
        let mut tx = self.pool.begin().await?;
        let profile = ledger::adjust(&mut tx, operator, &adj, now).await?;
        tx.commit().await?;
        self.publish_profiles([(operator.clone(), profile)]);
        Ok(profile)
    }

    pub async fn recent_transactions(
        &self,
        operator: &OperatorId,
        limit: i64,
    ) -> Result<Vec<EconomyTransaction>> {
        let mut conn = self.pool.acquire().await?;
        Ok(ledger::recent_transactions(&mut conn, operator, limit).await?)
    }
}

/// Credit earnings, forwarding the lease owner's share when the vessel is leased.
///
/// Only positive credits earned with a vessel under an active `lease` (not a
/// charter) with a non-zero share are split; the owner's cut is
/// `floor(delta × share)` booked as `lease_share`.
pub(crate) async fn credit_with_revenue_share(
    conn: &mut SqliteConnection,
    earner: &OperatorId,
    adj: Adjustment,
    now: DateTime<Utc>,
) -> Result<Touched> {
    let lease = match &adj.vessel_id {
        Some(vessel) if adj.delta_credits > 0 => market::active_lease_for_vessel(conn, vessel).await?,
        _ => None,
    };
    let Some(lease) = lease.filter(|l| {
        l.lease_type == LeaseType::Lease && !l.revenue_share.is_zero() && &l.owner_id != earner
    }) else {
        let profile = ledger::adjust(conn, earner, &adj, now).await?;
        return Ok(vec![(earner.clone(), profile)]);
    };

    let (earner_part, owner_part) = revenue_share_split(adj.delta_credits, lease.revenue_share)?;
    let mut touched = Vec::with_capacity(2);
    let earner_adj = Adjustment {
        delta_credits: earner_part,
        ..adj.clone()
    };
    touched.push((
        earner.clone(),
        ledger::adjust(conn, earner, &earner_adj, now).await?,
    ));
    if owner_part > 0 {
        let mut owner_adj = Adjustment::credits(owner_part, "lease_share").with_meta(json!({
            "leaseId": lease.id,
            "fromOperatorId": earner.as_str(),
            "sourceReason": adj.reason,
        }));
        owner_adj.vessel_id = adj.vessel_id.clone();
        touched.push((
            lease.owner_id.clone(),
            ledger::adjust(conn, &lease.owner_id, &owner_adj, now).await?,
        ));
        debug!(
            lease_id = %lease.id,
            owner_id = %lease.owner_id,
            share = owner_part,
            "revenue share forwarded"
        );
    }
    Ok(touched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use fleet_core::{Lease, LeaseStatus, SpaceId, Vessel, VesselId};
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn adjust_publishes_economy_update() {
        let (engine, _) = engine().await;
        let mut rx = engine.broadcaster().subscribe_economy();
        let op = OperatorId::from("op");
        engine
            .adjust(&op, Adjustment::credits(250, "grant"))
            .await
            .unwrap();
        let update = rx.recv().await.unwrap();
        assert_eq!(update.operator_id, op);
        assert_eq!(update.profile.credits, 250);
        assert_eq!(engine.profile(&op).await.unwrap().credits, 250);
        assert_eq!(engine.recent_transactions(&op, 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lease_share_goes_to_owner() {
        let (engine, _) = engine().await;
        let now = engine.now();
        let vessel_id = VesselId::from("v1");
        let owner = OperatorId::from("owner");
        let lessee = OperatorId::from("lessee");
        let mut conn = engine.pool().acquire().await.unwrap();
        let mut v = Vessel::new(vessel_id.clone(), SpaceId::from("global"), now);
        v.owner_id = Some(owner.clone());
        persistence::vessels::upsert_vessel(&mut conn, &v, now)
            .await
            .unwrap();
        let lease = Lease {
            id: "lease-1".into(),
            vessel_id: vessel_id.clone(),
            owner_id: owner.clone(),
            lessee_id: None,
            lease_type: LeaseType::Lease,
            rate_per_hour: 10,
            revenue_share: Decimal::new(25, 2),
            status: LeaseStatus::Open,
            started_at: None,
            ends_at: None,
            last_charged_at: None,
        };
        market::insert_lease(&mut conn, &lease, now).await.unwrap();
        market::activate_lease(&mut conn, "lease-1", &lessee, now)
            .await
            .unwrap();

        let adj = Adjustment::credits(101, "cargo_delivery").with_vessel(&vessel_id);
        let touched = credit_with_revenue_share(&mut conn, &lessee, adj, now)
            .await
            .unwrap();
        assert_eq!(touched.len(), 2);
        assert_eq!(ledger::get_profile(&mut conn, &lessee).await.unwrap().credits, 76);
        assert_eq!(ledger::get_profile(&mut conn, &owner).await.unwrap().credits, 25);

        // Debits are never shared.
        let adj = Adjustment::credits(-10, "fine").with_vessel(&vessel_id);
        let touched = credit_with_revenue_share(&mut conn, &lessee, adj, now)
            .await
            .unwrap();
        assert_eq!(touched.len(), 1);
    }
}
