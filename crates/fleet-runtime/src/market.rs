//! Lease, charter and sale state machines.
//!
//! Each transition locks the vessel, checks the market row and then changes
//! the row and the vessel in one transaction. Row transitions are conditional
//! (`WHERE status = 'open'`) so a concurrent accept or purchase loses cleanly.

use crate::ledger::Touched;
use crate::{Engine, GatewayError, Result, Session};
use chrono::{DateTime, Utc};
use fleet_core::{
    require_fraction, Adjustment, ControlMode, Lease, LeaseStatus, LeaseType, OperatorId, Sale,
    SaleStatus, SaleType, Vessel, VesselId, VesselProjection, VesselStatus,
};
use persistence::{finance, ledger, market, vessels};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

/// Terms an owner offers a vessel under.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseTerms {
    pub vessel_id: VesselId,
    pub lease_type: LeaseType,
    pub rate_per_hour: i64,
    #[serde(default)]
    pub revenue_share: Decimal,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
}

/// A sale or auction listing.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleTerms {
    pub vessel_id: VesselId,
    #[serde(default = "default_sale_type")]
    pub sale_type: SaleType,
    pub price: i64,
    #[serde(default)]
    pub reserve_price: Option<i64>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
}

fn default_sale_type() -> SaleType {
    SaleType::Sale
}

fn check_listable(vessel: &Vessel) -> Result<()> {
    match vessel.status {
        VesselStatus::Active | VesselStatus::Stored => Ok(()),
        other => Err(GatewayError::unavailable(format!(
            "vessel {} is {other}",
            vessel.id
        ))),
    }
}

impl Engine {
    /// Owner lists a vessel for lease or charter.
    pub async fn create_lease(&self, session: &Session, terms: LeaseTerms) -> Result<Lease> {
        if terms.rate_per_hour <= 0 {
            return Err(GatewayError::validation("rate per hour must be > 0"));
        }
        require_fraction(terms.revenue_share, "revenue share")?;
        let now = self.now();
        if terms.ends_at.is_some_and(|end| end <= now) {
            return Err(GatewayError::validation("lease end must be in the future"));
        }
        let revenue_share = match terms.lease_type {
            LeaseType::Lease => terms.revenue_share,
            LeaseType::Charter => Decimal::ZERO,
        };

        let handle = self.vessel_handle(&terms.vessel_id).await?;
        let guard = handle.lock().await;
        let owner = match &guard.owner_id {
            Some(owner) if owner == &session.operator_id || session.admin => owner.clone(),
            _ => {
                return Err(GatewayError::unauthorized(format!(
                    "only the owner can lease out {}",
                    terms.vessel_id
                )))
            }
        };
        check_listable(&guard)?;

        let lease = Lease {
            id: self.next_id("lease"),
            vessel_id: terms.vessel_id.clone(),
            owner_id: owner,
            lessee_id: None,
            lease_type: terms.lease_type,
            rate_per_hour: terms.rate_per_hour,
            revenue_share,
            status: LeaseStatus::Open,
            started_at: None,
            ends_at: terms.ends_at,
            last_charged_at: None,
        };
        let mut tx = self.pool.begin().await?;
        if market::current_lease_for_vessel(&mut tx, &lease.vessel_id)
            .await?
            .is_some()
        {
            return Err(GatewayError::unavailable("vessel already has an open or active lease"));
        }
        if market::open_sale_for_vessel(&mut tx, &lease.vessel_id)
            .await?
            .is_some()
        {
            return Err(GatewayError::unavailable("vessel is listed for sale"));
        }
        market::insert_lease(&mut tx, &lease, now).await?;
        tx.commit().await?;
        drop(guard);
        info!(lease_id = %lease.id, vessel_id = %lease.vessel_id, lease_type = %lease.lease_type, "lease listed");
        Ok(lease)
    }

    /// Take an open lease. The vessel becomes leased or chartered to the caller.
    pub async fn accept_lease(&self, session: &Session, lease_id: &str) -> Result<Lease> {
        let lease = self.load_lease(lease_id).await?;
        if lease.status != LeaseStatus::Open {
            return Err(GatewayError::unavailable(format!("lease {lease_id} is not open")));
        }
        let op = &session.operator_id;
        if &lease.owner_id == op {
            return Err(GatewayError::validation("cannot lease your own vessel"));
        }

        let handle = self.vessel_handle(&lease.vessel_id).await?;
        let mut guard = handle.lock_owned().await;
        if guard.owner_id.as_ref() != Some(&lease.owner_id) {
            return Err(GatewayError::unavailable("vessel changed hands"));
        }
        check_listable(&guard)?;

        let now = self.now();
        let mut next = Vessel::clone(&guard);
        next.storage_port_id = None;
        next.stored_at = None;
        match lease.lease_type {
            LeaseType::Lease => {
                next.status = VesselStatus::Leased;
                next.leasee_id = Some(op.clone());
                next.charterer_id = None;
            }
            LeaseType::Charter => {
                next.status = VesselStatus::Chartered;
                next.charterer_id = Some(op.clone());
                next.leasee_id = None;
            }
        }
        next.desired_mode = ControlMode::Player;
        next.last_update = now;

        let mut tx = self.pool.begin().await?;
        if !market::activate_lease(&mut tx, lease_id, op, now).await? {
            return Err(GatewayError::unavailable(format!(
                "lease {lease_id} is no longer open"
            )));
        }
        vessels::upsert_vessel(&mut tx, &next, now).await?;
        tx.commit().await?;

        let projection = next.projection();
        let space = next.space_id.clone();
        *guard = next;
        drop(guard);
        info!(lease_id, operator_id = %op, "lease accepted");
        self.publish_vessels(&space, [projection]);
        Ok(Lease {
            lessee_id: Some(op.clone()),
            status: LeaseStatus::Active,
            started_at: Some(now),
            last_charged_at: Some(now),
            ..lease
        })
    }

    /// End a lease early. Lessee, owner or admin only.
    pub async fn end_lease(&self, session: &Session, lease_id: &str) -> Result<Lease> {
        let lease = self.load_lease(lease_id).await?;
        let op = &session.operator_id;
        let party = &lease.owner_id == op || lease.lessee_id.as_ref() == Some(op);
        if !party && !session.admin {
            return Err(GatewayError::unauthorized("not a party to this lease"));
        }
        match lease.status {
            LeaseStatus::Completed => {
                Err(GatewayError::unavailable(format!("lease {lease_id} already ended")))
            }
            LeaseStatus::Open => {
                let now = self.now();
                let mut conn = self.pool.acquire().await?;
                if !market::complete_lease(&mut conn, lease_id, now).await? {
                    return Err(GatewayError::unavailable(format!(
                        "lease {lease_id} already ended"
                    )));
                }
                Ok(Lease {
                    status: LeaseStatus::Completed,
                    ..lease
                })
            }
            LeaseStatus::Active => {
                let now = self.now();
                self.finish_lease(&lease, now).await?;
                Ok(Lease {
                    status: LeaseStatus::Completed,
                    ..lease
                })
            }
        }
    }

    /// Complete an active lease and hand the vessel back to its owner.
    ///
    /// The vessel is laid up if it sits in a port, otherwise it returns to
    /// active service; crew is cleared either way.
    pub(crate) async fn finish_lease(
        &self,
        lease: &Lease,
        now: DateTime<Utc>,
    ) -> Result<VesselProjection> {
        let handle = self.vessel_handle(&lease.vessel_id).await?;
        let mut guard = handle.lock_owned().await;
        let mut next = Vessel::clone(&guard);
        next.charterer_id = None;
        next.leasee_id = None;
        let port = self.port_at(&next.physical.position).map(|p| p.id.clone());
        match &port {
            Some(port_id) => next.store_at(port_id, now),
            None => {
                next.status = VesselStatus::Active;
                next.storage_port_id = None;
                next.stored_at = None;
                next.clear_crew(now);
            }
        }

        let mut tx = self.pool.begin().await?;
        if !market::complete_lease(&mut tx, &lease.id, now).await? {
            return Err(GatewayError::unavailable(format!(
                "lease {} already ended",
                lease.id
            )));
        }
        vessels::upsert_vessel(&mut tx, &next, now).await?;
        tx.commit().await?;

        self.registry.sync_autopilot(&mut next, now);
        let space = next.space_id.clone();
        let projection = next.projection();
        *guard = next;
        drop(guard);
        self.registry.clear_vessel_crew(&space, &lease.vessel_id);
        info!(lease_id = %lease.id, vessel_id = %lease.vessel_id, stored = port.is_some(), "lease completed");
        self.publish_vessels(&space, [projection.clone()]);
        Ok(projection)
    }

    pub async fn open_leases(&self) -> Result<Vec<Lease>> {
        let mut conn = self.pool.acquire().await?;
        Ok(market::list_open_leases(&mut conn).await?)
    }

    async fn load_lease(&self, lease_id: &str) -> Result<Lease> {
        let mut conn = self.pool.acquire().await?;
        market::get_lease(&mut conn, lease_id)
            .await?
            .ok_or_else(|| GatewayError::not_found("lease", lease_id))
    }

    /// Owner lists a vessel in port for sale or auction.
    pub async fn create_sale(&self, session: &Session, terms: SaleTerms) -> Result<Sale> {
        if terms.price <= 0 {
            return Err(GatewayError::validation("price must be > 0"));
        }
        if terms.reserve_price.is_some_and(|r| r < 0) {
            return Err(GatewayError::validation("reserve price must be >= 0"));
        }
        if terms.sale_type == SaleType::Repossession {
            return Err(GatewayError::validation("repossession sales are opened by the bank"));
        }
        let now = self.now();

        let handle = self.vessel_handle(&terms.vessel_id).await?;
        let mut guard = handle.lock_owned().await;
        let Some(seller) = guard.owner_id.clone() else {
            return Err(GatewayError::unavailable("vessel has no owner"));
        };
        if seller != session.operator_id && !session.admin {
            return Err(GatewayError::unauthorized(format!(
                "only the owner can sell {}",
                terms.vessel_id
            )));
        }
        check_listable(&guard)?;
        if self.port_at(&guard.physical.position).is_none() {
            return Err(GatewayError::unavailable("vessel must be in port to be listed"));
        }

        let sale = Sale {
            id: self.next_id("sale"),
            vessel_id: terms.vessel_id.clone(),
            seller_id: Some(seller),
            sale_type: terms.sale_type,
            price: terms.price,
            reserve_price: terms.reserve_price,
            buyer_id: None,
            status: SaleStatus::Open,
            ends_at: terms.ends_at,
        };
        let mut next = Vessel::clone(&guard);
        next.status = match terms.sale_type {
            SaleType::Auction => VesselStatus::Auction,
            _ => VesselStatus::Sale,
        };
        next.storage_port_id = None;
        next.stored_at = None;
        next.neutral_controls();
        next.clear_crew(now);

        let mut tx = self.pool.begin().await?;
        if market::current_lease_for_vessel(&mut tx, &sale.vessel_id)
            .await?
            .is_some()
        {
            return Err(GatewayError::unavailable("vessel has an open or active lease"));
        }
        if market::open_sale_for_vessel(&mut tx, &sale.vessel_id)
            .await?
            .is_some()
        {
            return Err(GatewayError::unavailable("vessel is already listed"));
        }
        market::insert_sale(&mut tx, &sale, now).await?;
        vessels::upsert_vessel(&mut tx, &next, now).await?;
        tx.commit().await?;

        self.registry.sync_autopilot(&mut next, now);
        let space = next.space_id.clone();
        let projection = next.projection();
        *guard = next;
        drop(guard);
        self.registry.clear_vessel_crew(&space, &sale.vessel_id);
        info!(sale_id = %sale.id, vessel_id = %sale.vessel_id, price = sale.price, "vessel listed for sale");
        self.publish_vessels(&space, [projection]);
        Ok(sale)
    }

    /// Buy a listed vessel.
    ///
    /// Marking the sale sold, debiting the buyer, crediting the seller and
    /// transferring ownership commit together or not at all.
    pub async fn buy_sale(&self, session: &Session, sale_id: &str) -> Result<Sale> {
        let sale = {
            let mut conn = self.pool.acquire().await?;
            market::get_sale(&mut conn, sale_id)
                .await?
                .ok_or_else(|| GatewayError::not_found("sale", sale_id))?
        };
        let buyer = &session.operator_id;
        if sale.status != SaleStatus::Open {
            return Err(GatewayError::unavailable(format!("sale {sale_id} is closed")));
        }
        if sale.seller_id.as_ref() == Some(buyer) {
            return Err(GatewayError::validation("cannot buy your own vessel"));
        }
        if sale.reserve_price.is_some_and(|reserve| sale.price < reserve) {
            return Err(GatewayError::ReserveNotMet);
        }
        let now = self.now();
        if sale.ends_at.is_some_and(|end| end <= now) {
            return Err(GatewayError::Expired(format!("sale {sale_id}")));
        }

        let handle = self.vessel_handle(&sale.vessel_id).await?;
        let mut guard = handle.lock_owned().await;
        let mut next = Vessel::clone(&guard);
        next.owner_id = Some(buyer.clone());
        next.charterer_id = None;
        next.leasee_id = None;
        next.status = VesselStatus::Active;
        next.storage_port_id = None;
        next.stored_at = None;
        next.clear_crew(now);
        next.desired_mode = ControlMode::Player;

        let mut tx = self.pool.begin().await?;
        if !market::mark_sale_sold(&mut tx, sale_id, buyer, now).await? {
            return Err(GatewayError::unavailable(format!("sale {sale_id} is closed")));
        }
        let meta = json!({ "saleId": sale_id, "saleType": sale.sale_type.as_str() });
        let Some(buyer_profile) = ledger::debit_if_solvent(
            &mut tx,
            buyer,
            sale.price,
            Some(&sale.vessel_id),
            "vessel_purchase",
            Some(&meta),
            now,
        )
        .await?
        else {
            return Err(GatewayError::InsufficientCredits { needed: sale.price });
        };
        let mut touched: Touched = vec![(buyer.clone(), buyer_profile)];
        if let Some(seller) = &sale.seller_id {
            let adj = Adjustment::credits(sale.price, "vessel_sale")
                .with_vessel(&sale.vessel_id)
                .with_meta(meta.clone());
            touched.push((seller.clone(), ledger::adjust(&mut tx, seller, &adj, now).await?));
        }
        if let Some(lease) = market::current_lease_for_vessel(&mut tx, &sale.vessel_id).await? {
            market::complete_lease(&mut tx, &lease.id, now).await?;
        }
        finance::cancel_vessel_policies(&mut tx, &sale.vessel_id, now).await?;
        vessels::upsert_vessel(&mut tx, &next, now).await?;
        tx.commit().await?;

        self.registry.sync_autopilot(&mut next, now);
        let space = next.space_id.clone();
        let projection = next.projection();
        *guard = next;
        drop(guard);
        info!(sale_id, buyer_id = %buyer, price = sale.price, "vessel sold");
        self.publish_profiles(touched);
        self.publish_vessels(&space, [projection]);
        Ok(Sale {
            buyer_id: Some(buyer.clone()),
            status: SaleStatus::Sold,
            ..sale
        })
    }

    /// Seller (or an admin) withdraws an open listing.
    pub async fn cancel_sale(&self, session: &Session, sale_id: &str) -> Result<VesselProjection> {
        let sale = {
            let mut conn = self.pool.acquire().await?;
            market::get_sale(&mut conn, sale_id)
                .await?
                .ok_or_else(|| GatewayError::not_found("sale", sale_id))?
        };
        if !session.admin && sale.seller_id.as_ref() != Some(&session.operator_id) {
            return Err(GatewayError::unauthorized(format!("sale {sale_id} is not yours")));
        }
        if sale.status != SaleStatus::Open {
            return Err(GatewayError::unavailable(format!("sale {sale_id} is closed")));
        }
        let projection = self.close_sale(&sale, self.now()).await?;
        info!(sale_id, operator_id = %session.operator_id, "sale withdrawn");
        Ok(projection)
    }

    /// Close open sales past their end time and put the vessels back in service.
    pub(crate) async fn expire_sales(&self, now: DateTime<Utc>) -> Result<usize> {
        let ended = {
            let mut conn = self.pool.acquire().await?;
            market::list_ended_sales(&mut conn, now).await?
        };
        let mut closed = 0usize;
        for sale in ended {
            match self.close_sale(&sale, now).await {
                Ok(_) => {
                    info!(sale_id = %sale.id, vessel_id = %sale.vessel_id, "sale ended unsold");
                    closed += 1;
                }
                Err(GatewayError::Unavailable(_) | GatewayError::NotFound { .. }) => {
                    debug!(sale_id = %sale.id, "sale already closed")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(closed)
    }

    /// Cancel the listing and return a listed vessel to active service.
    async fn close_sale(&self, sale: &Sale, now: DateTime<Utc>) -> Result<VesselProjection> {
        let handle = self.vessel_handle(&sale.vessel_id).await?;
        let mut guard = handle.lock_owned().await;
        let mut next = Vessel::clone(&guard);
        if matches!(
            next.status,
            VesselStatus::Sale | VesselStatus::Auction | VesselStatus::Repossession
        ) {
            next.activate(now);
        }

        let mut tx = self.pool.begin().await?;
        if !market::cancel_sale(&mut tx, &sale.id, now).await? {
            return Err(GatewayError::unavailable(format!("sale {} is closed", sale.id)));
        }
        vessels::upsert_vessel(&mut tx, &next, now).await?;
        tx.commit().await?;

        self.registry.sync_autopilot(&mut next, now);
        let space = next.space_id.clone();
        let projection = next.projection();
        *guard = next;
        drop(guard);
        self.publish_vessels(&space, [projection.clone()]);
        Ok(projection)
    }

    pub async fn open_sales(&self) -> Result<Vec<Sale>> {
        let mut conn = self.pool.acquire().await?;
        Ok(market::list_open_sales(&mut conn).await?)
    }

    /// Vessels currently owned by an operator, from the store.
    pub async fn owned_vessels(&self, operator: &OperatorId) -> Result<Vec<VesselId>> {
        let mut conn = self.pool.acquire().await?;
        Ok(vessels::list_owned_vessels(&mut conn, operator)
            .await?
            .into_iter()
            .map(|v| v.id)
            .collect())
    }
}
