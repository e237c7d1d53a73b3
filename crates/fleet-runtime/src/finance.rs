//! Loans, insurance and the periodic money sweeps.
//!
//! Player-initiated purchases debit with [`ledger::debit_if_solvent`]; the
//! sweeps charge with plain adjustments and may leave an operator in debt.

use crate::ledger::Touched;
use crate::{Engine, GatewayError, Result, Session};
use chrono::{DateTime, Duration, Utc};
use fleet_core::{
    Adjustment, InsurancePolicy, Lease, Loan, LoanStatus, OperatorId, PolicyStatus, PolicyType,
    Sale, SaleStatus, SaleType, Vessel, VesselId, VesselStatus,
};
use fleet_econ::{accrue_interest, loan_limit};
use persistence::{finance, ledger, market, vessels};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

/// An owner's request for cover on one vessel.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsuranceRequest {
    pub vessel_id: VesselId,
    pub policy_type: PolicyType,
    pub coverage: i64,
    #[serde(default)]
    pub deductible: i64,
    pub premium_rate: i64,
    #[serde(default)]
    pub term_days: Option<i64>,
}

/// Work done by one lease sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LeaseSweep {
    pub charged: usize,
    pub completed: usize,
}

/// Work done by one finance sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FinanceSweep {
    pub accrued: usize,
    pub defaulted: usize,
    pub repossessed: usize,
    pub premiums: usize,
}

/// Whole hours between `from` and `until`, and the instant they end at.
fn whole_hours(from: DateTime<Utc>, until: DateTime<Utc>) -> (i64, DateTime<Utc>) {
    let hours = (until - from).num_hours().max(0);
    (hours, from + Duration::hours(hours))
}

/// Balance rounded up to whole credits.
fn owed_credits(balance: Decimal) -> i64 {
    balance.ceil().to_i64().unwrap_or(i64::MAX).max(0)
}

impl Engine {
    /// Borrow credits against the operator's rank-based credit line.
    pub async fn request_loan(
        &self,
        session: &Session,
        amount: i64,
        term_days: Option<i64>,
    ) -> Result<Loan> {
        if amount <= 0 {
            return Err(GatewayError::validation("loan amount must be > 0"));
        }
        let term_days = term_days.unwrap_or(self.cfg.loan_term_days);
        if term_days <= 0 {
            return Err(GatewayError::validation("loan term must be > 0 days"));
        }
        let op = &session.operator_id;
        let now = self.now();

        let mut tx = self.pool.begin().await?;
        let profile = ledger::get_profile(&mut tx, op).await?;
        let limit = loan_limit(profile.rank, &self.cfg);
        let outstanding: Decimal = finance::list_operator_loans(&mut tx, op)
            .await?
            .iter()
            .map(|l| l.balance)
            .sum();
        if outstanding + Decimal::from(amount) > Decimal::from(limit) {
            return Err(GatewayError::validation(format!(
                "credit line exceeded: {} outstanding, limit {limit}",
                owed_credits(outstanding)
            )));
        }
        let loan = Loan {
            id: self.next_id("loan"),
            operator_id: op.clone(),
            principal: amount,
            balance: Decimal::from(amount),
            interest_rate: self.cfg.loan_interest_rate,
            status: LoanStatus::Active,
            issued_at: now,
            due_at: now + Duration::days(term_days),
            last_accrued_at: Some(now),
        };
        finance::insert_loan(&mut tx, &loan, now).await?;
        let adj = Adjustment::credits(amount, "loan_disbursement")
            .with_meta(json!({ "loanId": loan.id }));
        let profile = ledger::adjust(&mut tx, op, &adj, now).await?;
        tx.commit().await?;
        info!(loan_id = %loan.id, operator_id = %op, amount, "loan issued");
        self.publish_profiles([(op.clone(), profile)]);
        Ok(loan)
    }

    /// Pay down a loan with whatever the operator can afford, up to `amount`.
    pub async fn repay_loan(&self, session: &Session, loan_id: &str, amount: i64) -> Result<Loan> {
        if amount <= 0 {
            return Err(GatewayError::validation("repayment must be > 0"));
        }
        let op = &session.operator_id;
        let now = self.now();

        let mut tx = self.pool.begin().await?;
        let mut loan = finance::get_loan(&mut tx, loan_id)
            .await?
            .filter(|l| &l.operator_id == op)
            .ok_or_else(|| GatewayError::not_found("loan", loan_id))?;
        if loan.status != LoanStatus::Active {
            return Err(GatewayError::unavailable(format!(
                "loan {loan_id} is {}",
                loan.status
            )));
        }
        let credits = ledger::get_profile(&mut tx, op).await?.credits;
        let wanted = amount.min(owed_credits(loan.balance));
        let pay = wanted.min(credits);
        if pay <= 0 {
            return Err(GatewayError::InsufficientCredits { needed: wanted });
        }
        let meta = json!({ "loanId": loan_id });
        let profile =
            ledger::debit_if_solvent(&mut tx, op, pay, None, "loan_repayment", Some(&meta), now)
                .await?
                .ok_or(GatewayError::InsufficientCredits { needed: pay })?;
        let seen = loan.clone();
        loan.balance -= Decimal::from(pay);
        if loan.balance <= Decimal::ZERO {
            loan.balance = Decimal::ZERO;
            loan.status = LoanStatus::Paid;
        }
        if !finance::update_loan(&mut tx, &seen, &loan, now).await? {
            return Err(GatewayError::unavailable(format!(
                "loan {loan_id} changed while repaying, retry"
            )));
        }
        tx.commit().await?;
        info!(loan_id, operator_id = %op, paid = pay, status = %loan.status, "loan repayment");
        self.publish_profiles([(op.clone(), profile)]);
        Ok(loan)
    }

    pub async fn loans(&self, operator: &OperatorId) -> Result<Vec<Loan>> {
        let mut conn = self.pool.acquire().await?;
        Ok(finance::list_operator_loans(&mut conn, operator).await?)
    }

    /// Insure an owned vessel, paying the first premium up front.
    pub async fn buy_insurance(
        &self,
        session: &Session,
        req: InsuranceRequest,
    ) -> Result<InsurancePolicy> {
        if req.coverage <= 0 {
            return Err(GatewayError::validation("coverage must be > 0"));
        }
        if req.deductible < 0 {
            return Err(GatewayError::validation("deductible must be >= 0"));
        }
        if req.premium_rate <= 0 {
            return Err(GatewayError::validation("premium must be > 0"));
        }
        let term_days = req.term_days.unwrap_or(self.cfg.insurance_term_days);
        if term_days <= 0 {
            return Err(GatewayError::validation("policy term must be > 0 days"));
        }
        let op = &session.operator_id;
        let now = self.now();

        let handle = self.vessel_handle(&req.vessel_id).await?;
        let guard = handle.lock().await;
        if guard.owner_id.as_ref() != Some(op) {
            return Err(GatewayError::unauthorized(format!(
                "only the owner can insure {}",
                req.vessel_id
            )));
        }
        let policy = InsurancePolicy {
            id: self.next_id("policy"),
            vessel_id: req.vessel_id.clone(),
            owner_id: op.clone(),
            policy_type: req.policy_type,
            coverage: req.coverage,
            deductible: req.deductible,
            premium_rate: req.premium_rate,
            status: PolicyStatus::Active,
            active_from: now,
            active_until: Some(now + Duration::days(term_days)),
            last_charged_at: Some(now),
        };
        let meta = json!({ "policyId": policy.id, "policyType": policy.policy_type.as_str() });

        let mut tx = self.pool.begin().await?;
        let profile = ledger::debit_if_solvent(
            &mut tx,
            op,
            policy.premium_rate,
            Some(&policy.vessel_id),
            "insurance_premium",
            Some(&meta),
            now,
        )
        .await?
        .ok_or(GatewayError::InsufficientCredits {
            needed: policy.premium_rate,
        })?;
        finance::insert_policy(&mut tx, &policy, now).await?;
        tx.commit().await?;
        drop(guard);
        info!(
            policy_id = %policy.id,
            vessel_id = %policy.vessel_id,
            policy_type = %policy.policy_type,
            "policy issued"
        );
        self.publish_profiles([(op.clone(), profile)]);
        Ok(policy)
    }

    pub async fn cancel_insurance(&self, session: &Session, policy_id: &str) -> Result<()> {
        let op = &session.operator_id;
        let mut conn = self.pool.acquire().await?;
        if finance::cancel_policy(&mut conn, policy_id, op, self.now()).await? {
            info!(policy_id, operator_id = %op, "policy canceled");
            return Ok(());
        }
        match finance::get_policy(&mut conn, policy_id).await? {
            None => Err(GatewayError::not_found("policy", policy_id)),
            Some(p) if &p.owner_id != op => {
                Err(GatewayError::unauthorized(format!("policy {policy_id} is not yours")))
            }
            Some(_) => Err(GatewayError::unavailable(format!(
                "policy {policy_id} is already canceled"
            ))),
        }
    }

    pub async fn policies(&self, vessel: &VesselId) -> Result<Vec<InsurancePolicy>> {
        let mut conn = self.pool.acquire().await?;
        Ok(finance::list_vessel_policies(&mut conn, vessel).await?)
    }

    /// Bill lease fees by the whole hour and complete leases past their end.
    pub(crate) async fn lease_sweep(&self, now: DateTime<Utc>) -> Result<LeaseSweep> {
        let leases = {
            let mut conn = self.pool.acquire().await?;
            market::list_active_leases(&mut conn).await?
        };
        let mut report = LeaseSweep::default();
        for lease in leases {
            let until = lease.ends_at.map_or(now, |end| end.min(now));
            if self.charge_lease(&lease, until).await? {
                report.charged += 1;
            }
            if lease.ends_at.is_some_and(|end| end <= now) {
                match self.finish_lease(&lease, now).await {
                    Ok(_) => report.completed += 1,
                    Err(GatewayError::Unavailable(_) | GatewayError::NotFound { .. }) => {
                        debug!(lease_id = %lease.id, "lease already closed")
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(report)
    }

    async fn charge_lease(&self, lease: &Lease, until: DateTime<Utc>) -> Result<bool> {
        let (Some(lessee), Some(from)) = (
            lease.lessee_id.as_ref(),
            lease.last_charged_at.or(lease.started_at),
        ) else {
            return Ok(false);
        };
        let (hours, charged_to) = whole_hours(from, until);
        if hours == 0 {
            return Ok(false);
        }
        let fee = lease.rate_per_hour.saturating_mul(hours);
        let meta = json!({ "leaseId": lease.id, "hours": hours });
        let now = self.now();

        let mut tx = self.pool.begin().await?;
        let debit = Adjustment::credits(-fee, "lease_fee")
            .with_vessel(&lease.vessel_id)
            .with_meta(meta.clone());
        let credit = Adjustment::credits(fee, "lease_income")
            .with_vessel(&lease.vessel_id)
            .with_meta(meta);
        let touched: Touched = vec![
            (lessee.clone(), ledger::adjust(&mut tx, lessee, &debit, now).await?),
            (
                lease.owner_id.clone(),
                ledger::adjust(&mut tx, &lease.owner_id, &credit, now).await?,
            ),
        ];
        market::mark_lease_charged(&mut tx, &lease.id, charged_to).await?;
        tx.commit().await?;
        debug!(lease_id = %lease.id, hours, fee, "lease fee charged");
        self.publish_profiles(touched);
        Ok(true)
    }

    /// Accrue loan interest, default overdue loans and charge insurance premiums.
    pub(crate) async fn finance_sweep(&self, now: DateTime<Utc>) -> Result<FinanceSweep> {
        let (loans, policies) = {
            let mut conn = self.pool.acquire().await?;
            (
                finance::list_active_loans(&mut conn).await?,
                finance::list_active_policies(&mut conn).await?,
            )
        };
        let mut report = FinanceSweep::default();

        for seen in loans {
            let mut loan = seen.clone();
            let from = loan.last_accrued_at.unwrap_or(loan.issued_at);
            let elapsed = (now - from).num_milliseconds();
            loan.balance += accrue_interest(loan.balance, loan.interest_rate, elapsed);
            loan.last_accrued_at = Some(now);
            let defaulted = now > loan.due_at && loan.balance > Decimal::ZERO;
            if defaulted {
                loan.status = LoanStatus::Defaulted;
            }
            let written = {
                let mut conn = self.pool.acquire().await?;
                finance::update_loan(&mut conn, &seen, &loan, now).await?
            };
            if !written {
                debug!(loan_id = %loan.id, "loan changed since listing, skipped");
                continue;
            }
            report.accrued += 1;
            if defaulted {
                report.defaulted += 1;
                warn!(
                    loan_id = %loan.id,
                    operator_id = %loan.operator_id,
                    balance = %loan.balance,
                    "loan defaulted"
                );
                report.repossessed += self.repossess(&loan, now).await?;
            }
        }

        for policy in policies {
            if self.charge_premium(&policy, now).await? {
                report.premiums += 1;
            }
        }
        Ok(report)
    }

    /// Seize every vessel of a defaulted borrower and list it for repossession sale.
    async fn repossess(&self, loan: &Loan, now: DateTime<Utc>) -> Result<usize> {
        let owned = {
            let mut conn = self.pool.acquire().await?;
            vessels::list_owned_vessels(&mut conn, &loan.operator_id).await?
        };
        let price = owed_credits(loan.balance);
        let mut seized = 0usize;
        for stored in owned {
            let handle = self.vessel_handle(&stored.id).await?;
            let mut guard = handle.lock_owned().await;
            if guard.owner_id.as_ref() != Some(&loan.operator_id) {
                continue;
            }
            let mut next = Vessel::clone(&guard);
            next.owner_id = None;
            next.charterer_id = None;
            next.leasee_id = None;
            next.status = VesselStatus::Repossession;
            next.storage_port_id = None;
            next.stored_at = None;
            next.neutral_controls();
            next.clear_crew(now);

            let mut tx = self.pool.begin().await?;
            if let Some(lease) = market::current_lease_for_vessel(&mut tx, &next.id).await? {
                market::complete_lease(&mut tx, &lease.id, now).await?;
            }
            if market::open_sale_for_vessel(&mut tx, &next.id).await?.is_none() {
                let sale = Sale {
                    id: self.next_id("sale"),
                    vessel_id: next.id.clone(),
                    seller_id: None,
                    sale_type: SaleType::Repossession,
                    price,
                    reserve_price: None,
                    buyer_id: None,
                    status: SaleStatus::Open,
                    ends_at: None,
                };
                market::insert_sale(&mut tx, &sale, now).await?;
            }
            finance::cancel_vessel_policies(&mut tx, &next.id, now).await?;
            vessels::upsert_vessel(&mut tx, &next, now).await?;
            tx.commit().await?;

            self.registry.sync_autopilot(&mut next, now);
            let space = next.space_id.clone();
            let projection = next.projection();
            *guard = next;
            drop(guard);
            self.registry.clear_vessel_crew(&space, &stored.id);
            info!(vessel_id = %stored.id, loan_id = %loan.id, price, "vessel repossessed");
            self.publish_vessels(&space, [projection]);
            seized += 1;
        }
        Ok(seized)
    }

    async fn charge_premium(&self, policy: &InsurancePolicy, now: DateTime<Utc>) -> Result<bool> {
        let from = policy.last_charged_at.unwrap_or(policy.active_from);
        let lapsed = policy.active_until.is_some_and(|end| end <= now);
        let until = policy.active_until.map_or(now, |end| end.min(now));
        let (hours, charged_to) = whole_hours(from, until);
        if hours == 0 && !lapsed {
            return Ok(false);
        }
        let mut tx = self.pool.begin().await?;
        let profile = if hours > 0 {
            let premium = policy.premium_rate.saturating_mul(hours);
            let adj = Adjustment::credits(-premium, "insurance_premium")
                .with_vessel(&policy.vessel_id)
                .with_meta(json!({ "policyId": policy.id, "hours": hours }));
            Some(ledger::adjust(&mut tx, &policy.owner_id, &adj, now).await?)
        } else {
            None
        };
        let stamp = if lapsed { now } else { charged_to };
        finance::mark_policy_charged(&mut tx, &policy.id, stamp).await?;
        tx.commit().await?;
        if lapsed {
            debug!(policy_id = %policy.id, "policy term ended");
        }
        self.publish_profiles(profile.map(|p| (policy.owner_id.clone(), p)));
        Ok(hours > 0)
    }
}
