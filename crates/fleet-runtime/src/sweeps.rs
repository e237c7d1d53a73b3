//! Rate limiting and overlap protection for periodic sweeps, and the tick
//! that drives them.

use crate::finance::{FinanceSweep, LeaseSweep};
use crate::logistics::ExpiryReport;
use crate::operating::OperatingSweep;
use crate::{Engine, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Interval guard plus an "already running" flag for one sweep.
#[derive(Debug)]
pub struct SweepGuard {
    name: &'static str,
    interval: Duration,
    last_run: Mutex<Option<DateTime<Utc>>>,
    running: AtomicBool,
}

/// Held while a sweep runs; clears the running flag on drop.
#[derive(Debug)]
pub struct SweepTicket<'a> {
    guard: &'a SweepGuard,
}

impl Drop for SweepTicket<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}

impl SweepGuard {
    pub fn new(name: &'static str, interval_secs: u64) -> Self {
        Self {
            name,
            interval: Duration::seconds(i64::try_from(interval_secs).unwrap_or(i64::MAX / 1000)),
            last_run: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Start a run if the interval has passed and no run is in flight.
    pub fn try_begin(&self, now: DateTime<Utc>) -> Option<SweepTicket<'_>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let ticket = SweepTicket { guard: self };
        let mut last = self.last_run.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(prev) = *last {
            if now - prev < self.interval {
                return None;
            }
        }
        *last = Some(now);
        Some(ticket)
    }
}

/// The engine's sweep schedule.
#[derive(Debug)]
pub struct Sweeps {
    pub cargo_generation: SweepGuard,
    pub passenger_generation: SweepGuard,
    pub expiry: SweepGuard,
    pub promotion: SweepGuard,
    pub leases: SweepGuard,
    pub finance: SweepGuard,
    pub operating: SweepGuard,
    pub checkpoint: SweepGuard,
}

impl Sweeps {
    pub fn from_config(cfg: &fleet_core::EngineConfig) -> Self {
        Self {
            cargo_generation: SweepGuard::new("cargo_generation", cfg.cargo_generation_secs),
            passenger_generation: SweepGuard::new(
                "passenger_generation",
                cfg.passenger_generation_secs,
            ),
            expiry: SweepGuard::new("expiry", cfg.expiry_sweep_secs),
            promotion: SweepGuard::new("promotion", cfg.promotion_secs),
            leases: SweepGuard::new("leases", cfg.lease_sweep_secs),
            finance: SweepGuard::new("finance", cfg.finance_sweep_secs),
            operating: SweepGuard::new("operating", cfg.operating_sweep_secs),
            checkpoint: SweepGuard::new("checkpoint", cfg.checkpoint_secs),
        }
    }
}

/// What one [`Engine::tick`] did. Sweeps that were not due report `None`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub deliveries: usize,
    pub cargo_generated: Option<usize>,
    pub passengers_generated: Option<usize>,
    pub expiry: Option<ExpiryReport>,
    pub promoted: Option<(u64, u64)>,
    pub leases: Option<LeaseSweep>,
    pub finance: Option<FinanceSweep>,
    pub operating: Option<OperatingSweep>,
    pub checkpointed: Option<usize>,
}

impl Engine {
    /// Detect deliveries, then run every sweep whose interval has elapsed.
    ///
    /// Safe to call from several tasks: a sweep already in flight is skipped.
    pub async fn tick(&self) -> Result<TickReport> {
        let now = self.now();
        let mut report = TickReport {
            deliveries: self.detect_deliveries().await?,
            ..TickReport::default()
        };
        if let Some(_run) = self.sweeps.promotion.try_begin(now) {
            report.promoted = Some(self.promote(now).await?);
        }
        if let Some(_run) = self.sweeps.expiry.try_begin(now) {
            report.expiry = Some(self.expire_listings(now).await?);
        }
        if let Some(_run) = self.sweeps.cargo_generation.try_begin(now) {
            report.cargo_generated = Some(self.generate_cargo(now).await?);
        }
        if let Some(_run) = self.sweeps.passenger_generation.try_begin(now) {
            report.passengers_generated = Some(self.generate_passengers(now).await?);
        }
        if let Some(_run) = self.sweeps.leases.try_begin(now) {
            report.leases = Some(self.lease_sweep(now).await?);
        }
        if let Some(_run) = self.sweeps.finance.try_begin(now) {
            report.finance = Some(self.finance_sweep(now).await?);
        }
        if let Some(_run) = self.sweeps.operating.try_begin(now) {
            report.operating = Some(self.operating_sweep(now).await?);
        }
        if let Some(_run) = self.sweeps.checkpoint.try_begin(now) {
            report.checkpointed = Some(self.checkpoint().await?);
        }
        debug!(?report, "tick");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    #[test]
    fn interval_and_overlap_are_enforced() {
        let g = SweepGuard::new("test", 60);
        let t0 = Utc::now();
        let ticket = g.try_begin(t0).unwrap();
        assert!(g.try_begin(t0 + Duration::minutes(5)).is_none());
        drop(ticket);
        assert!(g.try_begin(t0 + Duration::seconds(30)).is_none());
        assert!(g.try_begin(t0 + Duration::seconds(60)).is_some());
        assert!(g.try_begin(t0 + Duration::seconds(90)).is_none());
        assert!(g.try_begin(t0 + Duration::seconds(120)).is_some());
    }

    #[tokio::test]
    async fn tick_runs_due_sweeps_once() {
        let (engine, clock) = engine().await;
        let first = engine.tick().await.unwrap();
        assert_eq!(first.deliveries, 0);
        assert!(first.cargo_generated.unwrap() > 0);
        assert!(first.passengers_generated.unwrap() > 0);
        assert_eq!(first.checkpointed, Some(0));
        assert_eq!(first.operating, Some(OperatingSweep::default()));

        let second = engine.tick().await.unwrap();
        assert_eq!(second.cargo_generated, None);
        assert_eq!(second.finance, None);
        assert_eq!(second.operating, None);

        clock.advance(Duration::minutes(6));
        let later = engine.tick().await.unwrap();
        assert_eq!(later.cargo_generated, Some(0));
        assert_eq!(later.passengers_generated, None);
        assert!(later.promoted.is_some());
    }
}
