//! Background consolidation scheduler.
//!
//! Three cron schedules (daily, weekly, monthly) drive consolidation ticks
//! across every known tenant. Job leases in the store make overlap with
//! manual `run_consolidation` triggers safe.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tracing::{info, warn};

use continuum_core::{Engine, TickKind};

use crate::config::ServerConfig;

/// Scheduler over the engine's consolidation ticks
pub struct ConsolidationScheduler {
    engine: Arc<Engine>,
    daily: Schedule,
    weekly: Schedule,
    monthly: Schedule,
}

impl ConsolidationScheduler {
    /// Parse the configured cron expressions
    pub fn from_config(engine: Arc<Engine>, config: &ServerConfig) -> anyhow::Result<Self> {
        Ok(Self {
            engine,
            daily: Schedule::from_str(&config.schedule_daily)
                .map_err(|e| anyhow::anyhow!("bad CONSOLIDATION_SCHEDULE_DAILY: {e}"))?,
            weekly: Schedule::from_str(&config.schedule_weekly)
                .map_err(|e| anyhow::anyhow!("bad CONSOLIDATION_SCHEDULE_WEEKLY: {e}"))?,
            monthly: Schedule::from_str(&config.schedule_monthly)
                .map_err(|e| anyhow::anyhow!("bad CONSOLIDATION_SCHEDULE_MONTHLY: {e}"))?,
        })
    }

    /// The next instant any schedule fires, with every tick due then.
    ///
    /// When schedules coincide, all due ticks run; job leases deduplicate
    /// the shared work.
    fn next_fire(&self, after: DateTime<Utc>) -> Option<(DateTime<Utc>, Vec<TickKind>)> {
        let candidates = [
            (TickKind::Daily, self.daily.after(&after).next()?),
            (TickKind::Weekly, self.weekly.after(&after).next()?),
            (TickKind::Monthly, self.monthly.after(&after).next()?),
        ];
        let earliest = candidates.iter().map(|(_, at)| *at).min()?;
        let due = candidates
            .iter()
            .filter(|(_, at)| *at == earliest)
            .map(|(kind, _)| *kind)
            .collect();
        Some((earliest, due))
    }

    async fn run(self) {
        loop {
            let now = Utc::now();
            let Some((fire_at, due)) = self.next_fire(now) else {
                warn!("consolidation schedules produce no future fire times; scheduler stopping");
                return;
            };
            let wait = (fire_at - now)
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(1));
            tokio::time::sleep(wait).await;

            let tenants = match self.engine.store.tenants() {
                Ok(tenants) => tenants,
                Err(e) => {
                    warn!("could not list tenants for consolidation: {e}");
                    continue;
                }
            };
            for tick in &due {
                for tenant in &tenants {
                    let report = self
                        .engine
                        .consolidation
                        .run_tick(tenant, *tick, Utc::now());
                    info!(
                        tenant,
                        tick = tick.as_str(),
                        jobs = report.jobs.len(),
                        "scheduled consolidation tick finished"
                    );
                }
            }
        }
    }

    /// Spawn the scheduler loop on the runtime
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

// ============================================================================
// TESTS
// ============================================================================
