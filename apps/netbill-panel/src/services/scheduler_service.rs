//! Clock-driven maintenance: daily invoices, isolation sweeps, retention purge.
//!
//! Each loop owns a shutdown receiver and returns once it fires. A single
//! scheduler replica is assumed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use netbill_db::repositories::client_repo::ClientRepository;
use netbill_db::repositories::tenant_repo::TenantRepository;
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval, interval_at};
use tracing::{error, info};
use uuid::Uuid;

use super::billing_service::{BillingService, local_today};
use super::isolation_service::IsolationService;

const DAILY_TICK: Duration = Duration::from_secs(60);
const ISOLATION_EVERY: Duration = Duration::from_secs(3600);
const PURGE_EVERY: Duration = Duration::from_secs(7 * 24 * 3600);
const PURGE_FIRST_DELAY: Duration = Duration::from_secs(600);

/// 00:05 tenant-local.
pub fn daily_run_time() -> NaiveTime {
    NaiveTime::from_hms_opt(0, 5, 0).unwrap_or(NaiveTime::MIN)
}

/// The daily pass runs once per local date, at or after 00:05.
pub fn daily_run_due(local_now: NaiveDateTime, last_run: Option<NaiveDate>) -> bool {
    last_run != Some(local_now.date()) && local_now.time() >= daily_run_time()
}

pub struct SchedulerService {
    billing: Arc<BillingService>,
    isolation: Arc<IsolationService>,
    tenants: TenantRepository,
    clients: ClientRepository,
    retention_days: i64,
}

impl SchedulerService {
    pub fn new(
        billing: Arc<BillingService>,
        isolation: Arc<IsolationService>,
        tenants: TenantRepository,
        clients: ClientRepository,
        retention_days: i64,
    ) -> Self {
        Self {
            billing,
            isolation,
            tenants,
            clients,
            retention_days,
        }
    }

    pub fn spawn_all(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<tokio::task::JoinHandle<()>> {
        let daily = {
            let svc = self.clone();
            let rx = shutdown.subscribe();
            tokio::spawn(async move { svc.start_daily(rx).await })
        };
        let isolation = {
            let svc = self.clone();
            let rx = shutdown.subscribe();
            tokio::spawn(async move { svc.start_isolation(rx).await })
        };
        let purge = {
            let svc = self.clone();
            let rx = shutdown.subscribe();
            tokio::spawn(async move { svc.start_purge(rx).await })
        };
        vec![daily, isolation, purge]
    }

    /// Runs the invoice pass at startup, then each tenant again when its
    /// local clock passes 00:05.
    pub async fn start_daily(&self, mut shutdown: broadcast::Receiver<()>) {
        info!("Starting daily invoice scheduler...");
        let mut last_run: HashMap<Uuid, NaiveDate> = HashMap::new();

        let now = Utc::now();
        if let Err(e) = self.billing.run_daily(now).await {
            error!("Startup invoice run failed: {:#}", e);
        }
        match self.tenants.list_active().await {
            Ok(tenants) => {
                for tenant in tenants {
                    last_run.insert(tenant.id, local_today(now, self.billing.offset_for(&tenant)));
                }
            }
            Err(e) => error!("Failed to list tenants after startup run: {:#}", e),
        }

        let mut ticker = interval(DAILY_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Daily invoice scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.daily_tick(Utc::now(), &mut last_run).await {
                        error!("Daily scheduler tick failed: {:#}", e);
                    }
                }
            }
        }
    }

    async fn daily_tick(&self, now: DateTime<Utc>, last_run: &mut HashMap<Uuid, NaiveDate>) -> anyhow::Result<()> {
        for tenant in self.tenants.list_active().await? {
            let local_now = now.with_timezone(&self.billing.offset_for(&tenant)).naive_local();
            if !daily_run_due(local_now, last_run.get(&tenant.id).copied()) {
                continue;
            }
            let today = local_now.date();
            match self.billing.run_daily_for_tenant(&tenant, today).await {
                Ok(stats) => info!(
                    "📅 Invoices for {} on {}: scanned={} created={} skipped={} errors={}",
                    tenant.slug, today, stats.scanned, stats.created, stats.skipped, stats.errors
                ),
                Err(e) => error!("Daily invoice run failed for tenant {}: {:#}", tenant.slug, e),
            }
            last_run.insert(tenant.id, today);
        }
        Ok(())
    }

    pub async fn start_isolation(&self, mut shutdown: broadcast::Receiver<()>) {
        info!("Starting isolation sweep scheduler...");
        let mut ticker = interval(ISOLATION_EVERY);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Isolation scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_all(Utc::now()).await {
                        error!("Isolation sweep failed: {:#}", e);
                    }
                }
            }
        }
    }

    pub async fn sweep_all(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let mut isolated = 0;
        for tenant in self.tenants.list_active().await? {
            let today = local_today(now, self.billing.offset_for(&tenant));
            match self.isolation.sweep_tenant(tenant.id, today, now).await {
                Ok(stats) => isolated += stats.isolated,
                Err(e) => error!("Isolation sweep failed for tenant {}: {:#}", tenant.slug, e),
            }
        }
        if isolated > 0 {
            info!("Isolation sweep isolated {} clients", isolated);
        }
        Ok(())
    }

    pub async fn start_purge(&self, mut shutdown: broadcast::Receiver<()>) {
        info!("Starting retention purge scheduler (every 7 days)...");
        let mut ticker = interval_at(tokio::time::Instant::now() + PURGE_FIRST_DELAY, PURGE_EVERY);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Retention purge scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let cutoff = Utc::now() - chrono::Duration::days(self.retention_days);
                    match self.clients.purge_deleted_before(cutoff).await {
                        Ok(0) => {}
                        Ok(n) => info!("🧹 Purged {} clients deleted before {}", n, cutoff),
                        Err(e) => error!("Client purge failed: {:#}", e),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn daily_run_waits_for_five_past_midnight() {
        assert!(!daily_run_due(at("2027-02-27", "00:04:59"), None));
        assert!(daily_run_due(at("2027-02-27", "00:05:00"), None));
        assert!(daily_run_due(at("2027-02-27", "13:00:00"), None));
    }

    #[test]
    fn daily_run_happens_once_per_local_date() {
        let d = NaiveDate::from_ymd_opt(2027, 2, 27).unwrap();
        assert!(!daily_run_due(at("2027-02-27", "09:00:00"), Some(d)));
        assert!(daily_run_due(at("2027-02-28", "00:05:00"), Some(d)));
        assert!(!daily_run_due(at("2027-02-28", "00:01:00"), Some(d)));
    }
}
