//! Periodic maintenance.
//!
//! Every tick expires moderation state, delivers due reminders and flushes
//! statistics. Less
//! frequent jobs run when their interval has elapsed since they last ran:
//! - cache sweep: hourly, removing files older than the configured age
//! - stats cleanup: daily, dropping entries older than 90 days
//! - backup: every `BACKUP_INTERVAL_SECS` (never when 0)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::bot::{BotServices, Moment};
use crate::storage::{CacheJanitor, DataLayout, SweepReport};
use crate::telegram::ChatGateway;

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(86_400);
const STATS_MAX_AGE_DAYS: i64 = 90;

/// Messages that can be sent to the scheduler.
#[derive(Debug, Clone)]
pub enum SchedulerMessage {
    /// Flush state and stop the scheduler.
    Shutdown,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub swept: Option<SweepReport>,
    pub stats_pruned: Option<usize>,
    pub backup: Option<PathBuf>,
    pub reminders_sent: usize,
}

pub struct MaintenanceScheduler {
    services: Arc<BotServices>,
    gateway: Arc<dyn ChatGateway>,
    janitor: CacheJanitor,
    tick_interval: Duration,
    started: Instant,
    last_sweep: Option<Instant>,
    last_cleanup: Option<Instant>,
    last_backup: Option<Instant>,
}

impl std::fmt::Debug for MaintenanceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintenanceScheduler")
            .field("janitor", &self.janitor)
            .field("tick_interval", &self.tick_interval)
            .finish_non_exhaustive()
    }
}

impl MaintenanceScheduler {
    #[must_use]
    pub fn new(services: Arc<BotServices>, gateway: Arc<dyn ChatGateway>) -> Self {
        let layout = DataLayout::new(&services.settings.data_dir);
        Self {
            janitor: CacheJanitor::new(&layout),
            services,
            gateway,
            tick_interval: Duration::from_secs(60),
            started: Instant::now(),
            last_sweep: None,
            last_cleanup: None,
            last_backup: None,
        }
    }

    /// Sets the tick interval.
    #[must_use]
    pub const fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Runs the scheduler loop.
    pub async fn run(mut self, mut rx: mpsc::Receiver<SchedulerMessage>) {
        info!("Maintenance scheduler started");

        let mut timer = interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.tick(Moment::now()).await;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(SchedulerMessage::Shutdown) | None => {
                            info!("Scheduler shutting down");
                            self.flush_stats().await;
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Single tick of the scheduler.
    pub async fn tick(&mut self, now: Moment) -> TickReport {
        let mut report = TickReport::default();
        debug!("Maintenance tick");
        self.services.moderator.lock().await.expire(now.instant);

        if self.services.settings.features.reminders {
            report.reminders_sent = self.send_reminders(now).await;
        }

        if due(self.last_sweep, SWEEP_INTERVAL, now.instant) {
            self.last_sweep = Some(now.instant);
            let janitor = self.janitor.clone();
            let max_age = self.services.settings.cache_max_age();
            let wall = SystemTime::from(now.local);
            match tokio::task::spawn_blocking(move || janitor.sweep(max_age, wall)).await {
                Ok(swept) => report.swept = Some(swept),
                Err(e) => error!("Cache sweep task failed: {}", e),
            }
        }

        if due(self.last_cleanup, CLEANUP_INTERVAL, now.instant) {
            self.last_cleanup = Some(now.instant);
            let pruned = self.services.stats.lock().await.cleanup(STATS_MAX_AGE_DAYS, now.local);
            report.stats_pruned = Some(pruned);
        }

        if let Some(every) = self.services.settings.backup_interval() {
            let since = self.last_backup.unwrap_or(self.started);
            if now.instant.saturating_duration_since(since) >= every {
                report.backup = self.backup(now).await;
            }
        }

        self.flush_stats().await;
        report
    }

    async fn backup(&mut self, now: Moment) -> Option<PathBuf> {
        self.last_backup = Some(now.instant);
        match self.services.backups.run(now.local).await {
            Ok(report) => Some(report.archive),
            Err(e) => {
                error!("Scheduled backup failed: {}", e);
                None
            }
        }
    }

    /// Sends every due reminder. A failed delivery is not retried.
    async fn send_reminders(&self, now: Moment) -> usize {
        let fired = {
            let db = self.services.database.lock().await;
            self.services.reminders.fire_due(&db, now.local)
        };
        let deliveries = match fired {
            Ok(deliveries) => deliveries,
            Err(e) => {
                error!("Failed to load due reminders: {}", e);
                return 0;
            }
        };

        let mut sent = 0;
        for delivery in deliveries {
            match self.gateway.send_text(delivery.chat_id, &delivery.text, None).await {
                Ok(()) => sent += 1,
                Err(e) => warn!(
                    "Failed to deliver reminder {} to {}: {}",
                    delivery.reminder_id, delivery.chat_id, e
                ),
            }
        }
        if sent > 0 {
            info!("Delivered {} reminders", sent);
        }
        sent
    }

    async fn flush_stats(&self) {
        if let Err(e) = self.services.stats.lock().await.save() {
            warn!("Failed to save statistics: {}", e);
        }
    }
}

fn due(last: Option<Instant>, every: Duration, now: Instant) -> bool {
    last.is_none_or(|at| now.saturating_duration_since(at) >= every)
}
