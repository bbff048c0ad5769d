//! Timer-driven runner for the expiration sweeps and the recurring stock check.
//!
//! Every loop reads the clock on each tick and hands `now` to the service, so
//! the services stay deterministic and the loops only decide *when* to call.

use chrono::{DateTime, Duration as ChronoDuration, LocalResult, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::entities::RequestKind;
use crate::services::expiration::ExpirationScheduler;
use crate::services::recurrence::RecurringTaskScheduler;
use crate::services::ServiceContainer;

/// Upper bound on a single sleep of the recurring loop. Keeps it responsive to
/// configuration edits and wall-clock jumps.
const MAX_RECURRENCE_SLEEP: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tz: Tz,
    pub deadline_poll_interval: Duration,
    pub extension_sweep_at: NaiveTime,
}

impl From<&AppConfig> for SchedulerConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            tz: cfg.timezone(),
            deadline_poll_interval: cfg.deadline_poll_interval(),
            extension_sweep_at: cfg.extension_sweep_at(),
        }
    }
}

/// Time left until the next occurrence of local time `at` in `tz`, strictly after `now`.
///
/// A local time skipped by a DST gap resolves to the first instant after the gap.
pub fn duration_until_local_time(now: DateTime<Utc>, tz: Tz, at: NaiveTime) -> Duration {
    let local_today = now.with_timezone(&tz).date_naive();

    for offset in 0..=2 {
        let day = local_today + ChronoDuration::days(offset);
        let Some(candidate) = resolve_local(tz, day.and_time(at)) else {
            continue;
        };
        if candidate > now {
            return (candidate - now).to_std().unwrap_or(Duration::ZERO);
        }
    }

    Duration::from_secs(24 * 3600)
}

fn resolve_local(tz: Tz, naive: chrono::NaiveDateTime) -> Option<DateTime<Utc>> {
    for shift in 0..=3 {
        let attempt = naive + ChronoDuration::hours(shift);
        match tz.from_local_datetime(&attempt) {
            LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => return Some(earliest.with_timezone(&Utc)),
            LocalResult::None => continue,
        }
    }
    None
}

/// Owns the background jobs. Cloning is cheap; every loop shares the services.
#[derive(Clone)]
pub struct Scheduler {
    expiration: Arc<ExpirationScheduler>,
    recurrence: Arc<RecurringTaskScheduler>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        expiration: Arc<ExpirationScheduler>,
        recurrence: Arc<RecurringTaskScheduler>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            expiration,
            recurrence,
            config,
        }
    }

    pub fn from_services(services: &ServiceContainer, cfg: &AppConfig) -> Self {
        Self::new(
            services.expiration.clone(),
            services.recurrence.clone(),
            SchedulerConfig::from(cfg),
        )
    }

    /// Starts one deadline loop per request kind, the daily extension sweep and
    /// the recurring stock-check loop. All of them exit once `shutdown` flips to true.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(
            tz = %self.config.tz,
            poll_secs = self.config.deadline_poll_interval.as_secs(),
            extension_sweep_at = %self.config.extension_sweep_at,
            "Starting scheduler"
        );

        let mut handles = Vec::with_capacity(RequestKind::ALL.len() + 2);
        for kind in RequestKind::ALL {
            handles.push(tokio::spawn(
                self.clone().run_deadline_loop(kind, shutdown.clone()),
            ));
        }
        handles.push(tokio::spawn(
            self.clone().run_extension_loop(shutdown.clone()),
        ));
        handles.push(tokio::spawn(self.clone().run_recurrence_loop(shutdown)));
        handles
    }

    async fn run_deadline_loop(self, kind: RequestKind, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.deadline_poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    debug!(kind = %kind, "Deadline loop stopping");
                    return;
                }
            }

            match self.expiration.sweep_deadlines(kind, Utc::now()).await {
                Ok(outcome) if outcome.cancelled_count > 0 => {
                    info!(
                        kind = %kind,
                        day = %outcome.day,
                        cancelled = outcome.cancelled_count,
                        "Deadline sweep cancelled requests"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    counter!("warehouse_ops.scheduler.errors", 1, "job" => "deadline");
                    error!(kind = %kind, error = %e, "Deadline sweep failed");
                }
            }
        }
    }

    async fn run_extension_loop(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let wait =
                duration_until_local_time(Utc::now(), self.config.tz, self.config.extension_sweep_at);
            debug!(wait_secs = wait.as_secs(), "Extension sweep sleeping");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {
                    debug!("Extension loop stopping");
                    return;
                }
            }

            let now = Utc::now();
            for kind in RequestKind::ALL {
                match self.expiration.sweep_extensions(kind, now).await {
                    Ok(outcome) => {
                        info!(
                            kind = %kind,
                            day = %outcome.day,
                            cancelled = outcome.cancelled_count,
                            released_holds = outcome.released_holds,
                            "Extension sweep finished"
                        );
                    }
                    Err(e) => {
                        counter!("warehouse_ops.scheduler.errors", 1, "job" => "extension");
                        error!(kind = %kind, error = %e, "Extension sweep failed");
                    }
                }
            }
        }
    }

    async fn run_recurrence_loop(self, mut shutdown: watch::Receiver<bool>) {
        let mut next = None;

        loop {
            let now = Utc::now();
            let target = match next {
                Some(target) => target,
                None => match self.recurrence.compute_next_recurrence(now).await {
                    Ok(target) => {
                        info!(next = %target, "Next recurring stock check scheduled");
                        next = Some(target);
                        target
                    }
                    Err(e) => {
                        counter!("warehouse_ops.scheduler.errors", 1, "job" => "recurrence");
                        warn!(error = %e, "Could not compute next recurrence; retrying");
                        if wait_or_shutdown(self.config.deadline_poll_interval, &mut shutdown).await {
                            return;
                        }
                        continue;
                    }
                },
            };

            if now >= target {
                match self.recurrence.fire(target, now).await {
                    Ok(Some(created)) => {
                        info!(request_id = %created.request.id, trigger = %target, "Recurring stock check created");
                        next = None;
                    }
                    Ok(None) => {
                        debug!(trigger = %target, "Recurring stock check already handled");
                        next = None;
                    }
                    Err(e) => {
                        counter!("warehouse_ops.scheduler.errors", 1, "job" => "recurrence");
                        error!(trigger = %target, error = %e, "Recurring stock check failed; retrying");
                        if wait_or_shutdown(self.config.deadline_poll_interval, &mut shutdown).await {
                            return;
                        }
                    }
                }
                continue;
            }

            let remaining = (target - now).to_std().unwrap_or(Duration::ZERO);
            if wait_or_shutdown(remaining.min(MAX_RECURRENCE_SLEEP), &mut shutdown).await {
                return;
            }
            // Re-read the configuration after a long sleep; the target stands if unchanged.
            if remaining > MAX_RECURRENCE_SLEEP {
                next = None;
            }
        }
    }
}

/// Sleeps for `wait`; returns true when shutdown was requested instead.
async fn wait_or_shutdown(wait: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(wait) => false,
        _ = shutdown.changed() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::Sao_Paulo;
    use chrono_tz::Asia::Ho_Chi_Minh;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn waits_until_later_today() {
        // 23:00 UTC on Jan 31 is 06:00 local on Feb 1 in Ho Chi Minh City.
        let now = Utc.with_ymd_and_hms(2024, 1, 31, 23, 0, 0).unwrap();
        let wait = duration_until_local_time(now, Ho_Chi_Minh, at(6, 30));
        assert_eq!(wait, Duration::from_secs(30 * 60));
    }

    #[test]
    fn rolls_over_to_tomorrow_once_passed() {
        let now = Ho_Chi_Minh
            .with_ymd_and_hms(2024, 2, 1, 0, 10, 0)
            .unwrap()
            .with_timezone(&Utc);
        let wait = duration_until_local_time(now, Ho_Chi_Minh, at(0, 5));
        assert_eq!(wait, Duration::from_secs(24 * 3600 - 5 * 60));
    }

    #[test]
    fn exact_match_schedules_next_day() {
        let now = Ho_Chi_Minh
            .with_ymd_and_hms(2024, 2, 1, 0, 5, 0)
            .unwrap()
            .with_timezone(&Utc);
        let wait = duration_until_local_time(now, Ho_Chi_Minh, at(0, 5));
        assert_eq!(wait, Duration::from_secs(24 * 3600));
    }

    #[test]
    fn skipped_local_time_resolves_past_the_gap() {
        // Sao Paulo skipped 00:00-01:00 on 2018-11-04.
        let now = Sao_Paulo
            .with_ymd_and_hms(2018, 11, 3, 23, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let wait = duration_until_local_time(now, Sao_Paulo, at(0, 30));
        let fires_at = now + ChronoDuration::from_std(wait).unwrap();
        assert!(fires_at > now);
        assert_eq!(
            fires_at.with_timezone(&Sao_Paulo).date_naive(),
            chrono::NaiveDate::from_ymd_opt(2018, 11, 4).unwrap()
        );
    }

    #[tokio::test]
    async fn wait_returns_early_on_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move {
            wait_or_shutdown(Duration::from_secs(3600), &mut rx).await
        });
        tx.send(true).unwrap();
        assert!(waiter.await.unwrap());
    }
}
