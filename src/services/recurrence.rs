use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::entities::warehouse_configuration::DEFAULT_RECURRENCE_MONTHS;
use crate::errors::ServiceError;
use crate::repositories::{ConfigurationStore, RequestWithDetails};
use crate::services::requests::RequestService;

/// Next instant a recurring stock check is due, strictly after `now`.
///
/// Starts at the first day of the month after `now` (local midnight) and
/// advances month by month until `(month - 1) % every_n_months == 0`.
/// `None` means the default period; zero or negative periods are rejected.
pub fn next_recurrence(
    now: DateTime<Utc>,
    every_n_months: Option<i32>,
    tz: Tz,
) -> Result<DateTime<Utc>, ServiceError> {
    let n = every_n_months.unwrap_or(DEFAULT_RECURRENCE_MONTHS);
    if n <= 0 {
        return Err(ServiceError::InvalidConfiguration(format!(
            "recurring_stock_check_months must be positive, got {}",
            n
        )));
    }
    let n = n as u32;

    let local = now.with_timezone(&tz);
    let (mut year, mut month) = advance_month(local.year(), local.month());
    while (month - 1) % n != 0 {
        (year, month) = advance_month(year, month);
    }

    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
        ServiceError::InternalError(format!("invalid recurrence date {}-{}", year, month))
    })?;
    local_start_of_day(first, tz)
}

fn advance_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

/// First existing local instant of `day`. Midnight can be skipped by a DST
/// change, in which case the first valid time after it is used.
fn local_start_of_day(day: NaiveDate, tz: Tz) -> Result<DateTime<Utc>, ServiceError> {
    let midnight = day.and_time(NaiveTime::MIN);
    (0..=3)
        .filter_map(|hours| {
            tz.from_local_datetime(&(midnight + Duration::hours(hours)))
                .earliest()
        })
        .next()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| ServiceError::InternalError(format!("no local midnight on {} in {}", day, tz)))
}

/// Computes recurrence instants from the live configuration and creates the
/// stock checks when they fire.
pub struct RecurringTaskScheduler {
    config_store: Arc<dyn ConfigurationStore>,
    requests: Arc<RequestService>,
    tz: Tz,
}

impl RecurringTaskScheduler {
    pub fn new(config_store: Arc<dyn ConfigurationStore>, requests: Arc<RequestService>, tz: Tz) -> Self {
        Self {
            config_store,
            requests,
            tz,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Re-reads the configuration on every call so period edits apply to the next run.
    #[instrument(skip(self))]
    pub async fn compute_next_recurrence(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ServiceError> {
        let config = self.config_store.current().await?;
        let next = next_recurrence(now, config.recurring_stock_check_months, self.tz)?;
        debug!(%next, months = config.recurrence_months(), "Computed next recurrence");
        Ok(next)
    }

    /// Creates the stock check for `trigger_instant`. Idempotent per instant.
    pub async fn fire(
        &self,
        trigger_instant: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<RequestWithDetails>, ServiceError> {
        self.requests
            .create_recurring_stock_check(trigger_instant, now)
            .await
    }
}
