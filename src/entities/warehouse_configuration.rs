use chrono::{DateTime, NaiveTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Primary key of the single configuration row.
pub const SINGLETON_ID: i32 = 1;

/// Recurrence period used when `recurring_stock_check_months` is unset.
pub const DEFAULT_RECURRENCE_MONTHS: i32 = 4;

/// Tenant-wide warehouse rules. Exactly one row exists (id = 1).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "warehouse_configuration")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i32,
    pub working_time_start: NaiveTime,
    pub working_time_end: NaiveTime,
    /// Minimum minutes between now and the scheduled instant of a new request
    pub create_request_lead_minutes: i32,
    pub time_to_allow_assign: NaiveTime,
    pub time_to_allow_confirm: NaiveTime,
    pub time_to_allow_cancel: NaiveTime,
    /// Days an EXTENDED request may stay past its extended date before forced cancellation
    pub days_to_allow_extend: i32,
    pub max_allowed_days_for_extend: i32,
    pub recurring_stock_check_months: Option<i32>,
    pub counting_minutes_per_item: i32,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Built-in defaults used when seeding an empty store.
    pub fn with_defaults(now: DateTime<Utc>) -> Self {
        let at = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN);
        Self {
            id: SINGLETON_ID,
            working_time_start: at(8, 0),
            working_time_end: at(17, 0),
            create_request_lead_minutes: 30,
            time_to_allow_assign: at(7, 30),
            time_to_allow_confirm: at(16, 30),
            time_to_allow_cancel: at(17, 0),
            days_to_allow_extend: 3,
            max_allowed_days_for_extend: 3,
            recurring_stock_check_months: None,
            counting_minutes_per_item: 2,
            updated_at: now,
        }
    }

    /// Recurrence period with the default applied. Not validated here.
    pub fn recurrence_months(&self) -> i32 {
        self.recurring_stock_check_months
            .unwrap_or(DEFAULT_RECURRENCE_MONTHS)
    }

    pub fn is_within_working_hours(&self, time: NaiveTime) -> bool {
        time >= self.working_time_start && time <= self.working_time_end
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
