use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use metrics::counter;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DatabaseTransaction, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

use crate::db;
use crate::entities::sweep_marker::{self, Entity as SweepMarker};
use crate::entities::{RequestKind, RequestStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::repositories::{
    ConfigurationStore, InventoryCollaborator, RequestRepository, RequestWithDetails,
};
use crate::services::lifecycle::{apply, LifecycleEvent, TransitionContext};
use crate::services::staff_assignment::StaffAssignmentEngine;

/// Identity stamped on mutations made by the schedulers.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The cancel threshold has not been reached yet today
    BeforeThreshold,
    /// Today's deadline sweep already applied its effect
    AlreadyRanToday,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepOutcome {
    pub kind: RequestKind,
    pub day: NaiveDate,
    pub cancelled_count: usize,
    pub released_holds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
}

impl SweepOutcome {
    fn skipped(kind: RequestKind, day: NaiveDate, reason: SkipReason) -> Self {
        Self {
            kind,
            day,
            cancelled_count: 0,
            released_holds: 0,
            skipped: Some(reason),
        }
    }
}

fn deadline_job_key(kind: RequestKind) -> String {
    format!("deadline:{}", kind)
}

/// Sweeps that auto-cancel overdue and over-extended requests.
///
/// Each sweep loads, cancels, releases holds and bookings and persists its
/// whole batch in a single transaction. A failure rolls everything back and the requests stay
/// cancellable for the next run.
pub struct ExpirationScheduler {
    db: Arc<DatabaseConnection>,
    config_store: Arc<dyn ConfigurationStore>,
    requests: RequestRepository,
    inventory: Arc<dyn InventoryCollaborator>,
    staff: Arc<StaffAssignmentEngine>,
    event_sender: Option<EventSender>,
    tz: Tz,
}

impl ExpirationScheduler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config_store: Arc<dyn ConfigurationStore>,
        inventory: Arc<dyn InventoryCollaborator>,
        staff: Arc<StaffAssignmentEngine>,
        event_sender: Option<EventSender>,
        tz: Tz,
    ) -> Self {
        Self {
            db,
            config_store,
            requests: RequestRepository::new(),
            inventory,
            staff,
            event_sender,
            tz,
        }
    }

    /// Cancels today's requests of `kind` still awaiting confirmation once the
    /// cancel threshold has passed. Applies its effect at most once per day.
    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn sweep_deadlines(
        &self,
        kind: RequestKind,
        now: DateTime<Utc>,
    ) -> Result<SweepOutcome, ServiceError> {
        let config = self.config_store.current().await?;
        let ctx = TransitionContext::new(&config, now, self.tz, SYSTEM_ACTOR);
        let local_now = ctx.local_now();
        let today = local_now.date();
        let threshold = config.time_to_allow_cancel;

        if local_now.time() < threshold {
            debug!(%today, "Cancel threshold not reached");
            return Ok(SweepOutcome::skipped(kind, today, SkipReason::BeforeThreshold));
        }

        let started = Instant::now();
        let txn = db::begin(&self.db).await?;
        let job_key = deadline_job_key(kind);

        let marker = SweepMarker::find_by_id(job_key.clone())
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if marker.as_ref().map(|m| m.last_run_day) == Some(today) {
            counter!("warehouse_ops.sweep.skipped", 1, "job" => "deadline");
            debug!(%today, "Deadline sweep already ran today");
            return Ok(SweepOutcome::skipped(kind, today, SkipReason::AlreadyRanToday));
        }

        let mut batch = self
            .requests
            .find_by_kind_date_and_status_in(
                &txn,
                kind,
                today,
                &RequestStatus::AWAITING_CONFIRMATION,
            )
            .await?;

        let event = LifecycleEvent::DeadlineExceeded { at: threshold };
        for record in batch.iter_mut() {
            apply(record, &event, &ctx)?;
        }

        let released_holds = self.release_holds(&txn, &batch, now).await?;
        self.release_bookings(&txn, &batch).await?;
        self.requests.save_all(&txn, &batch).await?;
        upsert_marker(&txn, marker, job_key, today, now).await?;
        db::commit(txn, started).await?;

        counter!("warehouse_ops.sweep.cancelled", batch.len() as u64, "job" => "deadline");
        info!(
            %today,
            cancelled = batch.len(),
            released_holds,
            "Deadline sweep completed"
        );
        self.publish_cancellations(&batch).await;

        Ok(SweepOutcome {
            kind,
            day: today,
            cancelled_count: batch.len(),
            released_holds,
            skipped: None,
        })
    }

    /// Cancels EXTENDED requests of `kind` whose extension date is on or before
    /// `today - days_to_allow_extend`.
    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn sweep_extensions(
        &self,
        kind: RequestKind,
        now: DateTime<Utc>,
    ) -> Result<SweepOutcome, ServiceError> {
        let config = self.config_store.current().await?;
        if config.days_to_allow_extend < 0 {
            return Err(ServiceError::InvalidConfiguration(format!(
                "days_to_allow_extend must not be negative, got {}",
                config.days_to_allow_extend
            )));
        }

        let ctx = TransitionContext::new(&config, now, self.tz, SYSTEM_ACTOR);
        let today = ctx.today();
        let days = i64::from(config.days_to_allow_extend);
        let cancel_threshold = today
            .checked_sub_signed(Duration::days(days))
            .unwrap_or(NaiveDate::MIN);

        let started = Instant::now();
        let txn = db::begin(&self.db).await?;
        let mut batch = self
            .requests
            .find_extended_on_or_before(&txn, kind, cancel_threshold)
            .await?;

        let event = LifecycleEvent::ExtensionExpired { days };
        for record in batch.iter_mut() {
            apply(record, &event, &ctx)?;
        }

        let released_holds = self.release_holds(&txn, &batch, now).await?;
        self.release_bookings(&txn, &batch).await?;
        self.requests.save_all(&txn, &batch).await?;
        db::commit(txn, started).await?;

        counter!("warehouse_ops.sweep.cancelled", batch.len() as u64, "job" => "extension");
        info!(
            %today,
            %cancel_threshold,
            cancelled = batch.len(),
            "Extension sweep completed"
        );
        self.publish_cancellations(&batch).await;

        Ok(SweepOutcome {
            kind,
            day: today,
            cancelled_count: batch.len(),
            released_holds,
            skipped: None,
        })
    }

    async fn release_holds(
        &self,
        txn: &DatabaseTransaction,
        batch: &[RequestWithDetails],
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let detail_ids: Vec<_> = batch.iter().flat_map(|r| r.detail_ids()).collect();
        if detail_ids.is_empty() {
            return Ok(0);
        }
        self.inventory
            .release_holds_by_detail_ids(txn, detail_ids, now)
            .await
    }

    async fn release_bookings(
        &self,
        txn: &DatabaseTransaction,
        batch: &[RequestWithDetails],
    ) -> Result<(), ServiceError> {
        for record in batch {
            self.staff.release(txn, &record.request.id).await?;
        }
        Ok(())
    }

    async fn publish_cancellations(&self, batch: &[RequestWithDetails]) {
        let Some(sender) = &self.event_sender else {
            return;
        };
        for record in batch {
            sender
                .send_or_log(Event::RequestAutoCancelled {
                    request_id: record.request.id.clone(),
                    kind: record.request.kind,
                    note: record.request.note.clone().unwrap_or_default(),
                })
                .await;
        }
    }
}

async fn upsert_marker(
    txn: &DatabaseTransaction,
    existing: Option<sweep_marker::Model>,
    job_key: String,
    day: NaiveDate,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    match existing {
        Some(marker) => {
            let mut active: sweep_marker::ActiveModel = marker.into();
            active.last_run_day = Set(day);
            active.updated_at = Set(now);
            active.update(txn).await.map_err(ServiceError::db_error)?;
        }
        None => {
            sweep_marker::ActiveModel {
                job_key: Set(job_key),
                last_run_day: Set(day),
                updated_at: Set(now),
            }
            .insert(txn)
            .await
            .map_err(ServiceError::db_error)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::warehouse_configuration;
    use crate::repositories::configuration_store::MockConfigurationStore;
    use crate::repositories::inventory::MockInventoryCollaborator;
    use crate::repositories::staff_directory::MockStaffDirectory;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use chrono_tz::Asia::Ho_Chi_Minh;
    use sea_orm::Database;

    fn idle_staff() -> Arc<StaffAssignmentEngine> {
        let mut directory = MockStaffDirectory::new();
        directory.expect_clear_open_assignments().never();
        Arc::new(StaffAssignmentEngine::new(Arc::new(directory)))
    }

    #[test]
    fn deadline_job_keys_are_per_kind() {
        assert_eq!(deadline_job_key(RequestKind::StockCheck), "deadline:STOCK_CHECK");
        assert_ne!(
            deadline_job_key(RequestKind::Import),
            deadline_job_key(RequestKind::Export)
        );
    }

    #[tokio::test]
    async fn missing_configuration_aborts_without_touching_the_store() {
        // No schema: any query would fail, so an Ok/DbErr here would mean the sweep read the store.
        let db = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
        let mut store = MockConfigurationStore::new();
        store
            .expect_current()
            .returning(|| Err(ServiceError::ConfigurationMissing));
        let mut inventory = MockInventoryCollaborator::new();
        inventory.expect_release_holds_by_detail_ids().never();

        let scheduler = ExpirationScheduler::new(
            db,
            Arc::new(store),
            Arc::new(inventory),
            idle_staff(),
            None,
            Ho_Chi_Minh,
        );
        let err = scheduler
            .sweep_deadlines(RequestKind::Import, Utc::now())
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ConfigurationMissing);
    }

    #[tokio::test]
    async fn before_threshold_is_a_no_op() {
        let db = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
        let mut store = MockConfigurationStore::new();
        store
            .expect_current()
            .returning(|| Ok(warehouse_configuration::Model::with_defaults(Utc::now())));

        let scheduler = ExpirationScheduler::new(
            db,
            Arc::new(store),
            Arc::new(MockInventoryCollaborator::new()),
            idle_staff(),
            None,
            Ho_Chi_Minh,
        );
        let now = Ho_Chi_Minh
            .with_ymd_and_hms(2024, 2, 5, 16, 59, 0)
            .unwrap()
            .with_timezone(&Utc);
        let outcome = scheduler
            .sweep_deadlines(RequestKind::Export, now)
            .await
            .unwrap();
        assert_eq!(outcome.skipped, Some(SkipReason::BeforeThreshold));
        assert_eq!(outcome.cancelled_count, 0);
    }

    #[tokio::test]
    async fn negative_extension_window_is_rejected() {
        let db = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
        let mut store = MockConfigurationStore::new();
        store.expect_current().returning(|| {
            let mut config = warehouse_configuration::Model::with_defaults(Utc::now());
            config.days_to_allow_extend = -1;
            Ok(config)
        });

        let scheduler = ExpirationScheduler::new(
            db,
            Arc::new(store),
            Arc::new(MockInventoryCollaborator::new()),
            idle_staff(),
            None,
            Ho_Chi_Minh,
        );
        assert_matches!(
            scheduler
                .sweep_extensions(RequestKind::Import, Utc::now())
                .await,
            Err(ServiceError::InvalidConfiguration(_))
        );
    }
}
