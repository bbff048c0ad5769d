pub mod machine;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use sea_orm::{DatabaseConnection, DatabaseTransaction};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

use crate::db;
use crate::entities::{warehouse_configuration, RequestStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::repositories::{
    ConfigurationStore, InventoryCollaborator, RequestRepository, RequestWithDetails,
};
use crate::services::staff_assignment::{Assignment, Booking, StaffAssignmentEngine, WorkloadLine};

pub use machine::{
    apply, ensure_assignable, LifecycleEvent, LineCount, TransitionContext, TransitionOutcome,
};

/// Loads a request, applies a lifecycle event and persists the result in one
/// transaction, including staff bookings and inventory hold releases.
pub struct LifecycleService {
    db: Arc<DatabaseConnection>,
    config_store: Arc<dyn ConfigurationStore>,
    requests: RequestRepository,
    staff: Arc<StaffAssignmentEngine>,
    inventory: Arc<dyn InventoryCollaborator>,
    event_sender: Option<EventSender>,
    tz: Tz,
}

impl LifecycleService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config_store: Arc<dyn ConfigurationStore>,
        staff: Arc<StaffAssignmentEngine>,
        inventory: Arc<dyn InventoryCollaborator>,
        event_sender: Option<EventSender>,
        tz: Tz,
    ) -> Self {
        Self {
            db,
            config_store,
            requests: RequestRepository::new(),
            staff,
            inventory,
            event_sender,
            tz,
        }
    }

    pub async fn get_request(&self, request_id: &str) -> Result<RequestWithDetails, ServiceError> {
        self.requests.get_with_details(self.db.as_ref(), request_id).await
    }

    /// Applies `event` to the request on behalf of `actor`.
    #[instrument(skip(self, event), fields(event = event.name()))]
    pub async fn apply_transition(
        &self,
        request_id: &str,
        event: LifecycleEvent,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<RequestWithDetails, ServiceError> {
        let config = self.config_store.current().await?;
        let ctx = TransitionContext::new(&config, now, self.tz, actor);

        let started = Instant::now();
        let txn = db::begin(&self.db).await?;
        let mut record = self.requests.get_for_update(&txn, request_id).await?;

        let mut outcome = apply(&mut record, &event, &ctx)?;
        let assignment = self
            .apply_side_effects(&txn, &mut record, &event, &config, now)
            .await?;
        outcome.to = record.request.status;

        self.requests.save(&txn, &record).await?;
        db::commit(txn, started).await?;

        info!(
            request_id,
            from = %outcome.from,
            to = %outcome.to,
            actor,
            "Request transitioned"
        );
        self.publish(&record, outcome, actor, assignment).await;
        Ok(record)
    }

    /// Assigns counting staff chosen by the assignment engine and moves the
    /// request to IN_PROGRESS. On `AssignmentUnavailable` nothing is persisted.
    #[instrument(skip(self))]
    pub async fn assign(
        &self,
        request_id: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<RequestWithDetails, ServiceError> {
        let config = self.config_store.current().await?;
        let ctx = TransitionContext::new(&config, now, self.tz, actor);

        let started = Instant::now();
        let txn = db::begin(&self.db).await?;
        let mut record = self.requests.get_for_update(&txn, request_id).await?;
        ensure_assignable(&record, &ctx)?;

        let workload = WorkloadLine::from_request(&record);
        let assignment = self
            .staff
            .assign_staff(
                &txn,
                Booking {
                    request_id,
                    date: record.request.scheduled_date,
                    workload: &workload,
                    minutes_per_item: config.counting_minutes_per_item,
                    now,
                },
            )
            .await?;

        let event = LifecycleEvent::Assign {
            staff_id: assignment.staff_id,
        };
        let outcome = apply(&mut record, &event, &ctx)?;
        self.requests.save(&txn, &record).await?;
        db::commit(txn, started).await?;

        self.publish(&record, outcome, actor, Some(assignment)).await;
        Ok(record)
    }

    async fn apply_side_effects(
        &self,
        txn: &DatabaseTransaction,
        record: &mut RequestWithDetails,
        event: &LifecycleEvent,
        config: &warehouse_configuration::Model,
        now: DateTime<Utc>,
    ) -> Result<Option<Assignment>, ServiceError> {
        let request_id = record.request.id.clone();
        let workload = WorkloadLine::from_request(record);
        let booking = Booking {
            request_id: &request_id,
            date: record.request.scheduled_date,
            workload: &workload,
            minutes_per_item: config.counting_minutes_per_item,
            now,
        };

        match event {
            LifecycleEvent::Assign { staff_id } => self
                .staff
                .assign_specific(txn, *staff_id, booking)
                .await
                .map(Some),
            LifecycleEvent::Reassign { staff_id } => {
                self.staff.reassign(txn, *staff_id, booking).await.map(Some)
            }
            LifecycleEvent::Complete {
                actual_minutes: Some(minutes),
            } => {
                if let Some(staff_id) = record.request.assigned_staff_id {
                    self.staff
                        .record_actual_minutes(txn, &request_id, staff_id, *minutes)
                        .await?;
                }
                Ok(None)
            }
            // Counting that has not happened yet no longer takes place on the old day.
            LifecycleEvent::Extend { .. }
                if record.request.status_before_extension == Some(RequestStatus::InProgress) =>
            {
                self.staff.release(txn, &request_id).await?;
                Ok(None)
            }
            LifecycleEvent::Resume if record.request.status == RequestStatus::InProgress => {
                let Some(staff_id) = record.request.assigned_staff_id else {
                    return Ok(None);
                };
                let moved = self.staff.rebook(txn, staff_id, booking).await?;
                if moved.is_none() {
                    info!(request_id = %request_id, %staff_id, "Resumed request needs a new assignment");
                    record.request.assigned_staff_id = None;
                    record.request.status = RequestStatus::NotStarted;
                }
                Ok(moved)
            }
            e if e.is_cancellation() => {
                let released = self
                    .inventory
                    .release_holds_by_detail_ids(txn, record.detail_ids(), now)
                    .await?;
                if released > 0 {
                    info!(request_id = %request_id, released, "Released inventory holds");
                }
                self.staff.release(txn, &request_id).await?;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    async fn publish(
        &self,
        record: &RequestWithDetails,
        outcome: TransitionOutcome,
        actor: &str,
        assignment: Option<Assignment>,
    ) {
        let Some(sender) = &self.event_sender else {
            return;
        };

        if let Some(assignment) = assignment {
            sender
                .send_or_log(Event::StaffAssigned {
                    request_id: assignment.request_id,
                    staff_id: assignment.staff_id,
                    date: assignment.date,
                    expected_minutes: assignment.expected_minutes,
                })
                .await;
        }

        sender
            .send_or_log(Event::RequestStatusChanged {
                request_id: record.request.id.clone(),
                kind: record.request.kind,
                old_status: outcome.from,
                new_status: outcome.to,
                actor: actor.to_string(),
            })
            .await;
    }
}
