use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use sea_orm::DatabaseTransaction;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::repositories::{NewAssignment, RequestWithDetails, StaffDirectory};

/// One item/quantity pair of a counting workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadLine {
    pub item_id: String,
    pub quantity: i32,
}

impl WorkloadLine {
    /// The counting workload of a request: every line at its expected quantity.
    pub fn from_request(record: &RequestWithDetails) -> Vec<WorkloadLine> {
        record
            .details
            .iter()
            .map(|d| WorkloadLine {
                item_id: d.item_id.clone(),
                quantity: d.expected_quantity,
            })
            .collect()
    }
}

/// What is being booked: the task, its day and its counting workload.
#[derive(Debug, Clone, Copy)]
pub struct Booking<'a> {
    pub request_id: &'a str,
    pub date: NaiveDate,
    pub workload: &'a [WorkloadLine],
    pub minutes_per_item: i32,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub staff_id: Uuid,
    pub request_id: String,
    pub date: NaiveDate,
    pub expected_minutes: i32,
    pub performance_id: Uuid,
}

/// `Σ quantity × minutes_per_item`, rejecting negative inputs and overflow.
pub fn expected_minutes(workload: &[WorkloadLine], minutes_per_item: i32) -> Result<i32, ServiceError> {
    if minutes_per_item < 0 {
        return Err(ServiceError::InvalidConfiguration(format!(
            "counting_minutes_per_item must not be negative, got {}",
            minutes_per_item
        )));
    }

    workload.iter().try_fold(0i32, |total, line| {
        if line.quantity < 0 {
            return Err(ServiceError::ValidationError(format!(
                "quantity for item {} must not be negative",
                line.item_id
            )));
        }
        line.quantity
            .checked_mul(minutes_per_item)
            .and_then(|minutes| total.checked_add(minutes))
            .ok_or_else(|| ServiceError::ValidationError("workload is too large".to_string()))
    })
}

/// Picks staff for counting work and books their expected minutes.
///
/// Selection takes the first active staff member with nothing booked on the
/// target day. A least-loaded policy can replace it without changing callers.
pub struct StaffAssignmentEngine {
    directory: Arc<dyn StaffDirectory>,
}

impl StaffAssignmentEngine {
    pub fn new(directory: Arc<dyn StaffDirectory>) -> Self {
        Self { directory }
    }

    /// Selects an available staff member for the booking's day and records the workload.
    #[instrument(skip(self, txn, booking), fields(request_id = booking.request_id, date = %booking.date))]
    pub async fn assign_staff(
        &self,
        txn: &DatabaseTransaction,
        booking: Booking<'_>,
    ) -> Result<Assignment, ServiceError> {
        let minutes = expected_minutes(booking.workload, booking.minutes_per_item)?;
        let candidates = self
            .directory
            .find_active_available(txn, booking.date)
            .await?;

        let staff_id = match candidates.first() {
            Some(id) => *id,
            None => {
                counter!("warehouse_ops.assignment.unavailable", 1);
                warn!(request_id = booking.request_id, date = %booking.date, "No active staff available");
                return Err(ServiceError::AssignmentUnavailable(booking.date));
            }
        };

        self.book(txn, staff_id, &booking, minutes).await
    }

    /// Books a caller-chosen staff member, who must be active and free on the booking's day.
    pub async fn assign_specific(
        &self,
        txn: &DatabaseTransaction,
        staff_id: Uuid,
        booking: Booking<'_>,
    ) -> Result<Assignment, ServiceError> {
        let minutes = expected_minutes(booking.workload, booking.minutes_per_item)?;
        self.ensure_available(txn, staff_id, booking.date).await?;
        self.book(txn, staff_id, &booking, minutes).await
    }

    /// Moves the request's open booking to `staff_id`.
    pub async fn reassign(
        &self,
        txn: &DatabaseTransaction,
        staff_id: Uuid,
        booking: Booking<'_>,
    ) -> Result<Assignment, ServiceError> {
        let minutes = expected_minutes(booking.workload, booking.minutes_per_item)?;
        self.ensure_available(txn, staff_id, booking.date).await?;
        let cleared = self
            .directory
            .clear_open_assignments(txn, booking.request_id)
            .await?;
        info!(request_id = booking.request_id, cleared, "Cleared previous booking");
        self.book(txn, staff_id, &booking, minutes).await
    }

    /// Drops the request's open booking so its staff member is free that day again.
    pub async fn release(
        &self,
        txn: &DatabaseTransaction,
        request_id: &str,
    ) -> Result<u64, ServiceError> {
        let cleared = self
            .directory
            .clear_open_assignments(txn, request_id)
            .await?;
        if cleared > 0 {
            info!(request_id, cleared, "Released staff booking");
        }
        Ok(cleared)
    }

    /// Moves the request's open booking to the booking's day, keeping `staff_id`
    /// when they are still free then. Returns `None` when they are not, leaving
    /// the request without a booking.
    pub async fn rebook(
        &self,
        txn: &DatabaseTransaction,
        staff_id: Uuid,
        booking: Booking<'_>,
    ) -> Result<Option<Assignment>, ServiceError> {
        let minutes = expected_minutes(booking.workload, booking.minutes_per_item)?;
        self.directory
            .clear_open_assignments(txn, booking.request_id)
            .await?;

        let candidates = self
            .directory
            .find_active_available(txn, booking.date)
            .await?;
        if !candidates.contains(&staff_id) {
            warn!(
                request_id = booking.request_id,
                %staff_id,
                date = %booking.date,
                "Assigned staff is no longer free"
            );
            return Ok(None);
        }
        self.book(txn, staff_id, &booking, minutes).await.map(Some)
    }

    pub async fn record_actual_minutes(
        &self,
        txn: &DatabaseTransaction,
        request_id: &str,
        staff_id: Uuid,
        minutes: i32,
    ) -> Result<(), ServiceError> {
        let recorded = self
            .directory
            .record_actual_minutes(txn, request_id, staff_id, minutes)
            .await?;
        if !recorded {
            warn!(request_id, %staff_id, "No booking found for actual working minutes");
        }
        Ok(())
    }

    async fn ensure_available(
        &self,
        txn: &DatabaseTransaction,
        staff_id: Uuid,
        date: NaiveDate,
    ) -> Result<(), ServiceError> {
        let candidates = self.directory.find_active_available(txn, date).await?;
        if candidates.contains(&staff_id) {
            Ok(())
        } else {
            Err(ServiceError::Conflict(format!(
                "Staff {} is not active or already booked on {}",
                staff_id, date
            )))
        }
    }

    async fn book(
        &self,
        txn: &DatabaseTransaction,
        staff_id: Uuid,
        booking: &Booking<'_>,
        expected_minutes: i32,
    ) -> Result<Assignment, ServiceError> {
        let row = self
            .directory
            .record_assignment(
                txn,
                NewAssignment {
                    staff_id,
                    request_id: booking.request_id.to_string(),
                    date: booking.date,
                    expected_working_minutes: expected_minutes,
                    created_at: booking.now,
                },
            )
            .await?;

        info!(request_id = booking.request_id, %staff_id, date = %booking.date, expected_minutes, "Staff booked");
        Ok(Assignment {
            staff_id,
            request_id: booking.request_id.to_string(),
            date: booking.date,
            expected_minutes,
            performance_id: row.id,
        })
    }
}
