use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use crate::entities::staff::{self, Entity as Staff, StaffStatus};
use crate::entities::staff_performance::{self, Entity as StaffPerformance};
use crate::errors::ServiceError;

/// A workload booking to record against one staff member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAssignment {
    pub staff_id: Uuid,
    pub request_id: String,
    pub date: NaiveDate,
    pub expected_working_minutes: i32,
    pub created_at: DateTime<Utc>,
}

/// Staff accounts and their per-day workload records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StaffDirectory: Send + Sync {
    /// Active staff with no workload booked on `date`, in selection order.
    async fn find_active_available(
        &self,
        txn: &DatabaseTransaction,
        date: NaiveDate,
    ) -> Result<Vec<Uuid>, ServiceError>;

    async fn record_assignment(
        &self,
        txn: &DatabaseTransaction,
        assignment: NewAssignment,
    ) -> Result<staff_performance::Model, ServiceError>;

    /// Removes the request's bookings that have no actual minutes yet.
    async fn clear_open_assignments(
        &self,
        txn: &DatabaseTransaction,
        request_id: &str,
    ) -> Result<u64, ServiceError>;

    /// Stores actual minutes on the request's booking for `staff_id`. Returns false when none exists.
    async fn record_actual_minutes(
        &self,
        txn: &DatabaseTransaction,
        request_id: &str,
        staff_id: Uuid,
        minutes: i32,
    ) -> Result<bool, ServiceError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SeaOrmStaffDirectory;

impl SeaOrmStaffDirectory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StaffDirectory for SeaOrmStaffDirectory {
    async fn find_active_available(
        &self,
        txn: &DatabaseTransaction,
        date: NaiveDate,
    ) -> Result<Vec<Uuid>, ServiceError> {
        let busy: Vec<Uuid> = StaffPerformance::find()
            .select_only()
            .column(staff_performance::Column::StaffId)
            .filter(staff_performance::Column::Date.eq(date))
            .into_tuple()
            .all(txn)
            .await
            .map_err(ServiceError::db_error)?;

        let available = Staff::find()
            .filter(staff::Column::Status.eq(StaffStatus::Active))
            .filter(staff::Column::Id.is_not_in(busy))
            .order_by_asc(staff::Column::Username)
            .all(txn)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(available.into_iter().map(|s| s.id).collect())
    }

    async fn record_assignment(
        &self,
        txn: &DatabaseTransaction,
        assignment: NewAssignment,
    ) -> Result<staff_performance::Model, ServiceError> {
        staff_performance::ActiveModel {
            id: Set(Uuid::new_v4()),
            staff_id: Set(assignment.staff_id),
            request_id: Set(assignment.request_id),
            date: Set(assignment.date),
            expected_working_minutes: Set(assignment.expected_working_minutes),
            actual_working_minutes: Set(None),
            created_at: Set(assignment.created_at),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)
    }

    async fn clear_open_assignments(
        &self,
        txn: &DatabaseTransaction,
        request_id: &str,
    ) -> Result<u64, ServiceError> {
        let result = StaffPerformance::delete_many()
            .filter(staff_performance::Column::RequestId.eq(request_id))
            .filter(staff_performance::Column::ActualWorkingMinutes.is_null())
            .exec(txn)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(result.rows_affected)
    }

    async fn record_actual_minutes(
        &self,
        txn: &DatabaseTransaction,
        request_id: &str,
        staff_id: Uuid,
        minutes: i32,
    ) -> Result<bool, ServiceError> {
        let booking = StaffPerformance::find()
            .filter(staff_performance::Column::RequestId.eq(request_id))
            .filter(staff_performance::Column::StaffId.eq(staff_id))
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?;

        match booking {
            Some(row) => {
                let mut active: staff_performance::ActiveModel = row.into();
                active.actual_working_minutes = Set(Some(minutes));
                active.update(txn).await.map_err(ServiceError::db_error)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
