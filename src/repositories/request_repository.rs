use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Select,
};
use serde::{Deserialize, Serialize};

use crate::entities::request::{self, Column, Entity as Request};
use crate::entities::request_detail::{self, Entity as RequestDetail};
use crate::entities::{RequestKind, RequestStatus};
use crate::errors::ServiceError;

/// A request together with its detail lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestWithDetails {
    #[serde(flatten)]
    pub request: request::Model,
    pub details: Vec<request_detail::Model>,
}

impl RequestWithDetails {
    pub fn detail_ids(&self) -> Vec<uuid::Uuid> {
        self.details.iter().map(|d| d.id).collect()
    }
}

/// `SELECT ... FOR UPDATE` on Postgres. SQLite serialises writers on its own.
fn for_update(query: Select<Request>, backend: DbBackend) -> Select<Request> {
    match backend {
        DbBackend::Postgres => query.lock_exclusive(),
        _ => query,
    }
}

/// Persistence for requests and their detail lines.
///
/// Every method takes the connection to run on so the same queries serve
/// both plain reads and multi-row units of work inside a transaction. Loads
/// that precede a write lock the request rows until the transaction ends.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestRepository;

impl RequestRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn find_by_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
    ) -> Result<Option<request::Model>, ServiceError> {
        Request::find_by_id(id.to_string())
            .one(conn)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Loads a request and its lines, failing with `NotFound` when absent.
    pub async fn get_with_details<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
    ) -> Result<RequestWithDetails, ServiceError> {
        let request = self
            .find_by_id(conn, id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Request {} not found", id)))?;
        let details = self.details_for(conn, &request.id).await?;
        Ok(RequestWithDetails { request, details })
    }

    /// Like [`get_with_details`](Self::get_with_details), holding the request row
    /// for the rest of the caller's transaction.
    pub async fn get_for_update<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
    ) -> Result<RequestWithDetails, ServiceError> {
        let request = for_update(Request::find_by_id(id.to_string()), conn.get_database_backend())
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Request {} not found", id)))?;
        let details = self.details_for(conn, &request.id).await?;
        Ok(RequestWithDetails { request, details })
    }

    pub async fn details_for<C: ConnectionTrait>(
        &self,
        conn: &C,
        request_id: &str,
    ) -> Result<Vec<request_detail::Model>, ServiceError> {
        RequestDetail::find()
            .filter(request_detail::Column::RequestId.eq(request_id))
            .order_by_asc(request_detail::Column::ItemId)
            .order_by_asc(request_detail::Column::Id)
            .all(conn)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Requests of `kind` scheduled for `date` whose status is one of `statuses`,
    /// locked for update.
    pub async fn find_by_kind_date_and_status_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        kind: RequestKind,
        date: NaiveDate,
        statuses: &[RequestStatus],
    ) -> Result<Vec<RequestWithDetails>, ServiceError> {
        let query = Request::find()
            .filter(Column::Kind.eq(kind))
            .filter(Column::ScheduledDate.eq(date))
            .filter(Column::Status.is_in(statuses.iter().copied()))
            .order_by_asc(Column::Id);
        let requests = for_update(query, conn.get_database_backend())
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?;
        self.attach_details(conn, requests).await
    }

    /// EXTENDED requests of `kind` whose extension date is on or before `threshold`,
    /// locked for update.
    pub async fn find_extended_on_or_before<C: ConnectionTrait>(
        &self,
        conn: &C,
        kind: RequestKind,
        threshold: NaiveDate,
    ) -> Result<Vec<RequestWithDetails>, ServiceError> {
        let query = Request::find()
            .filter(Column::Kind.eq(kind))
            .filter(Column::Status.eq(RequestStatus::Extended))
            .filter(Column::ExtendedDate.lte(threshold))
            .order_by_asc(Column::Id);
        let requests = for_update(query, conn.get_database_backend())
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?;
        self.attach_details(conn, requests).await
    }

    pub async fn find_by_trigger_instant<C: ConnectionTrait>(
        &self,
        conn: &C,
        instant: DateTime<Utc>,
    ) -> Result<Option<request::Model>, ServiceError> {
        Request::find()
            .filter(Column::TriggerInstant.eq(instant))
            .one(conn)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn attach_details<C: ConnectionTrait>(
        &self,
        conn: &C,
        requests: Vec<request::Model>,
    ) -> Result<Vec<RequestWithDetails>, ServiceError> {
        let mut loaded = Vec::with_capacity(requests.len());
        for request in requests {
            let details = self.details_for(conn, &request.id).await?;
            loaded.push(RequestWithDetails { request, details });
        }
        Ok(loaded)
    }

    /// Inserts a new request and its lines.
    pub async fn insert<C: ConnectionTrait>(
        &self,
        conn: &C,
        record: RequestWithDetails,
    ) -> Result<RequestWithDetails, ServiceError> {
        let active: request::ActiveModel = record.request.into();
        let request = active
            .reset_all()
            .insert(conn)
            .await
            .map_err(ServiceError::db_error)?;

        let mut details = Vec::with_capacity(record.details.len());
        for detail in record.details {
            let active: request_detail::ActiveModel = detail.into();
            details.push(
                active
                    .reset_all()
                    .insert(conn)
                    .await
                    .map_err(ServiceError::db_error)?,
            );
        }

        Ok(RequestWithDetails { request, details })
    }

    /// Writes every column of the request and its lines back to the store.
    pub async fn save<C: ConnectionTrait>(
        &self,
        conn: &C,
        record: &RequestWithDetails,
    ) -> Result<(), ServiceError> {
        let active: request::ActiveModel = record.request.clone().into();
        active
            .reset_all()
            .update(conn)
            .await
            .map_err(ServiceError::db_error)?;

        for detail in &record.details {
            let active: request_detail::ActiveModel = detail.clone().into();
            active
                .reset_all()
                .update(conn)
                .await
                .map_err(ServiceError::db_error)?;
        }
        Ok(())
    }

    pub async fn save_all<C: ConnectionTrait>(
        &self,
        conn: &C,
        records: &[RequestWithDetails],
    ) -> Result<(), ServiceError> {
        for record in records {
            self.save(conn, record).await?;
        }
        Ok(())
    }
}
