use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::entities::request;
use crate::entities::request_detail::{self, DetailStatus};
use crate::entities::warehouse_configuration;
use crate::entities::{RequestKind, RequestStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::repositories::{
    ConfigurationStore, InventoryCollaborator, RequestRepository, RequestWithDetails,
};
use crate::services::lifecycle::LifecycleService;
use crate::services::sequence::SequentialIdAllocator;

/// Request type stamped on automatically created stock checks.
pub const PERIODIC_REQUEST_TYPE: &str = "PERIODIC";

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct NewDetailLine {
    #[validate(length(min = 1, max = 64))]
    pub item_id: String,
    #[validate(range(min = 1))]
    pub expected_quantity: i32,
    #[serde(default)]
    pub expected_measurement: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateRequestInput {
    pub kind: RequestKind,
    #[validate(length(min = 1, max = 64))]
    pub request_type: String,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    #[serde(default)]
    pub expected_completion_date: Option<NaiveDate>,
    #[validate(length(min = 1, message = "at least one detail line is required"))]
    pub details: Vec<NewDetailLine>,
    /// Book counting staff right after creation
    #[serde(default)]
    pub assign_immediately: bool,
}

/// Creation entry point for all request kinds.
pub struct RequestService {
    config_store: Arc<dyn ConfigurationStore>,
    allocator: Arc<SequentialIdAllocator>,
    requests: RequestRepository,
    inventory: Arc<dyn InventoryCollaborator>,
    lifecycle: Arc<LifecycleService>,
    event_sender: Option<EventSender>,
    tz: Tz,
}

impl RequestService {
    pub fn new(
        config_store: Arc<dyn ConfigurationStore>,
        allocator: Arc<SequentialIdAllocator>,
        inventory: Arc<dyn InventoryCollaborator>,
        lifecycle: Arc<LifecycleService>,
        event_sender: Option<EventSender>,
        tz: Tz,
    ) -> Self {
        Self {
            config_store,
            allocator,
            requests: RequestRepository::new(),
            inventory,
            lifecycle,
            event_sender,
            tz,
        }
    }

    /// Validates and persists a new request in NOT_STARTED.
    ///
    /// The identifier is allocated and the request written under the same
    /// per-day lock. Immediate assignment runs afterwards; if no staff is
    /// free the request is returned unassigned.
    #[instrument(skip(self, input), fields(kind = %input.kind, scheduled_date = %input.scheduled_date))]
    pub async fn create_request(
        &self,
        input: CreateRequestInput,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<RequestWithDetails, ServiceError> {
        input.validate()?;
        for line in &input.details {
            line.validate()?;
        }

        let config = self.config_store.current().await?;
        self.validate_schedule(&input, &config, now)?;

        let today = now.with_timezone(&self.tz).date_naive();
        let reservation = self
            .allocator
            .reserve(input.kind.id_prefix(), today, now)
            .await?;
        let request_id = reservation.id().to_string();

        let request = request::Model {
            id: request_id.clone(),
            kind: input.kind,
            status: RequestStatus::NotStarted,
            request_type: input.request_type.trim().to_string(),
            scheduled_date: input.scheduled_date,
            scheduled_time: Some(input.scheduled_time),
            expected_completion_date: input.expected_completion_date,
            extended_date: None,
            extend_reason: None,
            status_before_extension: None,
            assigned_staff_id: None,
            note: None,
            trigger_instant: None,
            created_by: actor.to_string(),
            updated_by: actor.to_string(),
            created_at: now,
            updated_at: now,
        };

        let mut details = Vec::with_capacity(input.details.len());
        for line in &input.details {
            let detail_id = Uuid::new_v4();
            let snapshot = match input.kind {
                RequestKind::StockCheck => {
                    self.inventory
                        .available_unit_ids(reservation.txn(), line.item_id.clone())
                        .await?
                }
                RequestKind::Export => {
                    let wanted = line.expected_quantity as u64;
                    let held = self
                        .inventory
                        .hold_available(
                            reservation.txn(),
                            detail_id,
                            line.item_id.clone(),
                            wanted,
                            now,
                        )
                        .await?;
                    if (held.len() as u64) < wanted {
                        // Dropping the reservation rolls back the holds placed so far.
                        return Err(ServiceError::ValidationError(format!(
                            "Insufficient available inventory for item {}: requested {}, available {}",
                            line.item_id,
                            wanted,
                            held.len()
                        )));
                    }
                    Vec::new()
                }
                RequestKind::Import => Vec::new(),
            };

            details.push(new_detail(
                detail_id,
                &request_id,
                &line.item_id,
                line.expected_quantity,
                line.expected_measurement,
                snapshot,
            ));
        }

        let created = self
            .requests
            .insert(reservation.txn(), RequestWithDetails { request, details })
            .await?;
        reservation.commit().await?;

        info!(request_id = %created.request.id, lines = created.details.len(), "Request created");
        self.publish_created(&created).await;

        if input.assign_immediately {
            match self.lifecycle.assign(&created.request.id, actor, now).await {
                Ok(assigned) => return Ok(assigned),
                Err(ServiceError::AssignmentUnavailable(date)) => {
                    warn!(request_id = %created.request.id, %date, "Created without staff; assignment must be retried");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(created)
    }

    /// Creates the PERIODIC stock check for one recurrence instant, covering
    /// every item with available stock. Returns `None` when that instant was
    /// already served or there is nothing to count.
    #[instrument(skip(self))]
    pub async fn create_recurring_stock_check(
        &self,
        trigger_instant: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<RequestWithDetails>, ServiceError> {
        let local_trigger = trigger_instant.with_timezone(&self.tz);
        let day = local_trigger.date_naive();
        let reservation = self
            .allocator
            .reserve(RequestKind::StockCheck.id_prefix(), day, now)
            .await?;

        if self
            .requests
            .find_by_trigger_instant(reservation.txn(), trigger_instant)
            .await?
            .is_some()
        {
            info!(%trigger_instant, "Recurring stock check already created");
            return Ok(None);
        }

        let stock = self.inventory.available_by_item(reservation.txn()).await?;
        if stock.is_empty() {
            info!(%trigger_instant, "No available inventory; skipping recurring stock check");
            return Ok(None);
        }

        let request_id = reservation.id().to_string();
        let details = stock
            .into_iter()
            .map(|(item_id, units)| {
                let quantity = i32::try_from(units.len()).unwrap_or(i32::MAX);
                new_detail(Uuid::new_v4(), &request_id, &item_id, quantity, None, units)
            })
            .collect::<Vec<_>>();

        let request = request::Model {
            id: request_id.clone(),
            kind: RequestKind::StockCheck,
            status: RequestStatus::NotStarted,
            request_type: PERIODIC_REQUEST_TYPE.to_string(),
            scheduled_date: day,
            scheduled_time: Some(local_trigger.time()),
            expected_completion_date: Some(day),
            extended_date: None,
            extend_reason: None,
            status_before_extension: None,
            assigned_staff_id: None,
            note: None,
            trigger_instant: Some(trigger_instant),
            created_by: crate::services::expiration::SYSTEM_ACTOR.to_string(),
            updated_by: crate::services::expiration::SYSTEM_ACTOR.to_string(),
            created_at: now,
            updated_at: now,
        };

        let created = self
            .requests
            .insert(reservation.txn(), RequestWithDetails { request, details })
            .await?;
        reservation.commit().await?;

        info!(request_id = %created.request.id, lines = created.details.len(), "Recurring stock check created");
        self.publish_created(&created).await;
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::RecurringStockCheckCreated {
                    request_id: created.request.id.clone(),
                    trigger_instant,
                    line_count: created.details.len(),
                })
                .await;
        }

        Ok(Some(created))
    }

    fn validate_schedule(
        &self,
        input: &CreateRequestInput,
        config: &warehouse_configuration::Model,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        if !config.is_within_working_hours(input.scheduled_time) {
            return Err(ServiceError::ValidationError(format!(
                "Scheduled time {} is outside working hours {}-{}",
                input.scheduled_time.format("%H:%M"),
                config.working_time_start.format("%H:%M"),
                config.working_time_end.format("%H:%M")
            )));
        }

        if let Some(completion) = input.expected_completion_date {
            if completion < input.scheduled_date {
                return Err(ServiceError::ValidationError(format!(
                    "Expected completion date {} is before the scheduled date {}",
                    completion, input.scheduled_date
                )));
            }
        }

        let scheduled_local = input.scheduled_date.and_time(input.scheduled_time);
        let scheduled_at = self
            .tz
            .from_local_datetime(&scheduled_local)
            .earliest()
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Scheduled time {} does not exist in {}",
                    scheduled_local, self.tz
                ))
            })?
            .with_timezone(&Utc);

        let earliest_allowed = now + Duration::minutes(i64::from(config.create_request_lead_minutes));
        if scheduled_at < earliest_allowed {
            return Err(ServiceError::ValidationError(format!(
                "Requests must be scheduled at least {} minutes ahead",
                config.create_request_lead_minutes
            )));
        }

        Ok(())
    }

    async fn publish_created(&self, created: &RequestWithDetails) {
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::RequestCreated {
                    request_id: created.request.id.clone(),
                    kind: created.request.kind,
                    scheduled_date: created.request.scheduled_date,
                    created_by: created.request.created_by.clone(),
                })
                .await;
        }
    }
}

fn new_detail(
    id: Uuid,
    request_id: &str,
    item_id: &str,
    expected_quantity: i32,
    expected_measurement: Option<Decimal>,
    snapshot: Vec<String>,
) -> request_detail::Model {
    request_detail::Model {
        id,
        request_id: request_id.to_string(),
        item_id: item_id.trim().to_string(),
        expected_quantity,
        actual_quantity: None,
        expected_measurement,
        actual_measurement: None,
        status: DetailStatus::Pending,
        inventory_item_ids: serde_json::json!(snapshot),
    }
}
