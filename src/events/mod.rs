use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::{RequestKind, RequestStatus};
use crate::errors::ServiceError;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender
            .send(event)
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Events are emitted after commit, so a dropped event never undoes a mutation.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropping domain event");
        }
    }
}

/// Domain events raised by the request lifecycle and the schedulers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    RequestCreated {
        request_id: String,
        kind: RequestKind,
        scheduled_date: NaiveDate,
        created_by: String,
    },
    RequestStatusChanged {
        request_id: String,
        kind: RequestKind,
        old_status: RequestStatus,
        new_status: RequestStatus,
        actor: String,
    },
    RequestAutoCancelled {
        request_id: String,
        kind: RequestKind,
        note: String,
    },
    StaffAssigned {
        request_id: String,
        staff_id: Uuid,
        date: NaiveDate,
        expected_minutes: i32,
    },
    RecurringStockCheckCreated {
        request_id: String,
        trigger_instant: DateTime<Utc>,
        line_count: usize,
    },
}

impl Event {
    pub fn request_id(&self) -> &str {
        match self {
            Event::RequestCreated { request_id, .. }
            | Event::RequestStatusChanged { request_id, .. }
            | Event::RequestAutoCancelled { request_id, .. }
            | Event::StaffAssigned { request_id, .. }
            | Event::RecurringStockCheckCreated { request_id, .. } => request_id,
        }
    }
}

/// Drains the event channel. This is the hand-off point to the external
/// notification channel; here events are only logged.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::RequestCreated {
                request_id,
                kind,
                scheduled_date,
                created_by,
            } => {
                info!(request_id = %request_id, kind = %kind, scheduled_date = %scheduled_date, created_by = %created_by, "Request created");
            }
            Event::RequestStatusChanged {
                request_id,
                kind,
                old_status,
                new_status,
                actor,
            } => {
                info!(request_id = %request_id, kind = %kind, from = %old_status, to = %new_status, actor = %actor, "Request status changed");
            }
            Event::RequestAutoCancelled {
                request_id,
                kind,
                note,
            } => {
                warn!(request_id = %request_id, kind = %kind, note = %note, "Request auto-cancelled");
            }
            Event::StaffAssigned {
                request_id,
                staff_id,
                date,
                expected_minutes,
            } => {
                info!(request_id = %request_id, staff_id = %staff_id, date = %date, expected_minutes, "Staff assigned");
            }
            Event::RecurringStockCheckCreated {
                request_id,
                trigger_instant,
                line_count,
            } => {
                info!(request_id = %request_id, trigger_instant = %trigger_instant, line_count, "Recurring stock check created");
            }
        }
    }

    debug!("Event channel closed; event processing loop finished");
}
