#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use warehouse_ops::{
    api_router,
    config::AppConfig,
    db::{self, DbPool},
    entities::{
        inventory_item::{self, InventoryItemStatus},
        request, request_detail,
        request_detail::DetailStatus,
        staff::{self, StaffStatus},
        warehouse_configuration, RequestKind, RequestStatus,
    },
    events::{self, EventSender},
    repositories::{RequestRepository, RequestWithDetails},
    services::{ServiceContainer, ServiceFactory},
    AppState,
};

pub const TZ: Tz = chrono_tz::Asia::Ho_Chi_Minh;

/// Instant for a local wall-clock time in the operating timezone.
pub fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    TZ.with_ymd_and_hms(y, m, d, h, min, 0)
        .single()
        .expect("unambiguous local time")
        .with_timezone(&Utc)
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).expect("valid time")
}

/// Application wired against a fresh in-memory SQLite database.
pub struct TestApp {
    pub db: Arc<DbPool>,
    pub config: AppConfig,
    pub services: ServiceContainer,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // Every connection to sqlite::memory: is its own database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.operating_timezone = TZ.name().to_string();
        cfg.scheduler_enabled = false;
        cfg.id_lock_timeout_ms = 10_000;
        tweak(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let services =
            ServiceFactory::new(db_arc.clone(), &cfg, Some(event_sender.clone())).build();
        services
            .config_store
            .ensure_default()
            .await
            .expect("seed configuration");

        let state = AppState {
            db: db_arc.clone(),
            config: cfg.clone(),
            services: services.clone(),
            event_sender: Some(event_sender),
        };

        Self {
            db: db_arc,
            config: cfg,
            services,
            state,
            _event_task: event_task,
        }
    }

    pub fn router(&self) -> Router {
        api_router(self.state.clone())
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        actor: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(actor) = actor {
            builder = builder.header("x-actor-id", actor);
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        self.router().oneshot(request).await.expect("router response")
    }

    /// Applies `edit` to the stored warehouse configuration.
    pub async fn update_config(&self, edit: impl FnOnce(&mut warehouse_configuration::Model)) {
        let mut current = self
            .services
            .config_store
            .current()
            .await
            .expect("configuration");
        edit(&mut current);
        self.services
            .config_store
            .save(current)
            .await
            .expect("save configuration");
    }

    pub async fn seed_staff(&self, username: &str, status: StaffStatus) -> Uuid {
        let id = Uuid::new_v4();
        staff::ActiveModel {
            id: Set(id),
            username: Set(username.to_string()),
            full_name: Set(format!("{} (test)", username)),
            status: Set(status),
            created_at: Set(Utc::now()),
        }
        .insert(self.db.as_ref())
        .await
        .expect("insert staff");
        id
    }

    /// Inserts `count` available units of `item_id`, ids `<item_id>-<n>`.
    pub async fn seed_units(&self, item_id: &str, count: usize) -> Vec<String> {
        let mut ids = Vec::with_capacity(count);
        for n in 1..=count {
            let id = format!("{}-{}", item_id, n);
            inventory_item::ActiveModel {
                id: Set(id.clone()),
                item_id: Set(item_id.to_string()),
                status: Set(InventoryItemStatus::Available),
                held_by_detail_id: Set(None),
                updated_at: Set(Utc::now()),
            }
            .insert(self.db.as_ref())
            .await
            .expect("insert inventory item");
            ids.push(id);
        }
        ids
    }

    pub async fn unit(&self, id: &str) -> inventory_item::Model {
        inventory_item::Entity::find_by_id(id.to_string())
            .one(self.db.as_ref())
            .await
            .expect("query inventory item")
            .expect("inventory item exists")
    }

    /// Inserts a request directly in any status, bypassing creation rules.
    pub async fn insert_request(&self, seed: SeedRequest) -> RequestWithDetails {
        let now = Utc::now();
        let request = request::Model {
            id: seed.id.clone(),
            kind: seed.kind,
            status: seed.status,
            request_type: "MANUAL".to_string(),
            scheduled_date: seed.scheduled_date,
            scheduled_time: Some(time(9, 0)),
            expected_completion_date: None,
            extended_date: seed.extended_date,
            extend_reason: seed.extended_date.map(|_| "supplier delay".to_string()),
            status_before_extension: seed
                .extended_date
                .map(|_| RequestStatus::NotStarted),
            assigned_staff_id: seed.assigned_staff_id,
            note: None,
            trigger_instant: None,
            created_by: "seed".to_string(),
            updated_by: "seed".to_string(),
            created_at: now,
            updated_at: now,
        };
        let details = vec![request_detail::Model {
            id: Uuid::new_v4(),
            request_id: seed.id.clone(),
            item_id: "ITEM-A".to_string(),
            expected_quantity: 2,
            actual_quantity: seed.actual_quantity,
            expected_measurement: None,
            actual_measurement: None,
            status: seed
                .actual_quantity
                .map(|actual| DetailStatus::compare(2, actual))
                .unwrap_or(DetailStatus::Pending),
            inventory_item_ids: serde_json::json!([]),
        }];

        RequestRepository::new()
            .insert(self.db.as_ref(), RequestWithDetails { request, details })
            .await
            .expect("insert request")
    }

    pub async fn load(&self, id: &str) -> RequestWithDetails {
        RequestRepository::new()
            .get_with_details(self.db.as_ref(), id)
            .await
            .expect("request exists")
    }
}

/// Shape of a request inserted by [`TestApp::insert_request`].
#[derive(Debug, Clone)]
pub struct SeedRequest {
    pub id: String,
    pub kind: RequestKind,
    pub status: RequestStatus,
    pub scheduled_date: NaiveDate,
    pub extended_date: Option<NaiveDate>,
    pub assigned_staff_id: Option<Uuid>,
    pub actual_quantity: Option<i32>,
}

impl SeedRequest {
    pub fn new(id: &str, kind: RequestKind, status: RequestStatus, scheduled_date: NaiveDate) -> Self {
        Self {
            id: id.to_string(),
            kind,
            status,
            scheduled_date,
            extended_date: None,
            assigned_staff_id: None,
            actual_quantity: None,
        }
    }

    pub fn extended_to(mut self, date: NaiveDate) -> Self {
        self.extended_date = Some(date);
        self
    }

    pub fn assigned(mut self, staff_id: Uuid) -> Self {
        self.assigned_staff_id = Some(staff_id);
        self
    }

    pub fn counted(mut self, actual: i32) -> Self {
        self.actual_quantity = Some(actual);
        self
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
