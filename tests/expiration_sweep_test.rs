//! Deadline and extension sweeps against a real schema.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{day, local, SeedRequest, TestApp};
use sea_orm::{ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter};
use uuid::Uuid;
use warehouse_ops::{
    entities::{
        inventory_item::InventoryItemStatus, staff::StaffStatus, staff_performance, sweep_marker,
        RequestKind, RequestStatus,
    },
    errors::ServiceError,
    repositories::InventoryCollaborator,
    services::{
        expiration::SkipReason,
        requests::{CreateRequestInput, NewDetailLine},
        ServiceFactory,
    },
};

/// Inventory whose hold release always fails.
struct UnreachableInventory;

#[async_trait]
impl InventoryCollaborator for UnreachableInventory {
    async fn release_holds_by_detail_ids(
        &self,
        _txn: &DatabaseTransaction,
        _detail_ids: Vec<Uuid>,
        _now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        Err(ServiceError::InternalError("inventory unreachable".into()))
    }

    async fn hold_available(
        &self,
        _txn: &DatabaseTransaction,
        _detail_id: Uuid,
        _item_id: String,
        _quantity: u64,
        _now: DateTime<Utc>,
    ) -> Result<Vec<String>, ServiceError> {
        Err(ServiceError::InternalError("inventory unreachable".into()))
    }

    async fn available_unit_ids(
        &self,
        _txn: &DatabaseTransaction,
        _item_id: String,
    ) -> Result<Vec<String>, ServiceError> {
        Err(ServiceError::InternalError("inventory unreachable".into()))
    }

    async fn available_by_item(
        &self,
        _txn: &DatabaseTransaction,
    ) -> Result<BTreeMap<String, Vec<String>>, ServiceError> {
        Err(ServiceError::InternalError("inventory unreachable".into()))
    }
}

#[tokio::test]
async fn deadline_sweep_cancels_today_and_leaves_tomorrow() {
    let app = TestApp::new().await;
    let today = day(2024, 2, 1);
    app.insert_request(SeedRequest::new(
        "PN-20240130-001",
        RequestKind::Import,
        RequestStatus::InProgress,
        today,
    ))
    .await;
    app.insert_request(SeedRequest::new(
        "PN-20240130-002",
        RequestKind::Import,
        RequestStatus::NotStarted,
        day(2024, 2, 2),
    ))
    .await;

    let outcome = app
        .services
        .expiration
        .sweep_deadlines(RequestKind::Import, local(2024, 2, 1, 17, 5))
        .await
        .unwrap();
    assert_eq!(outcome.cancelled_count, 1);
    assert_eq!(outcome.day, today);
    assert_eq!(outcome.skipped, None);

    let cancelled = app.load("PN-20240130-001").await;
    assert_eq!(cancelled.request.status, RequestStatus::Cancelled);
    assert_eq!(
        cancelled.request.note.as_deref(),
        Some("auto-cancel: deadline exceeded at 17:00")
    );
    assert_eq!(cancelled.request.updated_by, "system");

    let tomorrow = app.load("PN-20240130-002").await;
    assert_eq!(tomorrow.request.status, RequestStatus::NotStarted);
    assert!(tomorrow.request.note.is_none());
}

#[tokio::test]
async fn deadline_sweep_runs_once_per_day() {
    let app = TestApp::new().await;
    app.insert_request(SeedRequest::new(
        "PK-20240130-001",
        RequestKind::StockCheck,
        RequestStatus::NotStarted,
        day(2024, 2, 1),
    ))
    .await;

    let first = app
        .services
        .expiration
        .sweep_deadlines(RequestKind::StockCheck, local(2024, 2, 1, 17, 1))
        .await
        .unwrap();
    assert_eq!(first.cancelled_count, 1);

    // A request that shows up after today's run is left for manual handling.
    app.insert_request(SeedRequest::new(
        "PK-20240130-002",
        RequestKind::StockCheck,
        RequestStatus::Counted,
        day(2024, 2, 1),
    ))
    .await;

    for minute in [2, 3] {
        let again = app
            .services
            .expiration
            .sweep_deadlines(RequestKind::StockCheck, local(2024, 2, 1, 17, minute))
            .await
            .unwrap();
        assert_eq!(again.cancelled_count, 0);
        assert_eq!(again.skipped, Some(SkipReason::AlreadyRanToday));
    }
    assert_eq!(
        app.load("PK-20240130-002").await.request.status,
        RequestStatus::Counted
    );
}

#[tokio::test]
async fn deadline_sweep_waits_for_threshold_and_ignores_other_kinds() {
    let app = TestApp::new().await;
    app.insert_request(SeedRequest::new(
        "PX-20240130-001",
        RequestKind::Export,
        RequestStatus::NotStarted,
        day(2024, 2, 1),
    ))
    .await;

    let early = app
        .services
        .expiration
        .sweep_deadlines(RequestKind::Export, local(2024, 2, 1, 16, 59))
        .await
        .unwrap();
    assert_eq!(early.skipped, Some(SkipReason::BeforeThreshold));

    let import_sweep = app
        .services
        .expiration
        .sweep_deadlines(RequestKind::Import, local(2024, 2, 1, 17, 30))
        .await
        .unwrap();
    assert_eq!(import_sweep.cancelled_count, 0);
    assert_eq!(
        app.load("PX-20240130-001").await.request.status,
        RequestStatus::NotStarted
    );

    // The import marker does not suppress the export sweep.
    let export_sweep = app
        .services
        .expiration
        .sweep_deadlines(RequestKind::Export, local(2024, 2, 1, 17, 30))
        .await
        .unwrap();
    assert_eq!(export_sweep.cancelled_count, 1);
}

#[tokio::test]
async fn deadline_sweep_follows_configured_threshold() {
    let app = TestApp::new().await;
    app.update_config(|c| c.time_to_allow_cancel = common::time(12, 0))
        .await;
    app.insert_request(SeedRequest::new(
        "PN-20240130-001",
        RequestKind::Import,
        RequestStatus::NotStarted,
        day(2024, 2, 1),
    ))
    .await;

    let outcome = app
        .services
        .expiration
        .sweep_deadlines(RequestKind::Import, local(2024, 2, 1, 12, 0))
        .await
        .unwrap();
    assert_eq!(outcome.cancelled_count, 1);
    assert_eq!(
        app.load("PN-20240130-001").await.request.note.as_deref(),
        Some("auto-cancel: deadline exceeded at 12:00")
    );
}

#[tokio::test]
async fn extension_sweep_honours_the_allowance() {
    let app = TestApp::new().await;
    app.update_config(|c| c.days_to_allow_extend = 7).await;
    let today = day(2024, 2, 20);

    app.insert_request(
        SeedRequest::new(
            "PN-20240201-001",
            RequestKind::Import,
            RequestStatus::Extended,
            day(2024, 2, 10),
        )
        .extended_to(day(2024, 2, 12)),
    )
    .await;
    app.insert_request(
        SeedRequest::new(
            "PN-20240201-002",
            RequestKind::Import,
            RequestStatus::Extended,
            day(2024, 2, 12),
        )
        .extended_to(day(2024, 2, 14)),
    )
    .await;

    let outcome = app
        .services
        .expiration
        .sweep_extensions(RequestKind::Import, local(2024, 2, 20, 0, 5))
        .await
        .unwrap();
    assert_eq!(outcome.day, today);
    assert_eq!(outcome.cancelled_count, 1);

    let expired = app.load("PN-20240201-001").await;
    assert_eq!(expired.request.status, RequestStatus::Cancelled);
    assert_eq!(
        expired.request.note.as_deref(),
        Some("auto-cancel: extension exceeded 7 days")
    );
    assert_eq!(
        app.load("PN-20240201-002").await.request.status,
        RequestStatus::Extended
    );
}

#[tokio::test]
async fn extension_sweep_rejects_negative_allowance() {
    let app = TestApp::new().await;
    app.update_config(|c| c.days_to_allow_extend = -1).await;

    let err = app
        .services
        .expiration
        .sweep_extensions(RequestKind::Import, local(2024, 2, 20, 0, 5))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::InvalidConfiguration(_)
    );
}

#[tokio::test]
async fn deadline_sweep_releases_export_holds() {
    let app = TestApp::new().await;
    let units = app.seed_units("ITEM-X", 3).await;

    let created = app
        .services
        .requests
        .create_request(
            CreateRequestInput {
                kind: RequestKind::Export,
                request_type: "SALE".into(),
                scheduled_date: day(2024, 2, 1),
                scheduled_time: common::time(10, 0),
                expected_completion_date: None,
                details: vec![NewDetailLine {
                    item_id: "ITEM-X".into(),
                    expected_quantity: 2,
                    expected_measurement: None,
                }],
                assign_immediately: false,
            },
            "planner",
            local(2024, 1, 31, 9, 0),
        )
        .await
        .unwrap();
    let detail_id = created.details[0].id;

    let held: Vec<_> = {
        let mut held = Vec::new();
        for id in &units {
            let unit = app.unit(id).await;
            if unit.held_by_detail_id == Some(detail_id) {
                assert_eq!(unit.status, InventoryItemStatus::Unavailable);
                held.push(unit.id);
            }
        }
        held
    };
    assert_eq!(held.len(), 2);

    let outcome = app
        .services
        .expiration
        .sweep_deadlines(RequestKind::Export, local(2024, 2, 1, 17, 5))
        .await
        .unwrap();
    assert_eq!(outcome.cancelled_count, 1);
    assert_eq!(outcome.released_holds, 2);

    for id in &units {
        let unit = app.unit(id).await;
        assert_eq!(unit.status, InventoryItemStatus::Available);
        assert_eq!(unit.held_by_detail_id, None);
    }
}

#[tokio::test]
async fn failed_hold_release_rolls_back_the_whole_batch() {
    let app = TestApp::new().await;
    for id in ["PN-20240130-001", "PN-20240130-002"] {
        app.insert_request(SeedRequest::new(
            id,
            RequestKind::Import,
            RequestStatus::NotStarted,
            day(2024, 2, 1),
        ))
        .await;
    }

    let broken = ServiceFactory::new(app.db.clone(), &app.config, None)
        .with_inventory(Arc::new(UnreachableInventory))
        .build();
    let err = broken
        .expiration
        .sweep_deadlines(RequestKind::Import, local(2024, 2, 1, 17, 5))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InternalError(_));

    for id in ["PN-20240130-001", "PN-20240130-002"] {
        let untouched = app.load(id).await;
        assert_eq!(untouched.request.status, RequestStatus::NotStarted);
        assert!(untouched.request.note.is_none());
    }
    let marker = sweep_marker::Entity::find_by_id("deadline:IMPORT".to_string())
        .one(app.db.as_ref())
        .await
        .unwrap();
    assert!(marker.is_none());

    let retried = app
        .services
        .expiration
        .sweep_deadlines(RequestKind::Import, local(2024, 2, 1, 17, 6))
        .await
        .unwrap();
    assert_eq!(retried.cancelled_count, 2);
    assert_eq!(retried.skipped, None);
}

#[tokio::test]
async fn deadline_sweep_frees_staff_bookings() {
    let app = TestApp::new().await;
    let counter = app.seed_staff("an.nguyen", StaffStatus::Active).await;

    let created = app
        .services
        .requests
        .create_request(
            CreateRequestInput {
                kind: RequestKind::StockCheck,
                request_type: "AD_HOC".into(),
                scheduled_date: day(2024, 2, 1),
                scheduled_time: common::time(10, 0),
                expected_completion_date: None,
                details: vec![NewDetailLine {
                    item_id: "ITEM-A".into(),
                    expected_quantity: 1,
                    expected_measurement: None,
                }],
                assign_immediately: true,
            },
            "planner",
            local(2024, 1, 31, 9, 0),
        )
        .await
        .unwrap();
    assert_eq!(created.request.assigned_staff_id, Some(counter));

    let outcome = app
        .services
        .expiration
        .sweep_deadlines(RequestKind::StockCheck, local(2024, 2, 1, 17, 5))
        .await
        .unwrap();
    assert_eq!(outcome.cancelled_count, 1);

    let bookings = staff_performance::Entity::find()
        .filter(staff_performance::Column::StaffId.eq(counter))
        .all(app.db.as_ref())
        .await
        .unwrap();
    assert!(bookings.is_empty());
}
