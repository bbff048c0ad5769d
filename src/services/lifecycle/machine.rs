use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::entities::request_detail::DetailStatus;
use crate::entities::warehouse_configuration;
use crate::entities::{RequestKind, RequestStatus};
use crate::errors::ServiceError;
use crate::repositories::RequestWithDetails;

/// Counted quantity for one detail line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineCount {
    pub detail_id: Uuid,
    pub actual_quantity: i32,
    #[serde(default)]
    pub actual_measurement: Option<Decimal>,
}

/// Everything that can move a request between statuses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Assign { staff_id: Uuid },
    Reassign { staff_id: Uuid },
    SubmitCount { counts: Vec<LineCount> },
    RequestRecount,
    ConfirmCount,
    MarkWaitingExport,
    Complete {
        #[serde(default)]
        actual_minutes: Option<i32>,
    },
    Extend { reason: String, new_date: NaiveDate },
    Resume,
    Cancel { reason: String },
    /// Raised by the deadline sweep only
    DeadlineExceeded { at: NaiveTime },
    /// Raised by the extension sweep only
    ExtensionExpired { days: i64 },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Assign { .. } => "Assign",
            LifecycleEvent::Reassign { .. } => "Reassign",
            LifecycleEvent::SubmitCount { .. } => "SubmitCount",
            LifecycleEvent::RequestRecount => "RequestRecount",
            LifecycleEvent::ConfirmCount => "ConfirmCount",
            LifecycleEvent::MarkWaitingExport => "MarkWaitingExport",
            LifecycleEvent::Complete { .. } => "Complete",
            LifecycleEvent::Extend { .. } => "Extend",
            LifecycleEvent::Resume => "Resume",
            LifecycleEvent::Cancel { .. } => "Cancel",
            LifecycleEvent::DeadlineExceeded { .. } => "DeadlineExceeded",
            LifecycleEvent::ExtensionExpired { .. } => "ExtensionExpired",
        }
    }

    /// Events only the schedulers may raise.
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::DeadlineExceeded { .. } | LifecycleEvent::ExtensionExpired { .. }
        )
    }

    /// Whether applying the event ends in CANCELLED.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::Cancel { .. }
                | LifecycleEvent::DeadlineExceeded { .. }
                | LifecycleEvent::ExtensionExpired { .. }
        )
    }
}

/// Clock, zone, rules and acting identity a transition is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext<'a> {
    pub config: &'a warehouse_configuration::Model,
    pub now: DateTime<Utc>,
    pub tz: Tz,
    pub actor: &'a str,
}

impl<'a> TransitionContext<'a> {
    pub fn new(
        config: &'a warehouse_configuration::Model,
        now: DateTime<Utc>,
        tz: Tz,
        actor: &'a str,
    ) -> Self {
        Self {
            config,
            now,
            tz,
            actor,
        }
    }

    pub fn local_now(&self) -> NaiveDateTime {
        self.now.with_timezone(&self.tz).naive_local()
    }

    pub fn today(&self) -> NaiveDate {
        self.local_now().date()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub from: RequestStatus,
    pub to: RequestStatus,
}

/// Applies `event` to `record`. On error the record is left untouched.
pub fn apply(
    record: &mut RequestWithDetails,
    event: &LifecycleEvent,
    ctx: &TransitionContext<'_>,
) -> Result<TransitionOutcome, ServiceError> {
    let from = record.request.status;
    if from.is_terminal() {
        return Err(invalid(
            record,
            event,
            format!("request is already {}", from),
        ));
    }

    let mut next = record.clone();
    let to = transition(&mut next, event, ctx).map_err(|reason| invalid(record, event, reason))?;

    next.request.status = to;
    next.request.updated_by = ctx.actor.to_string();
    next.request.updated_at = ctx.now;
    *record = next;

    Ok(TransitionOutcome { from, to })
}

/// Guard shared by `Assign` and engine-driven assignment: the request must be
/// NOT_STARTED and the assignment window for its scheduled day still open.
pub fn ensure_assignable(
    record: &RequestWithDetails,
    ctx: &TransitionContext<'_>,
) -> Result<(), ServiceError> {
    let probe = LifecycleEvent::Assign {
        staff_id: Uuid::nil(),
    };
    if record.request.status.is_terminal() {
        return Err(invalid(
            record,
            &probe,
            format!("request is already {}", record.request.status),
        ));
    }
    require_status(record.request.status, &[RequestStatus::NotStarted])
        .and_then(|_| ensure_assign_window(record.request.scheduled_date, ctx))
        .map_err(|reason| invalid(record, &probe, reason))
}

fn invalid(record: &RequestWithDetails, event: &LifecycleEvent, reason: String) -> ServiceError {
    ServiceError::InvalidTransition {
        request_id: record.request.id.clone(),
        from: record.request.status.to_string(),
        event: event.name().to_string(),
        reason,
    }
}

fn transition(
    next: &mut RequestWithDetails,
    event: &LifecycleEvent,
    ctx: &TransitionContext<'_>,
) -> Result<RequestStatus, String> {
    let from = next.request.status;
    let scheduled = next.request.scheduled_date;
    let today = ctx.today();

    match event {
        LifecycleEvent::Assign { staff_id } => {
            require_status(from, &[RequestStatus::NotStarted])?;
            ensure_assign_window(scheduled, ctx)?;
            next.request.assigned_staff_id = Some(*staff_id);
            Ok(RequestStatus::InProgress)
        }
        LifecycleEvent::Reassign { staff_id } => {
            require_status(from, &[RequestStatus::InProgress])?;
            ensure_assign_window(scheduled, ctx)?;
            if next.request.assigned_staff_id == Some(*staff_id) {
                return Err(format!("staff {} is already assigned", staff_id));
            }
            next.request.assigned_staff_id = Some(*staff_id);
            Ok(RequestStatus::InProgress)
        }
        LifecycleEvent::SubmitCount { counts } => {
            require_status(from, &[RequestStatus::InProgress])?;
            if next.request.assigned_staff_id.is_none() {
                return Err("no staff member is assigned".to_string());
            }
            if today < scheduled {
                return Err(format!("counting cannot start before {}", scheduled));
            }
            if counts.is_empty() {
                return Err("at least one line count is required".to_string());
            }

            let mut seen = HashSet::new();
            for count in counts {
                if !seen.insert(count.detail_id) {
                    return Err(format!("detail line {} counted twice", count.detail_id));
                }
                if count.actual_quantity < 0 {
                    return Err(format!(
                        "actual quantity for detail line {} must not be negative",
                        count.detail_id
                    ));
                }
                let line = next
                    .details
                    .iter_mut()
                    .find(|d| d.id == count.detail_id)
                    .ok_or_else(|| {
                        format!("detail line {} does not belong to the request", count.detail_id)
                    })?;
                line.actual_quantity = Some(count.actual_quantity);
                line.actual_measurement = count.actual_measurement;
                line.status = DetailStatus::compare(line.expected_quantity, count.actual_quantity);
            }
            Ok(RequestStatus::Counted)
        }
        LifecycleEvent::RequestRecount => {
            require_status(from, &[RequestStatus::Counted])?;
            for line in next.details.iter_mut() {
                line.actual_quantity = None;
                line.actual_measurement = None;
                line.status = DetailStatus::Pending;
            }
            Ok(RequestStatus::InProgress)
        }
        LifecycleEvent::ConfirmCount => {
            require_status(from, &[RequestStatus::Counted])?;
            if let Some(line) = next.details.iter().find(|d| !d.is_counted()) {
                return Err(format!(
                    "detail line {} (item {}) has no actual quantity",
                    line.id, line.item_id
                ));
            }
            ensure_before(
                scheduled,
                ctx.config.time_to_allow_confirm,
                ctx,
                "confirmation",
            )?;
            Ok(RequestStatus::CountConfirmed)
        }
        LifecycleEvent::MarkWaitingExport => {
            if next.request.kind != RequestKind::Export {
                return Err(format!(
                    "only export requests wait for export, this is {}",
                    next.request.kind
                ));
            }
            require_status(from, &[RequestStatus::CountConfirmed])?;
            Ok(RequestStatus::WaitingExport)
        }
        LifecycleEvent::Complete { actual_minutes } => {
            let ready = match next.request.kind {
                RequestKind::Export => RequestStatus::WaitingExport,
                RequestKind::Import | RequestKind::StockCheck => RequestStatus::CountConfirmed,
            };
            require_status(from, &[ready])?;
            if today < scheduled {
                return Err(format!("cannot complete before {}", scheduled));
            }
            if matches!(actual_minutes, Some(m) if *m < 0) {
                return Err("actual working minutes must not be negative".to_string());
            }
            Ok(RequestStatus::Completed)
        }
        LifecycleEvent::Extend { reason, new_date } => {
            if from == RequestStatus::Extended {
                return Err("request is already extended".to_string());
            }
            // The scheduled date moves on resume, so a second extension would
            // be measured from a date past the original one.
            if let Some(previous) = next.request.extended_date {
                return Err(format!("request was already extended to {}", previous));
            }
            if reason.trim().is_empty() {
                return Err("an extension reason is required".to_string());
            }
            let max_days = ctx.config.max_allowed_days_for_extend;
            if max_days < 1 {
                return Err("extensions are disabled by configuration".to_string());
            }
            if *new_date <= scheduled {
                return Err(format!(
                    "new date {} must be after the scheduled date {}",
                    new_date, scheduled
                ));
            }
            let latest = scheduled
                .checked_add_signed(Duration::days(i64::from(max_days)))
                .unwrap_or(NaiveDate::MAX);
            if *new_date > latest {
                return Err(format!(
                    "new date {} exceeds the {} day extension limit (latest {})",
                    new_date, max_days, latest
                ));
            }
            next.request.status_before_extension = Some(from);
            next.request.extended_date = Some(*new_date);
            next.request.extend_reason = Some(reason.trim().to_string());
            Ok(RequestStatus::Extended)
        }
        LifecycleEvent::Resume => {
            require_status(from, &[RequestStatus::Extended])?;
            let extended = next
                .request
                .extended_date
                .ok_or_else(|| "extended request has no extension date".to_string())?;
            if today < extended {
                return Err(format!("cannot resume before the extension date {}", extended));
            }
            let restored = next
                .request
                .status_before_extension
                .take()
                .unwrap_or(RequestStatus::NotStarted);
            next.request.scheduled_date = extended;
            Ok(restored)
        }
        LifecycleEvent::Cancel { reason } => {
            if reason.trim().is_empty() {
                return Err("a cancellation reason is required".to_string());
            }
            let effective = match (from, next.request.extended_date) {
                (RequestStatus::Extended, Some(extended)) => extended,
                _ => scheduled,
            };
            ensure_before(
                effective,
                ctx.config.time_to_allow_cancel,
                ctx,
                "cancellation",
            )?;
            next.request.note = Some(format!("cancelled by {}: {}", ctx.actor, reason.trim()));
            Ok(RequestStatus::Cancelled)
        }
        LifecycleEvent::DeadlineExceeded { at } => {
            next.request.note = Some(format!(
                "auto-cancel: deadline exceeded at {}",
                at.format("%H:%M")
            ));
            Ok(RequestStatus::Cancelled)
        }
        LifecycleEvent::ExtensionExpired { days } => {
            require_status(from, &[RequestStatus::Extended])?;
            next.request.note = Some(format!("auto-cancel: extension exceeded {} days", days));
            Ok(RequestStatus::Cancelled)
        }
    }
}

fn require_status(current: RequestStatus, allowed: &[RequestStatus]) -> Result<(), String> {
    if allowed.contains(&current) {
        return Ok(());
    }
    let expected = allowed
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(" or ");
    Err(format!("expected status {}", expected))
}

fn ensure_assign_window(scheduled: NaiveDate, ctx: &TransitionContext<'_>) -> Result<(), String> {
    let now = ctx.local_now();
    let cutoff = ctx.config.time_to_allow_assign;
    if now.date() < scheduled || (now.date() == scheduled && now.time() < cutoff) {
        Ok(())
    } else {
        Err(format!(
            "assignment closed at {} on {}",
            cutoff.format("%H:%M"),
            scheduled
        ))
    }
}

fn ensure_before(
    day: NaiveDate,
    threshold: NaiveTime,
    ctx: &TransitionContext<'_>,
    what: &str,
) -> Result<(), String> {
    if ctx.local_now() < day.and_time(threshold) {
        Ok(())
    } else {
        Err(format!(
            "{} closed at {} on {}",
            what,
            threshold.format("%H:%M"),
            day
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::request;
    use crate::entities::request_detail;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use chrono_tz::Asia::Ho_Chi_Minh;
    use rstest::rstest;

    fn config() -> warehouse_configuration::Model {
        warehouse_configuration::Model::with_defaults(Utc::now())
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, d).unwrap()
    }

    /// Local wall-clock instant on 2024-02-`d` in the operating zone.
    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Ho_Chi_Minh
            .with_ymd_and_hms(2024, 2, d, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn record(kind: RequestKind, status: RequestStatus, scheduled: NaiveDate) -> RequestWithDetails {
        let created = at(1, 8, 0);
        let id = format!("{}-20240201-001", kind.id_prefix());
        let line = |item: &str, qty: i32| request_detail::Model {
            id: Uuid::new_v4(),
            request_id: id.clone(),
            item_id: item.to_string(),
            expected_quantity: qty,
            actual_quantity: None,
            expected_measurement: None,
            actual_measurement: None,
            status: DetailStatus::Pending,
            inventory_item_ids: serde_json::json!([]),
        };
        RequestWithDetails {
            details: vec![line("ITEM-A", 10), line("ITEM-B", 4)],
            request: request::Model {
                id,
                kind,
                status,
                request_type: "ORDER".into(),
                scheduled_date: scheduled,
                scheduled_time: NaiveTime::from_hms_opt(9, 0, 0),
                expected_completion_date: None,
                extended_date: None,
                extend_reason: None,
                status_before_extension: None,
                assigned_staff_id: None,
                note: None,
                trigger_instant: None,
                created_by: "planner".into(),
                updated_by: "planner".into(),
                created_at: created,
                updated_at: created,
            },
        }
    }

    #[test]
    fn confirm_requires_every_line_counted() {
        let cfg = config();
        let ctx = TransitionContext::new(&cfg, at(5, 10, 0), Ho_Chi_Minh, "supervisor");
        let mut rec = record(RequestKind::StockCheck, RequestStatus::Counted, day(5));
        rec.details[0].actual_quantity = Some(10);
        let before = rec.clone();

        let err = apply(&mut rec, &LifecycleEvent::ConfirmCount, &ctx).unwrap_err();
        assert_matches!(err, ServiceError::InvalidTransition { ref event, .. } if event == "ConfirmCount");
        assert!(err.is_validation());
        assert_eq!(rec, before);
        assert_eq!(rec.request.status, RequestStatus::Counted);

        rec.details[1].actual_quantity = Some(4);
        let outcome = apply(&mut rec, &LifecycleEvent::ConfirmCount, &ctx).unwrap();
        assert_eq!(outcome.to, RequestStatus::CountConfirmed);
        assert_eq!(rec.request.updated_by, "supervisor");
    }

    #[test]
    fn confirm_closes_at_configured_time() {
        let cfg = config();
        let ctx = TransitionContext::new(&cfg, at(5, 16, 30), Ho_Chi_Minh, "supervisor");
        let mut rec = record(RequestKind::Import, RequestStatus::Counted, day(5));
        for line in rec.details.iter_mut() {
            line.actual_quantity = Some(line.expected_quantity);
        }
        assert_matches!(
            apply(&mut rec, &LifecycleEvent::ConfirmCount, &ctx),
            Err(ServiceError::InvalidTransition { .. })
        );
    }

    #[rstest]
    #[case::day_before(at(4, 20, 0), true)]
    #[case::same_day_before_cutoff(at(5, 7, 29), true)]
    #[case::same_day_at_cutoff(at(5, 7, 30), false)]
    #[case::day_after(at(6, 6, 0), false)]
    fn assign_window(#[case] now: DateTime<Utc>, #[case] allowed: bool) {
        let cfg = config();
        let ctx = TransitionContext::new(&cfg, now, Ho_Chi_Minh, "planner");
        let mut rec = record(RequestKind::Import, RequestStatus::NotStarted, day(5));
        let staff_id = Uuid::new_v4();
        let result = apply(&mut rec, &LifecycleEvent::Assign { staff_id }, &ctx);
        assert_eq!(result.is_ok(), allowed);
        assert_eq!(ensure_assignable(&record(RequestKind::Import, RequestStatus::NotStarted, day(5)), &ctx).is_ok(), allowed);
        if allowed {
            assert_eq!(rec.request.status, RequestStatus::InProgress);
            assert_eq!(rec.request.assigned_staff_id, Some(staff_id));
        }
    }

    #[test]
    fn submit_count_derives_line_status() {
        let cfg = config();
        let ctx = TransitionContext::new(&cfg, at(5, 10, 0), Ho_Chi_Minh, "counter");
        let mut rec = record(RequestKind::StockCheck, RequestStatus::InProgress, day(5));
        rec.request.assigned_staff_id = Some(Uuid::new_v4());
        let counts = vec![
            LineCount {
                detail_id: rec.details[0].id,
                actual_quantity: 9,
                actual_measurement: None,
            },
            LineCount {
                detail_id: rec.details[1].id,
                actual_quantity: 5,
                actual_measurement: None,
            },
        ];

        apply(&mut rec, &LifecycleEvent::SubmitCount { counts }, &ctx).unwrap();
        assert_eq!(rec.request.status, RequestStatus::Counted);
        assert_eq!(rec.details[0].status, DetailStatus::Lack);
        assert_eq!(rec.details[1].status, DetailStatus::Excess);

        apply(&mut rec, &LifecycleEvent::RequestRecount, &ctx).unwrap();
        assert_eq!(rec.request.status, RequestStatus::InProgress);
        assert!(rec.details.iter().all(|d| d.actual_quantity.is_none()));
    }

    #[test]
    fn submit_count_rejects_unknown_lines_and_unassigned_requests() {
        let cfg = config();
        let ctx = TransitionContext::new(&cfg, at(5, 10, 0), Ho_Chi_Minh, "counter");
        let mut rec = record(RequestKind::StockCheck, RequestStatus::InProgress, day(5));
        let counts = vec![LineCount {
            detail_id: rec.details[0].id,
            actual_quantity: 10,
            actual_measurement: None,
        }];
        assert!(apply(&mut rec, &LifecycleEvent::SubmitCount { counts: counts.clone() }, &ctx).is_err());

        rec.request.assigned_staff_id = Some(Uuid::new_v4());
        let stray = vec![LineCount {
            detail_id: Uuid::new_v4(),
            actual_quantity: 1,
            actual_measurement: None,
        }];
        assert!(apply(&mut rec, &LifecycleEvent::SubmitCount { counts: stray }, &ctx).is_err());
        assert!(rec.details.iter().all(|d| d.actual_quantity.is_none()));
    }

    #[test]
    fn export_waits_for_export_before_completion() {
        let cfg = config();
        let ctx = TransitionContext::new(&cfg, at(5, 11, 0), Ho_Chi_Minh, "dispatcher");
        let mut rec = record(RequestKind::Export, RequestStatus::CountConfirmed, day(5));
        let complete = LifecycleEvent::Complete {
            actual_minutes: Some(25),
        };
        assert!(apply(&mut rec, &complete, &ctx).is_err());
        apply(&mut rec, &LifecycleEvent::MarkWaitingExport, &ctx).unwrap();
        apply(&mut rec, &complete, &ctx).unwrap();
        assert_eq!(rec.request.status, RequestStatus::Completed);

        let mut import = record(RequestKind::Import, RequestStatus::CountConfirmed, day(5));
        assert!(apply(&mut import, &LifecycleEvent::MarkWaitingExport, &ctx).is_err());
        apply(&mut import, &complete, &ctx).unwrap();
    }

    #[test]
    fn terminal_requests_reject_every_event() {
        let cfg = config();
        let ctx = TransitionContext::new(&cfg, at(5, 9, 0), Ho_Chi_Minh, "planner");
        for status in [RequestStatus::Completed, RequestStatus::Cancelled] {
            let mut rec = record(RequestKind::Import, status, day(6));
            for event in [
                LifecycleEvent::Cancel {
                    reason: "duplicate".into(),
                },
                LifecycleEvent::DeadlineExceeded {
                    at: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
                },
                LifecycleEvent::Resume,
            ] {
                assert_matches!(
                    apply(&mut rec, &event, &ctx),
                    Err(ServiceError::InvalidTransition { .. })
                );
            }
            assert_eq!(rec.request.status, status);
        }
    }

    #[rstest]
    #[case::within_cap(6, true)]
    #[case::at_cap(8, true)]
    #[case::past_cap(9, false)]
    #[case::same_day(5, false)]
    fn extension_is_capped(#[case] new_day: u32, #[case] allowed: bool) {
        let cfg = config();
        let ctx = TransitionContext::new(&cfg, at(5, 9, 0), Ho_Chi_Minh, "planner");
        let mut rec = record(RequestKind::Import, RequestStatus::InProgress, day(5));
        let result = apply(
            &mut rec,
            &LifecycleEvent::Extend {
                reason: "supplier delay".into(),
                new_date: day(new_day),
            },
            &ctx,
        );
        assert_eq!(result.is_ok(), allowed);
    }

    #[rstest]
    #[case::within_original_window(7)]
    #[case::at_original_cap(8)]
    #[case::past_original_cap(9)]
    fn resumed_request_cannot_be_extended_again(#[case] second: u32) {
        let cfg = config();
        let mut rec = record(RequestKind::Import, RequestStatus::NotStarted, day(5));
        let extend = |new_date| LifecycleEvent::Extend {
            reason: "supplier delay".into(),
            new_date,
        };

        let first = TransitionContext::new(&cfg, at(5, 9, 0), Ho_Chi_Minh, "planner");
        apply(&mut rec, &extend(day(6)), &first).unwrap();
        let resumed = TransitionContext::new(&cfg, at(6, 8, 0), Ho_Chi_Minh, "planner");
        apply(&mut rec, &LifecycleEvent::Resume, &resumed).unwrap();
        assert_eq!(rec.request.scheduled_date, day(6));

        let before = rec.clone();
        assert_matches!(
            apply(&mut rec, &extend(day(second)), &resumed),
            Err(ServiceError::InvalidTransition { ref reason, .. }) if reason.contains("already extended")
        );
        assert_eq!(rec, before);
    }

    #[test]
    fn extension_requires_reason_and_resume_restores_status() {
        let cfg = config();
        let ctx = TransitionContext::new(&cfg, at(5, 9, 0), Ho_Chi_Minh, "planner");
        let mut rec = record(RequestKind::Import, RequestStatus::InProgress, day(5));
        assert!(apply(
            &mut rec,
            &LifecycleEvent::Extend {
                reason: "  ".into(),
                new_date: day(7),
            },
            &ctx,
        )
        .is_err());

        apply(
            &mut rec,
            &LifecycleEvent::Extend {
                reason: "truck delayed".into(),
                new_date: day(7),
            },
            &ctx,
        )
        .unwrap();
        assert_eq!(rec.request.status, RequestStatus::Extended);
        assert_eq!(rec.request.status_before_extension, Some(RequestStatus::InProgress));

        assert!(apply(&mut rec, &LifecycleEvent::Resume, &ctx).is_err());

        let later = TransitionContext::new(&cfg, at(7, 8, 0), Ho_Chi_Minh, "planner");
        apply(&mut rec, &LifecycleEvent::Resume, &later).unwrap();
        assert_eq!(rec.request.status, RequestStatus::InProgress);
        assert_eq!(rec.request.scheduled_date, day(7));
        assert_eq!(rec.request.status_before_extension, None);
    }

    #[test]
    fn cancellation_notes_record_cause() {
        let cfg = config();
        let ctx = TransitionContext::new(&cfg, at(5, 9, 0), Ho_Chi_Minh, "planner");

        let mut manual = record(RequestKind::Export, RequestStatus::NotStarted, day(5));
        apply(
            &mut manual,
            &LifecycleEvent::Cancel {
                reason: "customer withdrew".into(),
            },
            &ctx,
        )
        .unwrap();
        assert_eq!(
            manual.request.note.as_deref(),
            Some("cancelled by planner: customer withdrew")
        );

        let mut overdue = record(RequestKind::Import, RequestStatus::Counted, day(5));
        apply(
            &mut overdue,
            &LifecycleEvent::DeadlineExceeded {
                at: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            },
            &ctx,
        )
        .unwrap();
        assert_eq!(
            overdue.request.note.as_deref(),
            Some("auto-cancel: deadline exceeded at 17:00")
        );

        let mut stale = record(RequestKind::StockCheck, RequestStatus::NotStarted, day(5));
        assert!(apply(&mut stale, &LifecycleEvent::ExtensionExpired { days: 3 }, &ctx).is_err());
        stale.request.status = RequestStatus::Extended;
        apply(&mut stale, &LifecycleEvent::ExtensionExpired { days: 3 }, &ctx).unwrap();
        assert_eq!(
            stale.request.note.as_deref(),
            Some("auto-cancel: extension exceeded 3 days")
        );
    }

    #[test]
    fn manual_cancel_closes_at_cancel_threshold() {
        let cfg = config();
        let ctx = TransitionContext::new(&cfg, at(5, 17, 0), Ho_Chi_Minh, "planner");
        let mut rec = record(RequestKind::Import, RequestStatus::InProgress, day(5));
        assert!(apply(
            &mut rec,
            &LifecycleEvent::Cancel {
                reason: "late".into()
            },
            &ctx
        )
        .is_err());
    }

    #[test]
    fn events_deserialize_from_tagged_json() {
        let event: LifecycleEvent = serde_json::from_value(serde_json::json!({
            "event": "extend",
            "reason": "rain",
            "new_date": "2024-02-07"
        }))
        .unwrap();
        assert_eq!(event.name(), "Extend");
        assert!(!event.is_system());

        let event: LifecycleEvent =
            serde_json::from_value(serde_json::json!({ "event": "deadline_exceeded", "at": "17:00:00" }))
                .unwrap();
        assert!(event.is_system());
    }
}
