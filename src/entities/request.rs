use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// The three kinds of warehouse request sharing one lifecycle.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestKind {
    #[sea_orm(string_value = "IMPORT")]
    Import,
    #[sea_orm(string_value = "EXPORT")]
    Export,
    #[sea_orm(string_value = "STOCK_CHECK")]
    StockCheck,
}

impl RequestKind {
    pub const ALL: [RequestKind; 3] = [
        RequestKind::Import,
        RequestKind::Export,
        RequestKind::StockCheck,
    ];

    /// Identifier prefix used by the sequential id allocator.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            RequestKind::Import => "PN",
            RequestKind::Export => "PX",
            RequestKind::StockCheck => "PK",
        }
    }

    /// Parses the kind from a URL segment or CLI argument (`import`, `export`, `stock-check`).
    pub fn from_slug(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "import" => Some(RequestKind::Import),
            "export" => Some(RequestKind::Export),
            "stock-check" | "stockcheck" => Some(RequestKind::StockCheck),
            _ => None,
        }
    }

    pub fn slug(&self) -> &'static str {
        match self {
            RequestKind::Import => "import",
            RequestKind::Export => "export",
            RequestKind::StockCheck => "stock-check",
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    #[sea_orm(string_value = "NOT_STARTED")]
    NotStarted,
    #[sea_orm(string_value = "IN_PROGRESS")]
    InProgress,
    #[sea_orm(string_value = "COUNTED")]
    Counted,
    #[sea_orm(string_value = "COUNT_CONFIRMED")]
    CountConfirmed,
    #[sea_orm(string_value = "WAITING_EXPORT")]
    WaitingExport,
    #[sea_orm(string_value = "EXTENDED")]
    Extended,
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }

    /// Statuses the deadline sweep cancels once the cancel threshold passes.
    pub const AWAITING_CONFIRMATION: [RequestStatus; 3] = [
        RequestStatus::NotStarted,
        RequestStatus::InProgress,
        RequestStatus::Counted,
    ];
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub kind: RequestKind,
    pub status: RequestStatus,
    /// Free-text reason or type (ORDER, RETURN, SELLING, PERIODIC, ...)
    pub request_type: String,
    /// Receipt, export or counting day
    pub scheduled_date: NaiveDate,
    pub scheduled_time: Option<NaiveTime>,
    pub expected_completion_date: Option<NaiveDate>,
    pub extended_date: Option<NaiveDate>,
    pub extend_reason: Option<String>,
    pub status_before_extension: Option<RequestStatus>,
    pub assigned_staff_id: Option<Uuid>,
    /// Set by cancellations, manual or automatic
    pub note: Option<String>,
    /// Instant of the recurrence that created this stock check, if any
    #[sea_orm(unique)]
    pub trigger_instant: Option<DateTime<Utc>>,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::request_detail::Entity")]
    Details,
}

impl Related<super::request_detail::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Details.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_slugs_round_trip_and_prefixes_are_distinct() {
        for kind in RequestKind::ALL {
            assert_eq!(RequestKind::from_slug(kind.slug()), Some(kind));
        }
        assert_eq!(RequestKind::from_slug("STOCK_CHECK"), Some(RequestKind::StockCheck));
        assert_eq!(RequestKind::from_slug("transfer"), None);
        assert_eq!(RequestKind::StockCheck.id_prefix(), "PK");
    }

    #[test]
    fn only_completed_and_cancelled_are_terminal() {
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
        assert!(!RequestStatus::Extended.is_terminal());
        assert_eq!(RequestStatus::CountConfirmed.to_string(), "COUNT_CONFIRMED");
    }
}
