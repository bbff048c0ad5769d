use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Outcome of comparing a line's counted quantity against the expected one.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DetailStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "MATCH")]
    Match,
    #[sea_orm(string_value = "LACK")]
    Lack,
    #[sea_orm(string_value = "EXCESS")]
    Excess,
}

impl DetailStatus {
    pub fn compare(expected: i32, actual: i32) -> Self {
        match actual.cmp(&expected) {
            std::cmp::Ordering::Equal => DetailStatus::Match,
            std::cmp::Ordering::Less => DetailStatus::Lack,
            std::cmp::Ordering::Greater => DetailStatus::Excess,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "request_details")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub request_id: String,
    pub item_id: String,
    pub expected_quantity: i32,
    pub actual_quantity: Option<i32>,
    pub expected_measurement: Option<Decimal>,
    pub actual_measurement: Option<Decimal>,
    pub status: DetailStatus,
    /// Stock checks: inventory item ids captured when the request was created
    pub inventory_item_ids: Json,
}

impl Model {
    pub fn is_counted(&self) -> bool {
        self.actual_quantity.is_some()
    }

    /// Snapshot ids as strings; malformed JSON yields an empty list.
    pub fn snapshot_ids(&self) -> Vec<String> {
        serde_json::from_value(self.inventory_item_ids.clone()).unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::request::Entity",
        from = "Column::RequestId",
        to = "super::request::Column::Id",
        on_delete = "Cascade"
    )]
    Request,
}

impl Related<super::request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Request.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
