use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::entities::inventory_item::{self, Entity as InventoryItem, InventoryItemStatus};
use crate::errors::ServiceError;

/// Boundary to the inventory subsystem: holds placed by export lines and
/// availability snapshots taken by stock checks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InventoryCollaborator: Send + Sync {
    /// Frees every inventory item held by one of `detail_ids`. Returns the number released.
    async fn release_holds_by_detail_ids(
        &self,
        txn: &DatabaseTransaction,
        detail_ids: Vec<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError>;

    /// Marks up to `quantity` available units of `item_id` as held by `detail_id`.
    /// Returns the ids actually held.
    async fn hold_available(
        &self,
        txn: &DatabaseTransaction,
        detail_id: Uuid,
        item_id: String,
        quantity: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, ServiceError>;

    /// Ids of the available units of `item_id`.
    async fn available_unit_ids(
        &self,
        txn: &DatabaseTransaction,
        item_id: String,
    ) -> Result<Vec<String>, ServiceError>;

    /// Available unit ids grouped by item, for every item with stock on hand.
    async fn available_by_item(
        &self,
        txn: &DatabaseTransaction,
    ) -> Result<BTreeMap<String, Vec<String>>, ServiceError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SeaOrmInventory;

impl SeaOrmInventory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl InventoryCollaborator for SeaOrmInventory {
    async fn release_holds_by_detail_ids(
        &self,
        txn: &DatabaseTransaction,
        detail_ids: Vec<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        if detail_ids.is_empty() {
            return Ok(0);
        }

        let result = InventoryItem::update_many()
            .col_expr(
                inventory_item::Column::Status,
                Expr::value(InventoryItemStatus::Available),
            )
            .col_expr(
                inventory_item::Column::HeldByDetailId,
                Expr::value(Option::<Uuid>::None),
            )
            .col_expr(inventory_item::Column::UpdatedAt, Expr::value(now))
            .filter(inventory_item::Column::HeldByDetailId.is_in(detail_ids))
            .exec(txn)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(result.rows_affected)
    }

    async fn hold_available(
        &self,
        txn: &DatabaseTransaction,
        detail_id: Uuid,
        item_id: String,
        quantity: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, ServiceError> {
        let units: Vec<String> = InventoryItem::find()
            .select_only()
            .column(inventory_item::Column::Id)
            .filter(inventory_item::Column::ItemId.eq(item_id))
            .filter(inventory_item::Column::Status.eq(InventoryItemStatus::Available))
            .order_by_asc(inventory_item::Column::Id)
            .limit(quantity)
            .into_tuple()
            .all(txn)
            .await
            .map_err(ServiceError::db_error)?;

        if units.is_empty() {
            return Ok(units);
        }

        InventoryItem::update_many()
            .col_expr(
                inventory_item::Column::Status,
                Expr::value(InventoryItemStatus::Unavailable),
            )
            .col_expr(
                inventory_item::Column::HeldByDetailId,
                Expr::value(Some(detail_id)),
            )
            .col_expr(inventory_item::Column::UpdatedAt, Expr::value(now))
            .filter(inventory_item::Column::Id.is_in(units.clone()))
            .exec(txn)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(units)
    }

    async fn available_unit_ids(
        &self,
        txn: &DatabaseTransaction,
        item_id: String,
    ) -> Result<Vec<String>, ServiceError> {
        InventoryItem::find()
            .select_only()
            .column(inventory_item::Column::Id)
            .filter(inventory_item::Column::ItemId.eq(item_id))
            .filter(inventory_item::Column::Status.eq(InventoryItemStatus::Available))
            .order_by_asc(inventory_item::Column::Id)
            .into_tuple()
            .all(txn)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn available_by_item(
        &self,
        txn: &DatabaseTransaction,
    ) -> Result<BTreeMap<String, Vec<String>>, ServiceError> {
        let rows: Vec<(String, String)> = InventoryItem::find()
            .select_only()
            .column(inventory_item::Column::ItemId)
            .column(inventory_item::Column::Id)
            .filter(inventory_item::Column::Status.eq(InventoryItemStatus::Available))
            .order_by_asc(inventory_item::Column::ItemId)
            .order_by_asc(inventory_item::Column::Id)
            .into_tuple()
            .all(txn)
            .await
            .map_err(ServiceError::db_error)?;

        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (item_id, unit_id) in rows {
            grouped.entry(item_id).or_default().push(unit_id);
        }
        Ok(grouped)
    }
}
