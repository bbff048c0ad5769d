use anyhow::Result;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use std::time::Duration;
use tracing::{error, info};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_warehouse_configuration_table::Migration),
            Box::new(m20240101_000002_create_staff_tables::Migration),
            Box::new(m20240101_000003_create_requests_tables::Migration),
            Box::new(m20240101_000004_create_inventory_items_table::Migration),
            Box::new(m20240101_000005_create_scheduling_tables::Migration),
        ]
    }
}

mod m20240101_000001_create_warehouse_configuration_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_warehouse_configuration_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(WarehouseConfiguration::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(WarehouseConfiguration::Id)
                                .integer()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(WarehouseConfiguration::WorkingTimeStart)
                                .time()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WarehouseConfiguration::WorkingTimeEnd)
                                .time()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WarehouseConfiguration::CreateRequestLeadMinutes)
                                .integer()
                                .not_null()
                                .default(30),
                        )
                        .col(
                            ColumnDef::new(WarehouseConfiguration::TimeToAllowAssign)
                                .time()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WarehouseConfiguration::TimeToAllowConfirm)
                                .time()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WarehouseConfiguration::TimeToAllowCancel)
                                .time()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WarehouseConfiguration::DaysToAllowExtend)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WarehouseConfiguration::MaxAllowedDaysForExtend)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WarehouseConfiguration::RecurringStockCheckMonths)
                                .integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(WarehouseConfiguration::CountingMinutesPerItem)
                                .integer()
                                .not_null()
                                .default(2),
                        )
                        .col(
                            ColumnDef::new(WarehouseConfiguration::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(
                    Table::drop()
                        .table(WarehouseConfiguration::Table)
                        .to_owned(),
                )
                .await
        }
    }

    #[derive(DeriveIden)]
    enum WarehouseConfiguration {
        Table,
        Id,
        WorkingTimeStart,
        WorkingTimeEnd,
        CreateRequestLeadMinutes,
        TimeToAllowAssign,
        TimeToAllowConfirm,
        TimeToAllowCancel,
        DaysToAllowExtend,
        MaxAllowedDaysForExtend,
        RecurringStockCheckMonths,
        CountingMinutesPerItem,
        UpdatedAt,
    }
}

mod m20240101_000002_create_staff_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_staff_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Staff::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Staff::Id).uuid().not_null().primary_key())
                        .col(
                            ColumnDef::new(Staff::Username)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Staff::FullName).string().not_null())
                        .col(ColumnDef::new(Staff::Status).string().not_null())
                        .col(
                            ColumnDef::new(Staff::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(StaffPerformances::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StaffPerformances::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(StaffPerformances::StaffId).uuid().not_null())
                        .col(
                            ColumnDef::new(StaffPerformances::RequestId)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StaffPerformances::Date).date().not_null())
                        .col(
                            ColumnDef::new(StaffPerformances::ExpectedWorkingMinutes)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StaffPerformances::ActualWorkingMinutes)
                                .integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(StaffPerformances::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_staff_performances_staff")
                                .from(StaffPerformances::Table, StaffPerformances::StaffId)
                                .to(Staff::Table, Staff::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_staff_performances_date")
                        .table(StaffPerformances::Table)
                        .col(StaffPerformances::Date)
                        .col(StaffPerformances::StaffId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_staff_performances_request_id")
                        .table(StaffPerformances::Table)
                        .col(StaffPerformances::RequestId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StaffPerformances::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Staff::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Staff {
        Table,
        Id,
        Username,
        FullName,
        Status,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum StaffPerformances {
        Table,
        Id,
        StaffId,
        RequestId,
        Date,
        ExpectedWorkingMinutes,
        ActualWorkingMinutes,
        CreatedAt,
    }
}

mod m20240101_000003_create_requests_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_requests_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Requests::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Requests::Id)
                                .string()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Requests::Kind).string().not_null())
                        .col(ColumnDef::new(Requests::Status).string().not_null())
                        .col(ColumnDef::new(Requests::RequestType).string().not_null())
                        .col(ColumnDef::new(Requests::ScheduledDate).date().not_null())
                        .col(ColumnDef::new(Requests::ScheduledTime).time().null())
                        .col(
                            ColumnDef::new(Requests::ExpectedCompletionDate)
                                .date()
                                .null(),
                        )
                        .col(ColumnDef::new(Requests::ExtendedDate).date().null())
                        .col(ColumnDef::new(Requests::ExtendReason).string().null())
                        .col(
                            ColumnDef::new(Requests::StatusBeforeExtension)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(Requests::AssignedStaffId).uuid().null())
                        .col(ColumnDef::new(Requests::Note).text().null())
                        .col(
                            ColumnDef::new(Requests::TriggerInstant)
                                .timestamp_with_time_zone()
                                .null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Requests::CreatedBy).string().not_null())
                        .col(ColumnDef::new(Requests::UpdatedBy).string().not_null())
                        .col(
                            ColumnDef::new(Requests::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Requests::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Sweeps filter by kind, day and status
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_requests_kind_date_status")
                        .table(Requests::Table)
                        .col(Requests::Kind)
                        .col(Requests::ScheduledDate)
                        .col(Requests::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_requests_kind_status_extended_date")
                        .table(Requests::Table)
                        .col(Requests::Kind)
                        .col(Requests::Status)
                        .col(Requests::ExtendedDate)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(RequestDetails::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RequestDetails::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(RequestDetails::RequestId)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RequestDetails::ItemId).string().not_null())
                        .col(
                            ColumnDef::new(RequestDetails::ExpectedQuantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RequestDetails::ActualQuantity)
                                .integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RequestDetails::ExpectedMeasurement)
                                .decimal_len(16, 4)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RequestDetails::ActualMeasurement)
                                .decimal_len(16, 4)
                                .null(),
                        )
                        .col(ColumnDef::new(RequestDetails::Status).string().not_null())
                        .col(
                            ColumnDef::new(RequestDetails::InventoryItemIds)
                                .json()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_request_details_request")
                                .from(RequestDetails::Table, RequestDetails::RequestId)
                                .to(Requests::Table, Requests::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_request_details_request_id")
                        .table(RequestDetails::Table)
                        .col(RequestDetails::RequestId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(RequestDetails::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Requests::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Requests {
        Table,
        Id,
        Kind,
        Status,
        RequestType,
        ScheduledDate,
        ScheduledTime,
        ExpectedCompletionDate,
        ExtendedDate,
        ExtendReason,
        StatusBeforeExtension,
        AssignedStaffId,
        Note,
        TriggerInstant,
        CreatedBy,
        UpdatedBy,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum RequestDetails {
        Table,
        Id,
        RequestId,
        ItemId,
        ExpectedQuantity,
        ActualQuantity,
        ExpectedMeasurement,
        ActualMeasurement,
        Status,
        InventoryItemIds,
    }
}

mod m20240101_000004_create_inventory_items_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_inventory_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryItems::Id)
                                .string()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(InventoryItems::ItemId).string().not_null())
                        .col(ColumnDef::new(InventoryItems::Status).string().not_null())
                        .col(ColumnDef::new(InventoryItems::HeldByDetailId).uuid().null())
                        .col(
                            ColumnDef::new(InventoryItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_items_item_status")
                        .table(InventoryItems::Table)
                        .col(InventoryItems::ItemId)
                        .col(InventoryItems::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_items_held_by")
                        .table(InventoryItems::Table)
                        .col(InventoryItems::HeldByDetailId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryItems {
        Table,
        Id,
        ItemId,
        Status,
        HeldByDetailId,
        UpdatedAt,
    }
}

mod m20240101_000005_create_scheduling_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000005_create_scheduling_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(RequestSequences::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RequestSequences::Prefix)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RequestSequences::Day).date().not_null())
                        .col(
                            ColumnDef::new(RequestSequences::LastValue)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(RequestSequences::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .primary_key(
                            Index::create()
                                .col(RequestSequences::Prefix)
                                .col(RequestSequences::Day),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(SweepMarkers::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SweepMarkers::JobKey)
                                .string()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(SweepMarkers::LastRunDay).date().not_null())
                        .col(
                            ColumnDef::new(SweepMarkers::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SweepMarkers::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(RequestSequences::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum RequestSequences {
        Table,
        Prefix,
        Day,
        LastValue,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum SweepMarkers {
        Table,
        JobKey,
        LastRunDay,
        UpdatedAt,
    }
}

/// Connects to `db_url` and applies every pending migration.
pub async fn run_migration(db_url: &str) -> Result<()> {
    info!("Setting up database connection for migrations");

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(4)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;

    info!("Running database migrations");

    match Migrator::up(&db, None).await {
        Ok(_) => {
            info!("Migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e.into())
        }
    }
}
