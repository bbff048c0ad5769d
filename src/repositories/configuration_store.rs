use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait};
use std::sync::Arc;
use tracing::info;

use crate::entities::warehouse_configuration::{self, Entity as WarehouseConfiguration};
use crate::errors::ServiceError;

/// Access to the single tenant-wide configuration row.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// The current configuration. Fails with `ConfigurationMissing` when no row exists.
    async fn current(&self) -> Result<warehouse_configuration::Model, ServiceError>;

    /// Seeds the default row if the table is empty and returns the stored row.
    async fn ensure_default(&self) -> Result<warehouse_configuration::Model, ServiceError>;

    async fn save(
        &self,
        config: warehouse_configuration::Model,
    ) -> Result<warehouse_configuration::Model, ServiceError>;
}

#[derive(Debug, Clone)]
pub struct SeaOrmConfigurationStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmConfigurationStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConfigurationStore for SeaOrmConfigurationStore {
    async fn current(&self) -> Result<warehouse_configuration::Model, ServiceError> {
        WarehouseConfiguration::find_by_id(warehouse_configuration::SINGLETON_ID)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or(ServiceError::ConfigurationMissing)
    }

    async fn ensure_default(&self) -> Result<warehouse_configuration::Model, ServiceError> {
        match self.current().await {
            Ok(existing) => Ok(existing),
            Err(ServiceError::ConfigurationMissing) => {
                let defaults = warehouse_configuration::Model::with_defaults(Utc::now());
                let active: warehouse_configuration::ActiveModel = defaults.into();
                let stored = active
                    .reset_all()
                    .insert(&*self.db)
                    .await
                    .map_err(ServiceError::db_error)?;
                info!("Seeded default warehouse configuration");
                Ok(stored)
            }
            Err(e) => Err(e),
        }
    }

    async fn save(
        &self,
        mut config: warehouse_configuration::Model,
    ) -> Result<warehouse_configuration::Model, ServiceError> {
        config.id = warehouse_configuration::SINGLETON_ID;
        config.updated_at = Utc::now();
        let exists = WarehouseConfiguration::find_by_id(config.id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .is_some();

        let active: warehouse_configuration::ActiveModel = config.into();
        let active = active.reset_all();
        let stored = if exists {
            active.update(&*self.db).await
        } else {
            active.insert(&*self.db).await
        }
        .map_err(ServiceError::db_error)?;
        Ok(stored)
    }
}
