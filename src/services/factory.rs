use chrono_tz::Tz;
use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    repositories::{
        ConfigurationStore, InventoryCollaborator, SeaOrmConfigurationStore, SeaOrmInventory,
        SeaOrmStaffDirectory, StaffDirectory,
    },
    services::{
        expiration::ExpirationScheduler, lifecycle::LifecycleService,
        recurrence::RecurringTaskScheduler, requests::RequestService,
        sequence::SequentialIdAllocator, staff_assignment::StaffAssignmentEngine,
    },
};

/// Collaborators the services are built from. Swap any of them to test a
/// service against a fake.
pub struct ServiceFactory {
    db_pool: Arc<DbPool>,
    event_sender: Option<EventSender>,
    tz: Tz,
    lock_timeout: std::time::Duration,
    lock_retries: u32,
    config_store: Arc<dyn ConfigurationStore>,
    staff_directory: Arc<dyn StaffDirectory>,
    inventory: Arc<dyn InventoryCollaborator>,
}

impl ServiceFactory {
    /// Creates a factory backed by the sea-orm collaborators.
    pub fn new(db_pool: Arc<DbPool>, config: &AppConfig, event_sender: Option<EventSender>) -> Self {
        Self {
            config_store: Arc::new(SeaOrmConfigurationStore::new(db_pool.clone())),
            staff_directory: Arc::new(SeaOrmStaffDirectory::new()),
            inventory: Arc::new(SeaOrmInventory::new()),
            db_pool,
            event_sender,
            tz: config.timezone(),
            lock_timeout: config.id_lock_timeout(),
            lock_retries: config.id_lock_max_retries,
        }
    }

    pub fn with_config_store(mut self, store: Arc<dyn ConfigurationStore>) -> Self {
        self.config_store = store;
        self
    }

    pub fn with_staff_directory(mut self, directory: Arc<dyn StaffDirectory>) -> Self {
        self.staff_directory = directory;
        self
    }

    pub fn with_inventory(mut self, inventory: Arc<dyn InventoryCollaborator>) -> Self {
        self.inventory = inventory;
        self
    }

    /// Wires every service once, sharing the allocator and engines.
    pub fn build(self) -> ServiceContainer {
        let allocator = Arc::new(SequentialIdAllocator::new(
            self.db_pool.clone(),
            self.lock_timeout,
            self.lock_retries,
        ));
        let staff = Arc::new(StaffAssignmentEngine::new(self.staff_directory.clone()));
        let lifecycle = Arc::new(LifecycleService::new(
            self.db_pool.clone(),
            self.config_store.clone(),
            staff.clone(),
            self.inventory.clone(),
            self.event_sender.clone(),
            self.tz,
        ));
        let requests = Arc::new(RequestService::new(
            self.config_store.clone(),
            allocator.clone(),
            self.inventory.clone(),
            lifecycle.clone(),
            self.event_sender.clone(),
            self.tz,
        ));
        let expiration = Arc::new(ExpirationScheduler::new(
            self.db_pool.clone(),
            self.config_store.clone(),
            self.inventory.clone(),
            staff.clone(),
            self.event_sender.clone(),
            self.tz,
        ));
        let recurrence = Arc::new(RecurringTaskScheduler::new(
            self.config_store.clone(),
            requests.clone(),
            self.tz,
        ));

        ServiceContainer {
            config_store: self.config_store,
            allocator,
            staff,
            lifecycle,
            requests,
            expiration,
            recurrence,
        }
    }
}

/// Service container holding all service instances
#[derive(Clone)]
pub struct ServiceContainer {
    pub config_store: Arc<dyn ConfigurationStore>,
    pub allocator: Arc<SequentialIdAllocator>,
    pub staff: Arc<StaffAssignmentEngine>,
    pub lifecycle: Arc<LifecycleService>,
    pub requests: Arc<RequestService>,
    pub expiration: Arc<ExpirationScheduler>,
    pub recurrence: Arc<RecurringTaskScheduler>,
}
