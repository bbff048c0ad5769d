pub mod configuration_store;
pub mod inventory;
pub mod request_repository;
pub mod staff_directory;

pub use configuration_store::{ConfigurationStore, SeaOrmConfigurationStore};
pub use inventory::{InventoryCollaborator, SeaOrmInventory};
pub use request_repository::{RequestRepository, RequestWithDetails};
pub use staff_directory::{NewAssignment, SeaOrmStaffDirectory, StaffDirectory};
