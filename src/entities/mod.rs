pub mod inventory_item;
pub mod request;
pub mod request_detail;
pub mod request_sequence;
pub mod staff;
pub mod staff_performance;
pub mod sweep_marker;
pub mod warehouse_configuration;

pub use request::{RequestKind, RequestStatus};
