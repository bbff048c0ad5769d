// Request lifecycle
pub mod lifecycle;
pub mod requests;
pub mod sequence;
pub mod staff_assignment;

// Scheduled jobs
pub mod expiration;
pub mod recurrence;

// Service factory for dependency injection
pub mod factory;

pub use factory::{ServiceContainer, ServiceFactory};
