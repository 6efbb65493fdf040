//! Domain-service boundaries used by the messaging core

pub mod alerts;
pub mod creation;

pub use alerts::AlertDispatcher;
pub use creation::{BabyCreationService, InMemoryBabyRegistry, ServiceError};
