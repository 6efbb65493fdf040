//! Baby creation boundary consumed by the creation-request consumer

use crate::models::Baby;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

/// Failures reported by the creation service
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl ServiceError {
    /// Whether the same request may succeed later.
    /// Validation failures never will; anything else is worth a redelivery.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ServiceError::Validation(_))
    }
}

/// Creates baby records on behalf of a parent
#[async_trait]
pub trait BabyCreationService: Send + Sync {
    /// Create a baby owned by `parent_id`. `acting_as_system` bypasses the
    /// ownership check for requests from trusted upstream services.
    async fn create_baby(
        &self,
        last_name: &str,
        room_number: &str,
        parent_id: Uuid,
        acting_as_system: bool,
    ) -> Result<Baby, ServiceError>;
}

/// Process-local creation service used when no persistence layer is wired in
#[derive(Debug, Default)]
pub struct InMemoryBabyRegistry {
    babies: RwLock<HashMap<Uuid, Baby>>,
    parents: RwLock<HashSet<Uuid>>,
}

impl InMemoryBabyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `parent_id` to create babies without system privileges
    pub fn register_parent(&self, parent_id: Uuid) {
        self.parents.write().insert(parent_id);
    }

    pub fn babies(&self) -> Vec<Baby> {
        self.babies.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.babies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.babies.read().is_empty()
    }
}

#[async_trait]
impl BabyCreationService for InMemoryBabyRegistry {
    async fn create_baby(
        &self,
        last_name: &str,
        room_number: &str,
        parent_id: Uuid,
        acting_as_system: bool,
    ) -> Result<Baby, ServiceError> {
        if last_name.trim().is_empty() {
            return Err(ServiceError::Validation("last_name is required".to_string()));
        }
        if room_number.trim().is_empty() {
            return Err(ServiceError::Validation("room_number is required".to_string()));
        }
        if !acting_as_system && !self.parents.read().contains(&parent_id) {
            return Err(ServiceError::Forbidden(format!(
                "user {} may not create babies",
                parent_id
            )));
        }

        let baby = Baby::new(last_name, room_number, parent_id);
        self.babies.write().insert(baby.id, baby.clone());
        debug!(baby_id = %baby.id, parent_id = %parent_id, "Baby stored");
        Ok(baby)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(!ServiceError::Validation("x".into()).is_retryable());
        assert!(ServiceError::Unavailable("db down".into()).is_retryable());
        assert!(ServiceError::Forbidden("no".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_system_caller_bypasses_ownership() {
        let registry = InMemoryBabyRegistry::new();
        let parent = Uuid::new_v4();

        let denied = registry.create_baby("Smith", "101", parent, false).await;
        assert!(matches!(denied, Err(ServiceError::Forbidden(_))));

        let baby = registry.create_baby("Smith", "101", parent, true).await.unwrap();
        assert_eq!(baby.parent_user_id, parent);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_registered_parent_may_create() {
        let registry = InMemoryBabyRegistry::new();
        let parent = Uuid::new_v4();
        registry.register_parent(parent);

        assert!(registry.create_baby("Jones", "7", parent, false).await.is_ok());
        assert!(matches!(
            registry.create_baby(" ", "7", parent, false).await,
            Err(ServiceError::Validation(_))
        ));
    }
}
