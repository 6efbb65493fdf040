use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A baby registered with the care service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baby {
    pub id: Uuid,
    pub last_name: String,
    pub room_number: String,
    /// Parent who owns the record
    pub parent_user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Baby {
    pub fn new(last_name: impl Into<String>, room_number: impl Into<String>, parent_user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            last_name: last_name.into(),
            room_number: room_number.into(),
            parent_user_id,
            created_at: Utc::now(),
        }
    }
}
