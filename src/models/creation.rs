use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

/// Creation request as sent by the identity service:
/// `{ "user_id": "<uuid>", "last_name": "...", "room_number": "..." }`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CreationRequest {
    /// Parent user ID, UUID as a string
    #[validate(length(min = 1, message = "user_id is required"))]
    pub user_id: String,

    #[validate(length(min = 1, message = "last_name is required"))]
    pub last_name: String,

    #[validate(length(min = 1, message = "room_number is required"))]
    pub room_number: String,
}

/// A creation request that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCreationRequest {
    pub parent_id: Uuid,
    pub last_name: String,
    pub room_number: String,
}

/// Why a creation request can never be processed
#[derive(Debug, Error)]
pub enum InvalidCreationRequest {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid fields: {0}")]
    InvalidFields(#[from] validator::ValidationErrors),

    #[error("user_id is not a valid UUID: {0}")]
    InvalidParentId(#[from] uuid::Error),
}

impl CreationRequest {
    /// Decode and validate a message body
    pub fn parse(body: &[u8]) -> Result<ValidatedCreationRequest, InvalidCreationRequest> {
        let request: CreationRequest = serde_json::from_slice(body)?;
        request.into_validated()
    }

    pub fn into_validated(self) -> Result<ValidatedCreationRequest, InvalidCreationRequest> {
        self.validate()?;
        let parent_id = Uuid::parse_str(&self.user_id)?;
        Ok(ValidatedCreationRequest {
            parent_id,
            last_name: self.last_name,
            room_number: self.room_number,
        })
    }
}
