use thiserror::Error;

use crate::models::room::RoomId;
use crate::store::{DocumentPath, StoreError};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("malformed document `{path}`: {source}")]
    Decode {
        path: DocumentPath,
        source: serde_json::Error,
    },
    #[error("room `{room_id}` partially deleted, {deleted_messages} message(s) already removed: {source}")]
    PartialDelete {
        room_id: RoomId,
        deleted_messages: usize,
        source: StoreError,
    },
}

#[derive(Clone, Debug, Error)]
pub enum ValidationError {
    #[error("input value is invalid: `{value}`, reason: {reason}")]
    InvalidInput { value: String, reason: String },
    #[error("limit exceeded for {subject}, allowed {limit} {unit}(s), got {attempted}")]
    LimitExceeded {
        subject: String,
        unit: String,
        attempted: usize,
        limit: usize,
    },
}

impl DirectoryError {
    pub fn decode(path: &DocumentPath, source: serde_json::Error) -> Self {
        Self::Decode {
            path: path.clone(),
            source,
        }
    }
}

pub fn require_non_empty(value: &str, what: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::InvalidInput {
            value: value.to_string(),
            reason: format!("{what} cannot be empty"),
        });
    }
    Ok(())
}
