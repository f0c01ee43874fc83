use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorCode {
    Unavailable,
    Unauthorized,
    NotFound,
    Rejected,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct StoreError {
    pub code: StoreErrorCode,
    pub message: String,
}

impl StoreError {
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::Internal, message)
    }

    /// Connection and auth failures mean the store cannot be reached at all,
    /// as opposed to a single document write being refused.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self.code,
            StoreErrorCode::Unavailable | StoreErrorCode::Unauthorized
        )
    }
}
