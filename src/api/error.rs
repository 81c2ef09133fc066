use crate::consistency::ConsistencyError;
use crate::core::StoreError;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, externally visible error vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    InvalidState,
    ValidationError,
    DuplicateEntry,
    ConsistencyViolation,
    TransactionError,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::InvalidState => "INVALID_STATE",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::DuplicateEntry => "DUPLICATE_ENTRY",
            Self::ConsistencyViolation => "CONSISTENCY_VIOLATION",
            Self::TransactionError => "TRANSACTION_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// HTTP status an outer layer should answer with.
    pub const fn http_status(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::InvalidState | Self::DuplicateEntry | Self::TransactionError => 409,
            Self::ValidationError => 400,
            Self::ConsistencyViolation | Self::InternalError => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured `{code, message}` error handed to collaborators.
///
/// Storage-layer text never reaches `message`; it is logged at translation
/// time instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::DocumentNotFound { collection, id } => {
                Self::new(ErrorCode::NotFound, format!("{collection} '{id}' not found"))
            }
            StoreError::DuplicateKey { collection, id } => Self::new(
                ErrorCode::DuplicateEntry,
                format!("{collection} '{id}' already exists"),
            ),
            StoreError::WriteConflict { .. } | StoreError::Transient(_) => {
                warn!("Transaction aborted by storage: {}", err);
                Self::new(
                    ErrorCode::TransactionError,
                    "transaction conflicted with a concurrent update",
                )
            }
            StoreError::TransactionClosed(_) => {
                warn!("Transaction misuse: {}", err);
                Self::new(ErrorCode::TransactionError, "transaction is no longer active")
            }
            StoreError::Serialization(_) | StoreError::IoError(_) => {
                warn!("Internal storage failure: {}", err);
                Self::new(ErrorCode::InternalError, "internal storage error")
            }
        }
    }
}

impl From<ConsistencyError> for ApiError {
    fn from(err: ConsistencyError) -> Self {
        match err {
            ConsistencyError::NotFound { entity, id } => {
                Self::new(ErrorCode::NotFound, format!("{entity} '{id}' not found"))
            }
            ConsistencyError::InvalidState(message) => Self::new(ErrorCode::InvalidState, message),
            ConsistencyError::Validation(message) => Self::new(ErrorCode::ValidationError, message),
            ConsistencyError::DuplicateEntry(message) => {
                Self::new(ErrorCode::DuplicateEntry, message)
            }
            ConsistencyError::ConsistencyViolation(message) => {
                Self::new(ErrorCode::ConsistencyViolation, message)
            }
            ConsistencyError::TransactionFailed { attempts, source } => {
                warn!(
                    "Transaction gave up after {} attempt(s): {}",
                    attempts, source
                );
                Self::new(
                    ErrorCode::TransactionError,
                    format!("transaction could not commit after {attempts} attempt(s)"),
                )
            }
            ConsistencyError::Store(store) => Self::from(store),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_key_maps_to_duplicate_entry_without_storage_text() {
        let api = ApiError::from(StoreError::DuplicateKey {
            collection: "reviews".to_string(),
            id: "r1".to_string(),
        });
        assert_eq!(api.code, ErrorCode::DuplicateEntry);
        assert!(!api.message.contains("Duplicate key"));
    }

    #[test]
    fn test_exhausted_retries_map_to_transaction_error() {
        let api = ApiError::from(ConsistencyError::TransactionFailed {
            attempts: 3,
            source: StoreError::WriteConflict {
                collection: "bikes".to_string(),
                id: "b1".to_string(),
            },
        });
        assert_eq!(api.code, ErrorCode::TransactionError);
        assert!(api.message.contains("3 attempt"));
        assert!(!api.message.contains("bikes/b1"));
    }

    #[test]
    fn test_codes_serialize_screaming_snake_case() {
        let api = ApiError::new(ErrorCode::InvalidState, "bike is sold");
        let value = serde_json::to_value(&api).expect("serialize");
        assert_eq!(value["code"], "INVALID_STATE");
        assert_eq!(ErrorCode::NotFound.http_status(), 404);
    }
}
