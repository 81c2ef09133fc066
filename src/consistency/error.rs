use crate::core::StoreError;
use crate::transaction::RetryableError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConsistencyError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("Transaction failed after {attempts} attempt(s): {source}")]
    TransactionFailed { attempts: usize, source: StoreError },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ConsistencyError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl RetryableError for ConsistencyError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_transient())
    }

    fn exhausted(self, attempts: usize) -> Self {
        match self {
            Self::Store(source) => Self::TransactionFailed { attempts, source },
            other => other,
        }
    }
}

pub type ConsistencyResult<T> = std::result::Result<T, ConsistencyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_store_conflicts_are_transient() {
        let conflict = ConsistencyError::from(StoreError::WriteConflict {
            collection: "bikes".to_string(),
            id: "b1".to_string(),
        });
        assert!(conflict.is_transient());
        assert!(!ConsistencyError::invalid_state("bike is sold").is_transient());
        assert!(!ConsistencyError::from(StoreError::Serialization("x".into())).is_transient());
    }

    #[test]
    fn test_exhausted_wraps_store_error_into_transaction_failure() {
        let err = ConsistencyError::from(StoreError::Transient("busy".to_string())).exhausted(3);
        assert!(matches!(
            err,
            ConsistencyError::TransactionFailed { attempts: 3, .. }
        ));

        let untouched = ConsistencyError::validation("bad").exhausted(3);
        assert_eq!(untouched, ConsistencyError::Validation("bad".to_string()));
    }
}
