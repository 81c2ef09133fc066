use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Document '{id}' not found in collection '{collection}'")]
    DocumentNotFound { collection: String, id: String },

    #[error("Duplicate key '{id}' in collection '{collection}'")]
    DuplicateKey { collection: String, id: String },

    #[error("Write-write conflict detected on {collection}/{id}")]
    WriteConflict { collection: String, id: String },

    #[error("Transient storage error: {0}")]
    Transient(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transaction {0} is no longer active")]
    TransactionClosed(u64),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl StoreError {
    /// Errors that a fresh attempt of the same transaction may not hit again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::WriteConflict { .. } | Self::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}
