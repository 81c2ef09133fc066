// ============================================================================
// Bikemart Consistency Engine
// ============================================================================

pub mod api;
pub mod config;
pub mod consistency;
pub mod core;
pub mod model;
pub mod prelude;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use api::{AdminService, ApiError, ErrorCode, FixRequest};
pub use config::EngineConfig;
pub use core::{Actor, Result, StoreError};
pub use storage::{InMemoryDocumentStore, StoreSnapshot};
pub use transaction::{DocumentStore, RetryPolicy, TxSession, UnitOfWork};
