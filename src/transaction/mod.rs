// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Snapshot-isolated transactions over a document store, the `TxSession` seam
// composite operations are written against, and the retrying Unit-of-Work
// that wraps every business operation.
//
// ============================================================================

pub mod manager;
pub mod policy;
pub mod recording;
pub mod session;
pub mod state;
pub mod unit_of_work;

pub use manager::{TransactionManager, TransactionStats};
pub use policy::RetryPolicy;
pub use recording::{RecordingMode, RecordingSession};
pub use session::{DocumentStore, TxSession, TxSessionExt};
pub use state::TransactionId;
pub use unit_of_work::{RetryableError, UnitOfWork};
