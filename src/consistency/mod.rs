//! Cross-collection consistency engine: the composite operation catalog,
//! the read-only auditor and the transactional repairer.

pub mod audit;
pub mod commands;
pub mod error;
pub mod inconsistency;
mod operations;
pub mod repair;

pub use audit::{AuditReport, ConsistencyAuditor, ScanCounts};
pub use commands::{
    BikeSale, CancellationOutcome, InvestmentAction, InvestmentChange, InvestmentOutcome,
    PartnerPayout, PayoutOutcome, RatingAction, RatingSummary, ReviewAggregation, ReviewEdit,
    SaleCancellation, SaleOutcome, StatusOutcome, StatusTransition,
};
pub use error::{ConsistencyError, ConsistencyResult};
pub use inconsistency::{
    AuditScope, Inconsistency, InconsistencyKind, InconsistencyRecord, SellRecordIssue,
};
pub use operations::CrossCollectionHandler;
pub use repair::{
    ConsistencyRepairer, FailedRepair, RepairAction, RepairReport, RepairRequest, RepairedItem,
    SkipReason, SkippedRepair,
};
