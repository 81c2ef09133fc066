//! Recommended imports grouped by abstraction level.
//!
//! `service` is what a boundary layer needs. `engine` adds the pieces used to
//! run composite operations inside a caller-owned unit of work.

pub mod service {
    //! Facade, commands and reports.
    pub use crate::api::{AdminService, ApiError, ErrorCode, FixRequest};
    pub use crate::config::EngineConfig;
    pub use crate::consistency::{
        AuditReport, AuditScope, BikeSale, InvestmentAction, InvestmentChange, PartnerPayout,
        RatingAction, RepairReport, RepairRequest, ReviewAggregation, ReviewEdit,
        SaleCancellation, StatusTransition,
    };
    pub use crate::core::Actor;
    pub use crate::storage::InMemoryDocumentStore;
}

pub mod engine {
    //! Lower-level building blocks.
    pub use crate::consistency::{
        ConsistencyAuditor, ConsistencyError, ConsistencyRepairer, CrossCollectionHandler,
        Inconsistency,
    };
    pub use crate::transaction::{
        DocumentStore, RecordingSession, RetryPolicy, TxSession, TxSessionExt, UnitOfWork,
    };
}
