use super::error::ApiError;
use crate::config::EngineConfig;
use crate::consistency::{
    AuditReport, AuditScope, BikeSale, CancellationOutcome, ConsistencyAuditor, ConsistencyResult,
    ConsistencyRepairer, CrossCollectionHandler, InvestmentChange, InvestmentOutcome,
    PartnerPayout, PayoutOutcome, RatingSummary, RepairReport, RepairRequest, ReviewAggregation,
    ReviewEdit, SaleCancellation, SaleOutcome, StatusOutcome, StatusTransition,
};
use crate::core::{Actor, ReviewId};
use crate::model::Review;
use crate::transaction::{DocumentStore, UnitOfWork};
use std::future::Future;
use std::sync::Arc;
use tracing::{Instrument, info_span};

/// Repair entry point parameters as collaborators send them.
pub type FixRequest = RepairRequest;

/// Boundary facade for collaborators such as an HTTP layer.
///
/// Every composite operation runs in its own retrying unit of work and
/// failures come back as translated [`ApiError`]s.
///
/// # Examples
///
/// ```
/// use bikemart::{AdminService, EngineConfig, InMemoryDocumentStore};
/// use bikemart::consistency::AuditScope;
///
/// # tokio_test::block_on(async {
/// let service = AdminService::new(InMemoryDocumentStore::new(), &EngineConfig::default());
/// let report = service.validate_data_consistency(AuditScope::All).await.unwrap();
/// assert_eq!(report.count, 0);
/// # });
/// ```
pub struct AdminService<S: DocumentStore> {
    uow: UnitOfWork<S>,
    handler: CrossCollectionHandler,
    auditor: ConsistencyAuditor,
}

impl<S: DocumentStore> Clone for AdminService<S> {
    fn clone(&self) -> Self {
        Self {
            uow: self.uow.clone(),
            handler: self.handler.clone(),
            auditor: self.auditor.clone(),
        }
    }
}

impl<S: DocumentStore> AdminService<S> {
    pub fn new(store: S, config: &EngineConfig) -> Self {
        Self::from_shared(Arc::new(store), config)
    }

    pub fn from_shared(store: Arc<S>, config: &EngineConfig) -> Self {
        Self {
            uow: UnitOfWork::from_shared(store, config.retry.clone()),
            handler: CrossCollectionHandler::new(config.actor())
                .with_rating_decimals(config.rating_decimals),
            auditor: ConsistencyAuditor::new(config.money_epsilon, config.rating_decimals),
        }
    }

    /// Same service recording `actor` on every write.
    pub fn acting_as(&self, actor: Actor) -> Self {
        Self {
            uow: self.uow.clone(),
            handler: self.handler.acting_as(actor),
            auditor: self.auditor.clone(),
        }
    }

    pub fn actor(&self) -> &Actor {
        self.handler.actor()
    }

    pub fn store(&self) -> &S {
        self.uow.store()
    }

    pub fn unit_of_work(&self) -> &UnitOfWork<S> {
        &self.uow
    }

    pub fn handler(&self) -> &CrossCollectionHandler {
        &self.handler
    }

    async fn execute<T, F, Fut>(&self, operation: &'static str, work: F) -> Result<T, ApiError>
    where
        F: FnMut(S::Tx) -> Fut,
        Fut: Future<Output = ConsistencyResult<T>>,
    {
        let span = info_span!("composite_operation", operation, actor = %self.handler.actor());
        self.uow
            .run(work)
            .instrument(span)
            .await
            .map_err(ApiError::from)
    }

    pub async fn sell_bike(&self, sale: &BikeSale) -> Result<SaleOutcome, ApiError> {
        let handler = &self.handler;
        self.execute("handle_bike_sale", |tx| async move {
            handler.handle_bike_sale(&tx, sale).await
        })
        .await
    }

    pub async fn cancel_sale(
        &self,
        cancellation: &SaleCancellation,
    ) -> Result<CancellationOutcome, ApiError> {
        let handler = &self.handler;
        self.execute("cancel_sell_record", |tx| async move {
            handler.cancel_sell_record(&tx, cancellation).await
        })
        .await
    }

    pub async fn update_bike_status(
        &self,
        transition: &StatusTransition,
    ) -> Result<StatusOutcome, ApiError> {
        let handler = &self.handler;
        self.execute("update_bike_status", |tx| async move {
            handler.update_bike_status(&tx, transition).await
        })
        .await
    }

    pub async fn update_partner_investment(
        &self,
        change: &InvestmentChange,
    ) -> Result<InvestmentOutcome, ApiError> {
        let handler = &self.handler;
        self.execute("update_partner_investment", |tx| async move {
            handler.update_partner_investment(&tx, change).await
        })
        .await
    }

    pub async fn update_review_aggregation(
        &self,
        aggregation: &ReviewAggregation,
    ) -> Result<RatingSummary, ApiError> {
        let handler = &self.handler;
        self.execute("update_review_aggregation", |tx| async move {
            handler.update_review_aggregation(&tx, aggregation).await
        })
        .await
    }

    pub async fn record_review(&self, review: &Review) -> Result<RatingSummary, ApiError> {
        let handler = &self.handler;
        self.execute("record_review", |tx| async move {
            handler.record_review(&tx, review).await
        })
        .await
    }

    pub async fn edit_review_rating(&self, edit: &ReviewEdit) -> Result<RatingSummary, ApiError> {
        let handler = &self.handler;
        self.execute("edit_review_rating", |tx| async move {
            handler.edit_review_rating(&tx, edit).await
        })
        .await
    }

    pub async fn delete_review(&self, review_id: &ReviewId) -> Result<RatingSummary, ApiError> {
        let handler = &self.handler;
        self.execute("delete_review", |tx| async move {
            handler.delete_review(&tx, review_id).await
        })
        .await
    }

    pub async fn process_partner_payout(
        &self,
        payout: &PartnerPayout,
    ) -> Result<PayoutOutcome, ApiError> {
        let handler = &self.handler;
        self.execute("process_partner_payout", |tx| async move {
            handler.process_partner_payout(&tx, payout).await
        })
        .await
    }

    /// Read-only audit; never writes.
    pub async fn validate_data_consistency(
        &self,
        scope: AuditScope,
    ) -> Result<AuditReport, ApiError> {
        let auditor = &self.auditor;
        self.uow
            .read(|tx| async move { auditor.audit(&tx, scope).await })
            .instrument(info_span!("consistency_audit", scope = %scope))
            .await
            .map_err(ApiError::from)
    }

    pub async fn fix_data_inconsistencies(
        &self,
        request: &FixRequest,
    ) -> Result<RepairReport, ApiError> {
        let repairer = ConsistencyRepairer::new(
            self.uow.clone(),
            self.handler.clone(),
            self.auditor.clone(),
        );
        repairer
            .repair(request)
            .instrument(info_span!(
                "consistency_repair",
                scope = %request.scope,
                dry_run = request.dry_run,
                actor = %self.handler.actor()
            ))
            .await
            .map_err(ApiError::from)
    }
}
