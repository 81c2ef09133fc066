//! Transactional, per-item repair of audited inconsistencies.

use super::audit::ConsistencyAuditor;
use super::commands::{RatingAction, ReviewAggregation, StatusTransition};
use super::error::{ConsistencyError, ConsistencyResult};
use super::inconsistency::{AuditScope, Inconsistency, SellRecordIssue};
use super::operations::CrossCollectionHandler;
use crate::api::ApiError;
use crate::model::BikeStatus;
use crate::storage::DocumentRef;
use crate::transaction::{DocumentStore, RecordingSession, TxSession, UnitOfWork};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, Level, event, info_span};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairRequest {
    /// Audit first and repair everything found in `scope`.
    #[serde(default)]
    pub auto_fix: bool,
    #[serde(default, rename = "fixType")]
    pub scope: AuditScope,
    #[serde(default, rename = "specificInconsistencies")]
    pub specific: Option<Vec<Inconsistency>>,
    #[serde(default)]
    pub dry_run: bool,
}

impl RepairRequest {
    pub fn auto(scope: AuditScope) -> Self {
        Self {
            auto_fix: true,
            scope,
            ..Self::default()
        }
    }

    pub fn specific(items: Vec<Inconsistency>) -> Self {
        Self {
            specific: Some(items),
            ..Self::default()
        }
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
    RevertToAvailable,
    MarkSoldFromRecord,
    CancelDuplicateSellRecords,
    RecalculateBikeInvestmentTotal,
    RecalculatePartnerTotals,
    PrunePartnerInvestment,
    PruneBikeInvestment,
    RestoreInvestmentMirror,
    RecomputeReviewAggregation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyConsistent,
    OutOfScope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairedItem {
    pub inconsistency: Inconsistency,
    pub action: RepairAction,
    pub touched: Vec<DocumentRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRepair {
    pub inconsistency: Inconsistency,
    pub error: ApiError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRepair {
    pub inconsistency: Inconsistency,
    pub reason: SkipReason,
}

/// Per-item outcome of a repair batch. A dry run and a real run over the
/// same state produce equal reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepairReport {
    pub fixed: Vec<RepairedItem>,
    pub failed: Vec<FailedRepair>,
    pub skipped: Vec<SkippedRepair>,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.fixed.is_empty() && self.failed.is_empty()
    }
}

enum ItemOutcome {
    Fixed {
        action: RepairAction,
        touched: Vec<DocumentRef>,
    },
    AlreadyConsistent,
}

pub struct ConsistencyRepairer<S: DocumentStore> {
    uow: UnitOfWork<S>,
    handler: CrossCollectionHandler,
    auditor: ConsistencyAuditor,
}

impl<S: DocumentStore> ConsistencyRepairer<S> {
    pub fn new(
        uow: UnitOfWork<S>,
        handler: CrossCollectionHandler,
        auditor: ConsistencyAuditor,
    ) -> Self {
        Self {
            uow,
            handler,
            auditor,
        }
    }

    /// Repairs each requested inconsistency in its own unit of work. A failing
    /// item is reported and the batch carries on.
    ///
    /// A dry run rehearses the whole batch inside one transaction that is
    /// aborted at the end. Every item stages its writes in a nested capture
    /// overlay that is folded into the batch overlay only when the item
    /// succeeds, so later items recheck against what earlier ones would have
    /// committed.
    pub async fn repair(&self, request: &RepairRequest) -> ConsistencyResult<RepairReport> {
        let targets = self.targets(request).await?;
        let report = if request.dry_run {
            self.uow
                .read(|tx| async move {
                    let batch = RecordingSession::capture(&tx);
                    Ok::<_, ConsistencyError>(self.run_batch(targets, request, Some(&batch)).await)
                })
                .await?
        } else {
            self.run_batch(targets, request, None).await
        };

        event!(
            Level::INFO,
            fixed = report.fixed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            dry_run = request.dry_run,
            "repair batch finished"
        );
        Ok(report)
    }

    async fn run_batch(
        &self,
        targets: Vec<Inconsistency>,
        request: &RepairRequest,
        rehearsal: Option<&RecordingSession<'_, S::Tx>>,
    ) -> RepairReport {
        let mut report = RepairReport::default();
        for item in targets {
            if !request.scope.includes(item.kind()) {
                report.skipped.push(SkippedRepair {
                    inconsistency: item,
                    reason: SkipReason::OutOfScope,
                });
                continue;
            }

            let span = info_span!(
                "repair_item",
                kind = %item.kind(),
                subject = %item.subject_id(),
                dry_run = request.dry_run
            );
            match self.repair_one(&item, rehearsal).instrument(span).await {
                Ok(ItemOutcome::Fixed { action, touched }) => report.fixed.push(RepairedItem {
                    inconsistency: item,
                    action,
                    touched,
                }),
                Ok(ItemOutcome::AlreadyConsistent) => report.skipped.push(SkippedRepair {
                    inconsistency: item,
                    reason: SkipReason::AlreadyConsistent,
                }),
                Err(err) => {
                    event!(Level::WARN, item = %item, error = %err, "repair failed");
                    report.failed.push(FailedRepair {
                        inconsistency: item,
                        error: ApiError::from(err),
                    });
                }
            }
        }
        report
    }

    async fn targets(&self, request: &RepairRequest) -> ConsistencyResult<Vec<Inconsistency>> {
        match &request.specific {
            Some(items) if !items.is_empty() => Ok(items.clone()),
            _ if request.auto_fix => {
                let auditor = &self.auditor;
                let scope = request.scope;
                let report = self
                    .uow
                    .read(|tx| async move { auditor.audit(&tx, scope).await })
                    .await?;
                Ok(report.inconsistencies)
            }
            _ => Err(ConsistencyError::validation(
                "either autoFix or specificInconsistencies is required",
            )),
        }
    }

    async fn repair_one(
        &self,
        item: &Inconsistency,
        rehearsal: Option<&RecordingSession<'_, S::Tx>>,
    ) -> ConsistencyResult<ItemOutcome> {
        match rehearsal {
            Some(batch) => {
                let staged = RecordingSession::capture(batch);
                let outcome = self.attempt(&staged, item).await?;
                staged.flush().await?;
                Ok(outcome)
            }
            None => {
                self.uow
                    .run(|tx| async move {
                        let session = RecordingSession::passthrough(&tx);
                        self.attempt(&session, item).await
                    })
                    .await
            }
        }
    }

    async fn attempt<T: TxSession + ?Sized>(
        &self,
        session: &RecordingSession<'_, T>,
        item: &Inconsistency,
    ) -> ConsistencyResult<ItemOutcome> {
        let Some(current) = self.auditor.recheck(session, item).await? else {
            return Ok(ItemOutcome::AlreadyConsistent);
        };
        let action = self.apply(session, &current).await?;
        Ok(ItemOutcome::Fixed {
            action,
            touched: session.touched().await,
        })
    }

    /// Dispatches one live inconsistency to the operation that resolves it.
    async fn apply<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        item: &Inconsistency,
    ) -> ConsistencyResult<RepairAction> {
        let handler = &self.handler;
        match item {
            Inconsistency::BikeSellRecordMismatch {
                bike_id,
                issue,
                active_records,
                ..
            } => match issue {
                SellRecordIssue::SoldWithoutActiveRecord => {
                    handler
                        .update_bike_status(
                            tx,
                            &StatusTransition {
                                bike_id: bike_id.clone(),
                                new_status: BikeStatus::Available,
                                sell_record_id: None,
                                customer_id: None,
                            },
                        )
                        .await?;
                    Ok(RepairAction::RevertToAvailable)
                }
                SellRecordIssue::ActiveRecordOnUnsoldBike => {
                    let Some(record_id) = active_records.first() else {
                        return Err(ConsistencyError::ConsistencyViolation(format!(
                            "no active sell record left for bike '{bike_id}'"
                        )));
                    };
                    handler
                        .update_bike_status(
                            tx,
                            &StatusTransition {
                                bike_id: bike_id.clone(),
                                new_status: BikeStatus::Sold,
                                sell_record_id: Some(record_id.clone()),
                                customer_id: None,
                            },
                        )
                        .await?;
                    Ok(RepairAction::MarkSoldFromRecord)
                }
                SellRecordIssue::MultipleActiveRecords => {
                    handler.cancel_duplicate_sell_records(tx, bike_id).await?;
                    Ok(RepairAction::CancelDuplicateSellRecords)
                }
            },
            Inconsistency::BikeInvestmentTotalMismatch { bike_id, .. } => {
                handler.recalculate_bike_investment_total(tx, bike_id).await?;
                Ok(RepairAction::RecalculateBikeInvestmentTotal)
            }
            Inconsistency::PartnerInvestmentTotalMismatch { partner_id, .. } => {
                handler.recalculate_partner_totals(tx, partner_id).await?;
                Ok(RepairAction::RecalculatePartnerTotals)
            }
            Inconsistency::PartnerInvestmentOrphaned {
                partner_id,
                bike_id,
                ..
            } => {
                handler
                    .prune_orphaned_partner_investment(tx, partner_id, bike_id)
                    .await?;
                Ok(RepairAction::PrunePartnerInvestment)
            }
            Inconsistency::BikeInvestmentOrphaned {
                bike_id,
                partner_id,
                ..
            } => {
                handler
                    .prune_orphaned_bike_investment(tx, bike_id, partner_id)
                    .await?;
                Ok(RepairAction::PruneBikeInvestment)
            }
            Inconsistency::InvestmentMirrorMismatch {
                partner_id,
                bike_id,
                ..
            } => {
                handler
                    .restore_investment_mirror(tx, partner_id, bike_id)
                    .await?;
                Ok(RepairAction::RestoreInvestmentMirror)
            }
            Inconsistency::ReviewAggregationMismatch { bike_id, .. } => {
                handler
                    .update_review_aggregation(
                        tx,
                        &ReviewAggregation {
                            bike_id: bike_id.clone(),
                            action: RatingAction::Recompute,
                        },
                    )
                    .await?;
                Ok(RepairAction::RecomputeReviewAggregation)
            }
        }
    }
}
