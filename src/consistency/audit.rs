//! Read-only consistency scanner.
//!
//! Every check is a pure function over already-loaded documents so that a
//! full audit and the repairer's single-item recheck share one definition of
//! each invariant.

use super::commands::RatingSummary;
use super::error::ConsistencyResult;
use super::inconsistency::{AuditScope, Inconsistency, SellRecordIssue};
use super::operations::{active_sell_records, summarize};
use crate::core::{BikeId, MONEY_EPSILON, PartnerId, approx_eq};
use crate::model::{Bike, Partner, Review, SellRecord};
use crate::transaction::{TxSession, TxSessionExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{Level, event};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanCounts {
    pub bikes: usize,
    pub partners: usize,
    pub sell_records: usize,
    pub reviews: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub scope: AuditScope,
    pub inconsistencies: Vec<Inconsistency>,
    pub count: usize,
    pub scanned: ScanCounts,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.inconsistencies.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ConsistencyAuditor {
    epsilon: f64,
    rating_decimals: u32,
}

impl Default for ConsistencyAuditor {
    fn default() -> Self {
        Self::new(MONEY_EPSILON, 2)
    }
}

impl ConsistencyAuditor {
    pub fn new(epsilon: f64, rating_decimals: u32) -> Self {
        Self {
            epsilon,
            rating_decimals,
        }
    }

    /// Recomputes every aggregate in `scope` and reports the mismatches in a
    /// stable order: sell records, bike investments, partner investments,
    /// then reviews, each by document id.
    pub async fn audit<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        scope: AuditScope,
    ) -> ConsistencyResult<AuditReport> {
        let wants_sales = scope == AuditScope::All || scope == AuditScope::SellRecords;
        let wants_investments = scope == AuditScope::All || scope == AuditScope::Investments;
        let wants_reviews = scope == AuditScope::All || scope == AuditScope::Reviews;

        let bikes: Vec<Bike> = tx.scan().await?;
        let mut scanned = ScanCounts {
            bikes: bikes.len(),
            ..ScanCounts::default()
        };
        let mut found = Vec::new();

        if wants_sales {
            let records: Vec<SellRecord> = tx.scan().await?;
            scanned.sell_records = records.len();
            let mut active: BTreeMap<&BikeId, Vec<&SellRecord>> = BTreeMap::new();
            for record in records.iter().filter(|record| record.is_active()) {
                active.entry(&record.bike_id).or_default().push(record);
            }
            for bike in &bikes {
                let records = active.get(&bike.id).map(Vec::as_slice).unwrap_or_default();
                found.extend(self.check_sell_records(bike, records));
            }
        }

        if wants_investments {
            let partners: Vec<Partner> = tx.scan().await?;
            scanned.partners = partners.len();
            let partner_index: BTreeMap<&PartnerId, &Partner> =
                partners.iter().map(|partner| (&partner.id, partner)).collect();
            let bike_index: BTreeMap<&BikeId, &Bike> =
                bikes.iter().map(|bike| (&bike.id, bike)).collect();

            for bike in &bikes {
                found.extend(self.check_bike_total(bike));
                found.extend(self.check_bike_links(bike, |id| partner_index.get(id).copied()));
            }
            for partner in &partners {
                found.extend(self.check_partner_total(partner));
                found.extend(self.check_partner_links(partner, |id| bike_index.get(id).copied()));
            }
        }

        if wants_reviews {
            let reviews: Vec<Review> = tx.scan().await?;
            scanned.reviews = reviews.len();
            let mut ratings: BTreeMap<&BikeId, Vec<f64>> = BTreeMap::new();
            for review in &reviews {
                ratings.entry(&review.bike_id).or_default().push(review.rating);
            }
            for bike in &bikes {
                let bike_ratings = ratings.get(&bike.id).map(Vec::as_slice).unwrap_or_default();
                found.extend(self.check_reviews(bike, bike_ratings));
            }
        }

        event!(
            Level::INFO,
            scope = %scope,
            inconsistencies = found.len(),
            bikes = scanned.bikes,
            partners = scanned.partners,
            "consistency audit finished"
        );

        Ok(AuditReport {
            scope,
            count: found.len(),
            inconsistencies: found,
            scanned,
        })
    }

    /// Re-evaluates the invariant behind `item` against the current state.
    /// Returns the fresh inconsistency if it still reproduces.
    pub async fn recheck<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        item: &Inconsistency,
    ) -> ConsistencyResult<Option<Inconsistency>> {
        let candidates: Vec<Inconsistency> = match item {
            Inconsistency::BikeSellRecordMismatch { bike_id, .. } => {
                let Some(bike) = tx.find::<Bike>(bike_id.as_str()).await? else {
                    return Ok(None);
                };
                let records = active_sell_records(tx, bike_id).await?;
                let records: Vec<&SellRecord> = records.iter().collect();
                self.check_sell_records(&bike, &records).into_iter().collect()
            }
            Inconsistency::BikeInvestmentTotalMismatch { bike_id, .. } => {
                let bike = tx.find::<Bike>(bike_id.as_str()).await?;
                bike.and_then(|bike| self.check_bike_total(&bike))
                    .into_iter()
                    .collect()
            }
            Inconsistency::PartnerInvestmentTotalMismatch { partner_id, .. } => {
                let partner = tx.find::<Partner>(partner_id.as_str()).await?;
                partner
                    .and_then(|partner| self.check_partner_total(&partner))
                    .into_iter()
                    .collect()
            }
            Inconsistency::PartnerInvestmentOrphaned {
                partner_id,
                bike_id,
                ..
            }
            | Inconsistency::InvestmentMirrorMismatch {
                partner_id,
                bike_id,
                ..
            } => {
                let Some(partner) = tx.find::<Partner>(partner_id.as_str()).await? else {
                    return Ok(None);
                };
                let bike = tx.find::<Bike>(bike_id.as_str()).await?;
                let mut found = self.check_partner_links(&partner, |id| {
                    bike.as_ref().filter(|bike| &bike.id == id)
                });
                if let Some(bike) = &bike {
                    found.extend(self.check_bike_links(bike, |id| {
                        Some(&partner).filter(|partner| &partner.id == id)
                    }));
                }
                found
            }
            Inconsistency::BikeInvestmentOrphaned {
                bike_id,
                partner_id,
                ..
            } => {
                let Some(bike) = tx.find::<Bike>(bike_id.as_str()).await? else {
                    return Ok(None);
                };
                let partner = tx.find::<Partner>(partner_id.as_str()).await?;
                self.check_bike_links(&bike, |id| {
                    partner.as_ref().filter(|partner| &partner.id == id)
                })
            }
            Inconsistency::ReviewAggregationMismatch { bike_id, .. } => {
                let Some(bike) = tx.find::<Bike>(bike_id.as_str()).await? else {
                    return Ok(None);
                };
                let ratings: Vec<f64> = tx
                    .scan::<Review>()
                    .await?
                    .into_iter()
                    .filter(|review| &review.bike_id == bike_id)
                    .map(|review| review.rating)
                    .collect();
                self.check_reviews(&bike, &ratings).into_iter().collect()
            }
        };

        Ok(candidates
            .into_iter()
            .find(|candidate| candidate.same_target(item)))
    }

    fn check_sell_records(&self, bike: &Bike, active: &[&SellRecord]) -> Option<Inconsistency> {
        let issue = match (bike.is_sold(), active.len()) {
            (_, n) if n > 1 => SellRecordIssue::MultipleActiveRecords,
            (true, 0) => SellRecordIssue::SoldWithoutActiveRecord,
            (false, 1) => SellRecordIssue::ActiveRecordOnUnsoldBike,
            _ => return None,
        };
        Some(Inconsistency::BikeSellRecordMismatch {
            bike_id: bike.id.clone(),
            issue,
            bike_status: bike.status,
            active_records: active.iter().map(|record| record.id.clone()).collect(),
        })
    }

    fn check_bike_total(&self, bike: &Bike) -> Option<Inconsistency> {
        let expected = bike.computed_partner_investment();
        if bike.partner_investments.is_empty() && bike.total_partner_investment == 0.0 {
            return None;
        }
        (!approx_eq(expected, bike.total_partner_investment, self.epsilon)).then(|| {
            Inconsistency::BikeInvestmentTotalMismatch {
                bike_id: bike.id.clone(),
                expected,
                actual: bike.total_partner_investment,
            }
        })
    }

    fn check_partner_total(&self, partner: &Partner) -> Option<Inconsistency> {
        let expected = partner.computed_total_investment();
        if partner.investments.is_empty() && partner.total_investment == 0.0 {
            return None;
        }
        (!approx_eq(expected, partner.total_investment, self.epsilon)).then(|| {
            Inconsistency::PartnerInvestmentTotalMismatch {
                partner_id: partner.id.clone(),
                expected,
                actual: partner.total_investment,
            }
        })
    }

    /// Bike-side entries pointing at missing partners, or at partners that
    /// do not list the investment.
    fn check_bike_links<'a>(
        &self,
        bike: &Bike,
        partner_of: impl Fn(&PartnerId) -> Option<&'a Partner>,
    ) -> Vec<Inconsistency> {
        let mut found = Vec::new();
        for entry in &bike.partner_investments {
            match partner_of(&entry.partner_id) {
                None => found.push(Inconsistency::BikeInvestmentOrphaned {
                    bike_id: bike.id.clone(),
                    partner_id: entry.partner_id.clone(),
                    amount: entry.amount,
                }),
                Some(partner) if partner.investment_in(&bike.id).is_none() => {
                    found.push(Inconsistency::InvestmentMirrorMismatch {
                        partner_id: partner.id.clone(),
                        bike_id: bike.id.clone(),
                        partner_amount: None,
                        bike_amount: Some(entry.amount),
                    })
                }
                Some(_) => {}
            }
        }
        found
    }

    /// Partner-side entries pointing at missing bikes, or whose bike mirror
    /// is absent or carries a different amount.
    fn check_partner_links<'a>(
        &self,
        partner: &Partner,
        bike_of: impl Fn(&BikeId) -> Option<&'a Bike>,
    ) -> Vec<Inconsistency> {
        let mut found = Vec::new();
        for entry in &partner.investments {
            let Some(bike) = bike_of(&entry.bike_id) else {
                found.push(Inconsistency::PartnerInvestmentOrphaned {
                    partner_id: partner.id.clone(),
                    bike_id: entry.bike_id.clone(),
                    amount: entry.investment_amount,
                });
                continue;
            };
            let mirrored = bike.investment_of(&partner.id).map(|mirror| mirror.amount);
            let agrees = mirrored
                .is_some_and(|amount| approx_eq(amount, entry.investment_amount, self.epsilon));
            if !agrees {
                found.push(Inconsistency::InvestmentMirrorMismatch {
                    partner_id: partner.id.clone(),
                    bike_id: bike.id.clone(),
                    partner_amount: Some(entry.investment_amount),
                    bike_amount: mirrored,
                });
            }
        }
        found
    }

    fn check_reviews(&self, bike: &Bike, ratings: &[f64]) -> Option<Inconsistency> {
        let expected = summarize(ratings, self.rating_decimals);
        let actual = RatingSummary {
            average_rating: bike.average_rating,
            total_reviews: bike.total_reviews,
        };
        let matches = expected.total_reviews == actual.total_reviews
            && approx_eq(expected.average_rating, actual.average_rating, self.epsilon);
        (!matches).then(|| Inconsistency::ReviewAggregationMismatch {
            bike_id: bike.id.clone(),
            expected,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Actor, SellRecordId};
    use crate::model::{BikePartnerInvestment, BikeStatus, SellRecordStatus};
    use chrono::Utc;

    fn record(id: &str, bike: &str) -> SellRecord {
        SellRecord {
            id: SellRecordId::from(id),
            bike_id: BikeId::from(bike),
            customer_id: "c1".into(),
            selling_price: 1000.0,
            profit: 100.0,
            status: SellRecordStatus::Active,
            partner_profit_distribution: Vec::new(),
            sold_at: Utc::now(),
            cancel_reason: None,
            cancelled_at: None,
            processed_by: Actor::system(),
            updated_by: None,
        }
    }

    #[test]
    fn test_sell_record_issue_classification() {
        let auditor = ConsistencyAuditor::default();
        let mut bike = Bike::new("b1", "Roadster");
        let first = record("s1", "b1");
        let second = record("s2", "b1");

        assert!(auditor.check_sell_records(&bike, &[]).is_none());
        assert!(matches!(
            auditor.check_sell_records(&bike, &[&first]),
            Some(Inconsistency::BikeSellRecordMismatch {
                issue: SellRecordIssue::ActiveRecordOnUnsoldBike,
                ..
            })
        ));

        bike.status = BikeStatus::Sold;
        assert!(auditor.check_sell_records(&bike, &[&first]).is_none());
        assert!(matches!(
            auditor.check_sell_records(&bike, &[]),
            Some(Inconsistency::BikeSellRecordMismatch {
                issue: SellRecordIssue::SoldWithoutActiveRecord,
                ..
            })
        ));
        assert!(matches!(
            auditor.check_sell_records(&bike, &[&first, &second]),
            Some(Inconsistency::BikeSellRecordMismatch {
                issue: SellRecordIssue::MultipleActiveRecords,
                ..
            })
        ));
    }

    #[test]
    fn test_bike_total_within_epsilon_is_consistent() {
        let auditor = ConsistencyAuditor::default();
        let mut bike = Bike::new("b1", "Roadster");
        bike.partner_investments.push(BikePartnerInvestment {
            partner_id: "p1".into(),
            amount: 500.0,
            profit_share: 25.0,
            profit_earned: 0.0,
            investment_date: Utc::now(),
        });
        bike.total_partner_investment = 500.004;
        assert!(auditor.check_bike_total(&bike).is_none());

        bike.total_partner_investment = 450.0;
        assert_eq!(
            auditor.check_bike_total(&bike),
            Some(Inconsistency::BikeInvestmentTotalMismatch {
                bike_id: BikeId::from("b1"),
                expected: 500.0,
                actual: 450.0,
            })
        );
    }

    #[test]
    fn test_review_check_compares_count_and_average() {
        let auditor = ConsistencyAuditor::default();
        let mut bike = Bike::new("b1", "Roadster");
        bike.average_rating = 4.0;
        bike.total_reviews = 3;
        assert!(auditor.check_reviews(&bike, &[4.0, 5.0, 3.0]).is_none());
        assert!(auditor.check_reviews(&bike, &[4.0, 5.0]).is_some());
    }
}
