use super::{
    CrossCollectionHandler, credit_profit, debit_profit, ensure_money, ensure_non_negative,
    ensure_positive, load_bike, load_partner, load_sell_record,
};
use crate::consistency::commands::{BikeSale, CancellationOutcome, SaleCancellation, SaleOutcome};
use crate::consistency::error::{ConsistencyError, ConsistencyResult};
use crate::core::{MONEY_EPSILON, SellRecordId, round2};
use crate::model::{Bike, BikeStatus, Partner, ProfitDistribution, SellRecord, SellRecordStatus};
use crate::transaction::{TxSession, TxSessionExt};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::{Level, event};

impl CrossCollectionHandler {
    /// Sells an available bike: marks it sold, creates the active sell record
    /// and credits the distributed profit to each partner.
    pub async fn handle_bike_sale<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        sale: &BikeSale,
    ) -> ConsistencyResult<SaleOutcome> {
        ensure_positive("sellingPrice", sale.selling_price)?;
        let mut seen = BTreeSet::new();
        for share in &sale.profit_distribution {
            ensure_non_negative("profitAmount", share.profit_amount)?;
            if !seen.insert(share.partner_id.clone()) {
                return Err(ConsistencyError::validation(format!(
                    "partner '{}' appears twice in the profit distribution",
                    share.partner_id
                )));
            }
        }

        let mut bike = load_bike(tx, &sale.bike_id).await?;
        if bike.status != BikeStatus::Available {
            return Err(ConsistencyError::invalid_state(format!(
                "bike '{}' is {}, only available bikes can be sold",
                bike.id, bike.status
            )));
        }

        let profit = match (bike.purchase_price, sale.profit) {
            (Some(purchase), supplied) => {
                let derived = round2(sale.selling_price - purchase);
                if supplied.is_some_and(|supplied| (supplied - derived).abs() > MONEY_EPSILON) {
                    event!(
                        Level::DEBUG,
                        bike_id = %bike.id,
                        supplied = ?supplied,
                        derived,
                        "ignoring supplied profit, purchase price is known"
                    );
                }
                derived
            }
            (None, Some(supplied)) => {
                ensure_money("profit", supplied)?;
                round2(supplied)
            }
            (None, None) => {
                return Err(ConsistencyError::validation(format!(
                    "bike '{}' has no purchase price, profit must be supplied",
                    bike.id
                )));
            }
        };

        let distributed: f64 = sale
            .profit_distribution
            .iter()
            .map(|share| share.profit_amount)
            .sum();
        if distributed > profit.max(0.0) + MONEY_EPSILON {
            return Err(ConsistencyError::validation(format!(
                "distributed profit {distributed:.2} exceeds sale profit {profit:.2}"
            )));
        }

        // Resolve every partner before the first write.
        let mut partners: Vec<(Partner, f64)> = Vec::with_capacity(sale.profit_distribution.len());
        for share in &sale.profit_distribution {
            let partner = load_partner(tx, &share.partner_id).await?;
            if partner.investment_in(&bike.id).is_none() {
                return Err(ConsistencyError::validation(format!(
                    "partner '{}' has no investment in bike '{}'",
                    partner.id, bike.id
                )));
            }
            partners.push((partner, round2(share.profit_amount)));
        }

        let now = self.now();
        let record = SellRecord {
            id: SellRecordId::generate(),
            bike_id: bike.id.clone(),
            customer_id: sale.customer_id.clone(),
            selling_price: round2(sale.selling_price),
            profit,
            status: SellRecordStatus::Active,
            partner_profit_distribution: partners
                .iter()
                .map(|(partner, amount)| ProfitDistribution::new(partner.id.clone(), *amount))
                .collect(),
            sold_at: now,
            cancel_reason: None,
            cancelled_at: None,
            processed_by: self.actor.clone(),
            updated_by: None,
        };

        bike.status = BikeStatus::Sold;
        bike.sold_date = Some(now);
        bike.sold_price = Some(record.selling_price);
        bike.customer_id = Some(sale.customer_id.clone());
        bike.sell_record_id = Some(record.id.clone());
        bike.touch(&self.actor, now);

        for (partner, amount) in &mut partners {
            credit_profit(partner, &mut bike, *amount, &self.actor, now)?;
        }

        tx.replace(&bike).await?;
        tx.insert(&record).await?;
        for (partner, _) in &partners {
            tx.replace(partner).await?;
        }

        event!(
            Level::INFO,
            bike_id = %bike.id,
            sell_record_id = %record.id,
            profit,
            partners = partners.len(),
            "bike sold"
        );

        Ok(SaleOutcome {
            sell_record_id: record.id,
            profit,
            distribution: record.partner_profit_distribution,
        })
    }

    /// Cancels an active sell record and undoes every effect of the sale.
    pub async fn cancel_sell_record<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        cancellation: &SaleCancellation,
    ) -> ConsistencyResult<CancellationOutcome> {
        let mut record = load_sell_record(tx, &cancellation.sell_record_id).await?;
        if !record.is_active() {
            return Err(ConsistencyError::invalid_state(format!(
                "sell record '{}' is already cancelled",
                record.id
            )));
        }

        let now = self.now();
        let mut bike = load_bike(tx, &record.bike_id).await?;
        let reverted = self
            .revert_sell_record(tx, &mut record, &mut bike, &cancellation.reason, now)
            .await?;

        if bike.status == BikeStatus::Sold {
            bike.status = BikeStatus::Available;
        }
        bike.clear_sold_fields();

        let cascade_reason = format!("cascade: {}", cancellation.reason);
        let cascaded = self
            .cancel_active_records(tx, &mut bike, Some(&record.id), &cascade_reason, now)
            .await?;

        bike.touch(&self.actor, now);
        tx.replace(&bike).await?;

        event!(
            Level::INFO,
            sell_record_id = %record.id,
            bike_id = %bike.id,
            cascaded = cascaded.len(),
            "sale cancelled"
        );

        Ok(CancellationOutcome {
            sell_record_id: record.id,
            bike_id: bike.id,
            cascaded,
            reverted,
        })
    }

    /// Marks `record` cancelled and takes its distributed profit back from
    /// each partner. The bike-side mirrors are adjusted on `bike`, which the
    /// caller writes.
    pub(super) async fn revert_sell_record<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        record: &mut SellRecord,
        bike: &mut Bike,
        reason: &str,
        now: DateTime<Utc>,
    ) -> ConsistencyResult<Vec<ProfitDistribution>> {
        record.cancel(reason, &self.actor, now);
        tx.replace(&*record).await?;

        let mut reverted = Vec::with_capacity(record.partner_profit_distribution.len());
        for share in &record.partner_profit_distribution {
            let mut partner = match load_partner(tx, &share.partner_id).await {
                Ok(partner) => partner,
                Err(ConsistencyError::NotFound { .. }) => {
                    event!(
                        Level::WARN,
                        partner_id = %share.partner_id,
                        sell_record_id = %record.id,
                        "partner no longer exists, nothing to revert"
                    );
                    continue;
                }
                Err(err) => return Err(err),
            };
            let amount = debit_profit(&mut partner, bike, share.profit_amount, &self.actor, now)?;
            tx.replace(&partner).await?;
            reverted.push(ProfitDistribution::new(partner.id.clone(), amount));
        }
        Ok(reverted)
    }
}
