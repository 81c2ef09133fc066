//! Corrective operations used by the repairer. They write through the same
//! transaction as every other composite operation and recompute totals from
//! the embedded arrays instead of adjusting them incrementally.

use super::{CrossCollectionHandler, active_sell_records, load_bike, load_partner};
use crate::consistency::error::{ConsistencyError, ConsistencyResult};
use crate::core::{BikeId, PartnerId, SellRecordId};
use crate::model::{
    Bike, BikePartnerInvestment, BikeStatus, InvestmentStatus, Partner, PartnerInvestment,
};
use crate::transaction::{TxSession, TxSessionExt};
use tracing::{Level, event};

impl CrossCollectionHandler {
    /// Sets `totalPartnerInvestment` to the sum of the bike's entries.
    pub async fn recalculate_bike_investment_total<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        bike_id: &BikeId,
    ) -> ConsistencyResult<f64> {
        let mut bike = load_bike(tx, bike_id).await?;
        bike.total_partner_investment = bike.computed_partner_investment();
        bike.touch(&self.actor, self.now());
        tx.replace(&bike).await?;
        Ok(bike.total_partner_investment)
    }

    /// Re-derives every partner total from its investments.
    pub async fn recalculate_partner_totals<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        partner_id: &PartnerId,
    ) -> ConsistencyResult<f64> {
        let mut partner = load_partner(tx, partner_id).await?;
        partner.recalculate_totals();
        partner.touch(&self.actor, self.now());
        tx.replace(&partner).await?;
        Ok(partner.total_investment)
    }

    /// Drops a partner investment whose bike no longer exists.
    ///
    /// An entry that already earned profit is left alone: removing it would
    /// take that profit out of the partner's lifetime earnings.
    pub async fn prune_orphaned_partner_investment<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        partner_id: &PartnerId,
        bike_id: &BikeId,
    ) -> ConsistencyResult<f64> {
        if tx.find::<Bike>(bike_id.as_str()).await?.is_some() {
            return Err(ConsistencyError::ConsistencyViolation(format!(
                "bike '{bike_id}' exists, investment of partner '{partner_id}' is not orphaned"
            )));
        }
        let mut partner = load_partner(tx, partner_id).await?;
        let (removed, earned) = partner
            .investment_in(bike_id)
            .map_or((0.0, 0.0), |entry| (entry.investment_amount, entry.profit_earned));
        if earned > 0.0 {
            return Err(ConsistencyError::ConsistencyViolation(format!(
                "investment of partner '{partner_id}' in missing bike '{bike_id}' earned {earned:.2} of profit"
            )));
        }
        partner.investments.retain(|entry| &entry.bike_id != bike_id);
        partner.recalculate_totals();
        partner.touch(&self.actor, self.now());
        tx.replace(&partner).await?;

        event!(
            Level::INFO,
            partner_id = %partner_id,
            bike_id = %bike_id,
            removed,
            "pruned orphaned partner investment"
        );
        Ok(removed)
    }

    /// Drops a bike-side investment whose partner no longer exists.
    pub async fn prune_orphaned_bike_investment<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        bike_id: &BikeId,
        partner_id: &PartnerId,
    ) -> ConsistencyResult<f64> {
        if tx.find::<Partner>(partner_id.as_str()).await?.is_some() {
            return Err(ConsistencyError::ConsistencyViolation(format!(
                "partner '{partner_id}' exists, investment in bike '{bike_id}' is not orphaned"
            )));
        }
        let mut bike = load_bike(tx, bike_id).await?;
        let removed = bike.investment_of(partner_id).map_or(0.0, |entry| entry.amount);
        bike.partner_investments
            .retain(|entry| &entry.partner_id != partner_id);
        bike.total_partner_investment = bike.computed_partner_investment();
        bike.touch(&self.actor, self.now());
        tx.replace(&bike).await?;

        event!(
            Level::INFO,
            bike_id = %bike_id,
            partner_id = %partner_id,
            removed,
            "pruned orphaned bike investment"
        );
        Ok(removed)
    }

    /// Makes the partner and bike sides of one investment agree again. When
    /// both sides exist the partner side wins.
    pub async fn restore_investment_mirror<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        partner_id: &PartnerId,
        bike_id: &BikeId,
    ) -> ConsistencyResult<()> {
        let mut partner = load_partner(tx, partner_id).await?;
        let mut bike = load_bike(tx, bike_id).await?;

        match (
            partner.investment_in(bike_id).cloned(),
            bike.investment_of(partner_id).is_some(),
        ) {
            (Some(entry), false) => bike.partner_investments.push(BikePartnerInvestment {
                partner_id: partner_id.clone(),
                amount: entry.investment_amount,
                profit_share: entry.profit_share,
                profit_earned: entry.profit_earned,
                investment_date: entry.investment_date,
            }),
            (Some(entry), true) => {
                if let Some(mirror) = bike.investment_of_mut(partner_id) {
                    mirror.amount = entry.investment_amount;
                    mirror.profit_share = entry.profit_share;
                    mirror.profit_earned = entry.profit_earned;
                }
            }
            (None, true) => {
                let Some(mirror) = bike.investment_of(partner_id).cloned() else {
                    return Ok(());
                };
                let status = if mirror.profit_earned > 0.0 {
                    InvestmentStatus::Completed
                } else {
                    InvestmentStatus::Active
                };
                partner.investments.push(PartnerInvestment {
                    bike_id: bike_id.clone(),
                    investment_amount: mirror.amount,
                    profit_share: mirror.profit_share,
                    status,
                    profit_earned: mirror.profit_earned,
                    investment_date: mirror.investment_date,
                });
            }
            (None, false) => {
                return Err(ConsistencyError::not_found(
                    "Investment",
                    format!("{partner_id}/{bike_id}"),
                ));
            }
        }

        let now = self.now();
        partner.recalculate_totals();
        partner.touch(&self.actor, now);
        bike.total_partner_investment = bike.computed_partner_investment();
        bike.touch(&self.actor, now);
        tx.replace(&partner).await?;
        tx.replace(&bike).await?;
        Ok(())
    }

    /// Keeps the newest active sell record of the bike, cancels the rest and
    /// marks the bike sold from the survivor unless it is in maintenance.
    pub async fn cancel_duplicate_sell_records<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        bike_id: &BikeId,
    ) -> ConsistencyResult<Vec<SellRecordId>> {
        let mut bike = load_bike(tx, bike_id).await?;
        let records = active_sell_records(tx, bike_id).await?;
        let Some(newest) = records.last().cloned() else {
            return Ok(Vec::new());
        };

        let now = self.now();
        let cancelled = self
            .cancel_active_records(
                tx,
                &mut bike,
                Some(&newest.id),
                "duplicate active sell record",
                now,
            )
            .await?;
        // The surviving record is authoritative for a bike that may be sold.
        if matches!(
            bike.status,
            BikeStatus::Sold | BikeStatus::Available | BikeStatus::Reserved
        ) {
            bike.status = BikeStatus::Sold;
            bike.sold_date = Some(newest.sold_at);
            bike.sold_price = Some(newest.selling_price);
            bike.customer_id = Some(newest.customer_id.clone());
            bike.sell_record_id = Some(newest.id.clone());
        }
        bike.touch(&self.actor, now);
        tx.replace(&bike).await?;
        Ok(cancelled)
    }
}
