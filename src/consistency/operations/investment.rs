use super::{
    CrossCollectionHandler, credit_profit, ensure_non_negative, ensure_positive, load_bike,
    load_partner,
};
use crate::consistency::commands::{InvestmentAction, InvestmentChange, InvestmentOutcome};
use crate::consistency::error::{ConsistencyError, ConsistencyResult};
use crate::core::{MONEY_EPSILON, round2};
use crate::model::{Bike, BikePartnerInvestment, InvestmentStatus, Partner, PartnerInvestment};
use crate::transaction::{TxSession, TxSessionExt};
use tracing::{Level, event};

impl CrossCollectionHandler {
    /// Adds, credits or removes one partner investment on both its partner
    /// and bike sides.
    pub async fn update_partner_investment<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        change: &InvestmentChange,
    ) -> ConsistencyResult<InvestmentOutcome> {
        let mut partner = load_partner(tx, &change.partner_id).await?;
        let mut bike = load_bike(tx, &change.bike_id).await?;

        let amount_applied = match change.action {
            InvestmentAction::Add => self.add_investment(&mut partner, &mut bike, change)?,
            InvestmentAction::Update => {
                ensure_non_negative("amount", change.amount)?;
                if partner.investment_in(&bike.id).is_none() {
                    return Err(ConsistencyError::not_found(
                        "Investment",
                        format!("{}/{}", partner.id, bike.id),
                    ));
                }
                let amount = round2(change.amount);
                credit_profit(&mut partner, &mut bike, amount, &self.actor, self.now())?;
                amount
            }
            InvestmentAction::Remove => self.remove_investment(&mut partner, &mut bike, change)?,
        };

        let now = self.now();
        partner.touch(&self.actor, now);
        bike.touch(&self.actor, now);
        tx.replace(&partner).await?;
        tx.replace(&bike).await?;

        event!(
            Level::INFO,
            partner_id = %partner.id,
            bike_id = %bike.id,
            action = ?change.action,
            amount = amount_applied,
            "partner investment updated"
        );

        Ok(InvestmentOutcome {
            partner_id: partner.id,
            bike_id: bike.id,
            action: change.action,
            amount_applied,
            partner_total_investment: partner.total_investment,
            bike_total_partner_investment: bike.total_partner_investment,
        })
    }

    fn add_investment(
        &self,
        partner: &mut Partner,
        bike: &mut Bike,
        change: &InvestmentChange,
    ) -> ConsistencyResult<f64> {
        ensure_positive("amount", change.amount)?;
        if !(0.0..=100.0).contains(&change.profit_share) {
            return Err(ConsistencyError::validation(format!(
                "profitShare must be within [0, 100], got {}",
                change.profit_share
            )));
        }
        if bike.is_sold() {
            return Err(ConsistencyError::invalid_state(format!(
                "bike '{}' is sold and no longer accepts investments",
                bike.id
            )));
        }
        if partner.investment_in(&bike.id).is_some() || bike.investment_of(&partner.id).is_some()
        {
            return Err(ConsistencyError::DuplicateEntry(format!(
                "partner '{}' already invests in bike '{}'",
                partner.id, bike.id
            )));
        }

        let amount = round2(change.amount);
        let now = self.now();
        partner.investments.push(PartnerInvestment {
            bike_id: bike.id.clone(),
            investment_amount: amount,
            profit_share: change.profit_share,
            status: InvestmentStatus::Active,
            profit_earned: 0.0,
            investment_date: now,
        });
        partner.total_investment = round2(partner.total_investment + amount);
        partner.active_investments = partner.computed_active_investments();

        bike.partner_investments.push(BikePartnerInvestment {
            partner_id: partner.id.clone(),
            amount,
            profit_share: change.profit_share,
            profit_earned: 0.0,
            investment_date: now,
        });
        bike.total_partner_investment = round2(bike.total_partner_investment + amount);
        Ok(amount)
    }

    fn remove_investment(
        &self,
        partner: &mut Partner,
        bike: &mut Bike,
        change: &InvestmentChange,
    ) -> ConsistencyResult<f64> {
        let partner_side = partner.investment_in(&bike.id).cloned();
        let bike_side = bike.investment_of(&partner.id).cloned();
        if partner_side.is_none() && bike_side.is_none() {
            return Err(ConsistencyError::not_found(
                "Investment",
                format!("{}/{}", partner.id, bike.id),
            ));
        }

        let earned = partner_side.as_ref().map_or(0.0, |entry| entry.profit_earned);
        let settled = partner_side
            .as_ref()
            .is_some_and(|entry| entry.status != InvestmentStatus::Active);
        if earned > 0.0 || settled {
            return Err(ConsistencyError::invalid_state(format!(
                "investment of partner '{}' in bike '{}' already carries profit, cancel the sale first",
                partner.id, bike.id
            )));
        }

        // Each side gives back exactly what it stored.
        let partner_amount = partner_side.map_or(0.0, |entry| entry.investment_amount);
        let bike_amount = bike_side.map_or(0.0, |entry| entry.amount);
        if (partner_amount - change.amount).abs() > MONEY_EPSILON {
            event!(
                Level::DEBUG,
                requested = change.amount,
                stored = partner_amount,
                "removing stored investment amount instead of the requested one"
            );
        }

        partner.investments.retain(|entry| entry.bike_id != bike.id);
        partner.total_investment = round2(partner.total_investment - partner_amount);
        partner.active_investments = partner.computed_active_investments();

        bike.partner_investments
            .retain(|entry| entry.partner_id != partner.id);
        bike.total_partner_investment = round2(bike.total_partner_investment - bike_amount);
        Ok(partner_amount)
    }
}
