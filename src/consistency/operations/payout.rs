use super::{CrossCollectionHandler, ensure_positive, load_partner};
use crate::consistency::commands::{PartnerPayout, PayoutOutcome};
use crate::consistency::error::{ConsistencyError, ConsistencyResult};
use crate::core::{MONEY_EPSILON, PayoutId, round2};
use crate::model::{InvestmentStatus, PayoutEntry};
use crate::transaction::{TxSession, TxSessionExt};
use tracing::{Level, event};

impl CrossCollectionHandler {
    /// Pays a partner out of the available balance and optionally settles
    /// the named investments.
    pub async fn process_partner_payout<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        payout: &PartnerPayout,
    ) -> ConsistencyResult<PayoutOutcome> {
        ensure_positive("amount", payout.amount)?;
        if payout.method.trim().is_empty() {
            return Err(ConsistencyError::validation("payout method is required"));
        }

        let mut partner = load_partner(tx, &payout.partner_id).await?;
        let amount = round2(payout.amount);
        if amount > partner.available_balance + MONEY_EPSILON {
            if !payout.allow_overdraft {
                return Err(ConsistencyError::invalid_state(format!(
                    "payout {amount:.2} exceeds available balance {:.2} of partner '{}'",
                    partner.available_balance, partner.id
                )));
            }
            event!(
                Level::WARN,
                partner_id = %partner.id,
                amount,
                available = partner.available_balance,
                actor = %self.actor,
                "overdraft payout authorised"
            );
        }

        for bike_id in &payout.bike_ids {
            let entry = partner.investment_in_mut(bike_id).ok_or_else(|| {
                ConsistencyError::not_found("Investment", format!("{}/{}", payout.partner_id, bike_id))
            })?;
            entry.status = InvestmentStatus::PaidOut;
        }

        let now = self.now();
        let payout_id = PayoutId::generate();
        partner.payout_history.push(PayoutEntry {
            payout_id: payout_id.clone(),
            amount,
            method: payout.method.clone(),
            bike_ids: payout.bike_ids.clone(),
            paid_at: now,
            processed_by: self.actor.clone(),
        });
        partner.available_balance = round2(partner.available_balance - amount);
        partner.total_payouts_received = round2(partner.total_payouts_received + amount);
        partner.active_investments = partner.computed_active_investments();
        partner.touch(&self.actor, now);
        tx.replace(&partner).await?;

        event!(
            Level::INFO,
            partner_id = %partner.id,
            payout_id = %payout_id,
            amount,
            "partner payout processed"
        );

        Ok(PayoutOutcome {
            payout_id,
            available_balance: partner.available_balance,
            total_payouts_received: partner.total_payouts_received,
            paid_out_bikes: payout.bike_ids.clone(),
        })
    }
}
