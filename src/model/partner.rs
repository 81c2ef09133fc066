use crate::core::{Actor, BikeId, PartnerId, PayoutId, round2};
use crate::storage::{Collection, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentStatus {
    Active,
    Completed,
    PaidOut,
}

impl fmt::Display for InvestmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::PaidOut => "paid_out",
        };
        f.write_str(label)
    }
}

/// Partner-side record of an investment in one bike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerInvestment {
    pub bike_id: BikeId,
    pub investment_amount: f64,
    #[serde(default)]
    pub profit_share: f64,
    pub status: InvestmentStatus,
    #[serde(default)]
    pub profit_earned: f64,
    pub investment_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutEntry {
    pub payout_id: PayoutId,
    pub amount: f64,
    pub method: String,
    #[serde(default)]
    pub bike_ids: Vec<BikeId>,
    pub paid_at: DateTime<Utc>,
    pub processed_by: Actor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Partner {
    pub id: PartnerId,
    pub name: String,
    #[serde(default)]
    pub investments: Vec<PartnerInvestment>,

    // Derived from `investments`.
    #[serde(default)]
    pub total_investment: f64,
    #[serde(default)]
    pub active_investments: u64,
    #[serde(default)]
    pub total_profit_earned: f64,

    /// Earned profit not yet paid out.
    #[serde(default)]
    pub available_balance: f64,
    #[serde(default)]
    pub total_payouts_received: f64,
    #[serde(default)]
    pub payout_history: Vec<PayoutEntry>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: Option<Actor>,
}

impl Document for Partner {
    const COLLECTION: Collection = Collection::Partners;

    fn document_id(&self) -> &str {
        self.id.as_str()
    }
}

impl Partner {
    pub fn new(id: impl Into<PartnerId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            investments: Vec::new(),
            total_investment: 0.0,
            active_investments: 0,
            total_profit_earned: 0.0,
            available_balance: 0.0,
            total_payouts_received: 0.0,
            payout_history: Vec::new(),
            updated_at: None,
            updated_by: None,
        }
    }

    pub fn computed_total_investment(&self) -> f64 {
        round2(
            self.investments
                .iter()
                .map(|entry| entry.investment_amount)
                .sum(),
        )
    }

    pub fn computed_active_investments(&self) -> u64 {
        self.investments
            .iter()
            .filter(|entry| entry.status == InvestmentStatus::Active)
            .count() as u64
    }

    pub fn computed_total_profit(&self) -> f64 {
        round2(self.investments.iter().map(|entry| entry.profit_earned).sum())
    }

    /// Re-derives every total from the embedded investments.
    pub fn recalculate_totals(&mut self) {
        self.total_investment = self.computed_total_investment();
        self.active_investments = self.computed_active_investments();
        self.total_profit_earned = self.computed_total_profit();
    }

    pub fn investment_in(&self, bike_id: &BikeId) -> Option<&PartnerInvestment> {
        self.investments
            .iter()
            .find(|entry| &entry.bike_id == bike_id)
    }

    pub fn investment_in_mut(&mut self, bike_id: &BikeId) -> Option<&mut PartnerInvestment> {
        self.investments
            .iter_mut()
            .find(|entry| &entry.bike_id == bike_id)
    }

    pub fn touch(&mut self, actor: &Actor, now: DateTime<Utc>) {
        self.updated_at = Some(now);
        self.updated_by = Some(actor.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn investment(bike: &str, amount: f64, status: InvestmentStatus, earned: f64) -> PartnerInvestment {
        PartnerInvestment {
            bike_id: BikeId::from(bike),
            investment_amount: amount,
            profit_share: 25.0,
            status,
            profit_earned: earned,
            investment_date: Utc::now(),
        }
    }

    #[test]
    fn test_recalculate_totals_from_investments() {
        let mut partner = Partner::new("p1", "Alice");
        partner.investments = vec![
            investment("b1", 500.0, InvestmentStatus::Active, 0.0),
            investment("b2", 250.5, InvestmentStatus::Completed, 40.25),
            investment("b3", 100.0, InvestmentStatus::PaidOut, 10.0),
        ];

        partner.recalculate_totals();
        assert_eq!(partner.total_investment, 850.5);
        assert_eq!(partner.active_investments, 1);
        assert_eq!(partner.total_profit_earned, 50.25);
    }

    #[test]
    fn test_investment_status_serializes_snake_case() {
        let json = serde_json::to_string(&InvestmentStatus::PaidOut).unwrap();
        assert_eq!(json, "\"paid_out\"");
    }
}
