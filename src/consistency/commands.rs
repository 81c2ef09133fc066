//! Parameter and result shapes of the composite operations.

use crate::core::{BikeId, CustomerId, PartnerId, PayoutId, ReviewId, SellRecordId};
use crate::model::{BikeStatus, ProfitDistribution};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BikeSale {
    pub bike_id: BikeId,
    pub customer_id: CustomerId,
    pub selling_price: f64,
    /// Used only when the bike has no purchase price to derive profit from.
    #[serde(default)]
    pub profit: Option<f64>,
    #[serde(default)]
    pub profit_distribution: Vec<ProfitDistribution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleOutcome {
    pub sell_record_id: SellRecordId,
    pub profit: f64,
    pub distribution: Vec<ProfitDistribution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleCancellation {
    pub sell_record_id: SellRecordId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationOutcome {
    pub sell_record_id: SellRecordId,
    pub bike_id: BikeId,
    /// Other active records of the same bike cancelled along the way.
    pub cascaded: Vec<SellRecordId>,
    pub reverted: Vec<ProfitDistribution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusTransition {
    pub bike_id: BikeId,
    pub new_status: BikeStatus,
    #[serde(default)]
    pub sell_record_id: Option<SellRecordId>,
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusOutcome {
    pub bike_id: BikeId,
    pub previous: BikeStatus,
    pub current: BikeStatus,
    pub cascaded: Vec<SellRecordId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentAction {
    Add,
    /// Records earned profit without touching principal.
    Update,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentChange {
    pub partner_id: PartnerId,
    pub bike_id: BikeId,
    /// Principal for `add`, earned profit for `update`, ignored for `remove`.
    pub amount: f64,
    #[serde(default)]
    pub profit_share: f64,
    pub action: InvestmentAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentOutcome {
    pub partner_id: PartnerId,
    pub bike_id: BikeId,
    pub action: InvestmentAction,
    pub amount_applied: f64,
    pub partner_total_investment: f64,
    pub bike_total_partner_investment: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "rating", rename_all = "snake_case")]
pub enum RatingAction {
    Add(f64),
    Remove(f64),
    /// Full recomputation from every review of the bike.
    Recompute,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewAggregation {
    pub bike_id: BikeId,
    pub action: RatingAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingSummary {
    pub average_rating: f64,
    pub total_reviews: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewEdit {
    pub review_id: ReviewId,
    pub rating: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerPayout {
    pub partner_id: PartnerId,
    pub amount: f64,
    pub method: String,
    #[serde(default)]
    pub bike_ids: Vec<BikeId>,
    /// Lets a trusted admin pay more than the available balance.
    #[serde(default)]
    pub allow_overdraft: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutOutcome {
    pub payout_id: PayoutId,
    pub available_balance: f64,
    pub total_payouts_received: f64,
    pub paid_out_bikes: Vec<BikeId>,
}
